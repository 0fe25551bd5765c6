#![forbid(unsafe_code)]

//! ech: engine certification harness CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        if !e.already_reported() {
            eprintln!("ech: {e}");
        }
        std::process::exit(e.exit_code());
    }
}
