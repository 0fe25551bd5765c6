//! Graph traversal over an incident topology with known adjacency.
//!
//! Neighbor sets must equal the ground truth exactly; shortest paths must
//! connect their endpoints over real edges with the minimum hop count.
//! Results naming nodes that do not exist, or paths over edges that do not
//! exist, are schema violations rather than mere wrong answers.

#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeSet;

use super::{Scenario, ScenarioContext};
use crate::core::config::ScaleParams;
use crate::core::errors::{HarnessError, Result};
use crate::engine::NamespaceHandle;
use crate::generator::graph::{EDGE_LOGIN, EDGE_TRAFFIC};
use crate::generator::{IncidentGraph, SyntheticGenerator};
use crate::metrics::ScenarioMetrics;

const MAX_DEPTH: usize = 6;

/// Neighbor and path queries over an incident graph.
#[derive(Debug, Clone, Default)]
pub struct GraphScenario;

/// One graph read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphQuery {
    /// Outgoing neighbors of `node`, optionally by edge kind.
    Neighbors {
        /// Node whose neighbors are read.
        node: String,
        /// Edge kind filter; `None` follows every edge.
        kind: Option<String>,
    },
    /// A shortest path between two nodes.
    Path {
        /// Start node.
        from: String,
        /// End node.
        to: String,
    },
}

/// The graph and the queries asked of it.
#[derive(Debug, Clone)]
pub struct GraphFixtures {
    /// Nodes and edges to load.
    pub graph: IncidentGraph,
    /// Reads to issue, in order.
    pub queries: Vec<GraphQuery>,
}

/// The loaded graph namespace.
#[derive(Debug)]
pub struct GraphWorkingSet {
    handle: NamespaceHandle,
    queries: Vec<GraphQuery>,
}

/// What the engine returned for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphAnswer {
    /// Neighbor ids.
    Neighbors(Vec<String>),
    /// Node ids along the path, if one was found.
    Path(Option<Vec<String>>),
}

fn build_queries(graph: &IncidentGraph) -> Vec<GraphQuery> {
    let mut queries: Vec<GraphQuery> = graph
        .nodes
        .iter()
        .map(|n| GraphQuery::Neighbors {
            node: n.id.clone(),
            kind: None,
        })
        .collect();
    for incident in &graph.incidents {
        queries.push(GraphQuery::Neighbors {
            node: incident.root_host.clone(),
            kind: Some(EDGE_TRAFFIC.to_string()),
        });
        for host in incident.hosts.iter().filter(|h| **h != incident.root_host) {
            queries.push(GraphQuery::Path {
                from: incident.root_host.clone(),
                to: host.clone(),
            });
        }
    }
    for pair in graph.incidents.windows(2) {
        queries.push(GraphQuery::Path {
            from: pair[0].root_host.clone(),
            to: pair[1].root_host.clone(),
        });
    }
    let users = graph.nodes.iter().filter(|n| n.kind == "user");
    for (user, incident) in users.zip(graph.incidents.iter().cycle()) {
        queries.push(GraphQuery::Neighbors {
            node: user.id.clone(),
            kind: Some(EDGE_LOGIN.to_string()),
        });
        queries.push(GraphQuery::Path {
            from: user.id.clone(),
            to: incident.root_host.clone(),
        });
    }
    queries
}

/// Grade one answer: `Ok(correct)` or `Err(reason)` for a schema violation.
fn grade(
    graph: &IncidentGraph,
    known: &BTreeSet<&str>,
    query: &GraphQuery,
    answer: &GraphAnswer,
) -> std::result::Result<bool, String> {
    match (query, answer) {
        (GraphQuery::Neighbors { node, kind }, GraphAnswer::Neighbors(found)) => {
            if let Some(ghost) = found.iter().find(|id| !known.contains(id.as_str())) {
                return Err(format!("neighbors of {node} include unknown node {ghost}"));
            }
            let found: BTreeSet<String> = found.iter().cloned().collect();
            Ok(found == graph.expected_neighbors(node, kind.as_deref()))
        }
        (GraphQuery::Path { from, to }, GraphAnswer::Path(path)) => {
            let expected = graph.expected_distance(from, to).filter(|d| *d <= MAX_DEPTH);
            let Some(path) = path else {
                return Ok(expected.is_none());
            };
            if let Some(ghost) = path.iter().find(|id| !known.contains(id.as_str())) {
                return Err(format!("path {from}->{to} visits unknown node {ghost}"));
            }
            if path.first() != Some(from) || path.last() != Some(to) || !graph.is_valid_path(path) {
                return Err(format!("path {from}->{to} is not a walk between its endpoints"));
            }
            Ok(expected == Some(path.len() - 1))
        }
        _ => Err("answer does not match query kind".to_string()),
    }
}

impl Scenario for GraphScenario {
    type Fixtures = GraphFixtures;
    type WorkingSet = GraphWorkingSet;
    type RawResults = Vec<GraphAnswer>;

    fn id(&self) -> &'static str {
        "graph"
    }

    fn description(&self) -> &'static str {
        "neighbor sets and shortest paths match the incident graph ground truth"
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    fn fixtures(&self, generator: &SyntheticGenerator, _scale: &ScaleParams) -> Result<Self::Fixtures> {
        let tenant = generator
            .build_tenants(1)
            .pop()
            .ok_or_else(|| HarnessError::Runtime {
                details: "generator produced no tenant".to_string(),
            })?;
        let graph = generator.build_incident_graph(&tenant);
        let queries = build_queries(&graph);
        Ok(GraphFixtures { graph, queries })
    }

    fn setup(&mut self, ctx: &mut ScenarioContext, fixtures: &Self::Fixtures) -> Result<Self::WorkingSet> {
        let handle = ctx.create_namespace("incidents")?;
        for node in &fixtures.graph.nodes {
            ctx.mutate("add_node", &node.id, || handle.add_node(node.clone()))?;
        }
        for edge in &fixtures.graph.edges {
            let target = format!("{}->{}", edge.from, edge.to);
            ctx.mutate("add_edge", &target, || handle.add_edge(edge.clone()))?;
        }
        Ok(GraphWorkingSet {
            handle,
            queries: fixtures.queries.clone(),
        })
    }

    fn execute(&mut self, ctx: &mut ScenarioContext, ws: &Self::WorkingSet) -> Result<Self::RawResults> {
        let handle = &ws.handle;
        let mut answers = Vec::with_capacity(ws.queries.len());
        for query in &ws.queries {
            ctx.check_deadline()?;
            let answer = match query {
                GraphQuery::Neighbors { node, kind } => GraphAnswer::Neighbors(
                    ctx.timed("graph_query", || handle.neighbors(node, kind.as_deref()))?,
                ),
                GraphQuery::Path { from, to } => GraphAnswer::Path(
                    ctx.timed("graph_query", || handle.shortest_path(from, to, MAX_DEPTH))?,
                ),
            };
            answers.push(answer);
        }
        Ok(answers)
    }

    fn verify(
        &self,
        raw: &Self::RawResults,
        fixtures: &Self::Fixtures,
        metrics: &mut ScenarioMetrics,
    ) -> Result<()> {
        metrics.observe("schema_validation_failures");
        let known: BTreeSet<&str> = fixtures.graph.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut correct = 0_u64;
        for (query, answer) in fixtures.queries.iter().zip(raw) {
            match grade(&fixtures.graph, &known, query, answer) {
                Ok(true) => correct += 1,
                Ok(false) => metrics.incr("graph_wrong_answers", 1),
                Err(reason) => {
                    metrics.incr("schema_validation_failures", 1);
                    metrics.note(reason);
                }
            }
        }
        if !raw.is_empty() {
            metrics.measured("graph_consistency", correct as f64 / raw.len() as f64);
        }
        Ok(())
    }
}
