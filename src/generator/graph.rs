//! Incident graphs: hosts, users and incident clusters with known topology.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use super::rng::{label_salt, substream};
use crate::engine::{GraphEdge, GraphNode};

const HOSTS: usize = 20;
const USERS: usize = 10;
const INCIDENTS: usize = 5;

pub const EDGE_TRAFFIC: &str = "network_traffic";
pub const EDGE_LOGIN: &str = "logged_into";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: usize,
    pub root_host: String,
    pub hosts: Vec<String>,
}

/// Graph fixture with ground-truth adjacency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentGraph {
    pub tenant: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub incidents: Vec<Incident>,
}

impl IncidentGraph {
    /// Undirected neighbor sets, optionally restricted to one edge kind.
    #[must_use]
    pub fn expected_neighbors(&self, node: &str, kind: Option<&str>) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .filter_map(|e| {
                if e.from == node {
                    Some(e.to.clone())
                } else if e.to == node {
                    Some(e.from.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Hop count of the shortest undirected path, `None` if unreachable.
    #[must_use]
    pub fn expected_distance(&self, from: &str, to: &str) -> Option<usize> {
        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for e in &self.edges {
            adjacency.entry(&e.from).or_default().push(&e.to);
            adjacency.entry(&e.to).or_default().push(&e.from);
        }
        let mut seen = BTreeSet::from([from]);
        let mut queue = VecDeque::from([(from, 0_usize)]);
        while let Some((node, depth)) = queue.pop_front() {
            if node == to {
                return Some(depth);
            }
            for next in adjacency.get(node).into_iter().flatten() {
                if seen.insert(*next) {
                    queue.push_back((*next, depth + 1));
                }
            }
        }
        None
    }

    /// Whether consecutive path entries are joined by an edge.
    #[must_use]
    pub fn is_valid_path(&self, path: &[String]) -> bool {
        path.windows(2).all(|w| {
            self.edges.iter().any(|e| {
                (e.from == w[0] && e.to == w[1]) || (e.from == w[1] && e.to == w[0])
            })
        })
    }
}

fn node(id: String, kind: &str, properties: &[(&str, String)]) -> GraphNode {
    GraphNode {
        id,
        kind: kind.to_string(),
        properties: properties
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
    }
}

/// Hosts linked within incident clusters, users logged into hosts.
#[must_use]
pub fn build_incident_graph(seed: u64, tenant: &str) -> IncidentGraph {
    let mut rng = substream(seed, "incident-graph", &[label_salt(tenant)]);

    let host_ids: Vec<String> = (0..HOSTS).map(|i| format!("host_{i:02}")).collect();
    let mut nodes: Vec<GraphNode> = host_ids
        .iter()
        .enumerate()
        .map(|(i, id)| node(id.clone(), "host", &[("ip", format!("10.0.0.{i}"))]))
        .collect();
    nodes.extend((0..USERS).map(|i| {
        node(
            format!("user_{i:02}"),
            "user",
            &[("email", format!("user{i}@example.com"))],
        )
    }));

    let mut edges = Vec::new();
    let mut linked: BTreeSet<(String, String)> = BTreeSet::new();
    let mut incidents = Vec::with_capacity(INCIDENTS);
    for id in 0..INCIDENTS {
        let size = rng.random_range(3..=7);
        let mut hosts: Vec<String> = host_ids.choose_multiple(&mut rng, size).cloned().collect();
        hosts.sort();
        for (i, a) in hosts.iter().enumerate() {
            for b in &hosts[i + 1..] {
                if linked.insert((a.clone(), b.clone())) {
                    edges.push(GraphEdge {
                        from: a.clone(),
                        to: b.clone(),
                        kind: EDGE_TRAFFIC.to_string(),
                    });
                }
            }
        }
        incidents.push(Incident {
            id,
            root_host: hosts[0].clone(),
            hosts,
        });
    }

    for i in 0..USERS {
        if let Some(host) = host_ids.choose(&mut rng) {
            edges.push(GraphEdge {
                from: format!("user_{i:02}"),
                to: host.clone(),
                kind: EDGE_LOGIN.to_string(),
            });
        }
    }

    IncidentGraph {
        tenant: tenant.to_string(),
        nodes,
        edges,
        incidents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_has_expected_shape() {
        let g = build_incident_graph(1, "tenant_000");
        assert_eq!(g.nodes.len(), HOSTS + USERS);
        assert_eq!(g.incidents.len(), INCIDENTS);
        let ids: BTreeSet<&String> = g.nodes.iter().map(|n| &n.id).collect();
        for e in &g.edges {
            assert!(ids.contains(&e.from) && ids.contains(&e.to));
        }
    }

    #[test]
    fn incident_hosts_are_fully_connected() {
        let g = build_incident_graph(2, "t");
        for inc in &g.incidents {
            for a in &inc.hosts {
                let n = g.expected_neighbors(a, Some(EDGE_TRAFFIC));
                for b in inc.hosts.iter().filter(|b| *b != a) {
                    assert!(n.contains(b), "{a} should neighbor {b}");
                }
            }
        }
    }

    #[test]
    fn distances_follow_edges() {
        let g = build_incident_graph(3, "t");
        let inc = &g.incidents[0];
        assert_eq!(g.expected_distance(&inc.hosts[0], &inc.hosts[0]), Some(0));
        assert_eq!(g.expected_distance(&inc.hosts[0], &inc.hosts[1]), Some(1));
        assert!(g.is_valid_path(&[inc.hosts[0].clone(), inc.hosts[1].clone()]));
    }

    #[test]
    fn tenants_get_different_graphs() {
        assert_ne!(
            build_incident_graph(3, "a").edges,
            build_incident_graph(3, "b").edges
        );
    }
}
