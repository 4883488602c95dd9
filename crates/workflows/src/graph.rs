//! Structural checks on workflow graphs.

use std::collections::{HashMap, HashSet, VecDeque};

use leadflow_channels::validate_template;
use leadflow_core::types::{NodeKind, Workflow, WorkflowEdge, WorkflowNode};
use leadflow_core::{LeadflowError, LeadflowResult};

/// Adjacency view over a workflow's nodes and edges.
pub struct WorkflowGraph<'a> {
    nodes: HashMap<&'a str, &'a WorkflowNode>,
    out_edges: HashMap<&'a str, Vec<&'a WorkflowEdge>>,
}

impl<'a> WorkflowGraph<'a> {
    pub fn new(nodes: &'a [WorkflowNode], edges: &'a [WorkflowEdge]) -> Self {
        let mut out_edges: HashMap<&str, Vec<&WorkflowEdge>> = HashMap::new();
        for edge in edges {
            out_edges.entry(edge.from.as_str()).or_default().push(edge);
        }
        Self {
            nodes: nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
            out_edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&'a WorkflowNode> {
        self.nodes.get(id).copied()
    }

    pub fn trigger(&self) -> Option<&'a WorkflowNode> {
        self.nodes
            .values()
            .find(|n| n.kind == NodeKind::Trigger)
            .copied()
    }

    /// Targets of `id`'s out-edges. With `branch` set, only edges labelled
    /// with that branch are followed.
    pub fn successors(&self, id: &str, branch: Option<bool>) -> Vec<&'a str> {
        self.out_edges
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|e| branch.is_none() || e.branch == branch)
                    .map(|e| e.to.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Every problem with the graph, or `Ok` if it can be activated.
pub fn validate(workflow: &Workflow) -> LeadflowResult<()> {
    let issues = collect_issues(&workflow.nodes, &workflow.edges);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(LeadflowError::Validation(issues.join("; ")))
    }
}

fn collect_issues(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> Vec<String> {
    let mut issues = Vec::new();

    let triggers = nodes.iter().filter(|n| n.kind == NodeKind::Trigger).count();
    if triggers != 1 {
        issues.push(format!("expected exactly one trigger node, found {triggers}"));
    }

    let mut seen = HashSet::new();
    for node in nodes {
        if node.id.trim().is_empty() {
            issues.push("node ids must not be empty".to_string());
        } else if !seen.insert(node.id.as_str()) {
            issues.push(format!("duplicate node id '{}'", node.id));
        }
        match &node.kind {
            NodeKind::SendMessage { template } => {
                if template.trim().is_empty() {
                    issues.push(format!("node '{}': message template is empty", node.id));
                }
                for issue in validate_template(template) {
                    issues.push(format!("node '{}': {issue}", node.id));
                }
            }
            NodeKind::AddTag { tag } if tag.trim().is_empty() => {
                issues.push(format!("node '{}': tag is empty", node.id));
            }
            _ => {}
        }
    }

    let graph = WorkflowGraph::new(nodes, edges);
    let mut edges_ok = true;
    for edge in edges {
        let (Some(from), Some(_)) = (graph.node(&edge.from), graph.node(&edge.to)) else {
            issues.push(format!("edge {} -> {} references an unknown node", edge.from, edge.to));
            edges_ok = false;
            continue;
        };
        if graph.node(&edge.to).is_some_and(|n| n.kind == NodeKind::Trigger) {
            issues.push(format!("edge {} -> {} points at the trigger", edge.from, edge.to));
        }
        let is_condition = matches!(from.kind, NodeKind::Condition { .. });
        if is_condition && edge.branch.is_none() {
            issues.push(format!(
                "edge {} -> {} leaves a condition and needs a branch",
                edge.from, edge.to
            ));
        }
        if !is_condition && edge.branch.is_some() {
            issues.push(format!(
                "edge {} -> {} has a branch but '{}' is not a condition",
                edge.from, edge.to, edge.from
            ));
        }
        if matches!(from.kind, NodeKind::Stop) {
            issues.push(format!("stop node '{}' must not have out-edges", edge.from));
        }
    }

    // Cycle and reachability checks assume every edge resolves.
    if edges_ok && seen.len() == nodes.len() {
        if has_cycle(nodes, edges) {
            issues.push("workflow graph contains a cycle".to_string());
        }
        if let Some(trigger) = graph.trigger() {
            let reachable = reachable_from(&graph, &trigger.id);
            for node in nodes {
                if !reachable.contains(node.id.as_str()) {
                    issues.push(format!("node '{}' is not reachable from the trigger", node.id));
                }
            }
        }
    }

    issues
}

/// Kahn's algorithm: a cycle leaves nodes that never reach in-degree zero.
fn has_cycle(nodes: &[WorkflowNode], edges: &[WorkflowEdge]) -> bool {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in edges {
        if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
            *d += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for edge in edges.iter().filter(|e| e.from == id) {
            if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(edge.to.as_str());
                }
            }
        }
    }
    visited != nodes.len()
}

fn reachable_from<'a>(graph: &WorkflowGraph<'a>, start: &'a str) -> HashSet<&'a str> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for next in graph.successors(id, None) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}
