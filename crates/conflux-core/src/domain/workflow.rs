//! Workflow definitions and their graph checks.
//!
//! A workflow is a DAG of typed nodes. It may be activated only when a
//! `start → backend-call → end` path exists.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Start,
    Hook,
    BackendCall,
    End,
}

/// Node payload. Hook nodes carry either an inline script or a hook reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub data: NodeData,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            data: NodeData::default(),
        }
    }

    /// A hook node running an inline script.
    pub fn inline_hook(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: NodeType::Hook,
            data: NodeData {
                script: Some(script.into()),
                ..NodeData::default()
            },
        }
    }

    /// A hook node running a stored hook.
    pub fn hook_ref(id: impl Into<String>, hook_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: NodeType::Hook,
            data: NodeData {
                hook_id: Some(hook_id.into()),
                ..NodeData::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A persisted workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    /// The request type the workflow handles (e.g. `tools/call`).
    /// At most one workflow per type is enabled.
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Structural problems found in a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown node: {0}")]
    UnknownNode(String),

    #[error("workflow graph contains a cycle")]
    Cycle,

    #[error("workflow has no {0} node")]
    MissingNode(&'static str),

    #[error("no path from {from} to {to}")]
    Unreachable {
        from: &'static str,
        to: &'static str,
    },

    #[error("hook node {0} needs a script or a hook reference")]
    EmptyHookNode(String),
}

impl Workflow {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        workflow_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            workflow_type: workflow_type.into(),
            enabled: false,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_edge(mut self, source: &str, target: &str) -> Self {
        self.edges.push(WorkflowEdge::new(source, target));
        self
    }

    fn first_of(&self, node_type: NodeType) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_type == node_type)
    }

    fn successors(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
        adjacency
    }

    /// Whether any node of type `to` is reachable from any node of type `from`.
    fn path_exists(&self, from: NodeType, to: NodeType) -> bool {
        let adjacency = self.successors();
        let targets: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == to)
            .map(|n| n.id.as_str())
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| n.node_type == from)
            .map(|n| n.id.as_str())
            .collect();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for &next in adjacency.get(current).map_or(&[][..], Vec::as_slice) {
                if targets.contains(next) {
                    return true;
                }
                queue.push_back(next);
            }
        }
        false
    }

    /// Check that node ids are unique, edges are closed over the node set
    /// and hook nodes have something to run.
    pub fn check_structure(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
            if node.node_type == NodeType::Hook
                && node.data.script.is_none()
                && node.data.hook_id.is_none()
            {
                return Err(GraphError::EmptyHookNode(node.id.clone()));
            }
        }
        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !ids.contains(end.as_str()) {
                    return Err(GraphError::UnknownNode(end.clone()));
                }
            }
        }
        Ok(())
    }

    /// Check the activation preconditions and report the first violation.
    pub fn activation_check(&self) -> Result<(), GraphError> {
        self.check_structure()?;
        for (node_type, label) in [
            (NodeType::Start, "start"),
            (NodeType::BackendCall, "backend-call"),
            (NodeType::End, "end"),
        ] {
            if self.first_of(node_type).is_none() {
                return Err(GraphError::MissingNode(label));
            }
        }
        if !self.path_exists(NodeType::Start, NodeType::BackendCall) {
            return Err(GraphError::Unreachable {
                from: "start",
                to: "backend-call",
            });
        }
        if !self.path_exists(NodeType::BackendCall, NodeType::End) {
            return Err(GraphError::Unreachable {
                from: "backend-call",
                to: "end",
            });
        }
        Ok(())
    }

    /// True iff the workflow may be activated.
    pub fn is_valid(&self) -> bool {
        self.activation_check().is_ok()
    }

    /// Order nodes with Kahn's algorithm. Ties keep declaration order.
    pub fn topological_order(&self) -> Result<Vec<&WorkflowNode>, GraphError> {
        self.check_structure()?;

        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
                *degree += 1;
            }
        }

        let by_id: HashMap<&str, &WorkflowNode> =
            self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let adjacency = self.successors();

        let mut ready: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| in_degree.get(n.id.as_str()) == Some(&0))
            .map(|n| n.id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_front() {
            if let Some(node) = by_id.get(current) {
                order.push(*node);
            }
            for &next in adjacency.get(current).map_or(&[][..], Vec::as_slice) {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(next);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(GraphError::Cycle)
        }
    }
}
