//! Topology-aware message routing between the coordinator and agents.
//!
//! The router owns an adjacency model derived from the selected topology
//! and the member join order. Delivery is path-based: a message is only
//! delivered when a route exists under the current topology, so switching
//! from mesh to ring genuinely changes who can talk to whom. Topology is
//! mutable at runtime, but an adaptation that would disconnect a member
//! is rejected before commit and the prior topology stays active.

use crate::agent::AgentId;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::consensus::ProposalId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;

/// Inbox capacity per member.
const INBOX_CAPACITY: usize = 100;

/// The permitted communication graph among coordinator and agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Fully connected: every node reaches every other directly.
    #[default]
    Mesh,
    /// All traffic flows through the coordinator hub.
    Star,
    /// Tree with parent/child edges, heap layout over join order.
    Hierarchical,
    /// Successor-only directed cycle.
    Ring,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Mesh => write!(f, "mesh"),
            Topology::Star => write!(f, "star"),
            Topology::Hierarchical => write!(f, "hierarchical"),
            Topology::Ring => write!(f, "ring"),
        }
    }
}

/// A routable endpoint: the coordinator or a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteNode {
    /// The coordinator hub.
    Coordinator,
    /// An agent by id.
    Agent(AgentId),
}

impl std::fmt::Display for RouteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteNode::Coordinator => write!(f, "coordinator"),
            RouteNode::Agent(id) => write!(f, "agent-{}", id.short()),
        }
    }
}

/// Coordination message payloads carried by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Payload {
    /// A task was dispatched to the recipient.
    TaskDispatch { task: TaskId },
    /// A task reached a terminal outcome.
    TaskResult { task: TaskId, success: bool },
    /// The recipient is asked to vote on a proposal.
    VoteRequest {
        proposal: ProposalId,
        topic: String,
        options: Vec<String>,
    },
    /// A proposal reached a decision.
    Decision { proposal: ProposalId, approved: bool },
    /// Queued work moved between agents.
    Rebalance {
        task: TaskId,
        from: AgentId,
        to: AgentId,
    },
}

/// A routed message with its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending node.
    pub from: RouteNode,
    /// Receiving node.
    pub to: RouteNode,
    /// The payload.
    pub payload: Payload,
}

/// Topology router for a coordination session.
pub struct Router {
    topology: Topology,
    members: Vec<AgentId>,
    inboxes: HashMap<RouteNode, mpsc::Sender<Message>>,
}

impl Router {
    /// Create a router with the given topology.
    ///
    /// The coordinator joins implicitly; its inbox receiver is returned.
    pub fn new(topology: Topology) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let mut inboxes = HashMap::new();
        inboxes.insert(RouteNode::Coordinator, tx);
        (
            Self {
                topology,
                members: Vec::new(),
                inboxes,
            },
            rx,
        )
    }

    /// The active topology.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Member agents in join order.
    pub fn members(&self) -> &[AgentId] {
        &self.members
    }

    /// Add an agent to the routing graph, returning its inbox.
    pub fn join(&mut self, agent: AgentId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.members.push(agent);
        self.inboxes.insert(RouteNode::Agent(agent), tx);
        rx
    }

    /// Remove an agent from the routing graph.
    pub fn leave(&mut self, agent: &AgentId) {
        self.members.retain(|m| m != agent);
        self.inboxes.remove(&RouteNode::Agent(*agent));
    }

    /// All nodes in layout order: coordinator first, then members.
    fn nodes(&self) -> Vec<RouteNode> {
        let mut nodes = Vec::with_capacity(self.members.len() + 1);
        nodes.push(RouteNode::Coordinator);
        nodes.extend(self.members.iter().map(|id| RouteNode::Agent(*id)));
        nodes
    }

    fn adjacency_for(topology: Topology, nodes: &[RouteNode]) -> HashMap<RouteNode, Vec<RouteNode>> {
        let n = nodes.len();
        let mut adjacency: HashMap<RouteNode, Vec<RouteNode>> =
            nodes.iter().map(|node| (*node, Vec::new())).collect();
        match topology {
            Topology::Mesh => {
                for (i, a) in nodes.iter().enumerate() {
                    for (j, b) in nodes.iter().enumerate() {
                        if i != j {
                            adjacency.get_mut(a).unwrap().push(*b);
                        }
                    }
                }
            }
            Topology::Star => {
                for node in nodes.iter().skip(1) {
                    adjacency.get_mut(&nodes[0]).unwrap().push(*node);
                    adjacency.get_mut(node).unwrap().push(nodes[0]);
                }
            }
            Topology::Hierarchical => {
                for i in 0..n {
                    for child in [2 * i + 1, 2 * i + 2] {
                        if child < n {
                            adjacency.get_mut(&nodes[i]).unwrap().push(nodes[child]);
                            adjacency.get_mut(&nodes[child]).unwrap().push(nodes[i]);
                        }
                    }
                }
            }
            Topology::Ring => {
                if n > 1 {
                    for i in 0..n {
                        let next = nodes[(i + 1) % n];
                        adjacency.get_mut(&nodes[i]).unwrap().push(next);
                    }
                }
            }
        }
        adjacency
    }

    fn bfs_path(
        adjacency: &HashMap<RouteNode, Vec<RouteNode>>,
        from: RouteNode,
        to: RouteNode,
    ) -> Option<Vec<RouteNode>> {
        if !adjacency.contains_key(&from) || !adjacency.contains_key(&to) {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }
        let mut queue = VecDeque::from([from]);
        let mut parents: HashMap<RouteNode, RouteNode> = HashMap::new();
        let mut seen = HashSet::from([from]);
        while let Some(node) = queue.pop_front() {
            for &next in adjacency.get(&node).into_iter().flatten() {
                if seen.insert(next) {
                    parents.insert(next, node);
                    if next == to {
                        let mut path = vec![to];
                        let mut cursor = to;
                        while let Some(&parent) = parents.get(&cursor) {
                            path.push(parent);
                            cursor = parent;
                        }
                        path.reverse();
                        return Some(path);
                    }
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// The route from one node to another under the current topology.
    pub fn route(&self, from: RouteNode, to: RouteNode) -> Result<Vec<RouteNode>> {
        let adjacency = Self::adjacency_for(self.topology, &self.nodes());
        Self::bfs_path(&adjacency, from, to).ok_or_else(|| Error::Unreachable {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Nodes reachable from `from`, excluding itself.
    pub fn reachable(&self, from: RouteNode) -> HashSet<RouteNode> {
        let adjacency = Self::adjacency_for(self.topology, &self.nodes());
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(node) = queue.pop_front() {
            for &next in adjacency.get(&node).into_iter().flatten() {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.remove(&from);
        seen
    }

    /// Deliver a message, returning the number of hops on the route taken.
    pub async fn send(&self, from: RouteNode, to: RouteNode, payload: Payload) -> Result<usize> {
        let path = self.route(from, to)?;
        let inbox = self.inboxes.get(&to).ok_or_else(|| Error::Unreachable {
            from: from.to_string(),
            to: to.to_string(),
        })?;
        inbox
            .send(Message { from, to, payload })
            .await
            .map_err(|_| Error::Unreachable {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        Ok(path.len().saturating_sub(1))
    }

    /// Fan a payload out to every node reachable from `from`.
    ///
    /// Returns the recipients in layout order.
    pub async fn broadcast(&self, from: RouteNode, payload: Payload) -> Result<Vec<RouteNode>> {
        let reachable = self.reachable(from);
        let mut delivered = Vec::new();
        for node in self.nodes() {
            if node == from || !reachable.contains(&node) {
                continue;
            }
            if let Some(inbox) = self.inboxes.get(&node) {
                if inbox
                    .send(Message {
                        from,
                        to: node,
                        payload: payload.clone(),
                    })
                    .await
                    .is_ok()
                {
                    delivered.push(node);
                }
            }
        }
        Ok(delivered)
    }

    fn validate(topology: Topology, nodes: &[RouteNode]) -> Result<()> {
        let adjacency = Self::adjacency_for(topology, nodes);
        for &from in nodes {
            let mut seen = HashSet::from([from]);
            let mut queue = VecDeque::from([from]);
            while let Some(node) = queue.pop_front() {
                for &next in adjacency.get(&node).into_iter().flatten() {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            if seen.len() != nodes.len() {
                let missing = nodes.iter().find(|n| !seen.contains(n)).unwrap_or(&from);
                return Err(Error::DisconnectedTopology {
                    node: missing.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Switch topology, keeping the current member order.
    pub fn adapt_topology(&mut self, topology: Topology) -> Result<()> {
        let order = self.members.clone();
        self.adapt(topology, order)
    }

    /// Switch topology and member order atomically.
    ///
    /// Every current member must appear in `order`: omitting one would
    /// disconnect it, so the request is rejected with
    /// `DisconnectedTopology` and the prior topology stays active. The
    /// candidate adjacency is then validated for mutual reachability
    /// before commit.
    pub fn adapt(&mut self, topology: Topology, order: Vec<AgentId>) -> Result<()> {
        for id in &order {
            if !self.members.contains(id) {
                return Err(Error::AgentNotFound { id: *id });
            }
        }
        for member in &self.members {
            if !order.contains(member) {
                return Err(Error::DisconnectedTopology {
                    node: RouteNode::Agent(*member).to_string(),
                });
            }
        }

        let mut nodes = Vec::with_capacity(order.len() + 1);
        nodes.push(RouteNode::Coordinator);
        nodes.extend(order.iter().map(|id| RouteNode::Agent(*id)));
        Self::validate(topology, &nodes)?;

        self.topology = topology;
        self.members = order;
        Ok(())
    }
}
