//! Bookkeeping for one statement fanned out to several nodes.
//!
//! [`PendingFanOut`] does not do any I/O. The coordinator asks it what to
//! dispatch next, reports what each node answered, and forwards whatever line
//! it hands back. Settlement is keyed by node name, so responses may arrive
//! in any order.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::{
    partition::NodeId,
    protocol::NodeResponse,
    router::{QueryPlan, Substatement},
};

/// What is left to do once every node has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Result blocks to hand to the materializer, in arrival order.
    Materialize(Vec<String>),
    /// A SELECT that produced no blocks at all.
    NoOutput,
    /// Everything the client needs has already been forwarded.
    Done,
}

#[derive(Debug)]
pub struct PendingFanOut {
    queued: VecDeque<Substatement>,
    in_flight: HashSet<NodeId>,
    expected: usize,
    settled: usize,
    output_blocks: Vec<String>,
    success_forwarded: bool,
    is_select: bool,
}

impl PendingFanOut {
    pub fn new(plan: QueryPlan, is_select: bool) -> Self {
        Self {
            expected: plan.substatements.len(),
            queued: plan.substatements.into(),
            in_flight: HashSet::new(),
            settled: 0,
            output_blocks: Vec::new(),
            success_forwarded: false,
            is_select,
        }
    }

    /// Next substatement to send, in plan order.
    pub fn next_dispatch(&mut self) -> Option<Substatement> {
        self.queued.pop_front()
    }

    pub fn mark_sent(&mut self, node: &str) {
        self.in_flight.insert(node.to_string());
    }

    pub fn is_in_flight(&self, node: &str) -> bool {
        self.in_flight.contains(node)
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &str> {
        self.in_flight.iter().map(String::as_str)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_complete(&self) -> bool {
        self.settled == self.expected
    }

    /// Records `node`'s answer; returns the line to forward to the client, if any.
    pub fn settle(&mut self, node: &str, response: NodeResponse) -> Option<String> {
        self.in_flight.remove(node);
        self.settled += 1;

        match response {
            NodeResponse::Success if self.is_select || self.success_forwarded => {
                debug!(node, "suppressing duplicate SUCCESS");
                None
            }
            NodeResponse::Success => {
                self.success_forwarded = true;
                Some("SUCCESS".to_string())
            }
            NodeResponse::Output(block) => {
                self.output_blocks.push(block);
                None
            }
            NodeResponse::Error(message) if message.is_empty() => Some("ERROR".to_string()),
            NodeResponse::Error(message) => Some(format!("ERROR {message}")),
        }
    }

    /// Settles `node` as failed without a response of its own.
    pub fn fail(&mut self, node: &str, reason: impl std::fmt::Display) -> String {
        self.in_flight.remove(node);
        self.settled += 1;
        format!("ERROR: node {node} unreachable: {reason}")
    }

    /// Settles `node` with an error line the coordinator composed itself.
    pub fn reject(&mut self, node: &str, line: String) -> String {
        self.in_flight.remove(node);
        self.settled += 1;
        line
    }

    pub fn finish(self) -> Completion {
        if !self.output_blocks.is_empty() {
            Completion::Materialize(self.output_blocks)
        } else if self.is_select {
            Completion::NoOutput
        } else {
            Completion::Done
        }
    }
}
