//! Distributed query coordinator that shards tables across worker nodes.
//!
//! Clients send a small SQL dialect (CREATE/INSERT/SELECT/DROP) over a TCP
//! line protocol. The coordinator decides which worker nodes each statement
//! concerns, forwards it, and folds the node responses into one answer.
//! Each module focuses on a concrete responsibility:
//!
//! - [`parser`] recognizes statements and `partition by` clauses.
//! - [`partition`] holds the placement strategies (random, round-robin,
//!   hash, range) and their per-node insert counters.
//! - [`catalog`] maps tables to strategies and persists them to a versioned
//!   snapshot file.
//! - [`router`] turns a statement into per-node substatements.
//! - [`session`] and [`wire`] accept TCP connections and frame lines.
//! - [`protocol`] parses registrations and node responses on the controller port.
//! - [`coordinator`], [`fanout`] and [`meta`] run the registration barrier and
//!   the query loop.
//! - [`materialize`] and [`cluster`] are the boundaries to the result gather
//!   scripts and the resource manager.
//! - [`cli`], [`config`] and [`shell`] make up the binary.
//!
//! Integration tests drive a coordinator with fake worker nodes over real
//! sockets.

pub mod catalog;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod materialize;
pub mod meta;
pub mod parser;
pub mod partition;
pub mod protocol;
pub mod router;
pub mod session;
pub mod shell;
pub mod wire;
