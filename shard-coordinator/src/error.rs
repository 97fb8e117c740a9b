//! Error families for every layer of the coordinator.
//!
//! Query-time failures ([`ParseError`], [`CatalogError`], [`PartitionError`],
//! [`RoutingError`]) are folded into [`QueryError`] and reported to the client
//! as a single `ERROR: <message>` line; the session stays open. Registration
//! problems surface as [`ProtocolError`] and are fatal. [`TransportError`] is
//! returned by the session layer when a send cannot be delivered.

use std::io;

use thiserror::Error;

use crate::session::PeerId;

/// The statement text did not match the supported grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("UnsupportedStatement: '{0}'")]
    UnsupportedStatement(String),

    #[error("MalformedStatement: expected {expected}")]
    MalformedStatement { expected: &'static str },

    #[error("MultipleRowsUnsupported: only a single value tuple may be inserted")]
    MultipleRowsUnsupported,

    #[error("BadAttributeDeclaration: '{0}' (expected '<name> <type>')")]
    BadAttributeDeclaration(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("TableExists: table '{0}' already exists")]
    TableExists(String),

    #[error("UnknownTable: table '{0}' does not exist")]
    UnknownTable(String),

    #[error("failed to persist catalog snapshot: {0}")]
    Persist(#[source] io::Error),

    #[error("failed to read catalog snapshot: {0}")]
    Read(#[source] io::Error),

    #[error("catalog snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    #[error("catalog snapshot version {0} is not supported")]
    UnsupportedSnapshotVersion(u16),
}

/// A partition specification could not be turned into a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("UnknownNode: '{0}' is not a registered node")]
    UnknownNode(String),

    #[error("UnsupportedPartitionType: '{0}'")]
    UnsupportedPartitionType(String),

    #[error("UnsupportedAttributeType: attribute '{attr}' has type '{ty}'")]
    UnsupportedAttributeType { attr: String, ty: String },

    #[error("UnknownAttribute: '{0}' is not a declared attribute")]
    UnknownAttribute(String),

    #[error("BadPartitionSpecification: {0}")]
    BadPartitionSpecification(String),
}

/// A statement was valid but its values could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("MissingValue: no value at position {position} for attribute '{attr}'")]
    MissingValue { attr: String, position: usize },

    #[error("MissingColumn: column list does not name partition attribute '{0}'")]
    MissingColumn(String),

    #[error("InvalidLiteral: '{value}' is not a valid value for attribute '{attr}'")]
    InvalidLiteral { attr: String, value: String },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

impl QueryError {
    /// Line sent back to the client for a failed statement.
    pub fn client_line(&self) -> String {
        format!("ERROR: {self}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed registration message: '{0}'")]
    MalformedRegistration(String),

    #[error("unexpected message during registration: '{0}'")]
    UnexpectedRegistration(String),

    #[error("unrecognized node response: '{0}'")]
    UnrecognizedResponse(String),

    #[error("controller channel closed before registration completed")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no session registered for node '{0}'")]
    UnknownNode(String),

    #[error("peer {0} is no longer connected")]
    PeerGone(PeerId),

    #[error("no controller session registered")]
    NoController,

    #[error("nothing has been received yet, so there is no one to reply to")]
    NoSender,
}
