//! Table catalog and its on-disk snapshot.
//!
//! The catalog maps table names to their declared attributes and the
//! [`PartitionStrategy`] chosen at creation. Every mutation rewrites the whole
//! snapshot so a restarted coordinator routes exactly as before.
//!
//! Snapshot layout: the magic bytes `SCAT`, a little-endian `u16` format
//! version, then the bincode-encoded table list.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CatalogError, QueryError};
use crate::parser::{Attribute, PartitionSpec};
use crate::partition::{NodeId, PartitionStrategy};

const SNAPSHOT_MAGIC: &[u8; 4] = b"SCAT";
const SNAPSHOT_VERSION: u16 = 1;
const HEADER_LEN: usize = SNAPSHOT_MAGIC.len() + 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub strategy: PartitionStrategy,
}

#[derive(Debug, Default)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
    path: Option<PathBuf>,
}

impl Catalog {
    /// A catalog that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the snapshot at `path`, or starts empty if there is none yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let tables = match fs::read(&path) {
            Ok(bytes) => decode_snapshot(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no catalog snapshot, starting empty");
                Vec::new()
            }
            Err(err) => return Err(CatalogError::Read(err)),
        };
        info!(path = %path.display(), tables = tables.len(), "catalog loaded");

        Ok(Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table(&self, table: &str) -> Option<&Table> {
        self.tables.get(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Registers `table` partitioned by `spec` over `nodes`.
    ///
    /// Returns the nodes that must receive the physical CREATE.
    pub fn create(
        &mut self,
        table: &str,
        attrs: Vec<Attribute>,
        spec: &str,
        nodes: &[NodeId],
    ) -> Result<Vec<NodeId>, QueryError> {
        if self.tables.contains_key(table) {
            return Err(CatalogError::TableExists(table.to_string()).into());
        }

        let spec = PartitionSpec::parse(spec)?;
        let strategy = PartitionStrategy::build(&spec, &attrs, nodes)?;
        let targets = strategy.initialize();

        self.tables.insert(
            table.to_string(),
            Table {
                name: table.to_string(),
                attrs,
                strategy,
            },
        );
        if let Err(err) = self.persist() {
            self.tables.remove(table);
            return Err(err.into());
        }

        info!(table, kind = spec_kind(&spec), nodes = ?targets, "table created");
        Ok(targets)
    }

    /// Removes `table`, returning the nodes that held its shards.
    pub fn drop(&mut self, table: &str) -> Result<Vec<NodeId>, CatalogError> {
        let removed = self
            .tables
            .remove(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_string()))?;

        if let Err(err) = self.persist() {
            self.tables.insert(table.to_string(), removed);
            return Err(err);
        }

        info!(table, "table dropped");
        Ok(removed.strategy.initialize())
    }

    /// Picks the node for one insert.
    ///
    /// The advanced cursor and counters are persisted on a best-effort basis:
    /// a failed write is logged and the insert is still routed.
    pub fn route_insert(
        &mut self,
        table: &str,
        columns: Option<&str>,
        values: &str,
    ) -> Result<NodeId, QueryError> {
        let entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_string()))?;
        let node = entry.strategy.choose_insert_node(columns, values)?;

        if let Err(err) = self.persist() {
            warn!(table, error = %err, "catalog snapshot not updated after insert");
        }
        Ok(node)
    }

    /// Nodes that may hold rows matching `where_clause` (empty for no filter).
    pub fn route_select(
        &self,
        table: &str,
        where_clause: &str,
    ) -> Result<Vec<NodeId>, CatalogError> {
        self.tables
            .get(table)
            .map(|entry| entry.strategy.choose_select_node(where_clause))
            .ok_or_else(|| CatalogError::UnknownTable(table.to_string()))
    }

    /// Human-readable dump of every table and its placement, in name order.
    pub fn explain(&self) -> String {
        if self.tables.is_empty() {
            return "No tables have been created".to_string();
        }
        let mut out = String::new();
        for table in self.tables.values() {
            let columns: Vec<String> = table
                .attrs
                .iter()
                .map(|a| format!("{} {}", a.name, a.data_type))
                .collect();
            let _ = writeln!(out, "{} ({})", table.name, columns.join(", "));
            out.push_str(&table.strategy.explain());
        }
        out.trim_end().to_string()
    }

    /// Rewrites the snapshot file. A no-op for in-memory catalogs.
    pub fn persist(&self) -> Result<(), CatalogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tables: Vec<&Table> = self.tables.values().collect();
        let bytes = encode_snapshot(&tables).map_err(CatalogError::Persist)?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &bytes)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(CatalogError::Persist)?;

        debug!(path = %path.display(), bytes = bytes.len(), "catalog snapshot written");
        Ok(())
    }
}

fn spec_kind(spec: &PartitionSpec) -> &'static str {
    match spec {
        PartitionSpec::Random { .. } => "random",
        PartitionSpec::RoundRobin { .. } => "roundrobin",
        PartitionSpec::Hash { .. } => "hash",
        PartitionSpec::Range { .. } => "range",
    }
}

fn encode_snapshot(tables: &[&Table]) -> io::Result<Vec<u8>> {
    let body =
        bincode::serialize(tables).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

fn decode_snapshot(bytes: &[u8]) -> Result<Vec<Table>, CatalogError> {
    if bytes.len() < HEADER_LEN {
        return Err(CatalogError::CorruptSnapshot(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    if &header[..4] != SNAPSHOT_MAGIC {
        return Err(CatalogError::CorruptSnapshot("bad magic".into()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(CatalogError::UnsupportedSnapshotVersion(version));
    }
    bincode::deserialize(body).map_err(|err| CatalogError::CorruptSnapshot(err.to_string()))
}
