//! Partition strategies: deciding which nodes serve a table's statements.
//!
//! A table is bound to one [`PartitionStrategy`] when it is created. The
//! strategy keeps the retained node subset for the table's whole lifetime plus
//! whatever routing state its variant needs (a cursor, the position and type
//! of the partitioning attribute, the declared ranges) and a per-node counter
//! of routed inserts, which `!partitions` reports.
//!
//! Every variant answers the same three questions:
//!
//! - [`initialize`](PartitionStrategy::initialize): which nodes receive the
//!   physical CREATE (and later the DROP).
//! - [`choose_insert_node`](PartitionStrategy::choose_insert_node): exactly one
//!   node for a value tuple.
//! - [`choose_select_node`](PartitionStrategy::choose_select_node): the
//!   non-empty subset that may hold rows matching a where-clause.
//!
//! Validation happens at construction, so a table that exists can always be
//! routed; only malformed insert literals fail later, with a [`RoutingError`].

use std::fmt::Write as _;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PartitionError, RoutingError};
use crate::parser::{Attribute, PartitionSpec, equality_predicate, split_list, unquote};

/// Nodes are known to strategies by name only.
pub type NodeId = String;

/// Attribute types a hash or range key may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Integer,
    Char,
    Decimal,
}

impl KeyType {
    /// Maps a declared SQL type onto a supported key type.
    pub fn classify(declared: &str) -> Option<Self> {
        match declared.to_ascii_lowercase().as_str() {
            "integer" | "int" | "bigint" | "smallint" => Some(KeyType::Integer),
            "char" | "varchar" | "text" | "string" => Some(KeyType::Char),
            "decimal" | "real" | "float" | "double" | "numeric" => Some(KeyType::Decimal),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            KeyType::Integer => "integer",
            KeyType::Char => "char",
            KeyType::Decimal => "decimal",
        }
    }
}

/// Position and type of the partitioning attribute inside a value tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    pub position: usize,
    pub key_type: KeyType,
}

impl KeyColumn {
    fn resolve(attrs: &[Attribute], name: &str) -> Result<Self, PartitionError> {
        let (position, attr) = attrs
            .iter()
            .enumerate()
            .find(|(_, attr)| attr.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| PartitionError::UnknownAttribute(name.to_string()))?;

        let key_type = KeyType::classify(&attr.data_type).ok_or_else(|| {
            PartitionError::UnsupportedAttributeType {
                attr: attr.name.clone(),
                ty: attr.data_type.clone(),
            }
        })?;

        Ok(Self {
            name: attr.name.clone(),
            position,
            key_type,
        })
    }

    /// Pulls this column's literal out of an insert's value list.
    ///
    /// With an explicit column list the key is found by name in that list,
    /// otherwise by its declared position.
    fn value_in<'a>(
        &self,
        columns: Option<&str>,
        values: &'a str,
    ) -> Result<&'a str, RoutingError> {
        let position = match columns {
            Some(columns) => split_list(columns)
                .iter()
                .position(|column| column.eq_ignore_ascii_case(&self.name))
                .ok_or_else(|| RoutingError::MissingColumn(self.name.clone()))?,
            None => self.position,
        };
        split_list(values)
            .get(position)
            .copied()
            .map(unquote)
            .ok_or_else(|| RoutingError::MissingValue {
                attr: self.name.clone(),
                position,
            })
    }

    /// The literal of a `<column> = <literal>` where-clause, if that is all it says.
    fn point_lookup<'a>(&self, where_clause: &'a str) -> Option<&'a str> {
        equality_predicate(where_clause)
            .filter(|(attr, _)| attr.eq_ignore_ascii_case(&self.name))
            .map(|(_, literal)| literal)
    }

    fn numeric(&self, literal: &str) -> Result<f64, RoutingError> {
        literal
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(literal))
    }

    fn invalid(&self, literal: &str) -> RoutingError {
        RoutingError::InvalidLiteral {
            attr: self.name.clone(),
            value: literal.to_string(),
        }
    }
}

/// Retained nodes plus how many inserts each one received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Placement {
    nodes: Vec<NodeId>,
    distribution: Vec<u64>,
}

impl Placement {
    fn new(nodes: Vec<NodeId>) -> Self {
        let distribution = vec![0; nodes.len()];
        Self {
            nodes,
            distribution,
        }
    }

    fn place(&mut self, index: usize) -> NodeId {
        self.distribution[index] += 1;
        self.nodes[index].clone()
    }

    fn render(&self, out: &mut String) {
        for (node, count) in self.nodes.iter().zip(&self.distribution) {
            let _ = writeln!(out, "\t{node}\t\t: {count}");
        }
    }
}

/// Validates an explicit node subset against the registered nodes, or takes them all.
fn retain_nodes(
    registered: &[NodeId],
    requested: Option<&[String]>,
) -> Result<Vec<NodeId>, PartitionError> {
    if registered.is_empty() {
        return Err(PartitionError::BadPartitionSpecification(
            "no nodes are registered".into(),
        ));
    }
    let Some(requested) = requested else {
        return Ok(registered.to_vec());
    };

    let mut retained: Vec<NodeId> = Vec::with_capacity(requested.len());
    for node in requested {
        if !registered.contains(node) {
            return Err(PartitionError::UnknownNode(node.clone()));
        }
        if retained.contains(node) {
            return Err(PartitionError::BadPartitionSpecification(format!(
                "node '{node}' is listed more than once"
            )));
        }
        retained.push(node.clone());
    }
    Ok(retained)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartitionStrategy {
    Random(RandomPartition),
    RoundRobin(RoundRobinPartition),
    Hash(HashPartition),
    Range(RangePartition),
}

impl PartitionStrategy {
    /// Builds the strategy named by `spec` over the currently registered nodes.
    pub fn build(
        spec: &PartitionSpec,
        attrs: &[Attribute],
        registered: &[NodeId],
    ) -> Result<Self, PartitionError> {
        let strategy = match spec {
            PartitionSpec::Random { count } => {
                let count = count.unwrap_or(registered.len());
                PartitionStrategy::Random(RandomPartition::new(registered, count)?)
            }
            PartitionSpec::RoundRobin { nodes } => PartitionStrategy::RoundRobin(
                RoundRobinPartition::new(registered, nodes.as_deref())?,
            ),
            PartitionSpec::Hash { attr, nodes } => PartitionStrategy::Hash(HashPartition::new(
                registered,
                attrs,
                attr,
                nodes.as_deref(),
            )?),
            PartitionSpec::Range {
                attr,
                bounds,
                nodes,
            } => PartitionStrategy::Range(RangePartition::new(
                registered,
                attrs,
                attr,
                bounds,
                nodes.as_deref(),
            )?),
        };
        debug!(kind = strategy.kind(), nodes = ?strategy.nodes(), "partition strategy built");
        Ok(strategy)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PartitionStrategy::Random(_) => "random",
            PartitionStrategy::RoundRobin(_) => "roundrobin",
            PartitionStrategy::Hash(_) => "hash",
            PartitionStrategy::Range(_) => "range",
        }
    }

    /// The retained node set.
    pub fn nodes(&self) -> &[NodeId] {
        &self.placement().nodes
    }

    /// Inserts routed to each retained node, in [`nodes`](Self::nodes) order.
    pub fn distribution(&self) -> &[u64] {
        &self.placement().distribution
    }

    fn placement(&self) -> &Placement {
        match self {
            PartitionStrategy::Random(p) => &p.placement,
            PartitionStrategy::RoundRobin(p) => &p.placement,
            PartitionStrategy::Hash(p) => &p.placement,
            PartitionStrategy::Range(p) => &p.placement,
        }
    }

    /// Nodes that must receive the physical CREATE.
    pub fn initialize(&self) -> Vec<NodeId> {
        self.nodes().to_vec()
    }

    /// `columns` is the insert's explicit column list, if it named one.
    pub fn choose_insert_node(
        &mut self,
        columns: Option<&str>,
        values: &str,
    ) -> Result<NodeId, RoutingError> {
        match self {
            PartitionStrategy::Random(p) => Ok(p.choose_insert_node()),
            PartitionStrategy::RoundRobin(p) => Ok(p.choose_insert_node()),
            PartitionStrategy::Hash(p) => p.choose_insert_node(columns, values),
            PartitionStrategy::Range(p) => p.choose_insert_node(columns, values),
        }
    }

    /// `where_clause` is the text after `where`, or empty.
    pub fn choose_select_node(&self, where_clause: &str) -> Vec<NodeId> {
        match self {
            PartitionStrategy::Random(_) | PartitionStrategy::RoundRobin(_) => self.initialize(),
            PartitionStrategy::Hash(p) => p.choose_select_node(where_clause),
            PartitionStrategy::Range(p) => p.choose_select_node(where_clause),
        }
    }

    pub fn explain(&self) -> String {
        let mut out = String::new();
        match self {
            PartitionStrategy::Random(p) => {
                let _ = writeln!(out, "\tstrategy: random ({} nodes)", p.placement.nodes.len());
            }
            PartitionStrategy::RoundRobin(p) => {
                let _ = writeln!(
                    out,
                    "\tstrategy: roundrobin, next node: {}",
                    p.placement.nodes[p.cursor]
                );
            }
            PartitionStrategy::Hash(p) => {
                let _ = writeln!(
                    out,
                    "\tstrategy: hash, attribute: {} ({})",
                    p.key.name,
                    p.key.key_type.name()
                );
            }
            PartitionStrategy::Range(p) => {
                let _ = writeln!(out, "\tstrategy: range, attribute: {}", p.key.name);
                for range in &p.ranges {
                    let _ = writeln!(out, "\t{range}");
                }
            }
        }
        self.placement().render(&mut out);
        out
    }
}

/// Inserts land on a uniformly random retained node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomPartition {
    placement: Placement,
}

impl RandomPartition {
    pub fn new(registered: &[NodeId], count: usize) -> Result<Self, PartitionError> {
        Self::with_rng(registered, count, &mut rand::thread_rng())
    }

    /// Drops `registered.len() - count` random nodes; the survivors keep their order.
    pub fn with_rng<R: Rng + ?Sized>(
        registered: &[NodeId],
        count: usize,
        rng: &mut R,
    ) -> Result<Self, PartitionError> {
        if count == 0 || count > registered.len() {
            return Err(PartitionError::BadPartitionSpecification(format!(
                "random({count}) needs between 1 and {} nodes",
                registered.len()
            )));
        }

        let mut nodes = registered.to_vec();
        while nodes.len() > count {
            nodes.remove(rng.gen_range(0..nodes.len()));
        }
        Ok(Self {
            placement: Placement::new(nodes),
        })
    }

    fn choose_insert_node(&mut self) -> NodeId {
        let index = rand::thread_rng().gen_range(0..self.placement.nodes.len());
        self.placement.place(index)
    }
}

/// Inserts cycle through the retained nodes in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRobinPartition {
    placement: Placement,
    cursor: usize,
}

impl RoundRobinPartition {
    pub fn new(
        registered: &[NodeId],
        requested: Option<&[String]>,
    ) -> Result<Self, PartitionError> {
        Ok(Self {
            placement: Placement::new(retain_nodes(registered, requested)?),
            cursor: 0,
        })
    }

    fn choose_insert_node(&mut self) -> NodeId {
        let node = self.placement.place(self.cursor);
        self.cursor = (self.cursor + 1) % self.placement.nodes.len();
        node
    }
}

/// Inserts land on `nodes[hash(key) mod n]`; equality lookups on the key hit one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPartition {
    placement: Placement,
    key: KeyColumn,
}

impl HashPartition {
    pub fn new(
        registered: &[NodeId],
        attrs: &[Attribute],
        hash_attr: &str,
        requested: Option<&[String]>,
    ) -> Result<Self, PartitionError> {
        let placement = Placement::new(retain_nodes(registered, requested)?);
        let key = KeyColumn::resolve(attrs, hash_attr)?;
        Ok(Self { placement, key })
    }

    fn index_of(&self, literal: &str) -> Result<usize, RoutingError> {
        let n = self.placement.nodes.len();
        match self.key.key_type {
            KeyType::Integer => {
                let value: i64 = literal.parse().map_err(|_| self.key.invalid(literal))?;
                Ok(value.rem_euclid(n as i64) as usize)
            }
            KeyType::Char => Ok(string_hash(literal).unsigned_abs() as usize % n),
            KeyType::Decimal => {
                let value = self.key.numeric(literal)?;
                Ok((value.rem_euclid(n as f64).trunc() as usize).min(n - 1))
            }
        }
    }

    fn choose_insert_node(
        &mut self,
        columns: Option<&str>,
        values: &str,
    ) -> Result<NodeId, RoutingError> {
        let literal = self.key.value_in(columns, values)?;
        let index = self.index_of(literal)?;
        debug!(attr = %self.key.name, value = literal, index, "hash placement");
        Ok(self.placement.place(index))
    }

    fn choose_select_node(&self, where_clause: &str) -> Vec<NodeId> {
        match self.key.point_lookup(where_clause).map(|v| self.index_of(v)) {
            Some(Ok(index)) => vec![self.placement.nodes[index].clone()],
            _ => self.placement.nodes.clone(),
        }
    }
}

/// 31-multiplier polynomial hash over UTF-16 code units with 32-bit wrapping.
///
/// Stable across processes and releases, which the persisted catalog relies on.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// A half-open interval `(min, max]` owned by one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub node: NodeId,
}

impl Range {
    pub fn contains(&self, value: f64) -> bool {
        self.min < value && value <= self.max
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |v: f64| {
            if v == f64::NEG_INFINITY {
                "min".to_string()
            } else if v == f64::INFINITY {
                "max".to_string()
            } else {
                v.to_string()
            }
        };
        write!(f, "({}, {}] -> {}", bound(self.min), bound(self.max), self.node)
    }
}

/// Inserts land on the node owning the first range that contains the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangePartition {
    placement: Placement,
    key: KeyColumn,
    ranges: Vec<Range>,
}

impl RangePartition {
    /// `bounds` `b0 < b1 < ... < bk` define the ranges `(b0,b1] ... (bk-1,bk]`,
    /// bound in order to the first `k` retained nodes.
    pub fn new(
        registered: &[NodeId],
        attrs: &[Attribute],
        range_attr: &str,
        bounds: &[f64],
        requested: Option<&[String]>,
    ) -> Result<Self, PartitionError> {
        let candidates = retain_nodes(registered, requested)?;
        let key = KeyColumn::resolve(attrs, range_attr)?;
        if key.key_type == KeyType::Char {
            return Err(PartitionError::UnsupportedAttributeType {
                attr: key.name,
                ty: "char".into(),
            });
        }

        if bounds.len() < 2 {
            return Err(PartitionError::BadPartitionSpecification(
                "range needs at least two bounds".into(),
            ));
        }
        if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(PartitionError::BadPartitionSpecification(
                "range bounds must be strictly increasing".into(),
            ));
        }
        let range_count = bounds.len() - 1;
        if range_count > candidates.len() {
            return Err(PartitionError::BadPartitionSpecification(format!(
                "{range_count} ranges but only {} nodes",
                candidates.len()
            )));
        }

        let nodes: Vec<NodeId> = candidates.into_iter().take(range_count).collect();
        let ranges = bounds
            .windows(2)
            .zip(&nodes)
            .map(|(pair, node)| Range {
                min: pair[0],
                max: pair[1],
                node: node.clone(),
            })
            .collect();

        Ok(Self {
            placement: Placement::new(nodes),
            key,
            ranges,
        })
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Index of the node owning `value`.
    ///
    /// A value outside every range falls back to the first node, with a warning.
    fn index_of(&self, value: f64) -> usize {
        match self.ranges.iter().position(|range| range.contains(value)) {
            Some(index) => index,
            None => {
                warn!(
                    attr = %self.key.name,
                    value,
                    fallback = %self.placement.nodes[0],
                    "value outside every declared range, routing to first node"
                );
                0
            }
        }
    }

    fn choose_insert_node(
        &mut self,
        columns: Option<&str>,
        values: &str,
    ) -> Result<NodeId, RoutingError> {
        let literal = self.key.value_in(columns, values)?;
        let value = self.key.numeric(literal)?;
        let index = self.index_of(value);
        Ok(self.placement.place(index))
    }

    fn choose_select_node(&self, where_clause: &str) -> Vec<NodeId> {
        match self
            .key
            .point_lookup(where_clause)
            .map(|literal| self.key.numeric(literal))
        {
            Some(Ok(value)) => vec![self.placement.nodes[self.index_of(value)].clone()],
            _ => self.placement.nodes.clone(),
        }
    }
}
