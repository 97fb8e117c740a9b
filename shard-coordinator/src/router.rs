//! Turns one client statement into the per-node statements that implement it.

use tracing::debug;

use crate::catalog::Catalog;
use crate::error::QueryError;
use crate::parser::{Statement, parse_statement};
use crate::partition::NodeId;

/// One physical statement bound for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substatement {
    pub node: NodeId,
    pub text: String,
}

/// Fan-out for a single logical statement, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub table: String,
    pub substatements: Vec<Substatement>,
}

impl QueryPlan {
    fn fan_out(table: &str, nodes: Vec<NodeId>, text: &str) -> Self {
        Self {
            table: table.to_string(),
            substatements: nodes
                .into_iter()
                .map(|node| Substatement {
                    node,
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.substatements.iter().map(|s| s.node.as_str())
    }
}

/// Parses `text` and decides where it runs, updating the catalog for CREATE,
/// DROP and INSERT. `nodes` is the live node set new tables are placed over.
pub fn route(catalog: &mut Catalog, nodes: &[NodeId], text: &str) -> Result<QueryPlan, QueryError> {
    let statement = parse_statement(text)?;
    let original = text.trim();

    let plan = match statement {
        Statement::Create {
            table,
            attrs_text,
            attrs,
            partition,
        } => {
            let targets = catalog.create(&table, attrs, &partition, nodes)?;
            let physical = format!("create table {table}({attrs_text})");
            QueryPlan::fan_out(&table, targets, &physical)
        }
        Statement::Insert {
            table,
            columns,
            values,
        } => {
            let node = catalog.route_insert(&table, columns.as_deref(), &values)?;
            QueryPlan::fan_out(&table, vec![node], original)
        }
        Statement::Select {
            attrs,
            table,
            rest,
            where_clause,
        } => {
            let where_clause = where_clause.as_deref().unwrap_or_default();
            let targets = catalog.route_select(&table, where_clause)?;
            let physical = if rest.is_empty() {
                format!("select {attrs} from {table}")
            } else {
                format!("select {attrs} from {table} {rest}")
            };
            QueryPlan::fan_out(&table, targets, &physical)
        }
        Statement::Drop { table } => {
            let targets = catalog.drop(&table)?;
            QueryPlan::fan_out(&table, targets, original)
        }
    };

    debug!(table = %plan.table, nodes = ?plan.nodes().collect::<Vec<_>>(), "statement routed");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CatalogError, ParseError, RoutingError};

    fn nodes() -> Vec<NodeId> {
        vec!["n0".into(), "n1".into()]
    }

    fn targets(plan: &QueryPlan) -> Vec<&str> {
        plan.nodes().collect()
    }

    #[test]
    fn hash_table_end_to_end_plan() {
        let mut catalog = Catalog::in_memory();

        let create = route(
            &mut catalog,
            &nodes(),
            "create table t(i integer,u char) partition by hash(i) partitions (n0,n1)",
        )
        .expect("create");
        assert_eq!(targets(&create), vec!["n0", "n1"]);
        assert!(create
            .substatements
            .iter()
            .all(|s| s.text == "create table t(i integer,u char)"));

        let insert = route(&mut catalog, &nodes(), "insert into t values (4,'x')").expect("insert");
        assert_eq!(
            insert.substatements,
            vec![Substatement {
                node: "n0".into(),
                text: "insert into t values (4,'x')".into(),
            }]
        );

        let select = route(&mut catalog, &nodes(), "select * from t where i = 4").expect("select");
        assert_eq!(
            select.substatements,
            vec![Substatement {
                node: "n0".into(),
                text: "select * from t where i = 4".into(),
            }]
        );

        let scan = route(&mut catalog, &nodes(), "SELECT i FROM t;").expect("scan");
        assert_eq!(targets(&scan), vec!["n0", "n1"]);
        assert_eq!(scan.substatements[0].text, "select i from t");

        let drop = route(&mut catalog, &nodes(), "drop table t").expect("drop");
        assert_eq!(targets(&drop), vec!["n0", "n1"]);
        assert!(!catalog.contains("t"));
    }

    #[test]
    fn column_list_decides_which_value_is_the_key() {
        let mut catalog = Catalog::in_memory();
        route(
            &mut catalog,
            &nodes(),
            "create table t(a integer, b integer) partition by hash(b)",
        )
        .expect("create");

        let insert = route(&mut catalog, &nodes(), "insert into t (b, a) values (4, 1)")
            .expect("insert");
        let lookup = route(&mut catalog, &nodes(), "select * from t where b = 4").expect("select");
        assert_eq!(targets(&insert), vec!["n0"]);
        assert_eq!(targets(&insert), targets(&lookup));
        assert_eq!(insert.substatements[0].text, "insert into t (b, a) values (4, 1)");

        let err = route(&mut catalog, &nodes(), "insert into t (a) values (1)")
            .expect_err("key column missing");
        assert!(matches!(
            err,
            QueryError::Routing(RoutingError::MissingColumn(ref attr)) if attr == "b"
        ));
    }

    #[test]
    fn failures_leave_the_catalog_untouched() {
        let mut catalog = Catalog::in_memory();

        let err = route(&mut catalog, &nodes(), "insert into t values (1)").expect_err("no table");
        assert!(matches!(err, QueryError::Catalog(CatalogError::UnknownTable(_))));
        assert_eq!(
            err.client_line(),
            "ERROR: UnknownTable: table 't' does not exist"
        );

        let err = route(&mut catalog, &nodes(), "update t set i = 1").expect_err("unsupported");
        assert!(matches!(err, QueryError::Parse(ParseError::UnsupportedStatement(_))));

        let err = route(
            &mut catalog,
            &nodes(),
            "create table t(i integer) partition by hash(j)",
        )
        .expect_err("unknown attribute");
        assert!(matches!(err, QueryError::Partition(_)));
        assert!(catalog.is_empty());
    }
}
