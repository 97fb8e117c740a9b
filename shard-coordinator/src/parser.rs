//! Statement parsing for the restricted grammar the coordinator understands.
//!
//! Four statement kinds are recognized by their leading keyword,
//! case-insensitively and ignoring leading whitespace:
//!
//! - `create table <name>(<attrs>) partition by <spec>`
//! - `insert into <table> [(<cols>)] values (<v0,v1,...>)`
//! - `select <attrs> from <table> [<rest>]`
//! - `drop table <table>`
//!
//! The partition spec of a CREATE is kept as text here. The catalog turns it
//! into a [`PartitionSpec`] after checking that the table does not exist yet.
//!
//! The `*_fragment` extractors run on the raw client text and return an empty
//! string when they do not apply. The coordinator uses them to describe a
//! SELECT to the result materializer.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, PartitionError};

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("statement pattern must compile")
}

static SELECT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^\s*select\b"));
static INSERT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^\s*insert\b"));
static CREATE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^\s*create\b"));
static DROP_KEYWORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^\s*drop\s+table\b"));

static CREATE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?is)^\s*create\s+table\s+(\w+)\s*\((.*)\)\s*partition\s+by\s+(.+?)\s*$")
});
static INSERT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?is)^\s*insert\s+into\s+(\w+)\s*(?:\(([^)]*)\))?\s*values\s*\((.*)\)\s*$")
});
static SELECT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)^\s*select\s+(.+?)\s+from\s+(\w+)(?:\s+(.*?))?\s*$"));
static DROP: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^\s*drop\s+table\s+(\w+)\s*$"));
static WHERE_REST: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)^where\s+(.*?)\s*$"));

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)^(\w+)\s+(\w+)(?:\s*\(\s*([^)]*?)\s*\))?(?:\s+.*)?$"));

static RANDOM: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)^random(?:\s*\(\s*([^)]*?)\s*\))?$"));
static ROUND_ROBIN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)^roundrobin(?:\s*\(([^)]*)\))?$"));
static HASH: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?is)^hash\s*\(\s*(\w+)\s*\)(?:\s+partitions\s*\(([^)]*)\))?$")
});
static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?is)^range\s*\(\s*(\w+)\s*\)",
        r"(?:\s+bounds\s*\(([^)]*)\))?",
        r"(?:\s+partitions\s*\(([^)]*)\))?$",
    ))
});

static SELECT_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)^\s*select\s+(.*?)\s+from\b"));
static TABLE_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?is)^\s*(?:select\s.*?\sfrom|create\s+table|insert\s+into|drop\s+table)\s+(\w+)")
});
static WHERE_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)^\s*select\s.*?\sfrom\s.*?\swhere\s+(.*?)\s*$"));

static EQUALITY: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"(?s)^\s*(\w+)\s*=\s*('[^']*'|"[^"]*"|[^\s'"=]+)\s*$"#)
});

/// One declared column of a CREATE statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    /// Declared type, lower-cased.
    pub data_type: String,
    pub size: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Create {
        table: String,
        /// Attribute list exactly as written, used for the physical CREATE.
        attrs_text: String,
        attrs: Vec<Attribute>,
        partition: String,
    },
    Insert {
        table: String,
        columns: Option<String>,
        values: String,
    },
    Select {
        attrs: String,
        table: String,
        /// Everything after the table name (where, order by, limit...).
        rest: String,
        where_clause: Option<String>,
    },
    Drop {
        table: String,
    },
}

/// Parses one client statement. A trailing `;` is ignored.
pub fn parse_statement(text: &str) -> Result<Statement, ParseError> {
    let text = strip_terminator(text);

    if SELECT_KEYWORD.is_match(text) {
        parse_select(text)
    } else if INSERT_KEYWORD.is_match(text) {
        parse_insert(text)
    } else if CREATE_KEYWORD.is_match(text) {
        parse_create(text)
    } else if DROP_KEYWORD.is_match(text) {
        parse_drop(text)
    } else {
        Err(ParseError::UnsupportedStatement(text.trim().to_string()))
    }
}

fn strip_terminator(text: &str) -> &str {
    text.trim_end().trim_end_matches(';').trim_end()
}

fn parse_create(text: &str) -> Result<Statement, ParseError> {
    let caps = CREATE
        .captures(text)
        .ok_or(ParseError::MalformedStatement {
            expected: "create table <name>(<attrs>) partition by <spec>",
        })?;

    let attrs_text = caps[2].trim().to_string();
    let attrs = parse_attributes(&attrs_text)?;

    Ok(Statement::Create {
        table: caps[1].to_string(),
        attrs_text,
        attrs,
        partition: caps[3].trim().to_string(),
    })
}

fn parse_attributes(text: &str) -> Result<Vec<Attribute>, ParseError> {
    split_list(text)
        .into_iter()
        .map(|decl| {
            let caps = ATTRIBUTE
                .captures(decl)
                .ok_or_else(|| ParseError::BadAttributeDeclaration(decl.to_string()))?;
            Ok(Attribute {
                name: caps[1].to_string(),
                data_type: caps[2].to_ascii_lowercase(),
                size: caps.get(3).map(|m| m.as_str().to_string()),
            })
        })
        .collect()
}

fn parse_insert(text: &str) -> Result<Statement, ParseError> {
    let caps = INSERT
        .captures(text)
        .ok_or(ParseError::MalformedStatement {
            expected: "insert into <table> [(<cols>)] values (<v0,v1,...>)",
        })?;

    let values = caps[3].trim().to_string();
    if contains_unquoted(&values, '(') {
        return Err(ParseError::MultipleRowsUnsupported);
    }

    Ok(Statement::Insert {
        table: caps[1].to_string(),
        columns: caps.get(2).map(|m| m.as_str().trim().to_string()),
        values,
    })
}

fn parse_select(text: &str) -> Result<Statement, ParseError> {
    let caps = SELECT
        .captures(text)
        .ok_or(ParseError::MalformedStatement {
            expected: "select <attrs> from <table> [<rest>]",
        })?;

    let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
    let where_clause = WHERE_REST
        .captures(rest)
        .map(|w| w[1].to_string())
        .filter(|w| !w.is_empty());

    Ok(Statement::Select {
        attrs: caps[1].trim().to_string(),
        table: caps[2].to_string(),
        rest: rest.to_string(),
        where_clause,
    })
}

fn parse_drop(text: &str) -> Result<Statement, ParseError> {
    let caps = DROP.captures(text).ok_or(ParseError::MalformedStatement {
        expected: "drop table <table>",
    })?;
    Ok(Statement::Drop {
        table: caps[1].to_string(),
    })
}

/// Parsed `partition by` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionSpec {
    Random {
        count: Option<usize>,
    },
    RoundRobin {
        nodes: Option<Vec<String>>,
    },
    Hash {
        attr: String,
        nodes: Option<Vec<String>>,
    },
    Range {
        attr: String,
        bounds: Vec<f64>,
        nodes: Option<Vec<String>>,
    },
}

impl PartitionSpec {
    pub fn parse(text: &str) -> Result<Self, PartitionError> {
        let text = text.trim();

        if let Some(caps) = RANDOM.captures(text) {
            let count = caps
                .get(1)
                .map(|m| {
                    m.as_str().parse::<usize>().map_err(|_| {
                        PartitionError::BadPartitionSpecification(format!(
                            "random expects a node count, got '{}'",
                            m.as_str()
                        ))
                    })
                })
                .transpose()?;
            return Ok(PartitionSpec::Random { count });
        }

        if let Some(caps) = ROUND_ROBIN.captures(text) {
            let nodes = caps.get(1).map(|m| parse_node_list(m.as_str())).transpose()?;
            return Ok(PartitionSpec::RoundRobin { nodes });
        }

        if let Some(caps) = HASH.captures(text) {
            let nodes = caps.get(2).map(|m| parse_node_list(m.as_str())).transpose()?;
            return Ok(PartitionSpec::Hash {
                attr: caps[1].to_string(),
                nodes,
            });
        }

        if let Some(caps) = RANGE.captures(text) {
            let bounds = caps.get(2).ok_or_else(|| {
                PartitionError::BadPartitionSpecification(
                    "range requires a bound list: range(<attr>) bounds (<b0>,<b1>,...)".into(),
                )
            })?;
            let nodes = caps.get(3).map(|m| parse_node_list(m.as_str())).transpose()?;
            return Ok(PartitionSpec::Range {
                attr: caps[1].to_string(),
                bounds: parse_bounds(bounds.as_str())?,
                nodes,
            });
        }

        Err(PartitionError::UnsupportedPartitionType(text.to_string()))
    }
}

fn parse_node_list(text: &str) -> Result<Vec<String>, PartitionError> {
    let nodes: Vec<String> = text
        .split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(str::to_string)
        .collect();
    if nodes.is_empty() {
        return Err(PartitionError::BadPartitionSpecification(
            "explicit node list is empty".into(),
        ));
    }
    Ok(nodes)
}

fn parse_bounds(text: &str) -> Result<Vec<f64>, PartitionError> {
    text.split(',')
        .map(str::trim)
        .map(|bound| match bound.to_ascii_lowercase().as_str() {
            "min" | "-inf" => Ok(f64::NEG_INFINITY),
            "max" | "inf" | "+inf" => Ok(f64::INFINITY),
            other => other.parse::<f64>().ok().filter(|v| v.is_finite()).ok_or_else(|| {
                PartitionError::BadPartitionSpecification(format!("invalid range bound '{bound}'"))
            }),
        })
        .collect()
}

/// Text between `select` and `from`, or `""` if `text` is not a select.
pub fn select_fragment(text: &str) -> String {
    SELECT_FRAGMENT
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default()
}

/// Table name of any supported statement, or `""`.
pub fn table_fragment(text: &str) -> String {
    TABLE_FRAGMENT
        .captures(text)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

/// Everything after `where` in a select, or `""`.
pub fn where_fragment(text: &str) -> String {
    WHERE_FRAGMENT
        .captures(strip_terminator(text))
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default()
}

/// Splits a comma separated list, ignoring commas inside parentheses or quotes.
pub(crate) fn split_list(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                items.push(text[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() || !items.is_empty() {
        items.push(last);
    }
    items
}

fn contains_unquoted(text: &str, needle: char) -> bool {
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, c) if c == needle => return true,
            _ => {}
        }
    }
    false
}

/// Trims a literal and strips one pair of matching surrounding quotes.
pub(crate) fn unquote(literal: &str) -> &str {
    let literal = literal.trim();
    for q in ['\'', '"'] {
        if literal.len() >= 2 && literal.starts_with(q) && literal.ends_with(q) {
            return &literal[1..literal.len() - 1];
        }
    }
    literal
}

/// Recognizes a where-clause that is exactly one `<attr> = <literal>` test.
pub(crate) fn equality_predicate(where_clause: &str) -> Option<(&str, &str)> {
    let caps = EQUALITY.captures(where_clause)?;
    let attr = caps.get(1)?.as_str();
    let literal = caps.get(2)?.as_str();
    Some((attr, unquote(literal)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_keywords_case_insensitively() {
        assert!(matches!(
            parse_statement("  SeLeCt * FROM t"),
            Ok(Statement::Select { .. })
        ));
        assert!(matches!(
            parse_statement("INSERT into t values (1)"),
            Ok(Statement::Insert { .. })
        ));
        assert!(matches!(
            parse_statement("Drop Table t;"),
            Ok(Statement::Drop { table }) if table == "t"
        ));
    }

    #[test]
    fn rejects_unsupported_statements() {
        assert_eq!(
            parse_statement("update t set i = 1"),
            Err(ParseError::UnsupportedStatement("update t set i = 1".into()))
        );
        assert!(matches!(
            parse_statement("drop index foo"),
            Err(ParseError::UnsupportedStatement(_))
        ));
    }

    #[test]
    fn parses_create_with_sized_attributes() {
        let stmt = parse_statement(concat!(
            "create table people(id integer, name char(20), price decimal(10,2)) ",
            "partition by hash(id) partitions (n0,n1)",
        ))
        .expect("valid create");

        let Statement::Create {
            table,
            attrs_text,
            attrs,
            partition,
        } = stmt
        else {
            panic!("expected create");
        };
        assert_eq!(table, "people");
        assert_eq!(attrs_text, "id integer, name char(20), price decimal(10,2)");
        assert_eq!(partition, "hash(id) partitions (n0,n1)");
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[1].name, "name");
        assert_eq!(attrs[1].data_type, "char");
        assert_eq!(attrs[1].size.as_deref(), Some("20"));
        assert_eq!(attrs[2].size.as_deref(), Some("10,2"));
    }

    #[test]
    fn create_without_partition_clause_is_malformed() {
        assert!(matches!(
            parse_statement("create table t(i integer)"),
            Err(ParseError::MalformedStatement { .. })
        ));
        assert!(matches!(
            parse_statement("create table t(i) partition by random"),
            Err(ParseError::BadAttributeDeclaration(decl)) if decl == "i"
        ));
    }

    #[test]
    fn insert_extracts_values_and_rejects_multiple_rows() {
        let stmt = parse_statement("insert into t values (4, 'x')").expect("valid insert");
        assert_eq!(
            stmt,
            Statement::Insert {
                table: "t".into(),
                columns: None,
                values: "4, 'x'".into(),
            }
        );

        assert_eq!(
            parse_statement("insert into t values ((1, 2), (3, 4))"),
            Err(ParseError::MultipleRowsUnsupported)
        );
        // parentheses inside a quoted literal are data, not a second row
        assert!(parse_statement("insert into t values (1, 'a (b)')").is_ok());
    }

    #[test]
    fn select_splits_table_and_where() {
        let stmt = parse_statement("select i, u from t where i = 4").expect("valid select");
        assert_eq!(
            stmt,
            Statement::Select {
                attrs: "i, u".into(),
                table: "t".into(),
                rest: "where i = 4".into(),
                where_clause: Some("i = 4".into()),
            }
        );

        let stmt = parse_statement("select * from t order by i").expect("valid select");
        assert!(matches!(stmt, Statement::Select { where_clause: None, .. }));
    }

    #[test]
    fn partition_specs_parse() {
        assert_eq!(
            PartitionSpec::parse("random"),
            Ok(PartitionSpec::Random { count: None })
        );
        assert_eq!(
            PartitionSpec::parse("RANDOM(2)"),
            Ok(PartitionSpec::Random { count: Some(2) })
        );
        assert_eq!(
            PartitionSpec::parse("roundrobin(n0, n2)"),
            Ok(PartitionSpec::RoundRobin {
                nodes: Some(vec!["n0".into(), "n2".into()])
            })
        );
        assert_eq!(
            PartitionSpec::parse("hash(i) PARTITIONS (n0,n1)"),
            Ok(PartitionSpec::Hash {
                attr: "i".into(),
                nodes: Some(vec!["n0".into(), "n1".into()])
            })
        );
        assert_eq!(
            PartitionSpec::parse("range(i) bounds (0, 10, max)"),
            Ok(PartitionSpec::Range {
                attr: "i".into(),
                bounds: vec![0.0, 10.0, f64::INFINITY],
                nodes: None
            })
        );
    }

    #[test]
    fn bad_partition_specs_are_typed() {
        assert!(matches!(
            PartitionSpec::parse("list(i)"),
            Err(PartitionError::UnsupportedPartitionType(_))
        ));
        assert!(matches!(
            PartitionSpec::parse("range(i)"),
            Err(PartitionError::BadPartitionSpecification(_))
        ));
        assert!(matches!(
            PartitionSpec::parse("random(lots)"),
            Err(PartitionError::BadPartitionSpecification(_))
        ));
    }

    #[test]
    fn fragments_describe_selects_only() {
        let q = "select id, name from test where id > 10 and name = 'dale'";
        assert_eq!(select_fragment(q), "id, name");
        assert_eq!(table_fragment(q), "test");
        assert_eq!(where_fragment(q), "id > 10 and name = 'dale'");

        assert_eq!(select_fragment("insert into test values (1)"), "");
        assert_eq!(table_fragment("insert into test values (1)"), "test");
        assert_eq!(table_fragment("create table test(i integer) partition by random"), "test");
        assert_eq!(where_fragment("select * from test"), "");
    }

    #[test]
    fn equality_predicate_requires_single_comparison() {
        assert_eq!(equality_predicate("i = 4"), Some(("i", "4")));
        assert_eq!(equality_predicate(" u='x' "), Some(("u", "x")));
        assert_eq!(equality_predicate("i > 4"), None);
        assert_eq!(equality_predicate("i = 4 and u = 'x'"), None);
    }

    #[test]
    fn split_list_respects_nesting_and_quotes() {
        assert_eq!(split_list("1, 'a,b', (2,3)"), vec!["1", "'a,b'", "(2,3)"]);
        assert!(split_list("").is_empty());
    }
}
