//! `!`-prefixed session commands answered by the coordinator itself.

/// Result of parsing a meta-command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Help,
    Syntax,
    Nodes,
    Partitions,
    /// `!cmd` with no arguments yields `node: None`.
    Cmd { node: Option<String>, message: String },
    /// `None` when the argument is neither `on` nor `off`.
    Parallel(Option<bool>),
    Timing(Option<bool>),
    Exit,
    Unknown(String),
}

/// Try to parse a line as a meta-command. Returns None if it's not one.
pub fn parse_meta(line: &str) -> Option<MetaCommand> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix('!')?;
    let (cmd, arg) = rest
        .split_once(char::is_whitespace)
        .map(|(c, a)| (c, a.trim()))
        .unwrap_or((rest, ""));

    Some(match cmd.to_ascii_lowercase().as_str() {
        "help" => MetaCommand::Help,
        "syntax" => MetaCommand::Syntax,
        "nodes" => MetaCommand::Nodes,
        "partitions" => MetaCommand::Partitions,
        "cmd" => {
            let (node, message) = arg
                .split_once(char::is_whitespace)
                .map(|(n, m)| (n, m.trim()))
                .unwrap_or((arg, ""));
            MetaCommand::Cmd {
                node: (!node.is_empty()).then(|| node.to_string()),
                message: message.to_string(),
            }
        }
        "parallel" => MetaCommand::Parallel(toggle(arg)),
        "timing" => MetaCommand::Timing(toggle(arg)),
        "exit" | "quit" => MetaCommand::Exit,
        _ => MetaCommand::Unknown(trimmed.to_string()),
    })
}

fn toggle(arg: &str) -> Option<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub const TOGGLE_USAGE: &str = "Valid args: on|off";
pub const CMD_USAGE: &str = "Syntax: !cmd <node> <msg>";

pub const HELP: &str = "\
========== HELP ==========
!nodes             : list the registered nodes
!cmd <node> <msg>  : send a command directly to <node>
!syntax            : print the supported syntax for partition types
!partitions        : print the partition data
!parallel <on|off> : send substatements to nodes in parallel or one at a time
!timing <on|off>   : report the time taken by each statement in seconds
!exit              : exit and kill the application";

pub const SYNTAX: &str = "\
Supported syntax for partition types:
- All partition syntax relates to 'create' statements
- Explanations below are shown in the form: 'create table t(<attrs>) PARTITION BY <spec>'

RANDOM:
\tPARTITION BY RANDOM
\tPARTITION BY RANDOM(X)
\t  Description: values are inserted into randomly chosen nodes of the cluster
\t  Arguments:
\t    '(X)' : optional integer, pick a random subset of X nodes for this table
ROUNDROBIN:
\tPARTITION BY ROUNDROBIN
\tPARTITION BY ROUNDROBIN(X0,X1,...)
\t  Description: values are inserted into the nodes in turn
\t  Arguments:
\t    '(X0,X1,...)' : optional, the nodes to use for the table; all nodes if omitted
HASH:
\tPARTITION BY HASH(A)
\tPARTITION BY HASH(A) PARTITIONS (X0,X1,...)
\t  Description: values are placed by hashing attribute A, which must be an
\t               integer, char or decimal type (or one of their aliases)
\t  Arguments:
\t    '(X0,X1,...)' : optional, the nodes to hash over; all nodes if omitted
RANGE:
\tPARTITION BY RANGE(A) BOUNDS (B0,B1,...,Bk)
\tPARTITION BY RANGE(A) BOUNDS (B0,B1,...,Bk) PARTITIONS (X0,X1,...)
\t  Description: value v of numeric attribute A goes to the node owning the
\t               first range (Bi-1, Bi] that contains it; values outside every
\t               range go to the first node
\t  Arguments:
\t    'BOUNDS' : strictly increasing numbers, 'min' and 'max' for open ends
\t    '(X0,X1,...)' : optional, the nodes to bind ranges to, in order";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_statements_are_not_meta() {
        assert_eq!(parse_meta("select * from t"), None);
        assert_eq!(parse_meta("  create table t(i integer) partition by random"), None);
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse_meta("!help"), Some(MetaCommand::Help));
        assert_eq!(parse_meta("  !NODES "), Some(MetaCommand::Nodes));
        assert_eq!(parse_meta("!syntax"), Some(MetaCommand::Syntax));
        assert_eq!(parse_meta("!partitions"), Some(MetaCommand::Partitions));
        assert_eq!(parse_meta("!exit"), Some(MetaCommand::Exit));
        assert_eq!(
            parse_meta("!bogus thing"),
            Some(MetaCommand::Unknown("!bogus thing".into()))
        );
    }

    #[test]
    fn toggles() {
        assert_eq!(parse_meta("!parallel off"), Some(MetaCommand::Parallel(Some(false))));
        assert_eq!(parse_meta("!parallel ON"), Some(MetaCommand::Parallel(Some(true))));
        assert_eq!(parse_meta("!timing on"), Some(MetaCommand::Timing(Some(true))));
        assert_eq!(parse_meta("!timing"), Some(MetaCommand::Timing(None)));
        assert_eq!(parse_meta("!timing maybe"), Some(MetaCommand::Timing(None)));
    }

    #[test]
    fn cmd_arguments() {
        assert_eq!(
            parse_meta("!cmd n0 select count(*) from t"),
            Some(MetaCommand::Cmd {
                node: Some("n0".into()),
                message: "select count(*) from t".into(),
            })
        );
        assert_eq!(
            parse_meta("!cmd"),
            Some(MetaCommand::Cmd {
                node: None,
                message: String::new(),
            })
        );
    }
}
