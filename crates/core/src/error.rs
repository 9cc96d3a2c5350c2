#![forbid(unsafe_code)]

/// Errors raised by the schema registry and the query compiler.
///
/// These are all programming or input-shape errors; none of them is
/// transient, and all of them fire before any SQL statement executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryError {
    UnknownTable(String),
    UnknownField {
        table: &'static str,
        field: String,
    },
    NoLink {
        from: &'static str,
        to: &'static str,
    },
    NoIdColumn(&'static str),
    ForwardReference {
        position: usize,
        reference: usize,
    },
    RefPositionOutOfRange {
        position: usize,
    },
    UnsupportedConstant,
    FieldCount {
        table: &'static str,
        expected: usize,
        got: usize,
    },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTable(name) => write!(f, "unknown table: {name}"),
            Self::UnknownField { table, field } => {
                write!(f, "unknown field {field} on table {table}")
            }
            Self::NoLink { from, to } => {
                write!(f, "no declared link between {from} and {to}")
            }
            Self::NoIdColumn(table) => write!(f, "table {table} has no id column"),
            Self::ForwardReference {
                position,
                reference,
            } => write!(
                f,
                "join at position {position} references position {reference}, which is not strictly earlier"
            ),
            Self::RefPositionOutOfRange { position } => {
                write!(f, "reference to join position {position} outside the chain")
            }
            Self::UnsupportedConstant => {
                write!(f, "constants must be null, integer, string, or a flat list of such")
            }
            Self::FieldCount {
                table,
                expected,
                got,
            } => write!(
                f,
                "wrong field count for {table} (expected={expected}, got={got})"
            ),
        }
    }
}

impl std::error::Error for QueryError {}
