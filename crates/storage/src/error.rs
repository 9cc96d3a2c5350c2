#![forbid(unsafe_code)]

use ldb_core::QueryError;

/// Errors surfaced by the store. None of these is transient; retry policy
/// belongs to the collaborators wrapping the store, never to the core.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    /// The backing file exists but its version row is absent or wrong.
    /// Fatal at open; the store never attempts migration.
    SchemaVersionMismatch(String),
    /// The engine cannot enforce foreign keys; the data model depends on it.
    IntegrityUnsupported,
    /// The caller tried to force a surrogate id on insert.
    ForcedId(&'static str),
    /// Uniqueness, foreign-key or not-null violation at insert time.
    InsertFailed(rusqlite::Error),
    /// A dedup insert matched more than one existing row.
    AmbiguousMatch {
        table: &'static str,
        matches: usize,
    },
    NoSuchRow,
    AmbiguousRow,
    /// A mutating call on a read-only session, or an unrestricted raw call
    /// where mutation is possible.
    ReadOnlyViolation(&'static str),
    NotMetaShaped(&'static str),
    KindRequired,
    ValueNotText,
    /// A count query did not come back as exactly one scalar row.
    CountNotScalar,
    InvalidInput(&'static str),
    Query(QueryError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::SchemaVersionMismatch(detail) => {
                write!(f, "schema version mismatch: {detail}")
            }
            Self::IntegrityUnsupported => {
                write!(f, "foreign key constraints are not supported by the engine")
            }
            Self::ForcedId(table) => {
                write!(f, "the id cannot be forced on rows of table {table}")
            }
            Self::InsertFailed(err) => write!(f, "insertion failed: {err}"),
            Self::AmbiguousMatch { table, matches } => write!(
                f,
                "dedup match on {table} found {matches} rows where at most one was expected"
            ),
            Self::NoSuchRow => write!(f, "no row matches the append target"),
            Self::AmbiguousRow => write!(f, "append target matches more than one row"),
            Self::ReadOnlyViolation(op) => {
                write!(f, "operation not permitted on this session: {op}")
            }
            Self::NotMetaShaped(table) => {
                write!(f, "table {table} has no (kind, name, value) attribute group")
            }
            Self::KindRequired => write!(f, "append requires the kind field to be set"),
            Self::ValueNotText => {
                write!(f, "append requires text values on both sides")
            }
            Self::CountNotScalar => {
                write!(f, "count query did not produce exactly one scalar row")
            }
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Query(err) => write!(f, "query: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<QueryError> for StoreError {
    fn from(value: QueryError) -> Self {
        Self::Query(value)
    }
}
