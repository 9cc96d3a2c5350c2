#![forbid(unsafe_code)]

//! Dependency-free core of the experiment-log store: the table registry,
//! record/value types, and the query-expression compiler. Everything here
//! is pure; execution lives in `ldb_storage`.

mod error;
pub mod query;
pub mod record;
pub mod schema;

pub use error::QueryError;
pub use query::{BinOp, Const, Expr, Projection, Select, build_select, compile_expr};
pub use record::{Record, Template, Value};
pub use schema::{Table, link_between};
