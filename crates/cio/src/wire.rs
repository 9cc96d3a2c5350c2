#![forbid(unsafe_code)]

use ldb_core::{BinOp, Const, Expr, QueryError, Record, Select, Table, Template, Value};
use ldb_storage::{SqlValue, StoreError};
use serde::Deserialize;
use serde_json::{Map, Value as Json, json};

/// Boundary error: either the request shape is wrong, or the store refused
/// the operation. Both are answered as structured JSON, never as a crash.
#[derive(Debug)]
pub(crate) enum CioError {
    BadRequest(String),
    Store(StoreError),
}

impl std::fmt::Display for CioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CioError::BadRequest(detail) => write!(f, "bad request: {detail}"),
            CioError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl From<StoreError> for CioError {
    fn from(err: StoreError) -> Self {
        CioError::Store(err)
    }
}

impl From<QueryError> for CioError {
    fn from(err: QueryError) -> Self {
        CioError::Store(StoreError::Query(err))
    }
}

pub(crate) fn bad(detail: impl Into<String>) -> CioError {
    CioError::BadRequest(detail.into())
}

// ── Request shapes ──────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct CreateRequest {
    pub table: String,
    #[serde(default)]
    pub values: Map<String, Json>,
    #[serde(default)]
    pub id_only: bool,
    #[serde(default)]
    pub match_existing: bool,
}

#[derive(Deserialize)]
pub(crate) struct AppendRequest {
    pub table: String,
    #[serde(default)]
    pub values: Map<String, Json>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
pub(crate) enum QueryRequest {
    #[serde(rename = "match_simple")]
    MatchSimple {
        table: String,
        #[serde(default)]
        values: Map<String, Json>,
        #[serde(default)]
        id_only: bool,
        #[serde(default)]
        count_only: bool,
    },
    #[serde(rename = "join_based")]
    JoinBased {
        table: String,
        #[serde(default)]
        joins: Vec<(String, usize)>,
        #[serde(default, rename = "where")]
        where_expr: Option<Json>,
        #[serde(default)]
        order_by: Vec<(usize, String, bool)>,
        #[serde(default)]
        id_only: bool,
        #[serde(default)]
        count_only: bool,
    },
    #[serde(rename = "sql")]
    Sql { sql: String },
}

pub(crate) fn parse_request<T: serde::de::DeserializeOwned>(payload: &Json) -> Result<T, CioError> {
    serde_json::from_value(payload.clone()).map_err(|err| bad(err.to_string()))
}

// ── JSON → domain ───────────────────────────────────────────────────────

/// Build a [`Template`] from a table name and a field→value object.
/// JSON `null` means "leave the field unset".
pub(crate) fn template_from_parts(
    table: &str,
    values: &Map<String, Json>,
) -> Result<Template, CioError> {
    let table = Table::from_name(table)?;
    let mut template = Template::empty(table);
    for (field, value) in values {
        if value.is_null() {
            continue;
        }
        template.set(field, value_from_json(field, value)?)?;
    }
    Ok(template)
}

fn value_from_json(field: &str, value: &Json) -> Result<Value, CioError> {
    match value {
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| bad(format!("field {field} must be an integer, not a float"))),
        Json::String(s) => Ok(Value::Text(s.clone())),
        _ => Err(bad(format!("field {field} must be an integer or a string"))),
    }
}

pub(crate) fn select_from_parts(
    table: &str,
    joins: &[(String, usize)],
    where_expr: Option<&Json>,
    order_by: &[(usize, String, bool)],
) -> Result<Select, CioError> {
    let mut select = Select::from_root(Table::from_name(table)?);
    for (join_table, back) in joins {
        select.joins.push((Table::from_name(join_table)?, *back));
    }
    select.filter = where_expr.map(expr_from_json).transpose()?;
    select.order_by = order_by.to_vec();
    Ok(select)
}

pub(crate) fn expr_from_json(value: &Json) -> Result<Expr, CioError> {
    let obj = value
        .as_object()
        .ok_or_else(|| bad("expression must be a JSON object"))?;

    if let Some(sub) = obj.get("not") {
        return Ok(Expr::not(expr_from_json(sub)?));
    }
    if let Some(op) = obj.get("op") {
        let op = match op.as_str() {
            Some("EQ") => BinOp::Eq,
            Some("LIKE") => BinOp::Like,
            Some("IN") => BinOp::In,
            Some("AND") => BinOp::And,
            Some("OR") => BinOp::Or,
            _ => return Err(bad(format!("unknown operator {op}"))),
        };
        let lhs = obj.get("arg1").ok_or_else(|| bad("operator needs arg1"))?;
        let rhs = obj.get("arg2").ok_or_else(|| bad("operator needs arg2"))?;
        return Ok(Expr::bin(op, expr_from_json(lhs)?, expr_from_json(rhs)?));
    }
    if let Some(constant) = obj.get("const") {
        return Ok(Expr::Const(const_from_json(constant)?));
    }
    if let Some(reference) = obj.get("ref") {
        let pair = reference
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| bad("ref must be a [position, field] pair"))?;
        let position = pair[0]
            .as_u64()
            .ok_or_else(|| bad("ref position must be a non-negative integer"))?;
        let field = pair[1]
            .as_str()
            .ok_or_else(|| bad("ref field must be a string"))?;
        return Ok(Expr::field(position as usize, field));
    }
    Err(bad(
        "expression must be one of {not}, {op, arg1, arg2}, {const}, {ref}",
    ))
}

fn const_from_json(value: &Json) -> Result<Const, CioError> {
    match value {
        Json::Null => Ok(Const::Null),
        Json::Number(n) => n
            .as_i64()
            .map(Const::Int)
            .ok_or_else(|| bad("constants must be integers, not floats")),
        Json::String(s) => Ok(Const::Text(s.clone())),
        Json::Array(elements) => {
            let mut list = Vec::with_capacity(elements.len());
            for element in elements {
                let scalar = const_from_json(element)?;
                if matches!(scalar, Const::List(_)) {
                    return Err(bad("list constants must not nest"));
                }
                list.push(scalar);
            }
            Ok(Const::List(list))
        }
        _ => Err(bad("unsupported constant")),
    }
}

// ── domain → JSON ───────────────────────────────────────────────────────

pub(crate) fn record_to_json(record: &Record) -> Json {
    let mut out = Map::new();
    for (field, value) in record.fields() {
        out.insert(field.to_string(), value_to_json(value));
    }
    Json::Object(out)
}

fn value_to_json(value: Option<&Value>) -> Json {
    match value {
        None => Json::Null,
        Some(Value::Int(v)) => json!(v),
        Some(Value::Text(v)) => json!(v),
    }
}

pub(crate) fn rows_response(table: Table, records: &[Record]) -> Json {
    let fields: Vec<&str> = table.fields().to_vec();
    let rows: Vec<Json> = records
        .iter()
        .map(|record| {
            Json::Array(
                record
                    .fields()
                    .map(|(_, value)| value_to_json(value))
                    .collect(),
            )
        })
        .collect();
    json!({ "fields": fields, "rows": rows })
}

pub(crate) fn ids_response(ids: &[i64]) -> Json {
    let rows: Vec<Json> = ids.iter().map(|id| json!([id])).collect();
    json!({ "fields": ["id"], "rows": rows })
}

pub(crate) fn error_response(err: &CioError) -> Json {
    json!({ "error": error_kind(err), "detail": err.to_string() })
}

fn error_kind(err: &CioError) -> &'static str {
    match err {
        CioError::BadRequest(_) => "bad_request",
        CioError::Store(err) => match err {
            StoreError::Io(_) => "io",
            StoreError::Sql(_) => "sql",
            StoreError::SchemaVersionMismatch(_) => "schema_version_mismatch",
            StoreError::IntegrityUnsupported => "integrity_unsupported",
            StoreError::ForcedId(_) => "forced_id",
            StoreError::InsertFailed(_) => "insert_failed",
            StoreError::AmbiguousMatch { .. } => "ambiguous_match",
            StoreError::NoSuchRow => "no_such_row",
            StoreError::AmbiguousRow => "ambiguous_row",
            StoreError::ReadOnlyViolation(_) => "read_only_violation",
            StoreError::NotMetaShaped(_) => "not_meta_shaped",
            StoreError::KindRequired => "kind_required",
            StoreError::ValueNotText => "value_not_text",
            StoreError::CountNotScalar => "count_not_scalar",
            StoreError::InvalidInput(_) => "invalid_input",
            StoreError::Query(_) => "query",
        },
    }
}

pub(crate) fn sql_value_to_json(value: &SqlValue) -> Json {
    match value {
        SqlValue::Null => Json::Null,
        SqlValue::Integer(v) => json!(v),
        SqlValue::Real(v) => json!(v),
        SqlValue::Text(v) => json!(v),
        SqlValue::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                hex.push_str(&format!("{byte:02x}"));
            }
            json!(hex)
        }
    }
}
