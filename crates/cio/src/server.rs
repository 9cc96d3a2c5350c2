#![forbid(unsafe_code)]

use ldb_storage::{Access, LogsStore, StoreConfig};
use serde_json::{Value as Json, json};

use crate::wire::{
    self, AppendRequest, CioError, CreateRequest, QueryRequest, bad, error_response,
    parse_request,
};

/// Handle one logical request. A fresh session is opened per request and
/// dropped before the answer is produced; every failure comes back as a
/// structured error object.
pub(crate) fn handle(config: &StoreConfig, verbose: bool, operation: &str, payload: &Json) -> Json {
    match dispatch(config, verbose, operation, payload) {
        Ok(answer) => answer,
        Err(err) => {
            if verbose {
                eprintln!("ldb_cio: {operation} failed: {err}");
            }
            error_response(&err)
        }
    }
}

fn dispatch(
    config: &StoreConfig,
    verbose: bool,
    operation: &str,
    payload: &Json,
) -> Result<Json, CioError> {
    match operation {
        "create" => create(config, payload),
        "append" => append(config, payload),
        "query" => query(config, payload),
        "backup" => backup(config, verbose),
        other => Err(bad(format!("unknown operation {other}"))),
    }
}

fn create(config: &StoreConfig, payload: &Json) -> Result<Json, CioError> {
    let request: CreateRequest = parse_request(payload)?;
    let template = wire::template_from_parts(&request.table, &request.values)?;

    let mut store = LogsStore::open(config.clone(), Access::ReadWrite)?;
    let record = if request.match_existing {
        store.insert_or_match(&template)?
    } else {
        store.insert(&template)?
    };
    store.close()?;

    if request.id_only {
        let id = record
            .id()
            .ok_or_else(|| bad(format!("table {} has no id column", request.table)))?;
        Ok(json!({ "id": id }))
    } else {
        Ok(wire::record_to_json(&record))
    }
}

fn append(config: &StoreConfig, payload: &Json) -> Result<Json, CioError> {
    let request: AppendRequest = parse_request(payload)?;
    let template = wire::template_from_parts(&request.table, &request.values)?;

    let mut store = LogsStore::open(config.clone(), Access::ReadWrite)?;
    let record = store.append_meta(&template)?;
    store.close()?;
    Ok(wire::record_to_json(&record))
}

fn query(config: &StoreConfig, payload: &Json) -> Result<Json, CioError> {
    let request: QueryRequest = parse_request(payload)?;
    let store = LogsStore::open(config.clone(), Access::ReadOnly)?;

    let answer = match request {
        QueryRequest::MatchSimple {
            table,
            values,
            id_only,
            count_only,
        } => {
            let template = wire::template_from_parts(&table, &values)?;
            if count_only {
                json!({ "count": store.count(&template)? })
            } else if id_only {
                wire::ids_response(&store.find_ids(&template)?)
            } else {
                wire::rows_response(template.table(), &store.find(&template)?)
            }
        }
        QueryRequest::JoinBased {
            table,
            joins,
            where_expr,
            order_by,
            id_only,
            count_only,
        } => {
            let select =
                wire::select_from_parts(&table, &joins, where_expr.as_ref(), &order_by)?;
            if count_only {
                json!({ "count": store.select_count(&select)? })
            } else if id_only {
                wire::ids_response(&store.select_ids(&select)?)
            } else {
                wire::rows_response(select.root, &store.select(&select)?)
            }
        }
        QueryRequest::Sql { sql } => {
            let (fields, rows) = store.raw_query(&sql)?;
            let rows: Vec<Json> = rows
                .iter()
                .map(|row| Json::Array(row.iter().map(wire::sql_value_to_json).collect()))
                .collect();
            json!({ "fields": fields, "rows": rows })
        }
    };

    store.close()?;
    Ok(answer)
}

fn backup(config: &StoreConfig, verbose: bool) -> Result<Json, CioError> {
    let store = LogsStore::open(config.clone(), Access::ReadWrite)?;
    let artifacts = store.backup()?;
    store.close()?;
    if verbose {
        eprintln!(
            "ldb_cio: backup written to {} and {}",
            artifacts.dump_path.display(),
            artifacts.copy_path.display()
        );
    }
    Ok(Json::Bool(true))
}
