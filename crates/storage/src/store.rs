#![forbid(unsafe_code)]

use ldb_core::{
    Const, Projection, QueryError, Record, Select, Table, Template, Value, build_select,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::StoreError;

const VERSION_ROW_ID: i64 = 0;
const VERSION_KIND: &str = "logsdb";
const VERSION_NAME: &str = "version";
const VERSION_VALUE: &str = "1";

const DATABASE_FILE: &str = "logs.db";
const BACKUP_DIR: &str = "backups";

const SCHEMA: &str = r#"
BEGIN;

CREATE TABLE exp_progs_lists (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT,
  description TEXT
);

CREATE TABLE exp_exps_lists (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT,
  description TEXT
);

CREATE TABLE holba_runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT,
  prog_list_id INTEGER NOT NULL REFERENCES exp_progs_lists(id),
  exp_list_id INTEGER NOT NULL REFERENCES exp_exps_lists(id)
);

CREATE TABLE holba_runs_meta (
  run_id INTEGER NOT NULL REFERENCES holba_runs(id),
  kind TEXT,
  name TEXT,
  value TEXT,
  UNIQUE(run_id, kind, name)
);

CREATE TABLE exp_runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT
);

CREATE TABLE exp_runs_meta (
  run_id INTEGER NOT NULL REFERENCES exp_runs(id),
  kind TEXT,
  name TEXT,
  value TEXT,
  UNIQUE(run_id, kind, name)
);

CREATE TABLE exp_progs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  arch TEXT,
  code TEXT
);

CREATE TABLE exp_progs_meta (
  prog_id INTEGER NOT NULL REFERENCES exp_progs(id),
  kind TEXT,
  name TEXT,
  value TEXT,
  UNIQUE(prog_id, kind, name)
);

CREATE TABLE exp_exps (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  prog_id INTEGER NOT NULL REFERENCES exp_progs(id),
  type TEXT,
  params TEXT,
  input_data TEXT
);

CREATE TABLE exp_exps_meta (
  exp_id INTEGER NOT NULL REFERENCES exp_exps(id),
  kind TEXT,
  name TEXT,
  value TEXT,
  UNIQUE(exp_id, kind, name)
);

CREATE TABLE exp_progs_lists_entries (
  list_id INTEGER NOT NULL REFERENCES exp_progs_lists(id),
  prog_id INTEGER NOT NULL REFERENCES exp_progs(id),
  list_index INTEGER NOT NULL,
  UNIQUE(list_id, prog_id)
);

CREATE TABLE exp_exps_lists_entries (
  list_id INTEGER NOT NULL REFERENCES exp_exps_lists(id),
  exp_id INTEGER NOT NULL REFERENCES exp_exps(id),
  list_index INTEGER NOT NULL,
  UNIQUE(list_id, exp_id)
);

CREATE TABLE db_meta (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT,
  name TEXT,
  value TEXT,
  UNIQUE(kind, name)
);

INSERT INTO db_meta(id, kind, name, value) VALUES (0, 'logsdb', 'version', '1');

COMMIT;
"#;

/// Explicit store location, threaded into session construction.
/// The database file and the backup directory both live under `data_dir`.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    data_dir: PathBuf,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(BACKUP_DIR)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// One session against the store file.
///
/// The connection is owned by the session and released when it is dropped,
/// on every exit path; `close` exists for callers that want to observe
/// close errors.
#[derive(Debug)]
pub struct LogsStore {
    conn: Connection,
    config: StoreConfig,
    access: Access,
}

impl LogsStore {
    /// Open a session. A missing store file is created and bootstrapped on
    /// the first read-write open; read-only sessions never create.
    pub fn open(config: StoreConfig, access: Access) -> Result<Self, StoreError> {
        let db_path = config.database_file();
        let existed = db_path.is_file();

        let conn = match access {
            Access::ReadOnly => {
                Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
            }
            Access::ReadWrite => {
                std::fs::create_dir_all(&config.data_dir)?;
                Connection::open(&db_path)?
            }
        };
        conn.busy_timeout(Duration::from_secs(5))?;
        enable_foreign_keys(&conn)?;

        if existed {
            preflight_gate(&conn)?;
            check_version_row(&conn)?;
        } else if let Err(err) = conn.execute_batch(SCHEMA) {
            // No partial schema: the transaction rolled back, remove the
            // empty file so the next open starts from scratch.
            drop(conn);
            let _ = std::fs::remove_file(&db_path);
            return Err(StoreError::Sql(err));
        }

        Ok(Self {
            conn,
            config,
            access,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sql(err))
    }

    fn require_writable(&self, op: &'static str) -> Result<(), StoreError> {
        match self.access {
            Access::ReadWrite => Ok(()),
            Access::ReadOnly => Err(StoreError::ReadOnlyViolation(op)),
        }
    }

    // ── CRUD ────────────────────────────────────────────────────────────

    /// Insert one record. The surrogate id must be unset; only set fields
    /// are named in the statement; the stored row is read back and returned
    /// fully populated.
    pub fn insert(&mut self, template: &Template) -> Result<Record, StoreError> {
        self.require_writable("insert on a read-only session")?;
        check_id_unset(template)?;
        self.insert_row(template)
    }

    /// Dedup insert: if exactly one row already matches the set fields it
    /// is returned unchanged; several matches are a logic defect and fail
    /// loudly; none falls through to a plain insert.
    pub fn insert_or_match(&mut self, template: &Template) -> Result<Record, StoreError> {
        self.require_writable("insert on a read-only session")?;
        check_id_unset(template)?;

        let existing = self.find(template)?;
        match existing.len() {
            0 => self.insert_row(template),
            1 => Ok(existing.into_iter().next().ok_or(StoreError::NoSuchRow)?),
            matches => Err(StoreError::AmbiguousMatch {
                table: template.table().name(),
                matches,
            }),
        }
    }

    fn insert_row(&mut self, template: &Template) -> Result<Record, StoreError> {
        let table = template.table();
        let mut fields = Vec::new();
        let mut values = Vec::new();
        for (field, value) in template.set_fields() {
            fields.push(field);
            values.push(sql_value(value));
        }

        let sql = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table.name())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name(),
                fields.join(", "),
                vec!["?"; fields.len()].join(", ")
            )
        };

        let tx = self.conn.transaction()?;
        if let Err(err) = tx.execute(&sql, params_from_iter(values)) {
            return Err(StoreError::InsertFailed(err));
        }
        let rowid = tx.last_insert_rowid();
        let record = read_row_by_rowid(&tx, table, rowid)?;
        tx.commit()?;
        Ok(record)
    }

    /// Conjunctive equality match over the set fields of the template.
    /// An all-unset template matches every row.
    pub fn find(&self, template: &Template) -> Result<Vec<Record>, StoreError> {
        let table = template.table();
        let (clause, values) = match_clause(template);
        let sql = format!("SELECT * FROM {}{clause}", table.name());

        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params_from_iter(values), |row| raw_row(table, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter()
            .map(|raw| record_from_raw(table, raw))
            .collect()
    }

    /// Id-only projection of [`find`](Self::find).
    pub fn find_ids(&self, template: &Template) -> Result<Vec<i64>, StoreError> {
        let table = template.table();
        if !table.has_id() {
            return Err(StoreError::Query(QueryError::NoIdColumn(table.name())));
        }
        let (clause, values) = match_clause(template);
        let sql = format!("SELECT id FROM {}{clause}", table.name());

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(values), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Count-only projection of [`find`](Self::find).
    pub fn count(&self, template: &Template) -> Result<i64, StoreError> {
        let (clause, values) = match_clause(template);
        let sql = format!("SELECT COUNT(*) FROM {}{clause}", template.table().name());
        let count = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count)
    }

    /// Append to the `value` of a uniquely-identified metadata row. The
    /// target is located by every set field except `value`; old and new
    /// values must both be text. This is the only mutation in the model.
    pub fn append_meta(&mut self, template: &Template) -> Result<Record, StoreError> {
        self.require_writable("append on a read-only session")?;

        let table = template.table();
        if !table.is_meta_shaped() {
            return Err(StoreError::NotMetaShaped(table.name()));
        }
        if template.get("kind")?.is_none() {
            return Err(StoreError::KindRequired);
        }
        let new_value = match template.get("value")? {
            Some(Value::Text(text)) => text.clone(),
            _ => return Err(StoreError::ValueNotText),
        };

        let mut conds = Vec::new();
        let mut values = Vec::new();
        for (field, value) in template.set_fields() {
            if field == "value" {
                continue;
            }
            conds.push(format!("{field} = ?"));
            values.push(sql_value(value));
        }
        let clause = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };

        let tx = self.conn.transaction()?;

        let (rowid, stored) = {
            let sql = format!("SELECT rowid, value FROM {}{clause}", table.name());
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(values))?;
            let Some(row) = rows.next()? else {
                return Err(StoreError::NoSuchRow);
            };
            let rowid: i64 = row.get(0)?;
            let stored: SqlValue = row.get(1)?;
            if rows.next()?.is_some() {
                return Err(StoreError::AmbiguousRow);
            }
            (rowid, stored)
        };

        let SqlValue::Text(stored_text) = stored else {
            return Err(StoreError::ValueNotText);
        };

        tx.execute(
            &format!("UPDATE {} SET value = ? WHERE rowid = ?", table.name()),
            params![format!("{stored_text}{new_value}"), rowid],
        )?;

        let record = read_row_by_rowid(&tx, table, rowid)?;
        tx.commit()?;
        Ok(record)
    }

    // ── Compiled queries ────────────────────────────────────────────────

    /// Execute a join query, returning de-duplicated root-table rows.
    pub fn select(&self, select: &Select) -> Result<Vec<Record>, StoreError> {
        let (sql, consts) = build_select(select, Projection::Rows)?;
        let values = bind_values(&consts)?;

        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params_from_iter(values), |row| raw_row(select.root, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter()
            .map(|raw| record_from_raw(select.root, raw))
            .collect()
    }

    /// Id-only projection of [`select`](Self::select).
    pub fn select_ids(&self, select: &Select) -> Result<Vec<i64>, StoreError> {
        let (sql, consts) = build_select(select, Projection::Ids)?;
        let values = bind_values(&consts)?;

        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(values), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Count-only projection of [`select`](Self::select). The compiled
    /// statement must produce exactly one scalar row.
    pub fn select_count(&self, select: &Select) -> Result<i64, StoreError> {
        let (sql, consts) = build_select(select, Projection::Count)?;
        let values = bind_values(&consts)?;

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let Some(row) = rows.next()? else {
            return Err(StoreError::CountNotScalar);
        };
        let count: i64 = row.get(0)?;
        if rows.next()?.is_some() {
            return Err(StoreError::CountNotScalar);
        }
        Ok(count)
    }

    // ── Escape hatch & inspection ───────────────────────────────────────

    /// Execute caller-supplied SQL verbatim, returning column names plus
    /// generic values. Fenced to read-only sessions: the trap door only
    /// opens where mutation is impossible.
    pub fn raw_query(
        &self,
        sql: &str,
    ) -> Result<(Vec<String>, Vec<Vec<SqlValue>>), StoreError> {
        if self.access != Access::ReadOnly {
            return Err(StoreError::ReadOnlyViolation(
                "raw queries are restricted to read-only sessions",
            ));
        }

        let mut stmt = self.conn.prepare(sql)?;
        let fields: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let width = fields.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(width);
            for index in 0..width {
                record.push(row.get::<_, SqlValue>(index)?);
            }
            out.push(record);
        }
        Ok((fields, out))
    }

    /// Human-readable table listing with row counts, optionally with rows.
    pub fn summary(&self, with_rows: bool) -> Result<String, StoreError> {
        let mut out = Vec::new();
        out.push(format!(
            "Tables (file: {}):",
            self.config.database_file().display()
        ));
        for table in Table::ALL {
            let count = self.count(&Template::empty(table))?;
            out.push(format!("- {} (entries: {count})", table.name()));
            if with_rows {
                for record in self.find(&Template::empty(table))? {
                    out.push(format!("  - {record:?}"));
                }
            }
        }
        Ok(out.join("\n"))
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn enable_foreign_keys(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    let enabled: Option<i64> = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .optional()?;
    match enabled {
        Some(1) => Ok(()),
        _ => Err(StoreError::IntegrityUnsupported),
    }
}

/// Fail-closed table-set check for existing files: the store refuses to
/// touch a database whose user tables are not exactly the known catalog.
fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = std::collections::BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    for table in Table::ALL {
        if !tables.remove(table.name()) {
            return Err(StoreError::SchemaVersionMismatch(format!(
                "required table {} is missing",
                table.name()
            )));
        }
    }
    if let Some(stray) = tables.into_iter().next() {
        return Err(StoreError::SchemaVersionMismatch(format!(
            "unexpected table {stray}"
        )));
    }
    Ok(())
}

fn check_version_row(conn: &Connection) -> Result<(), StoreError> {
    let row: Option<(i64, Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT id, kind, name, value FROM db_meta WHERE id = ?1",
            params![VERSION_ROW_ID],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((VERSION_ROW_ID, Some(kind), Some(name), Some(value)))
            if kind == VERSION_KIND && name == VERSION_NAME && value == VERSION_VALUE =>
        {
            Ok(())
        }
        Some(_) => Err(StoreError::SchemaVersionMismatch(
            "version row does not match the expected value".to_string(),
        )),
        None => Err(StoreError::SchemaVersionMismatch(
            "version row is missing".to_string(),
        )),
    }
}

fn check_id_unset(template: &Template) -> Result<(), StoreError> {
    let table = template.table();
    if table.has_id() && template.get("id")?.is_some() {
        return Err(StoreError::ForcedId(table.name()));
    }
    Ok(())
}

fn match_clause(template: &Template) -> (String, Vec<SqlValue>) {
    let mut conds = Vec::new();
    let mut values = Vec::new();
    for (field, value) in template.set_fields() {
        conds.push(format!("{field} = ?"));
        values.push(sql_value(value));
    }
    let clause = if conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conds.join(" AND "))
    };
    (clause, values)
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
    }
}

fn bind_values(consts: &[Const]) -> Result<Vec<SqlValue>, StoreError> {
    consts
        .iter()
        .map(|constant| match constant {
            Const::Null => Ok(SqlValue::Null),
            Const::Int(v) => Ok(SqlValue::Integer(*v)),
            Const::Text(v) => Ok(SqlValue::Text(v.clone())),
            Const::List(_) => Err(StoreError::Query(QueryError::UnsupportedConstant)),
        })
        .collect()
}

fn raw_row(table: Table, row: &rusqlite::Row<'_>) -> rusqlite::Result<Vec<SqlValue>> {
    (0..table.fields().len()).map(|index| row.get(index)).collect()
}

fn record_from_raw(table: Table, raw: Vec<SqlValue>) -> Result<Record, StoreError> {
    let mut values = Vec::with_capacity(raw.len());
    for value in raw {
        values.push(match value {
            SqlValue::Null => None,
            SqlValue::Integer(v) => Some(Value::Int(v)),
            SqlValue::Text(v) => Some(Value::Text(v)),
            SqlValue::Real(_) | SqlValue::Blob(_) => {
                return Err(StoreError::InvalidInput(
                    "record column is neither integer nor text",
                ));
            }
        });
    }
    Ok(Record::from_values(table, values)?)
}

fn read_row_by_rowid(conn: &Connection, table: Table, rowid: i64) -> Result<Record, StoreError> {
    let raw = conn.query_row(
        &format!("SELECT * FROM {} WHERE rowid = ?1", table.name()),
        params![rowid],
        |row| raw_row(table, row),
    )?;
    record_from_raw(table, raw)
}
