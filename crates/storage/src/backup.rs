#![forbid(unsafe_code)]

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, backup::Backup};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

use crate::{LogsStore, StoreError};

/// Paths of the artifact pair produced by one backup run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupArtifacts {
    pub dump_path: PathBuf,
    pub copy_path: PathBuf,
}

impl LogsStore {
    /// Snapshot the store into the backup directory: a portable SQL dump
    /// plus a consistent binary copy, named by local time. Both artifacts
    /// are taken from the live connection so concurrent sessions are seen
    /// at a single point.
    pub fn backup(&self) -> Result<BackupArtifacts, StoreError> {
        let backup_dir = self.config().backup_dir();
        std::fs::create_dir_all(&backup_dir)?;

        let stamp = timestamp();
        let artifacts = fresh_artifact_pair(&backup_dir, &stamp)?;

        write_sql_dump(self.connection(), &artifacts.dump_path)?;
        write_binary_copy(self.connection(), &artifacts.copy_path)?;
        Ok(artifacts)
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!(
        "{:04}_{:02}_{:02}-{:02}_{:02}_{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Pick dump/copy names that both do not exist yet. Same-second reruns get
/// a numeric suffix instead of clobbering the earlier pair.
fn fresh_artifact_pair(dir: &Path, stamp: &str) -> Result<BackupArtifacts, StoreError> {
    let mut suffix = 0u32;
    loop {
        let tag = if suffix == 0 {
            stamp.to_string()
        } else {
            format!("{stamp}.{suffix}")
        };
        let dump_path = dir.join(format!("backup_{tag}.sql"));
        let copy_path = dir.join(format!("backup_{tag}.db"));
        if !dump_path.exists() && !copy_path.exists() {
            return Ok(BackupArtifacts {
                dump_path,
                copy_path,
            });
        }
        suffix = suffix
            .checked_add(1)
            .ok_or(StoreError::InvalidInput("backup name space exhausted"))?;
    }
}

fn write_sql_dump(conn: &Connection, path: &Path) -> Result<(), StoreError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "BEGIN TRANSACTION;")?;

    let tables: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master \
             WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    for (name, ddl) in tables {
        writeln!(out, "{ddl};")?;

        let mut stmt = conn.prepare(&format!("SELECT * FROM {name}"))?;
        let width = stmt.column_count();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut literals = Vec::with_capacity(width);
            for index in 0..width {
                literals.push(sql_literal(&row.get::<_, SqlValue>(index)?));
            }
            writeln!(out, "INSERT INTO {name} VALUES({});", literals.join(","))?;
        }
    }

    writeln!(out, "COMMIT;")?;
    out.flush()?;
    Ok(())
}

fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
        SqlValue::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                hex.push_str(&format!("{byte:02X}"));
            }
            format!("X'{hex}'")
        }
    }
}

fn write_binary_copy(conn: &Connection, path: &Path) -> Result<(), StoreError> {
    let mut target = Connection::open(path)?;
    let backup = Backup::new(conn, &mut target)?;
    backup.run_to_completion(64, Duration::from_millis(50), None)?;
    Ok(())
}
