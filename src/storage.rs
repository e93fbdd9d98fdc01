use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::domain::{GlobalCaseRecord, IndiaDailyRecord, IndiaTotalRecord};
use crate::error::StorageError;

pub const GLOBAL_TABLE: &str = "global";
pub const INDIA_DAILY_TABLE: &str = "india_daily";
pub const INDIA_TOTAL_TABLE: &str = "india_total";
pub const TABLES: [&str; 3] = [GLOBAL_TABLE, INDIA_DAILY_TABLE, INDIA_TOTAL_TABLE];

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Durable target for the three canonical relations.
pub trait StorageWriter: Send + Sync {
    /// Replaces all three relations as one unit: either every table holds the
    /// new rows afterwards or none changed.
    fn commit(
        &self,
        global: &[GlobalCaseRecord],
        india_daily: &[IndiaDailyRecord],
        india_total: &[IndiaTotalRecord],
    ) -> Result<(), StorageError>;
}

/// SQLite database file. A connection is opened per operation so the store
/// can be shared with a background refresh thread.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    path: Utf8PathBuf,
}

impl SqliteStorage {
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())?;
            }
        }
        let storage = Self { path };
        let conn = storage.connect()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Ok(storage)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        Ok(Connection::open(self.path.as_std_path())?)
    }

    /// Row count of one of the canonical tables, `None` before the first
    /// commit.
    pub fn row_count(&self, table: &str) -> Result<Option<u64>, StorageError> {
        if !TABLES.contains(&table) {
            return Err(StorageError::UnknownTable(table.to_string()));
        }
        let conn = self.connect()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })?;
        Ok(Some(count as u64))
    }
}

impl StorageWriter for SqliteStorage {
    fn commit(
        &self,
        global: &[GlobalCaseRecord],
        india_daily: &[IndiaDailyRecord],
        india_total: &[IndiaTotalRecord],
    ) -> Result<(), StorageError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        stage_global(&tx, global)?;
        stage_india_daily(&tx, india_daily)?;
        stage_india_total(&tx, india_total)?;
        for table in TABLES {
            swap(&tx, table)?;
        }
        tx.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_global_country_date ON "global"(country, date);
            CREATE INDEX IF NOT EXISTS idx_india_daily_state_date ON india_daily(state, date);
            CREATE INDEX IF NOT EXISTS idx_india_total_state ON india_total(state);
            "#,
        )?;

        tx.commit()?;
        tracing::info!(
            path = %self.path,
            global = global.len(),
            india_daily = india_daily.len(),
            india_total = india_total.len(),
            "relations committed"
        );
        Ok(())
    }
}

fn staging(table: &str) -> String {
    format!("{table}__staging")
}

/// Drops the live table and renames the staged copy into place. Both steps
/// run inside the caller's transaction.
fn swap(tx: &Transaction<'_>, table: &str) -> Result<(), StorageError> {
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS \"{table}\"; ALTER TABLE \"{staged}\" RENAME TO \"{table}\";",
        staged = staging(table)
    ))?;
    Ok(())
}

fn stage_global(tx: &Transaction<'_>, rows: &[GlobalCaseRecord]) -> Result<(), StorageError> {
    let staged = staging(GLOBAL_TABLE);
    tx.execute_batch(&format!(
        r#"
        DROP TABLE IF EXISTS "{staged}";
        CREATE TABLE "{staged}" (
          ID INTEGER PRIMARY KEY,
          iso_code TEXT NOT NULL,
          continent TEXT NOT NULL,
          country TEXT NOT NULL,
          date TEXT NOT NULL,
          total_cases INTEGER NOT NULL,
          new_cases INTEGER NOT NULL,
          total_deaths INTEGER NOT NULL,
          new_deaths INTEGER NOT NULL,
          new_tests INTEGER NOT NULL,
          total_tests INTEGER NOT NULL,
          tests_per_case REAL NOT NULL,
          positive_rate REAL NOT NULL,
          population INTEGER NOT NULL,
          population_density REAL NOT NULL
        );
        "#
    ))?;
    let mut stmt = tx.prepare(&format!(
        r#"INSERT INTO "{staged}" VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)"#
    ))?;
    for (id, row) in rows.iter().enumerate() {
        stmt.execute(params![
            id as i64,
            row.iso_code,
            row.continent,
            row.country,
            row.date.format(DATE_FORMAT).to_string(),
            row.total_cases,
            row.new_cases,
            row.total_deaths,
            row.new_deaths,
            row.new_tests,
            row.total_tests,
            row.tests_per_case,
            row.positive_rate,
            row.population,
            row.population_density,
        ])?;
    }
    Ok(())
}

fn stage_india_daily(tx: &Transaction<'_>, rows: &[IndiaDailyRecord]) -> Result<(), StorageError> {
    let staged = staging(INDIA_DAILY_TABLE);
    tx.execute_batch(&format!(
        r#"
        DROP TABLE IF EXISTS "{staged}";
        CREATE TABLE "{staged}" (
          ID INTEGER PRIMARY KEY,
          date TEXT NOT NULL,
          state TEXT NOT NULL,
          confirmed INTEGER NOT NULL,
          deceased INTEGER NOT NULL,
          recovered INTEGER NOT NULL,
          total_confirmed INTEGER NOT NULL,
          total_deceased INTEGER NOT NULL
        );
        "#
    ))?;
    let mut stmt = tx.prepare(&format!(
        r#"INSERT INTO "{staged}" VALUES (?1,?2,?3,?4,?5,?6,?7,?8)"#
    ))?;
    for (id, row) in rows.iter().enumerate() {
        stmt.execute(params![
            id as i64,
            row.date.format(DATE_FORMAT).to_string(),
            row.state,
            row.confirmed,
            row.deceased,
            row.recovered,
            row.total_confirmed,
            row.total_deceased,
        ])?;
    }
    Ok(())
}

fn stage_india_total(tx: &Transaction<'_>, rows: &[IndiaTotalRecord]) -> Result<(), StorageError> {
    let staged = staging(INDIA_TOTAL_TABLE);
    tx.execute_batch(&format!(
        r#"
        DROP TABLE IF EXISTS "{staged}";
        CREATE TABLE "{staged}" (
          ID INTEGER PRIMARY KEY,
          statecode TEXT NOT NULL,
          state TEXT NOT NULL,
          lastupdatedtime TEXT,
          confirmed INTEGER NOT NULL,
          active INTEGER NOT NULL,
          recovered INTEGER NOT NULL,
          deaths INTEGER NOT NULL,
          population INTEGER NOT NULL,
          density INTEGER NOT NULL
        );
        "#
    ))?;
    let mut stmt = tx.prepare(&format!(
        r#"INSERT INTO "{staged}" VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)"#
    ))?;
    for (id, row) in rows.iter().enumerate() {
        stmt.execute(params![
            id as i64,
            row.statecode,
            row.state,
            row.lastupdatedtime
                .map(|value| value.format(DATETIME_FORMAT).to_string()),
            row.confirmed,
            row.active,
            row.recovered,
            row.deaths,
            row.population,
            row.density,
        ])?;
    }
    Ok(())
}
