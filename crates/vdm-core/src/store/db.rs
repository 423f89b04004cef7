//! Connection handling, migrations and timestamp helpers. Job CRUD lives in `jobs`.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}?mode=rwc", out)
}

/// Handle to the job database. Cheap to clone (shares the connection pool).
///
/// The default file is `~/.local/state/vdm/jobs.db`.
#[derive(Clone, Debug)]
pub struct JobDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl JobDb {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("vdm")?;
        Self::open_at(xdg_dirs.get_state_home().join("jobs.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&path_to_sqlite_uri(path))
            .await
            .with_context(|| format!("open job database {}", path.display()))?;
        let db = JobDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                checksum_url TEXT,
                checksum_algorithm TEXT,
                destination TEXT NOT NULL,
                size INTEGER,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                digest_algorithm TEXT,
                digest_expected TEXT,
                digest_computed TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Current time as Unix seconds.
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Open an in-memory database (no disk I/O). A single connection keeps every
/// query on the same in-memory database.
#[cfg(test)]
pub(crate) async fn open_memory() -> Result<JobDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = JobDb { pool };
    db.migrate().await?;
    Ok(db)
}
