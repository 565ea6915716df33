use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// One admissible risk category a classification run may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskType {
    pub id: i64,
    pub title: String,
    pub prompt: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

/// Data access for the risk taxonomy and the page-count fact table.
///
/// Injected into the orchestrator so unit tests run without a live database.
#[async_trait]
pub trait RiskRepository: Send + Sync {
    /// Loads the taxonomy for one classification run.
    ///
    /// Non-empty `selected_ids` selects exactly those rows (custom run);
    /// otherwise rows scoped to `workspace_id`, or the globally shared rows
    /// when no scope is given. Always ordered by id ascending. Data-access
    /// failures yield an empty taxonomy, never an error: callers treat an
    /// empty taxonomy as "no classification possible".
    async fn load_risk_types(
        &self,
        workspace_id: Option<&str>,
        selected_ids: &[i64],
    ) -> Vec<RiskType>;

    /// Records the post-split page count for one processed document.
    async fn record_page_count(&self, project_id: &str, page_count: u32) -> anyhow::Result<()>;
}

/// SQLite-backed repository. A fresh connection is opened and closed per
/// operation; every write commits immediately.
#[derive(Debug, Clone)]
pub struct SqliteRiskRepository {
    db_path: PathBuf,
}

impl SqliteRiskRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Routes to the database for the environment that triggered the event.
    /// `CONTRACT_DB_PATH_{BUCKET}` (bucket upper-cased, `-`/`.` mapped to
    /// `_`) wins over `CONTRACT_DB_PATH`; the default is `data/contracts.db`.
    pub fn for_bucket(bucket: &str) -> Self {
        let key = format!(
            "CONTRACT_DB_PATH_{}",
            bucket.to_ascii_uppercase().replace(['-', '.'], "_")
        );
        let db_path = std::env::var(&key)
            .or_else(|_| std::env::var("CONTRACT_DB_PATH"))
            .unwrap_or_else(|_| "data/contracts.db".to_owned());
        Self::new(db_path)
    }

    fn open(db_path: &Path) -> anyhow::Result<Connection> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open database: {}", db_path.display()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS risk_types (
                 id INTEGER PRIMARY KEY,
                 title TEXT NOT NULL,
                 prompt TEXT NOT NULL,
                 description TEXT NOT NULL,
                 workspace_id TEXT
             );
             CREATE TABLE IF NOT EXISTS page_counts (
                 project_id TEXT NOT NULL,
                 page_count INTEGER NOT NULL,
                 created_at TEXT NOT NULL
             );",
        )
        .context("ensure schema")?;
        Ok(conn)
    }

    fn query_risk_types(
        db_path: &Path,
        workspace_id: Option<&str>,
        selected_ids: &[i64],
    ) -> anyhow::Result<Vec<RiskType>> {
        let conn = Self::open(db_path)?;

        let mut rows = Vec::new();
        let mut collect = |stmt: &mut rusqlite::Statement<'_>,
                           params: &[&dyn rusqlite::ToSql]|
         -> anyhow::Result<()> {
            let mapped = stmt
                .query_map(params, |row| {
                    Ok(RiskType {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        prompt: row.get(2)?,
                        description: row.get(3)?,
                        workspace_id: row.get(4)?,
                    })
                })
                .context("query risk types")?;
            for row in mapped {
                rows.push(row.context("read risk type row")?);
            }
            Ok(())
        };

        if !selected_ids.is_empty() {
            let placeholders = vec!["?"; selected_ids.len()].join(",");
            let sql = format!(
                "SELECT id, title, prompt, description, workspace_id
                 FROM risk_types WHERE id IN ({placeholders}) ORDER BY id ASC"
            );
            let mut stmt = conn.prepare(&sql).context("prepare selected-ids query")?;
            let params = selected_ids
                .iter()
                .map(|id| id as &dyn rusqlite::ToSql)
                .collect::<Vec<_>>();
            collect(&mut stmt, &params)?;
        } else if let Some(workspace_id) = workspace_id {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, prompt, description, workspace_id
                     FROM risk_types WHERE workspace_id = ? ORDER BY id ASC",
                )
                .context("prepare workspace query")?;
            collect(&mut stmt, &[&workspace_id])?;
        } else {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, prompt, description, workspace_id
                     FROM risk_types WHERE workspace_id IS NULL ORDER BY id ASC",
                )
                .context("prepare default query")?;
            collect(&mut stmt, &[])?;
        }

        Ok(rows)
    }
}

#[async_trait]
impl RiskRepository for SqliteRiskRepository {
    async fn load_risk_types(
        &self,
        workspace_id: Option<&str>,
        selected_ids: &[i64],
    ) -> Vec<RiskType> {
        let db_path = self.db_path.clone();
        let workspace_id = workspace_id.map(str::to_owned);
        let selected_ids = selected_ids.to_vec();

        let loaded = tokio::task::spawn_blocking(move || {
            Self::query_risk_types(&db_path, workspace_id.as_deref(), &selected_ids)
        })
        .await;

        match loaded {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => {
                tracing::warn!(?err, "loading risk taxonomy failed; classification skipped");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(?err, "risk taxonomy task panicked; classification skipped");
                Vec::new()
            }
        }
    }

    async fn record_page_count(&self, project_id: &str, page_count: u32) -> anyhow::Result<()> {
        let db_path = self.db_path.clone();
        let project_id = project_id.to_owned();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = Self::open(&db_path)?;
            conn.execute(
                "INSERT INTO page_counts (project_id, page_count, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![project_id, page_count, Utc::now().to_rfc3339()],
            )
            .context("insert page count")?;
            Ok(())
        })
        .await
        .context("join page count task")?
    }
}
