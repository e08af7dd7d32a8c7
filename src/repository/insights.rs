//! Insights-only store.
//!
//! The generated artifact is kept separately from the processing record
//! so the read side can serve insights without dragging the whole record
//! row along. Rows share the document's retention deadline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::{connect, parse_datetime, Result};
use crate::models::VeteranProfile;

/// One stored insights row.
#[derive(Debug, Clone)]
pub struct InsightsRow {
    pub document_id: String,
    pub created_at: DateTime<Utc>,
    pub veteran_profile: VeteranProfile,
    pub ai_insights: Value,
    pub ttl: DateTime<Utc>,
}

pub struct InsightsStore {
    db_path: PathBuf,
}

impl InsightsStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        let conn = connect(&store.db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS career_insights (
                document_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                veteran_profile TEXT NOT NULL,
                ai_insights TEXT NOT NULL,
                ttl TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_career_insights_ttl ON career_insights(ttl);
        "#,
        )?;
        Ok(store)
    }

    /// Insert or overwrite the insights for a document. Re-runs of the
    /// insights stage overwrite rather than duplicate.
    pub fn put(
        &self,
        document_id: &str,
        profile: &VeteranProfile,
        insights: &Value,
        ttl: DateTime<Utc>,
    ) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "INSERT INTO career_insights
                 (document_id, created_at, veteran_profile, ai_insights, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(document_id) DO UPDATE SET
                 veteran_profile = excluded.veteran_profile,
                 ai_insights = excluded.ai_insights,
                 ttl = excluded.ttl",
            params![
                document_id,
                Utc::now().to_rfc3339(),
                serde_json::to_string(profile)?,
                serde_json::to_string(insights)?,
                ttl.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, document_id: &str) -> Result<Option<InsightsRow>> {
        let conn = connect(&self.db_path)?;
        let row = conn
            .query_row(
                "SELECT document_id, created_at, veteran_profile, ai_insights, ttl
                   FROM career_insights WHERE document_id = ?1",
                params![document_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((document_id, created_at, profile, insights, ttl)) => Ok(Some(InsightsRow {
                document_id,
                created_at: parse_datetime(&created_at),
                veteran_profile: serde_json::from_str(&profile)?,
                ai_insights: serde_json::from_str(&insights)?,
                ttl: parse_datetime(&ttl),
            })),
            None => Ok(None),
        }
    }

    pub fn delete(&self, document_id: &str) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            "DELETE FROM career_insights WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(())
    }
}
