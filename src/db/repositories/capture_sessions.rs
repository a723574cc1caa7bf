use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_end_reason, to_i64, to_u64},
    models::{CaptureSessionRecord, StoredDetection},
};
use crate::session::{PersistenceSink, SessionReport};

impl Database {
    /// Writes the session row and one row per label in a single transaction.
    pub async fn insert_session_report(&self, report: &SessionReport) -> Result<()> {
        let record = report.clone();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open session transaction")?;

            tx.execute(
                "INSERT INTO capture_sessions (id, device_id, started_at, stopped_at, end_reason, target_ms, frame_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.session_id,
                    record.device_id,
                    record.started_at.to_rfc3339(),
                    record.stopped_at.to_rfc3339(),
                    record.end_reason.as_str(),
                    to_i64(record.target_ms)?,
                    to_i64(record.frame_count)?,
                ],
            )
            .context("failed to insert capture session")?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO detected_objects (session_id, label, confidence, observed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for detection in &record.detections {
                    stmt.execute(params![
                        record.session_id,
                        detection.label,
                        f64::from(detection.best_confidence),
                        detection.observed_at.to_rfc3339(),
                    ])
                    .with_context(|| {
                        format!("failed to insert detection {}", detection.label)
                    })?;
                }
            }

            tx.commit().context("failed to commit session report")?;
            Ok(())
        })
        .await
    }

    /// Most recent sessions first.
    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<CaptureSessionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, device_id, started_at, stopped_at, end_reason, target_ms, frame_count
                 FROM capture_sessions
                 ORDER BY started_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![i64::from(limit)])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let detections = load_detections(conn, &id)?;
                sessions.push(CaptureSessionRecord {
                    device_id: row.get(1)?,
                    started_at: parse_datetime(&row.get::<_, String>(2)?, "started_at")?,
                    stopped_at: parse_datetime(&row.get::<_, String>(3)?, "stopped_at")?,
                    end_reason: parse_end_reason(&row.get::<_, String>(4)?)?,
                    target_ms: to_u64(row.get(5)?, "target_ms")?,
                    frame_count: to_u64(row.get(6)?, "frame_count")?,
                    detections,
                    id,
                });
            }

            Ok(sessions)
        })
        .await
    }
}

fn load_detections(conn: &Connection, session_id: &str) -> Result<Vec<StoredDetection>> {
    let mut stmt = conn.prepare(
        "SELECT label, confidence, observed_at
         FROM detected_objects
         WHERE session_id = ?1
         ORDER BY confidence DESC, label ASC",
    )?;

    let mut rows = stmt.query(params![session_id])?;
    let mut detections = Vec::new();
    while let Some(row) = rows.next()? {
        let confidence: f64 = row.get(1)?;
        detections.push(StoredDetection {
            label: row.get(0)?,
            confidence: confidence as f32,
            observed_at: parse_datetime(&row.get::<_, String>(2)?, "observed_at")?,
        });
    }
    Ok(detections)
}

#[async_trait]
impl PersistenceSink for Database {
    async fn flush(&self, report: SessionReport) -> Result<()> {
        self.insert_session_report(&report).await
    }
}
