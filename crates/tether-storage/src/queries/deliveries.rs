// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only delivery attempt log.

use rusqlite::{params, Row};
use tether_core::{DeliveryAttempt, SessionId, TetherError, WebhookId};

use super::{parse_enum, parse_ts, ts};
use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, webhook_id, session_id, event_id, category, attempt_number, \
     status_code, response_excerpt, error, duration_ms, success, payload, signature, attempted_at";

fn from_row(row: &Row<'_>) -> Result<DeliveryAttempt, rusqlite::Error> {
    Ok(DeliveryAttempt {
        id: row.get(0)?,
        webhook_id: WebhookId(row.get(1)?),
        session_id: SessionId(row.get(2)?),
        event_id: row.get(3)?,
        category: parse_enum(4, row.get(4)?)?,
        attempt_number: row.get(5)?,
        status_code: row.get(6)?,
        response_excerpt: row.get(7)?,
        error: row.get(8)?,
        duration_ms: row.get::<_, i64>(9)?.max(0) as u64,
        success: row.get(10)?,
        payload: row.get(11)?,
        signature: row.get(12)?,
        attempted_at: parse_ts(13, row.get(13)?)?,
    })
}

pub async fn append_delivery_attempt(
    db: &Database,
    attempt: &DeliveryAttempt,
) -> Result<(), TetherError> {
    let attempt = attempt.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO delivery_attempts ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    attempt.id,
                    attempt.webhook_id.as_str(),
                    attempt.session_id.as_str(),
                    attempt.event_id,
                    attempt.category.to_string(),
                    attempt.attempt_number,
                    attempt.status_code,
                    attempt.response_excerpt,
                    attempt.error,
                    i64::try_from(attempt.duration_ms).unwrap_or(i64::MAX),
                    attempt.success,
                    attempt.payload,
                    attempt.signature,
                    ts(&attempt.attempted_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Most recent attempts first.
pub async fn list_delivery_attempts(
    db: &Database,
    webhook_id: &WebhookId,
    limit: usize,
) -> Result<Vec<DeliveryAttempt>, TetherError> {
    let webhook_id = webhook_id.as_str().to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM delivery_attempts
                 WHERE webhook_id = ?1
                 ORDER BY rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![webhook_id, limit], from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}
