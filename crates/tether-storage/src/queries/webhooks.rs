// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook subscriber CRUD.

use rusqlite::{params, OptionalExtension, Row};
use tether_core::{EventCategory, RetryPolicy, SessionId, TetherError, Webhook, WebhookId};

use super::{parse_enum, parse_json, parse_ts, to_json, ts};
use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, session_id, url, events, secret, headers, max_attempts, \
     base_delay_ms, backoff, timeout_ms, is_active, created_at, updated_at";

fn from_row(row: &Row<'_>) -> Result<Webhook, rusqlite::Error> {
    Ok(Webhook {
        id: WebhookId(row.get(0)?),
        session_id: SessionId(row.get(1)?),
        url: row.get(2)?,
        events: parse_json(3, row.get(3)?)?,
        secret: row.get(4)?,
        headers: parse_json(5, row.get(5)?)?,
        retry: RetryPolicy {
            max_attempts: row.get(6)?,
            base_delay_ms: row.get::<_, i64>(7)?.max(0) as u64,
            backoff: parse_enum(8, row.get(8)?)?,
        },
        timeout_ms: row.get::<_, i64>(9)?.max(0) as u64,
        is_active: row.get(10)?,
        created_at: parse_ts(11, row.get(11)?)?,
        updated_at: parse_ts(12, row.get(12)?)?,
    })
}

pub async fn create_webhook(db: &Database, webhook: &Webhook) -> Result<(), TetherError> {
    let webhook = webhook.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO webhooks ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    webhook.id.as_str(),
                    webhook.session_id.as_str(),
                    webhook.url,
                    to_json(&webhook.events)?,
                    webhook.secret,
                    to_json(&webhook.headers)?,
                    webhook.retry.max_attempts,
                    webhook.retry.base_delay_ms as i64,
                    webhook.retry.backoff.to_string(),
                    webhook.timeout_ms as i64,
                    webhook.is_active,
                    ts(&webhook.created_at),
                    ts(&webhook.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_webhook(db: &Database, id: &WebhookId) -> Result<Option<Webhook>, TetherError> {
    let id = id.as_str().to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM webhooks WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Rewrites every mutable column and bumps `updated_at`.
pub async fn update_webhook(db: &Database, webhook: &Webhook) -> Result<(), TetherError> {
    let id = webhook.id.clone();
    let webhook = webhook.clone();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE webhooks SET url = ?2, events = ?3, secret = ?4, headers = ?5,
                     max_attempts = ?6, base_delay_ms = ?7, backoff = ?8, timeout_ms = ?9,
                     is_active = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    webhook.id.as_str(),
                    webhook.url,
                    to_json(&webhook.events)?,
                    webhook.secret,
                    to_json(&webhook.headers)?,
                    webhook.retry.max_attempts,
                    webhook.retry.base_delay_ms as i64,
                    webhook.retry.backoff.to_string(),
                    webhook.timeout_ms as i64,
                    webhook.is_active,
                    ts(&chrono::Utc::now()),
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;

    if changed == 0 {
        return Err(TetherError::webhook_not_found(id));
    }
    Ok(())
}

pub async fn delete_webhook(db: &Database, id: &WebhookId) -> Result<bool, TetherError> {
    let id = id.as_str().to_string();
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute("DELETE FROM webhooks WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(deleted > 0)
        })
        .await
        .map_err(map_tr_err)
}

async fn select_for_session(
    db: &Database,
    session_id: &SessionId,
    active_only: bool,
) -> Result<Vec<Webhook>, TetherError> {
    let session_id = session_id.as_str().to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM webhooks
                 WHERE session_id = ?1 AND (?2 = 0 OR is_active = 1)
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map(params![session_id, active_only], from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_webhooks(
    db: &Database,
    session_id: &SessionId,
) -> Result<Vec<Webhook>, TetherError> {
    select_for_session(db, session_id, false).await
}

/// Active webhooks of the session whose category set covers `category`.
///
/// Category sets are stored as JSON, so the match happens after the read.
pub async fn list_active_subscribers(
    db: &Database,
    session_id: &SessionId,
    category: EventCategory,
) -> Result<Vec<Webhook>, TetherError> {
    let hooks = select_for_session(db, session_id, true).await?;
    Ok(hooks.into_iter().filter(|w| w.accepts(category)).collect())
}
