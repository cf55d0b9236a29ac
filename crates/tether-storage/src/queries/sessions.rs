// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session record CRUD.

use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tether_core::{SessionId, SessionRecord, SessionStatus, StatusUpdate, TetherError};

use super::{opt_ts, parse_enum, parse_json, parse_opt_ts, parse_ts, to_json, ts};
use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, owner_id, name, status, qr_payload, pairing_code, identity, \
     failure_reason, connected_at, disconnected_at, policy, created_at, updated_at";

fn from_row(row: &Row<'_>) -> Result<SessionRecord, rusqlite::Error> {
    Ok(SessionRecord {
        id: SessionId(row.get(0)?),
        owner_id: row.get(1)?,
        name: row.get(2)?,
        status: parse_enum(3, row.get(3)?)?,
        qr_payload: row.get(4)?,
        pairing_code: row.get(5)?,
        identity: row
            .get::<_, Option<String>>(6)?
            .map(|raw| parse_json(6, raw))
            .transpose()?,
        failure_reason: row
            .get::<_, Option<String>>(7)?
            .map(|raw| parse_enum(7, raw))
            .transpose()?,
        connected_at: parse_opt_ts(8, row.get(8)?)?,
        disconnected_at: parse_opt_ts(9, row.get(9)?)?,
        policy: parse_json(10, row.get(10)?)?,
        created_at: parse_ts(11, row.get(11)?)?,
        updated_at: parse_ts(12, row.get(12)?)?,
    })
}

/// Inserts a record. `Conflict` when the owner already has a session of that name.
pub async fn create_session(db: &Database, record: &SessionRecord) -> Result<(), TetherError> {
    let record = record.clone();
    let (owner, name) = (record.owner_id.clone(), record.name.clone());
    let inserted = db
        .connection()
        .call(move |conn| {
            let identity = record.identity.as_ref().map(to_json).transpose()?;
            let result = conn.execute(
                &format!(
                    "INSERT INTO sessions ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    record.id.as_str(),
                    record.owner_id,
                    record.name,
                    record.status.as_ref(),
                    record.qr_payload,
                    record.pairing_code,
                    identity,
                    record.failure_reason.map(|r| r.to_string()),
                    opt_ts(&record.connected_at),
                    opt_ts(&record.disconnected_at),
                    to_json(&record.policy)?,
                    ts(&record.created_at),
                    ts(&record.updated_at),
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)?;

    if inserted {
        Ok(())
    } else {
        Err(TetherError::Conflict(format!(
            "owner {owner} already has a session named `{name}`"
        )))
    }
}

pub async fn load_session(
    db: &Database,
    id: &SessionId,
) -> Result<Option<SessionRecord>, TetherError> {
    let id = id.as_str().to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn find_session_by_name(
    db: &Database,
    owner_id: &str,
    name: &str,
) -> Result<Option<SessionRecord>, TetherError> {
    let (owner_id, name) = (owner_id.to_string(), name.to_string());
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM sessions WHERE owner_id = ?1 AND name = ?2"),
                params![owner_id, name],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Replaces the status-derived columns. `NotFound` when the row is gone.
pub async fn save_session_status(
    db: &Database,
    id: &SessionId,
    update: &StatusUpdate,
) -> Result<(), TetherError> {
    let key = id.as_str().to_string();
    let update = update.clone();
    let changed = db
        .connection()
        .call(move |conn| {
            let identity = update.identity.as_ref().map(to_json).transpose()?;
            conn.execute(
                "UPDATE sessions SET status = ?2, qr_payload = ?3, pairing_code = ?4,
                     identity = ?5, failure_reason = ?6, connected_at = ?7,
                     disconnected_at = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    key,
                    update.status.as_ref(),
                    update.qr_payload,
                    update.pairing_code,
                    identity,
                    update.failure_reason.map(|r| r.to_string()),
                    opt_ts(&update.connected_at),
                    opt_ts(&update.disconnected_at),
                    ts(&chrono::Utc::now()),
                ],
            )
        })
        .await
        .map_err(map_tr_err)?;

    if changed == 0 {
        return Err(TetherError::session_not_found(id));
    }
    Ok(())
}

/// Lists sessions oldest first, optionally filtered by status.
pub async fn list_sessions(
    db: &Database,
    status: Option<SessionStatus>,
) -> Result<Vec<SessionRecord>, TetherError> {
    let status = status.map(|s| s.as_ref().to_string());
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM sessions
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map(params![status], from_row)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Sessions last seen `CONNECTED` or `DISCONNECTED`.
pub async fn list_sessions_to_restore(db: &Database) -> Result<Vec<SessionRecord>, TetherError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM sessions
                 WHERE status IN (?1, ?2)
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map(
                params![
                    SessionStatus::Connected.as_ref(),
                    SessionStatus::Disconnected.as_ref()
                ],
                from_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes a session and, by cascade, its webhooks.
pub async fn delete_session(db: &Database, id: &SessionId) -> Result<bool, TetherError> {
    let id = id.as_str().to_string();
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok::<_, rusqlite::Error>(deleted > 0)
        })
        .await
        .map_err(map_tr_err)
}
