//! User-record accessors.
//!
//! Every function here is invoked from a work-pool slot; workers never call
//! into this module directly. Mutations are single-statement writes so a
//! record can never be observed half-updated.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use super::DbPool;
use crate::types::error::PostboxError;
use crate::types::user::{ProviderConfig, User};

/// Raw row before the provider JSON is parsed. JSON parsing happens after
/// the rusqlite closure so its errors map to `PostboxError::Store`.
struct UserRow {
    id: String,
    email: String,
    provider_json: String,
    last_uid: Option<u32>,
    last_uid_validity: Option<String>,
    last_email_at: Option<i64>,
    last_login_at: Option<i64>,
}

fn user_from_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get("id")?,
        email: row.get("email")?,
        provider_json: row.get("provider")?,
        last_uid: row.get("last_uid")?,
        last_uid_validity: row.get("last_uid_validity")?,
        last_email_at: row.get("last_email_at")?,
        last_login_at: row.get("last_login_at")?,
    })
}

fn finish_user(row: UserRow) -> Result<User, PostboxError> {
    let provider: ProviderConfig = serde_json::from_str(&row.provider_json)
        .map_err(|e| PostboxError::Store(format!("Invalid provider JSON for {}: {}", row.id, e)))?;

    Ok(User {
        id: row.id,
        email: row.email,
        provider,
        last_uid: row.last_uid,
        last_uid_validity: row.last_uid_validity,
        last_email_at: row.last_email_at.and_then(DateTime::from_timestamp_millis),
        last_login_at: row.last_login_at.and_then(DateTime::from_timestamp_millis),
    })
}

pub fn get_user(pool: &DbPool, user_id: &str) -> Result<Option<User>, PostboxError> {
    let conn = pool.get()?;
    let result = conn
        .query_row(
            "SELECT id, email, provider, last_uid, last_uid_validity, last_email_at, last_login_at
             FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            user_from_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    result.map(finish_user).transpose()
}

pub fn list_user_ids(pool: &DbPool) -> Result<Vec<String>, PostboxError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn upsert_user(pool: &DbPool, user: &User) -> Result<(), PostboxError> {
    let provider_json = serde_json::to_string(&user.provider)
        .map_err(|e| PostboxError::Store(format!("Cannot serialize provider: {}", e)))?;

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO users (id, email, provider, last_uid, last_uid_validity, last_email_at, last_login_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            email = excluded.email,
            provider = excluded.provider,
            last_uid = excluded.last_uid,
            last_uid_validity = excluded.last_uid_validity,
            last_email_at = excluded.last_email_at,
            last_login_at = excluded.last_login_at",
        rusqlite::params![
            user.id,
            user.email,
            provider_json,
            user.last_uid,
            user.last_uid_validity,
            user.last_email_at.map(|t| t.timestamp_millis()),
            user.last_login_at.map(|t| t.timestamp_millis()),
        ],
    )?;
    Ok(())
}

/// Record a new UID space: stores the validity token and drops the cursor,
/// since UIDs from the previous space no longer mean anything.
pub fn set_uid_validity(pool: &DbPool, user_id: &str, validity: &str) -> Result<(), PostboxError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE users SET last_uid_validity = ?2, last_uid = NULL WHERE id = ?1",
        rusqlite::params![user_id, validity],
    )?;
    if changed == 0 {
        return Err(PostboxError::UserNotFound(user_id.to_string()));
    }
    Ok(())
}

/// Drop the cursor so the next resync falls back to the by-date strategy.
pub fn clear_last_uid(pool: &DbPool, user_id: &str) -> Result<(), PostboxError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE users SET last_uid = NULL WHERE id = ?1",
        rusqlite::params![user_id],
    )?;
    if changed == 0 {
        return Err(PostboxError::UserNotFound(user_id.to_string()));
    }
    Ok(())
}

/// Advance the cursor past a processed message.
pub fn advance_cursor(
    pool: &DbPool,
    user_id: &str,
    uid: u32,
    at: DateTime<Utc>,
) -> Result<(), PostboxError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE users SET last_uid = ?2, last_email_at = ?3 WHERE id = ?1",
        rusqlite::params![user_id, uid, at.timestamp_millis()],
    )?;
    if changed == 0 {
        return Err(PostboxError::UserNotFound(user_id.to_string()));
    }
    Ok(())
}

pub fn touch_last_login(
    pool: &DbPool,
    user_id: &str,
    at: DateTime<Utc>,
) -> Result<(), PostboxError> {
    let conn = pool.get()?;
    let changed = conn.execute(
        "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
        rusqlite::params![user_id, at.timestamp_millis()],
    )?;
    if changed == 0 {
        return Err(PostboxError::UserNotFound(user_id.to_string()));
    }
    Ok(())
}
