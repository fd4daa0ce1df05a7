use rusqlite::Connection;

use crate::types::error::PostboxError;

pub fn initialize_schema(conn: &Connection) -> Result<(), PostboxError> {
    conn.execute_batch(
        "
        -- One row per synchronized mailbox user. The provider column holds
        -- the IMAP endpoint and auth material as JSON; the cursor columns
        -- are only meaningful together (last_uid belongs to the UID space
        -- named by last_uid_validity).
        CREATE TABLE IF NOT EXISTS users (
            id                  TEXT PRIMARY KEY,
            email               TEXT NOT NULL UNIQUE,
            provider            TEXT NOT NULL,      -- JSON (ProviderConfig)
            last_uid            INTEGER,            -- NULL = no cursor / invalidated
            last_uid_validity   TEXT,               -- server UIDVALIDITY as text
            last_email_at       INTEGER,            -- unix epoch ms
            last_login_at       INTEGER             -- unix epoch ms
        );
        ",
    )?;

    Ok(())
}
