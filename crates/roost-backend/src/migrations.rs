use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            name        TEXT,
            is_group    INTEGER NOT NULL DEFAULT 0,
            -- Normalized participant pair for direct conversations; the
            -- unique index is what enforces one conversation per pair.
            dm_key      TEXT UNIQUE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memberships (
            id                    TEXT PRIMARY KEY,
            conversation_id       TEXT NOT NULL REFERENCES conversations(id),
            user_id               TEXT NOT NULL REFERENCES users(id),
            is_admin              INTEGER NOT NULL DEFAULT 0,
            is_muted              INTEGER NOT NULL DEFAULT 0,
            last_read_message_id  TEXT,
            joined_at             TEXT NOT NULL,
            UNIQUE(conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_memberships_user
            ON memberships(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            author_id        TEXT NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            created_at       TEXT NOT NULL,
            edited           INTEGER NOT NULL DEFAULT 0,
            reply_to         TEXT REFERENCES messages(id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        ",
    )?;

    info!("Store migrations complete");
    Ok(())
}
