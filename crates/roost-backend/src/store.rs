use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};
use uuid::Uuid;

use roost_types::models::{
    Conversation, ConversationOverview, Delivery, Membership, Message, MessagePreview, UserSummary,
};
use roost_types::requests::{NewConversation, NewMembership, NewMessage};

use crate::StoreError;
use crate::migrations;

/// Relational store behind the reference backend. Stands in for the managed
/// platform's database: uniqueness and foreign keys are enforced here, not
/// by the synchronization layer.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(to_store_err)?;
        let store = Self::init(conn)?;
        info!("Store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(to_store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(to_store_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(to_store_err)?;
        migrations::run(&conn).map_err(to_store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))?;
        f(&conn).map_err(to_store_err)
    }

    // -- Users --

    pub fn insert_user(&self, id: Uuid, username: &str, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), username, ts(&created_at)],
            )?;
            Ok(())
        })
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<UserSummary>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username FROM users WHERE username = ?1",
                [username],
                user_summary_row,
            )
            .optional()
        })
    }

    pub fn user_summary(&self, id: Uuid) -> Result<Option<UserSummary>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username FROM users WHERE id = ?1",
                [id.to_string()],
                user_summary_row,
            )
            .optional()
        })
    }

    pub fn users(&self) -> Result<Vec<UserSummary>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, username FROM users ORDER BY username")?;
            let rows = stmt
                .query_map([], user_summary_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // -- Conversations --

    pub fn insert_conversation(&self, conversation: &NewConversation) -> Result<(), StoreError> {
        let key = conversation.direct_pair.map(|(a, b)| dm_key(a, b));
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, name, is_group, dm_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation.id.to_string(),
                    conversation.name,
                    conversation.is_group,
                    key,
                    ts(&conversation.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn direct_conversation_between(&self, a: Uuid, b: Uuid) -> Result<Option<Uuid>, StoreError> {
        let key = dm_key(a, b);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM conversations WHERE dm_key = ?1",
                [key],
                |row| Ok(parse_uuid(&row.get::<_, String>(0)?, "conversation id")),
            )
            .optional()
        })
    }

    /// Conversations the user holds a membership row for, newest first.
    /// Each row carries the latest-message preview, the unread count
    /// relative to the membership's read pointer, and the per-user flags.
    pub fn user_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationOverview>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group, c.created_at,
                        ms.is_muted,
                        COALESCE(c.name,
                                 (SELECT u.username FROM memberships om
                                    JOIN users u ON u.id = om.user_id
                                   WHERE om.conversation_id = c.id AND om.user_id != ?1
                                   LIMIT 1),
                                 'unknown') AS title,
                        lm.content, lm.created_at, lm.author_id,
                        (SELECT COUNT(*) FROM messages mm
                          WHERE mm.conversation_id = c.id
                            AND mm.author_id != ?1
                            AND (ms.last_read_message_id IS NULL
                                 OR mm.created_at > (SELECT r.created_at FROM messages r
                                                      WHERE r.id = ms.last_read_message_id)))
                 FROM conversations c
                 JOIN memberships ms ON ms.conversation_id = c.id AND ms.user_id = ?1
                 LEFT JOIN messages lm ON lm.id = (SELECT m2.id FROM messages m2
                                                    WHERE m2.conversation_id = c.id
                                                    ORDER BY m2.created_at DESC, m2.id DESC
                                                    LIMIT 1)
                 ORDER BY c.created_at DESC, c.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    let conversation = Conversation {
                        id: parse_uuid(&row.get::<_, String>(0)?, "conversation id"),
                        name: row.get(1)?,
                        is_group: row.get(2)?,
                        created_at: parse_ts(&row.get::<_, String>(3)?),
                    };
                    let last_message = match row.get::<_, Option<String>>(6)? {
                        Some(content) => Some(MessagePreview {
                            content,
                            created_at: parse_ts(&row.get::<_, String>(7)?),
                            author_id: parse_uuid(&row.get::<_, String>(8)?, "author id"),
                        }),
                        None => None,
                    };
                    Ok(ConversationOverview {
                        conversation,
                        title: row.get(5)?,
                        last_message,
                        unread_count: row.get(9)?,
                        is_muted: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // -- Memberships --

    pub fn insert_membership(&self, membership: &NewMembership) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memberships (id, conversation_id, user_id, is_admin, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    membership.id.to_string(),
                    membership.conversation_id.to_string(),
                    membership.user_id.to_string(),
                    membership.is_admin,
                    ts(&membership.joined_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn membership(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Membership>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, conversation_id, user_id, is_admin, is_muted,
                        last_read_message_id, joined_at
                 FROM memberships WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id.to_string(), user_id.to_string()],
                |row| {
                    Ok(Membership {
                        id: parse_uuid(&row.get::<_, String>(0)?, "membership id"),
                        conversation_id: parse_uuid(&row.get::<_, String>(1)?, "conversation id"),
                        user_id: parse_uuid(&row.get::<_, String>(2)?, "user id"),
                        is_admin: row.get(3)?,
                        is_muted: row.get(4)?,
                        last_read_message_id: row
                            .get::<_, Option<String>>(5)?
                            .map(|s| parse_uuid(&s, "message id")),
                        joined_at: parse_ts(&row.get::<_, String>(6)?),
                    })
                },
            )
            .optional()
        })
    }

    pub fn set_muted(&self, conversation_id: Uuid, user_id: Uuid, muted: bool) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET is_muted = ?3 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id.to_string(), user_id.to_string(), muted],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound("membership"));
        }
        Ok(())
    }

    pub fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, message_id: Uuid) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE memberships SET last_read_message_id = ?3
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![
                    conversation_id.to_string(),
                    user_id.to_string(),
                    message_id.to_string()
                ],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound("membership"));
        }
        Ok(())
    }

    // -- Messages --

    pub fn insert_message(&self, message: &NewMessage) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, author_id, content, created_at, reply_to)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.author_id.to_string(),
                    message.content,
                    ts(&message.created_at),
                    message.reply_to.map(|id| id.to_string()),
                ],
            )?;
            Ok(())
        })
    }

    /// Full message history of one conversation, author-joined, ascending
    /// by creation time.
    pub fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.author_id, u.username, m.content, m.created_at, m.edited, m.reply_to
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.author_id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id.to_string()], |row| {
                    Ok(Message {
                        id: parse_uuid(&row.get::<_, String>(0)?, "message id"),
                        conversation_id,
                        author: UserSummary {
                            id: parse_uuid(&row.get::<_, String>(1)?, "author id"),
                            username: row
                                .get::<_, Option<String>>(2)?
                                .unwrap_or_else(|| "unknown".to_string()),
                        },
                        content: row.get(3)?,
                        created_at: parse_ts(&row.get::<_, String>(4)?),
                        edited: row.get(5)?,
                        reply_to: row
                            .get::<_, Option<String>>(6)?
                            .map(|s| parse_uuid(&s, "reply_to")),
                        delivery: Delivery::Confirmed,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

/// Normalized participant pair key for direct conversations.
pub(crate) fn dm_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

/// Fixed-width UTC encoding so lexicographic order in SQL matches
/// chronological order.
fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn user_summary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: parse_uuid(&row.get::<_, String>(0)?, "user id"),
        username: row.get(1)?,
    })
}

fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

fn to_store_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(f, message)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let detail = message.clone().unwrap_or_else(|| f.to_string());
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                StoreError::Conflict(detail)
            } else {
                StoreError::Constraint(detail)
            }
        }
        _ => StoreError::Unavailable(err.to_string()),
    }
}
