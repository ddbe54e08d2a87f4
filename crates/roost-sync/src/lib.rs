//! Client-side synchronization core.
//!
//! Keeps a local view of conversations, messages, and typing presence
//! consistent with the shared backend under concurrent inserts, live
//! events, and optimistic local writes:
//!
//! - message streams combine a bulk history fetch with live inserts and
//!   optimistic sends, deduplicated by client-generated id
//! - the conversation list is invalidated and recomputed wholesale on any
//!   conversation-table change
//! - typing presence is an ephemeral per-conversation set decayed by a
//!   fixed timeout
//!
//! [`session::ChatSession`] wires the three pieces to a [`Backend`]
//! implementation and owns subscription lifecycle and teardown.
//!
//! [`Backend`]: roost_backend::Backend

pub mod conversation_list;
pub mod error;
pub mod message_stream;
pub mod session;
pub mod typing;

pub use conversation_list::ConversationList;
pub use error::SyncError;
pub use message_stream::{MessageLog, MessageStream};
pub use session::{ChatSession, SessionEvent};
pub use typing::{TYPING_TTL, TypingTracker};
