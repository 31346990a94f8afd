//! Session store and known-users traits — the persisted-state surface.
//!
//! The traversal engine sees only these operations; the key-value engine
//! behind them is an implementation detail. All session writes carry a
//! time-to-live so abandoned sessions self-expire.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identifies one questionnaire session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user: i64,
    pub chat: i64,
}

impl SessionKey {
    pub fn new(user: i64, chat: i64) -> Self {
        Self { user, chat }
    }
}

/// Current position in the item sequence plus the anchor prompt identity.
///
/// `anchor` is the message id of the last prompt issued for `position`;
/// events referencing any other message are stale and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub position: usize,
    pub anchor: i64,
}

/// Accumulated answers, keyed by item name. One item may hold several
/// values (multi-select, repeated free text).
pub type Answers = BTreeMap<String, Vec<String>>;

/// Per-multi-choice sub-state: current page offset and per-option
/// selected flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    pub offset: usize,
    pub options: BTreeMap<String, bool>,
}

impl PollState {
    pub fn selected(&self, key: &str) -> bool {
        self.options.get(key).copied().unwrap_or(false)
    }
}

/// Per-(user, chat) session state operations.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the cursor, or `None` when no session exists (or it expired).
    async fn cursor(&self, key: SessionKey) -> Result<Option<Cursor>, StoreError>;

    async fn set_cursor(&self, key: SessionKey, cursor: Cursor) -> Result<(), StoreError>;

    /// Read the accumulated answers; empty map when absent.
    async fn answers(&self, key: SessionKey) -> Result<Answers, StoreError>;

    async fn set_answers(&self, key: SessionKey, answers: &Answers) -> Result<(), StoreError>;

    /// Read the poll sub-state for the item at `index`.
    async fn poll_state(
        &self,
        key: SessionKey,
        index: usize,
    ) -> Result<Option<PollState>, StoreError>;

    async fn set_poll_state(
        &self,
        key: SessionKey,
        index: usize,
        state: &PollState,
    ) -> Result<(), StoreError>;

    /// Append a message id to the session's cleanup history.
    async fn push_message(&self, key: SessionKey, message_id: i64) -> Result<(), StoreError>;

    /// Read and clear the message history.
    async fn drain_messages(&self, key: SessionKey) -> Result<Vec<i64>, StoreError>;

    /// The results-sink row opened for this session, if any (incremental mode).
    async fn row(&self, key: SessionKey) -> Result<Option<i64>, StoreError>;

    async fn set_row(&self, key: SessionKey, row: i64) -> Result<(), StoreError>;

    /// Remove every key belonging to the session.
    async fn clear(&self, key: SessionKey) -> Result<(), StoreError>;
}

/// Registry of users who have completed the flow at least once. Consulted
/// by the traversal engine for first-time-only skipping; mutated only by
/// the finalizer.
#[async_trait]
pub trait KnownUsers: Send + Sync {
    async fn exists(&self, user: i64) -> Result<bool, StoreError>;

    async fn mark_known(&self, user: i64) -> Result<(), StoreError>;
}
