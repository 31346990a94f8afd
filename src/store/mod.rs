//! Persistence layer — session state and the known-users registry.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Answers, Cursor, KnownUsers, PollState, SessionKey, SessionStore};
