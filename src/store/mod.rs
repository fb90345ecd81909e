//! Persistence layer: job records and conversation entries.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ConversationEntry, ConversationSink, EntryUpdate, JobRecord, JobRecordUpdate, NewJobRecord,
    TaskStore, View,
};
