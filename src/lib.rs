//! Ask tracker: supervises natural-language-to-SQL jobs on a remote AI service.

pub mod config;
pub mod error;
pub mod remote;
pub mod store;
pub mod tracker;
