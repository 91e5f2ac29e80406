//! Usage: Storage, settings and logging plumbing.

pub mod credential_store;
pub mod db;
pub mod logging;
pub mod settings;
