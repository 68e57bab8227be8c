//! Database initialization, settings and shared queries

pub mod alerts;
pub mod init;
pub mod migrations;
pub mod schema_sync;
pub mod settings;
pub mod table_schemas;
pub mod vehicles;

pub use init::{init_database, init_memory_database, seed_settings_from_config};

use crate::{Error, Result};
use uuid::Uuid;

/// Parse a stored UUID column
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid stored id '{}': {}", value, e)))
}
