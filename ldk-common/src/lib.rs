//! # LotDesk Common Library
//!
//! Shared code for the LotDesk services:
//! - Database initialization, settings and shared queries
//! - Inventory, consignment and alert models
//! - Event types (`LdkEvent`) and SSE helpers
//! - API request signing
//! - Configuration loading

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod pagination;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
