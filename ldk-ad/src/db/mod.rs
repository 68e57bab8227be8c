//! Admin desk queries that only this service needs
//!
//! Vehicle, alert and settings access shared with market research lives in
//! `ldk_common::db`.

pub mod consignments;
pub mod dashboard;
