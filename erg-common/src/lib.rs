//! # ergtally Common Library
//!
//! Shared code for the ergtally services including:
//! - Database initialization and schema
//! - Domain models (entries, user aggregates, verification status)
//! - Request signature authentication helpers
//! - Configuration loading and root folder resolution
//! - Utility functions

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
