//! Database access for erg-verify
//!
//! Pool creation and schema live in `erg_common::db`; this module holds the
//! service's queries.

pub mod entries;
pub mod settings;
pub mod users;
