//! Tasktide reminder service library crate.
//!
//! Scans due-soon tasks and events on an hourly cadence and fans reminders
//! out across in-app notification records, web push and email.

pub mod config;
pub mod database;
pub mod error;
pub mod notify;
pub mod reminder;

pub use error::{Error, Result};
