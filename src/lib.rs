//! Telegram bot for orientation camp attendance.
//!
//! Staff submit batches of student IDs which the [`ledger`] applies to a
//! spreadsheet-shaped roster store under a single ledger lock.

pub mod clubs;
pub mod config;
pub mod db;
pub mod delimited;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod lock;
pub mod masterlist;
pub mod model;
pub mod scores;
pub mod session;
pub mod sheet;
pub mod workers;
