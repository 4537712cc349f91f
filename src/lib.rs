//! Multi-venue gift marketplace monitor with guarded autobuy.
//!
//! Each venue gets a batched poller and an autobuy controller; a control
//! plane starts and stops them together and merges cross-venue rankings.

pub mod auth;
pub mod autobuy;
pub mod command;
pub mod config;
pub mod control;
pub mod filter;
pub mod item;
pub mod logging;
pub mod merge;
pub mod notify;
pub mod poller;
pub mod retry;
pub mod seen;
pub mod types;
pub mod venue;
