//! XTables: a hierarchical key-value store with publish/subscribe, served
//! over one line-oriented TCP connection per client.
//!
//! - [`server`] hosts the store and answers requests
//! - [`client`] talks to it with correlated requests, a read-through cache
//!   and typed subscriptions

pub mod client;
mod config;
pub mod constants;
mod errors;
pub mod key;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod store;
pub mod utils;

pub use client::XTablesClient;
pub use config::*;
pub use errors::*;
pub use server::XTablesServer;
