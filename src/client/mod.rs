//! XTables client
//!
//! Provides the components for talking to an XTables server:
//! - [`XTablesClient`] - Main entry point: reads, writes, scripts, subscriptions
//! - [`ClientBuilder`] - Configurable client construction
//! - [`RequestAction`] - Handle to one in-flight request
//! - [`ConnectionEngine`] - Socket ownership and the reconnect cycle
//!
//! # Basic Usage
//! ```no_run
//! use std::time::Duration;
//! use xtables::client::XTablesClient;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = XTablesClient::builder()
//!         .server_address("10.0.0.2")
//!         .server_port(1735)
//!         .request_timeout(Duration::from_secs(1))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     client.put("robot.arm.angle", &42).unwrap().complete().await.unwrap();
//!     let angle: Option<i32> = client.get("robot.arm.angle").await.unwrap();
//!     println!("angle: {:?}", angle);
//!
//!     client
//!         .subscribe_update::<i32, _>("robot.arm", |update| {
//!             if let Ok(update) = update {
//!                 println!("{} = {}", update.key, update.value);
//!             }
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

mod builder;
mod cache;
#[allow(clippy::module_inception)]
mod client;
mod config;
mod connection;
mod pending;
mod pubsub;
mod request;
mod types;

pub use builder::*;
pub use client::*;
pub use config::*;
pub use connection::*;
pub use pubsub::SubscriptionHandle;
pub use pubsub::SubscriptionKind;
pub use request::RequestAction;
pub use types::*;

#[cfg(test)]
mod cache_test;
#[cfg(test)]
mod client_test;
#[cfg(test)]
mod mock_server;
