//! TCP front end of the store: accept loop, per-connection sessions,
//! request dispatch, remote scripts and the video stream control plane.

mod handler;
mod script;
#[allow(clippy::module_inception)]
mod server;
mod statistics;
mod streams;

pub use handler::*;
pub use script::*;
pub use server::*;
pub use statistics::*;
pub use streams::*;
