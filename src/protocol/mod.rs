//! Wire protocol: one UTF-8 line per message.
//!
//! ```text
//! <id>:<METHOD>[:<STATUS>][ <escaped payload>]\n
//! ```
//!
//! Payload backslashes and line breaks are escaped so arbitrary JSON
//! survives the line framing unchanged.

mod codec;
mod message;
mod method;

pub use codec::*;
pub use message::*;
pub use method::*;
