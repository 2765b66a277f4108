//! Wire types for EdgeX event messages
//!
//! Event and reading shapes, the message envelope codec, and topic helpers.

pub mod envelope;
pub mod messages;
pub mod topics;

pub use envelope::*;
pub use messages::*;
pub use topics::*;
