//! Test doubles for the message bus and the event handler
//!
//! Lets the dispatch loop, the publisher and the service be exercised
//! without an MQTT broker.

pub mod mocks;

pub use mocks::*;
