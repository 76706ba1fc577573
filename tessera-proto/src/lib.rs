//! Wire types for the tessera agent lifecycle API.
//!
//! The messages are hand-authored prost structs: the transport layer and
//! generated service glue are out of scope here, but the wire shapes are the
//! protocol contract and encode/decode like any other prost message.

pub mod agent;
pub mod types;

pub use agent::*;
pub use types::*;
