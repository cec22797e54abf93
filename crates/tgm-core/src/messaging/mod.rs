//! Transport-facing abstractions: the live message stream and the forwarding target.

pub mod port;
pub mod throttled;
pub mod types;
