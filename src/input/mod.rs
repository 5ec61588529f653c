//! Input sources feeding the gateway core.

pub mod mqtt;
