//! Xiaomi Gateway 3 bridge library.
//!
//! Decodes the messages a Gateway 3 publishes on its broker into named,
//! typed device states, and encodes state writes back into gateway
//! commands.

pub mod config;
pub mod convert;
pub mod decoder;
pub mod device;
pub mod error;
pub mod gateway;
pub mod input;
pub mod registry;
pub mod state;
