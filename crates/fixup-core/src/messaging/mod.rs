//! Platform port and the payloads that cross it.

pub mod port;
pub mod types;
