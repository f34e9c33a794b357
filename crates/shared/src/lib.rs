//! Shared types for the AI Toologist data layer: table rows, the realtime
//! channel protocol and the API error type.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
