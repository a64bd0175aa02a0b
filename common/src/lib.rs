//! Paycore Common Types
//!
//! This crate contains shared types used across the Paycore ledger,
//! including identifiers, monetary helpers, transaction status and errors.

pub mod identifiers;
pub mod monetary;
pub mod status;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use status::*;
pub use error::*;
pub use time::*;
