//! Core Components
//!
//! Core infrastructure for identity operations.

pub mod backend;
pub mod transport;

pub use backend::*;
pub use transport::*;
