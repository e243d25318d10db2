//! Common utilities and types shared across vigil components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
