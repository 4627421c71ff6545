//! Common identifier types shared across Parley components.

#![warn(clippy::pedantic)]

/// Module for shared identifier types
pub mod types;
