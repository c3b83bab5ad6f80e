//! Pure utility functions.
//!
//! Stateless helpers used across the codebase.

pub mod bootstrap;
