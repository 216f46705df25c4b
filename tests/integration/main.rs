//! Integration tests for task-planner
//!
//! These exercise the public planning API end to end, the persistence
//! layer on real files, and the CLI binary.

// Test utilities and common setup
mod common;

mod cli_tests;
mod persistence_tests;
mod scenario_tests;

// Re-export common utilities for use by test modules
pub use common::*;
