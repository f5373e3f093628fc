//! UI module - Command Line Interface
//!
//! Provides the reedline-based REPL the operator drives the monitor with.

pub mod cli;
