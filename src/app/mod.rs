//! App module - session state and command processing
//!
//! Owns the session lifetime and the operator command surface.

pub mod commands;
pub mod session;
