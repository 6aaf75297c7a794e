//! Routeguard - request-time authorization gate
//!
//! Maps controller actions and handler patterns to named permissions, checks
//! them against the permissions an actor holds and turns the outcome into
//! continue, re-dispatch, redirect or a 501 error. Exposes all modules for
//! testing purposes.

pub mod guard;
pub mod settings;
