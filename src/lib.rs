//! rotenv: run a command with a rotating credential in its environment.
//!
//! Polls a JSON credential document, resolves a logical name to a typed
//! credential, and restarts the supervised child (SIGTERM, then SIGKILL
//! after a grace period) only when that credential actually changes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credential;
pub mod document;
pub mod logging;
pub mod process;
pub mod resolver;
pub mod signals;
pub mod supervisor;
