//! # beacon-server
//!
//! HTTP host for the beacon proximity tracking engine.
//!
//! This library provides the API handlers, built-in observers and state
//! management used by the `beacon-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod observers;
pub mod settings;
pub mod state;
