//! # beacon-server
//!
//! HTTP host for the beacon advertisement engines.
//!
//! This library provides the API handlers, shared state and radio selection
//! used by the `beacon-server` binary and its tests.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod radio;
pub mod state;
