//! # vitalwatch-server
//!
//! HTTP and WebSocket gateway library for the vitalwatch system.
//!
//! This library provides the API handlers, the push channel and state
//! management for the gateway binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
