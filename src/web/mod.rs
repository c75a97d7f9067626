//! HTTP control surface.
//!
//! Handlers never touch the state machine directly; they send a [`printer_channel::MonitorRequest`]
//! to its task and await the oneshot reply.

pub mod api;
pub mod models;
pub mod printer_channel;
