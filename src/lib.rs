//! Game Relay - Real-time connection fan-out for multiplayer game servers
//!
//! Keeps every live push (WebSocket) and stream (SSE) connection of each
//! identity, fans game events out to all of them, and relays events between
//! server instances over a pub/sub broker guarded by circuit breakers,
//! retry with backoff and a dead letter store.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
