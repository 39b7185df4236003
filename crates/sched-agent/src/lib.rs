//! Process wiring for the `hetsched` binary: configuration, the packet
//! consumer and the HTTP surface

pub mod api;
pub mod config;
pub mod consumer;
