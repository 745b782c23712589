//! Application layer: assembles services into a running gateway.

pub mod gateway_daemon;

pub use gateway_daemon::{shutdown_signal, GatewayDaemon};
