//! HTTP surface of the gateway daemon (axum).

pub mod gateway_http;

pub use gateway_http::{GatewayHttpConfig, GatewayHttpServer, GatewayState};
