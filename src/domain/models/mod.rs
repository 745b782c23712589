pub mod config;
pub mod event;
pub mod provider;
pub mod session;

pub use config::{
    Config, DatabaseConfig, GatewayConfig, GatewayMode, LogFormat, LoggingConfig,
    RecordingConfig, RotationPolicy, StdioConfig,
};
pub use event::{ErrorCategory, Event, EventCompletion, EventStatus, EventType};
pub use provider::{HttpProvider, Provider, ProviderRegistry, StdioProvider, REGISTRY_VERSION};
pub use session::{Session, SessionStatus};
