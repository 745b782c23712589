//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - SessionRepository: session rows
//! - EventRepository: event rows
//! - SequenceAllocator: atomic per-session sequence numbers
//! - ProviderRegistrySource: the hub's provider registry

pub mod event_repository;
pub mod provider_registry;
pub mod sequence_allocator;
pub mod session_repository;

pub use event_repository::EventRepository;
pub use provider_registry::{ProviderRegistrySource, StaticRegistry};
pub use sequence_allocator::SequenceAllocator;
pub use session_repository::SessionRepository;
