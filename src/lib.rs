//! Client library for insulin pump telemetry.
//!
//! Three pieces:
//! - [`session`]: browser-style OAuth login and authenticated report calls
//! - [`decode`]: the fixed-width binary event stream into typed records
//! - [`cache`]: a persistent range cache that only fetches uncovered spans

pub mod cache;
pub mod cli;
pub mod decode;
mod error;
pub mod native;
pub mod session;

pub use cache::{FileStorage, MemoryStorage, RangeCache, StorageBackend, TelemetrySource};
pub use decode::{decode, EventData, TelemetryRecord};
pub use error::{AuthError, Error, StorageError};
pub use session::{login, ClientConfig, Credentials, DeviceMetadata, Region, Session, TelemetryClient};

// Re-export for the binary
pub use tracing;
