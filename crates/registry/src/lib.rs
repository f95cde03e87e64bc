//! Adapter lifecycle registry: declarative platform adapters, their status
//! state machine, scoped/public resolution, bundled seeding and the
//! generation job queue.

pub mod adapter;
pub mod bundled;
pub mod jobs;
pub mod lifecycle;
pub mod manifest;
pub mod registry;
pub mod worker;

pub use adapter::{Adapter, DeclarativeAdapter, OperationRequest};
pub use lifecycle::{AdapterPaths, AdapterRow, AdapterStatus, SYSTEM_OWNER};
pub use manifest::{AdapterManifest, ManifestValidation};
pub use registry::{AdapterRegistry, RegistryEntry};
pub use worker::{AdapterGenerator, JobWorker, ManifestSkeletonGenerator};
