//! Credential vault: per-user envelope encryption, KMS-wrapped DEKs,
//! transparent OAuth refresh, and the connect-flow state store.

pub mod credentials;
pub mod envelope;
pub mod kms;
pub mod oauth_flow;
pub mod refresh;
pub mod rotate;

pub use credentials::{CredentialSummary, CredentialVault, APP_OAUTH_TYPE, SYSTEM_USER_ID};
pub use kms::{Kms, LocalKms, WrappedDek};
pub use rotate::RotationSummary;
