//! Reversible PII masking.
//!
//! Cloak finds sensitive values in free text (email addresses, phone
//! numbers, national ID numbers, payment cards, or anything a custom
//! detector recognises), swaps each one for a placeholder token such as
//! `{{EMAIL_3f2a9c0e5b7d41e8a6c4d2b0f9e1a7c3_1}}`, and records the token in a pluggable [`Store`].
//! Masked text can travel through logs, queues or third-party APIs and be
//! restored later with [`Cloak::unmask`].
//!
//! ```ignore
//! let cloak = Cloak::in_memory();
//! let masked = cloak.mask("Email john@example.com").await?;
//! // "Email {{EMAIL_<32 hex session id>_1}}"
//! let restored = cloak.unmask(&masked).await?;
//! assert_eq!(restored.text, "Email john@example.com");
//! ```
//!
//! # Stores
//!
//! - [`MemoryStore`]: process-local, optional TTL and capacity limit
//! - [`FileStore`]: JSON file that survives restarts
//! - [`EncryptedStore`]: AES-256 encryption at rest around any store

pub mod config;
pub mod detect;
pub mod errors;
pub mod store;
pub mod token;

mod engine;

pub use config::{validate_config, CloakConfig};
pub use detect::Detector;
pub use engine::{Cloak, CloakBuilder, Masked, MintedToken, Unmasked};
pub use errors::{CloakError, CloakResult, DetectionError, StoreError};
pub use store::{EncryptedStore, EncryptionKey, FileStore, MemoryStore, Store};
pub use token::{MaskSession, TokenParts};
