//! `loki-core` — the LOKI case-key subsystem.
//!
//! Four cooperating operations protect a bundle of investigative material
//! (a "case") under a symmetric key that never needs to be transmitted or
//! stored verbatim, because authorized parties can rederive it from case
//! metadata they already know:
//!
//! - [`generate`] — sample a fresh salt, derive a case key from metadata,
//!   return key + fingerprint + salt
//! - [`discover`] — recover a key from a bounded metadata guess space,
//!   matching derived fingerprints against a known target
//! - [`seal`] — authenticated encryption into a versioned [`Container`]
//! - [`open`] — verify and decrypt a container, failing closed on any
//!   tamper or wrong-key condition
//!
//! The surrounding dispatch shell (terminal I/O, lookup handlers) lives
//! outside this crate and consumes these operations through [`ops`].
//! This crate is the audit target: zero network, zero async.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod metadata;

pub mod kdf;
pub mod keygen;
pub mod discovery;

pub mod container;

pub mod ops;

pub use container::{open, seal, Container, FORMAT_VERSION, MAGIC, NONCE_LEN, TAG_LEN};
pub use discovery::{
    dates_between, discover, CancelToken, DiscoveryOptions, MetadataTemplate, SearchSpace,
};
pub use error::LokiError;
pub use kdf::{
    derive, fingerprint_of, Argon2Params, Fingerprint, KdfPreset, Salt, FINGERPRINT_LEN, SALT_LEN,
};
pub use keygen::{generate, CaseRecord};
pub use memory::{disable_core_dumps, KeyMaterial, LockedRegion, SecretBuffer, KEY_LEN};
pub use metadata::CaseMetadata;
pub use ops::{execute, KeySource, Operation, Outcome};
