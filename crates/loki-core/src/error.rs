//! Error types for `loki-core`.
//!
//! Every operation returns one of these variants explicitly — no variant is
//! ever downgraded to a generic failure before it reaches the dispatch
//! shell. [`LokiError::AuthenticationFailed`] and [`LokiError::KeyNotFound`]
//! are deliberately distinct: only the latter tells the operator that
//! widening the guess space might help.

use thiserror::Error;

/// Errors produced by the case-key subsystem.
#[derive(Debug, Error)]
pub enum LokiError {
    /// A required case attribute is missing, empty, or malformed.
    /// Caller's fault — recoverable by re-prompting the operator.
    #[error("invalid case metadata: {0}")]
    InvalidMetadata(String),

    /// Argon2id parameter validation or working-set allocation failed.
    /// Never raised for malformed input (the normalizer rejects that
    /// upstream). Retryable.
    #[error("key derivation failed: {0}")]
    Derivation(String),

    /// Discovery exhausted (or was cancelled before completing) its
    /// candidate space without a fingerprint match.
    #[error("key discovery exhausted the candidate space")]
    KeyNotFound,

    /// Authentication tag verification failed — container tampered or the
    /// candidate key is wrong. No plaintext is released on this path.
    #[error("container authentication failed: tag mismatch")]
    AuthenticationFailed,

    /// Container version not understood by this build. Fatal, not
    /// retryable; nothing past the version byte is parsed.
    #[error("unsupported container format version {version}")]
    UnsupportedFormat {
        /// The version byte found in the container.
        version: u8,
    },

    /// AEAD resource failure during sealing (key setup, encryption).
    /// Retryable.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Container bytes are structurally invalid: truncated, bad magic, or
    /// a length field pointing past the end of the input.
    #[error("container format error: {0}")]
    ContainerFormat(String),

    /// Secure memory failure (mlock bookkeeping, CSPRNG, allocation).
    #[error("secure memory error: {0}")]
    SecureMemory(String),
}
