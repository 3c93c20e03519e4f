//! Argon2id case-key derivation and key fingerprints.
//!
//! This module provides:
//! - [`derive`] — derive a 256-bit case key + fingerprint from normalized
//!   metadata and a per-case salt
//! - [`Argon2Params`] — serializable cost parameters, with [`KdfPreset`]
//!   tiers
//! - [`Salt`] / [`Fingerprint`] — the non-secret half of a case record
//!
//! # Asymmetry
//!
//! The derivation is deliberately slow and memory-hard. Legitimate
//! recovery (discovery) searches a small, known candidate space; an
//! attacker without salt + metadata faces an unbounded one at the same
//! per-guess cost. The fingerprint is a separate one-way BLAKE3 pass over
//! the key, so publishing it never narrows the key search.

use crate::error::LokiError;
use crate::memory::{KeyMaterial, KEY_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Per-case salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Fingerprint length in bytes.
pub const FINGERPRINT_LEN: usize = 16;

/// Domain-separation context for the fingerprint pass. Changing this (or
/// any fixed size above) is a container format version bump.
const FINGERPRINT_CONTEXT: &str = "loki-core v1 case-key fingerprint";

/// 256 MiB in KiB.
const MEMORY_256MB: u32 = 262_144;

/// 64 MiB in KiB.
const MEMORY_64MB: u32 = 65_536;

// ---------------------------------------------------------------------------
// Non-secret value types
// ---------------------------------------------------------------------------

/// Per-case random salt.
///
/// Sampled once per case by the generator and never regenerated for that
/// case. Non-secret: distributed in the clear alongside the fingerprint
/// and embedded in every container — but never guessed by discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    /// Wrap raw salt bytes (e.g. read back from a container).
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw salt bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }

    /// Sample a fresh salt from the supplied CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::SecureMemory`] if the generator fails.
    pub fn sample<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Result<Self, LokiError> {
        let mut bytes = [0u8; SALT_LEN];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|e| LokiError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
        Ok(Self(bytes))
    }
}

/// Short, non-secret, one-way reduction of a case key.
///
/// Safe to transmit in the clear; used only for equality checks during
/// discovery and as a container hint. Equality is constant-time so a
/// discovery loop leaks nothing about how close a candidate came.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Wrap raw fingerprint bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw fingerprint bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Fingerprint {}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

// ---------------------------------------------------------------------------
// Cost parameters
// ---------------------------------------------------------------------------

/// Argon2id parameter set.
///
/// Fields use the `argon2` crate convention:
/// - `m_cost`: memory in KiB (NOT bytes, NOT MB)
/// - `t_cost`: number of iterations
/// - `p_cost`: degree of parallelism
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Params {
    /// Memory cost in kibibytes.
    pub m_cost: u32,
    /// Number of iterations (time cost).
    pub t_cost: u32,
    /// Degree of parallelism (lanes).
    pub p_cost: u32,
}

/// KDF cost tier.
///
/// Discovery runs one derivation per candidate, so the per-derivation
/// budget bounds how large a search space stays practical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfPreset {
    /// Discovery-friendly tier (~100 ms per derivation on commodity
    /// hardware): 64 MiB, 2 iterations.
    Interactive,
    /// Generation/at-rest tier for small or no search spaces: 256 MiB,
    /// 3 iterations.
    Hardened,
}

impl KdfPreset {
    /// The cost parameters for this tier.
    #[must_use]
    pub const fn params(self) -> Argon2Params {
        match self {
            Self::Interactive => Argon2Params {
                m_cost: MEMORY_64MB,
                t_cost: 2,
                p_cost: 4,
            },
            Self::Hardened => Argon2Params {
                m_cost: MEMORY_256MB,
                t_cost: 3,
                p_cost: 4,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derive a case key and its fingerprint from normalized metadata and a
/// per-case salt using Argon2id (v0x13).
///
/// Deterministic: identical `(normalized, salt, params)` always yields a
/// byte-identical key and fingerprint. Malformed metadata never reaches
/// this function — the normalizer rejects it upstream.
///
/// # Errors
///
/// Returns [`LokiError::Derivation`] only on resource failure: invalid
/// cost parameters or inability to allocate the memory-hard working set.
pub fn derive(
    normalized: &[u8],
    salt: &Salt,
    params: &Argon2Params,
) -> Result<(KeyMaterial, Fingerprint), LokiError> {
    let argon_params = argon2::Params::new(
        params.m_cost,
        params.t_cost,
        params.p_cost,
        Some(KEY_LEN),
    )
    .map_err(|e| LokiError::Derivation(format!("invalid argon2 params: {e}")))?;

    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(normalized, salt.as_bytes(), &mut output)
        .map_err(|e| LokiError::Derivation(format!("argon2id derivation failed: {e}")))?;

    let key = KeyMaterial::new(output);
    output.zeroize();
    let fingerprint = fingerprint_of(&key);
    Ok((key, fingerprint))
}

/// Compute the fingerprint of a case key.
///
/// BLAKE3 `derive_key` under a fixed domain-separation context, truncated
/// to [`FINGERPRINT_LEN`] bytes — a one-way pass by a different primitive
/// than the KDF, never invertible back to key bytes.
#[must_use]
pub fn fingerprint_of(key: &KeyMaterial) -> Fingerprint {
    let mut digest = blake3::derive_key(FINGERPRINT_CONTEXT, key.expose());
    let mut short = [0u8; FINGERPRINT_LEN];
    short.copy_from_slice(&digest[..FINGERPRINT_LEN]);
    digest.zeroize();
    Fingerprint::from_bytes(short)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
