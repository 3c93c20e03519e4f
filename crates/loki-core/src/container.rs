//! Tamper-evident case containers — AES-256-GCM over a versioned wire
//! format.
//!
//! This module provides:
//! - [`seal`] — encrypt case material under a case key into a [`Container`]
//! - [`open`] — verify and decrypt a container, failing closed
//! - [`Container::to_bytes`] / [`Container::from_bytes`] — the versioned,
//!   self-delimiting wire format
//!
//! # Wire Layout (version 1)
//!
//! ```text
//! Magic "LOKI" (4) | version u8 | salt (16) | fingerprint (16) |
//! nonce (12) | aad_len u32 LE | aad | ct_len u32 LE | ciphertext | tag (16)
//! ```
//!
//! The embedded salt and fingerprint are the non-secret hints a recipient
//! without the key feeds to discovery. Salt, nonce, and tag lengths are
//! fixed per version; changing any of them (or the KDF parameters they
//! pair with) bumps the version byte rather than silently breaking old
//! containers. An unknown version is rejected before anything past the
//! version byte is parsed.

use crate::error::LokiError;
use crate::kdf::{Fingerprint, Salt, FINGERPRINT_LEN, SALT_LEN};
use crate::memory::{KeyMaterial, SecretBuffer};
use rand::{CryptoRng, RngCore};
use ring::aead;
use zeroize::Zeroize;

/// Magic bytes identifying a LOKI container.
pub const MAGIC: &[u8; 4] = b"LOKI";

/// Current container format version.
pub const FORMAT_VERSION: u8 = 1;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Length of a u32 length prefix.
const LEN_PREFIX: usize = 4;

/// Fixed-size portion of the wire format: everything but aad + ciphertext.
const FIXED_LEN: usize =
    MAGIC.len() + 1 + SALT_LEN + FINGERPRINT_LEN + NONCE_LEN + LEN_PREFIX + LEN_PREFIX + TAG_LEN;

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// A sealed case: versioned, self-describing, tamper-evident.
///
/// Persists indefinitely as opaque bytes between [`seal`] and [`open`];
/// the core hands the bytes to the dispatch shell for disk I/O.
#[must_use = "sealed containers must be stored or transmitted"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    /// Wire format version.
    pub version: u8,
    /// The case's salt — lets a keyless recipient run discovery.
    pub salt: Salt,
    /// Fingerprint of the sealing key — discovery's target.
    pub fingerprint: Fingerprint,
    /// 96-bit random nonce, unique per seal.
    pub nonce: [u8; NONCE_LEN],
    /// Associated data: authenticated, not encrypted. May be empty.
    pub aad: Vec<u8>,
    /// Encrypted case material (same length as the plaintext).
    pub ciphertext: Vec<u8>,
    /// 128-bit authentication tag over nonce, ciphertext, and aad.
    pub tag: [u8; TAG_LEN],
}

impl Container {
    /// Serialize to the versioned wire format.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::ContainerFormat`] if `aad` or `ciphertext`
    /// exceeds the u32 length limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LokiError> {
        let aad_len: u32 = u32::try_from(self.aad.len())
            .map_err(|_| LokiError::ContainerFormat("aad too large for u32 length".into()))?;
        let ct_len: u32 = u32::try_from(self.ciphertext.len()).map_err(|_| {
            LokiError::ContainerFormat("ciphertext too large for u32 length".into())
        })?;

        let capacity = FIXED_LEN
            .checked_add(self.aad.len())
            .and_then(|n| n.checked_add(self.ciphertext.len()))
            .ok_or_else(|| LokiError::ContainerFormat("container size overflow".into()))?;

        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(MAGIC);
        out.push(self.version);
        out.extend_from_slice(self.salt.as_bytes());
        out.extend_from_slice(self.fingerprint.as_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&aad_len.to_le_bytes());
        out.extend_from_slice(&self.aad);
        out.extend_from_slice(&ct_len.to_le_bytes());
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        Ok(out)
    }

    /// Parse a container from wire bytes.
    ///
    /// The version byte is checked before anything else is read: an
    /// unknown version is [`LokiError::UnsupportedFormat`], never a
    /// best-effort parse.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::ContainerFormat`] for structural damage
    /// (truncation, bad magic, length fields past the end) and
    /// [`LokiError::UnsupportedFormat`] for an unknown version.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LokiError> {
        if data.len() < FIXED_LEN {
            return Err(LokiError::ContainerFormat(format!(
                "container too short: {} bytes (minimum {FIXED_LEN})",
                data.len()
            )));
        }
        if &data[..MAGIC.len()] != MAGIC.as_slice() {
            return Err(LokiError::ContainerFormat("invalid magic bytes".into()));
        }

        let mut cursor = MAGIC.len();
        let version = data[cursor];
        cursor = cursor.saturating_add(1);
        if version != FORMAT_VERSION {
            return Err(LokiError::UnsupportedFormat { version });
        }

        let salt = Salt::from_bytes(read_array::<SALT_LEN>(data, &mut cursor)?);
        let fingerprint = Fingerprint::from_bytes(read_array::<FINGERPRINT_LEN>(data, &mut cursor)?);
        let nonce = read_array::<NONCE_LEN>(data, &mut cursor)?;

        let aad_len = read_u32_le(data, &mut cursor)?;
        let aad = read_slice(data, &mut cursor, aad_len)?.to_vec();

        let ct_len = read_u32_le(data, &mut cursor)?;
        let ciphertext = read_slice(data, &mut cursor, ct_len)?.to_vec();

        let tag = read_array::<TAG_LEN>(data, &mut cursor)?;

        if cursor != data.len() {
            return Err(LokiError::ContainerFormat(format!(
                "trailing bytes after container: {} unexpected",
                data.len().saturating_sub(cursor)
            )));
        }

        Ok(Self {
            version,
            salt,
            fingerprint,
            nonce,
            aad,
            ciphertext,
            tag,
        })
    }
}

// ---------------------------------------------------------------------------
// Seal / open
// ---------------------------------------------------------------------------

/// Encrypt case material under a case key.
///
/// A fresh 96-bit nonce is drawn from the injected CSPRNG on every call;
/// nonce reuse under one key is a fatal confidentiality break for GCM, so
/// uniqueness rides on the generator's birthday bound, which comfortably
/// covers per-case call volumes. The tag authenticates nonce, ciphertext,
/// and `aad`. `salt` and `fingerprint` come from the case's record and
/// are embedded as discovery hints.
///
/// # Errors
///
/// Returns [`LokiError::Encryption`] on AEAD resource failure and
/// [`LokiError::SecureMemory`] if the CSPRNG fails.
pub fn seal<R: RngCore + CryptoRng>(
    key: &KeyMaterial,
    plaintext: &[u8],
    aad: &[u8],
    salt: Salt,
    fingerprint: Fingerprint,
    rng: &mut R,
) -> Result<Container, LokiError> {
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key.expose())
        .map_err(|_| LokiError::Encryption("failed to create AES-256-GCM key".into()))?;
    let sealing_key = aead::LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| LokiError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    // Encrypt in place — the plaintext copy becomes the ciphertext.
    let mut in_out = plaintext.to_vec();
    let Ok(tag) = sealing_key.seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut in_out)
    else {
        in_out.zeroize();
        return Err(LokiError::Encryption("AES-256-GCM seal failed".into()));
    };

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(Container {
        version: FORMAT_VERSION,
        salt,
        fingerprint,
        nonce: nonce_bytes,
        aad: aad.to_vec(),
        ciphertext: in_out,
        tag: tag_bytes,
    })
}

/// Verify and decrypt a container under a candidate key.
///
/// The version gate runs first even for an in-memory container. Tag
/// verification is constant-time inside `ring`; any mismatch — tampered
/// nonce, ciphertext, aad, tag, or a wrong key — is
/// [`LokiError::AuthenticationFailed`], and no plaintext, partial or
/// otherwise, is released on that path.
///
/// # Errors
///
/// Returns [`LokiError::UnsupportedFormat`], [`LokiError::Encryption`]
/// (key setup), [`LokiError::AuthenticationFailed`], or
/// [`LokiError::SecureMemory`].
pub fn open(container: &Container, key: &KeyMaterial) -> Result<SecretBuffer, LokiError> {
    if container.version != FORMAT_VERSION {
        return Err(LokiError::UnsupportedFormat {
            version: container.version,
        });
    }

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key.expose())
        .map_err(|_| LokiError::Encryption("failed to create AES-256-GCM key".into()))?;
    let opening_key = aead::LessSafeKey::new(unbound);
    let nonce = aead::Nonce::assume_unique_for_key(container.nonce);

    // ring wants ciphertext || tag in one buffer.
    let mut ct_tag = Vec::with_capacity(container.ciphertext.len().saturating_add(TAG_LEN));
    ct_tag.extend_from_slice(&container.ciphertext);
    ct_tag.extend_from_slice(&container.tag);

    let Ok(plaintext_slice) =
        opening_key.open_in_place(nonce, aead::Aad::from(container.aad.as_slice()), &mut ct_tag)
    else {
        ct_tag.zeroize();
        return Err(LokiError::AuthenticationFailed);
    };

    let plaintext = SecretBuffer::new(plaintext_slice)?;
    ct_tag.zeroize();
    Ok(plaintext)
}

// ---------------------------------------------------------------------------
// Cursor helpers
// ---------------------------------------------------------------------------

/// Read a fixed-size array at `cursor`, advancing it.
fn read_array<const N: usize>(data: &[u8], cursor: &mut usize) -> Result<[u8; N], LokiError> {
    let slice = read_slice(data, cursor, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// Read `len` bytes at `cursor`, advancing it.
fn read_slice<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], LokiError> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| LokiError::ContainerFormat("length field overflow".into()))?;
    if end > data.len() {
        return Err(LokiError::ContainerFormat(format!(
            "container truncated: need {end} bytes, have {}",
            data.len()
        )));
    }
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

/// Read a u32 length field (little-endian) at `cursor`, advancing it.
fn read_u32_le(data: &[u8], cursor: &mut usize) -> Result<usize, LokiError> {
    let bytes = read_array::<LEN_PREFIX>(data, cursor)?;
    let value = u32::from_le_bytes(bytes);
    usize::try_from(value)
        .map_err(|_| LokiError::ContainerFormat("length field exceeds platform usize".into()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
