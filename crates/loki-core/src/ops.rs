//! The command surface consumed by the dispatch shell.
//!
//! The shell maps an operator-typed command name to one variant of the
//! closed [`Operation`] set, collects its typed arguments, and calls
//! [`execute`]. The shell's only other responsibility is presenting the
//! returned [`Outcome`] or [`crate::LokiError`] kind to the operator —
//! the four operations are opaque functions to it.

use crate::container::{self, Container};
use crate::discovery::{self, DiscoveryOptions, MetadataTemplate, SearchSpace};
use crate::error::LokiError;
use crate::kdf::{Argon2Params, Fingerprint, Salt};
use crate::keygen::{self, CaseRecord};
use crate::memory::{KeyMaterial, SecretBuffer};
use crate::metadata::CaseMetadata;
use rand::{CryptoRng, RngCore};

/// How the decryptor obtains its key: held directly, or recovered by
/// discovery from metadata guesses.
#[derive(Debug)]
pub enum KeySource {
    /// The operator holds the key.
    Key(KeyMaterial),
    /// The key is not held; recover it from the container's embedded
    /// salt + fingerprint and these metadata guesses.
    Metadata {
        /// Known attributes fixed, unknowns marked.
        template: MetadataTemplate,
        /// Candidate sequences for the unknown attributes.
        space: SearchSpace,
        /// Cost parameters the case was generated under.
        params: Argon2Params,
        /// Worker count, timeout, cancellation.
        options: DiscoveryOptions,
    },
}

/// Arguments for [`Operation::Generate`].
#[derive(Debug)]
pub struct GenerateArgs {
    /// Complete metadata for the new case.
    pub metadata: CaseMetadata,
    /// KDF cost parameters to derive under.
    pub params: Argon2Params,
}

/// Arguments for [`Operation::Discover`].
#[derive(Debug)]
pub struct DiscoverArgs {
    /// Fingerprint the recovered key must match.
    pub target: Fingerprint,
    /// The case's stored salt (distributed with the fingerprint).
    pub salt: Salt,
    /// Known attributes fixed, unknowns marked.
    pub template: MetadataTemplate,
    /// Candidate sequences for the unknown attributes.
    pub space: SearchSpace,
    /// Cost parameters the case was generated under.
    pub params: Argon2Params,
    /// Worker count, timeout, cancellation.
    pub options: DiscoveryOptions,
}

/// Arguments for [`Operation::Encrypt`].
#[derive(Debug)]
pub struct EncryptArgs {
    /// The case key to seal under.
    pub key: KeyMaterial,
    /// Case material to protect.
    pub plaintext: Vec<u8>,
    /// Associated data, authenticated but not encrypted. May be empty.
    pub aad: Vec<u8>,
    /// The case's salt, embedded as a discovery hint.
    pub salt: Salt,
    /// The key's fingerprint, embedded as a discovery hint.
    pub fingerprint: Fingerprint,
}

/// Arguments for [`Operation::Decrypt`].
#[derive(Debug)]
pub struct DecryptArgs {
    /// The container to verify and decrypt.
    pub container: Container,
    /// Key held directly, or metadata for discovery.
    pub source: KeySource,
}

/// The closed set of case-key operations.
#[derive(Debug)]
pub enum Operation {
    /// Create a new case key record.
    Generate(GenerateArgs),
    /// Recover a key from a bounded guess space.
    Discover(DiscoverArgs),
    /// Seal case material into a container.
    Encrypt(EncryptArgs),
    /// Verify and decrypt a container.
    Decrypt(DecryptArgs),
}

/// What an operation produced; one variant per [`Operation`].
#[derive(Debug)]
pub enum Outcome {
    /// A fresh case record (key + non-secret half).
    Record(CaseRecord),
    /// A recovered case key.
    Key(KeyMaterial),
    /// A sealed container.
    Sealed(Container),
    /// Decrypted case material.
    Plaintext(SecretBuffer),
}

/// Run one operation to completion, synchronously.
///
/// The CSPRNG is injected by the caller (the shell passes `OsRng`; tests
/// pass a seeded generator) — there is no hidden process-wide source.
///
/// # Errors
///
/// Propagates the operation's typed error unchanged; see
/// [`crate::LokiError`] for the taxonomy the shell presents.
pub fn execute<R: RngCore + CryptoRng>(
    operation: Operation,
    rng: &mut R,
) -> Result<Outcome, LokiError> {
    match operation {
        Operation::Generate(args) => {
            keygen::generate(&args.metadata, &args.params, rng).map(Outcome::Record)
        }
        Operation::Discover(args) => discovery::discover(
            &args.target,
            &args.salt,
            &args.template,
            &args.space,
            &args.params,
            &args.options,
        )
        .map(Outcome::Key),
        Operation::Encrypt(args) => container::seal(
            &args.key,
            &args.plaintext,
            &args.aad,
            args.salt,
            args.fingerprint,
            rng,
        )
        .map(Outcome::Sealed),
        Operation::Decrypt(args) => decrypt(&args.container, args.source).map(Outcome::Plaintext),
    }
}

/// Open a container with a held key or via discovery.
///
/// The container version is checked before anything else — an unknown
/// version is [`LokiError::UnsupportedFormat`], and no key recovery or
/// decryption is attempted for it. With [`KeySource::Metadata`] the
/// container's embedded salt and fingerprint drive the search; a
/// recovered key is used once and then dropped (zeroized).
/// [`LokiError::KeyNotFound`] (space exhausted) and
/// [`LokiError::AuthenticationFailed`] (tampered or wrong-key container)
/// are surfaced distinctly — only the former invites more guesses.
///
/// # Errors
///
/// See [`crate::LokiError`]; no error path releases partial plaintext.
pub fn decrypt(container: &Container, source: KeySource) -> Result<SecretBuffer, LokiError> {
    if container.version != container::FORMAT_VERSION {
        return Err(LokiError::UnsupportedFormat {
            version: container.version,
        });
    }
    match source {
        KeySource::Key(key) => container::open(container, &key),
        KeySource::Metadata {
            template,
            space,
            params,
            options,
        } => {
            let key = discovery::discover(
                &container.fingerprint,
                &container.salt,
                &template,
                &space,
                &params,
                &options,
            )?;
            container::open(container, &key)
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
