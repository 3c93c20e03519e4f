//! Secret-holding memory types.
//!
//! Key material and decrypted plaintext live in wrappers that:
//! - Zero their contents on drop via [`zeroize`]
//! - Lock pages in RAM via `mlock` so secrets are not swapped to disk
//! - Mask `Debug`/`Display` output so secrets never reach a log line
//!
//! Duplicating a key is always explicit ([`KeyMaterial::copy`]) so every
//! place key bytes fan out is visible at the call site.

use crate::error::LokiError;
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Case key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Platform-specific memory locking
// ---------------------------------------------------------------------------

/// RAII guard that unlocks a locked memory region on drop.
///
/// Locks the region via `mlock` on creation; `munlock`s it on drop. If
/// `mlock` fails (privileges, RLIMIT_MEMLOCK quota) the region is simply
/// not locked — zeroize-on-drop is the guarantee that never degrades.
pub struct LockedRegion {
    ptr: *const u8,
    len: usize,
    locked: bool,
}

// SAFETY: The pointer is only handed to mlock/munlock system calls, which
// are thread-safe. The pointed-to data is owned by KeyMaterial/SecretBuffer
// and is never read through LockedRegion.
unsafe impl Send for LockedRegion {}
unsafe impl Sync for LockedRegion {}

impl LockedRegion {
    /// Attempt to lock a memory region.
    ///
    /// `pub(crate)` because callers must guarantee pointer validity for the
    /// guard's lifetime; external consumers go through [`KeyMaterial`] and
    /// [`SecretBuffer`], which manage locking internally.
    #[must_use]
    pub(crate) fn try_lock(ptr: *const u8, len: usize) -> Self {
        let locked = platform::try_mlock(ptr, len);
        if !locked && len > 0 {
            static WARNED: std::sync::Once = std::sync::Once::new();
            WARNED.call_once(|| {
                tracing::warn!(
                    "mlock failed — key material may be swapped to disk; \
                     consider raising RLIMIT_MEMLOCK"
                );
            });
        }
        Self { ptr, len, locked }
    }

    /// Returns `true` if the region is currently locked.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    const fn unlocked() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
            locked: false,
        }
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        if self.locked {
            platform::try_munlock(self.ptr, self.len);
        }
    }
}

// ---------------------------------------------------------------------------
// KeyMaterial — fixed-length case key
// ---------------------------------------------------------------------------

/// A 256-bit case key.
///
/// Zeroized on drop, `mlock`'d best-effort, masked in `Debug`/`Display`.
/// Equality is constant-time. There is no `Clone` impl: duplication goes
/// through [`KeyMaterial::copy`] so it is deliberate, and holders remain
/// responsible for letting each copy drop (and zero) when done.
///
/// **Note on `mlock`:** the region is locked at the construction-time
/// address. If the value is moved, `munlock` on the stale address is a
/// safe no-op; zeroize-on-drop is independent of lock status.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_LEN],
    #[zeroize(skip)]
    lock: LockedRegion,
}

impl KeyMaterial {
    /// Wrap a raw 256-bit key. The caller should zeroize its source copy.
    #[must_use]
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        // Two-phase init: the lock must reference `bytes` at its final
        // address inside the struct, not the parameter's stack slot.
        let mut key = Self {
            bytes,
            lock: LockedRegion::unlocked(),
        };
        key.lock = LockedRegion::try_lock(key.bytes.as_ptr(), KEY_LEN);
        key
    }

    /// Expose the raw key bytes for a cryptographic operation.
    ///
    /// Keep the borrow short-lived — prefer using it within a single
    /// expression over binding it to a long-lived variable.
    #[must_use]
    pub const fn expose(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Deliberately duplicate the key, e.g. to hand one copy to the
    /// encryptor while retaining the other.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self::new(self.bytes)
    }

    /// Returns `true` if the underlying memory is `mlock`'d.
    #[must_use]
    pub const fn is_mlocked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.ct_eq(&other.bytes).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(***)")
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretBuffer — variable-length plaintext
// ---------------------------------------------------------------------------

/// Variable-length buffer for sensitive data (decrypted case material).
///
/// Wraps [`SecretSlice<u8>`] from the `secrecy` crate, adding best-effort
/// `mlock` and masked `Debug` output. Zeroized on drop.
pub struct SecretBuffer {
    inner: SecretSlice<u8>,
    lock: LockedRegion,
}

impl SecretBuffer {
    /// Copy `data` into a new zeroizing allocation.
    ///
    /// The caller should zeroize the source after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::SecureMemory`] if allocation fails.
    pub fn new(data: &[u8]) -> Result<Self, LokiError> {
        let inner: SecretSlice<u8> = data.to_vec().into();
        let exposed = inner.expose_secret();
        let lock = LockedRegion::try_lock(exposed.as_ptr(), exposed.len());
        Ok(Self { inner, lock })
    }

    /// Expose the underlying bytes. Use sparingly.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    /// Number of bytes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    /// Returns `true` if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the underlying memory is `mlock`'d.
    #[must_use]
    pub const fn is_mlocked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

impl fmt::Display for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

// ---------------------------------------------------------------------------
// Core dump disabling
// ---------------------------------------------------------------------------

/// Disable core dumps for the current process.
///
/// On Unix: sets `RLIMIT_CORE` to 0 (soft and hard). Elsewhere: no-op.
/// The dispatch shell should call this once at startup before any key
/// material is derived.
///
/// # Errors
///
/// Returns [`LokiError::SecureMemory`] if the `setrlimit` call fails.
pub fn disable_core_dumps() -> Result<(), LokiError> {
    platform::disable_core_dumps_impl()
}

// ---------------------------------------------------------------------------
// Platform-specific implementations
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod platform {
    use crate::error::LokiError;

    pub(super) fn try_mlock(ptr: *const u8, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        // SAFETY: mlock accepts any valid pointer/length pair; an invalid
        // region yields ENOMEM, which we surface as "not locked".
        unsafe { libc::mlock(ptr.cast(), len) == 0 }
    }

    pub(super) fn try_munlock(ptr: *const u8, len: usize) {
        if len == 0 {
            return;
        }
        // SAFETY: munlock failure is non-critical.
        unsafe {
            libc::munlock(ptr.cast(), len);
        }
    }

    pub(super) fn disable_core_dumps_impl() -> Result<(), LokiError> {
        let limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: setrlimit with RLIMIT_CORE is a standard POSIX call.
        let ret = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) };
        if ret != 0 {
            return Err(LokiError::SecureMemory(
                "failed to disable core dumps via RLIMIT_CORE".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use crate::error::LokiError;

    pub(super) fn try_mlock(_ptr: *const u8, _len: usize) -> bool {
        false
    }

    pub(super) fn try_munlock(_ptr: *const u8, _len: usize) {}

    pub(super) fn disable_core_dumps_impl() -> Result<(), LokiError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
