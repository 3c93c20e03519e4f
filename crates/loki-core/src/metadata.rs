//! Case metadata and canonical normalization.
//!
//! This module provides:
//! - [`CaseMetadata`] — the four attributes that identify and protect a case
//! - [`CaseMetadata::normalize`] — the canonical byte encoding fed to the
//!   key deriver
//!
//! # Canonical Encoding
//!
//! Attributes are emitted in fixed lexical order by attribute name
//! (`case_date`, `case_id`, `operator_tag`, `secret_phrase`), each as
//! `name_len (u32 LE) || name || value_len (u32 LE) || value` with UTF-8
//! bytes and dates rendered `YYYY-MM-DD`. Two metadata sets with identical
//! values therefore normalize identically regardless of how they were
//! constructed, and the length prefixes make the encoding unambiguous
//! (no concatenation of adjacent values can collide).
//!
//! Content is never trimmed or case-folded: `" ALFA"` and `"ALFA"` are
//! different operator tags and derive different keys. Silently rewriting
//! an attribute would silently change the derived key.

use crate::error::LokiError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Date rendering used by the canonical encoding.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// The attributes protecting one case.
///
/// Every attribute must be present and non-empty before normalization.
/// `secret_phrase` is the only attribute treated as confidential, but the
/// full normalized encoding is handled as secret because it embeds it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMetadata {
    /// Case identifier, e.g. `"CASE-17"`.
    pub case_id: String,
    /// Date the case was opened.
    pub case_date: NaiveDate,
    /// Tag of the operator who opened the case, e.g. `"ALFA"`.
    pub operator_tag: String,
    /// Free-form phrase shared out-of-band with authorized operators.
    pub secret_phrase: String,
}

impl CaseMetadata {
    /// Canonicalize this metadata into the byte sequence fed to the
    /// key deriver. Total and deterministic; no side effects.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::InvalidMetadata`] when a string attribute is
    /// empty. (`case_date` is always present by construction.)
    pub fn normalize(&self) -> Result<Zeroizing<Vec<u8>>, LokiError> {
        self.validate()?;

        let date = self.case_date.format(DATE_FORMAT).to_string();
        // Lexical order by attribute name — fixed, documented, load-bearing.
        let fields: [(&str, &str); 4] = [
            ("case_date", date.as_str()),
            ("case_id", self.case_id.as_str()),
            ("operator_tag", self.operator_tag.as_str()),
            ("secret_phrase", self.secret_phrase.as_str()),
        ];

        let mut out = Zeroizing::new(Vec::new());
        for (name, value) in fields {
            push_field(&mut out, name.as_bytes())?;
            push_field(&mut out, value.as_bytes())?;
        }
        Ok(out)
    }

    /// Check that every attribute is present and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::InvalidMetadata`] naming the offending
    /// attribute.
    pub fn validate(&self) -> Result<(), LokiError> {
        for (name, value) in [
            ("case_id", &self.case_id),
            ("operator_tag", &self.operator_tag),
            ("secret_phrase", &self.secret_phrase),
        ] {
            if value.is_empty() {
                return Err(LokiError::InvalidMetadata(format!(
                    "attribute `{name}` must be non-empty"
                )));
            }
        }
        Ok(())
    }
}

/// Append `len (u32 LE) || bytes` to the encoding.
fn push_field(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), LokiError> {
    let len: u32 = u32::try_from(bytes.len()).map_err(|_| {
        LokiError::InvalidMetadata("attribute exceeds u32 length limit".into())
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
