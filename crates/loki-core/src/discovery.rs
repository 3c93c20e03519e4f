//! Key discovery — deterministic, cancellable exhaustive search.
//!
//! Given a target fingerprint, the case's stored salt, and a bounded
//! space of metadata guesses, [`discover`] rederives candidate keys until
//! one's fingerprint matches. The salt is never guessed — it travels in
//! the clear with the fingerprint — so the search space is exactly the
//! Cartesian product of the unknown attributes' candidate sequences.
//!
//! # Determinism
//!
//! Candidates are linearized in a fixed order: attributes nest
//! outer-to-inner in canonical attribute order (`case_date`, `case_id`,
//! `operator_tag`, `secret_phrase`), each axis in its declared candidate
//! order (chronological for date ranges). Workers race over disjoint
//! slices of that index space, but aggregation keeps the lowest matching
//! index, so the recovered key is the same under any thread scheduling.
//!
//! # Cost model
//!
//! The search is exhaustive — no pruning beyond exact fingerprint match.
//! Derivation cost dominates, and partial-fingerprint shortcuts would
//! weaken the security margin. Fingerprints are compared in constant
//! time. Cancellation and deadline are checked between candidate
//! evaluations, never mid-derivation.

use crate::error::LokiError;
use crate::kdf::{self, Argon2Params, Fingerprint, Salt};
use crate::memory::KeyMaterial;
use crate::metadata::CaseMetadata;
use chrono::NaiveDate;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A metadata template with known attributes fixed and unknowns marked.
///
/// `None` marks an attribute as unknown; its candidates come from the
/// [`SearchSpace`]. Candidates supplied for a known attribute are ignored.
#[derive(Clone, Debug, Default)]
pub struct MetadataTemplate {
    /// Known case identifier, or `None` to search `SearchSpace::case_ids`.
    pub case_id: Option<String>,
    /// Known case date, or `None` to search `SearchSpace::case_dates`.
    pub case_date: Option<NaiveDate>,
    /// Known operator tag, or `None` to search `SearchSpace::operator_tags`.
    pub operator_tag: Option<String>,
    /// Known secret phrase, or `None` to search `SearchSpace::secret_phrases`.
    pub secret_phrase: Option<String>,
}

/// Finite, ordered candidate sequences for the unknown attributes.
///
/// Order matters: it defines which of several hypothetical matches would
/// be recovered first, and it is part of the reproducibility contract.
#[derive(Clone, Debug, Default)]
pub struct SearchSpace {
    /// Candidate case identifiers, in declaration order.
    pub case_ids: Vec<String>,
    /// Candidate case dates, in declaration order (use [`dates_between`]
    /// for a chronological range).
    pub case_dates: Vec<NaiveDate>,
    /// Candidate operator tags, in declaration order.
    pub operator_tags: Vec<String>,
    /// Candidate secret phrases (wordlist), in declaration order.
    pub secret_phrases: Vec<String>,
}

/// Enumerate every date from `start` through `end`, inclusive,
/// chronologically. Empty when `start > end`.
#[must_use]
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Cooperative cancellation handle for a running discovery.
///
/// Clone it, hand one clone to `discover` via [`DiscoveryOptions`], and
/// call [`CancelToken::cancel`] from any thread to stop the search. A
/// cancelled search that has not found a match reports
/// [`LokiError::KeyNotFound`] — never a partial or wrong answer.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Tuning and control knobs for [`discover`].
#[derive(Clone, Debug)]
pub struct DiscoveryOptions {
    /// Number of worker threads. Defaults to available parallelism.
    pub workers: NonZeroUsize,
    /// Abandon the search after this long. `None` = no deadline.
    pub timeout: Option<Duration>,
    /// External cancellation handle.
    pub cancel: Option<CancelToken>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::MIN),
            timeout: None,
            cancel: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate enumeration
// ---------------------------------------------------------------------------

/// Resolved search plan: one candidate vector per attribute, known
/// attributes reduced to a single-element axis.
struct Plan {
    dates: Vec<NaiveDate>,
    ids: Vec<String>,
    tags: Vec<String>,
    phrases: Vec<String>,
    total: usize,
}

impl Plan {
    fn build(template: &MetadataTemplate, space: &SearchSpace) -> Result<Self, LokiError> {
        let dates = template
            .case_date
            .map_or_else(|| space.case_dates.clone(), |d| vec![d]);
        let ids = template
            .case_id
            .clone()
            .map_or_else(|| space.case_ids.clone(), |v| vec![v]);
        let tags = template
            .operator_tag
            .clone()
            .map_or_else(|| space.operator_tags.clone(), |v| vec![v]);
        let phrases = template
            .secret_phrase
            .clone()
            .map_or_else(|| space.secret_phrases.clone(), |v| vec![v]);

        let total = dates
            .len()
            .checked_mul(ids.len())
            .and_then(|n| n.checked_mul(tags.len()))
            .and_then(|n| n.checked_mul(phrases.len()))
            .ok_or_else(|| {
                LokiError::InvalidMetadata("search space size overflows usize".into())
            })?;

        Ok(Self {
            dates,
            ids,
            tags,
            phrases,
            total,
        })
    }

    /// Materialize the candidate at linear index `idx`.
    ///
    /// Mixed-radix decomposition, `case_date` outermost and
    /// `secret_phrase` innermost.
    #[allow(clippy::arithmetic_side_effects)] // axis lengths are non-zero whenever total > 0
    fn candidate(&self, idx: usize) -> CaseMetadata {
        let n_phrase = self.phrases.len();
        let n_tag = self.tags.len();
        let n_id = self.ids.len();

        let i_phrase = idx % n_phrase;
        let rest = idx / n_phrase;
        let i_tag = rest % n_tag;
        let rest = rest / n_tag;
        let i_id = rest % n_id;
        let i_date = rest / n_id;

        CaseMetadata {
            case_id: self.ids[i_id].clone(),
            case_date: self.dates[i_date],
            operator_tag: self.tags[i_tag].clone(),
            secret_phrase: self.phrases[i_phrase].clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Shared state between discovery workers.
struct Shared {
    /// Next unclaimed candidate index. Claimed indices are contiguous
    /// from zero, which is what makes lowest-index aggregation complete.
    next: AtomicUsize,
    /// Lowest matching index found so far (`usize::MAX` = none).
    best_idx: AtomicUsize,
    /// The key belonging to `best_idx`.
    best_key: Mutex<Option<(usize, KeyMaterial)>>,
    /// First derivation error; aborts the search.
    error: Mutex<Option<LokiError>>,
    failed: AtomicBool,
}

/// Recover a case key by exhaustive search over a bounded guess space.
///
/// Derives with the *stored* `salt` for every candidate assignment of the
/// template's unknown attributes and compares the resulting fingerprint
/// to `target` in constant time. Returns the key of the first match in
/// candidate order, or [`LokiError::KeyNotFound`] after exhausting the
/// space (or being cancelled / timing out without a match).
///
/// # Errors
///
/// - [`LokiError::KeyNotFound`] — no candidate matched.
/// - [`LokiError::InvalidMetadata`] — a candidate was malformed (e.g. an
///   empty wordlist entry) or the space size overflowed.
/// - [`LokiError::Derivation`] — Argon2id resource failure.
pub fn discover(
    target: &Fingerprint,
    salt: &Salt,
    template: &MetadataTemplate,
    space: &SearchSpace,
    params: &Argon2Params,
    options: &DiscoveryOptions,
) -> Result<KeyMaterial, LokiError> {
    let plan = Plan::build(template, space)?;
    if plan.total == 0 {
        tracing::debug!("discovery space is empty");
        return Err(LokiError::KeyNotFound);
    }

    let workers = options.workers.get().min(plan.total);
    let deadline = options.timeout.and_then(|t| Instant::now().checked_add(t));
    tracing::debug!(candidates = plan.total, workers, "discovery started");

    let shared = Shared {
        next: AtomicUsize::new(0),
        best_idx: AtomicUsize::new(usize::MAX),
        best_key: Mutex::new(None),
        error: Mutex::new(None),
        failed: AtomicBool::new(false),
    };

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                run_worker(
                    &shared,
                    &plan,
                    target,
                    salt,
                    params,
                    options.cancel.as_ref(),
                    deadline,
                );
            });
        }
    });

    let found = shared
        .best_key
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some((idx, key)) = found {
        tracing::debug!(index = idx, "discovery matched");
        return Ok(key);
    }
    let error = shared
        .error
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(err) = error {
        return Err(err);
    }
    tracing::debug!("discovery exhausted or cancelled without a match");
    Err(LokiError::KeyNotFound)
}

/// Claim-and-evaluate loop run by each worker thread.
///
/// Flags are checked between candidate evaluations, never mid-derivation.
/// A worker stops once its next claimed index can no longer beat the best
/// match on record; in-flight lower indices always finish, so the final
/// answer is the lowest matching index regardless of scheduling.
fn run_worker(
    shared: &Shared,
    plan: &Plan,
    target: &Fingerprint,
    salt: &Salt,
    params: &Argon2Params,
    cancel: Option<&CancelToken>,
    deadline: Option<Instant>,
) {
    loop {
        if shared.failed.load(Ordering::Acquire) {
            return;
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return;
        }

        let idx = shared.next.fetch_add(1, Ordering::Relaxed);
        if idx >= plan.total {
            return;
        }
        // Claimed indices only grow, so nothing below best_idx remains
        // unclaimed once we pass it.
        if idx >= shared.best_idx.load(Ordering::Acquire) {
            return;
        }

        match evaluate(plan, idx, target, salt, params) {
            Ok(Some(key)) => {
                shared.best_idx.fetch_min(idx, Ordering::AcqRel);
                let mut best = shared
                    .best_key
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if best.as_ref().is_none_or(|(held, _)| idx < *held) {
                    *best = Some((idx, key));
                }
            }
            Ok(None) => {}
            Err(err) => {
                let mut slot = shared
                    .error
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(err);
                }
                shared.failed.store(true, Ordering::Release);
                return;
            }
        }
    }
}

/// Derive candidate `idx` and compare its fingerprint to the target.
fn evaluate(
    plan: &Plan,
    idx: usize,
    target: &Fingerprint,
    salt: &Salt,
    params: &Argon2Params,
) -> Result<Option<KeyMaterial>, LokiError> {
    let candidate = plan.candidate(idx);
    let normalized = candidate.normalize()?;
    let (key, fingerprint) = kdf::derive(&normalized, salt, params)?;
    // Fingerprint PartialEq is constant-time (subtle).
    if fingerprint == *target {
        Ok(Some(key))
    } else {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::CaseMetadata;

    const TEST_PARAMS: Argon2Params = Argon2Params {
        m_cost: 32,
        t_cost: 1,
        p_cost: 1,
    };

    const TEST_SALT: Salt = Salt::from_bytes(*b"discovery_salt_!");

    fn truth() -> CaseMetadata {
        CaseMetadata {
            case_id: "CASE-17".into(),
            case_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            operator_tag: "ALFA".into(),
            secret_phrase: "bluefox".into(),
        }
    }

    fn target() -> (KeyMaterial, Fingerprint) {
        let normalized = truth().normalize().unwrap();
        kdf::derive(&normalized, &TEST_SALT, &TEST_PARAMS).unwrap()
    }

    fn one_worker() -> DiscoveryOptions {
        DiscoveryOptions {
            workers: NonZeroUsize::MIN,
            ..DiscoveryOptions::default()
        }
    }

    #[test]
    fn recovers_key_from_phrase_wordlist() {
        let (key, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            secret_phrases: vec!["greenfox".into(), "bluefox".into(), "redfox".into()],
            ..SearchSpace::default()
        };
        let recovered = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &space,
            &TEST_PARAMS,
            &one_worker(),
        )
        .expect("true phrase is in the wordlist");
        assert_eq!(recovered, key);
    }

    #[test]
    fn recovers_key_over_two_unknown_axes() {
        let (key, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: None,
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            case_dates: dates_between(
                NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
            ),
            secret_phrases: vec!["redfox".into(), "bluefox".into()],
            ..SearchSpace::default()
        };
        let opts = DiscoveryOptions {
            workers: NonZeroUsize::new(4).unwrap(),
            ..DiscoveryOptions::default()
        };
        let recovered = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &space,
            &TEST_PARAMS,
            &opts,
        )
        .expect("true assignment is in the product");
        assert_eq!(recovered, key);
    }

    #[test]
    fn excluded_truth_yields_key_not_found() {
        let (_, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            secret_phrases: vec!["redfox".into(), "greenfox".into()],
            ..SearchSpace::default()
        };
        let err = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &space,
            &TEST_PARAMS,
            &one_worker(),
        )
        .expect_err("truth is not in the space");
        assert!(matches!(err, LokiError::KeyNotFound));
    }

    #[test]
    fn wrong_salt_never_false_positives() {
        let (_, fingerprint) = target();
        let other_salt = Salt::from_bytes(*b"a_different_salt");
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            secret_phrases: vec!["bluefox".into()],
            ..SearchSpace::default()
        };
        let err = discover(
            &fingerprint,
            &other_salt,
            &template,
            &space,
            &TEST_PARAMS,
            &one_worker(),
        )
        .expect_err("derivation under a different salt cannot match");
        assert!(matches!(err, LokiError::KeyNotFound));
    }

    #[test]
    fn empty_space_for_unknown_attribute_is_not_found() {
        let (_, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let err = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &SearchSpace::default(),
            &TEST_PARAMS,
            &one_worker(),
        )
        .expect_err("no candidates to try");
        assert!(matches!(err, LokiError::KeyNotFound));
    }

    #[test]
    fn fully_known_template_is_a_single_candidate_search() {
        let (key, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: Some("bluefox".into()),
        };
        let recovered = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &SearchSpace::default(),
            &TEST_PARAMS,
            &one_worker(),
        )
        .expect("single candidate matches");
        assert_eq!(recovered, key);
    }

    #[test]
    fn pre_cancelled_token_reports_not_found() {
        let (_, fingerprint) = target();
        let cancel = CancelToken::new();
        cancel.cancel();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            secret_phrases: vec!["bluefox".into()],
            ..SearchSpace::default()
        };
        let opts = DiscoveryOptions {
            workers: NonZeroUsize::MIN,
            timeout: None,
            cancel: Some(cancel),
        };
        let err = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &space,
            &TEST_PARAMS,
            &opts,
        )
        .expect_err("cancelled before any candidate");
        assert!(matches!(err, LokiError::KeyNotFound));
    }

    #[test]
    fn expired_deadline_reports_not_found() {
        let (_, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            secret_phrases: vec!["bluefox".into()],
            ..SearchSpace::default()
        };
        let opts = DiscoveryOptions {
            workers: NonZeroUsize::MIN,
            timeout: Some(Duration::ZERO),
            cancel: None,
        };
        let err = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &space,
            &TEST_PARAMS,
            &opts,
        )
        .expect_err("deadline already passed");
        assert!(matches!(err, LokiError::KeyNotFound));
    }

    #[test]
    fn empty_wordlist_entry_surfaces_invalid_metadata() {
        let (_, fingerprint) = target();
        let template = MetadataTemplate {
            case_id: Some("CASE-17".into()),
            case_date: Some(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            operator_tag: Some("ALFA".into()),
            secret_phrase: None,
        };
        let space = SearchSpace {
            secret_phrases: vec![String::new()],
            ..SearchSpace::default()
        };
        let err = discover(
            &fingerprint,
            &TEST_SALT,
            &template,
            &space,
            &TEST_PARAMS,
            &one_worker(),
        )
        .expect_err("empty candidate is malformed metadata");
        assert!(matches!(err, LokiError::InvalidMetadata(_)));
    }

    #[test]
    fn dates_between_is_inclusive_and_chronological() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let dates = dates_between(start, end);
        assert_eq!(dates.len(), 4); // leap year: 28, 29 Feb, 1, 2 Mar
        assert_eq!(dates.first(), Some(&start));
        assert_eq!(dates.last(), Some(&end));
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn dates_between_reversed_range_is_empty() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(dates_between(start, end).is_empty());
    }

    #[test]
    fn plan_enumerates_dates_outermost_phrases_innermost() {
        let template = MetadataTemplate::default();
        let space = SearchSpace {
            case_ids: vec!["A".into()],
            case_dates: vec![
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            ],
            operator_tags: vec!["OP".into()],
            secret_phrases: vec!["x".into(), "y".into()],
        };
        let plan = Plan::build(&template, &space).unwrap();
        assert_eq!(plan.total, 4);
        // Phrase cycles fastest, date slowest.
        assert_eq!(plan.candidate(0).secret_phrase, "x");
        assert_eq!(plan.candidate(1).secret_phrase, "y");
        assert_eq!(
            plan.candidate(1).case_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            plan.candidate(2).case_date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }
}
