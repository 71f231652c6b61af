// crates/pocketbook-sqlite/src/pattern.rs
// ============================================================================
// Module: Pattern Cache
// Description: LRU cache of compiled LIKE/REGEXP matchers plus SQL functions.
// Purpose: Back the UNICODE_LIKE and REGEXP scalar functions.
// Dependencies: lru, regex, rusqlite
// ============================================================================

//! ## Overview
//! `UNICODE_LIKE(pattern, value)` translates a LIKE-style pattern (`%` for any
//! run, `?` for one character) into a case-insensitive, unanchored regular
//! expression. Compiled matchers are cached with least-recently-used
//! eviction; a miss only costs recompilation, never a different answer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use lru::LruCache;
use regex::Regex;
use regex::RegexBuilder;
use rusqlite::Connection;
use rusqlite::functions::Context;
use rusqlite::functions::FunctionFlags;

use crate::config::DEFAULT_PATTERN_CACHE_CAPACITY;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQL name of the LIKE-style matching function.
pub const UNICODE_LIKE_FUNCTION: &str = "UNICODE_LIKE";
/// SQL name of the regular-expression function.
pub const REGEXP_FUNCTION: &str = "REGEXP";

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Bounded cache of compiled matchers.
///
/// # Invariants
/// - Each map holds at most `capacity` entries.
/// - Cached and freshly compiled matchers give identical results.
#[derive(Debug)]
pub struct PatternCache {
    /// LIKE-style pattern text to compiled matcher.
    like: Mutex<LruCache<String, Regex>>,
    /// Raw regular expression text to compiled matcher.
    regexp: Mutex<LruCache<String, Regex>>,
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN_CACHE_CAPACITY)
    }
}

impl PatternCache {
    /// Creates a cache holding up to `capacity` patterns per function.
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            like: Mutex::new(LruCache::new(capacity)),
            regexp: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Matches `value` against a LIKE-style `pattern`.
    ///
    /// A missing or empty pattern never matches; a missing value is treated
    /// as the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] when the translated pattern exceeds regex
    /// compile limits.
    pub fn unicode_like(
        &self,
        pattern: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool, regex::Error> {
        let Some(pattern) = pattern.filter(|pattern| !pattern.is_empty()) else {
            return Ok(false);
        };
        let matcher = cached(&self.like, pattern, compile_like_pattern)?;
        Ok(matcher.is_match(value.unwrap_or_default()))
    }

    /// Tests `text` against the regular expression `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] when `pattern` is not a valid expression.
    pub fn regexp(&self, pattern: &str, text: Option<&str>) -> Result<bool, regex::Error> {
        let matcher = cached(&self.regexp, pattern, Regex::new)?;
        Ok(matcher.is_match(text.unwrap_or_default()))
    }

    /// Returns the number of cached LIKE-style matchers.
    #[must_use]
    pub fn like_len(&self) -> usize {
        self.like.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when `pattern` currently has a cached LIKE-style matcher.
    #[must_use]
    pub fn contains_like(&self, pattern: &str) -> bool {
        self.like.lock().unwrap_or_else(PoisonError::into_inner).contains(pattern)
    }
}

/// Fetches a compiled matcher, compiling and inserting on miss.
fn cached(
    cache: &Mutex<LruCache<String, Regex>>,
    pattern: &str,
    compile: impl FnOnce(&str) -> Result<Regex, regex::Error>,
) -> Result<Regex, regex::Error> {
    if let Some(matcher) = cache.lock().unwrap_or_else(PoisonError::into_inner).get(pattern) {
        return Ok(matcher.clone());
    }
    let matcher = compile(pattern)?;
    cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .put(pattern.to_string(), matcher.clone());
    Ok(matcher)
}

/// Translates a LIKE-style pattern into a case-insensitive regex.
///
/// # Errors
///
/// Returns [`regex::Error`] when the translated pattern cannot be compiled.
pub fn compile_like_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::with_capacity(pattern.len() * 2);
    let mut literal = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '%' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(other.encode_utf8(&mut literal))),
        }
    }
    RegexBuilder::new(&translated).case_insensitive(true).build()
}

// ============================================================================
// SECTION: SQL Functions
// ============================================================================

/// Registers `UNICODE_LIKE` and `REGEXP` on `connection`, backed by `cache`.
///
/// # Errors
///
/// Returns [`rusqlite::Error`] when the engine rejects the registration.
pub fn register_functions(
    connection: &Connection,
    cache: &Arc<PatternCache>,
) -> Result<(), rusqlite::Error> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    let like_cache = Arc::clone(cache);
    connection.create_scalar_function(UNICODE_LIKE_FUNCTION, 2, flags, move |ctx| {
        let pattern = text_arg(ctx, 0)?;
        let value = text_arg(ctx, 1)?;
        like_cache
            .unicode_like(pattern.as_deref(), value.as_deref())
            .map(i64::from)
            .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))
    })?;
    let regexp_cache = Arc::clone(cache);
    connection.create_scalar_function(REGEXP_FUNCTION, 2, flags, move |ctx| {
        let Some(pattern) = text_arg(ctx, 0)? else {
            return Ok(0i64);
        };
        let text = text_arg(ctx, 1)?;
        regexp_cache
            .regexp(&pattern, text.as_deref())
            .map(i64::from)
            .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))
    })?;
    Ok(())
}

/// Reads a nullable text argument.
fn text_arg(ctx: &Context<'_>, index: usize) -> Result<Option<String>, rusqlite::Error> {
    ctx.get::<Option<String>>(index)
}
