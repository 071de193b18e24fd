//! Runtime registry of named subject patterns.
//!
//! Patterns may be added at any time. A pattern becomes immutable once a
//! subject built from it has been published: it can no longer be removed.
//! Validation results are cached per literal subject in a bounded LRU that
//! is cleared whenever the pattern set changes.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;

use super::filter::{SubjectFilter, DEFAULT_MAX_WILDCARDS};
use super::pattern::{Subject, SubjectPattern};
use super::SubjectError;

/// Default number of cached validation results.
pub const DEFAULT_VALIDATION_CACHE_SIZE: usize = 4096;

#[derive(Debug)]
struct RegisteredPattern {
    pattern: SubjectPattern,
    published: bool,
}

/// Named subject patterns with a validation cache.
///
/// # Locking
///
/// Cache reads and writes happen while holding the pattern read lock, and
/// pattern changes clear the cache while holding the write lock, so a stale
/// result can never be cached after an invalidation.
pub struct SubjectRegistry {
    patterns: RwLock<HashMap<String, RegisteredPattern>>,
    /// literal subject → name of the matching pattern (None = no match)
    cache: Mutex<LruCache<String, Option<String>>>,
    max_wildcards: usize,
}

impl SubjectRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_VALIDATION_CACHE_SIZE, DEFAULT_MAX_WILDCARDS)
    }

    /// Creates an empty registry with explicit cache size and wildcard limit.
    pub fn with_limits(cache_size: usize, max_wildcards: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            patterns: RwLock::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
            max_wildcards,
        }
    }

    /// Creates a registry preloaded with the standard game subjects.
    pub fn with_default_patterns() -> Self {
        let registry = Self::new();
        registry.register_defaults();
        registry
    }

    /// Registers the standard game subjects, skipping names already taken.
    pub fn register_defaults(&self) {
        for (name, template, params, description) in DEFAULT_PATTERNS {
            match self.register_pattern(name, template, params, description) {
                Ok(()) | Err(SubjectError::DuplicatePattern(_)) => {}
                Err(e) => tracing::error!(pattern = name, error = %e, "Invalid default subject pattern"),
            }
        }
    }

    /// Adds a named template.
    pub fn register_pattern(
        &self,
        name: &str,
        template: &str,
        required_params: &[&str],
        description: &str,
    ) -> Result<(), SubjectError> {
        let pattern = SubjectPattern::new(name, template, required_params, description)?;

        let mut patterns = self.patterns.write();
        if patterns.contains_key(name) {
            return Err(SubjectError::DuplicatePattern(name.to_string()));
        }
        patterns.insert(
            name.to_string(),
            RegisteredPattern {
                pattern,
                published: false,
            },
        );
        self.cache.lock().clear();

        tracing::debug!(pattern = name, template, "Registered subject pattern");
        Ok(())
    }

    /// Removes a pattern that has never been published against.
    pub fn unregister_pattern(&self, name: &str) -> Result<(), SubjectError> {
        let mut patterns = self.patterns.write();
        match patterns.get(name) {
            None => return Err(SubjectError::UnknownPattern(name.to_string())),
            Some(entry) if entry.published => {
                return Err(SubjectError::PatternInUse(name.to_string()))
            }
            Some(_) => {}
        }
        patterns.remove(name);
        self.cache.lock().clear();
        Ok(())
    }

    /// Builds a subject from a named pattern.
    pub fn build_subject(
        &self,
        pattern_name: &str,
        params: &[(&str, &str)],
    ) -> Result<Subject, SubjectError> {
        let patterns = self.patterns.read();
        let entry = patterns
            .get(pattern_name)
            .ok_or_else(|| SubjectError::UnknownPattern(pattern_name.to_string()))?;
        entry.pattern.build(params)
    }

    /// Whether a literal subject matches any registered pattern.
    pub fn validate(&self, subject: &str) -> bool {
        self.resolve(subject).is_ok()
    }

    /// Parses a literal subject and finds the pattern it belongs to.
    pub fn resolve(&self, subject: &str) -> Result<(Subject, String), SubjectError> {
        let parsed = Subject::parse(subject)?;
        let patterns = self.patterns.read();

        let cached = self.cache.lock().get(subject).cloned();
        let matched = match cached {
            Some(hit) => hit,
            None => {
                let found = patterns
                    .values()
                    .find(|entry| entry.pattern.matches(&parsed))
                    .map(|entry| entry.pattern.name().to_string());
                self.cache.lock().put(subject.to_string(), found.clone());
                found
            }
        };

        match matched {
            Some(name) => Ok((parsed, name)),
            None => Err(SubjectError::Unregistered(subject.to_string())),
        }
    }

    /// Marks a pattern as published-against, freezing it.
    pub fn mark_published(&self, pattern_name: &str) {
        let already = self
            .patterns
            .read()
            .get(pattern_name)
            .map(|entry| entry.published)
            .unwrap_or(true);
        if already {
            return;
        }
        if let Some(entry) = self.patterns.write().get_mut(pattern_name) {
            entry.published = true;
        }
    }

    /// Whether a pattern has been published against.
    pub fn is_published(&self, pattern_name: &str) -> bool {
        self.patterns
            .read()
            .get(pattern_name)
            .map(|entry| entry.published)
            .unwrap_or(false)
    }

    /// Validates a wildcard subscription pattern.
    pub fn check_subscription(&self, pattern: &str) -> Result<SubjectFilter, SubjectError> {
        SubjectFilter::parse(pattern, self.max_wildcards)
    }

    /// Returns a registered pattern by name.
    pub fn get(&self, pattern_name: &str) -> Option<SubjectPattern> {
        self.patterns
            .read()
            .get(pattern_name)
            .map(|entry| entry.pattern.clone())
    }

    /// All registered patterns, sorted by name.
    pub fn patterns(&self) -> Vec<SubjectPattern> {
        let mut all: Vec<SubjectPattern> = self
            .patterns
            .read()
            .values()
            .map(|entry| entry.pattern.clone())
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached validation results.
    pub fn cached_validations(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard subjects: (name, template, params, description).
pub const DEFAULT_PATTERNS: &[(&str, &str, &[&str], &str)] = &[
    (
        "player_direct",
        "game.player.{identity}.direct",
        &["identity"],
        "Messages addressed to a single player",
    ),
    (
        "room_say",
        "chat.say.room.{room_id}",
        &["room_id"],
        "Speech heard by everyone in a room",
    ),
    (
        "room_event",
        "game.room.{room_id}.{event}",
        &["room_id", "event"],
        "Game events scoped to a room",
    ),
    (
        "zone_broadcast",
        "game.zone.{zone_id}.broadcast",
        &["zone_id"],
        "Broadcasts to every player in a zone",
    ),
    (
        "system_announce",
        "system.announce.{scope}",
        &["scope"],
        "Operator announcements",
    ),
];
