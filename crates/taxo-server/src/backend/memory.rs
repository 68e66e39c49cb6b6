//! In-process key-value backend for single-instance deployments.
//!
//! Mirrors the subset of Redis semantics the cache and rate limiter rely on:
//! string values with optional expiry, integer counters, sets and glob key
//! scans. Expiry is lazy and measured with tokio time, so tests can drive it
//! with a paused clock.

use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use tokio::time::Instant;

use crate::error::BackendError;

#[derive(Debug, Clone)]
enum MemValue {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct MemEntry {
    value: MemValue,
    expires_at: Option<Instant>,
}

impl MemEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let now = Instant::now();
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return Ok(None);
        }
        match &entry.value {
            MemValue::Bytes(b) => Ok(Some(b.clone())),
            MemValue::Set(_) => Err(wrong_type(key)),
        }
    }

    pub fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            MemEntry {
                value: MemValue::Bytes(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn del(&self, keys: &[String]) -> u64 {
        let now = Instant::now();
        keys.iter()
            .filter_map(|k| self.entries.remove(k))
            .filter(|(_, e)| !e.is_expired(now))
            .count() as u64
    }

    /// INCRBY semantics: a missing key starts at zero and keeps no expiry.
    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64, BackendError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = MemEntry {
                        value: MemValue::Bytes(delta.to_string().into_bytes()),
                        expires_at: None,
                    };
                    return Ok(delta);
                }
                let current = match &entry.value {
                    MemValue::Bytes(b) => std::str::from_utf8(b)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| wrong_type(key))?,
                    MemValue::Set(_) => return Err(wrong_type(key)),
                };
                let next = current + delta;
                entry.value = MemValue::Bytes(next.to_string().into_bytes());
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemEntry {
                    value: MemValue::Bytes(delta.to_string().into_bytes()),
                    expires_at: None,
                });
                Ok(delta)
            }
        }
    }

    /// Returns false when the key does not exist.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    /// TTL semantics: -2 missing key, -1 no expiry, else whole seconds left
    /// (rounded up so a live key never reports 0).
    pub fn ttl(&self, key: &str) -> i64 {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match entry.expires_at {
                None => -1,
                Some(at) => {
                    let left = at.saturating_duration_since(now);
                    left.as_millis().div_ceil(1000) as i64
                }
            },
            _ => -2,
        }
    }

    pub fn sadd(&self, key: &str, members: &[String]) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| MemEntry {
            value: MemValue::Set(HashSet::new()),
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = MemEntry {
                value: MemValue::Set(HashSet::new()),
                expires_at: None,
            };
        }
        match &mut entry.value {
            MemValue::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            MemValue::Bytes(_) => Err(wrong_type(key)),
        }
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                MemValue::Set(set) => Ok(set.iter().cloned().collect()),
                MemValue::Bytes(_) => Err(wrong_type(key)),
            },
            _ => Ok(Vec::new()),
        }
    }

    pub fn srem(&self, key: &str, members: &[String]) -> Result<(), BackendError> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(());
        };
        let now_empty = match &mut entry.value {
            MemValue::Set(set) => {
                for m in members {
                    set.remove(m);
                }
                set.is_empty()
            }
            MemValue::Bytes(_) => return Err(wrong_type(key)),
        };
        drop(entry);
        // Redis drops a set once its last member is removed.
        if now_empty {
            self.entries
                .remove_if(key, |_, e| matches!(&e.value, MemValue::Set(s) if s.is_empty()));
        }
        Ok(())
    }

    /// Live keys matching a Redis-style glob.
    pub fn scan_match(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        let now = Instant::now();
        let matcher = glob_to_regex(pattern)?;
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && matcher.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn wrong_type(key: &str) -> BackendError {
    BackendError::WrongType {
        key: key.to_string(),
    }
}

/// Translates a Redis glob (`*`, `?`, backslash escapes) into an anchored regex.
/// Every other character is literal.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_translation_matches_redis_semantics() {
        let re = glob_to_regex("taxo:cache:*tag*berlin*").unwrap();
        assert!(re.is_match("taxo:cache:tag:berlin"));
        assert!(re.is_match("taxo:cache:tags:all:search=berlin"));
        assert!(!re.is_match("taxo:rate-limit:api:ip:10.0.0.1"));

        let re = glob_to_regex("a?c\\*").unwrap();
        assert!(re.is_match("abc*"));
        assert!(!re.is_match("abcd"));

        let re = glob_to_regex("k.[x]+").unwrap();
        assert!(re.is_match("k.[x]+"));
        assert!(!re.is_match("kk[x]+"));
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_with_their_ttl() {
        let mem = MemoryBackend::new();
        mem.set_ex("k", b"v".to_vec(), Duration::from_secs(10));
        assert_eq!(mem.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(mem.ttl("k"), 10);

        tokio::time::advance(Duration::from_millis(9_500)).await;
        assert_eq!(mem.ttl("k"), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(mem.get("k").unwrap(), None);
        assert_eq!(mem.ttl("k"), -2);
        assert!(mem.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn counters_follow_incr_semantics() {
        let mem = MemoryBackend::new();
        assert_eq!(mem.incr_by("c", 1).unwrap(), 1);
        assert_eq!(mem.ttl("c"), -1);
        assert!(mem.expire("c", Duration::from_secs(60)));
        assert_eq!(mem.incr_by("c", 1).unwrap(), 2);
        // INCR does not touch the expiry.
        assert_eq!(mem.ttl("c"), 60);
        assert_eq!(mem.incr_by("c", -1).unwrap(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(mem.incr_by("c", 1).unwrap(), 1);
        assert_eq!(mem.ttl("c"), -1);
        assert!(!mem.expire("missing", Duration::from_secs(1)));

        mem.set_ex("text", b"abc".to_vec(), Duration::from_secs(5));
        assert!(matches!(
            mem.incr_by("text", 1),
            Err(BackendError::WrongType { .. })
        ));
    }

    #[test]
    fn sets_and_scans() {
        let mem = MemoryBackend::new();
        mem.sadd("idx", &["a".into(), "b".into()]).unwrap();
        mem.sadd("idx", &["b".into(), "c".into()]).unwrap();
        let mut members = mem.smembers("idx").unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b", "c"]);

        mem.srem("idx", &["a".into(), "b".into(), "c".into()]).unwrap();
        assert!(mem.smembers("idx").unwrap().is_empty());
        assert_eq!(mem.len(), 0);

        mem.set_ex("p:cache:tag:x", vec![1], Duration::from_secs(5));
        mem.set_ex("p:cache:tags:all:", vec![2], Duration::from_secs(5));
        mem.set_ex("p:rate-limit:api:ip:1", vec![3], Duration::from_secs(5));
        let mut found = mem.scan_match("p:cache:*").unwrap();
        found.sort();
        assert_eq!(found, vec!["p:cache:tag:x", "p:cache:tags:all:"]);

        assert_eq!(mem.del(&found), 2);
        assert_eq!(mem.del(&found), 0);
    }
}
