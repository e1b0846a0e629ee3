use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage tier an entry was read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    #[default]
    Disk,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Disk => "disk",
        }
    }
}

/// Cached value with its freshness metadata.
///
/// The serialized form is the on-disk record: `{ key, value, created_at, ttl_secs }`.
/// The tier is runtime-only and defaults to `Disk` when a record is read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Lookup key (a question fingerprint)
    pub key: String,
    /// Serialized JSON payload
    pub value: String,
    /// Write time
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds
    pub ttl_secs: u64,
    #[serde(skip)]
    pub tier: Tier,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, created_at: DateTime<Utc>, ttl_secs: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            created_at,
            ttl_secs,
            tier: Tier::Memory,
        }
    }

    /// Expired once strictly more than `ttl_secs` have elapsed since the write
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.created_at).num_milliseconds();
        let ttl_ms = i64::try_from(self.ttl_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        age_ms > ttl_ms
    }

    /// Approximate payload footprint
    pub fn size_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }
}

/// Time source for TTL checks
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let created = Utc::now();
        let entry = CacheEntry::new("k", "v", created, 2);

        assert!(!entry.is_expired_at(created));
        assert!(!entry.is_expired_at(created + chrono::Duration::seconds(2)));
        assert!(entry.is_expired_at(created + chrono::Duration::milliseconds(2001)));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let created = Utc::now();
        let entry = CacheEntry::new("k", "v", created, u64::MAX);
        assert!(!entry.is_expired_at(created + chrono::Duration::days(365 * 100)));
    }

    #[test]
    fn test_disk_record_format() {
        let entry = CacheEntry::new("abc", "{\"x\":1}", Utc::now(), 60);
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["key"], "abc");
        assert_eq!(json["ttl_secs"], 60);
        assert!(json.get("tier").is_none());

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.tier, Tier::Disk);
        assert_eq!(back.value, entry.value);
    }
}
