//! Embedded keyspace for the broker.
//!
//! Provides the Redis-equivalent structures the dispatch protocol needs:
//! string sets, lists, hashes, score-sorted sets, integer counters, key
//! expiry and glob key scans. Everything lives under one keyspace lock so a
//! multi-key script runs as a single critical section.
//!
//! # Architecture
//! ```text
//! KvEngine
//!   └─ RwLock<Keyspace>
//!        └─ HashMap<key, Entry { Value, expires_at }>
//! ```
//!
//! Read operations take the shared lock and treat expired keys as absent;
//! mutating operations take the exclusive lock and purge expired keys
//! lazily. Collections that become empty delete their key. Sets enumerate
//! in insertion order; callers breaking ties by "first member returned"
//! rely on that.

use super::error::{BrokerError, Result};
use indexmap::IndexSet;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, VecDeque};

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A stored value, one variant per supported structure. Sets keep their
/// insertion order.
#[derive(Debug, Clone)]
pub enum Value {
    Set(IndexSet<String>),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    SortedSet(HashMap<String, f64>),
    Counter(i64),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// The full key→value map. Obtained through [`KvEngine::read`] or
/// [`KvEngine::atomic`]; every method call on a `&mut Keyspace` within one
/// `atomic` closure commits as a single indivisible step.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&self, key: &str) -> Option<&Entry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(unix_now()) {
            None
        } else {
            Some(entry)
        }
    }

    fn drop_if_expired(&mut self, key: &str) {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(unix_now()) {
                self.entries.remove(key);
            }
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut IndexSet<String>> {
        self.drop_if_expired(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(IndexSet::new())));
        match &mut entry.value {
            Value::Set(members) => Ok(members),
            _ => Err(BrokerError::WrongType(key.to_string())),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut VecDeque<String>> {
        self.drop_if_expired(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
        match &mut entry.value {
            Value::List(elements) => Ok(elements),
            _ => Err(BrokerError::WrongType(key.to_string())),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>> {
        self.drop_if_expired(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(fields) => Ok(fields),
            _ => Err(BrokerError::WrongType(key.to_string())),
        }
    }

    fn sorted_set_mut(&mut self, key: &str) -> Result<&mut HashMap<String, f64>> {
        self.drop_if_expired(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::SortedSet(HashMap::new())));
        match &mut entry.value {
            Value::SortedSet(scored) => Ok(scored),
            _ => Err(BrokerError::WrongType(key.to_string())),
        }
    }

    fn set_ref(&self, key: &str) -> Result<Option<&IndexSet<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Set(members) => Ok(Some(members)),
                _ => Err(BrokerError::WrongType(key.to_string())),
            },
        }
    }

    fn list_ref(&self, key: &str) -> Result<Option<&VecDeque<String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::List(elements) => Ok(Some(elements)),
                _ => Err(BrokerError::WrongType(key.to_string())),
            },
        }
    }

    fn hash_ref(&self, key: &str) -> Result<Option<&HashMap<String, String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Hash(fields) => Ok(Some(fields)),
                _ => Err(BrokerError::WrongType(key.to_string())),
            },
        }
    }

    // ---- sets -------------------------------------------------------------

    /// SADD - add a member, returns true if it was not present
    pub fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        Ok(self.set_mut(key)?.insert(member.to_string()))
    }

    /// SREM - remove a member; an emptied set deletes its key. The
    /// surviving members keep their insertion order.
    pub fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        let members = self.set_mut(key)?;
        let removed = members.shift_remove(member);
        if members.is_empty() {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    /// SMEMBERS - all members, in insertion order
    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .set_ref(key)?
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// SCARD - member count
    pub fn scard(&self, key: &str) -> Result<usize> {
        Ok(self.set_ref(key)?.map(|members| members.len()).unwrap_or(0))
    }

    /// SISMEMBER
    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .set_ref(key)?
            .is_some_and(|members| members.contains(member)))
    }

    /// SRANDMEMBER - uniformly random member without removal
    pub fn srandmember(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .set_ref(key)?
            .and_then(|members| members.iter().choose(&mut rand::rng()).cloned()))
    }

    // ---- lists ------------------------------------------------------------

    /// RPUSH - append to the right, returns new length
    pub fn rpush(&mut self, key: &str, element: &str) -> Result<usize> {
        let elements = self.list_mut(key)?;
        elements.push_back(element.to_string());
        Ok(elements.len())
    }

    /// LPOP - pop from the left; an emptied list deletes its key
    pub fn lpop(&mut self, key: &str) -> Result<Option<String>> {
        let elements = self.list_mut(key)?;
        let popped = elements.pop_front();
        if elements.is_empty() {
            self.entries.remove(key);
        }
        Ok(popped)
    }

    /// LLEN
    pub fn llen(&self, key: &str) -> Result<usize> {
        Ok(self
            .list_ref(key)?
            .map(|elements| elements.len())
            .unwrap_or(0))
    }

    // ---- hashes -----------------------------------------------------------

    /// HSET - returns true if the field is new
    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<bool> {
        Ok(self
            .hash_mut(key)?
            .insert(field.to_string(), value.to_string())
            .is_none())
    }

    /// HSETNX - set only if the field is absent
    pub fn hsetnx(&mut self, key: &str, field: &str, value: &str) -> Result<bool> {
        let fields = self.hash_mut(key)?;
        if fields.contains_key(field) {
            Ok(false)
        } else {
            fields.insert(field.to_string(), value.to_string());
            Ok(true)
        }
    }

    /// HGET
    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hash_ref(key)?
            .and_then(|fields| fields.get(field).cloned()))
    }

    /// HDEL - remove a field; an emptied hash deletes its key
    pub fn hdel(&mut self, key: &str, field: &str) -> Result<bool> {
        let fields = self.hash_mut(key)?;
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            self.entries.remove(key);
        }
        Ok(removed)
    }

    /// HLEN
    pub fn hlen(&self, key: &str) -> Result<usize> {
        Ok(self.hash_ref(key)?.map(|fields| fields.len()).unwrap_or(0))
    }

    /// HGETALL
    pub fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .hash_ref(key)?
            .map(|fields| {
                fields
                    .iter()
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// HINCRBY - missing fields count from 0, non-numeric fields reset
    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let fields = self.hash_mut(key)?;
        let current = fields
            .get(field)
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    // ---- sorted sets ------------------------------------------------------

    /// ZADD - insert or update the member's score, returns true if new
    pub fn zadd(&mut self, key: &str, member: &str, score: f64) -> Result<bool> {
        Ok(self
            .sorted_set_mut(key)?
            .insert(member.to_string(), score)
            .is_none())
    }

    /// ZCARD
    pub fn zcard(&self, key: &str) -> Result<usize> {
        match self.live(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::SortedSet(scored) => Ok(scored.len()),
                _ => Err(BrokerError::WrongType(key.to_string())),
            },
        }
    }

    /// Remove and return every member scored at or below `max_score`, in
    /// ascending score order. An emptied sorted set deletes its key.
    pub fn zpop_le(&mut self, key: &str, max_score: f64) -> Result<Vec<String>> {
        let scored = self.sorted_set_mut(key)?;
        let mut due: Vec<(String, f64)> = scored
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (member, _) in &due {
            scored.remove(member);
        }
        if scored.is_empty() {
            self.entries.remove(key);
        }
        Ok(due.into_iter().map(|(member, _)| member).collect())
    }

    // ---- counters ---------------------------------------------------------

    /// INCR - atomic increment, key created at 0
    pub fn incr(&mut self, key: &str) -> Result<i64> {
        self.drop_if_expired(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Counter(0)));
        match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(BrokerError::WrongType(key.to_string())),
        }
    }

    // ---- generic ----------------------------------------------------------

    /// DEL - returns true if the key existed
    pub fn del(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// EXISTS
    pub fn exists(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// EXPIRE - arm (or re-arm) a relative TTL on a live key
    pub fn expire(&mut self, key: &str, ttl_secs: u64) -> bool {
        self.drop_if_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(unix_now() + ttl_secs);
                true
            }
            None => false,
        }
    }

    /// Live keys matching a glob pattern (`*` wildcards only)
    pub fn scan_match(&self, pattern: &str) -> Vec<String> {
        let now = unix_now();
        self.entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drop every expired entry, returns how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let now = unix_now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = unix_now();
        self.entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// True when no live keys remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Glob matching with `*` wildcards, anchored at both ends.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or("");
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    let segments: Vec<&str> = segments.collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        if segment.is_empty() {
            if last {
                return true;
            }
            continue;
        }
        if last {
            return rest.ends_with(segment);
        }
        match rest.find(segment) {
            Some(at) => rest = &rest[at + segment.len()..],
            None => return false,
        }
    }
    rest.is_empty()
}

/// Shared handle over the keyspace. Clone-free: callers hold it in an `Arc`.
#[derive(Debug, Default)]
pub struct KvEngine {
    keyspace: RwLock<Keyspace>,
}

impl KvEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a read-only closure under the shared lock.
    pub fn read<R>(&self, f: impl FnOnce(&Keyspace) -> R) -> R {
        f(&self.keyspace.read())
    }

    /// Run a closure under the exclusive lock. Everything inside commits as
    /// one atomic step; this is the script execution primitive.
    pub fn atomic<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        f(&mut self.keyspace.write())
    }

    // Single-operation conveniences used outside script sections.

    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.read(|ks| ks.smembers(key))
    }

    pub fn scard(&self, key: &str) -> Result<usize> {
        self.read(|ks| ks.scard(key))
    }

    pub fn srandmember(&self, key: &str) -> Result<Option<String>> {
        self.read(|ks| ks.srandmember(key))
    }

    pub fn llen(&self, key: &str) -> Result<usize> {
        self.read(|ks| ks.llen(key))
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.read(|ks| ks.hget(key, field))
    }

    pub fn hlen(&self, key: &str) -> Result<usize> {
        self.read(|ks| ks.hlen(key))
    }

    pub fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.read(|ks| ks.hgetall(key))
    }

    pub fn zcard(&self, key: &str) -> Result<usize> {
        self.read(|ks| ks.zcard(key))
    }

    pub fn incr(&self, key: &str) -> Result<i64> {
        self.atomic(|ks| ks.incr(key))
    }

    pub fn del(&self, key: &str) -> bool {
        self.atomic(|ks| ks.del(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read(|ks| ks.exists(key))
    }

    pub fn scan_match(&self, pattern: &str) -> Vec<String> {
        self.read(|ks| ks.scan_match(pattern))
    }

    pub fn purge_expired(&self) -> usize {
        self.atomic(|ks| ks.purge_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_add_remove() {
        let kv = KvEngine::new();
        assert!(kv.atomic(|ks| ks.sadd("s", "a")).unwrap());
        assert!(!kv.atomic(|ks| ks.sadd("s", "a")).unwrap());
        assert!(kv.atomic(|ks| ks.sadd("s", "b")).unwrap());
        assert_eq!(kv.scard("s").unwrap(), 2);

        let mut members = kv.smembers("s").unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
    }

    #[test]
    fn test_smembers_keeps_insertion_order() {
        let kv = KvEngine::new();
        for member in ["zebra", "apple", "mango"] {
            kv.atomic(|ks| ks.sadd("s", member)).unwrap();
        }
        assert_eq!(kv.smembers("s").unwrap(), vec!["zebra", "apple", "mango"]);

        // Re-adding an existing member must not move it.
        kv.atomic(|ks| ks.sadd("s", "zebra")).unwrap();
        assert_eq!(kv.smembers("s").unwrap(), vec!["zebra", "apple", "mango"]);

        // Removal keeps the survivors' relative order.
        kv.atomic(|ks| ks.srem("s", "apple")).unwrap();
        assert_eq!(kv.smembers("s").unwrap(), vec!["zebra", "mango"]);
    }

    #[test]
    fn test_emptied_set_removes_key() {
        let kv = KvEngine::new();
        kv.atomic(|ks| ks.sadd("s", "only")).unwrap();
        assert!(kv.atomic(|ks| ks.srem("s", "only")).unwrap());
        assert!(!kv.exists("s"));
    }

    #[test]
    fn test_list_fifo() {
        let kv = KvEngine::new();
        assert_eq!(kv.atomic(|ks| ks.rpush("l", "one")).unwrap(), 1);
        assert_eq!(kv.atomic(|ks| ks.rpush("l", "two")).unwrap(), 2);
        assert_eq!(kv.atomic(|ks| ks.lpop("l")).unwrap().as_deref(), Some("one"));
        assert_eq!(kv.atomic(|ks| ks.lpop("l")).unwrap().as_deref(), Some("two"));
        assert_eq!(kv.atomic(|ks| ks.lpop("l")).unwrap(), None);
        assert!(!kv.exists("l"));
    }

    #[test]
    fn test_hash_ops() {
        let kv = KvEngine::new();
        assert!(kv.atomic(|ks| ks.hset("h", "f", "v")).unwrap());
        assert!(!kv.atomic(|ks| ks.hset("h", "f", "w")).unwrap());
        assert_eq!(kv.hget("h", "f").unwrap().as_deref(), Some("w"));

        assert!(!kv.atomic(|ks| ks.hsetnx("h", "f", "x")).unwrap());
        assert_eq!(kv.hget("h", "f").unwrap().as_deref(), Some("w"));

        assert_eq!(kv.atomic(|ks| ks.hincrby("h", "n", 2)).unwrap(), 2);
        assert_eq!(kv.atomic(|ks| ks.hincrby("h", "n", 3)).unwrap(), 5);
        assert_eq!(kv.hlen("h").unwrap(), 2);
    }

    #[test]
    fn test_emptied_hash_removes_key() {
        let kv = KvEngine::new();
        kv.atomic(|ks| ks.hset("h", "f", "v")).unwrap();
        assert!(kv.atomic(|ks| ks.hdel("h", "f")).unwrap());
        assert!(!kv.exists("h"));
    }

    #[test]
    fn test_sorted_set_pop_due() {
        let kv = KvEngine::new();
        kv.atomic(|ks| ks.zadd("z", "late", 30.0)).unwrap();
        kv.atomic(|ks| ks.zadd("z", "early", 10.0)).unwrap();
        kv.atomic(|ks| ks.zadd("z", "mid", 20.0)).unwrap();

        let due = kv.atomic(|ks| ks.zpop_le("z", 25.0)).unwrap();
        assert_eq!(due, vec!["early", "mid"]);
        assert_eq!(kv.zcard("z").unwrap(), 1);

        let rest = kv.atomic(|ks| ks.zpop_le("z", 100.0)).unwrap();
        assert_eq!(rest, vec!["late"]);
        assert!(!kv.exists("z"));
    }

    #[test]
    fn test_counter() {
        let kv = KvEngine::new();
        assert_eq!(kv.incr("c").unwrap(), 1);
        assert_eq!(kv.incr("c").unwrap(), 2);
        assert_eq!(kv.incr("c").unwrap(), 3);
    }

    #[test]
    fn test_wrong_type() {
        let kv = KvEngine::new();
        kv.atomic(|ks| ks.rpush("k", "v")).unwrap();
        assert!(matches!(
            kv.atomic(|ks| ks.sadd("k", "v")),
            Err(BrokerError::WrongType(_))
        ));
        assert!(matches!(kv.hget("k", "f"), Err(BrokerError::WrongType(_))));
    }

    #[test]
    fn test_expire_hides_key() {
        let kv = KvEngine::new();
        kv.atomic(|ks| ks.hset("h", "f", "v")).unwrap();
        assert!(kv.atomic(|ks| ks.expire("h", 0)));
        assert!(!kv.exists("h"));
        assert_eq!(kv.hget("h", "f").unwrap(), None);
        assert_eq!(kv.purge_expired(), 1);
    }

    #[test]
    fn test_expire_missing_key() {
        let kv = KvEngine::new();
        assert!(!kv.atomic(|ks| ks.expire("nope", 10)));
    }

    #[test]
    fn test_scan_match() {
        let kv = KvEngine::new();
        kv.atomic(|ks| ks.sadd("bq:queues:default:partitions", "a"))
            .unwrap();
        kv.atomic(|ks| ks.sadd("bq:queues:mail:partitions", "b"))
            .unwrap();
        kv.atomic(|ks| ks.rpush("bq:queues:mail:b", "job")).unwrap();

        let mut hits = kv.scan_match("bq:queues:*:partitions");
        hits.sort();
        assert_eq!(
            hits,
            vec!["bq:queues:default:partitions", "bq:queues:mail:partitions"]
        );

        assert_eq!(kv.scan_match("bq:metrics:*").len(), 0);
        assert_eq!(kv.scan_match("bq:queues:mail:b").len(), 1);
    }

    #[test]
    fn test_glob_match_edges() {
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "abd"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("abc", "abcd"));
    }

    #[test]
    fn test_srandmember_draws_from_members() {
        let kv = KvEngine::new();
        assert_eq!(kv.srandmember("s").unwrap(), None);
        kv.atomic(|ks| ks.sadd("s", "x")).unwrap();
        kv.atomic(|ks| ks.sadd("s", "y")).unwrap();
        for _ in 0..16 {
            let pick = kv.srandmember("s").unwrap().unwrap();
            assert!(pick == "x" || pick == "y");
        }
    }
}
