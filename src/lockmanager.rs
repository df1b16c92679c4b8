//! In-memory lock manager (C3), SPEC_FULL.md §4.3.
//!
//! State is `Map<resourceKey, List<Lock>>` guarded by a single mutex, per
//! the spec's literal data model — `resourceKey` here is simply the
//! normalized path string, so the conflict-walk the reference server's
//! `memls.rs` does over a segment tree becomes a walk over path prefixes
//! (ancestors) and path-prefix matches (descendants) on plain strings.
//! Expired locks are evicted lazily: any read or conflict check first drops
//! entries whose `timeout_at` has passed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPathRef;
use crate::property::NS_DAV;
use crate::xmlutil::ElementExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub token: String,
    pub resource_key: String,
    pub scope: LockScope,
    pub owner: Option<Element>,
    /// `true` for `Depth: infinity`.
    pub deep: bool,
    pub timeout: Option<Duration>,
    pub timeout_at: Option<SystemTime>,
    pub created_at: SystemTime,
}

impl Lock {
    fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.timeout_at, Some(at) if at <= now)
    }
}

fn key(path: &DavPathRef) -> String {
    let mut s = path.as_url_string();
    if s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    if s.is_empty() {
        s.push('/');
    }
    s
}

fn ancestors(k: &str) -> Vec<String> {
    let mut v = vec!["/".to_string()];
    let mut acc = String::new();
    for seg in k.trim_start_matches('/').split('/').filter(|s| !s.is_empty()) {
        acc.push('/');
        acc.push_str(seg);
        v.push(acc.clone());
    }
    v
}

pub struct LockManager {
    locks: Mutex<HashMap<String, Vec<Lock>>>,
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager { locks: Mutex::new(HashMap::new()) }
    }

    fn evict_expired(map: &mut HashMap<String, Vec<Lock>>, now: SystemTime) {
        map.retain(|_, v| {
            v.retain(|l| !l.is_expired(now));
            !v.is_empty()
        });
    }

    /// `Lock(item, type, scope, owner, depth, timeouts)`.
    pub fn lock(
        &self,
        path: &DavPathRef,
        owner: Option<Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<Lock, Lock> {
        let k = key(path);
        let now = SystemTime::now();
        let mut map = self.locks.lock().unwrap();
        Self::evict_expired(&mut map, now);

        // Conflicts on this resource's ancestors: any exclusive lock there
        // (deep if the ancestor isn't the resource itself) blocks us.
        let segs = ancestors(&k);
        let last = segs.len() - 1;
        for (i, anc) in segs.iter().enumerate() {
            if let Some(existing) = map.get(anc) {
                for l in existing {
                    if i < last && !l.deep {
                        continue;
                    }
                    if l.scope == LockScope::Exclusive || !shared {
                        return Err(l.clone());
                    }
                }
            }
        }

        // If requesting a deep lock, no locks may exist anywhere below us.
        if deep {
            let prefix = if k == "/" { "/".to_string() } else { format!("{}/", k) };
            for (rk, existing) in map.iter() {
                if rk != &k && !rk.starts_with(&prefix) {
                    continue;
                }
                for l in existing {
                    if l.scope == LockScope::Exclusive || !shared {
                        return Err(l.clone());
                    }
                }
            }
        }

        let lock = Lock {
            token: format!("opaquelocktoken:{}", Uuid::new_v4()),
            resource_key: k.clone(),
            scope: if shared { LockScope::Shared } else { LockScope::Exclusive },
            owner,
            deep,
            timeout,
            timeout_at: timeout.map(|d| now + d),
            created_at: now,
        };
        map.entry(k).or_default().push(lock.clone());
        Ok(lock)
    }

    /// `RefreshLock(item, depth, timeouts, token)`.
    pub fn refresh(&self, path: &DavPathRef, token: &str, timeout: Option<Duration>) -> Option<Lock> {
        let k = key(path);
        let now = SystemTime::now();
        let mut map = self.locks.lock().unwrap();
        Self::evict_expired(&mut map, now);
        let locks = map.get_mut(&k)?;
        let lock = locks.iter_mut().find(|l| l.token == token)?;
        lock.timeout = timeout;
        lock.timeout_at = timeout.map(|d| now + d);
        Some(lock.clone())
    }

    /// `Unlock(item, token)`.
    pub fn unlock(&self, path: &DavPathRef, token: &str) -> bool {
        let k = key(path);
        let now = SystemTime::now();
        let mut map = self.locks.lock().unwrap();
        Self::evict_expired(&mut map, now);
        match map.get_mut(&k) {
            Some(locks) => {
                let before = locks.len();
                locks.retain(|l| l.token != token);
                let removed = locks.len() != before;
                if locks.is_empty() {
                    map.remove(&k);
                }
                removed
            },
            None => false,
        }
    }

    /// Drop every lock on this resource, used when the resource itself is
    /// deleted or moved.
    pub fn clear(&self, path: &DavPathRef) {
        let k = key(path);
        self.locks.lock().unwrap().remove(&k);
    }

    /// `CheckLock`: does `submitted_tokens` cover every conflicting lock on
    /// `path` (and, if `deep`, below it)?
    pub fn check(&self, path: &DavPathRef, deep: bool, submitted_tokens: &[&str]) -> Result<(), Lock> {
        let k = key(path);
        let now = SystemTime::now();
        let mut map = self.locks.lock().unwrap();
        Self::evict_expired(&mut map, now);

        let segs = ancestors(&k);
        let last = segs.len() - 1;
        for (i, anc) in segs.iter().enumerate() {
            if let Some(existing) = map.get(anc) {
                for l in existing {
                    if i < last && !l.deep {
                        continue;
                    }
                    if !submitted_tokens.contains(&l.token.as_str()) {
                        return Err(l.clone());
                    }
                }
            }
        }

        if deep {
            let prefix = if k == "/" { "/".to_string() } else { format!("{}/", k) };
            for (rk, existing) in map.iter() {
                if rk != &k && !rk.starts_with(&prefix) {
                    continue;
                }
                for l in existing {
                    if !submitted_tokens.contains(&l.token.as_str()) {
                        return Err(l.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// `GetActiveLockInfo(item)`: every still-valid lock on this exact
    /// resource (not ancestors/descendants), feeding `lockdiscovery`.
    pub fn discover(&self, path: &DavPathRef) -> Vec<Lock> {
        let k = key(path);
        let now = SystemTime::now();
        let mut map = self.locks.lock().unwrap();
        Self::evict_expired(&mut map, now);
        map.get(&k).cloned().unwrap_or_default()
    }

    /// Builds the `<D:lockdiscovery>` element for `write_props`/LOCK
    /// responses.
    pub fn list_lockdiscovery(&self, path: &DavPathRef) -> Element {
        let mut elem = Element::new2("D:lockdiscovery");
        for lock in self.discover(path) {
            elem.push(active_lock_element(&lock));
        }
        elem
    }

    /// `GetSupportedLocks(item)`: this manager always supports both
    /// exclusive and shared write locks.
    pub fn list_supportedlock(&self) -> Element {
        let mut elem = Element::new2("D:supportedlock");
        for scope in ["exclusive", "shared"] {
            let mut entry = Element::new2("D:lockentry");
            let mut lockscope = Element::new2("D:lockscope");
            lockscope.push(Element::new2(&format!("D:{}", scope)));
            let mut locktype = Element::new2("D:locktype");
            locktype.push(Element::new2("D:write"));
            entry.push(lockscope);
            entry.push(locktype);
            elem.push(entry);
        }
        elem
    }
}

impl Default for LockManager {
    fn default() -> LockManager {
        LockManager::new()
    }
}

pub(crate) fn active_lock_element(lock: &Lock) -> Element {
    let mut active = Element::new2("D:activelock");

    let mut locktype = Element::new2("D:locktype");
    locktype.push(Element::new2("D:write"));
    active.push(locktype);

    let mut lockscope = Element::new2("D:lockscope");
    let scope_name = match lock.scope {
        LockScope::Exclusive => "D:exclusive",
        LockScope::Shared => "D:shared",
    };
    lockscope.push(Element::new2(scope_name));
    active.push(lockscope);

    active.push(Element::new_text("D:depth", if lock.deep { "infinity" } else { "0" }));

    if let Some(ref owner) = lock.owner {
        let mut owner_elem = Element::new2("D:owner");
        owner_elem.push(owner.clone());
        active.push(owner_elem);
    }

    let timeout_str = match lock.timeout {
        Some(d) => format!("Second-{}", d.as_secs()),
        None => "Infinite".to_string(),
    };
    active.push(Element::new_text("D:timeout", timeout_str));

    let mut locktoken = Element::new2("D:locktoken");
    locktoken.push(Element::new_text("D:href", lock.token.clone()));
    active.push(locktoken);

    let mut lockroot = Element::new2("D:lockroot");
    lockroot.push(Element::new_text("D:href", lock.resource_key.clone()));
    active.push(lockroot);

    let _ = NS_DAV;
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::davpath::DavPath;

    #[test]
    fn exclusive_lock_blocks_second_exclusive_lock() {
        let lm = LockManager::new();
        let p = DavPath::new("/a.txt").unwrap();
        let _l1 = lm.lock(&p, None, None, false, false).unwrap();
        assert!(lm.lock(&p, None, None, false, false).is_err());
    }

    #[test]
    fn shared_locks_do_not_conflict_with_each_other() {
        let lm = LockManager::new();
        let p = DavPath::new("/a.txt").unwrap();
        let _l1 = lm.lock(&p, None, None, true, false).unwrap();
        assert!(lm.lock(&p, None, None, true, false).is_ok());
    }

    #[test]
    fn deep_lock_blocks_child_locking() {
        let lm = LockManager::new();
        let dir = DavPath::new("/docs/").unwrap();
        let _l1 = lm.lock(&dir, None, None, false, true).unwrap();
        let child = DavPath::new("/docs/a.txt").unwrap();
        assert!(lm.lock(&child, None, None, false, false).is_err());
    }

    #[test]
    fn unlock_then_relock_succeeds() {
        let lm = LockManager::new();
        let p = DavPath::new("/a.txt").unwrap();
        let l1 = lm.lock(&p, None, None, false, false).unwrap();
        assert!(lm.unlock(&p, &l1.token));
        assert!(lm.lock(&p, None, None, false, false).is_ok());
    }

    #[test]
    fn expired_lock_is_evicted_lazily() {
        let lm = LockManager::new();
        let p = DavPath::new("/a.txt").unwrap();
        let _l1 = lm.lock(&p, None, Some(Duration::from_millis(1)), false, false).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(lm.lock(&p, None, None, false, false).is_ok());
    }
}
