//! The lock table.
//!
//! One `LockManager` instance is shared by all requests of a handler.
//! It keeps the two maps the protocol needs: token to lock, and URI to
//! the locks rooted there. A lock on a collection taken with depth
//! infinity covers every descendant. Expired locks are reclaimed lazily
//! by whichever call sees them first.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use log::trace;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPath;

/// Scope of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// An entry in the lock table. The only lock type is `write`.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Bare token, without the `opaquelocktoken:` wrapper.
    pub token: String,
    /// Canonical URI of the locked resource.
    pub uri: String,
    pub principal: Option<String>,
    /// Client-supplied `<D:owner>` payload, echoed verbatim.
    pub owner: Option<Element>,
    pub scope: LockScope,
    /// Depth-infinity lock covering the whole subtree.
    pub deep: bool,
    /// `None` means `Infinite`.
    pub timeout: Option<Duration>,
    pub created_at: SystemTime,
    pub refreshed_at: SystemTime,
}

impl DavLock {
    fn is_valid(&self, now: SystemTime) -> bool {
        match self.timeout {
            None => true,
            Some(t) => self.refreshed_at + t >= now,
        }
    }
}

#[derive(Debug, Default)]
struct LockInner {
    by_token: HashMap<String, DavLock>,
    by_uri: HashMap<String, Vec<String>>,
}

/// In-memory lock table, cheap to clone (it is a handle).
#[derive(Debug, Clone, Default)]
pub struct LockManager(Arc<Mutex<LockInner>>);

// canonical key: encoded path, trailing slash stripped (except root).
fn norm(uri: &DavPath) -> String {
    let mut s = uri.as_url_string();
    if s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

fn is_ancestor(a: &str, b: &str) -> bool {
    if a == "/" {
        return b.len() > 1;
    }
    b.len() > a.len() && b.starts_with(a) && b.as_bytes()[a.len()] == b'/'
}

impl LockInner {
    fn purge_expired(&mut self) {
        let now = SystemTime::now();
        let expired: Vec<String> = self
            .by_token
            .values()
            .filter(|l| !l.is_valid(now))
            .map(|l| l.token.clone())
            .collect();
        for token in expired {
            trace!("lock {} expired", token);
            self.remove(&token);
        }
    }

    fn remove(&mut self, token: &str) {
        if let Some(lock) = self.by_token.remove(token) {
            if let Some(tokens) = self.by_uri.get_mut(&lock.uri) {
                tokens.retain(|t| t != token);
                if tokens.is_empty() {
                    self.by_uri.remove(&lock.uri);
                }
            }
        }
    }

    fn insert(&mut self, lock: DavLock) {
        self.by_uri
            .entry(lock.uri.clone())
            .or_default()
            .push(lock.token.clone());
        self.by_token.insert(lock.token.clone(), lock);
    }

    // All locks that apply to `uri`: rooted at the URI itself, or at an
    // ancestor with depth infinity.
    fn covering(&self, uri: &str) -> Vec<&DavLock> {
        let mut found = Vec::new();
        for (root, tokens) in &self.by_uri {
            let applies = root == uri || is_ancestor(root, uri);
            if !applies {
                continue;
            }
            for token in tokens {
                if let Some(lock) = self.by_token.get(token) {
                    if root == uri || lock.deep {
                        found.push(lock);
                    }
                }
            }
        }
        found
    }

    // Locks rooted strictly below `uri`.
    fn below(&self, uri: &str) -> Vec<&DavLock> {
        self.by_uri
            .iter()
            .filter(|(root, _)| is_ancestor(uri, root))
            .flat_map(|(_, tokens)| tokens.iter())
            .filter_map(|t| self.by_token.get(t))
            .collect()
    }
}

fn compatible(existing: &DavLock, wanted: LockScope) -> bool {
    existing.scope == LockScope::Shared && wanted == LockScope::Shared
}

impl LockManager {
    pub fn new() -> LockManager {
        LockManager::default()
    }

    /// Take a new lock. Returns the conflicting lock on failure.
    ///
    /// Compatibility: any exclusive lock on the URI refuses everything,
    /// and an exclusive request refuses a URI that has any lock. A deep
    /// request on a collection additionally requires that no descendant
    /// carries an incompatible lock.
    pub fn create(
        &self,
        uri: &DavPath,
        scope: LockScope,
        deep: bool,
        owner: Option<Element>,
        timeout: Option<Duration>,
        principal: Option<String>,
    ) -> Result<DavLock, DavLock> {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();

        let key = norm(uri);
        if let Some(conflict) = inner
            .covering(&key)
            .into_iter()
            .find(|l| !compatible(l, scope))
        {
            trace!("create: conflict with {} on {}", conflict.token, key);
            return Err(conflict.clone());
        }
        if deep {
            if let Some(conflict) = inner
                .below(&key)
                .into_iter()
                .find(|l| !compatible(l, scope))
            {
                trace!("create: descendant conflict with {}", conflict.token);
                return Err(conflict.clone());
            }
        }

        let now = SystemTime::now();
        let lock = DavLock {
            token: Uuid::new_v4().to_string(),
            uri: key,
            principal,
            owner,
            scope,
            deep,
            timeout,
            created_at: now,
            refreshed_at: now,
        };
        trace!("lock {} created on {}", lock.token, lock.uri);
        inner.insert(lock.clone());
        Ok(lock)
    }

    /// Refresh a lock's timeout. Fails when the token is unknown or the
    /// lock has expired.
    pub fn refresh(&self, token: &str, timeout: Option<Duration>) -> Result<DavLock, ()> {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();
        let lock = inner.by_token.get_mut(token).ok_or(())?;
        lock.timeout = timeout;
        lock.refreshed_at = SystemTime::now();
        trace!("lock {} refreshed", token);
        Ok(lock.clone())
    }

    /// Drop a lock. Unknown tokens are a no-op.
    pub fn release(&self, token: &str) {
        let inner = &mut *self.0.lock().unwrap();
        inner.remove(token);
    }

    /// Look a lock up by token.
    pub fn find(&self, token: &str) -> Option<DavLock> {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();
        inner.by_token.get(token).cloned()
    }

    /// Is the resource covered by any valid lock?
    pub fn locked(&self, uri: &DavPath) -> bool {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();
        !inner.covering(&norm(uri)).is_empty()
    }

    /// The lock that governs this resource, most recently created
    /// first when several apply.
    pub fn holder_for(&self, uri: &DavPath) -> Option<DavLock> {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();
        inner
            .covering(&norm(uri))
            .into_iter()
            .max_by_key(|l| l.created_at)
            .cloned()
    }

    /// All valid locks covering a resource, for `lockdiscovery`.
    pub fn discover(&self, uri: &DavPath) -> Vec<DavLock> {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();
        inner
            .covering(&norm(uri))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Gate a mutation: succeeds when the resource is unlocked, or when
    /// one of the submitted tokens belongs to a lock covering it.
    /// Returns a conflicting lock otherwise.
    pub fn check(&self, uri: &DavPath, submitted_tokens: &[String]) -> Result<(), DavLock> {
        let inner = &mut *self.0.lock().unwrap();
        inner.purge_expired();
        let covering = inner.covering(&norm(uri));
        if covering.is_empty() {
            return Ok(());
        }
        if covering
            .iter()
            .any(|l| submitted_tokens.iter().any(|t| t == &l.token))
        {
            return Ok(());
        }
        Err(covering[0].clone())
    }

    /// Remove every lock rooted at or below a path, after DELETE/MOVE.
    pub fn delete_below(&self, uri: &DavPath) {
        let inner = &mut *self.0.lock().unwrap();
        let key = norm(uri);
        let doomed: Vec<String> = inner
            .by_token
            .values()
            .filter(|l| l.uri == key || is_ancestor(&key, &l.uri))
            .map(|l| l.token.clone())
            .collect();
        for token in doomed {
            inner.remove(&token);
        }
    }
}
