//! Purpose: Per-run cache of objects keyed by (URL, class) that breaks reference cycles.
//! Exports: `IdentityCache`, `CacheEntry`, `Claim`, `Completion`, `Settle`.
//! Role: Lets a back-reference observe the in-flight instance instead of re-entering it.
//! Invariants: Each (url, class) key is stored at most once per run; a second store is a bug.
//! Invariants: Entries are registered before property interpretation starts.
//! Invariants: `claim` checks and registers atomically, so concurrent tasks never race a key.
//! Invariants: Completion resolves once with the node's outcome; failures reach every awaiter.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

use super::class::{Class, ObjectRef};
use super::error::{Error, ErrorKind};

/// Resolves when the cached object's properties have all settled.
pub type Completion = Shared<BoxFuture<'static, Result<(), Error>>>;

#[derive(Clone)]
pub struct CacheEntry {
    pub object: ObjectRef,
    pub completion: Completion,
}

/// Write side of an entry's completion, held by the interpretation that registered it.
#[derive(Debug)]
pub struct Settle {
    tx: oneshot::Sender<Result<(), Error>>,
}

impl Settle {
    pub fn resolve(self, outcome: Result<(), Error>) {
        // Nobody awaiting is fine; the side-list may never have picked this entry up.
        let _ = self.tx.send(outcome);
    }
}

/// Outcome of `IdentityCache::claim`.
pub enum Claim {
    /// Another interpretation already owns the key.
    Cached(CacheEntry),
    /// The caller owns the key and must settle it.
    Registered(Settle),
}

fn pending() -> (Settle, Completion) {
    let (tx, rx) = oneshot::channel();
    let completion = rx
        .map(|received| {
            received.unwrap_or_else(|_| {
                Err(Error::new(ErrorKind::Internal)
                    .with_message("object interpretation was dropped before completing"))
            })
        })
        .boxed()
        .shared();
    (Settle { tx }, completion)
}

#[derive(Default)]
pub struct IdentityCache {
    entries: Mutex<HashMap<(String, Class), CacheEntry>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str, class: &Class) -> Option<CacheEntry> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        entries.get(&(url.to_string(), class.clone())).cloned()
    }

    /// Returns the entry for (url, class) if one exists, else registers `object` under it.
    /// Lookup and registration happen under one lock.
    pub fn claim(&self, url: &str, class: &Class, object: ObjectRef) -> Claim {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        match entries.entry((url.to_string(), class.clone())) {
            Entry::Occupied(entry) => Claim::Cached(entry.get().clone()),
            Entry::Vacant(slot) => {
                let (settle, completion) = pending();
                slot.insert(CacheEntry { object, completion });
                Claim::Registered(settle)
            }
        }
    }

    pub fn store(&self, url: &str, class: &Class, object: ObjectRef) -> Result<Settle, Error> {
        match self.claim(url, class, object) {
            Claim::Registered(settle) => Ok(settle),
            Claim::Cached(_) => Err(Error::new(ErrorKind::Internal)
                .with_message(format!(
                    "replacing previous entry {url} constructor type {class}"
                ))
                .with_url(url)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Claim, IdentityCache};
    use crate::core::class::Class;
    use crate::core::error::{Error, ErrorKind};
    use std::sync::Arc;

    #[tokio::test]
    async fn entries_are_keyed_by_url_and_class() {
        let cache = IdentityCache::new();
        let person = Class::new("Person");
        let other = Class::new("Person");
        let pippo = person.instantiate();
        let settle = cache
            .store("/person/1", &person, Arc::clone(&pippo))
            .expect("store");

        let hit = cache.get("/person/1", &person).expect("hit");
        assert!(Arc::ptr_eq(&hit.object, &pippo));
        assert!(cache.get("/person/1", &other).is_none());
        assert!(cache.get("/person/2", &person).is_none());

        settle.resolve(Ok(()));
        hit.completion.await.expect("completed");
    }

    #[test]
    fn second_store_for_same_key_fails_loudly() {
        let cache = IdentityCache::new();
        let person = Class::new("Person");
        let _settle = cache
            .store("/person/1", &person, person.instantiate())
            .expect("first");
        let err = cache
            .store("/person/1", &person, person.instantiate())
            .expect_err("second");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("replacing previous entry"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_every_awaiter() {
        let cache = IdentityCache::new();
        let person = Class::new("Person");
        let settle = cache
            .store("/person/1", &person, person.instantiate())
            .expect("store");
        let first = cache.get("/person/1", &person).expect("hit");
        let second = cache.get("/person/1", &person).expect("hit");
        settle.resolve(Err(Error::new(ErrorKind::ShapeMismatch).with_message("boom")));
        assert_eq!(
            first.completion.await.expect_err("failed").kind(),
            ErrorKind::ShapeMismatch
        );
        assert_eq!(
            second.completion.await.expect_err("failed").kind(),
            ErrorKind::ShapeMismatch
        );
    }

    #[tokio::test]
    async fn concurrent_claims_register_one_owner() {
        let cache = Arc::new(IdentityCache::new());
        let person = Class::new("Person");
        let tasks = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            let person = person.clone();
            tokio::spawn(async move {
                match cache.claim("/person/1", &person, person.instantiate()) {
                    Claim::Registered(settle) => {
                        settle.resolve(Ok(()));
                        1
                    }
                    Claim::Cached(_) => 0,
                }
            })
        });
        let mut owners = 0;
        for task in tasks.collect::<Vec<_>>() {
            owners += task.await.expect("join");
        }
        assert_eq!(owners, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn dropped_settle_is_reported() {
        let cache = IdentityCache::new();
        let person = Class::new("Person");
        drop(
            cache
                .store("/person/1", &person, person.instantiate())
                .expect("store"),
        );
        let hit = cache.get("/person/1", &person).expect("hit");
        assert_eq!(hit.completion.await.expect_err("dropped").kind(), ErrorKind::Internal);
    }
}
