//! Set of currently blocked namespaces
//!
//! Shared between the pre-enforcement chain (which rejects signals for
//! blocked namespaces) and the policy-enforcer provider (which applies
//! block-set changes and invalidates affected cache entries).

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Cloneable handle to the shared blocked-namespace set
#[derive(Debug, Clone, Default)]
pub struct BlockedNamespaces {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl BlockedNamespaces {
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(RwLock::new(initial.into_iter().map(Into::into).collect())),
        }
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.inner.read().contains(namespace)
    }

    /// Apply a block-set change and return the resulting set.
    ///
    /// Removals are applied after additions, so a namespace listed in both
    /// ends up unblocked.
    pub fn apply_change<'a>(
        &self,
        added: impl IntoIterator<Item = &'a String>,
        removed: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        let mut set = self.inner.write();
        set.extend(added.into_iter().cloned());
        for ns in removed {
            set.remove(ns);
        }
        set.clone()
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
