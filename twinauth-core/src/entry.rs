//! Cache entry type shared by all caches
//!
//! A cache lookup has three outcomes: nothing cached yet (no `Entry` at all),
//! confirmed present ([`Entry::exists`] is true), or confirmed absent. The
//! optional revision records the revision a presence or absence was observed
//! at; it is informational and not used for optimistic concurrency here.

/// Value cached for a key, or the confirmed absence of one
///
/// Invariant: an entry that does not exist never carries a value. The fields
/// are private so the invariant cannot be broken from outside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry<V> {
    revision: Option<i64>,
    value: Option<V>,
}

impl<V> Entry<V> {
    /// Present value observed at `revision`
    pub fn of(revision: i64, value: V) -> Self {
        Self {
            revision: Some(revision),
            value: Some(value),
        }
    }

    /// Present value without a revision (e.g. derived or embedded values)
    pub fn permanent(value: V) -> Self {
        Self {
            revision: None,
            value: Some(value),
        }
    }

    /// Confirmed absent
    pub fn nonexistent() -> Self {
        Self {
            revision: None,
            value: None,
        }
    }

    /// Confirmed absent as of `revision`
    pub fn nonexistent_at(revision: i64) -> Self {
        Self {
            revision: Some(revision),
            value: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    /// Transform the value, keeping revision and existence.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Entry<U> {
        Entry {
            revision: self.revision,
            value: self.value.map(f),
        }
    }
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self::nonexistent()
    }
}
