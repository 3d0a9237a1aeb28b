//! Cross-runtime interchange state.
//!
//! Two process-wide tables live here, both under reader/writer locks:
//! the shared variable store mirroring qualified writes per language, and
//! the global table for unqualified top-level variables. The shared store
//! is the first source of truth on qualified reads and doubles as the
//! persistence layer for runtimes that do not retain state between calls.

use std::sync::RwLock;

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::scope::VariableInfo;
use crate::value::Value;

/// `(language, name) → value` table mirroring qualified assignments.
///
/// Languages are stored canonicalized; callers canonicalize before touching
/// the store.
#[derive(Debug, Default)]
pub struct SharedVariables {
    inner: RwLock<AHashMap<String, AHashMap<String, Value>>>,
}

/// Serializable snapshot of the shared store, in stable order.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    languages: Vec<(String, Vec<(String, Value)>)>,
}

impl SharedVariables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits a qualified value.
    pub fn set(&self, language: &str, name: &str, value: Value) {
        let mut inner = self.inner.write().expect("shared store lock poisoned");
        inner.entry(language.to_owned()).or_default().insert(name.to_owned(), value);
    }

    /// Reads a qualified value, cloning it out.
    #[must_use]
    pub fn get(&self, language: &str, name: &str) -> Option<Value> {
        let inner = self.inner.read().expect("shared store lock poisoned");
        inner.get(language).and_then(|vars| vars.get(name)).cloned()
    }

    /// Removes a qualified value, returning whether it existed.
    pub fn remove(&self, language: &str, name: &str) -> bool {
        let mut inner = self.inner.write().expect("shared store lock poisoned");
        inner.get_mut(language).is_some_and(|vars| vars.remove(name).is_some())
    }

    /// All names and values for one language, sorted by name.
    #[must_use]
    pub fn get_all(&self, language: &str) -> Vec<(String, Value)> {
        let inner = self.inner.read().expect("shared store lock poisoned");
        let mut out: Vec<(String, Value)> = inner
            .get(language)
            .map(|vars| vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        out.sort_by(|(a, _), (b, _)| a.cmp(b));
        out
    }

    /// Serializes the whole store with postcard for host-side persistence.
    ///
    /// # Panics
    /// Panics if serialization fails, which should not happen for
    /// well-formed values.
    #[must_use]
    pub fn dump(&self) -> Vec<u8> {
        let inner = self.inner.read().expect("shared store lock poisoned");
        let mut languages: Vec<(String, Vec<(String, Value)>)> = inner
            .iter()
            .map(|(language, vars)| {
                let mut vars: Vec<(String, Value)> = vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                vars.sort_by(|(a, _), (b, _)| a.cmp(b));
                (language.clone(), vars)
            })
            .collect();
        languages.sort_by(|(a, _), (b, _)| a.cmp(b));
        postcard::to_allocvec(&Snapshot { languages }).expect("shared store serialization should not fail")
    }

    /// Replaces the store's contents from a `dump()` snapshot.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), postcard::Error> {
        let snapshot: Snapshot = postcard::from_bytes(bytes)?;
        let mut inner = self.inner.write().expect("shared store lock poisoned");
        inner.clear();
        for (language, vars) in snapshot.languages {
            inner.insert(language, vars.into_iter().collect());
        }
        Ok(())
    }
}

/// Process-wide unqualified variables assigned at the top level.
///
/// Independent from per-language shared state; runtimes never see these.
#[derive(Debug, Default)]
pub struct GlobalVariables {
    inner: RwLock<IndexMap<String, VariableInfo>>,
}

impl GlobalVariables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<VariableInfo> {
        let inner = self.inner.read().expect("globals lock poisoned");
        inner.get(name).cloned()
    }

    /// Writes a global, respecting an existing slot's mutability flag.
    /// Returns `false` (without writing) when the slot is immutable.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut inner = self.inner.write().expect("globals lock poisoned");
        if let Some(info) = inner.get_mut(name) {
            if !info.is_mutable {
                return false;
            }
            info.value = value;
        } else {
            inner.insert(name.to_owned(), VariableInfo::mutable(value));
        }
        true
    }

    /// Creates or redefines a global with explicit mutability.
    pub fn set_with_mutability(&self, name: &str, value: Value, is_mutable: bool) {
        let mut inner = self.inner.write().expect("globals lock poisoned");
        inner.insert(name.to_owned(), VariableInfo { value, is_mutable });
    }

    /// Names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("globals lock poisoned");
        inner.keys().cloned().collect()
    }
}
