//! Backend registry and read/write scope resolution.
//!
//! A [`StorageScope`] names which backends take part in reads and which in
//! writes. [`Registry::resolve`] is the single place where a missing list is
//! expanded to "every registered backend".

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised while building a registry or resolving a scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("unknown backend '{name}' in {context} scope")]
    UnknownBackend { name: String, context: ScopeContext },
    #[error("backend '{name}' registered more than once")]
    DuplicateBackend { name: String },
}

/// Which half of a [`StorageScope`] applies to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeContext {
    Read,
    Write,
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Per-operation backend selection.
///
/// `None` for a context means every registered backend. `Some(vec![])` means
/// no backend at all. Names are used in listing order and are not
/// deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageScope {
    /// Backends consulted by `scan`, `exists` and `subscribe`.
    pub read: Option<Vec<String>>,
    /// Backends receiving `set` and `remove`.
    pub write: Option<Vec<String>>,
}

impl StorageScope {
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        Self {
            read: Some(read.into_iter().map(Into::into).collect()),
            write: Some(write.into_iter().map(Into::into).collect()),
        }
    }

    /// Restricts reads only; writes go to every backend.
    pub fn read_only<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            read: Some(names.into_iter().map(Into::into).collect()),
            write: None,
        }
    }

    /// Restricts writes only; reads consult every backend.
    pub fn write_only<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            read: None,
            write: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    #[must_use]
    pub fn names(&self, context: ScopeContext) -> Option<&[String]> {
        match context {
            ScopeContext::Read => self.read.as_deref(),
            ScopeContext::Write => self.write.as_deref(),
        }
    }
}

/// A handle resolved for one operation, tagged with its registry name.
#[derive(Debug, Clone)]
pub struct Named<H> {
    pub name: String,
    pub handle: H,
}

/// Ordered mapping from backend name to handle.
///
/// Read-only once built. Iteration and default resolution follow
/// registration order.
#[derive(Debug, Clone)]
pub struct Registry<H> {
    entries: Vec<Named<H>>,
}

impl<H: Clone> Registry<H> {
    /// Builds a registry, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::DuplicateBackend`] if a name appears twice.
    pub fn new<N, I>(backends: I) -> Result<Self, ScopeError>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, H)>,
    {
        let mut entries: Vec<Named<H>> = Vec::new();
        for (name, handle) in backends {
            let name = name.into();
            if entries.iter().any(|e| e.name == name) {
                return Err(ScopeError::DuplicateBackend { name });
            }
            entries.push(Named { name, handle });
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&H> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.handle)
    }

    /// Every backend, in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<Named<H>> {
        self.entries.clone()
    }

    /// Builds a registry with the same names and transformed handles.
    pub fn map<T, F>(&self, mut f: F) -> Registry<T>
    where
        F: FnMut(&str, &H) -> T,
    {
        Registry {
            entries: self
                .entries
                .iter()
                .map(|e| Named {
                    name: e.name.clone(),
                    handle: f(&e.name, &e.handle),
                })
                .collect(),
        }
    }

    /// Resolves the backends taking part in an operation of `context`.
    ///
    /// An absent scope, or an absent list for `context`, yields every backend
    /// in registration order. A present list yields exactly the listed
    /// backends in listing order, duplicates included.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnknownBackend`] for the first listed name that
    /// is not registered.
    pub fn resolve(
        &self,
        scope: Option<&StorageScope>,
        context: ScopeContext,
    ) -> Result<Vec<Named<H>>, ScopeError> {
        let Some(names) = scope.and_then(|s| s.names(context)) else {
            return Ok(self.all());
        };
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .map(|handle| Named {
                        name: name.clone(),
                        handle: handle.clone(),
                    })
                    .ok_or_else(|| ScopeError::UnknownBackend {
                        name: name.clone(),
                        context,
                    })
            })
            .collect()
    }

    /// Checks that every name in `scope` is registered.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnknownBackend`] for the first unknown name,
    /// checking the read list before the write list.
    pub fn validate(&self, scope: &StorageScope) -> Result<(), ScopeError> {
        for context in [ScopeContext::Read, ScopeContext::Write] {
            for name in scope.names(context).unwrap_or_default() {
                if self.get(name).is_none() {
                    return Err(ScopeError::UnknownBackend {
                        name: name.clone(),
                        context,
                    });
                }
            }
        }
        Ok(())
    }
}
