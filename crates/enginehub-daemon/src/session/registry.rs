//! Live session counters, per engine category and in total.
//!
//! Counters are plain atomics. A [`SessionGuard`] is handed out on
//! registration and decrements both counters when dropped, so a session is
//! unregistered on every exit path, including panics and aborted tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

struct Category {
    name: String,
    label: String,
    active: AtomicUsize,
}

/// Process-wide session counters.
pub struct SessionRegistry {
    total: AtomicUsize,
    categories: Vec<Category>,
    max_sessions: usize,
}

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Session limit reached ({max})")]
    AtCapacity { max: usize },

    #[error("Unknown session category: {category}")]
    UnknownCategory { category: String },
}

impl SessionRegistry {
    /// Create a registry for the given `(name, label)` categories.
    /// `max_sessions == 0` means unlimited.
    pub fn new<I, N, L>(categories: I, max_sessions: usize) -> Self
    where
        I: IntoIterator<Item = (N, L)>,
        N: Into<String>,
        L: Into<String>,
    {
        Self {
            total: AtomicUsize::new(0),
            categories: categories
                .into_iter()
                .map(|(name, label)| Category {
                    name: name.into(),
                    label: label.into(),
                    active: AtomicUsize::new(0),
                })
                .collect(),
            max_sessions,
        }
    }

    /// Count a new session in `category`.
    pub fn register(self: &Arc<Self>, category: &str) -> Result<SessionGuard, RegistryError> {
        let index = self
            .categories
            .iter()
            .position(|c| c.name == category)
            .ok_or_else(|| RegistryError::UnknownCategory {
                category: category.to_string(),
            })?;

        let max = self.max_sessions;
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .map_err(|_| RegistryError::AtCapacity { max })?;
        self.categories[index].active.fetch_add(1, Ordering::AcqRel);

        Ok(SessionGuard {
            registry: Arc::clone(self),
            index,
        })
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Active sessions in `category`, if it exists.
    pub fn count(&self, category: &str) -> Option<usize> {
        self.categories
            .iter()
            .find(|c| c.name == category)
            .map(|c| c.active.load(Ordering::Acquire))
    }

    /// Point-in-time view for the status page. Advisory: counters may move
    /// between individual loads.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            total: self.total(),
            categories: self
                .categories
                .iter()
                .map(|c| CategoryCount {
                    name: c.name.clone(),
                    label: c.label.clone(),
                    active: c.active.load(Ordering::Acquire),
                })
                .collect(),
        }
    }

    fn release(&self, index: usize) {
        self.categories[index].active.fetch_sub(1, Ordering::AcqRel);
        self.total.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Keeps one session counted until dropped.
#[must_use = "the session is unregistered as soon as the guard is dropped"]
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    index: usize,
}

impl SessionGuard {
    pub fn category(&self) -> &str {
        &self.registry.categories[self.index].name
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(self.index);
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("category", &self.category())
            .finish()
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub total: usize,
    pub categories: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub label: String,
    pub active: usize,
}
