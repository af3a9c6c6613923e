//! In-memory identity gallery.
//!
//! A [`Gallery`] is immutable once built. [`SharedGallery`] publishes whole
//! galleries through an `ArcSwap`, so a reader holds either the previous or
//! the next snapshot and never a half-rebuilt one.

use crate::types::{Embedding, Identity};
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub encoding: Embedding,
}

/// Best gallery candidate for a query encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Nearest<'a> {
    pub index: usize,
    pub name: &'a str,
    pub distance: f32,
}

/// Ordered (name, encoding) pairs with unique names.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Build from entries in insertion order. Later duplicates of a name are dropped.
    pub fn new(entries: impl IntoIterator<Item = GalleryEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| {
                let fresh = seen.insert(entry.name.clone());
                if !fresh {
                    tracing::warn!(name = %entry.name, "duplicate gallery name ignored");
                }
                fresh
            })
            .collect();
        Self { entries }
    }

    pub fn from_identities(identities: &[Identity]) -> Self {
        Self::new(identities.iter().map(|identity| GalleryEntry {
            name: identity.name.clone(),
            encoding: identity.encoding.clone(),
        }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Minimum-distance entry under `distance`.
    ///
    /// Ties resolve to the earliest entry (gallery insertion order). NaN
    /// distances never win.
    pub fn nearest<F>(&self, query: &Embedding, distance: F) -> Option<Nearest<'_>>
    where
        F: Fn(&Embedding, &Embedding) -> f32,
    {
        let mut best: Option<Nearest<'_>> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let d = distance(query, &entry.encoding);
            if d.is_nan() {
                continue;
            }
            if best.as_ref().map_or(true, |b| d < b.distance) {
                best = Some(Nearest {
                    index,
                    name: &entry.name,
                    distance: d,
                });
            }
        }
        best
    }
}

/// Atomically replaceable gallery snapshot.
pub struct SharedGallery {
    current: ArcSwap<Gallery>,
}

impl SharedGallery {
    pub fn new(initial: Gallery) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn snapshot(&self) -> Arc<Gallery> {
        self.current.load_full()
    }

    /// Publish a complete replacement.
    pub fn replace(&self, next: Gallery) {
        tracing::info!(identities = next.len(), "gallery published");
        self.current.store(Arc::new(next));
    }
}

impl Default for SharedGallery {
    fn default() -> Self {
        Self::new(Gallery::default())
    }
}
