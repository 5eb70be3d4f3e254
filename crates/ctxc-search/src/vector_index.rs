//! Vector index over unit-norm embeddings.
//!
//! The index is a rebuildable cache: the canonical vectors live in the
//! store's embeddings table, and a sidecar manifest records which model the
//! cached index was built for. Backends are variants of one sum type; the
//! flat backend scans every vector, which is exact and fast enough for a
//! single-user corpus.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use ctxc_core::{Error, Result};
use ctxc_db::Database;

/// Sidecar manifest describing what the cached index holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub model: String,
    pub dim: usize,
    pub chunks: usize,
}

impl IndexManifest {
    /// Load a manifest, returning `None` when absent or unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Persist the manifest next to the index files.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Whether a cached index built under this manifest is still usable.
    pub fn matches(&self, model: &str, dim: usize) -> bool {
        self.model == model && self.dim == dim
    }
}

/// Exact brute-force backend.
#[derive(Debug, Default)]
pub struct FlatIndex {
    slots: HashMap<Uuid, usize>,
    ids: Vec<Uuid>,
    vectors: Vec<Vec<f32>>,
}

/// Vector index backend, fixed at construction.
#[derive(Debug)]
pub enum VectorIndex {
    Flat { dim: usize, index: FlatIndex },
}

impl VectorIndex {
    /// Empty flat index with the embedder's dimension.
    pub fn flat(dim: usize) -> Self {
        Self::Flat {
            dim,
            index: FlatIndex::default(),
        }
    }

    /// Rebuild from the canonical vectors in the store.
    pub async fn rebuild(db: &Database, model: &str, dim: usize) -> Result<Self> {
        let rows = db.embeddings.load_all(model).await?;
        let mut index = Self::flat(dim);
        let (ids, vectors): (Vec<Uuid>, Vec<Vec<f32>>) = rows.into_iter().unzip();
        index.upsert(&ids, &vectors)?;
        info!(
            subsystem = "retrieval",
            component = "vector_index",
            op = "rebuild",
            model,
            chunk_count = index.len(),
            "Vector index rebuilt from store"
        );
        Ok(index)
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Flat { dim, .. } => *dim,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Flat { index, .. } => index.ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace vectors by id. Idempotent: re-upserting an id
    /// replaces its vector.
    pub fn upsert(&mut self, ids: &[Uuid], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::Index(format!(
                "upsert got {} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let Self::Flat { dim, index } = self;
        for (id, vector) in ids.iter().zip(vectors) {
            if vector.len() != *dim {
                return Err(Error::Index(format!(
                    "vector for {} has dim {}, index is {}",
                    id,
                    vector.len(),
                    dim
                )));
            }
            match index.slots.get(id) {
                Some(&slot) => index.vectors[slot] = vector.clone(),
                None => {
                    index.slots.insert(*id, index.ids.len());
                    index.ids.push(*id);
                    index.vectors.push(vector.clone());
                }
            }
        }
        Ok(())
    }

    /// Remove ids; unknown ids are ignored.
    pub fn remove(&mut self, ids: &[Uuid]) {
        let Self::Flat { index, .. } = self;
        for id in ids {
            if let Some(slot) = index.slots.remove(id) {
                index.ids.swap_remove(slot);
                index.vectors.swap_remove(slot);
                if slot < index.ids.len() {
                    // The swapped-in tail entry moved to `slot`.
                    index.slots.insert(index.ids[slot], slot);
                }
            }
        }
    }

    /// Top-k by cosine, descending, ties broken by ascending id.
    ///
    /// Vectors are unit-norm so cosine is the inner product. When
    /// `filter_ids` is given, only those ids are scored.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter_ids: Option<&HashSet<Uuid>>,
    ) -> Result<Vec<(Uuid, f32)>> {
        let Self::Flat { dim, index } = self;
        if query.len() != *dim {
            return Err(Error::Index(format!(
                "query vector has dim {}, index is {}",
                query.len(),
                dim
            )));
        }

        let mut hits: Vec<(Uuid, f32)> = index
            .ids
            .iter()
            .zip(&index.vectors)
            .filter(|(id, _)| filter_ids.is_none_or(|f| f.contains(id)))
            .map(|(id, vector)| (*id, dot(query, vector)))
            .collect();

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Borrow a stored vector, for MMR similarity computations.
    pub fn get(&self, id: &Uuid) -> Option<&[f32]> {
        let Self::Flat { index, .. } = self;
        index
            .slots
            .get(id)
            .map(|&slot| index.vectors[slot].as_slice())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
