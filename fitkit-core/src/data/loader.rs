//! Dataset adapter and batching loader over prepared instances.

use super::instance::Instance;
use crate::error::{FitError, Result};
use ndarray::{Array2, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::rc::Rc;

/// A stacked `(x, y)` pair, one row per instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split rows into at most `parts` contiguous shards of `ceil(len / parts)`
    /// rows; trailing shards may be smaller, empty shards are omitted.
    pub fn shard(&self, parts: usize) -> Vec<Batch> {
        let parts = parts.max(1);
        let chunk = self.len().div_ceil(parts).max(1);
        (0..self.len())
            .step_by(chunk)
            .map(|start| {
                let end = (start + chunk).min(self.len());
                Batch {
                    x: self.x.slice(s![start..end, ..]).to_owned(),
                    y: self.y.slice(s![start..end, ..]).to_owned(),
                }
            })
            .collect()
    }
}

/// Indexable view over a fixed collection of instances.
#[derive(Debug, Clone)]
pub struct InstanceDataset {
    instances: Rc<[Instance]>,
    in_features: usize,
    out_features: usize,
}

impl InstanceDataset {
    pub fn new(instances: Rc<[Instance]>) -> Result<Self> {
        let first = instances
            .first()
            .ok_or_else(|| FitError::data("dataset has no instances"))?;
        let (in_features, out_features) = (first.input.len(), first.target.len());
        if instances
            .iter()
            .any(|i| i.input.len() != in_features || i.target.len() != out_features)
        {
            return Err(FitError::data("dataset instances have inconsistent widths"));
        }
        Ok(Self {
            instances,
            in_features,
            out_features,
        })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Stack the given instances into a batch.
    pub fn collate(&self, indices: &[usize]) -> Result<Batch> {
        let mut x = Vec::with_capacity(indices.len() * self.in_features);
        let mut y = Vec::with_capacity(indices.len() * self.out_features);
        for &i in indices {
            let inst = self
                .get(i)
                .ok_or_else(|| FitError::data(format!("index {i} out of range")))?;
            x.extend_from_slice(&inst.input);
            y.extend_from_slice(&inst.target);
        }
        let rows = indices.len();
        Ok(Batch {
            x: Array2::from_shape_vec((rows, self.in_features), x)
                .map_err(|e| FitError::shape(e.to_string()))?,
            y: Array2::from_shape_vec((rows, self.out_features), y)
                .map_err(|e| FitError::shape(e.to_string()))?,
        })
    }
}

/// Batches a dataset in order, or in a per-epoch seeded shuffle.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: InstanceDataset,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: u64,
}

impl DataLoader {
    pub fn new(dataset: InstanceDataset, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(FitError::config("batch_size must be at least 1"));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle: false,
            drop_last: false,
            seed: 0,
        })
    }

    pub fn shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dataset(&self) -> &InstanceDataset {
        &self.dataset
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches for one epoch; `epoch` only matters when shuffling.
    pub fn epoch(&self, epoch: usize) -> Result<Vec<Batch>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
            .chunks(self.batch_size)
            .take(self.len())
            .map(|chunk| self.dataset.collate(chunk))
            .collect()
    }
}
