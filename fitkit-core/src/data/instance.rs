//! Instance preparation: load labeled examples and split them into disjoint
//! train and validation collections.

use crate::config::{InstanceConfig, InstanceSource};
use crate::error::{FitError, Result};
use ndarray::Array2;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A single labeled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

/// Load instances from the configured source and split them.
///
/// The split partitions instance indices, so the two collections never share
/// an instance. Both sides are guaranteed non-empty.
pub fn get_train_val_instances(config: &InstanceConfig) -> Result<(Vec<Instance>, Vec<Instance>)> {
    let instances = load_instances(&config.source)?;
    check_widths(&instances)?;

    let n = instances.len();
    if n < 2 {
        return Err(FitError::data(format!(
            "need at least 2 instances to split, got {n}"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    if config.shuffle {
        let mut rng = StdRng::seed_from_u64(config.seed);
        order.shuffle(&mut rng);
    }

    let n_val = ((n as f64) * config.val_fraction).round() as usize;
    let n_val = n_val.clamp(1, n - 1);

    let mut slots: Vec<Option<Instance>> = instances.into_iter().map(Some).collect();
    let mut take = |i: usize| slots[i].take();
    let val: Vec<Instance> = order[..n_val].iter().filter_map(|&i| take(i)).collect();
    let train: Vec<Instance> = order[n_val..].iter().filter_map(|&i| take(i)).collect();

    tracing::info!(
        train = train.len(),
        val = val.len(),
        "Prepared instances"
    );
    Ok((train, val))
}

fn load_instances(source: &InstanceSource) -> Result<Vec<Instance>> {
    match source {
        InstanceSource::Synthetic {
            n,
            in_features,
            out_features,
            noise,
            seed,
        } => synthetic(*n, *in_features, *out_features, *noise, *seed),
        InstanceSource::Jsonl { path } => read_jsonl(path),
    }
}

/// Targets are `x W + noise`, with `W` and `x` drawn from `U(-1, 1)`.
fn synthetic(
    n: usize,
    in_features: usize,
    out_features: usize,
    noise: f32,
    seed: u64,
) -> Result<Vec<Instance>> {
    if in_features == 0 || out_features == 0 {
        return Err(FitError::data("synthetic source needs non-zero feature counts"));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let unit = Uniform::new_inclusive(-1.0f32, 1.0);
    let w = Array2::random_using((in_features, out_features), unit, &mut rng);
    let x = Array2::random_using((n, in_features), unit, &mut rng);
    let mut y = x.dot(&w);
    if noise > 0.0 {
        y.scaled_add(noise, &Array2::random_using((n, out_features), unit, &mut rng));
    }

    Ok(x.outer_iter()
        .zip(y.outer_iter())
        .map(|(xi, yi)| Instance {
            input: xi.to_vec(),
            target: yi.to_vec(),
        })
        .collect())
}

fn read_jsonl(path: &Path) -> Result<Vec<Instance>> {
    let file = std::fs::File::open(path)
        .map_err(|e| FitError::data(format!("cannot open {}: {e}", path.display())))?;
    let mut instances = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let instance: Instance = serde_json::from_str(&line).map_err(|e| {
            FitError::data(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        instances.push(instance);
    }
    tracing::debug!(path = %path.display(), count = instances.len(), "Read instances");
    Ok(instances)
}

fn check_widths(instances: &[Instance]) -> Result<()> {
    let Some(first) = instances.first() else {
        return Ok(());
    };
    let (din, dout) = (first.input.len(), first.target.len());
    if din == 0 || dout == 0 {
        return Err(FitError::data("instances must have non-empty input and target"));
    }
    if let Some((i, bad)) = instances
        .iter()
        .enumerate()
        .find(|(_, inst)| inst.input.len() != din || inst.target.len() != dout)
    {
        return Err(FitError::data(format!(
            "instance {i} has widths ({}, {}), expected ({din}, {dout})",
            bad.input.len(),
            bad.target.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn synthetic_config(n: usize, val_fraction: f64) -> InstanceConfig {
        InstanceConfig {
            source: InstanceSource::Synthetic {
                n,
                in_features: 3,
                out_features: 2,
                noise: 0.0,
                seed: 1,
            },
            val_fraction,
            shuffle: true,
            seed: 9,
        }
    }

    #[test]
    fn test_split_sizes_and_disjointness() {
        let (train, val) = get_train_val_instances(&synthetic_config(50, 0.2)).unwrap();
        assert_eq!(train.len(), 40);
        assert_eq!(val.len(), 10);
        assert!(val.iter().all(|v| !train.contains(v)));
    }

    #[test]
    fn test_split_never_empties_a_side() {
        let (train, val) = get_train_val_instances(&synthetic_config(3, 0.01)).unwrap();
        assert_eq!((train.len(), val.len()), (2, 1));
        let (train, val) = get_train_val_instances(&synthetic_config(3, 0.99)).unwrap();
        assert_eq!((train.len(), val.len()), (1, 2));
        assert!(get_train_val_instances(&synthetic_config(1, 0.5)).is_err());
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = get_train_val_instances(&synthetic_config(20, 0.25)).unwrap();
        let b = get_train_val_instances(&synthetic_config(20, 0.25)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_synthetic_targets_follow_linear_map() {
        let instances = synthetic(4, 2, 1, 0.0, 5).unwrap();
        assert_eq!(instances.len(), 4);
        assert!(instances.iter().all(|i| i.input.len() == 2 && i.target.len() == 1));
    }

    #[test]
    fn test_read_jsonl_and_width_check() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"input": [1.0, 2.0], "target": [3.0]}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"input": [0.5, 0.5], "target": [1.0]}}"#).unwrap();
        drop(f);

        let instances = read_jsonl(&path).unwrap();
        assert_eq!(instances.len(), 2);
        assert!(check_widths(&instances).is_ok());

        let ragged = vec![
            instances[0].clone(),
            Instance {
                input: vec![1.0],
                target: vec![1.0],
            },
        ];
        assert!(matches!(check_widths(&ragged), Err(FitError::Data(_))));
    }

    #[test]
    fn test_read_jsonl_reports_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"input\": [1.0], \"target\": [1.0]}\nnot json\n").unwrap();
        let err = read_jsonl(&path).unwrap_err();
        assert!(err.to_string().contains("bad.jsonl:2"));
    }
}
