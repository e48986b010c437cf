//! Property-based tests for batch sizing and the train/validation split.

use proptest::prelude::*;

use fitkit_core::config::{ExperimentConfig, InstanceConfig, InstanceSource};
use fitkit_core::data::{DataLoader, InstanceDataset, get_train_val_instances};
use fitkit_core::training::{Experiment, Strategy as ExecStrategy, TrainerContext};
use serde_json::json;

fn config(batch_size: usize) -> ExperimentConfig {
    ExperimentConfig::from_value(json!({
        "model": {"type": "Linear", "kwargs": {"in_features": 2, "out_features": 1}},
        "loss": {"type": "MSELoss"},
        "optim": {"type": "SGD", "kwargs": {"lr": 0.1}},
        "optim_scheduler": {"type": "StepLR", "kwargs": {"step_size": 1}},
        "data": {"batch_size": batch_size},
        "instance": {"source": {"kind": "synthetic", "n": 10, "in_features": 2, "out_features": 1}},
        "early_stopping": {"monitor": "val_loss"}
    }))
    .unwrap()
}

fn exec_strategy() -> impl Strategy<Value = ExecStrategy> {
    prop_oneof![
        Just(ExecStrategy::Single),
        Just(ExecStrategy::DataParallel),
        Just(ExecStrategy::DistributedDataParallel),
        Just(ExecStrategy::Ddp2),
    ]
}

// --- Batch size properties ---

proptest! {
    #[test]
    fn batch_size_scales_only_under_dp(
        base in 1usize..512,
        devices in 1usize..16,
        strategy in exec_strategy(),
    ) {
        let mut exp = Experiment::new(config(base)).unwrap();
        exp.attach(TrainerContext::new(strategy, devices));
        let expected = if strategy == ExecStrategy::DataParallel { base * devices } else { base };
        prop_assert_eq!(exp.batch_size(), expected);
        prop_assert_eq!(exp.batch_size(), expected);
    }
}

// --- Split and loader properties ---

proptest! {
    #[test]
    fn split_is_a_disjoint_partition(
        n in 2usize..200,
        val_fraction in 0.01f64..0.99,
        seed in any::<u64>(),
    ) {
        let config = InstanceConfig {
            source: InstanceSource::Synthetic { n, in_features: 2, out_features: 1, noise: 0.0, seed },
            val_fraction,
            shuffle: true,
            seed,
        };
        let (train, val) = get_train_val_instances(&config).unwrap();
        prop_assert_eq!(train.len() + val.len(), n);
        prop_assert!(!train.is_empty());
        prop_assert!(!val.is_empty());
        for v in &val {
            prop_assert!(!train.contains(v));
        }
    }

    #[test]
    fn loader_covers_every_row_once(
        n in 2usize..100,
        batch_size in 1usize..32,
        seed in any::<u64>(),
        epoch in 0usize..5,
    ) {
        let config = InstanceConfig {
            source: InstanceSource::Synthetic { n, in_features: 2, out_features: 1, noise: 0.0, seed },
            val_fraction: 0.5,
            shuffle: false,
            seed,
        };
        let (train, _) = get_train_val_instances(&config).unwrap();
        let rows = train.len();
        let loader = DataLoader::new(InstanceDataset::new(train.into()).unwrap(), batch_size)
            .unwrap()
            .shuffle(true, seed);
        let batches = loader.epoch(epoch).unwrap();
        prop_assert_eq!(batches.len(), loader.len());
        prop_assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), rows);
        prop_assert!(batches.iter().all(|b| b.len() <= batch_size));
    }
}
