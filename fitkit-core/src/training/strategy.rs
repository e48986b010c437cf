//! Execution strategies and the context a trainer hands to an experiment.

use serde::{Deserialize, Serialize};

/// How work is spread across devices.
///
/// Devices are emulated in-process: `dp` and `ddp2` shard each batch across
/// devices, `ddp` gives every emulated rank its own batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    #[default]
    #[serde(rename = "single")]
    Single,
    /// Single process, batch split across devices, outputs gathered.
    #[serde(rename = "dp")]
    DataParallel,
    /// One process per device, gradients all-reduced.
    #[serde(rename = "ddp")]
    DistributedDataParallel,
    /// `dp` within a node, `ddp` across nodes.
    #[serde(rename = "ddp2")]
    Ddp2,
}

impl Strategy {
    /// Whether the effective batch spans all devices of a single process.
    pub fn scales_batch(self) -> bool {
        matches!(self, Self::DataParallel)
    }

    /// Whether step outputs are gathered across device shards, which requires
    /// rank-1 losses.
    pub fn gathers_step_outputs(self) -> bool {
        matches!(self, Self::DataParallel | Self::Ddp2)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::DataParallel => "dp",
            Self::DistributedDataParallel => "ddp",
            Self::Ddp2 => "ddp2",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution facts the trainer exposes to the experiment it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainerContext {
    pub strategy: Strategy,
    pub devices: usize,
}

impl TrainerContext {
    pub fn new(strategy: Strategy, devices: usize) -> Self {
        Self {
            strategy,
            devices: devices.max(1),
        }
    }

    pub fn use_dp(&self) -> bool {
        self.strategy == Strategy::DataParallel
    }

    pub fn use_ddp2(&self) -> bool {
        self.strategy == Strategy::Ddp2
    }
}

impl Default for TrainerContext {
    fn default() -> Self {
        Self::new(Strategy::Single, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_flags() {
        assert!(Strategy::DataParallel.scales_batch());
        assert!(!Strategy::Ddp2.scales_batch());
        assert!(!Strategy::DistributedDataParallel.scales_batch());
        assert!(Strategy::Ddp2.gathers_step_outputs());
        assert!(!Strategy::Single.gathers_step_outputs());
        assert!(!Strategy::DistributedDataParallel.gathers_step_outputs());
    }

    #[test]
    fn test_strategy_serde_names() {
        let s: Strategy = serde_json::from_str("\"ddp2\"").unwrap();
        assert_eq!(s, Strategy::Ddp2);
        assert_eq!(serde_json::to_string(&Strategy::DataParallel).unwrap(), "\"dp\"");
        assert_eq!(Strategy::DistributedDataParallel.to_string(), "ddp");
    }

    #[test]
    fn test_context_clamps_devices() {
        let ctx = TrainerContext::new(Strategy::DataParallel, 0);
        assert_eq!(ctx.devices, 1);
        assert!(ctx.use_dp());
        assert!(!ctx.use_ddp2());
    }
}
