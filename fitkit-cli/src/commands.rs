//! Subcommand handlers.

use crate::Commands;
use fitkit_core::nn::{Loss, Model};
use fitkit_core::optim::{LrScheduler, Optimizer};
use fitkit_core::training::runner::Runner;
use fitkit_core::{Experiment, ExperimentConfig, Registries, TrainerContext, load_config};
use std::path::Path;

pub fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { config, base_dir } => run(&config, &base_dir),
        Commands::Check { config } => check(&config),
        Commands::Registry => {
            let registries = Registries::builtin();
            let listing = serde_json::json!({
                "models": registries.models.names(),
                "losses": registries.losses.names(),
                "optimizers": registries.optimizers.names(),
                "schedulers": registries.schedulers.names(),
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
    }
}

fn load(path: &Path) -> anyhow::Result<ExperimentConfig> {
    load_config(path).map_err(|e| anyhow::anyhow!("Configuration error in {}: {e}", path.display()))
}

fn run(path: &Path, base_dir: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    let summary = Runner::run_in(config, base_dir)?;
    let report = serde_json::json!({
        "run_dir": summary.run_dir,
        "status": summary.record.status,
        "epochs": summary.metrics.epochs_completed,
        "global_step": summary.metrics.global_step,
        "best_epoch": summary.metrics.best_epoch,
        "best_val_loss": summary.metrics.best_val_loss,
        "stopped_early": summary.metrics.stopped_early,
        "best_checkpoint": summary.best_checkpoint.as_ref().map(|c| &c.path),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = load(path)?;
    let context = TrainerContext::new(config.trainer.strategy, config.trainer.devices);
    let mut experiment = Experiment::new(config)?;
    experiment.attach(context);
    experiment.prepare_data()?;
    let (optimizers, schedulers) = experiment.configure_optimizers()?;
    let train = experiment.train_dataloader()?;
    let val = experiment.val_dataloader()?;

    let report = serde_json::json!({
        "model": experiment.model().name(),
        "parameters": experiment.model().num_parameters(),
        "loss": experiment.loss().name(),
        "optimizers": optimizers.iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
        "schedulers": schedulers.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
        "strategy": context.strategy,
        "devices": context.devices,
        "batch_size": experiment.batch_size(),
        "train_instances": train.dataset().len(),
        "val_instances": val.dataset().len(),
        "train_batches": train.len(),
        "val_batches": val.len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
