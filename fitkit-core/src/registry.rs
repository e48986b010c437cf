//! Name-based registries that turn `{type, kwargs}` descriptors into objects.

use crate::config::{ComponentSpec, Kwargs};
use crate::error::{FitError, Result};
use crate::nn::loss::Loss;
use crate::nn::{Model, ParamRef};
use crate::optim::Optimizer;
use crate::optim::lr_scheduler::LrScheduler;
use std::collections::BTreeMap;

pub type ModelCtor = fn(&Kwargs) -> Result<Box<dyn Model>>;
pub type LossCtor = fn(&Kwargs) -> Result<Box<dyn Loss>>;
pub type OptimizerCtor = fn(Vec<ParamRef>, &Kwargs) -> Result<Box<dyn Optimizer>>;
pub type SchedulerCtor = fn(&dyn Optimizer, &Kwargs) -> Result<Box<dyn LrScheduler>>;

/// Ordered mapping from type name to constructor.
#[derive(Clone)]
pub struct Registry<C> {
    kind: &'static str,
    entries: BTreeMap<String, C>,
}

impl<C: Copy> Registry<C> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Register a constructor, replacing any previous entry of that name.
    pub fn register(&mut self, name: &str, ctor: C) -> &mut Self {
        if self.entries.insert(name.to_string(), ctor).is_some() {
            tracing::debug!(kind = self.kind, name, "Replaced registry entry");
        }
        self
    }

    pub fn get(&self, name: &str) -> Result<C> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| FitError::UnknownType {
                kind: self.kind,
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl<C> std::fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The four registries an experiment resolves against.
#[derive(Debug, Clone)]
pub struct Registries {
    pub models: Registry<ModelCtor>,
    pub losses: Registry<LossCtor>,
    pub optimizers: Registry<OptimizerCtor>,
    pub schedulers: Registry<SchedulerCtor>,
}

impl Registries {
    /// Empty registries, for callers that want full control over what resolves.
    pub fn empty() -> Self {
        Self {
            models: Registry::new("model"),
            losses: Registry::new("loss"),
            optimizers: Registry::new("optimizer"),
            schedulers: Registry::new("scheduler"),
        }
    }

    /// Registries populated with every built-in implementation.
    pub fn builtin() -> Self {
        let mut registries = Self::empty();
        crate::nn::register_models(&mut registries.models);
        crate::nn::loss::register_losses(&mut registries.losses);
        crate::optim::register_optimizers(&mut registries.optimizers);
        crate::optim::lr_scheduler::register_schedulers(&mut registries.schedulers);
        registries
    }

    pub fn build_model(&self, spec: &ComponentSpec) -> Result<Box<dyn Model>> {
        (self.models.get(&spec.kind)?)(&spec.kwargs)
    }

    pub fn build_loss(&self, spec: &ComponentSpec) -> Result<Box<dyn Loss>> {
        (self.losses.get(&spec.kind)?)(&spec.kwargs)
    }

    pub fn build_optimizer(
        &self,
        spec: &ComponentSpec,
        params: Vec<ParamRef>,
    ) -> Result<Box<dyn Optimizer>> {
        (self.optimizers.get(&spec.kind)?)(params, &spec.kwargs)
    }

    pub fn build_scheduler(
        &self,
        spec: &ComponentSpec,
        optimizer: &dyn Optimizer,
    ) -> Result<Box<dyn LrScheduler>> {
        (self.schedulers.get(&spec.kind)?)(optimizer, &spec.kwargs)
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::builtin()
    }
}
