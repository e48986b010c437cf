//! Data pipeline: instance preparation, dataset adapter and batching loader.

pub mod instance;
pub mod loader;

pub use instance::{Instance, get_train_val_instances};
pub use loader::{Batch, DataLoader, InstanceDataset};
