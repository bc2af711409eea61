pub mod storage;

pub use storage::{MaintenanceReport, RetryStore, StorageConfig, StorageError, StorageRecord};
