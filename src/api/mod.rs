//! # Backend Collaborators
//!
//! REST APIs the core calls into. The SDK layer implements these traits over
//! HTTP; [`MemoryBackend`] implements all of them in memory.
//!
//! ```text
//! ┌───────────────────────┬────────────────────────────────────────────────┐
//! │ Trait                 │ Used by                                        │
//! ├───────────────────────┼────────────────────────────────────────────────┤
//! │ DataOwnerApi          │ key hierarchy, Shamir splits, key updates      │
//! │ ExchangeDataApi       │ exchange data manager, Shamir recovery         │
//! │ ExchangeDataMapApi    │ exchange data directory                        │
//! │ MaintenanceTaskApi    │ key pair update protocol                       │
//! │ RecoveryDataApi       │ recovery manager                               │
//! └───────────────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! Implementations report a stale `rev` as [`Error::Conflict`] and never
//! retry; retry policy belongs to the HTTP layer.
//!
//! [`Error::Conflict`]: crate::error::Error::Conflict

mod memory;

pub use memory::MemoryBackend;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::crypto::Fingerprint;
use crate::error::Result;
use crate::model::{
    DataOwner, ExchangeData, ExchangeDataMap, MaintenanceTask, PaginatedList, RecoveryData,
    RecoveryDataType, TaskStatus,
};

/// Body of a map creation batch: map id → fingerprint → encrypted exchange data id
pub type ExchangeDataMapBatch = BTreeMap<String, BTreeMap<Fingerprint, String>>;

/// Data owners
#[async_trait]
pub trait DataOwnerApi: Send + Sync {
    /// Fetch a data owner, [`Error::NotFound`](crate::error::Error::NotFound) if unknown
    async fn get_data_owner(&self, id: &str) -> Result<DataOwner>;

    /// Update a data owner; `rev` must be current
    async fn modify_data_owner(&self, data_owner: &DataOwner) -> Result<DataOwner>;
}

/// Exchange data
#[async_trait]
pub trait ExchangeDataApi: Send + Sync {
    /// Create new exchange data
    async fn create_exchange_data(&self, exchange_data: &ExchangeData) -> Result<ExchangeData>;

    /// Update exchange data; `rev` must be current
    async fn modify_exchange_data(&self, exchange_data: &ExchangeData) -> Result<ExchangeData>;

    /// Fetch by id
    async fn get_exchange_data_by_id(&self, id: &str) -> Result<Option<ExchangeData>>;

    /// Every exchange data from `delegator` to `delegate`
    async fn get_exchange_data_by_delegator_delegate(
        &self,
        delegator: &str,
        delegate: &str,
    ) -> Result<Vec<ExchangeData>>;

    /// Exchange data where `participant` is delegator or delegate, by page
    async fn get_exchange_data_by_participant(
        &self,
        participant: &str,
        start_key: Option<&str>,
        limit: usize,
    ) -> Result<PaginatedList<ExchangeData>>;
}

/// Exchange data maps
#[async_trait]
pub trait ExchangeDataMapApi: Send + Sync {
    /// Fetch by id
    async fn get_exchange_data_map_by_id(&self, id: &str) -> Result<Option<ExchangeDataMap>>;

    /// Fetch the existing maps among `ids`
    async fn get_exchange_data_map_by_batch(&self, ids: &[String]) -> Result<Vec<ExchangeDataMap>>;

    /// Create maps; ids that already exist are left untouched
    async fn create_exchange_data_map_batch(&self, batch: &ExchangeDataMapBatch) -> Result<()>;
}

/// Query over maintenance tasks; unset fields do not filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceTaskFilter {
    /// Exact task type
    pub task_type: Option<String>,
    /// Created strictly after this instant (epoch millis)
    pub created_after: Option<i64>,
    /// Task readable by this data owner
    pub delegate: Option<String>,
    /// Exact status
    pub status: Option<TaskStatus>,
}

/// Maintenance tasks
#[async_trait]
pub trait MaintenanceTaskApi: Send + Sync {
    /// Create a task
    async fn create_maintenance_task(&self, task: &MaintenanceTask) -> Result<MaintenanceTask>;

    /// Update a task; `rev` must be current
    async fn modify_maintenance_task(&self, task: &MaintenanceTask) -> Result<MaintenanceTask>;

    /// Tasks matching a filter, oldest first
    async fn filter_maintenance_tasks(
        &self,
        filter: &MaintenanceTaskFilter,
    ) -> Result<Vec<MaintenanceTask>>;
}

/// Recovery data
#[async_trait]
pub trait RecoveryDataApi: Send + Sync {
    /// Store a recovery blob
    async fn create_recovery_data(&self, data: &RecoveryData) -> Result<RecoveryData>;

    /// Fetch a blob; expired blobs are reported as missing
    async fn get_recovery_data(&self, id: &str) -> Result<Option<RecoveryData>>;

    /// Delete a blob; missing blobs are not an error
    async fn delete_recovery_data(&self, id: &str) -> Result<()>;

    /// Delete every blob for a recipient, returning how many were deleted
    async fn delete_all_recovery_data_for_recipient(&self, recipient: &str) -> Result<usize>;

    /// Delete every blob of one type for a recipient
    async fn delete_all_recovery_data_of_type_for_recipient(
        &self,
        data_type: RecoveryDataType,
        recipient: &str,
    ) -> Result<usize>;
}
