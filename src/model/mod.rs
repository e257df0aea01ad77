//! # Wire Model
//!
//! Entities exchanged with the backend. Field names are part of the wire
//! contract and must match the backend schema exactly (camelCase).
//!
//! ```text
//! ┌──────────────────────┬────────────────────────────────────────────────┐
//! │ Entity               │ Owner / writers                                │
//! ├──────────────────────┼────────────────────────────────────────────────┤
//! │ DataOwner            │ the data owner (public keys, Shamir partitions)│
//! │ ExchangeData         │ delegator and delegate, guarded by `rev`       │
//! │ ExchangeDataMap      │ first creator, read-only for others            │
//! │ MaintenanceTask      │ creator, readable by its delegates             │
//! │ RecoveryData         │ creator; consumed once, never mutated          │
//! └──────────────────────┴────────────────────────────────────────────────┘
//! ```
//!
//! Parsing is strict: a missing or mistyped required field fails with
//! [`Error::DeserializationError`] instead of producing a partial entity.

mod data_owner;
mod exchange_data;
mod maintenance_task;
mod recovery_data;

pub use data_owner::{DataOwner, DataOwnerType, ShamirPartition};
pub use exchange_data::{ExchangeData, ExchangeDataMap};
pub use maintenance_task::{MaintenanceTask, PropertyStub, TaskStatus, TypedValue};
pub use recovery_data::{RecoveryData, RecoveryDataType};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};

/// JSON encoding shared by every wire entity
pub trait WireEntity: Serialize + DeserializeOwned {
    /// Serialize to the backend JSON shape
    fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Parse from the backend JSON shape
    fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

impl WireEntity for DataOwner {}
impl WireEntity for ExchangeData {}
impl WireEntity for ExchangeDataMap {}
impl WireEntity for MaintenanceTask {}
impl WireEntity for RecoveryData {}

/// One page of a paginated query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedList<T> {
    /// Entities of this page
    pub rows: Vec<T>,
    /// Start key of the next page, absent on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_key: Option<String>,
}

impl<T> PaginatedList<T> {
    /// A final page
    pub fn last(rows: Vec<T>) -> Self {
        Self {
            rows,
            next_key: None,
        }
    }
}
