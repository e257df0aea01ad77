//! In-memory backend.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    DataOwnerApi, ExchangeDataApi, ExchangeDataMapApi, ExchangeDataMapBatch, MaintenanceTaskApi,
    MaintenanceTaskFilter, RecoveryDataApi,
};
use crate::error::{Error, Result};
use crate::model::{
    DataOwner, ExchangeData, ExchangeDataMap, MaintenanceTask, PaginatedList, RecoveryData,
    RecoveryDataType,
};
use crate::time::is_expired;

/// Every collaborator API over process memory
///
/// Writes check `rev` like the real backend, expired recovery data is
/// invisible, and each call is counted so tests can assert on traffic.
#[derive(Default)]
pub struct MemoryBackend {
    data_owners: RwLock<BTreeMap<String, DataOwner>>,
    exchange_data: RwLock<BTreeMap<String, ExchangeData>>,
    exchange_data_maps: RwLock<BTreeMap<String, ExchangeDataMap>>,
    maintenance_tasks: RwLock<BTreeMap<String, MaintenanceTask>>,
    recovery_data: RwLock<BTreeMap<String, RecoveryData>>,
    requests: Mutex<HashMap<&'static str, usize>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data owner, assigning it a first revision
    pub fn insert_data_owner(&self, mut data_owner: DataOwner) -> DataOwner {
        data_owner.rev = Some(next_rev(None));
        self.data_owners
            .write()
            .insert(data_owner.id.clone(), data_owner.clone());
        data_owner
    }

    /// Overwrite stored exchange data without any check
    pub fn force_exchange_data(&self, exchange_data: ExchangeData) {
        self.exchange_data
            .write()
            .insert(exchange_data.id.clone(), exchange_data);
    }

    /// Number of calls made to an API operation
    pub fn request_count(&self, operation: &str) -> usize {
        self.requests.lock().get(operation).copied().unwrap_or(0)
    }

    fn count(&self, operation: &'static str) {
        *self.requests.lock().entry(operation).or_insert(0) += 1;
    }
}

/// `rev` following `current`, formatted `{generation}-{random}`
fn next_rev(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

fn check_rev(id: &str, stored: Option<&str>, submitted: Option<&str>) -> Result<()> {
    if stored == submitted {
        Ok(())
    } else {
        Err(Error::Conflict(id.to_string()))
    }
}

#[async_trait]
impl DataOwnerApi for MemoryBackend {
    async fn get_data_owner(&self, id: &str) -> Result<DataOwner> {
        self.count("get_data_owner");
        self.data_owners
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("data owner {}", id)))
    }

    async fn modify_data_owner(&self, data_owner: &DataOwner) -> Result<DataOwner> {
        self.count("modify_data_owner");
        let mut owners = self.data_owners.write();
        let stored = owners
            .get(&data_owner.id)
            .ok_or_else(|| Error::NotFound(format!("data owner {}", data_owner.id)))?;
        check_rev(&data_owner.id, stored.rev.as_deref(), data_owner.rev.as_deref())?;

        let mut updated = data_owner.clone();
        updated.rev = Some(next_rev(data_owner.rev.as_deref()));
        owners.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl ExchangeDataApi for MemoryBackend {
    async fn create_exchange_data(&self, exchange_data: &ExchangeData) -> Result<ExchangeData> {
        self.count("create_exchange_data");
        let mut all = self.exchange_data.write();
        if all.contains_key(&exchange_data.id) {
            return Err(Error::Conflict(exchange_data.id.clone()));
        }
        let mut created = exchange_data.clone();
        created.rev = Some(next_rev(None));
        all.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn modify_exchange_data(&self, exchange_data: &ExchangeData) -> Result<ExchangeData> {
        self.count("modify_exchange_data");
        let mut all = self.exchange_data.write();
        let stored = all
            .get(&exchange_data.id)
            .ok_or_else(|| Error::ExchangeDataNotFound(exchange_data.id.clone()))?;
        check_rev(&exchange_data.id, stored.rev.as_deref(), exchange_data.rev.as_deref())?;

        let mut updated = exchange_data.clone();
        updated.rev = Some(next_rev(exchange_data.rev.as_deref()));
        all.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn get_exchange_data_by_id(&self, id: &str) -> Result<Option<ExchangeData>> {
        self.count("get_exchange_data_by_id");
        Ok(self.exchange_data.read().get(id).cloned())
    }

    async fn get_exchange_data_by_delegator_delegate(
        &self,
        delegator: &str,
        delegate: &str,
    ) -> Result<Vec<ExchangeData>> {
        self.count("get_exchange_data_by_delegator_delegate");
        Ok(self
            .exchange_data
            .read()
            .values()
            .filter(|ed| ed.delegator == delegator && ed.delegate == delegate)
            .cloned()
            .collect())
    }

    async fn get_exchange_data_by_participant(
        &self,
        participant: &str,
        start_key: Option<&str>,
        limit: usize,
    ) -> Result<PaginatedList<ExchangeData>> {
        self.count("get_exchange_data_by_participant");
        let all = self.exchange_data.read();
        let mut matching = all
            .values()
            .filter(|ed| ed.involves(participant))
            .filter(|ed| start_key.map_or(true, |start| ed.id.as_str() >= start));

        let rows: Vec<ExchangeData> = matching.by_ref().take(limit.max(1)).cloned().collect();
        let next_key = matching.next().map(|ed| ed.id.clone());
        Ok(PaginatedList { rows, next_key })
    }
}

#[async_trait]
impl ExchangeDataMapApi for MemoryBackend {
    async fn get_exchange_data_map_by_id(&self, id: &str) -> Result<Option<ExchangeDataMap>> {
        self.count("get_exchange_data_map_by_id");
        Ok(self.exchange_data_maps.read().get(id).cloned())
    }

    async fn get_exchange_data_map_by_batch(&self, ids: &[String]) -> Result<Vec<ExchangeDataMap>> {
        self.count("get_exchange_data_map_by_batch");
        let maps = self.exchange_data_maps.read();
        Ok(ids.iter().filter_map(|id| maps.get(id).cloned()).collect())
    }

    async fn create_exchange_data_map_batch(&self, batch: &ExchangeDataMapBatch) -> Result<()> {
        self.count("create_exchange_data_map_batch");
        let mut maps = self.exchange_data_maps.write();
        for (id, encrypted_ids) in batch {
            maps.entry(id.clone()).or_insert_with(|| ExchangeDataMap {
                id: id.clone(),
                rev: Some(next_rev(None)),
                encrypted_exchange_data_ids: encrypted_ids.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MaintenanceTaskApi for MemoryBackend {
    async fn create_maintenance_task(&self, task: &MaintenanceTask) -> Result<MaintenanceTask> {
        self.count("create_maintenance_task");
        let mut tasks = self.maintenance_tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(Error::Conflict(task.id.clone()));
        }
        let mut created = task.clone();
        created.rev = Some(next_rev(None));
        tasks.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn modify_maintenance_task(&self, task: &MaintenanceTask) -> Result<MaintenanceTask> {
        self.count("modify_maintenance_task");
        let mut tasks = self.maintenance_tasks.write();
        let stored = tasks
            .get(&task.id)
            .ok_or_else(|| Error::NotFound(format!("maintenance task {}", task.id)))?;
        check_rev(&task.id, stored.rev.as_deref(), task.rev.as_deref())?;

        let mut updated = task.clone();
        updated.rev = Some(next_rev(task.rev.as_deref()));
        tasks.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn filter_maintenance_tasks(
        &self,
        filter: &MaintenanceTaskFilter,
    ) -> Result<Vec<MaintenanceTask>> {
        self.count("filter_maintenance_tasks");
        let mut matching: Vec<MaintenanceTask> = self
            .maintenance_tasks
            .read()
            .values()
            .filter(|t| filter.task_type.as_ref().map_or(true, |ty| &t.task_type == ty))
            .filter(|t| filter.created_after.map_or(true, |after| t.created > after))
            .filter(|t| filter.delegate.as_ref().map_or(true, |d| t.delegates.contains(d)))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[async_trait]
impl RecoveryDataApi for MemoryBackend {
    async fn create_recovery_data(&self, data: &RecoveryData) -> Result<RecoveryData> {
        self.count("create_recovery_data");
        let mut all = self.recovery_data.write();
        if all.contains_key(&data.id) {
            return Err(Error::Conflict(data.id.clone()));
        }
        let mut created = data.clone();
        created.rev = Some(next_rev(None));
        all.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_recovery_data(&self, id: &str) -> Result<Option<RecoveryData>> {
        self.count("get_recovery_data");
        let mut all = self.recovery_data.write();
        if all
            .get(id)
            .is_some_and(|data| is_expired(data.expiration_instant))
        {
            all.remove(id);
            return Ok(None);
        }
        Ok(all.get(id).cloned())
    }

    async fn delete_recovery_data(&self, id: &str) -> Result<()> {
        self.count("delete_recovery_data");
        self.recovery_data.write().remove(id);
        Ok(())
    }

    async fn delete_all_recovery_data_for_recipient(&self, recipient: &str) -> Result<usize> {
        self.count("delete_all_recovery_data_for_recipient");
        let mut all = self.recovery_data.write();
        let before = all.len();
        all.retain(|_, data| data.recipient != recipient);
        Ok(before - all.len())
    }

    async fn delete_all_recovery_data_of_type_for_recipient(
        &self,
        data_type: RecoveryDataType,
        recipient: &str,
    ) -> Result<usize> {
        self.count("delete_all_recovery_data_of_type_for_recipient");
        let mut all = self.recovery_data.write();
        let before = all.len();
        all.retain(|_, data| !(data.recipient == recipient && data.data_type == data_type));
        Ok(before - all.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataOwnerType, TaskStatus};
    use crate::time::now_timestamp_millis;

    fn exchange_data(id: &str, delegator: &str, delegate: &str) -> ExchangeData {
        ExchangeData {
            id: id.into(),
            rev: None,
            delegator: delegator.into(),
            delegate: delegate.into(),
            exchange_key: BTreeMap::new(),
            access_control_secret: BTreeMap::new(),
            shared_signature_key: BTreeMap::new(),
            delegator_signature: BTreeMap::new(),
            shared_signature: String::new(),
            deletion_date: None,
        }
    }

    #[tokio::test]
    async fn test_stale_rev_conflicts() {
        let backend = MemoryBackend::new();
        let owner = backend.insert_data_owner(DataOwner::new("hcp-1", DataOwnerType::Hcp));

        let updated = backend.modify_data_owner(&owner).await.unwrap();
        assert_ne!(updated.rev, owner.rev);
        assert!(updated.rev.as_deref().unwrap().starts_with("2-"));

        let err = backend.modify_data_owner(&owner).await.unwrap_err();
        assert_eq!(err, Error::Conflict("hcp-1".into()));
    }

    #[tokio::test]
    async fn test_participant_paging() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            let ed = exchange_data(&format!("ed-{}", i), "hcp-1", &format!("p-{}", i));
            backend.create_exchange_data(&ed).await.unwrap();
        }
        backend
            .create_exchange_data(&exchange_data("ed-x", "p-9", "p-8"))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let mut start_key = None;
        loop {
            let page = backend
                .get_exchange_data_by_participant("hcp-1", start_key.as_deref(), 2)
                .await
                .unwrap();
            seen.extend(page.rows.into_iter().map(|ed| ed.id));
            match page.next_key {
                Some(next) => start_key = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["ed-0", "ed-1", "ed-2", "ed-3", "ed-4"]);
        assert_eq!(backend.request_count("get_exchange_data_by_participant"), 3);
    }

    #[tokio::test]
    async fn test_map_creation_keeps_first() {
        let backend = MemoryBackend::new();
        let first: ExchangeDataMapBatch =
            [("m".to_string(), [("fa".to_string(), "01".to_string())].into_iter().collect())]
                .into_iter()
                .collect();
        let second: ExchangeDataMapBatch =
            [("m".to_string(), [("fb".to_string(), "02".to_string())].into_iter().collect())]
                .into_iter()
                .collect();

        backend.create_exchange_data_map_batch(&first).await.unwrap();
        backend.create_exchange_data_map_batch(&second).await.unwrap();

        let map = backend.get_exchange_data_map_by_id("m").await.unwrap().unwrap();
        assert!(map.encrypted_exchange_data_ids.contains_key("fa"));
        assert!(!map.encrypted_exchange_data_ids.contains_key("fb"));
    }

    #[tokio::test]
    async fn test_expired_recovery_data_is_missing() {
        let backend = MemoryBackend::new();
        let data = RecoveryData {
            id: "r-1".into(),
            rev: None,
            recipient: "p-1".into(),
            encrypted_self: String::new(),
            data_type: RecoveryDataType::KeypairRecovery,
            expiration_instant: Some(now_timestamp_millis() - 1_000),
        };
        backend.create_recovery_data(&data).await.unwrap();

        assert!(backend.get_recovery_data("r-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_recovery_data_by_type() {
        let backend = MemoryBackend::new();
        for (id, data_type) in [
            ("a", RecoveryDataType::KeypairRecovery),
            ("b", RecoveryDataType::ExchangeKeyRecovery),
            ("c", RecoveryDataType::KeypairRecovery),
        ] {
            let data = RecoveryData {
                id: id.into(),
                rev: None,
                recipient: "p-1".into(),
                encrypted_self: String::new(),
                data_type,
                expiration_instant: None,
            };
            backend.create_recovery_data(&data).await.unwrap();
        }

        let deleted = backend
            .delete_all_recovery_data_of_type_for_recipient(RecoveryDataType::KeypairRecovery, "p-1")
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(backend.get_recovery_data("b").await.unwrap().is_some());
        assert_eq!(backend.delete_all_recovery_data_for_recipient("p-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_task_filter() {
        let backend = MemoryBackend::new();
        for (id, created, delegate) in [("t-1", 10, "hcp-1"), ("t-2", 20, "hcp-1"), ("t-3", 30, "hcp-2")] {
            let task = MaintenanceTask {
                id: id.into(),
                rev: None,
                created,
                task_type: "KEY_PAIR_UPDATE".into(),
                status: TaskStatus::Pending,
                responsible: "p-1".into(),
                delegates: [delegate.to_string()].into_iter().collect(),
                properties: Vec::new(),
            };
            backend.create_maintenance_task(&task).await.unwrap();
        }

        let filter = MaintenanceTaskFilter {
            task_type: Some("KEY_PAIR_UPDATE".into()),
            created_after: Some(10),
            delegate: Some("hcp-1".into()),
            status: None,
        };
        let found = backend.filter_maintenance_tasks(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t-2");
    }
}
