//! In-memory stores.

use super::{NodeExecutionStore, OutcomeRecord, OutcomeStore, PlanExecutionStore};
use crate::core::{FailureInfo, OutputKind, Status};
use crate::errors::{OutputConflictError, PersistenceError, PlanflowError};
use crate::execution::{NodeExecution, NodeExecutionUpdate, PlanExecution};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;

const NODE_EXECUTION: &str = "NodeExecution";
const PLAN_EXECUTION: &str = "PlanExecution";

/// In-memory node execution store.
///
/// Conditional updates run under the record's map shard lock, so two
/// callers racing on the same record see a single winner.
#[derive(Debug, Default)]
pub struct InMemoryNodeExecutionStore {
    records: DashMap<String, NodeExecution>,
    children: DashMap<String, Vec<String>>,
    by_plan: DashMap<String, Vec<String>>,
}

impl InMemoryNodeExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect(&self, ids: &[String]) -> Vec<NodeExecution> {
        ids.iter()
            .filter_map(|id| self.records.get(id).map(|record| record.value().clone()))
            .collect()
    }
}

#[async_trait]
impl NodeExecutionStore for InMemoryNodeExecutionStore {
    async fn insert(&self, execution: NodeExecution) -> Result<(), PersistenceError> {
        let id = execution.uuid.clone();
        let parent_id = execution.parent_id.clone();
        let plan_execution_id = execution.plan_execution_id.clone();

        match self.records.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(PersistenceError::AlreadyExists {
                    kind: NODE_EXECUTION,
                    id,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(execution);
            }
        }

        if let Some(parent_id) = parent_id {
            self.children.entry(parent_id).or_default().push(id.clone());
        }
        self.by_plan.entry(plan_execution_id).or_default().push(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<NodeExecution, PersistenceError> {
        self.records
            .get(id)
            .map(|record| record.value().clone())
            .ok_or_else(|| PersistenceError::not_found(NODE_EXECUTION, id))
    }

    async fn update(
        &self,
        id: &str,
        update: NodeExecutionUpdate,
    ) -> Result<NodeExecution, PersistenceError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| PersistenceError::not_found(NODE_EXECUTION, id))?;
        update.apply(record.value_mut());
        Ok(record.value().clone())
    }

    async fn update_if_status(
        &self,
        id: &str,
        from: &[Status],
        update: NodeExecutionUpdate,
    ) -> Result<Option<NodeExecution>, PersistenceError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| PersistenceError::not_found(NODE_EXECUTION, id))?;
        if !from.contains(&record.status) {
            return Ok(None);
        }
        update.apply(record.value_mut());
        Ok(Some(record.value().clone()))
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, PersistenceError> {
        let ids = self
            .children
            .get(parent_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(self
            .collect(&ids)
            .into_iter()
            .filter(|execution| !execution.old_retry)
            .collect())
    }

    async fn list_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, PersistenceError> {
        let ids = self
            .by_plan
            .get(plan_execution_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        Ok(self.collect(&ids))
    }
}

/// In-memory outcome store.
#[derive(Debug, Default)]
pub struct InMemoryOutcomeStore {
    records: RwLock<HashMap<String, Vec<OutcomeRecord>>>,
}

impl InMemoryOutcomeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all plan executions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().values().map(Vec::len).sum()
    }

    /// True if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutcomeStore for InMemoryOutcomeStore {
    async fn save(&self, record: OutcomeRecord) -> Result<(), PlanflowError> {
        let mut records = self.records.write();
        let plan_records = records.entry(record.plan_execution_id.clone()).or_default();
        if plan_records.iter().any(|existing| existing.conflicts_with(&record)) {
            return Err(OutputConflictError::new(record.name, record.producer_identifier).into());
        }
        plan_records.push(record);
        Ok(())
    }

    async fn list_by_producer(&self, producer_id: &str) -> Result<Vec<OutcomeRecord>, PersistenceError> {
        Ok(self
            .records
            .read()
            .values()
            .flatten()
            .filter(|record| record.producer_id == producer_id)
            .cloned()
            .collect())
    }

    async fn resolve(
        &self,
        plan_execution_id: &str,
        runtime_path: &[String],
        kind: OutputKind,
        name: &str,
    ) -> Result<Option<OutcomeRecord>, PersistenceError> {
        let records = self.records.read();
        let Some(plan_records) = records.get(plan_execution_id) else {
            return Ok(None);
        };
        // Deepest scope first; among equals the latest write wins.
        Ok(plan_records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                record.kind == kind && record.name == name && record.is_visible_from(runtime_path)
            })
            .max_by_key(|(position, record)| (record.scope.len(), *position))
            .map(|(_, record)| record.clone()))
    }
}

/// In-memory plan execution store.
#[derive(Debug, Default)]
pub struct InMemoryPlanExecutionStore {
    records: DashMap<String, PlanExecution>,
}

impl InMemoryPlanExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn modify<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut PlanExecution) -> T,
    ) -> Result<T, PersistenceError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| PersistenceError::not_found(PLAN_EXECUTION, id))?;
        Ok(f(record.value_mut()))
    }
}

#[async_trait]
impl PlanExecutionStore for InMemoryPlanExecutionStore {
    async fn insert(&self, execution: PlanExecution) -> Result<(), PersistenceError> {
        match self.records.entry(execution.plan_execution_id.clone()) {
            Entry::Occupied(entry) => Err(PersistenceError::AlreadyExists {
                kind: PLAN_EXECUTION,
                id: entry.key().clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(execution);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<PlanExecution, PersistenceError> {
        self.records
            .get(id)
            .map(|record| record.value().clone())
            .ok_or_else(|| PersistenceError::not_found(PLAN_EXECUTION, id))
    }

    async fn set_root_node_execution(&self, id: &str, node_execution_id: &str) -> Result<(), PersistenceError> {
        self.modify(id, |execution| {
            execution.root_node_execution_id = Some(node_execution_id.to_string());
        })
    }

    async fn append_failure(&self, id: &str, failure: FailureInfo) -> Result<(), PersistenceError> {
        self.modify(id, |execution| execution.failures.push(failure))
    }

    async fn request_end_status(&self, id: &str, status: Status) -> Result<(), PersistenceError> {
        self.modify(id, |execution| {
            execution.end_status_override.get_or_insert(status);
        })
    }

    async fn mark_ended(&self, id: &str, status: Status) -> Result<Option<PlanExecution>, PersistenceError> {
        self.modify(id, |execution| {
            if execution.is_ended() {
                return None;
            }
            execution.status = status;
            execution.ended_at = Some(Utc::now());
            Some(execution.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambiance::{Ambiance, Level};
    use crate::core::{StepOutput, StepType};
    use crate::execution::ExecutionKind;
    use serde_json::json;

    fn execution(uuid: &str, parent: Option<&str>) -> NodeExecution {
        NodeExecution {
            uuid: uuid.to_string(),
            plan_execution_id: "e".to_string(),
            node_id: format!("node_{uuid}"),
            identifier: uuid.to_string(),
            step_type: StepType::step("SHELL"),
            ambiance: Ambiance::new("p", "e").clone_for_child(Level::new(
                uuid,
                format!("node_{uuid}"),
                uuid,
                StepType::step("SHELL"),
            )),
            status: Status::NotStarted,
            mode: None,
            kind: ExecutionKind::Normal,
            parent_id: parent.map(ToString::to_string),
            notify_id: None,
            previous_id: None,
            adviser_response: None,
            failure_info: None,
            retry_ids: Vec::new(),
            old_retry: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = InMemoryNodeExecutionStore::new();
        store.insert(execution("a", None)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().uuid, "a");
        assert!(matches!(
            store.get("missing").await,
            Err(PersistenceError::NotFound { .. })
        ));
        assert!(matches!(
            store.insert(execution("a", None)).await,
            Err(PersistenceError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = InMemoryNodeExecutionStore::new();
        store.insert(execution("a", None)).await.unwrap();

        let started = store
            .update_if_status("a", &[Status::NotStarted], NodeExecutionUpdate::new().status(Status::Running))
            .await
            .unwrap();
        assert_eq!(started.map(|ne| ne.status), Some(Status::Running));

        let again = store
            .update_if_status("a", &[Status::NotStarted], NodeExecutionUpdate::new().status(Status::Running))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_list_children_skips_old_retries() {
        let store = InMemoryNodeExecutionStore::new();
        store.insert(execution("parent", None)).await.unwrap();
        store.insert(execution("c1", Some("parent"))).await.unwrap();
        store.insert(execution("c2", Some("parent"))).await.unwrap();
        store.update("c1", NodeExecutionUpdate::new().old_retry()).await.unwrap();
        store.insert(execution("c3", Some("parent"))).await.unwrap();

        let children: Vec<String> = store
            .list_children("parent")
            .await
            .unwrap()
            .into_iter()
            .map(|ne| ne.uuid)
            .collect();
        assert_eq!(children, vec!["c2", "c3"]);
        assert_eq!(store.list_by_plan_execution("e").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_outcome_conflict_and_resolution() {
        let store = InMemoryOutcomeStore::new();
        let ambiance = Ambiance::new("p", "e")
            .clone_for_child(Level::new("r1", "n1", "pipeline", StepType::step("SECTION")))
            .clone_for_child(Level::new("r2", "n2", "compile", StepType::step("SHELL")));

        let record = OutcomeRecord::scoped(&ambiance, "compile", StepOutput::outcome("jar", json!("a.jar")));
        store.save(record.clone()).await.unwrap();

        let duplicate = OutcomeRecord::scoped(&ambiance, "compile", StepOutput::outcome("jar", json!("b.jar")));
        assert!(matches!(
            store.save(duplicate).await,
            Err(PlanflowError::OutputConflict(_))
        ));

        let sibling_path = vec!["r1".to_string(), "r3".to_string()];
        let found = store
            .resolve("e", &sibling_path, OutputKind::Outcome, "jar")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.value, json!("a.jar"));

        assert!(store
            .resolve("e", &["r9".to_string()], OutputKind::Outcome, "jar")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_by_producer("r2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_plan_execution_lifecycle() {
        let store = InMemoryPlanExecutionStore::new();
        store.insert(PlanExecution::new(Ambiance::new("p", "e"))).await.unwrap();

        store.request_end_status("e", Status::Failed).await.unwrap();
        store.request_end_status("e", Status::Aborted).await.unwrap();
        store
            .append_failure("e", FailureInfo::new(Status::Failed, "boom"))
            .await
            .unwrap();

        let ended = store.mark_ended("e", Status::Failed).await.unwrap().unwrap();
        assert_eq!(ended.end_status_override, Some(Status::Failed));
        assert_eq!(ended.failures.len(), 1);
        assert!(store.mark_ended("e", Status::Succeeded).await.unwrap().is_none());
    }
}
