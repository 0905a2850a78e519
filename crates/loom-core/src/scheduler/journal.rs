//! Task status journal: one `task_status` record per transition, read back by `resume_plan`.
//!
//! Writes are best effort and asynchronous. A failing or slow store is logged and never
//! stops dispatch.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::domain::{PlanId, Task, TaskError, TaskId, TaskStatus};
use crate::error::StoreError;
use crate::ports::{MetadataFilter, NewRecord, PersistentStore, RecordKind, RecordMetadata, SearchQuery};

const READ_PAGE_SIZE: usize = 100;

/// Payload of a `task_status` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: TaskId,
    pub plan_id: Option<PlanId>,
    pub status: TaskStatus,
    pub attempts: u32,
    pub error: Option<TaskError>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskTransition {
    pub fn of(task: &Task) -> Self {
        Self {
            task_id: task.id,
            plan_id: task.plan_id,
            status: task.status,
            attempts: task.attempts,
            error: task.error.clone(),
            result: task.result.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }

    fn metadata(&self) -> RecordMetadata {
        let metadata = RecordMetadata::new(RecordKind::TaskStatus)
            .with_tag("task_id", self.task_id)
            .with_tag("status", self.status.as_str());
        match self.plan_id {
            Some(plan) => metadata.with_tag("plan_id", plan),
            None => metadata,
        }
    }
}

enum Command {
    Append(Vec<TaskTransition>),
    Flushed(oneshot::Sender<()>),
}

/// Appends run on a writer task of their own, in submission order, so a slow store
/// never holds up the caller.
#[derive(Default)]
pub(crate) struct Journal {
    store: Option<Arc<dyn PersistentStore>>,
    writer: OnceLock<mpsc::UnboundedSender<Command>>,
}

impl Journal {
    pub fn new(store: Option<Arc<dyn PersistentStore>>) -> Self {
        Self {
            store,
            writer: OnceLock::new(),
        }
    }

    /// Queue transitions for appending. Must be called from within a tokio runtime.
    pub fn write(&self, entries: Vec<TaskTransition>) {
        let Some(store) = &self.store else {
            return;
        };
        if entries.is_empty() {
            return;
        }
        let writer = self.writer.get_or_init(|| spawn_writer(Arc::clone(store)));
        if writer.send(Command::Append(entries)).is_err() {
            tracing::warn!("task journal writer is gone, transitions dropped");
        }
    }

    /// Wait until everything queued so far has been handed to the store.
    pub async fn flushed(&self) {
        let Some(writer) = self.writer.get() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if writer.send(Command::Flushed(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

fn spawn_writer(store: Arc<dyn PersistentStore>) -> mpsc::UnboundedSender<Command> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append(entries) => append_all(store.as_ref(), entries).await,
                Command::Flushed(done) => {
                    let _ = done.send(());
                }
            }
        }
    });
    tx
}

/// Best effort: failures are logged and the next entry is tried.
async fn append_all(store: &dyn PersistentStore, entries: Vec<TaskTransition>) {
    for entry in entries {
        let metadata = entry.metadata();
        let payload = match serde_json::to_value(&entry) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(task_id = %entry.task_id, error = %err, "cannot encode task transition");
                continue;
            }
        };
        if let Err(err) = store.append(NewRecord::new(payload), metadata).await {
            tracing::warn!(
                task_id = %entry.task_id,
                status = entry.status.as_str(),
                error = %err,
                "task status not persisted"
            );
        }
    }
}

/// Last journaled transition of every task of `plan`. Later records win.
pub async fn last_known_states(
    store: &dyn PersistentStore,
    plan: PlanId,
) -> Result<HashMap<TaskId, TaskTransition>, StoreError> {
    let filter = MetadataFilter::kind(RecordKind::TaskStatus).with_tag("plan_id", plan);
    let mut states = HashMap::new();
    let mut offset = 0;
    loop {
        let page = store
            .search(
                SearchQuery::filter(filter.clone()).with_offset(offset),
                READ_PAGE_SIZE,
            )
            .await?;
        offset += page.len();
        for hit in &page {
            match serde_json::from_value::<TaskTransition>(hit.record.payload.clone()) {
                Ok(transition) => {
                    states.insert(transition.task_id, transition);
                }
                Err(err) => {
                    tracing::warn!(record = %hit.record.id, error = %err, "skipping unreadable task status record");
                }
            }
        }
        if page.len() < READ_PAGE_SIZE {
            return Ok(states);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;

    #[tokio::test]
    async fn last_transition_wins() {
        let store = Arc::new(InMemoryStore::new());
        let journal = Journal::new(Some(store.clone()));
        let plan = PlanId::generate();

        let mut task = Task::new("t");
        task.plan_id = Some(plan);
        let mut entries = vec![TaskTransition::of(&task)];
        task.set_status(TaskStatus::Running);
        task.attempts = 1;
        entries.push(TaskTransition::of(&task));
        task.set_status(TaskStatus::Succeeded);
        entries.push(TaskTransition::of(&task));
        journal.write(entries);

        let other = Task::new("unrelated");
        journal.write(vec![TaskTransition::of(&other)]);
        journal.flushed().await;

        let states = last_known_states(store.as_ref(), plan).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[&task.id].status, TaskStatus::Succeeded);
        assert_eq!(states[&task.id].attempts, 1);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let journal = Journal::new(Some(store.clone()));

        journal.write(vec![TaskTransition::of(&Task::new("t"))]);
        journal.flushed().await;
        store.set_available(true);
        assert!(store.is_empty());
    }
}
