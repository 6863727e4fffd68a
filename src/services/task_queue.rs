use anyhow::{anyhow, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::models::TaskRecord;

/// Background job runner backed by the `tasks` table.
///
/// Jobs run on the tokio runtime, at most `concurrency` at a time. Each task
/// is recorded as `processing` on submit and moves to `completed` or `failed`
/// exactly once.
#[derive(Clone)]
pub struct TaskQueue {
    db: Arc<Mutex<Database>>,
    permits: Arc<Semaphore>,
}

impl TaskQueue {
    pub fn new(db: Arc<Mutex<Database>>, concurrency: usize) -> Self {
        TaskQueue {
            db,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Marks tasks orphaned by a previous process as failed.
    pub fn recover(&self) -> Result<usize> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        let count = db.fail_interrupted_tasks()?;
        if count > 0 {
            warn!(count, "Marked interrupted tasks as failed");
        }
        Ok(count)
    }

    pub fn submit<F, T>(&self, kind: &str, payload: Option<&str>, job: F) -> Result<String>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let task_id = uuid::Uuid::new_v4().to_string();
        {
            let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
            db.insert_task(&task_id, kind, payload)?;
        }
        info!(task_id = %task_id, kind, "Task enqueued");

        let db = self.db.clone();
        let permits = self.permits.clone();
        let id = task_id.clone();
        let kind = kind.to_string();
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => job.await,
                Err(e) => Err(anyhow!("Task queue closed: {}", e)),
            };
            if let Err(e) = record_outcome(&db, &id, outcome) {
                error!(task_id = %id, kind = %kind, error = %e, "Failed to record task outcome");
            }
        });

        Ok(task_id)
    }

    pub fn status(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let db = self.db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
        Ok(db.get_task(task_id)?)
    }
}

fn record_outcome<T: Serialize>(db: &Arc<Mutex<Database>>, task_id: &str, outcome: Result<T>) -> Result<()> {
    let db = db.lock().map_err(|_| anyhow!("DB lock poisoned"))?;
    match outcome {
        Ok(value) => {
            let result = serde_json::to_string(&value)?;
            if db.complete_task(task_id, &result)? {
                info!(task_id, "Task completed");
            }
        }
        Err(err) => {
            let message = format!("{:#}", err);
            error!(task_id, error = %message, "Task failed");
            db.fail_task(task_id, &message)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskState;
    use std::time::Duration;

    fn queue() -> TaskQueue {
        TaskQueue::new(Arc::new(Mutex::new(Database::in_memory().unwrap())), 2)
    }

    async fn wait_for_state(queue: &TaskQueue, id: &str) -> TaskRecord {
        for _ in 0..100 {
            let record = queue.status(id).unwrap().unwrap();
            if record.state != TaskState::Processing {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never finished", id);
    }

    #[tokio::test]
    async fn successful_job_is_completed() {
        let queue = queue();
        let id = queue
            .submit("test", Some("payload"), async { Ok(serde_json::json!({"n": 3})) })
            .unwrap();

        let record = wait_for_state(&queue, &id).await;
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.result.unwrap()["n"], 3);
        assert_eq!(record.payload.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn failing_job_keeps_error_message() {
        let queue = queue();
        let id = queue
            .submit::<_, ()>("test", None, async { Err(anyhow!("Could not read image file")) })
            .unwrap();

        let record = wait_for_state(&queue, &id).await;
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.error.as_deref(), Some("Could not read image file"));
    }

    #[tokio::test]
    async fn pending_job_reports_processing() {
        let queue = queue();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let id = queue
            .submit("test", None, async move {
                let _ = rx.await;
                Ok(1)
            })
            .unwrap();

        assert_eq!(queue.status(&id).unwrap().unwrap().state, TaskState::Processing);
        tx.send(()).unwrap();
        assert_eq!(wait_for_state(&queue, &id).await.state, TaskState::Completed);
    }
}
