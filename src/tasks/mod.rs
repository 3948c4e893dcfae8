//! In-process background task executor.
//!
//! Each submitted job runs on its own tokio task behind a semaphore that caps
//! how many jobs run at once. States move `PENDING → STARTED → PROGRESS* →
//! SUCCESS | FAILURE`, or to `REVOKED` on cancellation. Finished entries are
//! forgotten once their result TTL has passed.

pub mod jobs;

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{Progress, ProgressHook};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Started,
    Progress(Progress),
    Success(Value),
    Failure(String),
    Revoked,
}

impl TaskState {
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Progress(_) => "PROGRESS",
            TaskState::Success(_) => "SUCCESS",
            TaskState::Failure(_) => "FAILURE",
            TaskState::Revoked => "REVOKED",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Success(_) | TaskState::Failure(_) | TaskState::Revoked
        )
    }
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub concurrency: usize,
    pub time_limit: Duration,
    pub result_ttl: Duration,
}

impl Default for TaskSettings {
    fn default() -> Self {
        TaskSettings {
            concurrency: 2,
            time_limit: Duration::from_secs(3600),
            result_ttl: Duration::from_secs(86_400),
        }
    }
}

struct TaskEntry {
    name: String,
    state: TaskState,
    abort: Option<AbortHandle>,
    finished_at: Option<Instant>,
}

type TaskTable = Arc<Mutex<HashMap<String, TaskEntry>>>;

fn lock(tasks: &TaskTable) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Move a live task to `state`. Finished tasks (revoked ones included) keep
/// their final state.
fn transition(tasks: &TaskTable, id: &str, state: TaskState) {
    let mut table = lock(tasks);
    let Some(entry) = table.get_mut(id) else {
        return;
    };
    if entry.state.is_finished() {
        return;
    }
    if state.is_finished() {
        entry.finished_at = Some(Instant::now());
        entry.abort = None;
    }
    entry.state = state;
}

/// Progress hook handed to a running job; writes into its task entry.
struct TaskProgress {
    tasks: TaskTable,
    id: String,
}

impl ProgressHook for TaskProgress {
    fn report(&self, progress: Progress) {
        transition(&self.tasks, &self.id, TaskState::Progress(progress));
    }
}

#[derive(Clone)]
pub struct TaskManager {
    tasks: TaskTable,
    permits: Arc<Semaphore>,
    settings: TaskSettings,
}

impl TaskManager {
    pub fn new(settings: TaskSettings) -> Self {
        TaskManager {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
        }
    }

    /// Queue `job` and return its task id. The job receives a progress hook
    /// bound to its own entry.
    pub fn submit<F, Fut>(&self, name: &str, job: F) -> String
    where
        F: FnOnce(Arc<dyn ProgressHook>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.purge_expired();

        let id = Uuid::new_v4().to_string();
        lock(&self.tasks).insert(
            id.clone(),
            TaskEntry {
                name: name.to_string(),
                state: TaskState::Pending,
                abort: None,
                finished_at: None,
            },
        );

        let tasks = self.tasks.clone();
        let permits = self.permits.clone();
        let time_limit = self.settings.time_limit;
        let task_id = id.clone();
        let task_name = name.to_string();
        let hook: Arc<dyn ProgressHook> = Arc::new(TaskProgress {
            tasks: tasks.clone(),
            id: id.clone(),
        });

        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    transition(
                        &tasks,
                        &task_id,
                        TaskState::Failure("Worker is shutting down".into()),
                    );
                    return;
                }
            };
            transition(&tasks, &task_id, TaskState::Started);
            info!("Task {} [{}] started", task_name, task_id);

            let state = match tokio::time::timeout(time_limit, job(hook)).await {
                Ok(Ok(result)) => {
                    info!("Task {} [{}] succeeded", task_name, task_id);
                    TaskState::Success(result)
                }
                Ok(Err(e)) => {
                    warn!("Task {} [{}] failed: {:#}", task_name, task_id, e);
                    TaskState::Failure(format!("{:#}", e))
                }
                Err(_) => {
                    warn!(
                        "Task {} [{}] exceeded its time limit of {}s",
                        task_name,
                        task_id,
                        time_limit.as_secs()
                    );
                    TaskState::Failure(format!(
                        "Time limit of {}s exceeded",
                        time_limit.as_secs()
                    ))
                }
            };
            transition(&tasks, &task_id, state);
        });

        if let Some(entry) = lock(&self.tasks).get_mut(&id) {
            if !entry.state.is_finished() {
                entry.abort = Some(handle.abort_handle());
            }
        }
        id
    }

    /// Current state of `id`. Unknown (or expired) ids report `Pending`.
    pub fn state(&self, id: &str) -> TaskState {
        self.purge_expired();
        lock(&self.tasks)
            .get(id)
            .map(|entry| entry.state.clone())
            .unwrap_or(TaskState::Pending)
    }

    /// Name the task was submitted under, while its entry is kept.
    pub fn name(&self, id: &str) -> Option<String> {
        lock(&self.tasks).get(id).map(|entry| entry.name.clone())
    }

    /// Terminate `id` if it is still queued or running. Returns the state the
    /// task is left in.
    pub fn revoke(&self, id: &str) -> TaskState {
        let mut table = lock(&self.tasks);
        let Some(entry) = table.get_mut(id) else {
            return TaskState::Pending;
        };
        if !entry.state.is_finished() {
            if let Some(abort) = entry.abort.take() {
                abort.abort();
            }
            entry.state = TaskState::Revoked;
            entry.finished_at = Some(Instant::now());
            info!("Task {} [{}] revoked", entry.name, id);
        }
        entry.state.clone()
    }

    /// Whether new jobs will still be run.
    pub fn is_accepting(&self) -> bool {
        !self.permits.is_closed()
    }

    /// Stop accepting work and revoke everything still queued or running.
    pub fn shutdown(&self) {
        self.permits.close();
        let ids: Vec<String> = lock(&self.tasks)
            .iter()
            .filter(|(_, entry)| !entry.state.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.revoke(&id);
        }
    }

    fn purge_expired(&self) {
        let ttl = self.settings.result_ttl;
        lock(&self.tasks).retain(|_, entry| match entry.finished_at {
            Some(at) => at.elapsed() < ttl,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn manager(concurrency: usize, time_limit_ms: u64) -> TaskManager {
        TaskManager::new(TaskSettings {
            concurrency,
            time_limit: Duration::from_millis(time_limit_ms),
            result_ttl: Duration::from_secs(60),
        })
    }

    async fn wait_finished(tasks: &TaskManager, id: &str) -> TaskState {
        for _ in 0..200 {
            let state = tasks.state(id);
            if state.is_finished() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", id);
    }

    #[tokio::test]
    async fn test_success_stores_result() {
        let tasks = manager(2, 5_000);
        let id = tasks.submit("ok", |_| async { Ok(json!({"status": "success"})) });
        assert_eq!(
            wait_finished(&tasks, &id).await,
            TaskState::Success(json!({"status": "success"}))
        );
    }

    #[tokio::test]
    async fn test_failure_stores_message() {
        let tasks = manager(2, 5_000);
        let id = tasks.submit("boom", |_| async {
            Err(anyhow::anyhow!("source unreachable"))
        });
        match wait_finished(&tasks, &id).await {
            TaskState::Failure(msg) => assert!(msg.contains("source unreachable")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_is_visible_while_running() {
        let tasks = manager(2, 5_000);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let id = tasks.submit("slow", move |hook| async move {
            hook.report(Progress::new(5, 100, "extractor ready"));
            let _ = release_rx.await;
            Ok(json!({}))
        });

        let mut seen = TaskState::Pending;
        for _ in 0..200 {
            seen = tasks.state(&id);
            if matches!(seen, TaskState::Progress(_)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(seen, TaskState::Progress(Progress::new(5, 100, "extractor ready")));
        assert_eq!(seen.label(), "PROGRESS");

        release_tx.send(()).unwrap();
        assert!(matches!(wait_finished(&tasks, &id).await, TaskState::Success(_)));
    }

    #[tokio::test]
    async fn test_revoke_terminates_and_sticks() {
        let tasks = manager(2, 60_000);
        let id = tasks.submit("forever", |_| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(json!({}))
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(tasks.revoke(&id), TaskState::Revoked);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tasks.state(&id), TaskState::Revoked);
        assert_eq!(tasks.name(&id).as_deref(), Some("forever"));
    }

    #[tokio::test]
    async fn test_revoke_leaves_finished_task_alone() {
        let tasks = manager(2, 5_000);
        let id = tasks.submit("ok", |_| async { Ok(json!(1)) });
        wait_finished(&tasks, &id).await;
        assert_eq!(tasks.revoke(&id), TaskState::Success(json!(1)));
    }

    #[tokio::test]
    async fn test_time_limit_fails_the_task() {
        let tasks = manager(2, 50);
        let id = tasks.submit("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(json!({}))
        });
        match wait_finished(&tasks, &id).await {
            TaskState::Failure(msg) => assert!(msg.contains("Time limit")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_pending() {
        let tasks = manager(1, 1_000);
        assert_eq!(tasks.state("no-such-task"), TaskState::Pending);
        assert_eq!(tasks.name("no-such-task"), None);
        assert_eq!(tasks.revoke("no-such-task"), TaskState::Pending);
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_jobs() {
        let tasks = manager(1, 5_000);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let first = tasks.submit("first", move |_| async move {
            let _ = release_rx.await;
            Ok(json!("first"))
        });
        let second = tasks.submit("second", |_| async { Ok(json!("second")) });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tasks.state(&first), TaskState::Started);
        assert_eq!(tasks.state(&second), TaskState::Pending);

        release_tx.send(()).unwrap();
        assert_eq!(wait_finished(&tasks, &second).await, TaskState::Success(json!("second")));
    }

    #[tokio::test]
    async fn test_finished_tasks_expire() {
        let tasks = TaskManager::new(TaskSettings {
            concurrency: 1,
            time_limit: Duration::from_secs(5),
            result_ttl: Duration::from_millis(20),
        });
        let id = tasks.submit("ok", |_| async { Ok(json!(1)) });
        for _ in 0..100 {
            if lock(&tasks.tasks).get(&id).map_or(false, |e| e.state.is_finished()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(tasks.state(&id), TaskState::Pending);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let tasks = manager(1, 5_000);
        let id = tasks.submit("forever", |_| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(json!({}))
        });
        assert!(tasks.is_accepting());
        tasks.shutdown();
        assert!(!tasks.is_accepting());
        assert_eq!(tasks.state(&id), TaskState::Revoked);
    }
}
