use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::TasksConfig;
use crate::error::TaskError;
use crate::record::{CancelOutcome, TaskHandle, TaskRecord, TaskSpec, TaskStatus};

struct TaskSlot {
    state: watch::Sender<TaskRecord>,
    cancel: CancellationToken,
}

impl TaskSlot {
    fn snapshot(&self) -> TaskRecord {
        self.state.borrow().clone()
    }

    fn finish(&self, status: TaskStatus, result: Result<Value, String>) {
        self.state.send_if_modified(|record| record.finish(status, result));
    }
}

struct Inner {
    tasks: Mutex<HashMap<String, Arc<TaskSlot>>>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    max_runtime: Option<Duration>,
}

/// In-flight and finished background tasks.
///
/// Cloning is cheap; all clones share the same tasks and worker pool.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .field("available_permits", &self.inner.permits.available_permits())
            .field("max_pending", &self.inner.max_pending)
            .finish()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(&TasksConfig::default())
    }
}

/// A submitted task the caller may wait on.
#[derive(Debug)]
pub struct TaskTicket {
    handle: TaskHandle,
    state: watch::Receiver<TaskRecord>,
}

impl TaskTicket {
    #[must_use]
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    #[must_use]
    pub fn into_handle(self) -> TaskHandle {
        self.handle
    }

    /// Wait until the task reaches a terminal state.
    ///
    /// Cancel-safe: dropping the future leaves the task running.
    pub async fn wait(&mut self) -> TaskRecord {
        let finished = self
            .state
            .wait_for(|r| r.status.is_terminal())
            .await
            .map(|record| record.clone());
        finished.unwrap_or_else(|_| self.state.borrow().clone())
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task body aborted".to_owned();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    format!("task panicked: {detail}")
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

async fn run_task<Fut>(
    permits: Arc<Semaphore>,
    slot: Arc<TaskSlot>,
    body: Fut,
    max_runtime: Option<Duration>,
) where
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    let _permit = tokio::select! {
        biased;
        () = slot.cancel.cancelled() => return,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                slot.finish(TaskStatus::Failed, Err("worker pool closed".into()));
                return;
            }
        },
    };

    let started = slot.state.send_if_modified(|record| {
        if record.status != TaskStatus::Pending {
            return false;
        }
        record.status = TaskStatus::Running;
        record.started_at = Some(Utc::now());
        true
    });
    if !started {
        return;
    }
    let task_id = slot.state.borrow().handle.task_id.clone();
    tracing::debug!(%task_id, "task running");

    let mut body = tokio::spawn(body);
    tokio::select! {
        biased;
        () = slot.cancel.cancelled() => {
            body.abort();
            tracing::debug!(%task_id, "task cancelled while running");
        }
        () = sleep_or_forever(max_runtime) => {
            body.abort();
            tracing::warn!(%task_id, "task exceeded its runtime limit");
            slot.finish(TaskStatus::TimedOut, Err("task exceeded its runtime limit".into()));
        }
        joined = &mut body => match joined {
            Ok(Ok(value)) => slot.finish(TaskStatus::Completed, Ok(value)),
            Ok(Err(error)) => {
                tracing::debug!(%task_id, %error, "task failed");
                slot.finish(TaskStatus::Failed, Err(error));
            }
            Err(join) => {
                let message = panic_message(join);
                tracing::warn!(%task_id, "{message}");
                slot.finish(TaskStatus::Failed, Err(message));
            }
        },
    }
}

impl TaskRegistry {
    #[must_use]
    pub fn new(config: &TasksConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                max_pending: config.max_pending.max(1),
                max_runtime: config.max_runtime(),
            }),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Arc<TaskSlot>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, task_id: &str) -> Result<Arc<TaskSlot>, TaskError> {
        self.tasks()
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(task_id.to_owned()))
    }

    /// Queue `work` on the worker pool. It starts once a slot is free.
    ///
    /// `work` receives a token that is cancelled when the task is cancelled;
    /// the body is also aborted at its next await point.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Saturated` when `max_pending` tasks are unfinished.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn submit<F, Fut>(&self, spec: TaskSpec, work: F) -> Result<TaskTicket, TaskError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handle = TaskHandle {
            task_id: Uuid::new_v4().to_string(),
            plugin_name: spec.plugin_name,
            tool_name: spec.tool_name,
            created_at: Utc::now(),
            estimated_duration: spec.estimated_duration,
        };
        let (tx, rx) = watch::channel(TaskRecord::pending(handle.clone()));
        let slot = Arc::new(TaskSlot {
            state: tx,
            cancel: CancellationToken::new(),
        });

        {
            let mut tasks = self.tasks();
            let unfinished = tasks
                .values()
                .filter(|s| !s.state.borrow().status.is_terminal())
                .count();
            if unfinished >= self.inner.max_pending {
                return Err(TaskError::Saturated {
                    limit: self.inner.max_pending,
                });
            }
            tasks.insert(handle.task_id.clone(), Arc::clone(&slot));
        }

        let body = work(slot.cancel.clone());
        let max_runtime = spec.max_runtime.or(self.inner.max_runtime);
        tracing::debug!(
            task_id = %handle.task_id,
            tool = %handle.tool_name,
            "task submitted"
        );
        tokio::spawn(run_task(
            Arc::clone(&self.inner.permits),
            slot,
            body,
            max_runtime,
        ));

        Ok(TaskTicket { handle, state: rx })
    }

    /// Forget a task without touching its computation.
    pub fn discard(&self, task_id: &str) -> bool {
        self.tasks().remove(task_id).is_some()
    }

    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub fn status(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        Ok(self.slot(task_id)?.snapshot())
    }

    /// Current record, optionally waiting up to `wait` for it to finish.
    ///
    /// `None` returns immediately; use [`TaskRegistry::wait_for_result`] to
    /// block until the task finishes.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub async fn result(
        &self,
        task_id: &str,
        wait: Option<Duration>,
    ) -> Result<TaskRecord, TaskError> {
        let slot = self.slot(task_id)?;
        if let Some(limit) = wait {
            let mut rx = slot.state.subscribe();
            let _ = tokio::time::timeout(limit, rx.wait_for(|r| r.status.is_terminal())).await;
        }
        Ok(slot.snapshot())
    }

    /// Block until the task reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub async fn wait_for_result(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        let slot = self.slot(task_id)?;
        let mut rx = slot.state.subscribe();
        let _ = rx.wait_for(|r| r.status.is_terminal()).await;
        Ok(slot.snapshot())
    }

    /// Cancel a pending or running task.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotFound` for unknown ids.
    pub fn cancel(&self, task_id: &str) -> Result<CancelOutcome, TaskError> {
        let slot = self.slot(task_id)?;
        let mut finished = None;
        slot.state.send_if_modified(|record| {
            if record.status.is_terminal() {
                finished = Some(record.status);
                return false;
            }
            record.finish(TaskStatus::Cancelled, Err("cancelled".into()))
        });
        if let Some(status) = finished {
            return Ok(CancelOutcome::AlreadyFinished(status));
        }
        slot.cancel.cancel();
        tracing::debug!(%task_id, "task cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Pending and running tasks, oldest first.
    #[must_use]
    pub fn list_active(&self) -> Vec<TaskRecord> {
        let mut active: Vec<TaskRecord> = self
            .tasks()
            .values()
            .map(|s| s.snapshot())
            .filter(|r| !r.status.is_terminal())
            .collect();
        active.sort_by_key(|r| r.handle.created_at);
        active
    }

    /// Remove terminal records that finished more than `max_age` ago.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_age);
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|_, slot| {
            let record = slot.state.borrow();
            match (record.status.is_terminal(), record.completed_at, cutoff) {
                (true, Some(done), Some(cutoff)) => done > cutoff,
                _ => true,
            }
        });
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, "purged finished tasks");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    /// Periodically purge records older than `retention` until `shutdown` flips to `true`.
    #[must_use]
    pub fn spawn_janitor(
        &self,
        interval: Duration,
        retention: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.cleanup(retention);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("task janitor shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;

    fn registry(max_concurrent: usize, max_pending: usize) -> TaskRegistry {
        TaskRegistry::new(&TasksConfig {
            max_concurrent,
            max_pending,
            ..TasksConfig::default()
        })
    }

    fn spec() -> TaskSpec {
        TaskSpec::new("builds", "compile")
    }

    #[tokio::test]
    async fn completes_with_result() {
        let registry = TaskRegistry::default();
        let mut ticket = registry
            .submit(spec(), |_| async { Ok(json!({"artifacts": 3})) })
            .unwrap();
        let record = ticket.wait().await;
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(json!({"artifacts": 3})));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(registry.status(ticket.handle().task_id.as_str()).unwrap(), record);
    }

    #[tokio::test]
    async fn error_becomes_failed() {
        let registry = TaskRegistry::default();
        let mut ticket = registry
            .submit(spec(), |_| async { Err("linker not found".to_owned()) })
            .unwrap();
        let record = ticket.wait().await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("linker not found"));
    }

    #[tokio::test]
    async fn panic_becomes_failed() {
        let registry = TaskRegistry::default();
        let mut ticket = registry
            .submit(spec(), |_| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            })
            .unwrap();
        let record = ticket.wait().await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn unknown_task_not_found() {
        let registry = TaskRegistry::default();
        assert_eq!(
            registry.status("nope").unwrap_err(),
            TaskError::NotFound("nope".into())
        );
        assert!(registry.cancel("nope").is_err());
        assert!(registry.result("nope", None).await.is_err());
    }

    #[tokio::test]
    async fn worker_pool_is_bounded() {
        let registry = registry(1, 8);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut first = registry
            .submit(spec(), |_| async move {
                let _ = release_rx.await;
                Ok(json!(1))
            })
            .unwrap();
        let mut second = registry.submit(spec(), |_| async { Ok(json!(2)) }).unwrap();

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second_id = second.handle().task_id.clone();
        assert_eq!(registry.status(&second_id).unwrap().status, TaskStatus::Pending);
        assert_eq!(registry.list_active().len(), 2);

        release_tx.send(()).unwrap();
        assert_eq!(first.wait().await.status, TaskStatus::Completed);
        assert_eq!(second.wait().await.status, TaskStatus::Completed);
        assert!(registry.list_active().is_empty());
    }

    #[tokio::test]
    async fn saturation_rejects_submit() {
        let registry = registry(1, 1);
        let (_hold, rx) = oneshot::channel::<()>();
        registry
            .submit(spec(), |_| async move {
                let _ = rx.await;
                Ok(Value::Null)
            })
            .unwrap();
        let err = registry
            .submit(spec(), |_| async { Ok(Value::Null) })
            .unwrap_err();
        assert_eq!(err, TaskError::Saturated { limit: 1 });
    }

    #[tokio::test]
    async fn cancelled_pending_task_never_starts() {
        let registry = registry(1, 8);
        let (_hold, rx) = oneshot::channel::<()>();
        registry
            .submit(spec(), |_| async move {
                let _ = rx.await;
                Ok(Value::Null)
            })
            .unwrap();

        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let mut queued = registry
            .submit(spec(), move |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            })
            .unwrap();
        let id = queued.handle().task_id.clone();

        assert_eq!(registry.cancel(&id).unwrap(), CancelOutcome::Cancelled);
        let record = queued.wait().await;
        assert_eq!(record.status, TaskStatus::Cancelled);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_running_task_signals_token() {
        let registry = TaskRegistry::default();
        let (seen_tx, seen_rx) = oneshot::channel();
        let mut ticket = registry
            .submit(spec(), |token| async move {
                let watcher = tokio::spawn(async move {
                    token.cancelled().await;
                    let _ = seen_tx.send(());
                });
                std::future::pending::<()>().await;
                drop(watcher);
                Ok(Value::Null)
            })
            .unwrap();
        let id = ticket.handle().task_id.clone();
        while registry.status(&id).unwrap().status != TaskStatus::Running {
            tokio::task::yield_now().await;
        }

        assert_eq!(registry.cancel(&id).unwrap(), CancelOutcome::Cancelled);
        assert_eq!(ticket.wait().await.status, TaskStatus::Cancelled);
        seen_rx.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_finished_task_reports_status() {
        let registry = TaskRegistry::default();
        let mut ticket = registry.submit(spec(), |_| async { Ok(json!(1)) }).unwrap();
        ticket.wait().await;
        let id = ticket.handle().task_id.clone();
        assert_eq!(
            registry.cancel(&id).unwrap(),
            CancelOutcome::AlreadyFinished(TaskStatus::Completed)
        );
        assert_eq!(registry.status(&id).unwrap().result, Some(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_limit_times_out() {
        let registry = TaskRegistry::default();
        let mut ticket = registry
            .submit(spec().with_max_runtime(Duration::from_secs(2)), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            })
            .unwrap();
        let record = ticket.wait().await;
        assert_eq!(record.status, TaskStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn result_waits_when_asked() {
        let registry = TaskRegistry::default();
        let ticket = registry
            .submit(spec(), |_| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(json!("done"))
            })
            .unwrap();
        let id = ticket.handle().task_id.clone();

        let early = registry.result(&id, None).await.unwrap();
        assert!(!early.status.is_terminal());

        let short = registry
            .result(&id, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(!short.status.is_terminal());

        let done = registry
            .result(&id, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result, Some(json!("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_result_blocks_until_finished() {
        let registry = TaskRegistry::default();
        let ticket = registry
            .submit(spec(), |_| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(json!("linked"))
            })
            .unwrap();
        let id = ticket.handle().task_id.clone();

        let start = tokio::time::Instant::now();
        let done = registry.wait_for_result(&id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result, Some(json!("linked")));
        assert!(start.elapsed() >= Duration::from_secs(600));
        assert!(registry.wait_for_result("nope").await.is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_records() {
        let registry = TaskRegistry::default();
        let mut done = registry.submit(spec(), |_| async { Ok(json!(1)) }).unwrap();
        done.wait().await;
        let (_hold, rx) = oneshot::channel::<()>();
        registry
            .submit(spec(), |_| async move {
                let _ = rx.await;
                Ok(Value::Null)
            })
            .unwrap();

        assert_eq!(registry.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.cleanup(Duration::ZERO), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.status(&done.handle().task_id).is_err());
    }

    #[tokio::test]
    async fn discard_forgets_record() {
        let registry = TaskRegistry::default();
        let mut ticket = registry.submit(spec(), |_| async { Ok(json!(1)) }).unwrap();
        ticket.wait().await;
        assert!(registry.discard(&ticket.handle().task_id));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_purges_and_stops() {
        let registry = TaskRegistry::default();
        let mut ticket = registry.submit(spec(), |_| async { Ok(json!(1)) }).unwrap();
        ticket.wait().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let janitor =
            registry.spawn_janitor(Duration::from_secs(60), Duration::ZERO, shutdown_rx);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(registry.is_empty());

        shutdown_tx.send(true).unwrap();
        janitor.await.unwrap();
    }
}
