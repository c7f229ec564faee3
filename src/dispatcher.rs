//! Concurrent job dispatch and supervision.
//!
//! The dispatcher owns the job table. Each submission gets a UUIDv4 id, one
//! workspace namespace, and one supervision task; lifecycle events flow to
//! observers over a per-job broadcast channel and the terminal outcome is
//! stored exactly once. Terminal records stick around (so late subscribers
//! still get the stored terminal event) until the janitor reaps them.

use crate::config::{EngineConfig, ScratchConfig};
use crate::engine::{probe, EngineEvent, Supervisor};
use crate::error::{Error, FailureKind, Result};
use crate::job::{Failure, Job, JobOutcome, JobState, JobUpdate, Outcome};
use crate::operation::Operation;
use crate::validate;
use crate::workspace::{Workspace, WorkspaceManager};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Routes submissions to supervised jobs and results back to requesters.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    workspaces: WorkspaceManager,
    engine: Supervisor,
    jobs: DashMap<Uuid, Arc<JobSlot>>,
    retention: Duration,
}

/// Everything the dispatcher holds for one job.
struct JobSlot {
    id: Uuid,
    record: RwLock<Job>,
    events: broadcast::Sender<JobUpdate>,
    cancel: CancellationToken,
    outcome: RwLock<Option<JobOutcome>>,
    /// Namespace guard parked here on file-producing success until the
    /// requester fetches the artifact; dropping it removes the namespace.
    artifact: Mutex<Option<Workspace>>,
}

impl JobSlot {
    fn new(id: Uuid, operation: Operation, source_name: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            id,
            record: RwLock::new(Job::new(id, operation, source_name)),
            events,
            cancel: CancellationToken::new(),
            outcome: RwLock::new(None),
            artifact: Mutex::new(None),
        })
    }

    fn snapshot(&self) -> Job {
        self.record.read().clone()
    }

    fn publish(&self, update: JobUpdate) {
        if self.events.send(update).is_err() {
            tracing::trace!(job_id = %self.id, "No observers for job event");
        }
    }

    fn transition(&self, next: JobState) {
        let update = {
            let mut record = self.record.write();
            if !record.transition(next) {
                return;
            }
            record.update()
        };
        tracing::debug!(job_id = %self.id, state = ?next, "Job state changed");
        self.publish(update);
    }

    fn set_progress(&self, fraction: f64) {
        let update = {
            let mut record = self.record.write();
            if !record.set_progress(fraction) {
                return;
            }
            record.update()
        };
        self.publish(update);
    }

    /// Set the terminal outcome. The outcome is stored before the terminal
    /// update is broadcast, so anyone who sees the update can read it; the
    /// state machine makes a second call a no-op.
    fn finish(&self, outcome: JobOutcome) {
        let update = {
            let mut record = self.record.write();
            let next = if outcome.is_ok() {
                JobState::Succeeded
            } else {
                JobState::Failed
            };
            if !record.transition(next) {
                return;
            }
            if let Err(failure) = &outcome {
                record.error = Some(failure.clone());
            }
            *self.outcome.write() = Some(outcome);
            record.update()
        };
        self.publish(update);
    }
}

/// A delivered outcome. For file successes the workspace guard rides along;
/// the namespace is removed when this is dropped, so delivery failures still
/// clean up.
pub struct Fetched {
    pub outcome: JobOutcome,
    pub workspace: Option<Workspace>,
}

impl Dispatcher {
    pub fn new(scratch: &ScratchConfig, engine: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                workspaces: WorkspaceManager::new(scratch.root.clone()),
                engine: Supervisor::new(engine.clone()),
                jobs: DashMap::new(),
                retention: Duration::from_secs(scratch.retention_secs),
            }),
        }
    }

    /// The scratch root jobs allocate under. The boundary layer spools
    /// uploads next to it so staging a job's input copy stays on one
    /// filesystem.
    pub fn scratch_root(&self) -> &Path {
        self.inner.workspaces.root()
    }

    /// Submit a job.
    ///
    /// Parameters are validated synchronously and rejected before any
    /// workspace exists. The input is copied into the job's namespace before
    /// this returns, so the caller may discard its copy immediately
    /// afterwards. Everything later (probe, spawn, validation) happens in the
    /// supervision task and surfaces through the job's terminal outcome.
    pub async fn submit(
        &self,
        input: &Path,
        source_name: &str,
        operation: Operation,
    ) -> Result<Uuid> {
        operation.validate()?;

        let id = Uuid::new_v4();
        let workspace = self.inner.workspaces.allocate(id).await?;

        let slot = JobSlot::new(id, operation, source_name);
        self.inner.jobs.insert(id, slot.clone());

        tracing::info!(
            job_id = %id,
            operation = operation.label(),
            source = source_name,
            "Job submitted"
        );

        let input_copy = workspace.input_path(input);
        if let Err(e) = tokio::fs::copy(input, &input_copy).await {
            let err = Error::Io(e);
            tracing::error!(job_id = %id, "Failed to stage input: {}", err);
            slot.finish(Err(Failure::from(&err)));
            return Ok(id);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_job(inner, slot, workspace, input_copy));

        Ok(id)
    }

    /// Current record for a job.
    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.inner.jobs.get(&id).map(|e| e.value().snapshot())
    }

    /// All known job records, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .jobs
            .iter()
            .map(|e| e.value().snapshot())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Observe a job's `{state, progress}` updates until terminal.
    ///
    /// The stream starts with the current observation, delivers progress in
    /// the order the engine reported it, and ends after the terminal update.
    /// Observing an already-terminal job yields the stored terminal update
    /// once.
    pub fn observe(&self, id: Uuid) -> Result<BoxStream<'static, JobUpdate>> {
        let slot = self.slot(id)?;

        // Subscribe before snapshotting so a transition between the two is
        // seen either in the snapshot or on the channel, never missed.
        let rx = slot.events.subscribe();
        let snapshot = slot.snapshot();
        let first = snapshot.update();

        if snapshot.state.is_terminal() {
            return Ok(stream::once(async move { first }).boxed());
        }

        let rest = stream::unfold(
            (BroadcastStream::new(rx), false),
            |(mut rx, done)| async move {
                if done {
                    return None;
                }
                loop {
                    match rx.next().await {
                        Some(Ok(update)) => {
                            let terminal = update.state.is_terminal();
                            return Some((update, (rx, terminal)));
                        }
                        // A lagged observer skips ahead; ordering of what it
                        // does see is still the emission order.
                        Some(Err(_)) => continue,
                        None => return None,
                    }
                }
            },
        );

        Ok(stream::once(async move { first }).chain(rest).boxed())
    }

    /// Wait for a job's terminal outcome.
    pub async fn result(&self, id: Uuid) -> Result<JobOutcome> {
        let slot = self.slot(id)?;
        let mut rx = slot.events.subscribe();

        loop {
            if let Some(outcome) = slot.outcome.read().clone() {
                return Ok(outcome);
            }
            match rx.recv().await {
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return slot
                        .outcome
                        .read()
                        .clone()
                        .ok_or(Error::UnknownJob(id));
                }
            }
        }
    }

    /// Wait for the terminal outcome and take delivery of the artifact.
    ///
    /// For file successes the first fetch receives the workspace guard; the
    /// namespace lives exactly until the caller drops it (after streaming the
    /// file out). Later fetches see the outcome but no guard.
    pub async fn fetch(&self, id: Uuid) -> Result<Fetched> {
        let outcome = self.result(id).await?;
        let slot = self.slot(id)?;
        let workspace = slot.artifact.lock().take();
        Ok(Fetched { outcome, workspace })
    }

    /// Request cancellation. Best-effort: a no-op on terminal jobs, and the
    /// job only reports Cancelled once the engine process has actually
    /// exited. Returns false for unknown jobs.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(slot) = self.inner.jobs.get(&id).map(|e| e.value().clone()) else {
            return false;
        };
        if slot.snapshot().state.is_terminal() {
            tracing::debug!(job_id = %id, "Cancel ignored; job already terminal");
        } else {
            tracing::info!(job_id = %id, "Cancellation requested");
            slot.cancel.cancel();
        }
        true
    }

    /// Drop terminal records older than the retention window, along with any
    /// artifact namespaces nobody fetched.
    pub fn reap_expired(&self) -> usize {
        let now = chrono::Utc::now();
        let retention = chrono::Duration::from_std(self.inner.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut removed = 0;
        self.inner.jobs.retain(|id, slot| {
            let record = slot.record.read();
            let expired = record.state.is_terminal()
                && record
                    .completed_at
                    .map(|t| now - t > retention)
                    .unwrap_or(false);
            if expired {
                tracing::info!(job_id = %id, "Reaped expired job record");
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            tracing::debug!(removed, "Janitor pass complete");
        }
        removed
    }

    fn slot(&self, id: Uuid) -> Result<Arc<JobSlot>> {
        self.inner
            .jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(Error::UnknownJob(id))
    }
}

/// Start a background task that periodically reaps expired job records.
pub fn start_janitor(dispatcher: Dispatcher, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            dispatcher.reap_expired();
        }
    })
}

/// Supervision task: one per job. Owns the workspace guard for the whole run,
/// so every exit path out of `drive` ends in cleanup -- immediately on
/// failure or metadata success, or deferred to the fetched guard on file
/// success.
async fn run_job(inner: Arc<Inner>, slot: Arc<JobSlot>, workspace: Workspace, input: PathBuf) {
    let id = slot.id;

    match drive(&inner, &slot, &workspace, &input).await {
        Ok(outcome) => {
            if matches!(outcome, Outcome::File { .. }) {
                *slot.artifact.lock() = Some(workspace);
            }
            tracing::info!(job_id = %id, "Job succeeded");
            slot.finish(Ok(outcome));
        }
        Err(e) => {
            let failure = Failure::from(&e);
            if failure.kind == FailureKind::Cancelled {
                tracing::info!(job_id = %id, "Job cancelled");
            } else {
                tracing::error!(job_id = %id, kind = ?failure.kind, "Job failed: {}", failure.message);
            }
            slot.finish(Err(failure));
        }
    }
}

async fn drive(
    inner: &Inner,
    slot: &Arc<JobSlot>,
    workspace: &Workspace,
    input: &Path,
) -> Result<Outcome> {
    if slot.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let record = slot.snapshot();
    let operation = record.operation;

    if operation == Operation::ProbeMetadata {
        let invocation = inner.engine.probe_invocation(input);
        let output = inner
            .engine
            .run(invocation, None, |event| apply_event(slot, event), &slot.cancel)
            .await?;

        slot.transition(JobState::Validating);
        let info = validate::validate_metadata(&output.stdout)?;
        return Ok(Outcome::Metadata(info));
    }

    // Probe the source so progress can be scaled. A source the engine cannot
    // probe still transcodes, just without progress reports.
    let duration_hint = probe::probe_media(inner.engine.config(), input)
        .await
        .ok()
        .and_then(|info| info.duration_seconds);

    let extension = operation.output_extension().unwrap_or("bin");
    let output_path = workspace.output_path(extension);
    let invocation = inner.engine.transform_invocation(&operation, input, &output_path);

    inner
        .engine
        .run(
            invocation,
            duration_hint,
            |event| apply_event(slot, event),
            &slot.cancel,
        )
        .await?;

    slot.transition(JobState::Validating);
    let size_bytes = validate::validate_artifact(&output_path).await?;

    Ok(Outcome::File {
        path: output_path,
        file_name: operation.download_name(&record.source_name),
        content_type: operation.content_type(),
        size_bytes,
    })
}

fn apply_event(slot: &Arc<JobSlot>, event: EngineEvent) {
    match event {
        EngineEvent::Started { command } => {
            tracing::debug!(job_id = %slot.id, command = %command, "Engine started");
            slot.transition(JobState::Running);
        }
        EngineEvent::Progress { fraction } => slot.set_progress(fraction),
        EngineEvent::Ended { success } => {
            tracing::debug!(job_id = %slot.id, success, "Engine exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn dispatcher_with_root(root: &Path) -> Dispatcher {
        let scratch = ScratchConfig {
            root: root.to_path_buf(),
            ..ScratchConfig::default()
        };
        Dispatcher::new(&scratch, &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_invalid_params_fail_fast_with_no_allocation() {
        let dir = TempDir::new().unwrap();
        let scratch_root = dir.path().join("scratch");
        let dispatcher = dispatcher_with_root(&scratch_root);

        let err = dispatcher
            .submit(
                Path::new("input.mp4"),
                "input.mp4",
                Operation::ResizeFrame {
                    width: 0,
                    height: 10,
                },
            )
            .await
            .unwrap_err();

        assert_matches!(err, Error::InvalidParameters(_));
        // No workspace was ever allocated: the scratch root was not even
        // created, and no job record exists.
        assert!(!scratch_root.exists());
        assert!(dispatcher.list().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_input_becomes_io_failure() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_with_root(&dir.path().join("scratch"));

        let id = dispatcher
            .submit(
                &dir.path().join("missing.mp4"),
                "missing.mp4",
                Operation::ExtractAudio,
            )
            .await
            .unwrap();

        let outcome = dispatcher.result(id).await.unwrap();
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::IoError);

        // The namespace allocated for the failed job is already gone.
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("scratch"))
            .unwrap()
            .collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_is_an_error() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_with_root(dir.path());

        let id = Uuid::new_v4();
        assert_matches!(dispatcher.result(id).await, Err(Error::UnknownJob(_)));
        assert!(dispatcher.observe(id).is_err());
        assert!(!dispatcher.cancel(id));
        assert!(dispatcher.snapshot(id).is_none());
    }

    #[tokio::test]
    async fn test_reap_expired_only_touches_old_terminal_jobs() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchConfig {
            root: dir.path().to_path_buf(),
            retention_secs: 0,
            ..ScratchConfig::default()
        };
        let dispatcher = Dispatcher::new(&scratch, &EngineConfig::default());

        // A job that failed at staging is terminal with retention 0.
        let id = dispatcher
            .submit(
                &dir.path().join("missing.mp4"),
                "missing.mp4",
                Operation::ExtractAudio,
            )
            .await
            .unwrap();
        let _ = dispatcher.result(id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.reap_expired(), 1);
        assert!(dispatcher.snapshot(id).is_none());
    }
}
