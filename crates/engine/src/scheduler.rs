#![forbid(unsafe_code)]

use crate::error::EngineError;
use crate::observe::{CommitNotification, SubscriberSet, SubscriptionId};
use crate::registry::PluginRegistry;
use fl_core::diff::{DiffError, DiffOperation, DiffReport, entity_key};
use fl_storage::{CommitChangeSetRequest, NewChange, SqliteStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};

/// Per-file reconciliation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Tracked, no blob written since the last settle point.
    Clean,
    /// The stored blob differs from the blob last diffed.
    Dirty,
    /// A diff pass is running; a write during this state supersedes it.
    Diffing,
    /// All detected changes have been committed.
    Settled,
}

#[derive(Clone, Debug, Default)]
struct FileProgress {
    settled_generation: u64,
    failure: Option<DiffFailure>,
}

#[derive(Clone, Debug)]
struct DiffFailure {
    generation: u64,
    malformed: bool,
    message: String,
}

struct FileTrack {
    schema_key: String,
    state: TrackState,
    /// Bumped on every write; a pass whose captured generation falls behind
    /// has been superseded and must discard its output.
    generation: u64,
    /// True while a diff task is scheduled or running for this file.
    pass_active: bool,
    progress: watch::Sender<FileProgress>,
}

impl FileTrack {
    fn new(schema_key: String, state: TrackState, generation: u64) -> Self {
        let (progress, _) = watch::channel(FileProgress::default());
        Self {
            schema_key,
            state,
            generation,
            pass_active: false,
            progress,
        }
    }
}

struct EngineInner {
    store: Mutex<SqliteStore>,
    registry: PluginRegistry,
    // Lock order: `files` before `store`, everywhere.
    files: Mutex<HashMap<String, FileTrack>>,
    subscribers: std::sync::Mutex<SubscriberSet>,
    branch: std::sync::Mutex<String>,
    debounce: Duration,
}

/// The reconciliation scheduler: observes raw file writes, debounces them
/// into diff passes, commits resulting changesets and settles pending work.
///
/// Must be created inside a tokio runtime; diff passes run as spawned tasks.
#[derive(Clone)]
pub struct TrackerEngine {
    inner: Arc<EngineInner>,
}

impl TrackerEngine {
    pub fn open(
        storage_dir: impl AsRef<Path>,
        registry: PluginRegistry,
        debounce: Duration,
    ) -> Result<Self, EngineError> {
        let store = SqliteStore::open(storage_dir)?;
        let branch = store.default_branch_name().to_string();

        let mut files = HashMap::new();
        let mut recover = Vec::new();
        for file in store.list_files()? {
            let undiffed = file.data != file.diffed_data;
            let state = if undiffed {
                TrackState::Dirty
            } else {
                TrackState::Clean
            };
            let generation = u64::from(undiffed);
            files.insert(
                file.id.clone(),
                FileTrack::new(file.schema_key.clone(), state, generation),
            );
            if undiffed {
                recover.push(file.id);
            }
        }

        let engine = Self {
            inner: Arc::new(EngineInner {
                store: Mutex::new(store),
                registry,
                files: Mutex::new(files),
                subscribers: std::sync::Mutex::new(SubscriberSet::default()),
                branch: std::sync::Mutex::new(branch),
                debounce,
            }),
        };

        for file_id in recover {
            engine.schedule_recovery(&file_id);
        }

        Ok(engine)
    }

    /// Direct access to the underlying store, for queries outside the
    /// reconciliation path.
    pub async fn store(&self) -> MutexGuard<'_, SqliteStore> {
        self.inner.store.lock().await
    }

    pub fn active_branch(&self) -> String {
        self.inner
            .branch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), EngineError> {
        {
            let store = self.inner.store.lock().await;
            store.branch_head(branch)?;
        }
        let mut active = self
            .inner
            .branch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *active = branch.to_string();
        Ok(())
    }

    pub async fn create_branch(&self, name: &str) -> Result<(), EngineError> {
        let from = self.active_branch();
        let mut store = self.inner.store.lock().await;
        store.create_branch(fl_storage::CreateBranchRequest {
            name: name.to_string(),
            from: Some(from),
        })?;
        Ok(())
    }

    pub fn subscribe(
        &self,
        callback: Box<dyn Fn(&CommitNotification) + Send + Sync>,
    ) -> SubscriptionId {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }

    /// Registers a file for tracking. The schema key must name a registered
    /// plugin.
    pub async fn track_file(
        &self,
        file_id: &str,
        path: &str,
        schema_key: &str,
    ) -> Result<(), EngineError> {
        if self.inner.registry.get(schema_key).is_none() {
            return Err(EngineError::UnknownSchema(schema_key.to_string()));
        }

        let mut files = self.inner.files.lock().await;
        {
            let mut store = self.inner.store.lock().await;
            store.track_file(file_id, path, schema_key)?;
        }
        files
            .entry(file_id.to_string())
            .or_insert_with(|| FileTrack::new(schema_key.to_string(), TrackState::Clean, 0));
        Ok(())
    }

    pub async fn file_state(&self, file_id: &str) -> Result<TrackState, EngineError> {
        let files = self.inner.files.lock().await;
        let track = files
            .get(file_id)
            .ok_or_else(|| EngineError::UnknownFile(file_id.to_string()))?;
        Ok(track.state)
    }

    /// Stores a new blob for a tracked file and schedules a debounced diff
    /// pass. Writes within the debounce window coalesce into one pass; a
    /// write during a running pass supersedes it.
    pub async fn write_file(&self, file_id: &str, data: &[u8]) -> Result<(), EngineError> {
        let mut files = self.inner.files.lock().await;
        let track = files
            .get_mut(file_id)
            .ok_or_else(|| EngineError::UnknownFile(file_id.to_string()))?;

        {
            let mut store = self.inner.store.lock().await;
            store.write_file_blob(file_id, data)?;
        }

        track.generation += 1;
        track.state = TrackState::Dirty;
        if !track.pass_active {
            track.pass_active = true;
            self.spawn_pass(file_id.to_string());
        }
        Ok(())
    }

    /// Removes the blob (whole-file delete) and schedules a pass so the
    /// plugin can report entity deletions.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), EngineError> {
        let mut files = self.inner.files.lock().await;
        let track = files
            .get_mut(file_id)
            .ok_or_else(|| EngineError::UnknownFile(file_id.to_string()))?;

        {
            let mut store = self.inner.store.lock().await;
            store.delete_file_blob(file_id)?;
        }

        track.generation += 1;
        track.state = TrackState::Dirty;
        if !track.pass_active {
            track.pass_active = true;
            self.spawn_pass(file_id.to_string());
        }
        Ok(())
    }

    /// Resolves once every file that was unsettled at the moment of the call
    /// has settled. Files dirtied afterwards are not waited on. The first
    /// recorded diff failure at or past the captured generation rejects the
    /// wait.
    pub async fn settle(&self) -> Result<(), EngineError> {
        let waits: Vec<(String, u64, watch::Receiver<FileProgress>)> = {
            let files = self.inner.files.lock().await;
            files
                .iter()
                .filter(|(_, track)| {
                    matches!(track.state, TrackState::Dirty | TrackState::Diffing)
                })
                .map(|(id, track)| (id.clone(), track.generation, track.progress.subscribe()))
                .collect()
        };

        for (file_id, generation, mut progress) in waits {
            loop {
                {
                    let current = progress.borrow();
                    if let Some(failure) = &current.failure {
                        if failure.generation >= generation {
                            return Err(settle_failure(&file_id, failure));
                        }
                    }
                    if current.settled_generation >= generation {
                        break;
                    }
                }
                if progress.changed().await.is_err() {
                    return Err(EngineError::UnknownFile(file_id));
                }
            }
        }
        Ok(())
    }

    fn spawn_pass(&self, file_id: String) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            run_pass(inner, file_id).await;
        });
    }

    /// Scheduling used during recovery, before any write arrives.
    fn schedule_recovery(&self, file_id: &str) {
        let inner = self.inner.clone();
        let file_id = file_id.to_string();
        tokio::spawn(async move {
            {
                let mut files = inner.files.lock().await;
                if let Some(track) = files.get_mut(&file_id) {
                    if track.pass_active {
                        return;
                    }
                    track.pass_active = true;
                }
            }
            tokio::time::sleep(inner.debounce).await;
            run_pass(inner, file_id).await;
        });
    }
}

fn settle_failure(file_id: &str, failure: &DiffFailure) -> EngineError {
    if failure.malformed {
        EngineError::MalformedBlob {
            file_id: file_id.to_string(),
            message: failure.message.clone(),
        }
    } else {
        EngineError::Plugin {
            file_id: file_id.to_string(),
            message: failure.message.clone(),
        }
    }
}

/// One scheduled diff pass. Loops on supersede so at most one pass is active
/// per file; transient failures retry after another debounce window.
async fn run_pass(inner: Arc<EngineInner>, file_id: String) {
    loop {
        // Capture the pass input under the files lock.
        let (generation, schema_key, old, neu) = {
            let mut files = inner.files.lock().await;
            let Some(track) = files.get_mut(&file_id) else {
                return;
            };
            track.state = TrackState::Diffing;
            let generation = track.generation;
            let schema_key = track.schema_key.clone();

            let store = inner.store.lock().await;
            let file = match store.file_get(&file_id) {
                Ok(file) => file,
                Err(err) => {
                    drop(store);
                    track.state = TrackState::Dirty;
                    track.pass_active = false;
                    let settled_generation = track.progress.borrow().settled_generation;
                    let _ = track.progress.send(FileProgress {
                        settled_generation,
                        failure: Some(DiffFailure {
                            generation,
                            malformed: false,
                            message: err.to_string(),
                        }),
                    });
                    return;
                }
            };
            (generation, schema_key, file.diffed_data, file.data)
        };

        let result = if old == neu {
            Ok(Vec::new())
        } else {
            let Some(plugin) = inner.registry.get(&schema_key) else {
                record_failure(
                    &inner,
                    &file_id,
                    generation,
                    true,
                    format!("no plugin registered for schema key {schema_key}"),
                )
                .await;
                return;
            };
            let old_bytes = old.clone();
            let neu_bytes = neu.clone();
            tokio::task::spawn_blocking(move || {
                plugin.diff_file(old_bytes.as_deref(), neu_bytes.as_deref())
            })
            .await
            .unwrap_or_else(|err| Err(DiffError::Plugin(format!("diff task panicked: {err}"))))
        };

        match result {
            Ok(reports) => {
                let mut files = inner.files.lock().await;
                let Some(track) = files.get_mut(&file_id) else {
                    return;
                };
                if track.generation != generation {
                    // Superseded while diffing: discard and re-diff.
                    track.state = TrackState::Dirty;
                    continue;
                }

                let branch = inner
                    .branch
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                let mut store = inner.store.lock().await;
                let committed = match commit_reports(&mut store, &file_id, &branch, reports) {
                    Ok(committed) => committed,
                    Err(err) => {
                        drop(store);
                        track.state = TrackState::Dirty;
                        track.pass_active = false;
                        let settled_generation = track.progress.borrow().settled_generation;
                        let _ = track.progress.send(FileProgress {
                            settled_generation,
                            failure: Some(DiffFailure {
                                generation,
                                malformed: false,
                                message: err.to_string(),
                            }),
                        });
                        return;
                    }
                };
                if let Err(err) = store.mark_diffed(&file_id, neu.as_deref()) {
                    drop(store);
                    track.state = TrackState::Dirty;
                    track.pass_active = false;
                    let settled_generation = track.progress.borrow().settled_generation;
                    let _ = track.progress.send(FileProgress {
                        settled_generation,
                        failure: Some(DiffFailure {
                            generation,
                            malformed: false,
                            message: err.to_string(),
                        }),
                    });
                    return;
                }
                drop(store);

                track.state = TrackState::Settled;
                track.pass_active = false;
                let _ = track.progress.send(FileProgress {
                    settled_generation: generation,
                    failure: None,
                });
                drop(files);

                if let Some(notification) = committed {
                    inner
                        .subscribers
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .notify(&notification);
                }
                return;
            }
            Err(DiffError::Malformed(message)) => {
                // Sticky: stays dirty until a later write corrects the blob.
                record_failure(&inner, &file_id, generation, true, message).await;
                return;
            }
            Err(DiffError::Plugin(message)) => {
                let retry =
                    record_failure(&inner, &file_id, generation, false, message).await;
                if !retry {
                    return;
                }
                tokio::time::sleep(inner.debounce).await;
            }
        }
    }
}

/// Records a diff failure for settle callers. Returns true when the pass
/// should stay active and retry.
async fn record_failure(
    inner: &Arc<EngineInner>,
    file_id: &str,
    generation: u64,
    malformed: bool,
    message: String,
) -> bool {
    let mut files = inner.files.lock().await;
    let Some(track) = files.get_mut(file_id) else {
        return false;
    };
    track.state = TrackState::Dirty;
    let settled_generation = track.progress.borrow().settled_generation;
    let _ = track.progress.send(FileProgress {
        settled_generation,
        failure: Some(DiffFailure {
            generation,
            malformed,
            message,
        }),
    });
    if malformed {
        track.pass_active = false;
        return false;
    }
    true
}

/// Turns a pass's reports into one committed changeset on `branch`. Returns
/// `None` when the diff was empty (the file still settles).
fn commit_reports(
    store: &mut SqliteStore,
    file_id: &str,
    branch: &str,
    reports: Vec<DiffReport>,
) -> Result<Option<CommitNotification>, EngineError> {
    if reports.is_empty() {
        return Ok(None);
    }

    let mut changes = Vec::with_capacity(reports.len());
    for report in &reports {
        let entity_id = entity_key(report).ok_or_else(|| EngineError::InvalidReport {
            file_id: file_id.to_string(),
            message: format!("report for type {} has no stable identity", report.entity_type),
        })?;
        let content = match report.operation {
            DiffOperation::Delete => None,
            DiffOperation::Create | DiffOperation::Update => {
                Some(report.neu.clone().ok_or_else(|| EngineError::InvalidReport {
                    file_id: file_id.to_string(),
                    message: format!("{} report without neu value", report.operation.as_str()),
                })?)
            }
        };
        changes.push(NewChange {
            entity_id,
            file_id: file_id.to_string(),
            schema_key: report.entity_type.clone(),
            content,
            declared_parent: None,
        });
    }

    let expected_head = store.branch_head(branch)?;
    let committed = store.commit_change_set(CommitChangeSetRequest {
        branch: branch.to_string(),
        expected_head,
        changes,
    })?;

    Ok(Some(CommitNotification {
        change_set_id: committed.change_set.id.clone(),
        branch: branch.to_string(),
        file_id: file_id.to_string(),
        change_ids: committed
            .changes
            .iter()
            .map(|change| change.id.clone())
            .collect(),
        entity_ids: committed
            .changes
            .iter()
            .map(|change| change.entity_id.clone())
            .collect(),
    }))
}
