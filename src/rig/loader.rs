//! Asynchronous rig loading.
//!
//! `load` spawns a task that fetches, decodes, validates and prunes a rig
//! off the UI thread. Finished loads are queued and collected on a frame boundary with
//! [`RigLoader::poll_completed`]. Every `load` and `cancel` bumps a
//! generation counter; results from older generations are discarded, so the
//! last requested source wins regardless of completion order.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::prune;
use super::vrm::VrmModel;
use super::Rig;
use crate::error::RigLoadError;

/// Resolves a rig source identifier to a decoded model.
pub trait RigFetcher: Send + Sync + 'static {
    fn fetch(&self, source: &str) -> BoxFuture<'static, Result<VrmModel, RigLoadError>>;

    /// Turn a fetched model into a rig with [`build_rig`], on the blocking
    /// pool.
    fn build(
        &self,
        source: &str,
        model: VrmModel,
    ) -> BoxFuture<'static, Result<Rig, RigLoadError>> {
        let source = source.to_string();
        async move {
            let rig = source.clone();
            match tokio::task::spawn_blocking(move || build_rig(&source, model)).await {
                Ok(result) => result,
                Err(e) => Err(aborted(rig, e)),
            }
        }
        .boxed()
    }
}

/// Validate, prune and pose a fetched model.
///
/// CPU bound: prunes every primitive and runs the first skinning pass.
pub fn build_rig(source: &str, mut model: VrmModel) -> Result<Rig, RigLoadError> {
    model.validate().map_err(|reason| RigLoadError::Decode {
        rig: source.to_string(),
        reason,
    })?;
    let stats = prune::prune(&mut model);
    tracing::debug!(
        "Pruned {}: {} joints, {} vertices",
        source,
        stats.joints_removed,
        stats.vertices_removed
    );
    if model.vertex_count() == 0 {
        return Err(RigLoadError::Empty {
            rig: source.to_string(),
        });
    }
    Ok(Rig::new(source.to_string(), model))
}

fn aborted(rig: String, err: tokio::task::JoinError) -> RigLoadError {
    if err.is_panic() {
        tracing::error!("Loading {} panicked", rig);
    }
    RigLoadError::Aborted { rig }
}

/// Fetches from file paths, `file://` URLs and `http(s)://` URLs, decoding
/// on the blocking pool.
#[derive(Clone, Default)]
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl SourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn read_source(
    client: &reqwest::Client,
    source: &str,
) -> Result<(Vec<u8>, Option<PathBuf>), String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = client
            .get(source)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        return Ok((bytes.to_vec(), None));
    }

    let path = PathBuf::from(source.strip_prefix("file://").unwrap_or(source));
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok((bytes, path.parent().map(|p| p.to_path_buf())))
}

impl RigFetcher for SourceFetcher {
    fn fetch(&self, source: &str) -> BoxFuture<'static, Result<VrmModel, RigLoadError>> {
        let client = self.client.clone();
        let source = source.to_string();
        async move {
            let (bytes, base) =
                read_source(&client, &source)
                    .await
                    .map_err(|reason| RigLoadError::Fetch {
                        rig: source.clone(),
                        reason,
                    })?;
            tracing::debug!("Fetched {} ({} bytes)", source, bytes.len());

            tokio::task::spawn_blocking(move || VrmModel::from_slice(&bytes, base.as_deref()))
                .await
                .map_err(|e| aborted(source.clone(), e))?
                .map_err(|reason| RigLoadError::Decode {
                    rig: source.clone(),
                    reason,
                })
        }
        .boxed()
    }
}

/// Handle for one requested load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub generation: u64,
    pub source: String,
}

/// What `poll_completed` found for a finished load.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded { ticket: LoadTicket, rig: Rig },
    Failed { ticket: LoadTicket, error: RigLoadError },
    /// Superseded by a later `load` or `cancel`; the result was dropped.
    Stale { ticket: LoadTicket },
}

type Completed = (LoadTicket, Result<Rig, RigLoadError>);

pub struct RigLoader {
    runtime: Handle,
    fetcher: Arc<dyn RigFetcher>,
    generation: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<Completed>,
    rx: mpsc::UnboundedReceiver<Completed>,
    task: Option<JoinHandle<()>>,
}

impl RigLoader {
    pub fn new(runtime: Handle, fetcher: Arc<dyn RigFetcher>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            fetcher,
            generation: Arc::new(AtomicU64::new(0)),
            tx,
            rx,
            task: None,
        }
    }

    /// Generation of the most recent `load` or `cancel`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a spawned load has not finished yet.
    pub fn is_pending(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start loading `source`, superseding any load in flight.
    pub fn load(&mut self, source: &str) -> LoadTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.abort_task();

        let ticket = LoadTicket {
            generation,
            source: source.to_string(),
        };
        tracing::info!("Loading rig {} (generation {})", source, generation);

        let fetch = self.fetcher.fetch(source);
        let fetcher = Arc::clone(&self.fetcher);
        let live = Arc::clone(&self.generation);
        let tx = self.tx.clone();
        let task_ticket = ticket.clone();

        self.task = Some(self.runtime.spawn(async move {
            let source = task_ticket.source.clone();
            let work = async move {
                match fetch.await {
                    Ok(model) => fetcher.build(&source, model).await,
                    Err(e) => Err(e),
                }
            };
            // A panicking fetcher still owes the view an outcome.
            let result = AssertUnwindSafe(work).catch_unwind().await.unwrap_or_else(|_| {
                tracing::error!("Loading {} panicked", task_ticket.source);
                Err(RigLoadError::Aborted {
                    rig: task_ticket.source.clone(),
                })
            });

            if live.load(Ordering::SeqCst) != task_ticket.generation {
                tracing::debug!("Dropping superseded load of {}", task_ticket.source);
                return;
            }
            // Receiver gone means the loader was dropped; nothing to notify.
            let _ = tx.send((task_ticket, result));
        }));

        ticket
    }

    /// Invalidate any in-flight load. Its result will never be delivered.
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.abort_task();
    }

    /// Drain finished loads without blocking.
    pub fn poll_completed(&mut self) -> Vec<LoadOutcome> {
        let current = self.generation();
        let mut out = Vec::new();
        while let Ok((ticket, result)) = self.rx.try_recv() {
            if ticket.generation != current {
                tracing::debug!(
                    "Ignoring stale load of {} (generation {} < {})",
                    ticket.source,
                    ticket.generation,
                    current
                );
                out.push(LoadOutcome::Stale { ticket });
                continue;
            }
            out.push(match result {
                Ok(rig) => LoadOutcome::Loaded { ticket, rig },
                Err(error) => LoadOutcome::Failed { ticket, error },
            });
        }
        out
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RigLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}
