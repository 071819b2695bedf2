//! Periodic retention sweepers.
//!
//! Each sweeper is a small actor: a ticker task sends it `Tick` on a fixed
//! interval and callers can force a run with `SweepNow`. Sweep failures are
//! logged and never stop the actor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use storage::FileStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::EngineError;
use crate::status_store::StatusStore;

/// How long an on-demand sweep may take before the caller gives up.
const SWEEP_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One kind of periodic cleanup.
pub trait SweepTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run one sweep, returning how many entries were removed.
    fn sweep(&self) -> BoxFuture<'_, Result<usize, EngineError>>;
}

/// Evicts terminal status records older than the retention period.
pub struct StatusRetention {
    store: Arc<StatusStore>,
    retention: Duration,
}

impl StatusRetention {
    pub fn new(store: Arc<StatusStore>, retention: Duration) -> Self {
        Self { store, retention }
    }
}

impl SweepTask for StatusRetention {
    fn name(&self) -> &'static str {
        "status"
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, EngineError>> {
        Box::pin(async move {
            let cutoff = chrono::Duration::from_std(self.retention)
                .ok()
                .and_then(|retention| Utc::now().checked_sub_signed(retention));
            // A retention too large to represent never expires anything.
            let Some(cutoff) = cutoff else {
                return Ok(0);
            };
            Ok(self.store.evict_terminal_before(cutoff))
        })
    }
}

/// Deletes job directories older than the file store's retention.
pub struct FileRetention {
    files: Arc<FileStore>,
}

impl FileRetention {
    pub fn new(files: Arc<FileStore>) -> Self {
        Self { files }
    }
}

impl SweepTask for FileRetention {
    fn name(&self) -> &'static str {
        "file"
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, EngineError>> {
        Box::pin(async move {
            let report = self.files.sweep_expired().await?;
            if report.failed > 0 {
                tracing::warn!("{} job directories could not be swept", report.failed);
            }
            Ok(report.removed)
        })
    }
}

/// Messages for the sweeper actor.
#[derive(Debug)]
pub enum SweeperMessage {
    /// Periodic trigger from the ticker task.
    Tick,

    /// Run a sweep now and reply with the number of removed entries.
    SweepNow {
        reply: RpcReplyPort<Result<usize, String>>,
    },

    Shutdown,
}

/// Sweeper actor arguments.
pub struct SweeperArgs {
    pub task: Arc<dyn SweepTask>,
    pub interval: Duration,
}

pub struct SweeperState {
    task: Arc<dyn SweepTask>,
    runs: u64,
}

impl SweeperState {
    async fn run(&mut self) -> Result<usize, EngineError> {
        self.runs += 1;
        let removed = self.task.sweep().await?;
        if removed > 0 {
            tracing::info!("{} sweep removed {} entries", self.task.name(), removed);
        } else {
            tracing::debug!("{} sweep #{} found nothing to remove", self.task.name(), self.runs);
        }
        Ok(removed)
    }
}

pub struct SweeperActor;

impl Actor for SweeperActor {
    type Msg = SweeperMessage;
    type State = SweeperState;
    type Arguments = SweeperArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting {} sweeper (every {:?})",
            args.task.name(),
            args.interval
        );

        let myself_clone = myself.clone();
        let interval = args.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if myself_clone.send_message(SweeperMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(SweeperState {
            task: args.task,
            runs: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SweeperMessage::Tick => {
                if let Err(e) = state.run().await {
                    tracing::warn!("{} sweep failed: {}", state.task.name(), e);
                }
            }

            SweeperMessage::SweepNow { reply } => {
                let result = state.run().await.map_err(|e| e.to_string());
                let _ = reply.send(result);
            }

            SweeperMessage::Shutdown => {
                tracing::info!("Shutting down {} sweeper", state.task.name());
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Handle to a running sweeper actor.
pub struct Sweeper {
    actor: ActorRef<SweeperMessage>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub async fn spawn(task: Arc<dyn SweepTask>, interval: Duration) -> Result<Self, EngineError> {
        let (actor, handle) =
            Actor::spawn(None, SweeperActor, SweeperArgs { task, interval }).await?;
        Ok(Self {
            actor,
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Run a sweep immediately and return the number of removed entries.
    pub async fn sweep_now(&self) -> Result<usize, EngineError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| SweeperMessage::SweepNow { reply },
            Some(SWEEP_CALL_TIMEOUT),
        )
        .await;

        match result {
            Ok(CallResult::Success(Ok(removed))) => Ok(removed),
            Ok(CallResult::Success(Err(e))) => Err(EngineError::Sweep(e)),
            Ok(CallResult::Timeout) => Err(EngineError::Sweep("sweeper did not answer in time".into())),
            Ok(CallResult::SenderError) => Err(EngineError::Sweep("sweeper dropped the request".into())),
            Err(e) => Err(EngineError::Sweep(format!("sweeper unavailable: {e}"))),
        }
    }

    /// Stop the actor and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.actor.send_message(SweeperMessage::Shutdown);
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            tracing::warn!("Sweeper did not stop in time");
        }
    }
}
