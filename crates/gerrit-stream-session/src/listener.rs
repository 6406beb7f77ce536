//! Background ingestion of a streaming command.
//!
//! A [`StreamListener`] owns one logical stream. Each `start` spawns a task
//! that opens a fresh session, frames its output with [`EventCodec`] and
//! pushes [`Delivery`] items into a bounded channel. A full channel suspends
//! the task, so a slow consumer throttles ingestion instead of growing a
//! buffer.
//!
//! `start` and `stop` never suspend. `stop` fires the run's cancellation
//! token; the task observes it at every await point, shuts the session down
//! and exits without waiting for further remote output. `Stopped` is only
//! published once the session's connection has been released.

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use gerrit_stream_core::{
    Connector, DEFAULT_SHUTDOWN_GRACE, Endpoint, Event, EventCodec, RawEvent, RemoteSession,
    SessionError, StateError, decoder::DEFAULT_MAX_RECORD_BYTES,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::Instrument;
use uuid::Uuid;

use crate::{Delivery, EndReason, ListenerError, ListenerState};

/// Default delivery channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// What to do with a record that fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Deliver [`Delivery::Malformed`] and keep streaming.
    #[default]
    Skip,
    /// End the run with [`ListenerError::Decode`].
    Fatal,
}

/// Listener tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Delivery channel capacity. Zero is treated as one.
    pub channel_capacity: usize,
    /// Cap on a single record.
    pub max_record_bytes: usize,
    pub decode_policy: DecodePolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// State shared between the listener handle and its run task.
struct Shared<C> {
    id: Uuid,
    connector: C,
    endpoint: Endpoint,
    command: String,
    config: ListenerConfig,
    state: watch::Sender<ListenerState>,
    last_error: Mutex<Option<ListenerError>>,
}

impl<C> Shared<C> {
    fn set_last_error(&self, error: Option<ListenerError>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }
}

/// The current or last run.
struct Run {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs a streaming command and publishes its decoded records.
pub struct StreamListener<C, E = RawEvent> {
    shared: Arc<Shared<C>>,
    events_tx: mpsc::Sender<Delivery<E>>,
    events_rx: Mutex<Option<mpsc::Receiver<Delivery<E>>>>,
    run: Mutex<Option<Run>>,
}

impl<C, E> StreamListener<C, E>
where
    C: Connector + 'static,
    E: Event,
{
    pub fn new(connector: C, endpoint: Endpoint, command: impl Into<String>) -> Self {
        Self::with_config(connector, endpoint, command, ListenerConfig::default())
    }

    pub fn with_config(
        connector: C,
        endpoint: Endpoint,
        command: impl Into<String>,
        config: ListenerConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                connector,
                endpoint,
                command: command.into(),
                config,
                state,
                last_error: Mutex::new(None),
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            run: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.shared.command
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.shared.config
    }

    /// Take the receiving end of the delivery channel.
    ///
    /// Returns `None` after the first call. The channel outlives individual
    /// runs: each run appends its records and then one [`Delivery::Ended`].
    pub fn take_events(&self) -> Option<mpsc::Receiver<Delivery<E>>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Begin a run in a background task.
    ///
    /// The session is opened by the task, so connection failures arrive as
    /// [`EndReason::Failed`] rather than here. Must be called inside a Tokio
    /// runtime.
    ///
    /// # Errors
    /// Returns `StateError::AlreadyRunning` unless the listener is idle or
    /// stopped.
    pub fn start(&self) -> Result<(), StateError> {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);

        let mut current = ListenerState::Idle;
        let started = self.shared.state.send_if_modified(|state| {
            current = *state;
            if state.can_start() {
                *state = ListenerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(StateError::AlreadyRunning(current.as_str()));
        }

        self.shared.set_last_error(None);
        let cancel = CancellationToken::new();
        let previous = run.take().map(|run| run.task);

        tracing::info!(
            listener_id = %self.shared.id,
            command = %self.shared.command,
            address = %self.shared.endpoint.address(),
            "Starting listener"
        );
        let span = tracing::info_span!("listener", listener_id = %self.shared.id);
        let task = tokio::spawn(
            run_stream(
                Arc::clone(&self.shared),
                self.events_tx.clone(),
                cancel.clone(),
                previous,
            )
            .instrument(span),
        );
        *run = Some(Run { cancel, task });
        Ok(())
    }

    /// Ask the current run to end.
    ///
    /// Returns at once; use [`wait_stopped`](Self::wait_stopped) to wait for
    /// the task. Does nothing unless the listener is running.
    pub fn stop(&self) {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        let stopping = self.shared.state.send_if_modified(|state| {
            if *state == ListenerState::Running {
                *state = ListenerState::Stopping;
                true
            } else {
                false
            }
        });
        if stopping {
            tracing::info!(listener_id = %self.shared.id, "Stopping listener");
            if let Some(run) = run.as_ref() {
                run.cancel.cancel();
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.shared.state.subscribe()
    }

    /// Wait until no run is active and its session has been released.
    ///
    /// The run's [`Delivery::Ended`] may still be on its way.
    pub async fn wait_stopped(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = state.wait_for(|s| s.can_start()).await;
    }

    /// The failure that ended the most recent run, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<ListenerError> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<C, E> Drop for StreamListener<C, E> {
    fn drop(&mut self) {
        let run = self.run.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = run.as_ref() {
            run.cancel.cancel();
        }
    }
}

impl<C, E> std::fmt::Debug for StreamListener<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamListener")
            .field("id", &self.shared.id)
            .field("command", &self.shared.command)
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

/// One run: ingest, record the outcome, report `Stopped`, then deliver the
/// end marker.
async fn run_stream<C, E>(
    shared: Arc<Shared<C>>,
    tx: mpsc::Sender<Delivery<E>>,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
) where
    C: Connector,
    E: Event,
{
    // The previous run may still be delivering its end marker.
    if let Some(previous) = previous {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            _ = previous => {}
        }
    }

    let reason = ingest(&shared, &tx, &cancel).await;

    if let Some(e) = reason.error() {
        tracing::warn!(error = %e, "Listener run failed");
        shared.set_last_error(Some(e.clone()));
    } else {
        tracing::info!(?reason, "Listener run ended");
    }
    shared.state.send_replace(ListenerState::Stopped);

    match reason {
        EndReason::ConsumerGone => {}
        reason if cancel.is_cancelled() => {
            let _ = tx.try_send(Delivery::Ended(reason));
        }
        reason => tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = tx.try_send(Delivery::Ended(reason));
            }
            _ = tx.send(Delivery::Ended(reason.clone())) => {}
        },
    }
}

/// Shut the session down and return `reason` once it is released.
async fn release(session: RemoteSession, reason: EndReason) -> EndReason {
    let session_id = session.id();
    match session.shutdown(DEFAULT_SHUTDOWN_GRACE).await {
        Ok(status) => tracing::debug!(%session_id, %status, "Session released"),
        Err(e) => tracing::debug!(%session_id, error = %e, "Session released"),
    }
    reason
}

async fn ingest<C, E>(
    shared: &Shared<C>,
    tx: &mpsc::Sender<Delivery<E>>,
    cancel: &CancellationToken,
) -> EndReason
where
    C: Connector,
    E: Event,
{
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return EndReason::Stopped,
        opened = shared.connector.open(&shared.endpoint, &shared.command) => opened,
    };
    let session = match opened {
        Ok(session) => session,
        Err(e) => return EndReason::Failed(e.into()),
    };
    tracing::info!(session_id = %session.id(), "Session open, streaming");

    let codec = EventCodec::<E>::with_max_record_bytes(shared.config.max_record_bytes);
    let mut frames = FramedRead::new(session, codec);

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return release(frames.into_inner(), EndReason::Stopped).await;
            }
            frame = frames.next() => frame,
        };

        let delivery = match frame {
            None => break,
            Some(Err(e)) => {
                let reason = EndReason::Failed(SessionError::from(e).into());
                return release(frames.into_inner(), reason).await;
            }
            Some(Ok(Ok(event))) => {
                tracing::trace!(kind = event.kind(), "Event");
                Delivery::Event(event)
            }
            Some(Ok(Err(e))) => match shared.config.decode_policy {
                DecodePolicy::Skip => {
                    tracing::warn!(error = %e, "Skipping undecodable record");
                    Delivery::Malformed(e)
                }
                DecodePolicy::Fatal => {
                    return release(frames.into_inner(), EndReason::Failed(e.into())).await;
                }
            },
        };

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            sent = tx.send(delivery) => Some(sent.is_ok()),
        };
        match sent {
            Some(true) => {}
            Some(false) => return release(frames.into_inner(), EndReason::ConsumerGone).await,
            None => return release(frames.into_inner(), EndReason::Stopped).await,
        }
    }

    // End of output: the driver is done, collect its exit status.
    match frames.into_inner().wait().await {
        Ok(status) => match status.clone().into_result() {
            Ok(()) => EndReason::RemoteExited(status),
            Err(e) => EndReason::Failed(e.into()),
        },
        Err(e) => EndReason::Failed(e.into()),
    }
}
