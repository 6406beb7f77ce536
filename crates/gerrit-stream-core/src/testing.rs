//! Scripted in-memory connector for tests.
//!
//! Each `open` pops the next [`Script`] and plays it as the session's
//! stdout. Enabled for downstream crates with the `testing` feature.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    ConnectionError, Connector, Endpoint, ExitStatus, RemoteSession, SessionError, SessionSink,
};

/// What a scripted session does.
#[derive(Debug)]
pub enum Script {
    /// Fail the open.
    Refuse(ConnectionError),
    /// Write `chunks`, then end with `exit`.
    Output {
        chunks: Vec<Vec<u8>>,
        exit: ExitStatus,
    },
    /// Write whatever the paired [`Feeder`] sends; end with `exit` once the
    /// feeder is dropped. Never ends on its own while the feeder lives.
    Live {
        chunks: mpsc::UnboundedReceiver<Vec<u8>>,
        exit: ExitStatus,
    },
}

impl Script {
    /// A session that prints `chunks` and exits 0.
    #[must_use]
    pub fn output<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self::Output {
            chunks: chunks.into_iter().map(Into::into).collect(),
            exit: ExitStatus::Code(0),
        }
    }

    /// A session that prints `chunks` and exits with `exit`.
    #[must_use]
    pub fn exiting<I, B>(chunks: I, exit: ExitStatus) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self::Output {
            chunks: chunks.into_iter().map(Into::into).collect(),
            exit,
        }
    }
}

/// Test-side handle of a [`Script::Live`] session.
#[derive(Debug, Clone)]
pub struct Feeder(mpsc::UnboundedSender<Vec<u8>>);

impl Feeder {
    /// Push bytes to the session's stdout. Returns false once the session
    /// has gone away.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.0.send(bytes.into()).is_ok()
    }
}

/// In-memory [`Connector`] that plays queued scripts.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    commands: Mutex<Vec<String>>,
    closed: Arc<AtomicUsize>,
    teardown: Duration,
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers linger for `delay` after a close request before counting the
    /// session as closed, like a transport sending its disconnect.
    #[must_use]
    pub fn with_teardown_delay(delay: Duration) -> Self {
        Self {
            teardown: delay,
            ..Self::default()
        }
    }

    /// Queue a script for the next `open`.
    pub fn push(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }

    /// Queue a live session and return its feeder.
    #[must_use]
    pub fn push_live(&self, exit: ExitStatus) -> Feeder {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Live { chunks: rx, exit });
        Feeder(tx)
    }

    /// Commands opened so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sessions whose driver observed a close request.
    #[must_use]
    pub fn closed_sessions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        _endpoint: &Endpoint,
        command: &str,
    ) -> Result<RemoteSession, ConnectionError> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_owned());

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ConnectionError::Dial("no scripted session left".into()))?;

        if let Script::Refuse(err) = script {
            return Err(err);
        }

        let closed = Arc::clone(&self.closed);
        let teardown = self.teardown;
        Ok(RemoteSession::spawn(command, move |mut sink| async move {
            let result = play(script, &mut sink).await;
            if sink.is_closed() {
                tokio::time::sleep(teardown).await;
                closed.fetch_add(1, Ordering::SeqCst);
            }
            result
        }))
    }
}

async fn play(script: Script, sink: &mut SessionSink) -> Result<ExitStatus, SessionError> {
    match script {
        Script::Refuse(_) => Err(SessionError::Closed),
        Script::Output { chunks, exit } => {
            for chunk in chunks {
                sink.send(&chunk).await?;
            }
            Ok(exit)
        }
        Script::Live { mut chunks, exit } => loop {
            tokio::select! {
                biased;
                () = sink.closed() => return Err(SessionError::Closed),
                next = chunks.recv() => match next {
                    Some(chunk) => sink.send(&chunk).await?,
                    None => return Ok(exit),
                },
            }
        },
    }
}
