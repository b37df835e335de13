// src/client/stream.rs
//! Channel-backed task stream
//!
//! A background task owns the matcher connection and forwards events into a
//! bounded channel. On disconnection it waits out a backoff and reconnects
//! once; if that fails, or the stream drops again before delivering any
//! event, the consumer receives a terminal `Stream` error.
//!
//! ```text
//! matcher ──► connection task ──► mpsc (bounded) ──► TaskStream::next()
//!                  │ disconnect
//!                  └─► backoff ─► reopen (once) ─► or Err(Stream)
//! ```

use crate::client::transport::{methods, EventStream, MatcherTransport};
use crate::model::{MatcherEvent, TaskStreamRequest};
use crate::signing::SigningContext;
use crate::utils::errors::{AgentError, Result};
use futures::{Stream, StreamExt};
use rand::Rng;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events buffered between the connection task and the consumer
const STREAM_BUFFER: usize = 16;

/// Lazy, potentially infinite sequence of matcher events
pub struct TaskStream {
    rx: mpsc::Receiver<Result<MatcherEvent>>,
    worker: JoinHandle<()>,
}

impl TaskStream {
    /// Take over an already-open connection and keep it alive
    pub(crate) fn spawn(
        transport: Arc<dyn MatcherTransport>,
        signer: SigningContext,
        request: TaskStreamRequest,
        initial: EventStream,
        backoff: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let worker = tokio::spawn(connection_loop(
            transport, signer, request, initial, backoff, tx,
        ));

        Self { rx, worker }
    }

    /// Wait for the next event; `None` once the stream has terminated
    pub async fn next(&mut self) -> Option<Result<MatcherEvent>> {
        self.rx.recv().await
    }

    /// Drop the connection
    pub fn close(&mut self) {
        self.worker.abort();
        self.rx.close();
    }
}

impl Stream for TaskStream {
    type Item = Result<MatcherEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for TaskStream {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Open one subscription on `transport`
pub(crate) async fn open_stream(
    transport: &dyn MatcherTransport,
    signer: &SigningContext,
    request: &TaskStreamRequest,
) -> Result<EventStream> {
    let signature = signer.sign_request(methods::STREAM_TASKS, request)?;
    transport.open_task_stream(request, &signature).await
}

async fn connection_loop(
    transport: Arc<dyn MatcherTransport>,
    signer: SigningContext,
    request: TaskStreamRequest,
    mut current: EventStream,
    backoff: Duration,
    tx: mpsc::Sender<Result<MatcherEvent>>,
) {
    let mut may_reconnect = true;

    loop {
        let reason = match current.next().await {
            Some(Ok(event)) => {
                may_reconnect = true;
                if tx.send(Ok(event)).await.is_err() {
                    debug!("Task stream consumer dropped, closing connection");
                    return;
                }
                continue;
            }
            Some(Err(e)) => e.to_string(),
            None => "stream closed by matcher".to_string(),
        };

        if !may_reconnect {
            let _ = tx
                .send(Err(AgentError::Stream(format!(
                    "disconnected again after reconnect: {}",
                    reason
                ))))
                .await;
            return;
        }
        may_reconnect = false;

        let delay = with_jitter(backoff);
        warn!("Task stream disconnected ({}), reconnecting in {:?}", reason, delay);
        tokio::time::sleep(delay).await;

        match open_stream(transport.as_ref(), &signer, &request).await {
            Ok(stream) => {
                info!("Task stream reconnected for agent {}", request.agent_id);
                current = stream;
            }
            Err(e) => {
                let _ = tx
                    .send(Err(AgentError::Stream(format!("reconnect failed: {}", e))))
                    .await;
                return;
            }
        }
    }
}

/// Backoff plus up to 25% random jitter
fn with_jitter(backoff: Duration) -> Duration {
    let spread = backoff.as_millis() as u64 / 4;
    if spread == 0 {
        return backoff;
    }
    backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
