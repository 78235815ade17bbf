//! Per-session I/O task.
//!
//! ```text
//! SessionHandle 1 ─┐
//! SessionHandle 2 ─┼─► mpsc::Sender<Request> ─┐
//! SessionHandle N ─┘                          ├─► I/O task ─► Transport::write
//!        Transport events ────────────────────┘      │
//!                                                     └─► MessageFramer ─► NotificationDispatcher
//! ```
//!
//! The task is the only owner of the transport and the framer. It is also
//! the only place that moves a live session between `Ready`, `Degraded` and
//! `Closed`; handles only ever force `Closed` after the task is gone.
//!
//! A write, once started, is never cancelled: dropping it partway would leave
//! a line fragment on the wire for the next command to be appended to. Callers
//! bound their own wait; a request whose caller already gave up is skipped.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::state::StateCell;
use super::SessionState;
use crate::config::KeepAliveConfig;
use crate::dispatch::NotificationDispatcher;
use crate::error::{LinkError, Result};
use crate::protocol::{Command, MessageFramer};
use crate::transport::{CloseReason, Transport, TransportEvent, TransportEvents};

/// Work handed to the I/O task.
pub(crate) enum Request {
    /// Write one encoded line.
    Write {
        line: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the transport and stop.
    Shutdown { reply: oneshot::Sender<()> },
}

pub(crate) struct SessionTask<T: Transport> {
    pub transport: T,
    pub events: TransportEvents,
    pub requests: mpsc::Receiver<Request>,
    pub framer: MessageFramer,
    pub state: StateCell,
    pub dispatcher: NotificationDispatcher,
    pub send_timeout: Duration,
    pub keepalive: Option<KeepAliveConfig>,
    pub peer: Arc<str>,
}

impl<T: Transport> SessionTask<T> {
    pub async fn run(mut self) {
        // Reaches `Closed` even if the task panics or is aborted.
        let _closing = CloseOnExit(self.state.clone());
        let mut seq: u64 = 0;
        let mut last_heard = Instant::now();
        let mut ticker = self.keepalive.as_ref().map(|k| {
            let mut interval = tokio::time::interval_at(Instant::now() + k.interval, k.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let reason = loop {
            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(TransportEvent::Data(bytes)) => {
                        last_heard = Instant::now();
                        self.on_data(&bytes);
                    }
                    Some(TransportEvent::Closed(reason)) => break reason,
                    None => break CloseReason::Error("event stream ended".to_string()),
                },

                request = self.requests.recv() => match request {
                    Some(Request::Write { line, reply }) => {
                        seq += 1;
                        if reply.is_closed() {
                            tracing::debug!(seq, "caller gave up, line not sent");
                        } else {
                            let result = self.write_line(seq, &line).await;
                            let _ = reply.send(result);
                        }
                    }
                    Some(Request::Shutdown { reply }) => {
                        self.finish(CloseReason::Local).await;
                        let _ = reply.send(());
                        return;
                    }
                    None => break CloseReason::Local,
                },

                _ = tick(&mut ticker) => {
                    seq += 1;
                    self.check_liveness(seq, last_heard).await;
                }
            }
        };

        self.finish(reason).await;
    }

    fn on_data(&mut self, bytes: &[u8]) {
        for message in self.framer.feed(bytes) {
            tracing::debug!(text = %message.text, "message received");
            self.dispatcher.dispatch(&message);
        }
        // Already logged by the framer.
        self.framer.take_warnings();
    }

    async fn write_line(&mut self, seq: u64, line: &[u8]) -> Result<()> {
        let state = self.state.get();
        if state != SessionState::Ready {
            return Err(LinkError::NotConnected {
                peer: self.peer.to_string(),
                state,
            });
        }

        tracing::debug!(seq, line = %String::from_utf8_lossy(line).trim_end(), "sending");
        let write = self.transport.write(line);
        tokio::pin!(write);
        let slow = tokio::time::sleep(self.send_timeout);
        tokio::pin!(slow);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut write => break result,
                _ = &mut slow, if !slow.is_elapsed() => {
                    tracing::warn!(seq, timeout = ?self.send_timeout, "write still pending");
                }
            }
        };

        if let Err(e) = &result {
            tracing::warn!(seq, "write failed: {e}");
            self.state.degrade();
        }
        result
    }

    async fn check_liveness(&mut self, seq: u64, last_heard: Instant) {
        let Some(keepalive) = self.keepalive.clone() else {
            return;
        };
        if self.state.get() != SessionState::Ready {
            return;
        }

        let silent = last_heard.elapsed();
        if silent >= keepalive.idle_timeout {
            tracing::warn!(silent = ?silent, "peer unresponsive");
            self.state.degrade();
        } else if keepalive.probe && silent >= keepalive.interval {
            let probe = format!("{}\n", Command::StatusQuery);
            // Failures degrade inside write_line.
            let _ = self.write_line(seq, probe.as_bytes()).await;
        }
    }

    async fn finish(&mut self, reason: CloseReason) {
        tracing::info!(reason = %reason, "session ending");
        self.transport.close().await;
        self.state.close();
    }
}

struct CloseOnExit(StateCell);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
