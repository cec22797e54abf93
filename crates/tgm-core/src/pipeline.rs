//! Delivery pipeline: filter → dedup check → send → record, inside a bounded
//! reconnect loop.
//!
//! Messages are handled one at a time on a single task, so the
//! check-then-record sequence on the dedup store needs no locking.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    dedup::{DedupStore, LoadReport},
    domain::{DestinationId, Entity},
    errors::Error,
    filter::{FilterChain, Rejection, Verdict},
    fingerprint::fingerprint,
    messaging::{
        port::{DestinationSender, MessageSource},
        types::{preview, InboundMessage, OutboundMessage},
    },
    Result,
};

const LOG_PREVIEW_CHARS: usize = 100;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub destination: DestinationId,
    /// Reconnect attempts after a transient failure before giving up.
    pub max_retries: u32,
    /// Wait before reconnect attempt `n` is `retry_base_delay * n`.
    pub retry_base_delay: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Disconnected,
    Connecting,
    Listening,
    Reconnecting { attempt: u32 },
    Stopped,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub forwarded: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub send_failures: u64,
}

/// What happened to a single inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    Rejected(Rejection),
    Duplicate,
    Forwarded,
    SendFailed,
}

enum SessionEnd {
    Cancelled,
    Failed { error: Error, listened: bool },
}

pub struct DeliveryPipeline<S, D> {
    cfg: PipelineConfig,
    filter: FilterChain,
    store: DedupStore,
    source: S,
    sender: D,
    target: Option<Entity>,
    state: PipelineState,
    stats: PipelineStats,
}

impl<S: MessageSource, D: DestinationSender> DeliveryPipeline<S, D> {
    pub fn new(
        cfg: PipelineConfig,
        filter: FilterChain,
        store: DedupStore,
        source: S,
        sender: D,
    ) -> Self {
        Self {
            cfg,
            filter,
            store,
            source,
            sender,
            target: None,
            state: PipelineState::Disconnected,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn store(&self) -> &DedupStore {
        &self.store
    }

    /// Load persisted dedup records. Must run before [`Self::run`].
    pub fn load_store(&mut self) -> LoadReport {
        self.store.load()
    }

    /// Drive the connection until cancelled (`Ok`) or a fatal error (`Err`).
    ///
    /// Transports are disconnected before this returns.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            let (error, listened) = match self.run_session(cancel).await {
                SessionEnd::Cancelled => {
                    self.disconnect().await;
                    self.state = PipelineState::Stopped;
                    tracing::info!("monitoring stopped");
                    return Ok(());
                }
                SessionEnd::Failed { error, listened } => (error, listened),
            };
            self.disconnect().await;

            if listened {
                attempt = 0;
            }

            if !error.is_transient() {
                self.state = PipelineState::Failed;
                tracing::error!(error = %error, "unrecoverable error, giving up");
                return Err(error);
            }

            attempt += 1;
            if attempt > self.cfg.max_retries {
                self.state = PipelineState::Failed;
                tracing::error!(
                    max_retries = self.cfg.max_retries,
                    error = %error,
                    "reconnect attempts exhausted"
                );
                return Err(Error::RetriesExhausted {
                    attempts: self.cfg.max_retries,
                    last: error.to_string(),
                });
            }

            let delay = self.cfg.retry_base_delay * attempt;
            self.state = PipelineState::Reconnecting { attempt };
            tracing::warn!(
                error = %error,
                attempt,
                max_retries = self.cfg.max_retries,
                delay_secs = delay.as_secs_f64(),
                "connection error, reconnecting"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.state = PipelineState::Stopped;
                    tracing::info!("cancelled during reconnect backoff");
                    return Ok(());
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn run_session(&mut self, cancel: &CancellationToken) -> SessionEnd {
        self.state = PipelineState::Connecting;
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            r = self.connect() => r,
        };
        if let Err(error) = connected {
            return SessionEnd::Failed {
                error,
                listened: false,
            };
        }

        self.state = PipelineState::Listening;
        tracing::info!("monitoring started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                r = self.source.next_message() => r,
            };
            match next {
                Ok(Some(msg)) => {
                    self.handle_message(&msg).await;
                }
                Ok(None) => {
                    return SessionEnd::Failed {
                        error: Error::Transient("message stream ended".to_string()),
                        listened: true,
                    }
                }
                Err(error) => {
                    return SessionEnd::Failed {
                        error,
                        listened: true,
                    }
                }
            }
        }
    }

    /// Connect both transports and resolve the destination for this session.
    async fn connect(&mut self) -> Result<()> {
        self.target = None;
        self.filter.set_destination(None);

        let me = self.source.connect().await?;
        tracing::info!(account = %me.display_name(), "message source connected");

        let bot = self.sender.connect().await?;
        tracing::info!(account = %bot.display_name(), "sender connected");

        let target = self
            .sender
            .resolve(&self.cfg.destination)
            .await
            .map_err(as_destination_error)?;
        tracing::info!(
            destination = %self.cfg.destination,
            name = %target.display_name(),
            "destination resolved"
        );

        self.filter.set_destination(Some(target.id()));
        self.target = Some(target);
        Ok(())
    }

    /// Run one message through the filter, the dedup check and the send.
    pub async fn handle_message(&mut self, msg: &InboundMessage) -> MessageOutcome {
        self.stats.received += 1;

        if let Verdict::Rejected(reason) =
            self.filter.should_consider(msg.chat_id(), msg.text.as_deref())
        {
            if let Rejection::Excluded(keyword) = &reason {
                tracing::info!(keyword = %keyword, "exclude keyword matched, skipping");
            } else {
                tracing::trace!(?reason, chat = msg.chat_id().0, "not a candidate");
            }
            self.stats.rejected += 1;
            return MessageOutcome::Rejected(reason);
        }

        let text = msg.text.as_deref().unwrap_or_default();
        let key = fingerprint(text);
        if self.store.contains(&key) {
            tracing::info!(hash = key.short(), "duplicate content, skipping");
            self.stats.duplicates += 1;
            return MessageOutcome::Duplicate;
        }

        let sender_name = msg
            .sender
            .as_ref()
            .map(Entity::display_name)
            .unwrap_or_else(|| "unknown".to_string());
        tracing::info!(
            chat = %msg.chat.display_name(),
            sender = %sender_name,
            text = %preview(text, LOG_PREVIEW_CHARS),
            "keyword detected"
        );

        let Some(target) = self.target.as_ref() else {
            tracing::error!("destination not resolved; message not forwarded");
            self.stats.send_failures += 1;
            return MessageOutcome::SendFailed;
        };

        let out = OutboundMessage::from_inbound(msg, text);
        match self.sender.send(target, &out).await {
            Ok(()) => {
                tracing::info!(
                    hash = key.short(),
                    media = out.copy_of.is_some(),
                    destination = %self.cfg.destination,
                    "message forwarded"
                );
                self.store.record(key);
                self.stats.forwarded += 1;
                MessageOutcome::Forwarded
            }
            Err(e) => {
                tracing::warn!(
                    hash = key.short(),
                    error = %e,
                    "forward failed; content stays eligible"
                );
                self.stats.send_failures += 1;
                MessageOutcome::SendFailed
            }
        }
    }

    /// Disconnect both transports. Idempotent.
    pub async fn disconnect(&mut self) {
        self.source.disconnect().await;
        self.sender.disconnect().await;
        self.target = None;
        if matches!(
            self.state,
            PipelineState::Connecting | PipelineState::Listening
        ) {
            self.state = PipelineState::Disconnected;
        }
    }

    /// Persist the dedup store, logging instead of failing.
    pub fn flush_store(&self) {
        match self.store.persist() {
            Ok(()) => tracing::debug!(records = self.store.len(), "dedup store flushed"),
            Err(e) => tracing::warn!(error = %e, "failed to flush dedup store"),
        }
    }
}

/// Resolution failures are fatal unless the network was at fault.
fn as_destination_error(e: Error) -> Error {
    match e {
        Error::Transient(_) | Error::Auth(_) | Error::Destination(_) => e,
        other => Error::Destination(other.to_string()),
    }
}
