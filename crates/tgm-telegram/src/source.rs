use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{AllowedUpdate, UpdateKind},
};

use tgm_core::{
    domain::Entity,
    messaging::{port::MessageSource, types::InboundMessage},
    Result,
};

use crate::convert::{inbound_message, map_err, user_entity};

/// Live message stream over Bot API long polling.
///
/// Updates are acknowledged by advancing `offset` on the next poll, so a
/// batch fetched right before shutdown is delivered again on restart; the
/// dedup store absorbs the repeats.
pub struct TelegramSource {
    bot: Bot,
    poll_timeout: Duration,
    offset: i32,
    pending: VecDeque<InboundMessage>,
}

impl TelegramSource {
    pub fn new(bot: Bot, poll_timeout: Duration) -> Self {
        Self {
            bot,
            poll_timeout,
            offset: 0,
            pending: VecDeque::new(),
        }
    }

    async fn poll(&mut self) -> Result<()> {
        let updates = self
            .bot
            .get_updates()
            .offset(self.offset)
            .timeout(self.poll_timeout.as_secs() as u32)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::ChannelPost])
            .await
            .map_err(map_err)?;

        for update in updates {
            self.offset = self.offset.max(update.id + 1);
            match update.kind {
                UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => {
                    self.pending.push_back(inbound_message(&msg));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSource for TelegramSource {
    async fn connect(&mut self) -> Result<Entity> {
        let me = self.bot.get_me().await.map_err(map_err)?;
        // Long polling and a webhook are mutually exclusive.
        self.bot.delete_webhook().await.map_err(map_err)?;
        tracing::debug!(username = %me.username(), "long polling enabled");
        Ok(user_entity(&me.user))
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Ok(Some(msg));
            }
            self.poll().await?;
        }
    }

    async fn disconnect(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(pending = self.pending.len(), "keeping buffered updates across reconnect");
        }
    }
}
