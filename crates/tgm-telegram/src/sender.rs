use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::time::sleep;

use tgm_core::{
    domain::{DestinationId, Entity},
    errors::Error,
    messaging::{port::DestinationSender, types::OutboundMessage},
    Result,
};

use crate::convert::{chat_entity, map_err, recipient, tg_chat, tg_msg_id, user_entity};

/// Posts matched messages to the destination chat.
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::warn!(wait = ?d, "flood limited by telegram, waiting");
                    sleep(d).await;
                }
                Err(other) => return Err(map_err(other)),
            }
        }
    }
}

#[async_trait]
impl DestinationSender for TelegramSender {
    async fn connect(&mut self) -> Result<Entity> {
        let me = self.bot.get_me().await.map_err(map_err)?;
        Ok(user_entity(&me.user))
    }

    async fn resolve(&mut self, destination: &DestinationId) -> Result<Entity> {
        let chat = self
            .bot
            .get_chat(recipient(destination))
            .await
            .map_err(|e| match map_err(e) {
                Error::External(msg) => Error::Destination(format!("{destination}: {msg}")),
                other => other,
            })?;
        Ok(chat_entity(&chat))
    }

    async fn send(&mut self, target: &Entity, msg: &OutboundMessage) -> Result<()> {
        let to = tg_chat(target.id());
        match msg.copy_of {
            // Copy keeps the media and its caption without a "forwarded from" header.
            Some(original) => {
                self.with_retry(|| {
                    self.bot.copy_message(
                        to,
                        tg_chat(original.chat_id),
                        tg_msg_id(original.message_id),
                    )
                })
                .await?;
            }
            None => {
                self.with_retry(|| self.bot.send_message(to, msg.text.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {}
}
