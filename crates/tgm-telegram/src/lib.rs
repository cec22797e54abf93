//! Telegram adapter (teloxide).
//!
//! Implements the `tgm-core` source and sender ports over the Bot API.

use std::time::Duration;

use teloxide::Bot;

use tgm_core::{errors::Error, Result};

mod convert;
mod sender;
mod source;

pub use sender::TelegramSender;
pub use source::TelegramSource;

/// Build a bot whose HTTP timeout outlasts a long poll of `poll_timeout`.
pub fn build_bot(token: &str, poll_timeout: Duration) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(poll_timeout + Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;
    Ok(Bot::with_client(token, client))
}
