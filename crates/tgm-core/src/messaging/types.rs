use crate::domain::{ChatId, Entity, MessageId, MessageRef, UserId};

/// One message observed on the live stream.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat: Entity,
    pub message_id: MessageId,
    /// Message text, or the caption of a media message.
    pub text: Option<String>,
    pub sender: Option<Entity>,
    /// The message carries media (photo, document, ...) in addition to `text`.
    pub has_media: bool,
}

impl InboundMessage {
    pub fn chat_id(&self) -> ChatId {
        self.chat.id()
    }

    pub fn sender_id(&self) -> Option<UserId> {
        self.sender.as_ref().map(|s| UserId(s.id().0))
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id(),
            message_id: self.message_id,
        }
    }
}

/// What the pipeline asks the sender to deliver.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub text: String,
    /// Set when the original has media; adapters may copy it instead of resending text.
    pub copy_of: Option<MessageRef>,
}

impl OutboundMessage {
    pub fn from_inbound(msg: &InboundMessage, text: &str) -> Self {
        Self {
            text: text.to_string(),
            copy_of: msg.has_media.then(|| msg.message_ref()),
        }
    }
}

/// Preview of message text for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
