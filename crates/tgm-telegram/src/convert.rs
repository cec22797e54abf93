//! Mapping between teloxide types and core domain types.

use teloxide::{
    types::{Chat, Message, Recipient, User},
    ApiError, RequestError,
};

use tgm_core::{
    domain::{ChatId, DestinationId, Entity, MessageId},
    errors::Error,
    messaging::types::InboundMessage,
};

pub(crate) fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

pub(crate) fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(message_id.0)
}

pub(crate) fn recipient(destination: &DestinationId) -> Recipient {
    match destination {
        DestinationId::Id(id) => Recipient::Id(tg_chat(*id)),
        DestinationId::Username(name) => Recipient::ChannelUsername(format!("@{name}")),
    }
}

pub(crate) fn chat_entity(chat: &Chat) -> Entity {
    let id = ChatId(chat.id.0);
    let title = chat.title().map(str::to_string);
    let username = chat.username().map(str::to_string);

    if chat.is_channel() {
        Entity::Channel { id, title, username }
    } else if chat.is_private() {
        Entity::User {
            id,
            first_name: chat.first_name().map(str::to_string),
            last_name: chat.last_name().map(str::to_string),
            username,
        }
    } else {
        Entity::Group { id, title, username }
    }
}

pub(crate) fn user_entity(user: &User) -> Entity {
    Entity::User {
        id: ChatId(user.id.0 as i64),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    }
}

/// Convert a message or channel post. Captions stand in for text on media.
pub(crate) fn inbound_message(msg: &Message) -> InboundMessage {
    let text = msg.text().or_else(|| msg.caption()).map(str::to_string);
    let sender = msg
        .from()
        .map(user_entity)
        .or_else(|| msg.sender_chat().map(chat_entity));

    InboundMessage {
        chat: chat_entity(&msg.chat),
        message_id: MessageId(msg.id.0),
        text,
        sender,
        has_media: msg.text().is_none(),
    }
}

/// Classify a Bot API failure for the reconnect state machine.
pub(crate) fn map_err(e: RequestError) -> Error {
    match e {
        RequestError::Api(ApiError::NotFound) => {
            Error::Auth("telegram rejected the bot token".to_string())
        }
        RequestError::Api(api) => Error::External(format!("telegram api error: {api}")),
        RequestError::MigrateToChatId(id) => {
            Error::Destination(format!("chat was migrated to supergroup {id}"))
        }
        RequestError::RetryAfter(_)
        | RequestError::Network(_)
        | RequestError::Io(_)
        | RequestError::InvalidJson { .. } => Error::Transient(format!("telegram: {e}")),
        #[allow(unreachable_patterns)]
        other => Error::External(format!("telegram error: {other}")),
    }
}
