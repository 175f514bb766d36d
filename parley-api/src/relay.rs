//! Stateless peer-to-peer relays: chat, emoji reactions and focus mode

use chrono::Utc;
use parley_sfu::ConnectionId;
use serde_json::{json, Value};

use crate::signaling::protocol::{
    events, ChatMessage, ChatMessageDraft, FocusModeChangeData, ServerMessage,
};

/// Fill in whatever the sender left out
#[must_use]
pub fn complete_chat_message(sender: &ConnectionId, draft: ChatMessageDraft) -> ChatMessage {
    ChatMessage {
        content: draft.content.unwrap_or_default(),
        sender_socket_id: sender.clone(),
        name: draft
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Unknown User".to_string()),
        created_at: Utc::now(),
        message_type: draft
            .message_type
            .filter(|kind| !kind.is_empty())
            .unwrap_or_else(|| "text".to_string()),
        gif_url: draft.gif_url.filter(|url| !url.is_empty()),
        image_url: draft.image_url.filter(|url| !url.is_empty()),
    }
}

pub fn chat_message(sender: &ConnectionId, draft: ChatMessageDraft) -> Result<ServerMessage, serde_json::Error> {
    let message = complete_chat_message(sender, draft);
    Ok(ServerMessage::event(events::NEW_MESSAGE, serde_json::to_value(message)?))
}

/// Reactions are relayed exactly as sent
#[must_use]
pub fn reaction(data: Value) -> ServerMessage {
    ServerMessage::event(events::NEW_REACTION, data)
}

#[must_use]
pub fn focus_mode_changed(sender: &ConnectionId, change: &FocusModeChangeData) -> ServerMessage {
    ServerMessage::event(
        events::PLAYER_FOCUS_MODE_CHANGED,
        json!({
            "playerId": change.player_id,
            "isInFocusMode": change.is_in_focus_mode,
            "socketId": sender,
        }),
    )
}
