use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ChatMessage, ChatRole, InlineImage};

/// Most recent session messages forwarded to the model per turn.
pub const MAX_HISTORY_TURNS: usize = 20;

pub type ChatModelFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatReply, LlmGatewayError>> + Send + 'a>>;

pub type ChatDeltaStream = Pin<Box<dyn Stream<Item = Result<String, LlmGatewayError>> + Send>>;

pub type ChatStreamFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatDeltaStream, LlmGatewayError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    pub image: Option<InlineImage>,
}

#[derive(Debug, Clone)]
pub struct ChatModelRequest {
    pub system_instruction: String,
    pub turns: Vec<ChatTurn>,
}

impl ChatModelRequest {
    /// Builds a request from stored session history, oldest first.
    ///
    /// Only the last [`MAX_HISTORY_TURNS`] messages are kept. `image`
    /// attaches to the final user turn, which is the message being answered.
    pub fn from_history(
        system_instruction: impl Into<String>,
        history: &[ChatMessage],
        image: Option<InlineImage>,
    ) -> Self {
        let skip = history.len().saturating_sub(MAX_HISTORY_TURNS);
        let mut turns = history
            .iter()
            .skip(skip)
            .filter(|message| !message.content.trim().is_empty())
            .map(|message| ChatTurn {
                role: message.role,
                text: message.content.clone(),
                image: None,
            })
            .collect::<Vec<_>>();

        if let Some(image) = image
            && let Some(last_user) = turns
                .iter_mut()
                .rev()
                .find(|turn| turn.role == ChatRole::User)
        {
            last_user.image = Some(image);
        }

        Self {
            system_instruction: system_instruction.into(),
            turns,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmTokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub model: String,
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Error)]
pub enum LlmGatewayError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
    #[error("llm provider blocked the response: {0}")]
    Blocked(String),
}

impl LlmGatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "llm_timeout",
            Self::ProviderFailure(_) => "llm_unavailable",
            Self::InvalidProviderPayload(_) => "llm_invalid_payload",
            Self::Blocked(_) => "llm_blocked",
        }
    }
}

pub trait ChatModel: Send + Sync {
    fn generate<'a>(&'a self, request: ChatModelRequest) -> ChatModelFuture<'a>;

    /// Streams text deltas for one reply. The stream ends after the final
    /// delta; errors surface as the last item.
    fn stream<'a>(&'a self, request: ChatModelRequest) -> ChatStreamFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::{ChatModelRequest, MAX_HISTORY_TURNS};
    use crate::models::{ChatMessage, ChatRole, InlineImage};

    fn history(len: usize) -> Vec<ChatMessage> {
        (0..len)
            .map(|index| ChatMessage {
                id: format!("m{index}"),
                user_id: "u1".to_string(),
                session_id: "s1".to_string(),
                role: if index % 2 == 0 {
                    ChatRole::User
                } else {
                    ChatRole::Assistant
                },
                content: format!("message {index}"),
                timestamp: "2026-10-18T12:00:00Z".to_string(),
            })
            .collect()
    }

    #[test]
    fn history_is_trimmed_to_most_recent_turns() {
        let request = ChatModelRequest::from_history("system", &history(31), None);
        assert_eq!(request.turns.len(), MAX_HISTORY_TURNS);
        assert_eq!(request.turns[0].text, "message 11");
        assert_eq!(request.turns[MAX_HISTORY_TURNS - 1].text, "message 30");
    }

    #[test]
    fn image_attaches_to_last_user_turn() {
        let image = InlineImage {
            mime_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
        };
        let request = ChatModelRequest::from_history("system", &history(4), Some(image.clone()));
        assert_eq!(request.turns[2].image.as_ref(), Some(&image));
        assert!(request.turns[3].image.is_none());
        assert!(request.turns[0].image.is_none());
    }
}
