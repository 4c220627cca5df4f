use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use shared::llm::{
    ChatDeltaStream, ChatModel, ChatModelFuture, ChatModelRequest, ChatReply, ChatStreamFuture,
    LlmGatewayError,
};

const DEFAULT_REPLY: &str = "Drink water regularly and rest when you can.";

#[derive(Debug)]
pub enum ScriptedReply {
    Text(String),
    Fail(LlmGatewayError),
    /// Streams the first delta, then fails.
    BreakMidStream(String),
}

/// Chat model answering from a queue of scripted replies. Every request is
/// recorded so tests can inspect the history that reached the model.
#[derive(Clone, Default)]
pub struct ScriptedChatModel {
    replies: Arc<Mutex<VecDeque<ScriptedReply>>>,
    requests: Arc<Mutex<Vec<ChatModelRequest>>>,
}

impl ScriptedChatModel {
    pub fn push_reply(&self, text: &str) {
        self.push(ScriptedReply::Text(text.to_string()));
    }

    pub fn push_failure(&self, err: LlmGatewayError) {
        self.push(ScriptedReply::Fail(err));
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .expect("reply queue lock")
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<ChatModelRequest> {
        self.requests.lock().expect("request log lock").clone()
    }

    fn next_reply(&self, request: ChatModelRequest) -> ScriptedReply {
        self.requests.lock().expect("request log lock").push(request);
        self.replies
            .lock()
            .expect("reply queue lock")
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::Text(DEFAULT_REPLY.to_string()))
    }
}

impl ChatModel for ScriptedChatModel {
    fn generate<'a>(&'a self, request: ChatModelRequest) -> ChatModelFuture<'a> {
        let reply = self.next_reply(request);
        Box::pin(async move {
            match reply {
                ScriptedReply::Text(text) => Ok(ChatReply {
                    model: "scripted".to_string(),
                    text,
                    finish_reason: Some("STOP".to_string()),
                    usage: None,
                }),
                ScriptedReply::Fail(err) => Err(err),
                ScriptedReply::BreakMidStream(_) => Err(LlmGatewayError::ProviderFailure(
                    "scripted stream break".to_string(),
                )),
            }
        })
    }

    fn stream<'a>(&'a self, request: ChatModelRequest) -> ChatStreamFuture<'a> {
        let reply = self.next_reply(request);
        Box::pin(async move {
            let items: Vec<Result<String, LlmGatewayError>> = match reply {
                ScriptedReply::Fail(err) => return Err(err),
                ScriptedReply::Text(text) => text
                    .split_inclusive(' ')
                    .map(|delta| Ok(delta.to_string()))
                    .collect(),
                ScriptedReply::BreakMidStream(first) => vec![
                    Ok(first),
                    Err(LlmGatewayError::ProviderFailure(
                        "connection reset".to_string(),
                    )),
                ],
            };
            let stream: ChatDeltaStream = Box::pin(futures_util::stream::iter(items));
            Ok(stream)
        })
    }
}
