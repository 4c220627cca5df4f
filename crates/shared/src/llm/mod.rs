pub mod gateway;
pub mod gemini;
pub mod prompts;

pub use gateway::{
    ChatDeltaStream, ChatModel, ChatModelFuture, ChatModelRequest, ChatReply, ChatStreamFuture,
    ChatTurn, LlmGatewayError, LlmTokenUsage, MAX_HISTORY_TURNS,
};
pub use gemini::{GeminiGateway, GeminiGatewayConfig, GeminiGenerationConfig, GeminiModelRoute};
pub use prompts::{PREGNANCY_ASSISTANT_INSTRUCTION, assistant_instruction};
