use std::{ops::AddAssign, sync::Arc};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs,
        FunctionCall, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(ChatRole::Assistant, content)
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(ChatRole::Tool, content)
        }
    }

    pub fn requests_tools(&self) -> bool {
        self.role == ChatRole::Assistant && !self.tool_calls.is_empty()
    }
}

/// Function the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub message: ChatMessage,
    pub usage: TokenUsage,
}

/// The reasoning engine behind the answer step.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generates the next assistant message; `tools` may be empty.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatCompletion, AppError>;
}

pub struct OpenAiChatModel {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

fn to_request_message(message: &ChatMessage) -> Result<ChatCompletionRequestMessage, AppError> {
    let converted = match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessage::from(message.content.clone()).into(),
        ChatRole::User => ChatCompletionRequestUserMessage::from(message.content.clone()).into(),
        ChatRole::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if !message.content.is_empty() {
                args.content(message.content.clone());
            }
            if !message.tool_calls.is_empty() {
                args.tool_calls(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            args.build()?.into()
        }
        ChatRole::Tool => {
            let tool_call_id = message.tool_call_id.clone().ok_or_else(|| {
                AppError::Validation("tool message without a tool call id".into())
            })?;
            ChatCompletionRequestToolMessageArgs::default()
                .content(message.content.clone())
                .tool_call_id(tool_call_id)
                .build()?
                .into()
        }
    };
    Ok(converted)
}

fn to_openai_tool(spec: &ToolSpec) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(spec.parameters.clone()),
            strict: None,
        },
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatCompletion, AppError> {
        let request_messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(request_messages);
        if !tools.is_empty() {
            request.tools(tools.iter().map(to_openai_tool).collect::<Vec<_>>());
        }
        let request = request.build()?;

        let response = self.client.chat().create(request).await?;

        let usage = response
            .usage
            .map(|usage| TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMParsing("No choices in chat completion".into()))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        debug!(
            model = %self.model,
            tool_calls = tool_calls.len(),
            total_tokens = usage.total_tokens,
            "Chat completion received"
        );

        Ok(ChatCompletion {
            message: ChatMessage::assistant_with_tools(
                choice.message.content.unwrap_or_default(),
                tool_calls,
            ),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total += TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        };
        assert_eq!(
            total,
            TokenUsage {
                prompt_tokens: 11,
                completion_tokens: 7,
                total_tokens: 18,
            }
        );
    }

    #[test]
    fn tool_messages_need_a_call_id() {
        let mut message = ChatMessage::tool("call-1", "42");
        assert!(to_request_message(&message).is_ok());

        message.tool_call_id = None;
        assert!(matches!(
            to_request_message(&message),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn assistant_messages_carry_tool_calls() {
        let message = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call-1".into(),
                name: "retrieve".into(),
                arguments: r#"{"query":"revenue"}"#.into(),
            }],
        );
        assert!(message.requests_tools());

        let converted = to_request_message(&message).unwrap();
        let ChatCompletionRequestMessage::Assistant(assistant) = converted else {
            panic!("expected an assistant message");
        };
        let calls = assistant.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "retrieve");
        assert!(assistant.content.is_none());
    }
}
