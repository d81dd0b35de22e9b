use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Error during chat completion request. hint = {hint}")]
    Transport { hint: String },
    #[error("Chat completion API returned HTTP {status}. hint = {hint}")]
    Status { status: u16, hint: String },
    #[error("Failed to decode chat completion response. hint = {hint}")]
    Decode { hint: String },
    #[error("No choices in chat completion response")]
    NoChoices,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ChatRequest {
    /// Request for the row generator: the fixed system instruction followed
    /// by the user prompt carrying the table schema.
    pub fn for_rows(model: String, user_prompt: String, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage::system(crate::prompt::SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            max_tokens,
            temperature,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

/// Body of a non-2xx reply from an OpenAI-compatible server.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub message: String,
}

impl ChatResponse {
    pub fn try_pop_content(self) -> Result<String, ChatError> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or(ChatError::NoChoices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_for_rows_has_system_and_user_messages() {
        let req = ChatRequest::for_rows("gpt-4o".to_string(), "ten cities".to_string(), 500, 0.2);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 500);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "ten cities");
        let keys = json.as_object().unwrap().keys().collect::<Vec<_>>();
        assert_eq!(keys, ["model", "messages", "max_tokens", "temperature"]);
    }

    #[test]
    fn test_try_pop_content_trims() {
        let resp: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  [1]\n"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.try_pop_content().unwrap(), "[1]");
    }

    #[test]
    fn test_try_pop_content_no_choices() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(resp.try_pop_content(), Err(ChatError::NoChoices)));
    }
}
