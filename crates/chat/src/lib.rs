pub mod openai;
pub mod prompt;

use crate::openai::{ApiErrorBody, ChatError, ChatRequest, ChatResponse};
use reqwest::blocking::Client;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ChatOptions {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub fn chat_completion(request: &ChatRequest, opt: &ChatOptions) -> Result<ChatResponse, ChatError> {
    let url = format!("{}/chat/completions", opt.base_url.trim_end_matches('/'));
    let client = Client::builder()
        .timeout(opt.timeout)
        .build()
        .map_err(|e| ChatError::Transport {
            hint: e.to_string(),
        })?;

    let resp = client
        .post(url)
        .header("Authorization", format!("Bearer {}", opt.api_key))
        .json(request)
        .send()
        .map_err(|e| ChatError::Transport {
            hint: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        let hint = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(b) => b.error.message,
            Err(_) => body,
        };
        return Err(ChatError::Status {
            status: status.as_u16(),
            hint,
        });
    }

    resp.json::<ChatResponse>().map_err(|e| ChatError::Decode {
        hint: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::chat_completion;
    use super::ChatOptions;
    use super::DEFAULT_TIMEOUT;
    use crate::openai::{ChatChoice, ChatError, ChatMessage, ChatRequest, ChatResponse};
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn options(server: &MockServer) -> ChatOptions {
        ChatOptions {
            base_url: server.url(""),
            api_key: "fake-key".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::for_rows("mock-model".to_string(), "mock prompt".to_string(), 100, 0.0)
    }

    #[test]
    fn test_chat_completion_successful() {
        let server = MockServer::start();
        let resp = ChatResponse {
            choices: vec![ChatChoice {
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: r#"[{"id": 1}]"#.to_string(),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("Authorization", "Bearer fake-key")
                .json_body_partial(r#"{"model": "mock-model", "max_tokens": 100}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(serde_json::to_string(&resp).unwrap());
        });

        let real_resp = chat_completion(&request(), &options(&server));
        mock.assert();
        let content = real_resp.unwrap().try_pop_content().unwrap();
        assert_eq!(content, r#"[{"id": 1}]"#);
    }

    #[test]
    fn test_chat_completion_trailing_slash_base_url() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices": []}"#);
        });

        let mut opt = options(&server);
        opt.base_url.push('/');
        let real_resp = chat_completion(&request(), &opt);
        mock.assert();
        assert!(matches!(
            real_resp.unwrap().try_pop_content(),
            Err(ChatError::NoChoices)
        ));
    }

    #[test]
    fn test_chat_completion_api_error_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401)
                .header("content-type", "application/json")
                .body(r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#);
        });

        match chat_completion(&request(), &options(&server)) {
            Err(ChatError::Status { status, hint }) => {
                assert_eq!(status, 401);
                assert_eq!(hint, "Incorrect API key provided");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_chat_completion_bad_gateway() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(502)
                .header("content-type", "text/html; charset=UTF-8")
                .body("502 Bad Gateway");
        });

        match chat_completion(&request(), &options(&server)) {
            Err(ChatError::Status { status, hint }) => {
                assert_eq!(status, 502);
                assert_eq!(hint, "502 Bad Gateway");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_chat_completion_undecodable_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).body("not json at all");
        });

        let real_resp = chat_completion(&request(), &options(&server));
        assert!(matches!(real_resp, Err(ChatError::Decode { .. })));
    }

    #[test]
    fn test_chat_completion_unreachable_server() {
        let opt = ChatOptions {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "fake-key".to_string(),
            timeout: DEFAULT_TIMEOUT,
        };
        let real_resp = chat_completion(&request(), &opt);
        assert!(matches!(real_resp, Err(ChatError::Transport { .. })));
    }
}
