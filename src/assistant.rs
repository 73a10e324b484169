//! The natural-language assistant consulted for unknown commands.
//!
//! The production client posts an OpenAI-style chat-completions request and
//! expects a one-paragraph answer ending in "To install it, run: <command>".
//! [`MockAssistant`] answers from a fixed table so the shell works offline.

use crate::config::Config;
use crate::error::AegisError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are an assistant inside a developer CLI shell. \
A user typed a command that is not installed. Explain briefly what it might be. \
Respond in exactly this format:\n\n\
Based on analysis, '<command>' might be a CLI tool used for XYZ. \
To install it, run: <installation command>\n\n\
Use one of these installers: pip, npm, apt, brew, winget, choco. \
Do not add anything else; answer with a single clean paragraph.";

/// What the assistant said about a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub explanation: String,
    /// The text after "run:", if the explanation contained one.
    pub install_command: Option<String>,
}

impl AssistantReply {
    pub fn from_explanation(explanation: impl Into<String>) -> Self {
        let explanation = explanation.into().trim().to_string();
        let install_command = extract_install_command(&explanation);
        Self {
            explanation,
            install_command,
        }
    }
}

/// Finds "run:" (any case) and returns the rest of that line, without
/// surrounding backticks or a trailing period.
pub fn extract_install_command(text: &str) -> Option<String> {
    let start = text.to_ascii_lowercase().find("run:")? + "run:".len();
    let rest = text[start..].lines().next().unwrap_or_default();
    let command = rest
        .trim()
        .trim_matches('`')
        .trim()
        .trim_end_matches('.')
        .trim_matches('`')
        .trim();
    (!command.is_empty()).then(|| command.to_string())
}

#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn explain(&self, command: &str) -> Result<AssistantReply, AegisError>;
}

/// Builds the assistant the configuration asks for.
pub fn from_config(config: &Config) -> Box<dyn AssistantClient> {
    if config.is_mock_mode() {
        info!("Using mock assistant");
        return Box::new(MockAssistant::new());
    }
    Box::new(ChatAssistant::new(
        Box::new(ReqwestHttpClient::new()),
        config.get_api_key().map(str::to_string),
        config.assistant_url.clone(),
        config.assistant_model.clone(),
    ))
}

// =============================================================================
// Chat-completions client
// =============================================================================

pub struct ChatAssistant {
    http: Box<dyn HttpClient>,
    api_key: Option<String>,
    url: String,
    model: String,
}

impl ChatAssistant {
    pub fn new(
        http: Box<dyn HttpClient>,
        api_key: Option<String>,
        url: String,
        model: String,
    ) -> Self {
        Self {
            http,
            api_key,
            url,
            model,
        }
    }

    fn payload(&self, command: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("The user typed: '{}'", command) }
            ]
        })
    }
}

#[async_trait]
impl AssistantClient for ChatAssistant {
    async fn explain(&self, command: &str) -> Result<AssistantReply, AegisError> {
        let Some(api_key) = &self.api_key else {
            return Err(AegisError::AssistantUnavailable(
                "no API key configured (run `aegis --set-api-key <key>` or set AEGIS_API_KEY)"
                    .to_string(),
            ));
        };

        info!("Asking assistant about '{}' via {}", command, self.model);
        let authorization = format!("Bearer {}", api_key);
        let headers = [
            ("Authorization", authorization.as_str()),
            ("Content-Type", "application/json"),
        ];
        let response = self
            .http
            .post_json(&self.url, &headers, &self.payload(command))
            .await
            .map_err(|e| AegisError::AssistantUnavailable(e.to_string()))?;

        if !response.is_success() {
            warn!("Assistant returned HTTP {}", response.status);
            return Err(AegisError::AssistantUnavailable(format!(
                "HTTP {}",
                response.status
            )));
        }
        debug!("Assistant response: {}", response.body);

        let value: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| AegisError::AssistantUnavailable(format!("unreadable response: {}", e)))?;
        let content = value
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                AegisError::AssistantUnavailable("response had no message content".to_string())
            })?;
        Ok(AssistantReply::from_explanation(content))
    }
}

// =============================================================================
// Mock assistant
// =============================================================================

/// Offline assistant with canned answers.
pub struct MockAssistant;

impl MockAssistant {
    pub fn new() -> Self {
        Self
    }

    pub fn mock_explain(&self, command: &str) -> AssistantReply {
        let base = command.split_whitespace().next().unwrap_or(command);
        let explanation = match base {
            "rg" => "Based on analysis, 'rg' might be ripgrep, a fast recursive search tool. \
                     To install it, run: brew install ripgrep"
                .to_string(),
            "http" => "Based on analysis, 'http' might be HTTPie, a friendly HTTP client. \
                       To install it, run: pip install httpie"
                .to_string(),
            "jq" => "Based on analysis, 'jq' might be a command-line JSON processor. \
                     To install it, run: apt install jq"
                .to_string(),
            "tldr" => "Based on analysis, 'tldr' might be a client for simplified man pages. \
                       To install it, run: `npm install -g tldr`."
                .to_string(),
            "xyzzy" => "Based on analysis, 'xyzzy' is not a known CLI tool.".to_string(),
            _ => format!(
                "Based on analysis, '{}' might be a CLI tool. To install it, run: pip install {}",
                base, base
            ),
        };
        AssistantReply::from_explanation(explanation)
    }
}

impl Default for MockAssistant {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssistantClient for MockAssistant {
    async fn explain(&self, command: &str) -> Result<AssistantReply, AegisError> {
        Ok(self.mock_explain(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpResponse;
    use crate::installers::{InstallTarget, parse_install_command};
    use std::sync::{Arc, Mutex};

    type Requests = Arc<Mutex<Vec<(String, Vec<(String, String)>, serde_json::Value)>>>;

    /// Mock HTTP client returning a fixed response and recording requests.
    struct MockHttpClient {
        response: HttpResponse,
        requests: Requests,
    }

    impl MockHttpClient {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: HttpResponse {
                    status,
                    body: body.to_string(),
                },
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &serde_json::Value,
        ) -> anyhow::Result<HttpResponse> {
            self.requests.lock().unwrap().push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body.clone(),
            ));
            Ok(self.response.clone())
        }
    }

    struct FailingHttpClient;

    #[async_trait]
    impl HttpClient for FailingHttpClient {
        async fn post_json(
            &self,
            _url: &str,
            _headers: &[(&str, &str)],
            _body: &serde_json::Value,
        ) -> anyhow::Result<HttpResponse> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn chat(http: Box<dyn HttpClient>, key: Option<&str>) -> ChatAssistant {
        ChatAssistant::new(
            http,
            key.map(str::to_string),
            "https://assistant.test/v1/chat/completions".to_string(),
            "test-model".to_string(),
        )
    }

    fn completion(content: &str) -> String {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
            .to_string()
    }

    #[test]
    fn test_extract_install_command() {
        assert_eq!(
            extract_install_command("It is a tool. To install it, run: pip install zork-cli"),
            Some("pip install zork-cli".to_string())
        );
        assert_eq!(
            extract_install_command("RUN: `brew install ripgrep`.\nEnjoy!"),
            Some("brew install ripgrep".to_string())
        );
        assert_eq!(extract_install_command("No idea what this is."), None);
        assert_eq!(extract_install_command("To install it, run:   "), None);
    }

    #[tokio::test]
    async fn test_chat_assistant_sends_bearer_request() {
        let http = MockHttpClient::new(
            200,
            &completion("Based on analysis, 'zork' might be a game. To install it, run: pip install zork-cli"),
        );
        let requests = http.requests.clone();

        let assistant = chat(Box::new(http), Some("sk-test"));
        let reply = assistant.explain("zork").await.unwrap();

        assert_eq!(reply.install_command.as_deref(), Some("pip install zork-cli"));
        assert_eq!(
            parse_install_command(reply.install_command.as_deref().unwrap()).unwrap(),
            InstallTarget::new("pip", "zork-cli")
        );

        let requests = requests.lock().unwrap();
        let (url, headers, body) = &requests[0];
        assert_eq!(url, "https://assistant.test/v1/chat/completions");
        assert!(headers.contains(&("Authorization".to_string(), "Bearer sk-test".to_string())));
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][1]["content"], "The user typed: 'zork'");
    }

    #[tokio::test]
    async fn test_chat_assistant_without_key_is_unavailable() {
        let assistant = chat(Box::new(MockHttpClient::new(200, "{}")), None);
        let err = assistant.explain("zork").await.unwrap_err();
        assert!(matches!(err, AegisError::AssistantUnavailable(msg) if msg.contains("API key")));
    }

    #[tokio::test]
    async fn test_chat_assistant_http_error_is_unavailable() {
        let assistant = chat(Box::new(MockHttpClient::new(401, "unauthorized")), Some("bad"));
        let err = assistant.explain("zork").await.unwrap_err();
        assert_eq!(err.to_string(), "assistant unavailable: HTTP 401");
    }

    #[tokio::test]
    async fn test_chat_assistant_transport_error_is_unavailable() {
        let assistant = chat(Box::new(FailingHttpClient), Some("sk-test"));
        let err = assistant.explain("zork").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_chat_assistant_unexpected_body() {
        let assistant = chat(
            Box::new(MockHttpClient::new(200, r#"{"choices": []}"#)),
            Some("sk-test"),
        );
        let err = assistant.explain("zork").await.unwrap_err();
        assert!(matches!(err, AegisError::AssistantUnavailable(_)));

        let assistant = chat(
            Box::new(MockHttpClient::new(200, "<html>bad gateway</html>")),
            Some("sk-test"),
        );
        assert!(matches!(
            assistant.explain("zork").await.unwrap_err(),
            AegisError::AssistantUnavailable(msg) if msg.starts_with("unreadable response")
        ));
    }

    #[tokio::test]
    async fn test_mock_assistant_answers() {
        let mock = MockAssistant::new();

        let reply = mock.explain("rg --files").await.unwrap();
        assert_eq!(reply.install_command.as_deref(), Some("brew install ripgrep"));

        let reply = mock.explain("tldr").await.unwrap();
        assert_eq!(reply.install_command.as_deref(), Some("npm install -g tldr"));

        let reply = mock.explain("xyzzy").await.unwrap();
        assert!(reply.install_command.is_none());

        let reply = mock.explain("zork").await.unwrap();
        assert_eq!(reply.install_command.as_deref(), Some("pip install zork"));
    }

    #[tokio::test]
    async fn test_from_config_respects_mock_mode() {
        let mut config = Config::default();
        config.use_mock = true;

        let reply = from_config(&config).explain("jq").await.unwrap();

        assert_eq!(reply.install_command.as_deref(), Some("apt install jq"));
    }

    #[tokio::test]
    async fn test_from_config_without_key_is_unavailable() {
        let err = from_config(&Config::default()).explain("jq").await.unwrap_err();
        assert!(matches!(err, AegisError::AssistantUnavailable(_)));
    }
}
