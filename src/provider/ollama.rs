//! Ollama クライアント
//!
//! # 責務
//!
//! - ローカルの Ollama サーバー（HTTP API）との通信を担当
//! - [`ProviderClient`] トレイトを実装し、統一インターフェースを提供
//! - Ollama 固有のJSON形式と共通型の変換
//!
//! # 使用するエンドポイント
//!
//! - `POST /api/chat` - 非ストリーミングのチャット補完
//! - `GET /api/tags` - 取得済みモデルの一覧
//!
//! # レスポンス形式
//!
//! ```json
//! {
//!   "model": "llama3.1:8b",
//!   "message": { "role": "assistant", "content": "..." },
//!   "done": true,
//!   "done_reason": "stop",
//!   "prompt_eval_count": 26,
//!   "eval_count": 298
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{CompletionRequest, ProviderClient, ProviderResponse, StopReason, TokenUsage};
use crate::error::ProviderError;

/// 既定のホスト
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Ollama HTTP クライアント
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
}

impl OllamaClient {
    /// 指定ホストに接続するクライアントを生成
    ///
    /// 末尾の `/` は取り除かれます。
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `/api/chat` のレスポンス本文をパース
    fn parse_chat_response(&self, body: &str) -> Result<ProviderResponse, ProviderError> {
        let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
            ProviderError::InvalidResponse(format!("chat response parse error: {}: {}", e, body))
        })?;

        if !response.done {
            return Err(ProviderError::InvalidResponse(
                "incomplete response (done = false)".to_string(),
            ));
        }

        Ok(ProviderResponse {
            content: response.message.content,
            token_usage: TokenUsage {
                input_tokens: response.prompt_eval_count.unwrap_or(0),
                output_tokens: response.eval_count.unwrap_or(0),
            },
            stop_reason: StopReason::from_done_reason(response.done_reason.as_deref()),
            model: response.model,
        })
    }

    /// エラーステータスの本文を [`ProviderError`] に分類
    fn classify_error(&self, status: u16, body: &str, model: &str) -> ProviderError {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| body.to_string());

        if status == 404 && message.contains("not found") {
            return ProviderError::ModelNotFound(model.to_string());
        }

        ProviderError::Api { status, message }
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    async fn execute(&self, request: &CompletionRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(model = %request.model, prompt_len = request.prompt.len(), "sending chat request");

        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(self.classify_error(status.as_u16(), &text, &request.model));
        }

        self.parse_chat_response(&text)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        parse_tags_response(&text)
    }
}

/// `/api/tags` のレスポンス本文からモデル名を取り出す
fn parse_tags_response(body: &str) -> Result<Vec<String>, ProviderError> {
    let tags: TagsResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("tags response parse error: {}", e)))?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

// Ollama API 型定義

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}
