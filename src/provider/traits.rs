//! 推論サービスの共通インターフェース定義
//!
//! # 責務
//!
//! - 推論サービスクライアントの共通トレイト [`ProviderClient`] を定義
//! - サービス非依存のリクエスト型 [`CompletionRequest`] とレスポンス型 [`ProviderResponse`] を提供
//! - トークン使用量 [`TokenUsage`] と停止理由 [`StopReason`] の型を定義
//!
//! ワークフローエンジンはこのトレイトを直接は使いません。
//! エージェントアダプター（[`crate::agent::llm::LlmAgent`]）が内部で利用します。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use local_agents::provider::{CompletionRequest, ProviderClient};
//!
//! async fn example(client: Box<dyn ProviderClient>) {
//!     let request = CompletionRequest::new("llama3.1:8b", "You are a helpful assistant.", "Hello!");
//!     let response = client.execute(&request).await.unwrap();
//!
//!     println!("Response: {}", response.content);
//!     println!("Tokens: {} in, {} out",
//!         response.token_usage.input_tokens,
//!         response.token_usage.output_tokens
//!     );
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// 推論サービスの共通インターフェース
///
/// # 実装要件
///
/// - `Send + Sync`: ステップ実行器が別タスクから呼び出すため
/// - 非同期実行対応（`async_trait`を使用）
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// プロンプトを実行し、レスポンスを取得する
    ///
    /// # エラー
    ///
    /// - [`ProviderError::Connection`] - サービスに接続できない
    /// - [`ProviderError::ModelNotFound`] - モデル未取得
    /// - [`ProviderError::Api`] - サービスがエラーを返した
    /// - [`ProviderError::InvalidResponse`] - 不正なレスポンス
    async fn execute(&self, request: &CompletionRequest) -> Result<ProviderResponse, ProviderError>;

    /// 利用可能なモデル名の一覧を取得する
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}

/// 推論リクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// モデル名（例: "llama3.1:8b"）
    pub model: String,

    /// システムプロンプト（エージェントの役割・目標）
    pub system_prompt: String,

    /// ユーザープロンプト
    pub prompt: String,

    /// サンプリング温度
    pub temperature: f32,

    /// 生成トークン数の上限
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// 既定のサンプリング設定でリクエストを生成
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// 推論サービスからのレスポンス
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// 生成されたテキスト
    pub content: String,

    /// トークン使用量
    pub token_usage: TokenUsage,

    /// 生成停止理由
    pub stop_reason: StopReason,

    /// 使用されたモデル名
    pub model: String,
}

/// トークン使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// 入力トークン数（プロンプト）
    pub input_tokens: u32,

    /// 出力トークン数（生成テキスト）
    pub output_tokens: u32,
}

impl TokenUsage {
    /// 総トークン数を計算
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

impl std::iter::Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), |acc, usage| acc + usage)
    }
}

/// 生成停止理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 自然な終了
    EndTurn,

    /// 最大トークン数到達
    MaxTokens,

    /// 不明な理由
    Unknown,
}

impl StopReason {
    /// Ollama の `done_reason` から変換
    pub fn from_done_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => StopReason::EndTurn,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::Unknown,
        }
    }
}
