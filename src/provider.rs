//! 推論サービス抽象化レイヤー
//!
//! # 責務
//!
//! - ローカル推論サービスを統一的に扱うインターフェースを提供
//! - 設定に応じたクライアントを生成するファクトリー機能
//!
//! # アーキテクチャ
//!
//! ワークフローエンジンにとって推論サービスは不透明なリクエスト/レスポンス境界です。
//! エンジンが依存するのは [`crate::agent::AgentAdapter`] だけで、
//! このモジュールはアダプターの実装（[`crate::agent::llm::LlmAgent`]）からのみ使われます。
//!
//! # モジュール構成
//!
//! - `traits` - 共通インターフェース（[`ProviderClient`]トレイト等）
//! - `ollama` - Ollama HTTP API クライアント
//!
//! # 使用例
//!
//! ```rust,no_run
//! use local_agents::provider::{create_provider, CompletionRequest};
//! use local_agents::config::settings::Settings;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let client = create_provider(&settings);
//!
//!     let request = CompletionRequest::new(
//!         settings.default_model.as_str(),
//!         "You are a helpful assistant.",
//!         "Explain Rust ownership in one sentence.",
//!     );
//!     let response = client.execute(&request).await?;
//!
//!     println!("Response: {}", response.content);
//!     Ok(())
//! }
//! ```

pub mod ollama;
pub mod traits;

// 公開APIの再エクスポート
pub use traits::{CompletionRequest, ProviderClient, ProviderResponse, StopReason, TokenUsage};

use std::sync::Arc;

use crate::config::settings::Settings;

/// 設定からクライアントを生成するファクトリー関数
///
/// 現在サポートしているのは Ollama のみです。
/// ホストは [`Settings::ollama_host`] から取得します。
pub fn create_provider(settings: &Settings) -> Arc<dyn ProviderClient> {
    Arc::new(ollama::OllamaClient::new(settings.ollama_host.as_str()))
}
