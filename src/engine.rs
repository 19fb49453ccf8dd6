//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - 依存関係から実行順序を決め、各ステップを順に実行
//! - ステップ間のコンテキスト受け渡し
//! - タイムアウト、リトライ、失敗方針、キャンセルの制御
//! - 実行結果の集計
//!
//! # モジュール構成
//!
//! - [`resolver`][]: 依存関係の解決（実行順序、循環検出、入力検査）
//! - [`context`][]: ステップ間で共有される実行コンテキスト
//! - [`step`][]: 単一ステップの実行（タイムアウト、リトライ、エラーの正規化）
//! - [`executor`][]: ワークフロー実行エンジン本体
//! - [`aggregator`][]: 実行結果の集計とビュー
//! - [`result`][]: 実行結果型
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use local_agents::agent::AdapterRegistry;
//! use local_agents::config::{AgentKind, Settings, WorkflowDefinition};
//! use local_agents::engine::WorkflowExecutor;
//! use local_agents::provider::create_provider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. ワークフローを定義
//!     let workflow = WorkflowDefinition::linear("chain", [AgentKind::Plan, AgentKind::Code])?;
//!
//!     // 2. 実行器を生成
//!     let settings = Settings::load("local-agents.toml")?;
//!     let registry = AdapterRegistry::from_settings(&settings, create_provider(&settings));
//!     let executor = WorkflowExecutor::new(registry, settings.engine_config());
//!
//!     // 3. ワークフローを実行
//!     let result = executor.run(&workflow, "新しい認証機能を実装してください", BTreeMap::new()).await?;
//!
//!     // 4. 結果を出力
//!     println!("{}", result.summary());
//!     for step in &result.steps {
//!         println!("  {}: {:?}", step.step_id, step.outcome);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod context;
pub mod executor;
pub mod resolver;
pub mod result;
pub mod step;

// 公開APIの再エクスポート
pub use context::{ContextError, ContextSnapshot, ExecutionContext};
pub use executor::{EngineConfig, FailurePolicy, PreparedWorkflow, WorkflowExecutor};
pub use result::{
    RunState, SkipReason, StepError, StepErrorKind, StepOutcome, StepResult, WorkflowResult,
};
pub use step::{StepExecution, StepExecutor};
