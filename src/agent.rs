//! エージェントアダプター
//!
//! # 責務
//!
//! ワークフローの各ステップを実際に処理する「エージェント」を提供します。
//! エンジンから見たエージェントは [`AgentAdapter`] トレイトだけです。
//!
//! # モジュール構成
//!
//! - [`traits`][]: アダプターの入出力型とトレイト
//! - [`llm`][]: 推論サービスを使う組み込みエージェント（plan / code / test / review）
//! - [`command`][]: 外部コマンドを起動するカスタムハンドラー
//! - [`registry`][]: エージェント種別からアダプターへの対応表

pub mod command;
pub mod llm;
pub mod registry;
pub mod traits;

// 公開APIの再エクスポート
pub use registry::AdapterRegistry;
pub use traits::{AgentAdapter, AgentInput, AgentOutput, StepConfig};
