//! 設定とワークフロー定義
//!
//! # モジュール構成
//!
//! - [`step`][]: ステップ定義（[`StepSpec`](step::StepSpec)、エージェント種別、実行条件）
//! - [`workflow`][]: ワークフロー定義（TOML 読み書き）
//! - [`catalog`][]: 組み込みワークフローと設定ファイル由来のワークフローの登録簿
//! - [`settings`][]: アプリケーション設定ファイル
//! - `dto`: TOML デシリアライズ用の内部 DTO

mod dto;

pub mod catalog;
pub mod settings;
pub mod step;
pub mod workflow;

// 公開APIの再エクスポート
pub use catalog::WorkflowCatalog;
pub use settings::Settings;
pub use step::{AgentKind, Condition, StepOverrides, StepSpec};
pub use workflow::WorkflowDefinition;
