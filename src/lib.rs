//! ローカル推論サービス上で複数のエージェントを連鎖実行するワークフローエンジン
//!
//! - [`config`][]: 設定ファイル、ワークフロー定義、組み込みワークフロー
//! - [`engine`][]: 依存関係の解決、ステップ実行、結果の集計
//! - [`agent`][]: エンジンから呼び出されるエージェントアダプター
//! - [`provider`][]: 推論サービスのクライアント
//! - [`report`][]: 実行結果のファイル出力

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod provider;
pub mod report;
