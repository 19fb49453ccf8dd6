//! エージェントアダプターの共通インターフェース
//!
//! ワークフローエンジンはこのモジュールの型だけを通してエージェントを呼び出します。
//! 推論サービスか外部コマンドかといった実装の違いはアダプターの内側に閉じます。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AgentKind;
use crate::error::AgentError;
use crate::provider::TokenUsage;

/// ステップ単位の実行設定
#[derive(Debug, Clone, PartialEq)]
pub struct StepConfig {
    /// ステップで上書きされたモデル（`None` ならアダプターの既定）
    pub model: Option<String>,
    /// このステップに適用されるタイムアウト
    pub timeout: Duration,
}

/// アダプターへの入力
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// ワークフロー全体のタスク
    pub task: String,
    pub step_id: String,
    pub agent: AgentKind,
    pub description: String,
    /// コンテキストのビュー（エイリアス適用済み）
    pub context: BTreeMap<String, Value>,
    /// ステップが明示的に参照するキー（宣言された入力とエイリアス）
    pub focus_keys: Vec<String>,
    pub config: StepConfig,
}

impl AgentInput {
    /// 文字列として取得できるコンテキスト値
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

/// アダプターの出力
///
/// `success == false` の場合、ステップは `error` のメッセージで失敗として記録されます。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub success: bool,
    /// 主出力（`<step_id>_output` としてコンテキストに格納される）
    pub output: String,
    /// 追加の成果物（`_` で始まるキーはコンテキストに取り込まれない）
    pub artifacts: BTreeMap<String, Value>,
    pub error: Option<String>,
    pub token_usage: TokenUsage,
}

impl AgentOutput {
    /// 成功した出力
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Default::default()
        }
    }

    /// 失敗した出力
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.artifacts.insert(key.into(), value.into());
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = usage;
        self
    }
}

/// エージェントアダプター
///
/// 実装は `Send + Sync` であり、ステップ実行器から別タスクで呼び出されます。
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// ログ表示用の名前
    fn name(&self) -> &str;

    /// ステップを1回実行する
    async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError>;
}
