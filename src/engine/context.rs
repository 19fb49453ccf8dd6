//! ステップ間で共有される実行コンテキスト
//!
//! # 責務
//!
//! - タスクと呼び出し側の初期値でコンテキストを初期化する
//! - ステップごとのビュー（エイリアス適用済み）を作る
//! - 成功したステップの出力を後勝ち（last-writer-wins）で取り込む
//! - 実行終了時のスナップショットを作る
//!
//! コンテキストはフラットな単一の名前空間で、実行中は単調に増えるだけです。
//! 所有者はワークフロー実行器だけで、アダプターにはコピーが渡されます。
//!
//! # 使用例
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use local_agents::engine::context::ExecutionContext;
//! use serde_json::json;
//!
//! let mut ctx = ExecutionContext::seed("fix the login crash", BTreeMap::new());
//! ctx.merge("plan", [("plan_output".to_string(), json!("1. reproduce"))]);
//!
//! assert_eq!(ctx.get("task"), Some(&json!("fix the login crash")));
//! assert_eq!(ctx.get("plan_output"), Some(&json!("1. reproduce")));
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::AgentOutput;
use crate::config::StepSpec;
use crate::config::step::{LATEST_OUTPUT_KEY, output_key};

/// タスクを格納するキー
pub const TASK_KEY: &str = "task";

/// 初期値の書き込み元として記録する名前
const SEED_WRITER: &str = "<seed>";

/// コンテキスト参照のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// 要求されたキーが存在しない
    #[error("コンテキストにキー '{key}' がありません")]
    MissingKey { key: String },
}

/// ワークフロー実行コンテキスト
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: BTreeMap<String, Value>,
    /// キーごとの最後の書き込み元
    writers: HashMap<String, String>,
}

impl ExecutionContext {
    /// タスクと初期値でコンテキストを生成
    ///
    /// タスクは [`TASK_KEY`] に格納されます。初期値に同名のキーがあっても
    /// タスクが優先されます。
    pub fn seed(task: impl Into<String>, initial: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut ctx = Self::default();
        for (key, value) in initial {
            ctx.writers.insert(key.clone(), SEED_WRITER.to_string());
            ctx.values.insert(key, value);
        }
        ctx.writers.insert(TASK_KEY.to_string(), SEED_WRITER.to_string());
        ctx.values.insert(TASK_KEY.to_string(), Value::String(task.into()));
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 現在の値すべて
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// 宣言されたキーの値を取り出す
    ///
    /// # 戻り値
    ///
    /// * `Err(ContextError::MissingKey)` - 最初に見つからなかったキー
    pub fn read<S: AsRef<str>>(&self, keys: &[S]) -> Result<BTreeMap<String, Value>, ContextError> {
        keys.iter()
            .map(|key| {
                let key = key.as_ref();
                self.values
                    .get(key)
                    .map(|value| (key.to_string(), value.clone()))
                    .ok_or_else(|| ContextError::MissingKey {
                        key: key.to_string(),
                    })
            })
            .collect()
    }

    /// ステップに渡すビュー
    ///
    /// 名前空間全体に加えて、`context_mapping` のエイリアスを含みます。
    /// エイリアス元のキーが存在しない場合、そのエイリアスは含まれません。
    pub fn view_for(&self, step: &StepSpec) -> BTreeMap<String, Value> {
        let mut view = self.values.clone();
        for (source, alias) in step.context_mapping() {
            if let Some(value) = self.values.get(source) {
                view.insert(alias.clone(), value.clone());
            }
        }
        view
    }

    /// 値を取り込む（後勝ち）
    ///
    /// 別の書き込み元が書いたキーを上書きする場合は警告ログを出します。
    /// `_` で始まるキーはアダプター内部用として取り込みません。
    pub fn merge(&mut self, writer: &str, pairs: impl IntoIterator<Item = (String, Value)>) {
        for (key, value) in pairs {
            if key.starts_with('_') {
                debug!(step = writer, key = %key, "skipping private context key");
                continue;
            }

            if let Some(previous) = self.writers.get(&key)
                && previous != writer
                && key != LATEST_OUTPUT_KEY
            {
                warn!(
                    step = writer,
                    key = %key,
                    previous_writer = %previous,
                    "overwriting context value"
                );
            }

            self.writers.insert(key.clone(), writer.to_string());
            self.values.insert(key, value);
        }
    }

    /// 成功したステップの出力を取り込む
    ///
    /// `<step_id>_output`、`latest_output`、そしてアダプターの成果物が書き込まれます。
    pub fn merge_output(&mut self, step_id: &str, output: &AgentOutput) {
        let text = Value::String(output.output.clone());
        let pairs = [
            (output_key(step_id), text.clone()),
            (LATEST_OUTPUT_KEY.to_string(), text),
        ]
        .into_iter()
        .chain(output.artifacts.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.merge(step_id, pairs);
    }

    /// 現時点のスナップショット
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot(self.values.clone())
    }

    /// コンテキストを破棄してスナップショットにする
    pub fn into_snapshot(self) -> ContextSnapshot {
        ContextSnapshot(self.values)
    }
}

/// コンテキストの不変スナップショット
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ContextSnapshot(BTreeMap<String, Value>);

impl ContextSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

impl From<BTreeMap<String, Value>> for ContextSnapshot {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self(values)
    }
}
