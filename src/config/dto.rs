//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、TOML ファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル
//!   ↓ (デシリアライズ)
//! WorkflowDto
//!   ↓ (TryFrom でバリデーション)
//! WorkflowDefinition (ドメインモデル)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// ワークフロー DTO
///
/// TOML の `[workflow]` セクションと `[[steps]]` 配列をデシリアライズ/シリアライズします。
///
/// **注**: この構造体は config モジュール内部の実装詳細です。
/// 外部からは [`WorkflowDefinition`](super::workflow::WorkflowDefinition) を使用してください。
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowDto {
    /// ワークフローのメタデータ
    pub(super) workflow: WorkflowMetadataDto,
    /// ステップの配列
    #[serde(default)]
    pub(super) steps: Vec<WorkflowStepDto>,
}

/// ワークフローメタデータ DTO
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowMetadataDto {
    pub(super) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) version: Option<String>,
}

/// ワークフローステップ DTO
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowStepDto {
    pub(super) id: String,
    /// `plan` / `code` / `test` / `review` / `custom:<handler>`
    pub(super) agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(super) depends_on: Vec<String>,
    /// 条件式（例: `plan_output contains "database"`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(super) inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(super) outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) model: Option<String>,
    /// タイムアウト（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(super) context_mapping: BTreeMap<String, String>,
}
