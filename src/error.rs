//! エラー型の定義
//!
//! このモジュールは、Local Agents 全体で使用されるエラー型を定義します。
//!
//! - [`ConfigError`]: 設定ファイル・ワークフロー定義の読み込みとバリデーション
//! - [`WorkflowError`]: ステップ実行前に検出される構成エラー（実行全体が失敗する）
//! - [`ProviderError`]: 推論サービス（Ollama）との通信エラー
//! - [`AgentError`]: エージェントアダプター内部のエラー
//!
//! ステップ実行時のエラーは例外として伝播せず、
//! [`StepResult`](crate::engine::StepResult) に記録されます。

use thiserror::Error;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// TOML のシリアライズに失敗
    #[error("TOML のシリアライズに失敗しました: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),
}

/// ワークフロー構成エラー
///
/// いずれもステップが1つも実行される前に同期的に返されます。
/// 部分的な [`StepResult`](crate::engine::StepResult) は生成されません。
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// 登録されていないワークフロー名
    #[error("不明なワークフローです: {0}")]
    UnknownWorkflow(String),

    /// 依存グラフに循環がある（自己依存を含む）
    #[error("依存関係に循環があります: {}", .steps.join(", "))]
    Cycle {
        /// 循環に関与するステップID（宣言順）
        steps: Vec<String>,
    },

    /// `depends_on` が存在しないステップを参照している
    #[error("ステップ '{step}' が存在しないステップ '{dependency}' に依存しています")]
    UnknownDependency {
        /// 参照元ステップID
        step: String,
        /// 解決できなかった依存先ID
        dependency: String,
    },

    /// エージェント種別に対応するアダプターが登録されていない
    #[error("ステップ '{step}' のエージェント種別 '{kind}' は登録されていません")]
    UnknownAgentKind {
        /// ステップID
        step: String,
        /// エージェント種別
        kind: String,
    },

    /// 宣言された入力キーを供給するステップもシードも存在しない
    #[error("ステップ '{step}' の入力 '{key}' を供給する先行ステップがありません")]
    MissingInput {
        /// ステップID
        step: String,
        /// 解決できなかったコンテキストキー
        key: String,
    },

    /// 設定エラー
    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),
}

/// 推論サービス（Ollama）とのやり取りで発生するエラー
#[derive(Debug, Error)]
pub enum ProviderError {
    /// サービスに接続できない
    #[error("推論サービスに接続できません ({0})。Ollama が起動しているか確認してください")]
    Connection(String),

    /// サービスがエラーステータスを返した
    #[error("推論サービスがステータス {status} を返しました: {message}")]
    Api {
        /// HTTP ステータスコード
        status: u16,
        /// レスポンス本文
        message: String,
    },

    /// モデルが見つからない
    #[error("モデル '{0}' が見つかりません。`ollama pull {0}` で取得してください")]
    ModelNotFound(String),

    /// HTTP リクエストのタイムアウト
    #[error("推論サービスへのリクエストがタイムアウトしました: {0}")]
    Timeout(String),

    /// 不正なレスポンス
    #[error("不正なレスポンスです: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() {
            ProviderError::Connection(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Connection(err.to_string())
        }
    }
}

/// エージェントアダプターのエラー
///
/// アダプターが返したエラーはステップ実行器で
/// [`StepError`](crate::engine::StepError) に変換されます。
#[derive(Debug, Error)]
pub enum AgentError {
    /// 推論サービスのエラー
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// 外部コマンドの起動・入出力エラー
    #[error("コマンドの実行に失敗しました: {0}")]
    Io(#[from] std::io::Error),

    /// その他の実行エラー
    #[error("{0}")]
    Failed(String),
}
