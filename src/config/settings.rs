//! アプリケーション設定ファイル
//!
//! # 責務
//!
//! - TOML 設定ファイル（既定: `local-agents.toml`）の読み書き
//! - 値のバリデーション（温度、最大トークン数、モデル名、ホストURL、ワークフロー定義）
//! - エンジン設定 [`EngineConfig`] の組み立て
//!
//! すべてのフィールドに既定値があるため、空のファイルや存在しないファイルは
//! [`Settings::default`] と同じ意味になります。
//!
//! ```toml
//! default_model = "llama3.1:8b"
//! ollama_host = "http://localhost:11434"
//!
//! [agents]
//! coding = "codellama:7b"
//!
//! [engine]
//! failure_policy = "continue"
//! step_timeout_secs = 600
//!
//! [workflows]
//! quick-fix = ["code", "custom:lint"]
//!
//! [handlers.lint]
//! command = "cargo"
//! args = ["clippy", "--quiet"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::step::AgentKind;
use crate::engine::{EngineConfig, FailurePolicy};
use crate::error::ConfigError;
use crate::provider::ollama::DEFAULT_HOST;

/// 既定の設定ファイル名
pub const DEFAULT_SETTINGS_FILE: &str = "local-agents.toml";

/// 既定モデル
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

const MAX_TOKENS_LIMIT: u32 = 100_000;

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// エージェント別の指定がない場合に使うモデル
    pub default_model: String,
    /// Ollama サーバーのURL
    pub ollama_host: String,
    /// 生成温度（0.0〜2.0）
    pub temperature: f64,
    /// 1回の生成の最大トークン数
    pub max_tokens: u32,
    /// エージェント種別ごとのモデル
    pub agents: AgentModels,
    /// エンジン設定
    pub engine: EngineSettings,
    /// 名前つきの直列ワークフロー（エージェント種別の並び）
    pub workflows: BTreeMap<String, Vec<String>>,
    /// `custom:<id>` で参照されるコマンドハンドラー
    pub handlers: BTreeMap<String, CommandHandlerConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            ollama_host: DEFAULT_HOST.to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            agents: AgentModels::default(),
            engine: EngineSettings::default(),
            workflows: BTreeMap::new(),
            handlers: BTreeMap::new(),
        }
    }
}

/// エージェント種別ごとのモデル割り当て
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentModels {
    pub planning: String,
    pub coding: String,
    pub testing: String,
    pub reviewing: String,
}

impl Default for AgentModels {
    fn default() -> Self {
        Self {
            planning: "llama3.1:8b".to_string(),
            coding: "codellama:7b".to_string(),
            testing: "deepseek-coder:6.7b".to_string(),
            reviewing: "llama3.1:8b".to_string(),
        }
    }
}

impl AgentModels {
    /// 組み込みエージェント種別に割り当てられたモデル
    ///
    /// カスタムハンドラーはモデルを使わないため `None` を返します。
    pub fn model_for(&self, kind: &AgentKind) -> Option<&str> {
        match kind {
            AgentKind::Plan => Some(&self.planning),
            AgentKind::Code => Some(&self.coding),
            AgentKind::Test => Some(&self.testing),
            AgentKind::Review => Some(&self.reviewing),
            AgentKind::Custom(_) => None,
        }
    }
}

/// ワークフローエンジンの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// ステップ失敗時の方針（`fail-fast` / `continue`）
    pub failure_policy: FailurePolicy,
    /// ステップの既定タイムアウト（秒）
    pub step_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            step_timeout_secs: 300,
        }
    }
}

/// 外部コマンドで実装されたカスタムハンドラー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandHandlerConfig {
    /// 実行するプログラム
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 作業ディレクトリ（未指定ならカレントディレクトリ）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Settings {
    /// 設定ファイルを読み込む
    ///
    /// ファイルが存在しない場合は既定値を返します。
    /// 読み込んだ値はバリデーションされます。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(toml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// バリデーション後にファイルへ保存
    ///
    /// 親ディレクトリが存在しない場合は作成します。
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// 設定値を検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(format!(
                "temperature は 0.0〜2.0 の範囲で指定してください: {}",
                self.temperature
            )));
        }

        if self.max_tokens == 0 || self.max_tokens > MAX_TOKENS_LIMIT {
            return Err(ConfigError::Validation(format!(
                "max_tokens は 1〜{} の範囲で指定してください: {}",
                MAX_TOKENS_LIMIT, self.max_tokens
            )));
        }

        validate_model_name("default_model", &self.default_model)?;
        validate_model_name("agents.planning", &self.agents.planning)?;
        validate_model_name("agents.coding", &self.agents.coding)?;
        validate_model_name("agents.testing", &self.agents.testing)?;
        validate_model_name("agents.reviewing", &self.agents.reviewing)?;
        validate_host(&self.ollama_host)?;

        if self.engine.step_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "engine.step_timeout_secs は1秒以上を指定してください".to_string(),
            ));
        }

        for (id, handler) in &self.handlers {
            if handler.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "handlers.{}: command が空です",
                    id
                )));
            }
        }

        for (name, chain) in &self.workflows {
            self.validate_chain(name, chain)?;
        }

        Ok(())
    }

    fn validate_chain(&self, name: &str, chain: &[String]) -> Result<(), ConfigError> {
        if chain.is_empty() {
            return Err(ConfigError::Validation(format!(
                "workflows.{}: ステップが空です",
                name
            )));
        }

        let mut seen = HashSet::new();
        for entry in chain {
            let kind: AgentKind = entry
                .parse()
                .map_err(|e| ConfigError::Validation(format!("workflows.{}: {}", name, e)))?;

            if let Some(id) = kind.handler_id()
                && !self.handlers.contains_key(id)
            {
                return Err(ConfigError::Validation(format!(
                    "workflows.{}: ハンドラー '{}' が handlers に定義されていません",
                    name, id
                )));
            }

            if !seen.insert(kind) {
                return Err(ConfigError::Validation(format!(
                    "workflows.{}: ステップ '{}' が重複しています",
                    name, entry
                )));
            }
        }

        Ok(())
    }

    /// エージェント種別に使うモデル
    ///
    /// エージェント別の割り当てがなければ `default_model` を返します。
    pub fn model_for(&self, kind: &AgentKind) -> &str {
        self.agents.model_for(kind).unwrap_or(&self.default_model)
    }

    /// エンジン設定を組み立てる
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            failure_policy: self.engine.failure_policy,
            default_timeout: Duration::from_secs(self.engine.step_timeout_secs),
        }
    }

    /// ドット区切りのキーで値を1つ変更する
    ///
    /// 値は既存の値の型（文字列、整数、小数、真偽値）として解釈されます。
    /// 変更後の設定がバリデーションを通らない場合は何も変更しません。
    ///
    /// # 例
    ///
    /// ```
    /// use local_agents::config::Settings;
    ///
    /// let mut settings = Settings::default();
    /// settings.set_value("agents.coding", "qwen2.5-coder:7b").unwrap();
    /// settings.set_value("engine.step_timeout_secs", "600").unwrap();
    ///
    /// assert_eq!(settings.agents.coding, "qwen2.5-coder:7b");
    /// assert_eq!(settings.engine.step_timeout_secs, 600);
    /// assert!(settings.set_value("temperature", "3.5").is_err());
    /// ```
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut root = toml::Value::try_from(&*self)?;

        let mut target = &mut root;
        for part in key.split('.') {
            target = target
                .get_mut(part)
                .ok_or_else(|| ConfigError::Validation(format!("不明な設定キーです: '{}'", key)))?;
        }

        let invalid = |kind: &str| {
            ConfigError::Validation(format!("{} には{}を指定してください: '{}'", key, kind, value))
        };
        let replacement = match &*target {
            toml::Value::String(_) => toml::Value::String(value.to_string()),
            toml::Value::Integer(_) => {
                toml::Value::Integer(value.trim().parse().map_err(|_| invalid("整数"))?)
            }
            toml::Value::Float(_) => {
                toml::Value::Float(value.trim().parse().map_err(|_| invalid("数値"))?)
            }
            toml::Value::Boolean(_) => {
                toml::Value::Boolean(value.trim().parse().map_err(|_| invalid("true / false"))?)
            }
            _ => {
                return Err(ConfigError::Validation(format!(
                    "{} はテーブルまたは配列のため、設定ファイルを直接編集してください",
                    key
                )));
            }
        };
        *target = replacement;

        let updated: Settings = root.try_into()?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// 設定ファイルのバックアップを `<path>.backup` に作成する
    ///
    /// 設定ファイルが存在しない場合は、この設定を書き出したものをバックアップにします。
    pub fn backup(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
        let path = path.as_ref();
        let backup_path = backup_path(path);
        if path.exists() {
            std::fs::copy(path, &backup_path)?;
        } else {
            self.save(&backup_path)?;
        }
        Ok(backup_path)
    }

    /// バックアップから設定ファイルを復元する
    ///
    /// バックアップは復元前にバリデーションされます。
    /// 存在しないバックアップは既定値として扱わず、エラーになります。
    pub fn restore(backup: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(backup.as_ref())?;
        let settings = Self::from_toml(&content)?;
        settings.save(path)?;
        Ok(settings)
    }
}

/// `local-agents.toml` -> `local-agents.toml.backup`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

/// `name:tag` 形式のモデル名を検証
fn validate_model_name(field: &str, model: &str) -> Result<(), ConfigError> {
    let is_part = |s: &str| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };

    match model.split_once(':') {
        Some((name, tag)) if is_part(name) && is_part(tag) => Ok(()),
        _ => Err(ConfigError::Validation(format!(
            "{} は 'name:tag' 形式で指定してください: '{}'",
            field, model
        ))),
    }
}

/// http(s) のURLとポート番号を検証
fn validate_host(host: &str) -> Result<(), ConfigError> {
    let invalid = || {
        ConfigError::Validation(format!(
            "ollama_host は HTTP/HTTPS のURLで指定してください: '{}'",
            host
        ))
    };

    let url = reqwest::Url::parse(host).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
        return Err(invalid());
    }

    if url.port() == Some(0) {
        return Err(ConfigError::Validation(
            "ollama_host のポート番号は 1〜65535 で指定してください: 0".to_string(),
        ));
    }

    Ok(())
}
