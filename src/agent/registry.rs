//! エージェント種別からアダプターへの対応表

use std::collections::HashMap;
use std::sync::Arc;

use super::command::CommandAgent;
use super::llm::LlmAgent;
use super::traits::AgentAdapter;
use crate::config::{AgentKind, Settings};
use crate::provider::ProviderClient;

/// アダプターの登録簿
///
/// ワークフローの準備段階で各ステップの [`AgentKind`] がここで一度だけ解決されます。
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<AgentKind, Arc<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定ファイルから登録簿を組み立てる
    ///
    /// 組み込みの4種別には [`LlmAgent`]、`[handlers]` の各エントリーには
    /// `custom:<id>` として [`CommandAgent`] を登録します。
    pub fn from_settings(settings: &Settings, client: Arc<dyn ProviderClient>) -> Self {
        let mut registry = Self::new();

        for kind in AgentKind::BUILTIN {
            if let Some(agent) = LlmAgent::from_settings(kind.clone(), settings, client.clone()) {
                registry.register(kind, Arc::new(agent));
            }
        }

        for (id, handler) in &settings.handlers {
            registry.register(
                AgentKind::Custom(id.clone()),
                Arc::new(CommandAgent::new(id.as_str(), handler.clone())),
            );
        }

        registry
    }

    /// アダプターを登録（同じ種別があれば置き換え）
    pub fn register(&mut self, kind: AgentKind, adapter: Arc<dyn AgentAdapter>) {
        self.adapters.insert(kind, adapter);
    }

    pub fn with(mut self, kind: AgentKind, adapter: Arc<dyn AgentAdapter>) -> Self {
        self.register(kind, adapter);
        self
    }

    pub fn get(&self, kind: &AgentKind) -> Option<Arc<dyn AgentAdapter>> {
        self.adapters.get(kind).cloned()
    }

    pub fn contains(&self, kind: &AgentKind) -> bool {
        self.adapters.contains_key(kind)
    }

    /// 登録済みの種別（表示順に整列）
    pub fn kinds(&self) -> Vec<&AgentKind> {
        let mut kinds: Vec<&AgentKind> = self.adapters.keys().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
