use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use reqwest::Url;

use crate::{
    api,
    cache::EdgeCache,
    clients::{ProviderClient, ProviderConfig},
    config::Config,
    observability::Telemetry,
    pipeline::{
        fetch::FanoutFetchStage,
        placement::{PlacementConfig, PlacementEngine},
        ListingOrchestrator,
    },
    session::SessionRegistry,
    slots::{SlotRegistry, TelemetrySink},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    provider_clients: Vec<Arc<ProviderClient>>,
    orchestrator: Arc<ListingOrchestrator>,
    cache: Arc<EdgeCache>,
    sessions: Arc<SessionRegistry>,
    slots: Arc<SlotRegistry>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn orchestrator(&self) -> &ListingOrchestrator {
        &self.registry.orchestrator
    }

    pub(crate) fn provider_clients(&self) -> &[Arc<ProviderClient>] {
        &self.registry.provider_clients
    }

    pub(crate) fn sessions(&self) -> &SessionRegistry {
        &self.registry.sessions
    }

    pub(crate) fn slots(&self) -> &SlotRegistry {
        &self.registry.slots
    }

    #[allow(dead_code)]
    pub(crate) fn config(&self) -> &Config {
        &self.registry.config
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;
        Self::assemble(config, telemetry)
    }

    /// トレーシング初期化を伴わない組み立て。テストから使う。
    pub fn build_without_tracing(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::without_tracing()?;
        Self::assemble(config, telemetry)
    }

    fn assemble(config: Arc<Config>, telemetry: Telemetry) -> Result<Self> {
        let provider_clients = build_provider_clients(&config)?;

        let fetcher = Arc::new(FanoutFetchStage::new(
            provider_clients.clone(),
            config.provider_timeout(),
        ));
        let placement = PlacementEngine::new(PlacementConfig::from_config(&config));
        let cache = Arc::new(EdgeCache::new(
            config.cache_ttl_hourly(),
            config.cache_ttl_daily(),
            config.cache_max_entries(),
        ));
        let sessions = Arc::new(SessionRegistry::new(config.session_idle_timeout()));
        let sink = Arc::new(TelemetrySink::new(Arc::clone(telemetry.metrics())));
        let slots = Arc::new(SlotRegistry::new(config.slot_refresh_ceiling(), sink));

        let orchestrator = Arc::new(ListingOrchestrator::new(
            fetcher,
            placement,
            Arc::clone(&cache),
            Arc::clone(&sessions),
            Arc::clone(&slots),
            Arc::clone(telemetry.metrics()),
            config.provider_retry_enabled(),
        ));

        Ok(Self {
            config,
            telemetry,
            provider_clients,
            orchestrator,
            cache,
            sessions,
            slots,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn slots(&self) -> Arc<SlotRegistry> {
        Arc::clone(&self.slots)
    }

    #[must_use]
    pub fn cache(&self) -> Arc<EdgeCache> {
        Arc::clone(&self.cache)
    }
}

/// 設定されたエンドポイントごとにプロバイダークライアントを構築する。
/// 名前はホスト名から採る。ホストが重複する場合は添字で区別する。
fn build_provider_clients(config: &Config) -> Result<Vec<Arc<ProviderClient>>> {
    config
        .provider_endpoints()
        .iter()
        .enumerate()
        .map(|(index, endpoint)| {
            let name = Url::parse(endpoint)
                .ok()
                .and_then(|url| url.host_str().map(|host| format!("{host}#{index}")))
                .unwrap_or_else(|| format!("provider#{index}"));
            let client = ProviderClient::new(ProviderConfig {
                name,
                base_url: endpoint.clone(),
                connect_timeout: config.provider_connect_timeout(),
                total_timeout: provider_total_timeout(config),
            })?;
            Ok(Arc::new(client))
        })
        .collect()
}

/// クライアント側の総合タイムアウトはファンアウト側の打ち切りより
/// わずかに長くして、期限の判定主体をファンアウトに寄せる。
fn provider_total_timeout(config: &Config) -> Duration {
    config.provider_timeout() + Duration::from_millis(500)
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENV_MUTEX;

    #[tokio::test]
    async fn component_registry_builds() {
        let config = {
            let _lock = ENV_MUTEX.lock().expect("env mutex");
            std::env::set_var(
                "PROVIDER_ENDPOINTS",
                "http://localhost:8601/api,http://localhost:8602/api",
            );
            Config::from_env().expect("config loads")
        };
        let registry = ComponentRegistry::build_without_tracing(config).expect("registry builds");

        assert_eq!(registry.provider_clients.len(), 2);
        assert!(registry.cache().is_empty().await);
        assert!(registry.sessions().is_empty().await);

        let state = AppState::new(registry);
        state.telemetry().record_live_probe();
        let rendered = state.telemetry().render_prometheus();
        assert!(rendered.contains("listing_requests_total"));
    }
}
