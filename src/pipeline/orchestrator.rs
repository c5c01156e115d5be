//! リクエスト1件分のパイプライン駆動。
//!
//! キャッシュ照会 → ファンアウト取得 → 1回限りの再駆動 → 正規化 →
//! 配置 → 直列化 → キャッシュ保存、の順で進む。全ソース失敗時は
//! 期限切れキャッシュか保管済みフォールバック素材で必ず応答する。

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, EdgeCache, FreshnessClass, Lookup};
use crate::domain::content::ContentItem;
use crate::domain::request::ListingRequest;
use crate::observability::metrics::Metrics;
use crate::session::SessionRegistry;
use crate::slots::SlotRegistry;

use super::fetch::{FailureReason, FetchStage, SourceOutcome};
use super::normalize::{CanonicalList, NormalizeError, Normalizer};
use super::placement::{PageEntry, PlacementEngine};

/// 構成済みページ本文とその出自。
#[derive(Debug, Clone)]
pub struct ComposedResponse {
    pub body: String,
    pub freshness: FreshnessClass,
    pub from_cache: bool,
    pub fallback: bool,
}

/// クライアントへ返すページ文書。
#[derive(Debug, Serialize)]
struct PageDocument<'a> {
    entries: &'a [PageEntry],
    meta: PageMeta,
}

#[derive(Debug, Serialize)]
struct PageMeta {
    kind: &'static str,
    key: String,
    page: u32,
    item_count: usize,
    slot_count: usize,
    session_id: Uuid,
    degraded: bool,
    generated_at: DateTime<Utc>,
}

/// パイプライン全段を束ねるオーケストレーター。
pub struct ListingOrchestrator {
    fetcher: Arc<dyn FetchStage>,
    normalizer: Normalizer,
    placement: PlacementEngine,
    cache: Arc<EdgeCache>,
    sessions: Arc<SessionRegistry>,
    slots: Arc<SlotRegistry>,
    metrics: Arc<Metrics>,
    retry_enabled: bool,
}

impl ListingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn FetchStage>,
        placement: PlacementEngine,
        cache: Arc<EdgeCache>,
        sessions: Arc<SessionRegistry>,
        slots: Arc<SlotRegistry>,
        metrics: Arc<Metrics>,
        retry_enabled: bool,
    ) -> Self {
        Self {
            fetcher,
            normalizer: Normalizer::new(),
            placement,
            cache,
            sessions,
            slots,
            metrics,
            retry_enabled,
        }
    }

    /// リスティングページを構成する。
    ///
    /// 有効なキャッシュエントリがあれば取得段を起動せず、保存時と
    /// バイト同一の本文を返す。
    ///
    /// # Errors
    /// ページ文書の直列化に失敗した場合のみエラー。プロバイダー失敗は
    /// フォールバックで吸収され、エラーにはならない。
    pub async fn compose(
        &self,
        request: &ListingRequest,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ComposedResponse> {
        self.metrics.requests_total.inc();
        let freshness = request.kind.freshness_class();
        let key = CacheKey::from_request(request);

        let stale = match self.cache.lookup(&key, now).await {
            Lookup::Fresh(entry) => {
                self.metrics.cache_hits.inc();
                return Ok(ComposedResponse {
                    body: entry.body,
                    freshness: entry.freshness,
                    from_cache: true,
                    fallback: false,
                });
            }
            Lookup::Stale(entry) => {
                self.metrics.cache_misses.inc();
                Some(entry)
            }
            Lookup::Miss => {
                self.metrics.cache_misses.inc();
                None
            }
        };
        let observed_generation = stale.as_ref().map(|entry| entry.generation);

        let session = self
            .sessions
            .obtain(session_id, request.geo, request.device, now)
            .await;

        let fetch_started = Instant::now();
        let mut outcomes = self.fetcher.fetch_all(request).await;
        self.metrics
            .fetch_duration
            .observe(fetch_started.elapsed().as_secs_f64());
        self.note_failures(&outcomes);

        if self.retry_enabled {
            self.redrive_retryable(request, &mut outcomes).await;
        }

        let placement_started = Instant::now();
        let (list, degraded) = match self.normalizer.merge(&outcomes) {
            Ok(list) => (list, false),
            Err(NormalizeError::AllSourcesFailed(count)) => {
                self.metrics.all_sources_failed.inc();
                warn!(providers = count, "all sources failed");
                if let Some(entry) = stale {
                    // 期限切れでも保存済み本文があればそれをそのまま返す
                    self.metrics.cache_stale_served.inc();
                    self.metrics.fallback_pages_served.inc();
                    return Ok(ComposedResponse {
                        body: entry.body,
                        freshness: entry.freshness,
                        from_cache: true,
                        fallback: true,
                    });
                }
                self.metrics.fallback_pages_served.inc();
                (CanonicalList::from_items(archived_fallback()), true)
            }
        };

        let session_age = session.session_seconds(now) as u64;
        let page = self
            .placement
            .place(request, list.into_items(), &session, session_age);
        self.metrics
            .placement_duration
            .observe(placement_started.elapsed().as_secs_f64());
        self.metrics.slots_placed.inc_by(page.slot_count() as f64);
        self.slots.register_page(session.id, &page.slots).await;

        let document = PageDocument {
            entries: &page.entries,
            meta: PageMeta {
                kind: request.kind.as_str(),
                key: request.key.clone(),
                page: request.page,
                item_count: page.entries.len() - page.slot_count(),
                slot_count: page.slot_count(),
                session_id: session.id,
                degraded,
                generated_at: now,
            },
        };
        let body = serde_json::to_string(&document)?;

        // フォールバック本文はキャッシュ汚染になるので保存しない
        if !degraded {
            match self
                .cache
                .store(key, body.clone(), freshness, observed_generation, now)
                .await
            {
                Ok(_) => {
                    #[allow(clippy::cast_precision_loss)]
                    self.metrics.cached_entries.set(self.cache.len().await as f64);
                }
                Err(err) => {
                    // 配送は止めない
                    self.metrics.cache_write_failures.inc();
                    warn!(error = %err, "cache store rejected");
                }
            }
        }

        info!(
            kind = request.kind.as_str(),
            key = %request.key,
            slots = page.slot_count(),
            degraded,
            "page composed"
        );

        Ok(ComposedResponse {
            body,
            freshness,
            from_cache: false,
            fallback: degraded,
        })
    }

    fn note_failures(&self, outcomes: &[SourceOutcome]) {
        for outcome in outcomes {
            if let Some(reason) = outcome.failure() {
                self.metrics.provider_failures.inc();
                if matches!(reason, FailureReason::Timeout) {
                    self.metrics.provider_timeouts.inc();
                }
            }
        }
    }

    /// リトライ可能な失敗ソースへ一度だけ再問い合わせする。
    /// 成功した分だけ結果を差し替え、再失敗はそのまま残す。
    async fn redrive_retryable(&self, request: &ListingRequest, outcomes: &mut [SourceOutcome]) {
        let retry_indices: Vec<usize> = outcomes
            .iter()
            .filter(|o| o.failure().is_some_and(FailureReason::is_retryable))
            .map(|o| o.provider_index)
            .collect();
        if retry_indices.is_empty() {
            return;
        }

        let attempts = retry_indices
            .iter()
            .map(|&index| self.fetcher.fetch_one(request, index));
        let redriven = futures::future::join_all(attempts).await;

        for outcome in redriven {
            self.metrics.provider_retries.inc();
            if outcome.is_success() {
                info!(provider = %outcome.provider, "retry recovered provider");
                let index = outcome.provider_index;
                outcomes[index] = outcome;
            }
        }
    }
}

/// 全ソース失敗時に返す保管済み素材。編成済みカタログの固定断面で、
/// 外部には依存しない。
fn archived_fallback() -> Vec<ContentItem> {
    let titles: [(&str, u64, u64); 4] = [
        ("Editors' Picks: Most Watched This Year", 640, 120_000),
        ("Staff Selection: Long-form Features", 2_400, 85_000),
        ("Archive Spotlight: Reader Favorites", 900, 64_000),
        ("Back Catalog: Essential Viewing", 1_500, 52_000),
    ];
    titles
        .into_iter()
        .enumerate()
        .map(|(i, (title, duration_secs, popularity))| ContentItem {
            id: format!("archive:{i}"),
            title: title.to_string(),
            media: vec![],
            popularity,
            duration_secs,
            published_at: None,
            categories: vec!["archive".to_string()],
            provider: "archive".to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::config::Config;
    use crate::domain::content::RawRecord;
    use crate::domain::request::{DeviceClass, Geo, PageKind};
    use crate::observability::Telemetry;
    use crate::pipeline::fetch::SourcePayload;
    use crate::pipeline::placement::PlacementConfig;
    use crate::slots::{ImpressionSink, SlotRegistry};

    struct NullSink;

    impl ImpressionSink for NullSink {
        fn record(&self, _event: &crate::domain::ads::ImpressionEvent) {}
    }

    /// スクリプト化されたフェッチ段。呼び出し回数も数える。
    struct ScriptedFetch {
        all_calls: Mutex<u32>,
        outcomes: Vec<SourceOutcome>,
        redrive: HashMap<usize, SourceOutcome>,
    }

    impl ScriptedFetch {
        fn new(outcomes: Vec<SourceOutcome>) -> Self {
            Self {
                all_calls: Mutex::new(0),
                outcomes,
                redrive: HashMap::new(),
            }
        }

        fn with_redrive(mut self, index: usize, outcome: SourceOutcome) -> Self {
            self.redrive.insert(index, outcome);
            self
        }
    }

    #[async_trait]
    impl FetchStage for ScriptedFetch {
        async fn fetch_all(&self, _request: &ListingRequest) -> Vec<SourceOutcome> {
            *self.all_calls.lock().await += 1;
            self.outcomes.clone()
        }

        async fn fetch_one(&self, _request: &ListingRequest, index: usize) -> SourceOutcome {
            self.redrive
                .get(&index)
                .cloned()
                .unwrap_or_else(|| self.outcomes[index].clone())
        }
    }

    fn records(count: usize, prefix: &str) -> Vec<RawRecord> {
        (0..count)
            .map(|i| {
                let serde_json::Value::Object(map) = serde_json::json!({
                    "title": format!("{prefix} {i}"),
                    "duration": 120 + i * 40,
                    "views": 1000 - i,
                }) else {
                    unreachable!()
                };
                RawRecord(map)
            })
            .collect()
    }

    fn success(index: usize, provider: &str, count: usize) -> SourceOutcome {
        SourceOutcome {
            provider: provider.to_string(),
            provider_index: index,
            payload: SourcePayload::Records(records(count, provider)),
        }
    }

    fn timeout(index: usize, provider: &str) -> SourceOutcome {
        SourceOutcome {
            provider: provider.to_string(),
            provider_index: index,
            payload: SourcePayload::Failed(FailureReason::Timeout),
        }
    }

    fn orchestrator(fetch: Arc<ScriptedFetch>) -> (ListingOrchestrator, Arc<EdgeCache>) {
        let telemetry = Telemetry::without_tracing().expect("telemetry");
        let cache = Arc::new(EdgeCache::new(
            Duration::from_secs(3600),
            Duration::from_secs(86400),
            100,
        ));
        let engine = PlacementEngine::new(PlacementConfig::from_config(&Config::for_tests()));
        let orchestrator = ListingOrchestrator::new(
            fetch,
            engine,
            Arc::clone(&cache),
            Arc::new(SessionRegistry::new(Duration::from_secs(1800))),
            Arc::new(SlotRegistry::new(5, Arc::new(NullSink))),
            Arc::clone(telemetry.metrics()),
            true,
        );
        (orchestrator, cache)
    }

    fn request() -> ListingRequest {
        ListingRequest::new(PageKind::Category, "drama", 1)
    }

    #[tokio::test]
    async fn partial_failure_still_composes_a_page() {
        let fetch = Arc::new(ScriptedFetch::new(vec![
            success(0, "alpha", 5),
            timeout(1, "beta"),
            success(2, "gamma", 3),
        ]));
        let (orchestrator, _cache) = orchestrator(fetch);

        let response = orchestrator
            .compose(&request(), Uuid::new_v4(), Utc::now())
            .await
            .expect("compose");

        assert!(!response.from_cache);
        assert!(!response.fallback);
        assert!(response.body.contains("alpha"));
        assert!(response.body.contains("gamma"));
        assert!(!response.body.contains("\"provider\":\"beta\""));
    }

    #[tokio::test]
    async fn cache_hit_returns_byte_identical_body_without_refetch() {
        let fetch = Arc::new(ScriptedFetch::new(vec![success(0, "alpha", 5)]));
        let (orchestrator, _cache) = orchestrator(Arc::clone(&fetch));
        let session = Uuid::new_v4();
        let now = Utc::now();

        let first = orchestrator
            .compose(&request(), session, now)
            .await
            .expect("first compose");
        let second = orchestrator
            .compose(&request(), session, now)
            .await
            .expect("second compose");

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.body, second.body);
        assert_eq!(*fetch.all_calls.lock().await, 1);
    }

    #[tokio::test]
    async fn all_sources_failed_serves_archived_fallback() {
        let fetch = Arc::new(ScriptedFetch::new(vec![timeout(0, "alpha"), timeout(1, "beta")]));
        let (orchestrator, cache) = orchestrator(fetch);

        let response = orchestrator
            .compose(&request(), Uuid::new_v4(), Utc::now())
            .await
            .expect("compose");

        assert!(response.fallback);
        assert!(response.body.contains("archive:0"));
        // 汚染防止。フォールバック本文はキャッシュされない
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn retry_recovers_a_retryable_source() {
        // 復旧対象を末尾ソースに置き、差し替えが元のインデックスへ戻ることを見る
        let scripted = ScriptedFetch::new(vec![
            success(0, "alpha", 2),
            SourceOutcome {
                provider: "beta".to_string(),
                provider_index: 1,
                payload: SourcePayload::Failed(FailureReason::Transport {
                    detail: "502".to_string(),
                    retryable: true,
                }),
            },
        ])
        .with_redrive(1, success(1, "beta", 2));
        let (orchestrator, _cache) = orchestrator(Arc::new(scripted));

        let response = orchestrator
            .compose(&request(), Uuid::new_v4(), Utc::now())
            .await
            .expect("compose");

        assert!(!response.fallback);
        assert!(response.body.contains("alpha"));
        assert!(response.body.contains("beta"));
    }

    #[tokio::test]
    async fn stale_entry_is_served_when_all_sources_fail() {
        let fetch = Arc::new(ScriptedFetch::new(vec![success(0, "alpha", 3)]));
        let (orchestrator, cache) = orchestrator(fetch);
        let session = Uuid::new_v4();
        let now = Utc::now();

        let first = orchestrator
            .compose(&request(), session, now)
            .await
            .expect("seed compose");

        // デイリーTTLを超えた後に全ソースが落ちた状況
        let later = now + chrono::TimeDelta::seconds(90_000);
        let failing = Arc::new(ScriptedFetch::new(vec![timeout(0, "alpha")]));
        let telemetry = Telemetry::without_tracing().expect("telemetry");
        let metrics = Arc::clone(telemetry.metrics());
        let engine = PlacementEngine::new(PlacementConfig::from_config(&Config::for_tests()));
        let degraded_orchestrator = ListingOrchestrator::new(
            failing,
            engine,
            Arc::clone(&cache),
            Arc::new(SessionRegistry::new(Duration::from_secs(1800))),
            Arc::new(SlotRegistry::new(5, Arc::new(NullSink))),
            Arc::clone(telemetry.metrics()),
            false,
        );

        let fallback = degraded_orchestrator
            .compose(&request(), session, later)
            .await
            .expect("fallback compose");

        assert!(fallback.fallback);
        assert!(fallback.from_cache);
        assert_eq!(fallback.body, first.body);
        assert_eq!(metrics.cache_stale_served.get() as u64, 1);
    }
}
