//! 配置済みスロットのライフサイクル管理。
//!
//! スロットはページ構成時に登録され、クリエイティブ読み込みで
//! インプレッションを1回だけ発行し、可視のあいだ定期リフレッシュされる。
//! リフレッシュ回数が上限に達したスロットは以後ハウス枠に固定される。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::ads::{AdNetworkId, AdType, ImpressionEvent};
use crate::domain::request::{DeviceClass, Geo};
use crate::observability::metrics::Metrics;
use crate::pipeline::placement::PlacedSlot;
use crate::session::SessionRegistry;

/// インプレッションの出口。計測基盤への発行をレジストリから切り離す。
pub trait ImpressionSink: Send + Sync {
    fn record(&self, event: &ImpressionEvent);
}

/// Telemetry経由でインプレッションを数えるシンク。
pub struct TelemetrySink {
    metrics: Arc<Metrics>,
}

impl TelemetrySink {
    #[must_use]
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl ImpressionSink for TelemetrySink {
    fn record(&self, event: &ImpressionEvent) {
        self.metrics.impressions_total.inc();
        info!(
            slot_id = %event.slot_id,
            ad_type = event.ad_type.as_str(),
            "impression recorded"
        );
    }
}

/// 登録済みスロット1件分の可変状態。
#[derive(Debug, Clone)]
struct SlotState {
    session_id: Uuid,
    percentile: f64,
    ad_type: AdType,
    network: AdNetworkId,
    refresh_count: u8,
    impression_recorded: bool,
    exhausted: bool,
}

/// リフレッシュ1周期の集計。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub exhausted: usize,
    pub skipped_not_visible: usize,
}

/// 配置済みスロットのインメモリレジストリ。
pub struct SlotRegistry {
    slots: Mutex<HashMap<String, SlotState>>,
    refresh_ceiling: u8,
    sink: Arc<dyn ImpressionSink>,
}

impl SlotRegistry {
    #[must_use]
    pub fn new(refresh_ceiling: u8, sink: Arc<dyn ImpressionSink>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            refresh_ceiling,
            sink,
        }
    }

    /// ページ構成時に配置されたスロット一式を登録する。
    /// 同じスロットIDの再構成は状態を初期化し直す。
    pub async fn register_page(&self, session_id: Uuid, placed: &[PlacedSlot]) {
        let mut slots = self.slots.lock().await;
        for slot in placed {
            slots.insert(
                slot.spec.id.clone(),
                SlotState {
                    session_id,
                    percentile: slot.percentile,
                    ad_type: slot.spec.ad_type,
                    network: slot.spec.network,
                    refresh_count: 0,
                    impression_recorded: false,
                    exhausted: false,
                },
            );
        }
    }

    /// クリエイティブ読み込み成功を記録する。読み込み試行1回につき
    /// インプレッションは最大1件。既に記録済みなら何も発行しない。
    pub async fn creative_loaded(
        &self,
        slot_id: &str,
        geo: Geo,
        device: DeviceClass,
        now: DateTime<Utc>,
    ) -> Option<ImpressionEvent> {
        let mut slots = self.slots.lock().await;
        let state = match slots.get_mut(slot_id) {
            Some(state) => state,
            None => {
                warn!(slot_id, "impression for unknown slot dropped");
                return None;
            }
        };
        if state.impression_recorded {
            debug!(slot_id, "duplicate impression suppressed");
            return None;
        }
        state.impression_recorded = true;

        let event = ImpressionEvent {
            slot_id: slot_id.to_string(),
            ad_type: state.ad_type,
            geo,
            device,
            timestamp: now,
        };
        self.sink.record(&event);
        Some(event)
    }

    /// 可視スロットのクリエイティブを差し替える。
    ///
    /// 可視判定はスロットの百分位がセッションのスクロール高水位以下で
    /// あること。スクロールで通過していないスロットは触らない。上限に
    /// 達したスロットはハウス枠へ恒久的に切り替える（予約サイズは登録
    /// 時のまま）。リフレッシュ後は次の読み込みが新しいインプレッション
    /// を発行できる。
    pub async fn refresh_visible(&self, scroll_depths: &HashMap<Uuid, f64>) -> RefreshReport {
        let mut slots = self.slots.lock().await;
        let mut report = RefreshReport::default();

        for (slot_id, state) in slots.iter_mut() {
            if state.exhausted {
                continue;
            }
            let visible = scroll_depths
                .get(&state.session_id)
                .is_some_and(|depth| state.percentile <= *depth);
            if !visible {
                report.skipped_not_visible += 1;
                continue;
            }

            state.refresh_count += 1;
            state.impression_recorded = false;
            if state.refresh_count >= self.refresh_ceiling {
                state.exhausted = true;
                state.ad_type = AdType::House;
                state.network = AdNetworkId("house");
                report.exhausted += 1;
                debug!(slot_id = %slot_id, "slot exhausted, pinned to house");
            } else {
                report.refreshed += 1;
            }
        }
        report
    }

    /// 生存セッションの集合を受け取り、それ以外のスロットを破棄する。
    pub async fn retain_sessions(&self, live_sessions: &[Uuid]) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, state| live_sessions.contains(&state.session_id));
        before - slots.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

/// スロットリフレッシュとセッション掃除のバックグラウンドデーモン。
///
/// 周期ごとにアイドルセッションを破棄し、残った可視スロットを
/// リフレッシュする。ハンドルは保持不要。プロセスと共に止まる。
pub fn spawn_slot_refresh_daemon(
    slots: Arc<SlotRegistry>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 最初のtickは即時発火するので読み捨てる
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = Utc::now();

            let swept = sessions.sweep_idle(now).await;
            if swept > 0 {
                debug!(swept, "idle sessions discarded");
            }

            let depths = sessions.scroll_depth_snapshot().await;
            if swept > 0 {
                let live: Vec<Uuid> = depths.keys().copied().collect();
                let orphaned = slots.retain_sessions(&live).await;
                if orphaned > 0 {
                    debug!(orphaned, "slots dropped with their sessions");
                }
            }

            let report = slots.refresh_visible(&depths).await;
            metrics.slot_refreshes.inc_by(report.refreshed as f64);
            metrics.slots_exhausted.inc_by(report.exhausted as f64);
            #[allow(clippy::cast_precision_loss)]
            metrics.active_sessions.set(sessions.len().await as f64);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::ads::{AdSlotSpec, PositionClass};

    struct CountingSink {
        recorded: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                recorded: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.recorded.load(Ordering::SeqCst)
        }
    }

    impl ImpressionSink for CountingSink {
        fn record(&self, _event: &ImpressionEvent) {
            self.recorded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn placed(id: &str, percentile: f64) -> PlacedSlot {
        PlacedSlot {
            spec: AdSlotSpec {
                id: id.to_string(),
                position: PositionClass::AboveFold,
                ad_type: AdType::Native,
                network: AdNetworkId("adnetwork1_native"),
                width: 300,
                height: 250,
            },
            percentile,
        }
    }

    #[tokio::test]
    async fn impression_is_emitted_exactly_once_per_load() {
        let sink = CountingSink::new();
        let registry = SlotRegistry::new(5, sink.clone());
        let session = Uuid::new_v4();
        registry.register_page(session, &[placed("s1", 0.1)]).await;

        let first = registry
            .creative_loaded("s1", Geo::Us, DeviceClass::Mobile, Utc::now())
            .await;
        let second = registry
            .creative_loaded("s1", Geo::Us, DeviceClass::Mobile, Utc::now())
            .await;

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn unknown_slot_records_nothing() {
        let sink = CountingSink::new();
        let registry = SlotRegistry::new(5, sink.clone());

        let event = registry
            .creative_loaded("nope", Geo::Us, DeviceClass::Desktop, Utc::now())
            .await;

        assert!(event.is_none());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn refresh_skips_slots_not_scrolled_past() {
        let sink = CountingSink::new();
        let registry = SlotRegistry::new(5, sink);
        let session = Uuid::new_v4();
        registry
            .register_page(session, &[placed("visible", 0.2), placed("deep", 0.9)])
            .await;

        let mut depths = HashMap::new();
        depths.insert(session, 0.5);
        let report = registry.refresh_visible(&depths).await;

        assert_eq!(report.refreshed, 1);
        assert_eq!(report.skipped_not_visible, 1);
        assert_eq!(report.exhausted, 0);
    }

    #[tokio::test]
    async fn refresh_allows_a_new_impression() {
        let sink = CountingSink::new();
        let registry = SlotRegistry::new(5, sink.clone());
        let session = Uuid::new_v4();
        registry.register_page(session, &[placed("s1", 0.1)]).await;

        registry
            .creative_loaded("s1", Geo::Us, DeviceClass::Mobile, Utc::now())
            .await;
        let mut depths = HashMap::new();
        depths.insert(session, 1.0);
        registry.refresh_visible(&depths).await;
        let after_refresh = registry
            .creative_loaded("s1", Geo::Us, DeviceClass::Mobile, Utc::now())
            .await;

        assert!(after_refresh.is_some());
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test]
    async fn slot_degrades_to_house_at_refresh_ceiling() {
        let sink = CountingSink::new();
        let registry = SlotRegistry::new(2, sink);
        let session = Uuid::new_v4();
        registry.register_page(session, &[placed("s1", 0.0)]).await;

        let mut depths = HashMap::new();
        depths.insert(session, 1.0);
        registry.refresh_visible(&depths).await;
        let second = registry.refresh_visible(&depths).await;
        let third = registry.refresh_visible(&depths).await;

        assert_eq!(second.exhausted, 1);
        // 上限到達後は一切触られない
        assert_eq!(third.refreshed, 0);
        assert_eq!(third.exhausted, 0);

        let event = registry
            .creative_loaded("s1", Geo::Us, DeviceClass::Mobile, Utc::now())
            .await
            .expect("house slot still loads");
        assert_eq!(event.ad_type, AdType::House);
    }

    #[tokio::test]
    async fn slots_of_dead_sessions_are_discarded() {
        let sink = CountingSink::new();
        let registry = SlotRegistry::new(5, sink);
        let kept = Uuid::new_v4();
        let gone = Uuid::new_v4();
        registry.register_page(kept, &[placed("a", 0.1)]).await;
        registry.register_page(gone, &[placed("b", 0.1)]).await;

        let removed = registry.retain_sessions(&[kept]).await;

        assert_eq!(removed, 1);
        assert_eq!(registry.len().await, 1);
    }
}
