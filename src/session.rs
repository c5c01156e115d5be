//! Per-visit session state feeding placement decisions.
//!
//! State is owned by the client-session boundary: held in memory for the
//! duration of a browsing session, mutated only by the foreground event path,
//! and discarded on idle expiry. Nothing here is ever persisted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::request::{DeviceClass, Geo};

/// 1閲覧セッション分のカウンター。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub id: Uuid,
    pub geo: Geo,
    pub device: DeviceClass,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub impressions_served: u32,
    pub clicks: u32,
    /// スクロール深度の最高到達点（0.0〜1.0）。
    pub scroll_depth: f64,
}

impl SessionState {
    #[must_use]
    pub fn new(id: Uuid, geo: Geo, device: DeviceClass, now: DateTime<Utc>) -> Self {
        Self {
            id,
            geo,
            device,
            started_at: now,
            last_seen: now,
            impressions_served: 0,
            clicks: 0,
            scroll_depth: 0.0,
        }
    }

    /// セッション開始からの経過秒数。
    #[must_use]
    pub fn session_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn record_impression(&mut self, now: DateTime<Utc>) {
        self.impressions_served += 1;
        self.last_seen = now;
    }

    pub fn record_click(&mut self, now: DateTime<Utc>) {
        self.clicks += 1;
        self.last_seen = now;
    }

    /// スクロール深度を記録する。高水位は下がらない。
    pub fn record_scroll(&mut self, depth: f64, now: DateTime<Utc>) {
        let depth = depth.clamp(0.0, 1.0);
        if depth > self.scroll_depth {
            self.scroll_depth = depth;
        }
        self.last_seen = now;
    }

    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        match (now - self.last_seen).to_std() {
            Ok(elapsed) => elapsed >= idle_timeout,
            Err(_) => false,
        }
    }
}

/// セッションIDをキーにしたインメモリレジストリ。
///
/// `SessionState` 自体は単一のフォアグラウンドパスからのみ書き換えられる
/// 前提なので同期プリミティブを持たない。マップの所有だけをロックで守る。
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionState>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// セッションのスナップショットを返す。未知のIDなら新規作成する。
    pub async fn obtain(
        &self,
        id: Uuid,
        geo: Geo,
        device: DeviceClass,
        now: DateTime<Utc>,
    ) -> SessionState {
        let mut sessions = self.sessions.lock().await;
        let state = sessions
            .entry(id)
            .or_insert_with(|| SessionState::new(id, geo, device, now));
        state.last_seen = now;
        state.clone()
    }

    /// インプレッションをカウントする。未知のセッションは無視する。
    pub async fn record_impression(&self, id: Uuid, now: DateTime<Utc>) {
        if let Some(state) = self.sessions.lock().await.get_mut(&id) {
            state.record_impression(now);
        }
    }

    /// スクロール高水位を更新し、更新後の値を返す。
    pub async fn record_scroll(&self, id: Uuid, depth: f64, now: DateTime<Utc>) -> Option<f64> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(&id)?;
        state.record_scroll(depth, now);
        Some(state.scroll_depth)
    }

    /// セッションのスクロール高水位を読む。
    pub async fn scroll_depth(&self, id: Uuid) -> Option<f64> {
        self.sessions.lock().await.get(&id).map(|s| s.scroll_depth)
    }

    /// 全セッションのスクロール高水位のスナップショット。リフレッシュ
    /// デーモンの可視判定用。
    pub async fn scroll_depth_snapshot(&self) -> HashMap<Uuid, f64> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(id, state)| (*id, state.scroll_depth))
            .collect()
    }

    /// アイドル期限切れのセッションを破棄し、破棄数を返す。
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, state| !state.is_idle(now, self.idle_timeout));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
