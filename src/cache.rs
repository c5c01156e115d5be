//! Request-keyed cache-aside layer in front of the aggregation pipeline.
//!
//! Expiry is enforced at read time by timestamp comparison; there is no
//! background sweep. Expired entries are kept so the orchestrator can serve
//! stale content when every upstream source fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::request::{DeviceClass, ListingRequest};

/// キャッシュTTLの鮮度クラス。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessClass {
    Hourly,
    Daily,
}

/// 正規化済みのキャッシュキー。パス、クエリ、Varyディメンションの組。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: String,
    pub query: String,
    pub country: String,
    pub device: DeviceClass,
    pub encoding: String,
}

impl CacheKey {
    /// リクエストからキャッシュキーを構築する。クエリはキー順に正規化する。
    #[must_use]
    pub fn from_request(request: &ListingRequest) -> Self {
        let path = format!("/v1/listings/{}/{}", request.kind.as_str(), request.key);
        let query = normalize_query(&[("page", &request.page.to_string())]);
        Self {
            path,
            query,
            country: request.country.clone(),
            device: request.device,
            encoding: request.encoding.clone(),
        }
    }
}

/// クエリパラメータをキー順に並べ替えて正規化する。
#[must_use]
pub fn normalize_query(pairs: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = pairs.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// 合成済みレスポンス本文を保持するエントリ。丸ごと差し替えのみで部分更新はない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub body: String,
    pub freshness: FreshnessClass,
    pub expires_at: DateTime<Utc>,
    /// 再充填の競合検出に使う世代カウンター。
    pub generation: u64,
}

/// キャッシュ参照の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// 有効期限内のエントリ。
    Fresh(CacheEntry),
    /// 期限切れのエントリ。再計算が必要だが、フォールバック素材にはなる。
    Stale(CacheEntry),
    Miss,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache capacity exhausted ({0} entries)")]
    CapacityExhausted(usize),
}

/// エッジキャッシュ本体。
pub struct EdgeCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    generation: AtomicU64,
    ttl_hourly: Duration,
    ttl_daily: Duration,
    max_entries: usize,
}

impl EdgeCache {
    #[must_use]
    pub fn new(ttl_hourly: Duration, ttl_daily: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl_hourly,
            ttl_daily,
            max_entries,
        }
    }

    #[must_use]
    pub fn ttl(&self, freshness: FreshnessClass) -> Duration {
        match freshness {
            FreshnessClass::Hourly => self.ttl_hourly,
            FreshnessClass::Daily => self.ttl_daily,
        }
    }

    /// キーを参照する。期限判定は読み取り時のタイムスタンプ比較で行う。
    pub async fn lookup(&self, key: &CacheKey, now: DateTime<Utc>) -> Lookup {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Lookup::Fresh(entry.clone()),
            Some(entry) => Lookup::Stale(entry.clone()),
            None => Lookup::Miss,
        }
    }

    /// 計算済みレスポンスを保存する。
    ///
    /// `observed_generation` はキャッシュミス時に見えていた世代。保存時点で
    /// エントリの世代が進んでいた場合は別の再充填が先に完了しているので、
    /// 新しい方を残して自分の書き込みは破棄する（エントリ差し替えは常に全体）。
    ///
    /// # Errors
    /// 新規キーで容量上限に達している場合は [`CacheError::CapacityExhausted`]。
    /// 呼び出し側はレスポンス配送を止めずに警告だけ残すこと。
    pub async fn store(
        &self,
        key: CacheKey,
        body: String,
        freshness: FreshnessClass,
        observed_generation: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&key) {
            if observed_generation.is_some_and(|seen| existing.generation != seen) {
                // 別リクエストの再充填が先に着地した
                return Ok(existing.generation);
            }
        } else if entries.len() >= self.max_entries {
            return Err(CacheError::CapacityExhausted(self.max_entries));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let ttl = self.ttl(freshness);
        entries.insert(
            key,
            CacheEntry {
                body,
                freshness,
                expires_at: now + chrono::TimeDelta::from_std(ttl).unwrap_or_default(),
                generation,
            },
        );
        Ok(generation)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
