//! Merge heterogeneous provider payloads into one canonical, duplicate-free,
//! deterministically ordered item list.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::domain::content::ContentItem;
use crate::util::text;

use super::fetch::{SourceOutcome, SourcePayload};

/// 全プロバイダーが失敗した場合の区別された条件。
///
/// 「結果ゼロ件」とは別物で、オーケストレーターはこれを受けて
/// フォールバックコンテンツ経路へ進まなければならない。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("all {0} sources failed")]
    AllSourcesFailed(usize),
}

/// 重複排除済み・人気順の正規アイテム列。構築後は不変。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CanonicalList {
    items: Vec<ContentItem>,
}

impl CanonicalList {
    #[must_use]
    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn into_items(self) -> Vec<ContentItem> {
        self.items
    }

    /// フォールバック素材など、既に正規形のアイテム列から構築する。
    /// フィンガープリント重複は除去される。
    #[must_use]
    pub fn from_items(items: Vec<ContentItem>) -> Self {
        let mut seen = HashSet::new();
        let deduplicated = items
            .into_iter()
            .filter(|item| seen.insert(fingerprint(&item.title, item.duration_secs)))
            .collect();
        Self {
            items: deduplicated,
        }
    }
}

/// コンテンツのフィンガープリント。
///
/// プロバイダー採番のIDは信用できないため、正規化タイトルと粗い
/// 再生時間バケットから導出する。
#[must_use]
pub fn fingerprint(title: &str, duration_secs: u64) -> u64 {
    let bucket = duration_secs / DURATION_BUCKET_SECS;
    text::hash64(&format!("{}|{bucket}", text::fold_title(title)))
}

const DURATION_BUCKET_SECS: u64 = 30;

/// プロバイダー結果列から正規リストを構築するノーマライザー。
#[derive(Debug, Default, Clone)]
pub struct Normalizer;

impl Normalizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// 成功したソースをプロバイダー優先度順にフラット化し、重複排除して
    /// 人気シグナル降順（同点は先着順）に並べる。
    ///
    /// 入力の `outcomes` は設定済みプロバイダー順であることが前提。到着順は
    /// ここには現れないため、完走タイミングの入れ替わりに対して決定的。
    ///
    /// # Errors
    /// 全ソースが失敗マーカーの場合は [`NormalizeError::AllSourcesFailed`]。
    pub fn merge(&self, outcomes: &[SourceOutcome]) -> Result<CanonicalList, NormalizeError> {
        if !outcomes.iter().any(SourceOutcome::is_success) {
            return Err(NormalizeError::AllSourcesFailed(outcomes.len()));
        }

        let mut seen = HashSet::new();
        let mut merged: Vec<(usize, ContentItem)> = Vec::new();
        let mut dropped_duplicates = 0usize;
        let mut dropped_malformed = 0usize;

        for outcome in outcomes {
            let SourcePayload::Records(records) = &outcome.payload else {
                continue;
            };
            for record in records {
                let Some(item) = ContentItem::from_raw(record, &outcome.provider) else {
                    dropped_malformed += 1;
                    continue;
                };
                if seen.insert(fingerprint(&item.title, item.duration_secs)) {
                    let seen_index = merged.len();
                    merged.push((seen_index, item));
                } else {
                    dropped_duplicates += 1;
                }
            }
        }

        // 人気降順、同点は先着（＝プロバイダー優先度）順。キーが全順序なので
        // 安定ソートでなくても決定的だが、意図を明示するため安定ソートを使う。
        merged.sort_by(|(ai, a), (bi, b)| b.popularity.cmp(&a.popularity).then(ai.cmp(bi)));

        debug!(
            merged = merged.len(),
            dropped_duplicates, dropped_malformed, "normalized provider results"
        );

        Ok(CanonicalList {
            items: merged.into_iter().map(|(_, item)| item).collect(),
        })
    }
}
