/// 正規化済みコンテンツアイテムとプロバイダー生レコード。
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::text;

/// プロバイダーから受け取った生のレコード。
///
/// プロバイダー間でスキーマ契約はないため、任意のJSONオブジェクトを
/// そのまま保持し、正規化時にエイリアスを許容して項目を抽出する。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRecord(pub serde_json::Map<String, Value>);

impl RawRecord {
    fn str_field(&self, aliases: &[&str]) -> Option<String> {
        aliases.iter().find_map(|key| {
            self.0
                .get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        })
    }

    fn u64_field(&self, aliases: &[&str]) -> Option<u64> {
        aliases.iter().find_map(|key| {
            let value = self.0.get(*key)?;
            value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        })
    }

    fn string_list_field(&self, aliases: &[&str]) -> Vec<String> {
        aliases
            .iter()
            .find_map(|key| self.0.get(*key).and_then(Value::as_array))
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// マージ後の正規カタログに載る1アイテム。マージ後は不変。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// マージ結果の中で一意なID。
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// 人気シグナル（再生数など）。並び順の主キー。
    pub popularity: u64,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// このアイテムを最初に提供したプロバイダー。
    pub provider: String,
}

impl ContentItem {
    /// 生レコードから正規アイテムを構築する。
    ///
    /// タイトルが取れないレコードは不正とみなして `None` を返す。
    /// プロバイダーIDは信用できないため、欠けていればタイトルから導出する。
    #[must_use]
    pub fn from_raw(record: &RawRecord, provider: &str) -> Option<Self> {
        let title = record.str_field(&["title", "name", "video_title"])?;
        let duration_secs = record
            .u64_field(&["duration", "duration_sec", "duration_seconds", "length", "length_sec"])
            .unwrap_or(0);
        let popularity = record
            .u64_field(&["views", "view_count", "viewcount", "popularity", "plays"])
            .unwrap_or(0);
        let id = record
            .str_field(&["id", "video_id", "uid"])
            .unwrap_or_else(|| format!("{provider}-{:016x}", text::hash64(&title)));
        let published_at = record
            .str_field(&["published_at", "created_at", "date"])
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let media = record
            .str_field(&["thumbnail", "thumb", "preview", "poster"])
            .map(|url| vec![url])
            .unwrap_or_default();
        let categories = record.string_list_field(&["categories", "tags"]);

        Some(Self {
            id: format!("{provider}:{id}"),
            title,
            media,
            popularity,
            duration_secs,
            published_at,
            categories,
            provider: provider.to_string(),
        })
    }
}
