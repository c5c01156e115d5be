/// リスティングリクエストの型定義（ページ種別、地域、デバイスクラス）。
use serde::{Deserialize, Serialize};

use crate::cache::FreshnessClass;

/// リスティングページの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Home,
    Category,
    Tag,
    Performer,
    Trending,
    Search,
}

impl PageKind {
    /// URLパスセグメントからページ種別を解決する。未知のセグメントはホーム扱い。
    #[must_use]
    pub fn from_segment(segment: &str) -> Self {
        match segment {
            "category" => Self::Category,
            "tag" => Self::Tag,
            "performer" => Self::Performer,
            "trending" => Self::Trending,
            "search" => Self::Search,
            _ => Self::Home,
        }
    }

    /// ページ種別ごとのキャッシュ鮮度クラス。
    ///
    /// トレンドと検索は時間単位で更新されるため `Hourly`、
    /// カタログ系ページは `Daily`。
    #[must_use]
    pub fn freshness_class(self) -> FreshnessClass {
        match self {
            Self::Trending | Self::Search => FreshnessClass::Hourly,
            Self::Home | Self::Category | Self::Tag | Self::Performer => FreshnessClass::Daily,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Category => "category",
            Self::Tag => "tag",
            Self::Performer => "performer",
            Self::Trending => "trending",
            Self::Search => "search",
        }
    }
}

/// 広告ルーティングで使う地域クラス。閉じた集合なのでフォールバックは型で保証される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geo {
    Us,
    Eu,
    RestOfWorld,
}

const EU_COUNTRIES: &[&str] = &[
    "at", "be", "bg", "cz", "de", "dk", "ee", "es", "fi", "fr", "gb", "gr", "hr", "hu", "ie", "it",
    "lt", "lu", "lv", "nl", "pl", "pt", "ro", "se", "si", "sk", "uk",
];

impl Geo {
    /// 小文字の国コードから地域クラスを解決する。未知の国は `RestOfWorld`。
    #[must_use]
    pub fn from_country_code(country: &str) -> Self {
        let country = country.to_lowercase();
        if country == "us" {
            Self::Us
        } else if EU_COUNTRIES.contains(&country.as_str()) {
            Self::Eu
        } else {
            Self::RestOfWorld
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Eu => "eu",
            Self::RestOfWorld => "row",
        }
    }
}

/// デバイスクラス。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// `sec-ch-ua-mobile` クライアントヒントからデバイスクラスを解決する。
    #[must_use]
    pub fn from_client_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("?1") => Self::Mobile,
            _ => Self::Desktop,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

/// 集約パイプラインへの1リクエスト分の入力。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRequest {
    pub kind: PageKind,
    pub key: String,
    pub page: u32,
    pub country: String,
    pub geo: Geo,
    pub device: DeviceClass,
    pub encoding: String,
}

impl ListingRequest {
    #[must_use]
    pub fn new(kind: PageKind, key: impl Into<String>, page: u32) -> Self {
        Self {
            kind,
            key: key.into(),
            page,
            country: "us".to_string(),
            geo: Geo::Us,
            device: DeviceClass::Desktop,
            encoding: "identity".to_string(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, country: &str, device: DeviceClass, encoding: &str) -> Self {
        self.geo = Geo::from_country_code(country);
        self.country = country.to_lowercase();
        self.device = device;
        self.encoding = encoding.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_kind_resolves_from_path_segment() {
        assert_eq!(PageKind::from_segment("category"), PageKind::Category);
        assert_eq!(PageKind::from_segment("trending"), PageKind::Trending);
        assert_eq!(PageKind::from_segment("whatever"), PageKind::Home);
    }

    #[test]
    fn trending_and_search_are_hourly() {
        assert_eq!(PageKind::Trending.freshness_class(), FreshnessClass::Hourly);
        assert_eq!(PageKind::Search.freshness_class(), FreshnessClass::Hourly);
        assert_eq!(PageKind::Category.freshness_class(), FreshnessClass::Daily);
    }

    #[test]
    fn geo_resolves_known_and_unknown_countries() {
        assert_eq!(Geo::from_country_code("US"), Geo::Us);
        assert_eq!(Geo::from_country_code("de"), Geo::Eu);
        assert_eq!(Geo::from_country_code("jp"), Geo::RestOfWorld);
    }

    #[test]
    fn device_class_resolves_from_client_hint() {
        assert_eq!(DeviceClass::from_client_hint(Some("?1")), DeviceClass::Mobile);
        assert_eq!(DeviceClass::from_client_hint(Some("?0")), DeviceClass::Desktop);
        assert_eq!(DeviceClass::from_client_hint(None), DeviceClass::Desktop);
    }
}
