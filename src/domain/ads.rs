/// 広告スロットの型定義（ポジション、広告タイプ、ネットワーク、インプレッション）。
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::{DeviceClass, Geo};

/// スロットのポジションクラス。ビューポートのピクセルではなく
/// アイテムのインデックス百分位で決まる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionClass {
    AboveFold,
    MidContent,
    BelowFold,
    Sticky,
    Exit,
}

impl PositionClass {
    /// ポジションごとの視認性スコア（設定値であり実測ではない）。
    #[must_use]
    pub fn viewability_score(self) -> f64 {
        match self {
            Self::AboveFold => 0.9,
            Self::MidContent => 0.6,
            Self::Sticky => 0.5,
            Self::BelowFold | Self::Exit => 0.3,
        }
    }

    #[must_use]
    pub fn as_slug(self) -> &'static str {
        match self {
            Self::AboveFold => "above-fold",
            Self::MidContent => "mid-content",
            Self::BelowFold => "below-fold",
            Self::Sticky => "sticky",
            Self::Exit => "exit",
        }
    }
}

/// 視認性の見積もりクラス。広告タイプ選択にのみ使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewability {
    High,
    Medium,
    Low,
}

impl Viewability {
    /// 設定スコアから見積もりクラスへ変換する。
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// 広告タイプ。`House` はネットワーク経由ではない静的フォールバック。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    VideoPreload,
    Native,
    Display,
    Infeed,
    Text,
    Push,
    Footer,
    Corner,
    Redirect,
    Popunder,
    House,
}

impl AdType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VideoPreload => "video_preload",
            Self::Native => "native",
            Self::Display => "display",
            Self::Infeed => "infeed",
            Self::Text => "text",
            Self::Push => "push",
            Self::Footer => "footer",
            Self::Corner => "corner",
            Self::Redirect => "redirect",
            Self::Popunder => "popunder",
            Self::House => "house",
        }
    }
}

/// コード化された広告ネットワークID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdNetworkId(pub &'static str);

impl AdNetworkId {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

/// クリエイティブ読み込み前にレイアウトを確保するための予約サイズ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDimensions {
    pub width: u32,
    pub height: u32,
}

/// 広告タイプごとの予約サイズ。Above-foldのネイティブ枠だけデバイス依存。
#[must_use]
pub fn reserved_dimensions(ad_type: AdType, device: DeviceClass) -> SlotDimensions {
    match (ad_type, device) {
        (AdType::VideoPreload, _) => SlotDimensions {
            width: 640,
            height: 360,
        },
        (AdType::Native, DeviceClass::Desktop) => SlotDimensions {
            width: 1200,
            height: 250,
        },
        (AdType::Native, DeviceClass::Mobile) => SlotDimensions {
            width: 300,
            height: 250,
        },
        (AdType::Display, DeviceClass::Desktop) => SlotDimensions {
            width: 728,
            height: 90,
        },
        (AdType::Footer, _) | (AdType::Display, DeviceClass::Mobile) => SlotDimensions {
            width: 320,
            height: 50,
        },
        (AdType::Text | AdType::Corner, _) => SlotDimensions {
            width: 300,
            height: 100,
        },
        // Infeed、House、その他はカード枠と同じ300x250を確保する
        _ => SlotDimensions {
            width: 300,
            height: 250,
        },
    }
}

/// 配置済み広告スロットの仕様。構築後は不変。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdSlotSpec {
    pub id: String,
    pub position: PositionClass,
    pub ad_type: AdType,
    pub network: AdNetworkId,
    pub width: u32,
    pub height: u32,
}

/// クリエイティブ読み込み成功1回につき1件発行されるインプレッションレコード。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpressionEvent {
    pub slot_id: String,
    pub ad_type: AdType,
    pub geo: Geo,
    pub device: DeviceClass,
    pub timestamp: DateTime<Utc>,
}
