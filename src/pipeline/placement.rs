//! 密度・文脈駆動の広告スロット配置。
//!
//! 配置はレンダリングではなくページ編成の問題として扱う。エンジンは
//! 正規アイテム列とセッション状態から決定的にスロット予算を算出し、
//! アイテムの合間へ広告エントリを編み込む。

use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::domain::ads::{
    reserved_dimensions, AdNetworkId, AdSlotSpec, AdType, PositionClass, Viewability,
};
use crate::domain::content::ContentItem;
use crate::domain::request::{DeviceClass, Geo, ListingRequest, PageKind};
use crate::session::SessionState;

/// 配置エンジンのチューニング値。すべて [`Config`] 由来で、実行中は不変。
#[derive(Debug, Clone, Copy)]
pub struct PlacementConfig {
    base_density_desktop: f64,
    base_density_mobile: f64,
    fatigue_ceiling: u32,
    session_ramp_secs: u64,
}

impl PlacementConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_density_desktop: config.ad_base_density_desktop(),
            base_density_mobile: config.ad_base_density_mobile(),
            fatigue_ceiling: config.ad_fatigue_ceiling(),
            session_ramp_secs: config.ad_session_ramp().as_secs(),
        }
    }

    #[must_use]
    fn base_density(&self, device: DeviceClass) -> f64 {
        match device {
            DeviceClass::Desktop => self.base_density_desktop,
            DeviceClass::Mobile => self.base_density_mobile,
        }
    }

    /// 実効密度。セッション序盤は抑え、累計インプレッションで逓減させる。
    ///
    /// `base × (0.7 + 0.3 × min(t/ramp, 1)) × max(0, 1 − served/ceiling)`
    #[must_use]
    pub fn effective_density(
        &self,
        device: DeviceClass,
        session_seconds: u64,
        impressions_served: u32,
    ) -> f64 {
        let ramp = if self.session_ramp_secs == 0 {
            1.0
        } else {
            (session_seconds as f64 / self.session_ramp_secs as f64).min(1.0)
        };
        let fatigue = if self.fatigue_ceiling == 0 {
            0.0
        } else {
            (1.0 - f64::from(impressions_served) / f64::from(self.fatigue_ceiling)).max(0.0)
        };
        self.base_density(device) * (0.7 + 0.3 * ramp) * fatigue
    }
}

/// ページ種別ごとのポジション配分比。絶対数ではなく比率で、
/// スロット予算を按分する際の重みとして使う。
#[derive(Debug, Clone, Copy)]
pub struct SlotDistribution {
    pub above_fold: u32,
    pub mid_content: u32,
    pub below_fold: u32,
}

impl SlotDistribution {
    #[must_use]
    pub fn for_kind(kind: PageKind) -> Self {
        match kind {
            PageKind::Tag | PageKind::Search => Self {
                above_fold: 1,
                mid_content: 2,
                below_fold: 2,
            },
            PageKind::Performer => Self {
                above_fold: 1,
                mid_content: 2,
                below_fold: 1,
            },
            PageKind::Trending => Self {
                above_fold: 2,
                mid_content: 3,
                below_fold: 3,
            },
            PageKind::Home | PageKind::Category => Self {
                above_fold: 2,
                mid_content: 3,
                below_fold: 2,
            },
        }
    }

    fn weight(&self, position: PositionClass) -> u32 {
        match position {
            PositionClass::AboveFold => self.above_fold,
            PositionClass::MidContent => self.mid_content,
            PositionClass::BelowFold => self.below_fold,
            PositionClass::Sticky | PositionClass::Exit => 0,
        }
    }

    fn total(&self) -> u32 {
        self.above_fold + self.mid_content + self.below_fold
    }
}

/// アイテムのインデックス百分位からポジションクラスを決める。
#[must_use]
pub fn position_class(percentile: f64) -> PositionClass {
    if percentile < 0.3 {
        PositionClass::AboveFold
    } else if percentile < 0.7 {
        PositionClass::MidContent
    } else {
        PositionClass::BelowFold
    }
}

/// ポジションと視認性見積もりから広告タイプを選ぶ。全組み合わせを網羅する。
#[must_use]
pub fn select_ad_type(position: PositionClass, viewability: Viewability) -> AdType {
    match (position, viewability) {
        (PositionClass::AboveFold, Viewability::High) => AdType::VideoPreload,
        (PositionClass::AboveFold, Viewability::Medium) => AdType::Native,
        (PositionClass::AboveFold, Viewability::Low) => AdType::Display,
        (PositionClass::MidContent, Viewability::High) => AdType::Native,
        (PositionClass::MidContent, Viewability::Medium) => AdType::Infeed,
        (PositionClass::MidContent, Viewability::Low) => AdType::Display,
        (PositionClass::BelowFold, Viewability::High) => AdType::Infeed,
        (PositionClass::BelowFold, Viewability::Medium) => AdType::Display,
        (PositionClass::BelowFold, Viewability::Low) => AdType::Text,
        (PositionClass::Sticky, Viewability::High) => AdType::Push,
        (PositionClass::Sticky, Viewability::Medium) => AdType::Footer,
        (PositionClass::Sticky, Viewability::Low) => AdType::Corner,
        (PositionClass::Exit, Viewability::High) => AdType::Redirect,
        (PositionClass::Exit, Viewability::Medium | Viewability::Low) => AdType::Popunder,
    }
}

/// ジオと広告タイプからネットワークを引く。`House` はネットワーク経由で
/// 配信しないため `None` を返し、呼び出し側でハウス枠に落とす。
#[must_use]
pub fn route_network(geo: Geo, ad_type: AdType) -> Option<AdNetworkId> {
    let name = match (geo, ad_type) {
        (_, AdType::House) => return None,
        (Geo::Us, AdType::VideoPreload) => "adnetwork1_video",
        (Geo::Us, AdType::Native) => "adnetwork1_native",
        (Geo::Us, AdType::Display | AdType::Footer) => "adnetwork2_display",
        (Geo::Us, AdType::Infeed) => "adnetwork2_infeed",
        (Geo::Us, AdType::Text | AdType::Corner) => "adnetwork3_text",
        (Geo::Us, AdType::Push) => "adnetwork3_push",
        (Geo::Us, AdType::Redirect) => "adnetwork4_redirect",
        (Geo::Us, AdType::Popunder) => "adnetwork4_pop",
        (Geo::Eu, AdType::VideoPreload) => "adnetwork5_video",
        (Geo::Eu, AdType::Native) => "adnetwork5_native",
        (Geo::Eu, AdType::Display | AdType::Footer) => "adnetwork6_display",
        (Geo::Eu, AdType::Infeed) => "adnetwork6_infeed",
        (Geo::Eu, AdType::Text | AdType::Corner) => "adnetwork6_text",
        (Geo::Eu, AdType::Push) => "adnetwork5_push",
        (Geo::Eu, AdType::Redirect | AdType::Popunder) => "adnetwork6_pop",
        (Geo::RestOfWorld, AdType::VideoPreload) => "adnetwork7_video",
        (Geo::RestOfWorld, AdType::Native | AdType::Infeed) => "adnetwork7_native",
        (Geo::RestOfWorld, AdType::Display | AdType::Footer) => "adnetwork8_display",
        (Geo::RestOfWorld, AdType::Text | AdType::Corner) => "adnetwork8_text",
        (Geo::RestOfWorld, AdType::Push) => "adnetwork7_push",
        (Geo::RestOfWorld, AdType::Redirect | AdType::Popunder) => "adnetwork8_pop",
    };
    Some(AdNetworkId(name))
}

/// ページを構成する1エントリ。コンテンツカードか広告スロットのどちらか。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageEntry {
    Content(ContentItem),
    Ad(AdSlotSpec),
}

/// 配置済みスロットと、リフレッシュデーモンが可視判定に使う百分位。
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSlot {
    pub spec: AdSlotSpec,
    pub percentile: f64,
}

/// 配置結果。エントリ列は直列化対象、スロット列は登録用。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlacedPage {
    pub entries: Vec<PageEntry>,
    pub slots: Vec<PlacedSlot>,
}

impl PlacedPage {
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// 密度・文脈駆動の配置エンジン本体。
#[derive(Debug, Clone, Copy)]
pub struct PlacementEngine {
    config: PlacementConfig,
}

impl PlacementEngine {
    #[must_use]
    pub fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    /// アイテム列へ広告スロットを編み込む。
    ///
    /// 予算は `floor(件数 × 実効密度)`。ページ種別の配分比で各ポジション
    /// バケットへ按分（端数切り捨て）し、バケット内では等間隔に挿入する。
    /// 広告が隣接しないこと、予算を超えないことを保証する。
    #[must_use]
    pub fn place(
        &self,
        request: &ListingRequest,
        items: Vec<ContentItem>,
        session: &SessionState,
        session_seconds: u64,
    ) -> PlacedPage {
        let total = items.len();
        if total == 0 {
            return PlacedPage::default();
        }

        let density = self.config.effective_density(
            request.device,
            session_seconds,
            session.impressions_served,
        );
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let budget = (total as f64 * density).floor() as usize;
        let distribution = SlotDistribution::for_kind(request.kind);

        debug!(
            kind = request.kind.as_str(),
            total, density, budget, "computed slot budget"
        );

        let mut entries = Vec::with_capacity(total + budget);
        let mut slots = Vec::with_capacity(budget);
        let mut ordinal = 0usize;

        // バケット境界は百分位で決まる。境界ごとにまとめて処理する。
        let buckets = [
            PositionClass::AboveFold,
            PositionClass::MidContent,
            PositionClass::BelowFold,
        ];
        let allotments = apportion(budget, &distribution);
        let mut cursor = 0usize;
        for (position, allotment) in buckets.into_iter().zip(allotments) {
            let end = bucket_end(position, total);
            let bucket = &items[cursor..end];
            let allotment = allotment.min(bucket.len());
            let interval = if allotment == 0 {
                usize::MAX
            } else {
                (bucket.len() / allotment).max(1)
            };

            let mut placed = 0usize;
            for (local, item) in bucket.iter().enumerate() {
                entries.push(PageEntry::Content(item.clone()));
                if placed < allotment && (local + 1) % interval == 0 {
                    let global = cursor + local;
                    let percentile = global as f64 / total as f64;
                    let slot = self.build_slot(request, position, ordinal);
                    ordinal += 1;
                    placed += 1;
                    entries.push(PageEntry::Ad(slot.clone()));
                    slots.push(PlacedSlot {
                        spec: slot,
                        percentile,
                    });
                }
            }
            cursor = end;
        }

        PlacedPage { entries, slots }
    }

    fn build_slot(
        &self,
        request: &ListingRequest,
        position: PositionClass,
        ordinal: usize,
    ) -> AdSlotSpec {
        let viewability = Viewability::from_score(position.viewability_score());
        let preferred = select_ad_type(position, viewability);
        // ルーティング不能ならハウス枠へ落とすが、予約サイズは維持する。
        let (ad_type, network) = match route_network(request.geo, preferred) {
            Some(network) => (preferred, network),
            None => (AdType::House, AdNetworkId("house")),
        };
        let dims = reserved_dimensions(preferred, request.device);
        AdSlotSpec {
            id: format!(
                "{}:{}:{}:{ordinal}",
                request.kind.as_str(),
                request.key,
                position.as_slug()
            ),
            position,
            ad_type,
            network,
            width: dims.width,
            height: dims.height,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bucket_end(position: PositionClass, total: usize) -> usize {
    match position {
        PositionClass::AboveFold => (total as f64 * 0.3).ceil() as usize,
        PositionClass::MidContent => (total as f64 * 0.7).ceil() as usize,
        _ => total,
    }
}

/// 予算を配分比で按分する。最大剰余法で、合計は必ず予算と一致する
/// （予算を超えて切り上げることはない）。
fn apportion(budget: usize, distribution: &SlotDistribution) -> [usize; 3] {
    let weights = [
        distribution.weight(PositionClass::AboveFold),
        distribution.weight(PositionClass::MidContent),
        distribution.weight(PositionClass::BelowFold),
    ];
    let total = distribution.total();
    if total == 0 {
        return [0; 3];
    }

    let mut shares = [0usize; 3];
    let mut remainders = [0usize; 3];
    for (i, weight) in weights.iter().enumerate() {
        let scaled = budget * *weight as usize;
        shares[i] = scaled / total as usize;
        remainders[i] = scaled % total as usize;
    }

    let mut leftover = budget - shares.iter().sum::<usize>();
    // 剰余の大きいバケットから order を埋める。同値は先頭優先。
    let mut order = [0usize, 1, 2];
    order.sort_by_key(|&i| std::cmp::Reverse(remainders[i]));
    for &i in &order {
        if leftover == 0 {
            break;
        }
        if remainders[i] > 0 {
            shares[i] += 1;
            leftover -= 1;
        }
    }
    shares
}
