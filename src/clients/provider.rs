/// コンテンツプロバイダーからのリスティング取得クライアント。
///
/// プロバイダーごとのスキーマ契約は存在しない前提で、応答は生の
/// JSONレコード列として返す。タイムアウトはクライアント構築時に設定する。
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::content::RawRecord;
use crate::domain::request::ListingRequest;

/// プロバイダー呼び出しの失敗。境界を越えてパニックや生エラーを漏らさない。
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned error status {0}")]
    Status(StatusCode),
    #[error("provider payload malformed: {0}")]
    Malformed(String),
}

/// プロバイダークライアントの設定。
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

/// 1プロバイダーとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    base_url: Url,
    name: String,
}

impl ProviderClient {
    /// 新しいプロバイダークライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()?;
        let base_url = Url::parse(&config.base_url)?;

        Ok(Self {
            client,
            base_url,
            name: config.name,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// リスティング1ページ分の生レコードを取得する。
    ///
    /// # Errors
    /// リクエスト失敗・エラーステータス・パース不能ペイロードは
    /// [`ProviderError`] として返す。
    pub async fn fetch_listing(
        &self,
        request: &ListingRequest,
    ) -> Result<Vec<RawRecord>, ProviderError> {
        let mut url = self.base_url.clone();
        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("kind", request.kind.as_str());
            query_pairs.append_pair("key", &request.key);
            query_pairs.append_pair("page", &request.page.to_string());
            query_pairs.append_pair("geo", &request.country);
            query_pairs.append_pair("device", request.device.as_str());
        }

        debug!(provider = %self.name, url = %url, "fetching provider listing");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        parse_records(payload)
    }

    /// 到達性チェック。レディネスプローブからのみ呼ばれる。
    ///
    /// # Errors
    /// 接続できない場合はエラーを返す。ステータスコードは問わない
    /// （プロバイダーのヘルス表現は契約外のため）。
    pub async fn ping(&self) -> Result<(), ProviderError> {
        self.client.head(self.base_url.clone()).send().await?;
        Ok(())
    }
}

/// プロバイダー応答からレコード列を取り出す。
///
/// 裸の配列、`data`/`videos`/`items`/`results` 配下の配列のいずれも許容する。
fn parse_records(payload: Value) -> Result<Vec<RawRecord>, ProviderError> {
    let values = match payload {
        Value::Array(values) => values,
        Value::Object(mut map) => {
            let nested = ["data", "videos", "items", "results"]
                .iter()
                .find_map(|key| map.remove(*key));
            match nested {
                Some(Value::Array(values)) => values,
                Some(other) => {
                    return Err(ProviderError::Malformed(format!(
                        "expected record array, got {other}"
                    )))
                }
                None => {
                    return Err(ProviderError::Malformed(
                        "no record array in payload".to_string(),
                    ))
                }
            }
        }
        other => {
            return Err(ProviderError::Malformed(format!(
                "expected object or array, got {other}"
            )))
        }
    };

    Ok(values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(map) => Some(RawRecord(map)),
            // 配列内の非オブジェクトは不正レコードとして読み飛ばす
            _ => None,
        })
        .collect())
}
