//! Fan-out fetch from all configured providers.
//!
//! Every provider gets its own spawned task and its own deadline; outcomes
//! come back in configured provider order no matter which task finishes
//! first. A provider that blows its budget is aborted, so a late response
//! can never leak into the merge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::clients::provider::{ProviderClient, ProviderError};
use crate::domain::content::RawRecord;
use crate::domain::request::ListingRequest;
use crate::util::error;

/// 1プロバイダー呼び出しの失敗理由。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// タイムアウト予算超過。タスクは中断済みで、遅延応答はマージされない。
    Timeout,
    /// トランスポートエラー（接続失敗、エラーステータスなど）。
    Transport { detail: String, retryable: bool },
    /// パース不能なペイロード。
    Malformed(String),
}

impl FailureReason {
    fn from_provider_error(err: &ProviderError) -> Self {
        match err {
            ProviderError::Request(inner) if inner.is_timeout() => Self::Timeout,
            ProviderError::Request(_) | ProviderError::Status(_) => Self::Transport {
                detail: err.to_string(),
                retryable: error::is_retryable(err),
            },
            ProviderError::Malformed(detail) => Self::Malformed(detail.clone()),
        }
    }

    /// オーケストレーターの1回限りの再駆動対象かどうか。
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Transport { retryable, .. } => *retryable,
            Self::Malformed(_) => false,
        }
    }
}

/// 1プロバイダー呼び出しの結果。成功（生レコード列）か失敗マーカーのどちらか。
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub provider: String,
    pub provider_index: usize,
    pub payload: SourcePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    Records(Vec<RawRecord>),
    Failed(FailureReason),
}

impl SourceOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.payload, SourcePayload::Records(_))
    }

    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.payload {
            SourcePayload::Failed(reason) => Some(reason),
            SourcePayload::Records(_) => None,
        }
    }
}

#[async_trait]
pub trait FetchStage: Send + Sync {
    /// 設定済みの全プロバイダーへ並列に問い合わせ、プロバイダー順の結果列を返す。
    async fn fetch_all(&self, request: &ListingRequest) -> Vec<SourceOutcome>;

    /// 単一プロバイダーへの再問い合わせ。オーケストレーターの1回限りの
    /// 再駆動専用で、このステージ自身はリトライしない。
    async fn fetch_one(&self, request: &ListingRequest, provider_index: usize) -> SourceOutcome;
}

/// タイムアウト付きファンアウトの標準実装。
pub struct FanoutFetchStage {
    clients: Vec<Arc<ProviderClient>>,
    budget: Duration,
}

impl FanoutFetchStage {
    #[must_use]
    pub fn new(clients: Vec<Arc<ProviderClient>>, budget: Duration) -> Self {
        Self { clients, budget }
    }

    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.clients.len()
    }

    async fn call_provider(&self, request: &ListingRequest, index: usize) -> SourceOutcome {
        let client = Arc::clone(&self.clients[index]);
        let provider = client.name().to_string();
        let request = request.clone();

        // 各サブタスクは自分の結果スロットだけを所有する。共有可変状態はない。
        let mut handle = tokio::spawn(async move { client.fetch_listing(&request).await });

        let payload = match timeout(self.budget, &mut handle).await {
            Ok(Ok(Ok(records))) => SourcePayload::Records(records),
            Ok(Ok(Err(err))) => {
                warn!(provider = %provider, error = %err, "provider call failed");
                SourcePayload::Failed(FailureReason::from_provider_error(&err))
            }
            Ok(Err(join_error)) => {
                warn!(provider = %provider, error = %join_error, "provider task failed");
                SourcePayload::Failed(FailureReason::Transport {
                    detail: join_error.to_string(),
                    retryable: false,
                })
            }
            Err(_elapsed) => {
                // 期限超過。タスクを確実に止めて、遅延書き込みの芽を摘む。
                handle.abort();
                warn!(
                    provider = %provider,
                    budget_ms = self.budget.as_millis(),
                    "provider call timed out"
                );
                SourcePayload::Failed(FailureReason::Timeout)
            }
        };

        SourceOutcome {
            provider,
            provider_index: index,
            payload,
        }
    }
}

#[async_trait]
impl FetchStage for FanoutFetchStage {
    async fn fetch_all(&self, request: &ListingRequest) -> Vec<SourceOutcome> {
        let calls = (0..self.clients.len()).map(|index| self.call_provider(request, index));

        // join_all は入力順で結果を返すので、完走順に関わらずプロバイダー順が保たれる
        let outcomes = futures::future::join_all(calls).await;

        debug!(
            providers = outcomes.len(),
            succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
            "provider fan-out settled"
        );
        outcomes
    }

    async fn fetch_one(&self, request: &ListingRequest, provider_index: usize) -> SourceOutcome {
        self.call_provider(request, provider_index).await
    }
}
