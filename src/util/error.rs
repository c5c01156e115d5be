/// エラー分類とリトライ判定ユーティリティ。
use reqwest::StatusCode;

use crate::clients::provider::ProviderError;

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// リトライ可能なエラー（一時的なネットワークエラー、タイムアウトなど）
    Retryable,
    /// リトライ不可能なエラー（クライアントエラー、パース失敗など）
    NonRetryable,
}

/// プロバイダー呼び出しエラーを分類する。
#[must_use]
pub fn classify_provider_error(error: &ProviderError) -> ErrorKind {
    match error {
        ProviderError::Request(err) => {
            if err.is_timeout() || err.is_connect() {
                return ErrorKind::Retryable;
            }
            match err.status() {
                Some(status)
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS =>
                {
                    ErrorKind::Retryable
                }
                _ => ErrorKind::NonRetryable,
            }
        }
        ProviderError::Status(status) => {
            if status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS {
                ErrorKind::Retryable
            } else {
                ErrorKind::NonRetryable
            }
        }
        // 不正なペイロードは再送しても直らない
        ProviderError::Malformed(_) => ErrorKind::NonRetryable,
    }
}

/// エラーがリトライ可能かどうかを判定する。
#[must_use]
pub fn is_retryable(error: &ProviderError) -> bool {
    classify_provider_error(error) == ErrorKind::Retryable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_status_is_retryable() {
        let error = ProviderError::Status(StatusCode::BAD_GATEWAY);
        assert!(is_retryable(&error));
    }

    #[test]
    fn too_many_requests_is_retryable() {
        let error = ProviderError::Status(StatusCode::TOO_MANY_REQUESTS);
        assert!(is_retryable(&error));
    }

    #[test]
    fn client_error_status_is_non_retryable() {
        let error = ProviderError::Status(StatusCode::NOT_FOUND);
        assert!(!is_retryable(&error));
    }

    #[test]
    fn malformed_payload_is_non_retryable() {
        let error = ProviderError::Malformed("not a listing".to_string());
        assert!(!is_retryable(&error));
    }
}
