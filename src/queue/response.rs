use super::{QueueItem, QueueState};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};

/// Error code of an item that expired without a fallback.
pub const QUEUE_TIMEOUT: &str = "RELAYED_EXECUTION_TIMEOUT";

/// Error code of an item that expired with a fallback transaction.
pub const WALLET_FALLBACK: &str = "WALLET_FALLBACK_REQUIRED";

/// HTTP-shaped answer about a queued execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    /// Status code to answer with.
    #[serde(with = "status_code")]
    pub status: StatusCode,
    /// JSON body.
    pub body: Value,
}

impl QueueResponse {
    /// Answer for a key the queue does not know.
    pub fn not_found(key: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: json!({ "key": key, "error": "unknown relayed execution" }),
        }
    }

    /// Shapes the answer for `item`.
    pub fn for_item(item: &QueueItem, wallet_fallback_enabled: bool) -> Self {
        let state = item.state();
        let attempts = item.attempts();

        match state {
            QueueState::Completed => Self {
                status: StatusCode::OK,
                body: json!({
                    "key": item.key,
                    "status": state,
                    "attempts": attempts,
                    "result": item.result().unwrap_or(Value::Null),
                }),
            },
            QueueState::Expired => match item.wallet_fallback_tx().filter(|_| wallet_fallback_enabled)
            {
                Some(tx) => Self {
                    status: StatusCode::CONFLICT,
                    body: json!({
                        "key": item.key,
                        "status": state,
                        "code": WALLET_FALLBACK,
                        "error": "relayed execution expired, sign the transaction with your wallet",
                        "walletFallbackTx": tx,
                    }),
                },
                None => Self {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: json!({
                        "key": item.key,
                        "status": state,
                        "code": QUEUE_TIMEOUT,
                        "error": "timed out waiting for relayer capacity",
                        "lastError": item.last_error(),
                    }),
                },
            },
            QueueState::Failed => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: json!({
                    "key": item.key,
                    "status": state,
                    "attempts": attempts,
                    "error": item.last_error().unwrap_or_else(|| "relayed execution failed".into()),
                }),
            },
            QueueState::Queued | QueueState::Executing => Self {
                status: StatusCode::ACCEPTED,
                body: json!({
                    "key": item.key,
                    "status": state,
                    "attempts": attempts,
                    "correlationId": item.correlation_id,
                    "requestId": item.request_id,
                    "expiresAt": item.expires_at,
                    "lastError": item.last_error(),
                }),
            },
        }
    }
}

mod status_code {
    use http::StatusCode;
    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(
        status: &StatusCode,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(status.as_u16())
    }
}
