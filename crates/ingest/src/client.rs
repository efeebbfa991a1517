use async_trait::async_trait;
use kestrel_core::{EntityId, MovingAverageKind, Side, TraderReply};
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::record::CommandRequest;
use crate::sink::{CommandSink, SubmitError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Build(#[from] reqwest::Error),

    #[error("invalid gateway URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Submits commands to a running gateway over its JSON API
#[derive(Clone)]
pub struct HttpCommandSink {
    client: Client,
    base_url: Url,
}

impl HttpCommandSink {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: base_url.clone(),
            reason,
        };
        let parsed = Url::parse(&base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("cannot be a base URL".to_string()));
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpCommandSink {
            client,
            base_url: parsed,
        })
    }

    /// Endpoint for a request; ids are percent-encoded as single path segments
    fn route(&self, entity_id: &EntityId, request: &CommandRequest) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v1", "traders", entity_id.as_str()]);
            match request {
                CommandRequest::Register(_) => segments.push("register"),
                CommandRequest::Place { .. } => segments.push("orders"),
                CommandRequest::Cancel { order_id } => {
                    segments.extend(["orders", order_id.as_str(), "cancel"])
                }
                CommandRequest::Fill { order_id, .. } => {
                    segments.extend(["orders", order_id.as_str(), "fills"])
                }
                CommandRequest::Candle(_) => segments.push("candles"),
            };
        }
        url
    }

    async fn post<B: Serialize>(&self, url: Url, body: &B) -> Result<TraderReply, SubmitError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| SubmitError::Unavailable(e.to_string()))?;

        self.handle_response(resp).await
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<TraderReply, SubmitError> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| SubmitError::Unavailable(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map_err(|e| SubmitError::Invalid(format!("unexpected reply: {e}")));
        }

        let error = serde_json::from_str::<ApiError>(&text).unwrap_or_else(|_| ApiError {
            code: status.as_str().to_string(),
            message: text,
        });
        Err(match status {
            StatusCode::UNPROCESSABLE_ENTITY => SubmitError::Rejected {
                code: error.code,
                message: error.message,
            },
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                SubmitError::Invalid(format!("{}: {}", error.code, error.message))
            }
            _ => SubmitError::Unavailable(format!("HTTP {status}: {}", error.message)),
        })
    }
}

#[async_trait]
impl CommandSink for HttpCommandSink {
    async fn submit(
        &self,
        entity_id: &EntityId,
        request: &CommandRequest,
    ) -> Result<TraderReply, SubmitError> {
        let url = self.route(entity_id, request);
        match request {
            CommandRequest::Register(profile) => {
                let body = RegisterBody {
                    base_asset: &profile.base_asset,
                    quote_asset: &profile.quote_asset,
                    base_balance: profile.base_balance,
                    quote_balance: profile.quote_balance,
                    ma_kind: profile.ma_kind,
                    short_period: profile.short_period,
                    long_period: profile.long_period,
                };
                self.post(url, &body).await
            }
            CommandRequest::Place {
                side,
                quantity,
                price,
                client_order_id,
            } => {
                let body = PlaceBody {
                    side: *side,
                    quantity: *quantity,
                    price: *price,
                    client_order_id: client_order_id.as_deref(),
                };
                self.post(url, &body).await
            }
            CommandRequest::Cancel { .. } => self.post(url, &serde_json::json!({})).await,
            CommandRequest::Fill {
                quantity, price, ..
            } => {
                let body = FillBody {
                    quantity: *quantity,
                    price: *price,
                };
                self.post(url, &body).await
            }
            CommandRequest::Candle(candle) => self.post(url, candle).await,
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[derive(Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    base_asset: &'a str,
    quote_asset: &'a str,
    base_balance: Decimal,
    quote_balance: Decimal,
    ma_kind: MovingAverageKind,
    short_period: u32,
    long_period: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceBody<'a> {
    side: Side,
    quantity: Decimal,
    price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_order_id: Option<&'a str>,
}

#[derive(Serialize)]
struct FillBody {
    quantity: Decimal,
    price: Decimal,
}
