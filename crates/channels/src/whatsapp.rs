//! WhatsApp delivery through an HTTP bridge in front of a WhatsApp Web client.

use async_trait::async_trait;
use leadflow_core::config::WhatsAppConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::sender::{MessageSender, OutboundMessage, SendError, SendReceipt};

const MIN_PHONE_DIGITS: usize = 8;

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    to: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(alias = "message_id")]
    id: Option<String>,
}

pub struct WhatsAppBridge {
    client: Client,
    config: WhatsAppConfig,
}

impl WhatsAppBridge {
    pub fn new(config: WhatsAppConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        info!(
            bridge_url = %config.bridge_url,
            dry_run = config.dry_run,
            "WhatsApp bridge initialized"
        );
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.bridge_url.trim_end_matches('/'))
    }
}

/// Digits only; the bridge expects the bare international number.
fn normalize_recipient(phone: &str) -> Result<String, SendError> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(SendError::permanent(format!(
            "invalid recipient number '{phone}'"
        )));
    }
    Ok(digits)
}

fn classify_status(status: StatusCode, body: &str) -> SendError {
    let message = format!("bridge responded {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        SendError::transient(message)
    } else {
        SendError::permanent(message)
    }
}

#[async_trait]
impl MessageSender for WhatsAppBridge {
    fn channel(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let to = normalize_recipient(&message.to)?;

        if self.config.dry_run {
            info!(lead_id = %message.lead_id, to = %to, "Dry run, WhatsApp message not sent");
            return Ok(SendReceipt {
                provider_message_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
            });
        }

        let mut request = self.client.post(self.endpoint()).json(&BridgeRequest {
            to: &to,
            body: &message.body,
        });
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            metrics::counter!("whatsapp.send_errors", "kind" => "transport").increment(1);
            SendError::transient(format!("bridge unreachable: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &body);
            metrics::counter!(
                "whatsapp.send_errors",
                "kind" => if error.is_permanent() { "permanent" } else { "transient" }
            )
            .increment(1);
            warn!(lead_id = %message.lead_id, %status, "WhatsApp bridge rejected message");
            return Err(error);
        }

        let parsed: Option<BridgeResponse> = response.json().await.ok();
        let provider_message_id = parsed
            .and_then(|r| r.id)
            .unwrap_or_else(|| format!("wa-{}", uuid::Uuid::new_v4()));

        metrics::counter!("whatsapp.messages_sent").increment(1);
        debug!(lead_id = %message.lead_id, %provider_message_id, "WhatsApp message accepted");
        Ok(SendReceipt {
            provider_message_id,
        })
    }
}
