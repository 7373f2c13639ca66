//! # SMS Notifier
//!
//! Sends order notifications through the third-party SMS gateway.
//!
//! ```text
//! SmsRequest ─► validate ─► payload {to, from, message, nonce, timestamp}
//!                               │
//!                               ▼
//!                     PayloadSigner::sign ─► x-signature header
//!                               │
//!                               ▼
//!                        POST sms.endpoint
//!                               │
//!               ┌───────────────┴───────────────┐
//!               ▼                               ▼
//!          Delivered                  Failed(reason) + row in sms_failures
//! ```
//!
//! Delivery problems never propagate; only a broken failure log does.
//! [`SmsNotifier::notify_detached`] runs the whole thing on its own task so
//! order handling never waits on the gateway.

use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use farmshop_core::validation::{validate_phone_number, validate_sms_message};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Request, Transport};

const SIGNATURE_HEADER: &str = "x-signature";

/// Signs gateway payloads. The algorithm belongs to the SMS provider.
pub trait PayloadSigner: Send + Sync {
    fn sign(&self, payload: &str) -> SyncResult<String>;
}

/// One notification to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsRequest {
    pub phone_number: String,
    pub message: String,
    pub order_id: Option<String>,
}

impl SmsRequest {
    pub fn new(phone_number: impl Into<String>, message: impl Into<String>) -> Self {
        SmsRequest {
            phone_number: phone_number.into(),
            message: message.into(),
            order_id: None,
        }
    }

    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

/// How a notification ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsOutcome {
    Delivered,
    /// Not delivered; the reason is also in the SMS failure log.
    Failed(String),
}

impl SmsOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SmsOutcome::Delivered)
    }
}

/// Sends signed SMS notifications and logs the ones that fail.
pub struct SmsNotifier {
    ctx: Arc<SyncContext>,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn PayloadSigner>,
}

impl SmsNotifier {
    pub fn new(
        ctx: Arc<SyncContext>,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn PayloadSigner>,
    ) -> Self {
        SmsNotifier {
            ctx,
            transport,
            signer,
        }
    }

    /// Sends one notification.
    ///
    /// Returns `Err` only when the failure could not be recorded.
    pub async fn notify(&self, request: &SmsRequest) -> SyncResult<SmsOutcome> {
        match self.deliver(request).await {
            Ok(()) => {
                info!(order_id = ?request.order_id, "SMS delivered");
                Ok(SmsOutcome::Delivered)
            }
            Err(e) if e.is_storage() => Err(e),
            Err(e) => {
                let reason = e.to_string();
                self.ctx
                    .db()
                    .sms_log()
                    .record_failure(
                        request.order_id.as_deref(),
                        &request.phone_number,
                        &request.message,
                        &reason,
                    )
                    .await?;
                Ok(SmsOutcome::Failed(reason))
            }
        }
    }

    /// Sends one notification on a background task.
    pub fn notify_detached(self: &Arc<Self>, request: SmsRequest) -> JoinHandle<()> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&request).await {
                error!(order_id = ?request.order_id, error = %e, "Could not record SMS failure");
            }
        })
    }

    async fn deliver(&self, request: &SmsRequest) -> SyncResult<()> {
        let phone = validate_phone_number(&request.phone_number)?;
        validate_sms_message(&request.message)?;

        let sms = &self.ctx.config().sms;
        let endpoint = sms
            .endpoint
            .as_deref()
            .ok_or_else(|| SyncError::SmsFailed("no SMS gateway configured".into()))?;

        let payload = json!({
            "to": phone,
            "from": sms.sender,
            "message": request.message,
            "nonce": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().timestamp(),
        });

        let signature = self.signer.sign(&payload.to_string())?;
        let signature = HeaderValue::from_str(&signature)
            .map_err(|e| SyncError::SigningFailed(format!("unusable signature: {}", e)))?;

        let response = self
            .transport
            .send(
                Request::post(endpoint, payload)
                    .with_header(HeaderName::from_static(SIGNATURE_HEADER), signature),
            )
            .await?;

        if !response.is_success() {
            warn!(status = response.status.as_u16(), "SMS gateway refused message");
            return Err(SyncError::SmsFailed(format!(
                "gateway answered HTTP {}",
                response.status.as_u16()
            )));
        }

        Ok(())
    }
}
