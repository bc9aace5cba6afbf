//! External collaborators: SMS delivery, mobile-money gateway and document
//! storage.
//!
//! Services depend on these traits only. Callers bound every call with a
//! timeout; implementations do not retry.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Money;

/// Errors reported by external collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Request timed out")]
    Timeout,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Object not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Acknowledgement from the SMS provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub provider_ref: String,
}

/// Acknowledgement of an accepted collection or payout request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub gateway_request_id: String,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<Delivery, GatewayError>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the payer to approve a debit. The outcome arrives later as a
    /// collection callback carrying `account_ref`.
    async fn initiate_collection(
        &self,
        payer_ref: &str,
        amount: Money,
        account_ref: &str,
    ) -> Result<GatewayRequest, GatewayError>;

    /// Send funds to a payee. The outcome arrives later as a payout callback.
    async fn initiate_payout(
        &self,
        payee_ref: &str,
        amount: Money,
        remarks: &str,
    ) -> Result<GatewayRequest, GatewayError>;
}

#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, GatewayError>;

    async fn retrieve(&self, reference: &str) -> Result<Vec<u8>, GatewayError>;
}

/// Mask all but the last three digits of a phone number for logs
pub fn mask_phone(phone: &str) -> String {
    let keep = phone.len().saturating_sub(3);
    phone
        .char_indices()
        .map(|(i, c)| if i < keep { '*' } else { c })
        .collect()
}

/// Send a status message in the background. Failures are logged only.
pub fn notify_best_effort(
    sender: std::sync::Arc<dyn NotificationSender>,
    phone: String,
    message: String,
    timeout: Duration,
) {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, sender.send(&phone, &message)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(phone = %mask_phone(&phone), error = %e, "Notification failed")
            }
            Err(_) => tracing::warn!(phone = %mask_phone(&phone), "Notification timed out"),
        }
    });
}

/// Writes messages to the log instead of delivering them. Development only.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationSender;

#[async_trait]
impl NotificationSender for LogNotificationSender {
    async fn send(&self, phone: &str, message: &str) -> Result<Delivery, GatewayError> {
        tracing::info!(phone = %mask_phone(phone), %message, "SMS (log sender)");
        Ok(Delivery {
            provider_ref: format!("log-{}", Uuid::new_v4()),
        })
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    phone: &'a str,
    message: &'a str,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayAck {
    #[serde(default)]
    message_id: Option<String>,
}

/// Posts messages to an HTTP SMS relay
pub struct HttpNotificationSender {
    relay_url: String,
    client: Client,
}

impl HttpNotificationSender {
    pub fn new(relay_url: String, timeout: Duration) -> Self {
        Self {
            relay_url,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    async fn send(&self, phone: &str, message: &str) -> Result<Delivery, GatewayError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(&RelayMessage { phone, message })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Rejected(format!(
                "relay responded {}",
                response.status()
            )));
        }

        let ack: RelayAck = response.json().await.unwrap_or(RelayAck { message_id: None });
        Ok(Delivery {
            provider_ref: ack
                .message_id
                .unwrap_or_else(|| format!("relay-{}", Uuid::new_v4())),
        })
    }
}

/// A request accepted by [`SimulatedPaymentGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedRequest {
    pub kind: &'static str,
    pub party_ref: String,
    pub amount: Money,
    pub reference: String,
    pub gateway_request_id: String,
}

/// Accepts every request and remembers it. Outcomes are delivered by
/// posting callbacks to the webhook endpoints.
#[derive(Debug, Default)]
pub struct SimulatedPaymentGateway {
    requests: Mutex<Vec<SimulatedRequest>>,
}

impl SimulatedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<SimulatedRequest> {
        self.requests.lock().clone()
    }

    fn accept(&self, kind: &'static str, party_ref: &str, amount: Money, reference: &str) -> GatewayRequest {
        let prefix = if kind == "collection" { "CO" } else { "PO" };
        let gateway_request_id = format!("sim_{}_{}", prefix, Uuid::new_v4().simple());
        tracing::info!(
            kind,
            amount = %amount,
            reference,
            gateway_request_id = %gateway_request_id,
            "Simulated gateway accepted request"
        );
        self.requests.lock().push(SimulatedRequest {
            kind,
            party_ref: party_ref.to_string(),
            amount,
            reference: reference.to_string(),
            gateway_request_id: gateway_request_id.clone(),
        });
        GatewayRequest { gateway_request_id }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn initiate_collection(
        &self,
        payer_ref: &str,
        amount: Money,
        account_ref: &str,
    ) -> Result<GatewayRequest, GatewayError> {
        Ok(self.accept("collection", payer_ref, amount, account_ref))
    }

    async fn initiate_payout(
        &self,
        payee_ref: &str,
        amount: Money,
        remarks: &str,
    ) -> Result<GatewayRequest, GatewayError> {
        if !amount.is_positive() {
            return Err(GatewayError::Rejected("payout amount must be positive".to_string()));
        }
        Ok(self.accept("payout", payee_ref, amount, remarks))
    }
}

/// Object storage held in memory
#[derive(Debug, Default)]
pub struct InMemoryDocumentStorage {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryDocumentStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStorage for InMemoryDocumentStorage {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, GatewayError> {
        let reference = format!("kyc/{}", Uuid::new_v4());
        self.objects.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn retrieve(&self, reference: &str) -> Result<Vec<u8>, GatewayError> {
        self.objects
            .get(reference)
            .map(|o| o.value().clone())
            .ok_or_else(|| GatewayError::NotFound(reference.to_string()))
    }
}

/// Object storage on a local or mounted directory, one file per object
#[derive(Debug, Clone)]
pub struct FsDocumentStorage {
    root: PathBuf,
}

impl FsDocumentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// References are `kyc/<uuid>`; anything else cannot name a file here
    fn path_for(&self, reference: &str) -> Result<PathBuf, GatewayError> {
        let id = reference
            .strip_prefix("kyc/")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| GatewayError::NotFound(reference.to_string()))?;
        Ok(self.root.join(id.to_string()))
    }
}

fn io_error(reference: &str, e: std::io::Error) -> GatewayError {
    match e.kind() {
        std::io::ErrorKind::NotFound => GatewayError::NotFound(reference.to_string()),
        _ => GatewayError::Transport(e.to_string()),
    }
}

#[async_trait]
impl DocumentStorage for FsDocumentStorage {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, GatewayError> {
        let reference = format!("kyc/{}", Uuid::new_v4());
        let path = self.path_for(&reference)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&reference, e))?;
        // Write aside and rename so readers never see a partial image
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| io_error(&reference, e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| io_error(&reference, e))?;
        tracing::debug!(reference = %reference, size = bytes.len(), "Document stored");
        Ok(reference)
    }

    async fn retrieve(&self, reference: &str) -> Result<Vec<u8>, GatewayError> {
        let path = self.path_for(reference)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| io_error(reference, e))
    }
}
