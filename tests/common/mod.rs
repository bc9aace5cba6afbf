//! Shared harness for HTTP-level tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tower::ServiceExt;

use agriconnect_server::app::{build_state, Collaborators};
use agriconnect_server::config::Config;
use agriconnect_server::gateway::{
    Delivery, GatewayError, GatewayRequest, NotificationSender, PaymentGateway,
    SimulatedPaymentGateway,
};
use agriconnect_server::middleware::{RateLimiter, WEBHOOK_SECRET_HEADER};
use agriconnect_server::models::Money;
use agriconnect_server::routes::{app_router, HttpOptions};
use agriconnect_server::state::AppState;

pub const ADMIN_PHONE: &str = "254700000001";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Records every SMS instead of sending it
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn messages_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(p, _)| p == phone)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, phone: &str, message: &str) -> Result<Delivery, GatewayError> {
        self.sent.lock().push((phone.to_string(), message.to_string()));
        Ok(Delivery {
            provider_ref: "recorded".to_string(),
        })
    }
}

/// Simulated gateway that takes a while to answer, so concurrent callers
/// overlap inside the gateway call
pub struct SlowGateway {
    pub inner: SimulatedPaymentGateway,
    pub delay: Duration,
    failure: Mutex<Option<GatewayError>>,
}

impl SlowGateway {
    /// Answer every request with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<GatewayError>) {
        *self.failure.lock() = error;
    }

    async fn answer(&self) -> Result<(), GatewayError> {
        tokio::time::sleep(self.delay).await;
        match self.failure.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for SlowGateway {
    async fn initiate_collection(
        &self,
        payer_ref: &str,
        amount: Money,
        account_ref: &str,
    ) -> Result<GatewayRequest, GatewayError> {
        self.answer().await?;
        self.inner.initiate_collection(payer_ref, amount, account_ref).await
    }

    async fn initiate_payout(
        &self,
        payee_ref: &str,
        amount: Money,
        remarks: &str,
    ) -> Result<GatewayRequest, GatewayError> {
        self.answer().await?;
        self.inner.initiate_payout(payee_ref, amount, remarks).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<SlowGateway>,
    pub sms: Arc<RecordingSender>,
}

pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut pairs: Vec<(String, String)> = vec![
        ("ENVIRONMENT".into(), "development".into()),
        ("OTP_ECHO_IN_RESPONSE".into(), "true".into()),
        ("ADMIN_PHONES".into(), ADMIN_PHONE.into()),
        ("WEBHOOK_SECRET".into(), WEBHOOK_SECRET.into()),
        ("RATE_LIMIT_RPS".into(), "10000".into()),
        ("ENCRYPTION_KEY".into(), "11".repeat(32)),
        ("JWT_ACCESS_SECRET".into(), "test-access".into()),
        ("JWT_REFRESH_SECRET".into(), "test-refresh".into()),
    ];
    for (k, v) in extra {
        pairs.retain(|(key, _)| key != k);
        pairs.push((k.to_string(), v.to_string()));
    }
    Config::from_lookup(move |key| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .unwrap()
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(&[], Duration::ZERO)
}

pub fn spawn_app_with(extra: &[(&str, &str)], gateway_delay: Duration) -> TestApp {
    let config = test_config(extra);
    let sms = Arc::new(RecordingSender::default());
    let gateway = Arc::new(SlowGateway {
        inner: SimulatedPaymentGateway::new(),
        delay: gateway_delay,
        failure: Mutex::new(None),
    });
    let collaborators = Collaborators::in_memory(sms.clone(), gateway.clone());
    let state = build_state(&config, &collaborators).unwrap();
    let router = app_router(
        state.clone(),
        RateLimiter::new(config.rate_limit_rps),
        &HttpOptions {
            webhook_secret: config.webhook_secret.clone(),
            cors_allowed_origins: None,
            hsts: false,
        },
    );
    TestApp {
        router,
        state,
        gateway,
        sms,
    }
}

impl TestApp {
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send(method, uri, token, body, &[]).await
    }

    pub async fn webhook(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            uri,
            None,
            Some(body),
            &[(WEBHOOK_SECRET_HEADER, WEBHOOK_SECRET)],
        )
        .await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    /// Deliver a webhook whose body is sent byte for byte
    pub async fn webhook_raw(&self, uri: &str, body: &'static str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(WEBHOOK_SECRET_HEADER, WEBHOOK_SECRET)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    /// Register through the API and return the token response
    pub async fn register(&self, phone: &str, role: &str) -> Value {
        let (status, issued) = self
            .call(
                Method::POST,
                "/api/auth/register/init",
                None,
                Some(json!({ "phone": phone })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", issued);
        let otp = issued["otp"].as_str().unwrap().to_string();

        let (status, tokens) = self
            .call(
                Method::POST,
                "/api/auth/register/complete",
                None,
                Some(json!({
                    "phone": phone,
                    "otp": otp,
                    "email": format!("{}@agri.test", phone),
                    "fullNames": format!("User {}", &phone[phone.len() - 4..]),
                    "nationalId": format!("ID{}", &phone[3..]),
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", tokens);
        tokens
    }

    /// Upload a document for `user_token` and have the admin verify it
    pub async fn complete_kyc(&self, user_token: &str, admin_token: &str) {
        let image = base64::engine::general_purpose::STANDARD.encode(b"front-image-bytes");
        let (status, document) = self
            .call(
                Method::POST,
                "/api/kyc/documents",
                Some(user_token),
                Some(json!({
                    "documentType": "national_id",
                    "frontImage": image,
                    "documentNumber": "12345678",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", document);
        let document_id = document["id"].as_str().unwrap().to_string();

        let (status, verified) = self
            .call(
                Method::POST,
                &format!("/api/admin/kyc/{}/verify", document_id),
                Some(admin_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", verified);
    }

    pub fn payouts(&self) -> usize {
        self.gateway
            .inner
            .requests()
            .iter()
            .filter(|r| r.kind == "payout")
            .count()
    }

    pub fn collections(&self) -> usize {
        self.gateway
            .inner
            .requests()
            .iter()
            .filter(|r| r.kind == "collection")
            .count()
    }
}

pub fn token(tokens: &Value) -> String {
    tokens["accessToken"].as_str().unwrap().to_string()
}
