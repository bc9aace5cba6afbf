//! Full marketplace flow: onboarding, KYC, order, payment and payout

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{spawn_app, token, ADMIN_PHONE};

#[tokio::test]
async fn test_order_to_payout() {
    let app = spawn_app();

    let (status, health) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["database"], "in-memory");

    let admin = token(&app.register(ADMIN_PHONE, "admin").await);
    let buyer_tokens = app.register("254712345678", "buyer").await;
    let seller_tokens = app.register("254798765432", "farmer").await;
    let buyer = token(&buyer_tokens);
    let seller = token(&seller_tokens);
    assert_eq!(buyer_tokens["identity"]["canTransact"], false);

    app.complete_kyc(&buyer, &admin).await;
    let (_, me) = app.call(Method::GET, "/api/auth/me", Some(&buyer), None).await;
    assert_eq!(me["identity"]["kycStatus"], "kyc_verified");
    assert_eq!(me["identity"]["canTransact"], true);
    app.complete_kyc(&seller, &admin).await;

    // Open the order
    let (status, order) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(&buyer),
            Some(json!({
                "sellerId": seller_tokens["identity"]["id"],
                "listingId": "2f1c4a8e-6b0d-4f7e-9a1b-3c5d7e9f1a2b",
                "totalAmount": 100_000,
                "deliveryFee": 5_000,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", order);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["paymentStatus"], "pending");
    assert_eq!(order["version"], 0);
    let financials = &order["financials"];
    assert_eq!(financials["platformCommission"], 8_000);
    assert_eq!(financials["fixedFee"], 5_000);
    assert_eq!(financials["grossPlatformRevenue"], 13_000);
    assert_eq!(financials["vatOnFees"], 2_080);
    assert_eq!(financials["netPlatformRevenue"], 10_920);
    assert_eq!(financials["netToSeller"], 82_000);
    let order_id = order["id"].as_str().unwrap().to_string();

    // The seller cannot pay for the buyer's order
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/orders/{}/collect", order_id),
            Some(&seller),
            Some(json!({ "payerReference": "254798765432" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Collect from the buyer's wallet
    let (status, handle) = app
        .call(
            Method::POST,
            &format!("/api/orders/{}/collect", order_id),
            Some(&buyer),
            Some(json!({ "payerReference": "254712345678" })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", handle);
    assert_eq!(handle["amount"], 100_000);
    let collection_request = handle["gatewayRequestId"].as_str().unwrap().to_string();

    let callback = json!({
        "gatewayTransactionId": "QK7E2E0001",
        "gatewayRequestId": collection_request,
        "outcome": "success",
        "accountRef": order_id,
    });
    let (status, ack) = app
        .webhook("/api/payments/callback/collection", callback.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["applied"], true);

    // Redelivery is acknowledged but not applied
    let (status, ack) = app
        .webhook("/api/payments/callback/collection", callback)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["applied"], false);
    assert_eq!(ack["detail"], "duplicate event");

    let (_, view) = app
        .call(Method::GET, &format!("/api/orders/{}", order_id), Some(&seller), None)
        .await;
    assert_eq!(view["paymentStatus"], "paid");
    assert_eq!(view["paymentTransactionId"], "QK7E2E0001");
    assert_eq!(view["settlement"]["state"], "held");
    assert_eq!(view["settlement"]["netToSeller"], 82_000);

    // Buyer confirms delivery, admin releases
    let (status, completed) = app
        .call(
            Method::POST,
            &format!("/api/orders/{}/complete", order_id),
            Some(&buyer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", completed);
    assert_eq!(completed["status"], "completed");

    let (status, settlement) = app
        .call(
            Method::POST,
            &format!("/api/orders/{}/release", order_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", settlement);
    assert_eq!(settlement["state"], "release_pending");
    assert_eq!(settlement["netToSeller"], 82_000);
    assert_eq!(app.payouts(), 1);

    let payout = app
        .gateway
        .inner
        .requests()
        .into_iter()
        .find(|r| r.kind == "payout")
        .unwrap();
    assert_eq!(payout.party_ref, "254798765432");
    assert_eq!(payout.amount.minor(), 82_000);

    let (status, ack) = app
        .webhook(
            "/api/payments/callback/payout",
            json!({
                "gatewayTransactionId": "B2C-E2E-0001",
                "gatewayRequestId": settlement["payoutRequestId"],
                "outcome": "success",
                "accountRef": order_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["applied"], true);

    let (_, view) = app
        .call(Method::GET, &format!("/api/orders/{}", order_id), Some(&buyer), None)
        .await;
    assert_eq!(view["settlement"]["state"], "released");
    assert!(view["settlement"]["releasedAt"].is_string());

    // Releasing again is a no-op
    let (status, again) = app
        .call(
            Method::POST,
            &format!("/api/orders/{}/release", order_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["state"], "released");
    assert_eq!(app.payouts(), 1);

    // Outsiders cannot see the order
    let outsider = token(&app.register("254733111222", "buyer").await);
    let (status, _) = app
        .call(Method::GET, &format!("/api/orders/{}", order_id), Some(&outsider), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
