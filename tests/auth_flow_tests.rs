//! Authentication flows over HTTP

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{spawn_app, token, ADMIN_PHONE};

#[tokio::test]
async fn test_register_then_me_reports_gate_closed() {
    let app = spawn_app();
    let tokens = app.register("254712000001", "buyer").await;

    assert_eq!(tokens["tokenType"], "Bearer");
    assert_eq!(tokens["identity"]["kycStatus"], "pending");
    assert_eq!(tokens["identity"]["status"], "pending_verification");
    assert_eq!(tokens["identity"]["isPhoneVerified"], true);

    let (status, me) = app
        .call(Method::GET, "/api/auth/me", Some(&token(&tokens)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["identity"]["canTransact"], false);
    assert_eq!(me["profile"]["fullNames"], "User 0001");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = spawn_app();

    let (status, body) = app.call(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "MISSING_TOKEN");

    let (status, body) = app
        .call(Method::GET, "/api/auth/me", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_login_with_otp() {
    let app = spawn_app();
    app.register("254712000002", "farmer").await;

    let (status, issued) = app
        .call(
            Method::POST,
            "/api/auth/login/init",
            None,
            Some(json!({ "phone": "254712000002" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let otp = issued["otp"].as_str().unwrap().to_string();
    assert_eq!(app.sms.messages_to("254712000002").len(), 2);

    let wrong = if otp == "000000" { "111111" } else { "000000" };
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/login/verify",
            None,
            Some(json!({ "phone": "254712000002", "otp": wrong })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, tokens) = app
        .call(
            Method::POST,
            "/api/auth/login/verify",
            None,
            Some(json!({ "phone": "254712000002", "otp": otp })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", tokens);
    assert!(tokens["identity"]["lastLogin"].is_string());

    // The code is single use
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/login/verify",
            None,
            Some(json!({ "phone": "254712000002", "otp": otp })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_init_does_not_reveal_unknown_phone() {
    let app = spawn_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login/init",
            None,
            Some(json!({ "phone": "254799999999" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body.get("otp").is_none());
    assert!(app.sms.messages_to("254799999999").is_empty());
}

#[tokio::test]
async fn test_otp_requests_are_rate_limited() {
    let app = spawn_app();
    for _ in 0..5 {
        let (status, _) = app
            .call(
                Method::POST,
                "/api/auth/register/init",
                None,
                Some(json!({ "phone": "254712000003" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register/init",
            None,
            Some(json!({ "phone": "254712000003" })),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "TOO_MANY_REQUESTS");
    assert_eq!(app.sms.messages_to("254712000003").len(), 5);
}

#[tokio::test]
async fn test_invalid_phone_is_a_validation_error() {
    let app = spawn_app();
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register/init",
            None,
            Some(json!({ "phone": "0712345678" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_one_winner() {
    let app = spawn_app();
    let tokens = app.register("254712000004", "buyer").await;
    let refresh = tokens["refreshToken"].as_str().unwrap().to_string();
    let body = json!({ "refreshToken": refresh });

    let (a, b) = tokio::join!(
        app.call(Method::POST, "/api/auth/refresh", None, Some(body.clone())),
        app.call(Method::POST, "/api/auth/refresh", None, Some(body.clone())),
    );

    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::UNAUTHORIZED]);

    let winner = if a.0 == StatusCode::OK { a.1 } else { b.1 };
    assert_ne!(winner["refreshToken"], refresh.as_str());
}

#[tokio::test]
async fn test_logout_revokes_both_tokens() {
    let app = spawn_app();
    let tokens = app.register("254712000005", "buyer").await;
    let access = token(&tokens);
    let refresh = tokens["refreshToken"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/logout",
            Some(&access),
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call(Method::GET, "/api/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "SESSION_REVOKED");

    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_role_requires_allow_listed_phone() {
    let app = spawn_app();
    let (_, issued) = app
        .call(
            Method::POST,
            "/api/auth/register/init",
            None,
            Some(json!({ "phone": "254712000006" })),
        )
        .await;
    let (status, _) = app
        .call(
            Method::POST,
            "/api/auth/register/complete",
            None,
            Some(json!({
                "phone": "254712000006",
                "otp": issued["otp"],
                "email": "mallory@agri.test",
                "fullNames": "Mallory",
                "nationalId": "ID99887766",
                "role": "admin",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.register(ADMIN_PHONE, "admin").await;
    assert_eq!(admin["identity"]["role"], "admin");
}

#[tokio::test]
async fn test_duplicate_national_id_is_a_conflict() {
    let app = spawn_app();
    app.register("254712000007", "buyer").await;

    let (_, issued) = app
        .call(
            Method::POST,
            "/api/auth/register/init",
            None,
            Some(json!({ "phone": "254712000008" })),
        )
        .await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register/complete",
            None,
            Some(json!({
                "phone": "254712000008",
                "otp": issued["otp"],
                "email": "other@agri.test",
                "fullNames": "Other User",
                "nationalId": "ID712000007",
                "role": "buyer",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
}

#[tokio::test]
async fn test_national_id_audit_is_admin_only() {
    let app = spawn_app();
    let admin = app.register(ADMIN_PHONE, "admin").await;
    let farmer = app.register("254712000008", "farmer").await;
    let uri = format!(
        "/api/admin/identities/{}/national-id",
        farmer["identity"]["id"].as_str().unwrap()
    );

    let (status, _) = app
        .call(Method::GET, &uri, Some(&token(&farmer)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call(Method::GET, &uri, Some(&token(&admin)), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["nationalId"], "ID712000008");
}
