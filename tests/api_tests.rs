mod common;

use axum::http::StatusCode;
use common::{Client, TEST_PASSWORD, spawn_app, spawn_app_with};
use serde_json::json;
use terraintrack::config::SessionStoreKind;

#[tokio::test]
async fn test_health_is_public() {
    let app = spawn_app().await;
    let mut client = Client::default();

    let response = app.request(&mut client, "GET", "/api/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["status"], "ok");
    assert_eq!(response.body["data"]["database"], true);
}

#[tokio::test]
async fn test_protected_routes_require_login() {
    let app = spawn_app().await;
    let mut client = Client::default();

    let response = app.request(&mut client, "GET", "/api/vehicles", None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["success"], false);

    let response = app
        .request_with(
            &mut client,
            "GET",
            "/api/auth/me",
            None,
            &[("Accept", "text/html")],
        )
        .await;
    assert!(response.status.is_redirection());
    assert_eq!(response.location.as_deref(), Some("/login"));
}

#[tokio::test]
async fn test_invalid_credentials_are_indistinguishable() {
    let app = spawn_app().await;
    app.create_user("tech@terraintrack.local", &["technician"])
        .await;

    let mut client = Client::default();
    let wrong_password = app
        .login(&mut client, "tech@terraintrack.local", "not-the-password")
        .await;
    let unknown_user = app
        .login(&mut client, "ghost@terraintrack.local", TEST_PASSWORD)
        .await;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.body["error"], unknown_user.body["error"]);
}

#[tokio::test]
async fn test_login_exposes_role_permissions() {
    let app = spawn_app().await;
    app.create_user("tech@terraintrack.local", &["technician"])
        .await;
    let mut client = app.logged_in_as("tech@terraintrack.local").await;

    let response = app.request(&mut client, "GET", "/api/auth/me", None).await;
    assert_eq!(response.status, StatusCode::OK);

    let data = &response.body["data"];
    assert_eq!(data["user"]["email"], "tech@terraintrack.local");
    assert_eq!(data["roles"][0]["name"], "technician");
    assert_eq!(data["two_factor_required"], false);

    let permissions: Vec<&str> = data["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p.as_str())
        .collect();
    assert!(permissions.contains(&"vehicles.view"));
    assert!(!permissions.contains(&"vehicles.create"));
}

#[tokio::test]
async fn test_unsafe_requests_need_csrf_token() {
    let app = spawn_app().await;
    let user_id = app
        .create_user("tech@terraintrack.local", &["technician"])
        .await;
    app.state
        .shared
        .permission_service
        .grant_permission_to_user(user_id, "vehicles.create")
        .await
        .unwrap();

    let client = app.logged_in_as("tech@terraintrack.local").await;
    let mut no_csrf = Client {
        cookie: client.cookie.clone(),
        csrf: None,
    };

    let body = json!({ "registration": "TT-100", "brand": "Toyota", "model": "Hilux" });
    let response = app
        .request(&mut no_csrf, "POST", "/api/vehicles", Some(body.clone()))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    assert_eq!(response.body["error"], "Invalid CSRF token");

    let mut wrong_csrf = Client {
        cookie: client.cookie.clone(),
        csrf: Some("forged".to_string()),
    };
    let response = app
        .request(&mut wrong_csrf, "POST", "/api/vehicles", Some(body))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_missing_permission_is_forbidden() {
    let app = spawn_app().await;
    app.create_user("viewer@terraintrack.local", &["viewer"])
        .await;
    let mut client = app.logged_in_as("viewer@terraintrack.local").await;

    let response = app.request(&mut client, "GET", "/api/vehicles", None).await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .request(
            &mut client,
            "POST",
            "/api/vehicles",
            Some(json!({ "registration": "TT-100", "brand": "Toyota", "model": "Hilux" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app.request(&mut client, "GET", "/api/admin/users", None).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_vehicle_lifecycle() {
    let app = spawn_app().await;
    let user_id = app
        .create_user("tech@terraintrack.local", &["technician"])
        .await;
    for permission in ["vehicles.create", "vehicles.delete"] {
        app.state
            .shared
            .permission_service
            .grant_permission_to_user(user_id, permission)
            .await
            .unwrap();
    }
    let mut client = app.logged_in_as("tech@terraintrack.local").await;

    let response = app
        .request(
            &mut client,
            "POST",
            "/api/vehicles",
            Some(json!({
                "registration": "tt-100",
                "brand": "Toyota",
                "model": "Hilux",
                "year": 2019
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["registration"], "TT-100");
    assert_eq!(response.body["data"]["status"], "available");
    let id = response.body["data"]["id"].as_i64().unwrap();

    let response = app
        .request(
            &mut client,
            "POST",
            "/api/vehicles",
            Some(json!({ "registration": "TT-100", "brand": "Ford", "model": "Ranger" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .request(
            &mut client,
            "PUT",
            &format!("/api/vehicles/{id}"),
            Some(json!({
                "registration": "TT-100",
                "brand": "Toyota",
                "model": "Hilux",
                "year": 2019,
                "status": "maintenance"
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["status"], "maintenance");

    let response = app
        .request(
            &mut client,
            "PUT",
            &format!("/api/vehicles/{id}"),
            Some(json!({
                "registration": "TT-100",
                "brand": "Toyota",
                "model": "Hilux",
                "status": "sunk"
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .request(&mut client, "DELETE", &format!("/api/vehicles/{id}"), None)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app
        .request(&mut client, "GET", &format!("/api/vehicles/{id}"), None)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = spawn_app().await;
    app.create_user("tech@terraintrack.local", &["technician"])
        .await;
    let mut client = app.logged_in_as("tech@terraintrack.local").await;
    let stale_cookie = client.cookie.clone();

    let response = app.request(&mut client, "POST", "/api/auth/logout", None).await;
    assert_eq!(response.status, StatusCode::OK);

    let mut replay = Client {
        cookie: stale_cookie,
        csrf: client.csrf.clone(),
    };
    let response = app.request(&mut replay, "GET", "/api/auth/me", None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_timeout_preference() {
    let app = spawn_app().await;
    app.create_user("tech@terraintrack.local", &["technician"])
        .await;
    let mut client = app.logged_in_as("tech@terraintrack.local").await;

    let response = app
        .request(
            &mut client,
            "POST",
            "/api/settings/security/update-session-timeout",
            Some(json!({ "minutes": 2 })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .request(
            &mut client,
            "POST",
            "/api/settings/security/update-session-timeout",
            Some(json!({ "minutes": 90 })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["session_timeout_minutes"], 90);
}

#[tokio::test]
async fn test_change_password() {
    let app = spawn_app().await;
    app.create_user("tech@terraintrack.local", &["technician"])
        .await;
    let mut client = app.logged_in_as("tech@terraintrack.local").await;

    let response = app
        .request(
            &mut client,
            "PUT",
            "/api/auth/password",
            Some(json!({
                "current_password": TEST_PASSWORD,
                "new_password": "new-field-notes-1",
                "confirm_password": "something-else"
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .request(
            &mut client,
            "PUT",
            "/api/auth/password",
            Some(json!({
                "current_password": TEST_PASSWORD,
                "new_password": "new-field-notes-1",
                "confirm_password": "new-field-notes-1"
            })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let mut fresh = Client::default();
    let response = app
        .login(&mut fresh, "tech@terraintrack.local", "new-field-notes-1")
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_sqlite_session_store() {
    let app = spawn_app_with(|config| config.server.session_store = SessionStoreKind::Sqlite).await;
    app.create_user("tech@terraintrack.local", &["technician"])
        .await;
    let mut client = app.logged_in_as("tech@terraintrack.local").await;

    let response = app.request(&mut client, "GET", "/api/auth/me", None).await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app.request(&mut client, "POST", "/api/auth/logout", None).await;
    assert_eq!(response.status, StatusCode::OK);

    let response = app.request(&mut client, "GET", "/api/auth/me", None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}
