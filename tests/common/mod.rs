#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use terraintrack::api::AppState;
use terraintrack::config::Config;
use terraintrack::services::CreateUser;
use tower::ServiceExt;

pub const TEST_PASSWORD: &str = "field-notes-2024";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

/// Cookie and CSRF token of one browser session.
#[derive(Clone, Default)]
pub struct Client {
    pub cookie: Option<String>,
    pub csrf: Option<String>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub location: Option<String>,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Like [`spawn_app`], with a hook to adjust the config first.
pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let db_path = std::env::temp_dir().join(format!(
        "terraintrack-it-{}.db",
        uuid::Uuid::new_v4()
    ));

    let mut config = Config::default();
    config.general.database_path = format!("sqlite:{}", db_path.display());
    config.server.secure_cookies = false;
    configure(&mut config);

    let state = terraintrack::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");
    let router = terraintrack::api::router(state.clone())
        .await
        .expect("Failed to build router");

    TestApp { router, state }
}

impl TestApp {
    pub async fn request(
        &self,
        client: &mut Client,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> TestResponse {
        self.request_with(client, method, uri, body, &[]).await
    }

    /// Send a request carrying the client's cookie and CSRF header, and keep
    /// whatever session cookie the server hands back.
    pub async fn request_with(
        &self,
        client: &mut Client,
        method: &str,
        uri: &str,
        body: Option<Value>,
        extra_headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(cookie) = &client.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        if let Some(csrf) = &client.csrf {
            builder = builder.header("X-CSRF-Token", csrf);
        }
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();

        if let Some(set_cookie) = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter(|v| v.starts_with("id="))
            .last()
        {
            let pair = set_cookie.split(';').next().unwrap_or_default();
            client.cookie = Some(pair.to_string());
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            body,
            location,
        }
    }

    /// POST /api/auth/login and remember the CSRF token handed back.
    pub async fn login(&self, client: &mut Client, email: &str, password: &str) -> TestResponse {
        let response = self
            .request(
                client,
                "POST",
                "/api/auth/login",
                Some(serde_json::json!({ "email": email, "password": password })),
            )
            .await;

        if let Some(token) = response.body["data"]["csrf_token"].as_str() {
            client.csrf = Some(token.to_string());
        }
        response
    }

    /// Create a non-admin account holding the named roles.
    pub async fn create_user(&self, email: &str, roles: &[&str]) -> i32 {
        let mut role_ids = Vec::new();
        for name in roles {
            let role = self
                .state
                .store()
                .get_role_by_name(name)
                .await
                .unwrap()
                .expect("seeded role");
            role_ids.push(role.id);
        }

        self.state
            .shared
            .auth_service
            .create_user(CreateUser {
                email: email.to_string(),
                name: "Field Tech".to_string(),
                password: TEST_PASSWORD.to_string(),
                is_admin: false,
                role_ids,
            })
            .await
            .unwrap()
            .id
    }

    pub async fn logged_in_as(&self, email: &str) -> Client {
        let mut client = Client::default();
        let response = self.login(&mut client, email, TEST_PASSWORD).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["data"]["status"], "authenticated");
        client
    }
}
