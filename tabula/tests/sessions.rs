// Session cookie handling, driven through the in-process test client.

use axum::http::StatusCode;
use serde_json::{json, Value};
use tabula::testing::TestClient;
use tabula::views::SESSION_COOKIE;
use tabula::{EditorConf, Site, WarehouseConf};

fn site() -> Site {
    let conf = EditorConf {
        catalog: "main".into(),
        schema: "configurations".into(),
        log_init: false,
        warehouse: WarehouseConf {
            warehouse_id: "abc123".into(),
            port: 1,
            acquire_timeout_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    Site::builder(conf).build().expect("Failed to build site")
}

#[tokio::test]
async fn test_first_request_issues_session_cookie() {
    let site = site();
    let client = TestClient::new(site.clone());

    let response = client
        .put("/api/tables/users/edits")
        .json(&json!({ "rows": [] }))
        .send()
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let id = response.cookie(SESSION_COOKIE).expect("session cookie");
    assert!(uuid::Uuid::parse_str(&id).is_ok());
    assert_eq!(site.sessions().len(), 1);
}

#[tokio::test]
async fn test_known_session_is_reused() {
    let site = site();
    let client = TestClient::new(site.clone());
    let id = uuid::Uuid::new_v4().to_string();

    for _ in 0..2 {
        let response = client
            .post("/api/tables/users/save")
            .forwarded_user("ada@example.com", "user-token")
            .session(&id)
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.cookie(SESSION_COOKIE).is_none());
    }
    assert_eq!(site.sessions().len(), 1);
}

#[tokio::test]
async fn test_forwarded_users_get_their_own_pool() {
    let site = site();
    let client = TestClient::new(site.clone());

    for (email, token) in [("ada@example.com", "a"), ("bob@example.com", "b"), ("ada@example.com", "a")] {
        let response = client
            .get("/api/tables")
            .forwarded_user(email, token)
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: Value = response.json().await;
        assert_eq!(body["error"], "load_error");
    }
    assert_eq!(site.connector().pool_count(), 2);
}

#[tokio::test]
async fn test_malformed_edits_are_rejected() {
    let client = TestClient::new(site());
    let response = client
        .put("/api/tables/users/edits")
        .json(&json!({ "rows": "not a list" }))
        .send()
        .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_missing_credential_body() {
    let client = TestClient::new(site());
    client
        .get("/api/tables")
        .send()
        .await
        .assert_json(
            StatusCode::UNAUTHORIZED,
            &json!({
                "error": "unauthorized",
                "message": "User token not found in request headers",
            }),
        )
        .await;
}

#[tokio::test]
async fn test_index_escapes_configured_title() {
    let mut conf = site().conf().clone();
    conf.title = "<b>Flags</b>".into();
    let client = TestClient::new(Site::builder(conf).build().unwrap());
    let body = client.get("/").send().await.text().await;
    assert!(body.contains("&lt;b&gt;Flags&lt;"));
    assert!(!body.contains("<b>Flags</b>"));
}
