use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, StatusCode, header},
};
use bytes::Bytes;
use futures::stream;
use http_body_util::BodyExt;
use image_gateway::{
    config::{AppConfig, CounterBackend},
    db,
    routes::routes,
    state::AppState,
};
use serde_json::{Value, json};
use std::{io, sync::Arc};
use tempfile::{TempDir, tempdir};
use tower::ServiceExt;

const TOKEN: &str = "s3cret";
const BOUNDARY: &str = "gateway-test-boundary";

struct Harness {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

async fn harness_with(tweak: impl FnOnce(&mut AppConfig)) -> Harness {
    let dir = tempdir().unwrap();
    let mut cfg = AppConfig {
        storage_dir: dir.path().join("objects").display().to_string(),
        database_url: format!("sqlite://{}", dir.path().join("meta.db").display()),
        auth_token: Some(TOKEN.into()),
        public_url: "https://img.example.com".into(),
        counter_backend: CounterBackend::Memory,
        ..AppConfig::default()
    };
    tweak(&mut cfg);

    let pool = db::connect(&cfg.database_url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let state = AppState::new(&cfg, Arc::new(pool));
    Harness {
        app: routes::app(state.clone()),
        state,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

fn multipart_body(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (filename, content_type, bytes) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(client: &str, files: &[(&str, &str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/rest/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header("x-forwarded-for", client)
        .body(Body::from(multipart_body(files)))
        .unwrap()
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

async fn body_bytes(resp: Response<Body>) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(resp: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn upload_one(app: &Router, filename: &str, content_type: &str, bytes: &[u8]) -> String {
    let resp = send(app, upload_request("10.0.0.1", &[(filename, content_type, bytes)])).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    json["data"]["accepted"][0]["key"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn uploaded_image_is_served_back() {
    let h = harness().await;
    let bytes = pattern(200);

    let resp = send(&h.app, upload_request("10.0.0.1", &[("cat.png", "image/png", bytes.as_slice())])).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["code"], 0);
    assert_eq!(json["message"], "");
    let item = &json["data"]["accepted"][0];
    let key = item["key"].as_str().unwrap();
    assert!(key.starts_with("png/") && key.ends_with(".png"), "{}", key);
    assert_eq!(item["size"], 200);
    assert_eq!(item["filename"], "cat.png");
    assert_eq!(item["url"], format!("/rest/{}", key));
    assert_eq!(item["externalUrl"], format!("https://img.example.com/{}", key));

    let resp = send(&h.app, get_request(&format!("/rest/{}", key), &[])).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "200");
    assert_eq!(resp.headers()[header::ACCEPT_RANGES], "bytes");
    assert!(resp.headers().get(header::CONTENT_RANGE).is_none());
    assert!(resp.headers().get(header::ETAG).is_some());
    assert_eq!(body_bytes(resp).await.as_ref(), bytes.as_slice());
}

#[tokio::test]
async fn batch_upload_keeps_going_past_rejected_items() {
    let h = harness().await;
    let files: [(&str, &str, &[u8]); 3] = [
        ("a.png", "image/png", b"first"),
        ("notes.txt", "text/plain", b"not an image"),
        ("c.jpg", "image/jpeg", b"third"),
    ];

    let resp = send(&h.app, upload_request("10.0.0.1", &files)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;

    let accepted = json["data"]["accepted"].as_array().unwrap();
    let errors = json["data"]["errors"].as_array().unwrap();
    assert_eq!(accepted.len(), 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(accepted[0]["filename"], "a.png");
    assert_eq!(accepted[1]["filename"], "c.jpg");
    assert!(accepted[1]["key"].as_str().unwrap().starts_with("jpg/"));
    assert!(errors[0].as_str().unwrap().contains("text/plain"));
    assert!(json["message"].as_str().unwrap().contains("text/plain"));
}

#[tokio::test]
async fn range_requests_return_partial_content() {
    let h = harness().await;
    let bytes = pattern(200);
    let key = upload_one(&h.app, "r.png", "image/png", &bytes).await;
    let uri = format!("/rest/{}", key);

    let resp = send(&h.app, get_request(&uri, &[("range", "bytes=0-99")])).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 0-99/200");
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "100");
    assert_eq!(body_bytes(resp).await.as_ref(), &bytes[..100]);

    let resp = send(&h.app, get_request(&uri, &[("range", "bytes=150-")])).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers()[header::CONTENT_RANGE], "bytes 150-199/200");
    assert_eq!(body_bytes(resp).await.as_ref(), &bytes[150..]);
}

#[tokio::test]
async fn unusable_ranges_fall_back_to_full_body() {
    let h = harness().await;
    let bytes = pattern(200);
    let key = upload_one(&h.app, "r.png", "image/png", &bytes).await;
    let uri = format!("/rest/{}", key);

    for range in ["bytes=oops", "bytes=0-10,20-30", "bytes=500-"] {
        let resp = send(&h.app, get_request(&uri, &[("range", range)])).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", range);
        assert!(resp.headers().get(header::CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(resp).await.len(), 200);
    }
}

#[tokio::test]
async fn matching_etag_is_not_modified() {
    let h = harness().await;
    let key = upload_one(&h.app, "e.gif", "image/gif", b"GIF89a").await;
    let uri = format!("/rest/{}", key);

    let first = send(&h.app, get_request(&uri, &[])).await;
    let etag = first.headers()[header::ETAG].to_str().unwrap().to_string();

    let resp = send(&h.app, get_request(&uri, &[("if-none-match", etag.as_str())])).await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(resp.headers()[header::ETAG], etag.as_str());
    assert!(body_bytes(resp).await.is_empty());

    let resp = send(&h.app, get_request(&uri, &[("if-none-match", "\"stale\"")])).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_object_is_not_found_envelope() {
    let h = harness().await;
    let resp = send(&h.app, get_request("/rest/png/missing.png", &[])).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = body_json(resp).await;
    assert_eq!(json["code"], 1005);
    assert!(json["data"].is_null());
}

#[tokio::test]
async fn protected_routes_distinguish_auth_failures() {
    let h = harness().await;
    let body = json!({ "limit": 5 });

    let resp = send(&h.app, json_request(Method::POST, "/rest/list", None, body.clone())).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let missing = body_json(resp).await;
    assert_eq!(missing["code"], 1001);

    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/list", Some("wrong"), body.clone()),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let wrong = body_json(resp).await;
    assert_eq!(wrong["code"], 1002);
    assert_ne!(missing["message"], wrong["message"]);

    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/list", Some(&format!("Bearer {}", TOKEN)), body),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&h.app, get_request("/rest/del/png/anything.png", &[])).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unconfigured_secret_is_reported_as_misconfiguration() {
    let h = harness_with(|cfg| cfg.auth_token = None).await;
    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/folder", Some("anything"), json!({ "name": "cats" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await["code"], 1003);
}

#[tokio::test]
async fn check_token_reports_match_without_failing() {
    let h = harness().await;
    for (token, expected) in [(TOKEN, true), ("nope", false), ("", false)] {
        let resp = send(
            &h.app,
            json_request(Method::POST, "/rest/checkToken", None, json!({ "token": token })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"], expected);
    }

    let req = Request::builder()
        .method(Method::POST)
        .uri("/rest/checkToken")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let json = body_json(send(&h.app, req).await).await;
    assert_eq!(json["data"], false);
}

#[tokio::test]
async fn folder_names_are_validated() {
    let h = harness().await;

    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/folder", Some(TOKEN), json!({ "name": "My-Folder" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], 1004);

    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/folder", Some(TOKEN), json!({ "name": "MyFolder" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"], "MyFolder/");

    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/list", Some(TOKEN), json!({})),
    )
    .await;
    let json = body_json(resp).await;
    assert_eq!(json["data"]["prefixes"], json!(["MyFolder/"]));
    assert_eq!(json["data"]["items"], json!([]));
}

#[tokio::test]
async fn deletes_are_idempotent() {
    let h = harness().await;
    let key = upload_one(&h.app, "d.png", "image/png", b"bye").await;

    let resp = send(
        &h.app,
        json_request(
            Method::DELETE,
            "/rest/",
            Some(TOKEN),
            json!({ "keys": format!("{}, ,never/existed.png,", key) }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["code"], 0);
    assert_eq!(json["data"]["deleted"], json!([key.clone(), "never/existed.png"]));
    assert_eq!(json["data"]["errors"], json!([]));

    let resp = send(&h.app, get_request(&format!("/rest/{}", key), &[])).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = send(
        &h.app,
        get_request("/rest/del/png/ghost.png", &[("authorization", TOKEN)]),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"], "png/ghost.png");

    let resp = send(
        &h.app,
        json_request(Method::DELETE, "/rest", Some(TOKEN), json!({ "keys": " , " })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_delete_answers_with_and_without_trailing_slash() {
    let h = harness().await;
    for uri in ["/rest", "/rest/"] {
        let key = upload_one(&h.app, "d.png", "image/png", b"bye").await;

        let resp = send(
            &h.app,
            json_request(Method::DELETE, uri, None, json!({ "keys": key.clone() })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body_json(resp).await["code"], 1001);

        let resp = send(
            &h.app,
            json_request(Method::DELETE, uri, Some(TOKEN), json!({ "keys": key.clone() })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        assert_eq!(body_json(resp).await["data"]["deleted"], json!([key.clone()]));

        let resp = send(&h.app, get_request(&format!("/rest/{}", key), &[])).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn unknown_routes_get_the_envelope() {
    let h = harness().await;
    for uri in ["/nope", "/api/upload"] {
        let resp = send(&h.app, get_request(uri, &[])).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        let json = body_json(resp).await;
        assert_eq!(json["code"], 1005);
        assert_eq!(json["message"], "route not found");
        assert!(json["data"].is_null());
    }
}

#[tokio::test]
async fn listing_pages_through_a_prefix() {
    let h = harness().await;
    for name in ["a", "b", "c"] {
        upload_one(&h.app, &format!("{}.png", name), "image/png", name.as_bytes()).await;
    }
    upload_one(&h.app, "x.gif", "image/gif", b"GIF89a").await;

    let resp = send(
        &h.app,
        json_request(Method::POST, "/rest/list", Some(TOKEN), json!({})),
    )
    .await;
    let root = body_json(resp).await;
    assert_eq!(root["data"]["prefixes"], json!(["gif/", "png/"]));
    assert_eq!(root["data"]["truncated"], false);

    let resp = send(
        &h.app,
        json_request(
            Method::POST,
            "/rest/list",
            Some(TOKEN),
            json!({ "delimiter": "png/", "limit": 2 }),
        ),
    )
    .await;
    let first = body_json(resp).await;
    assert_eq!(first["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(first["data"]["truncated"], true);
    let cursor = first["data"]["cursor"].as_str().unwrap().to_string();

    let resp = send(
        &h.app,
        json_request(
            Method::POST,
            "/rest/list",
            Some(TOKEN),
            json!({ "delimiter": "png/", "limit": 2, "cursor": cursor }),
        ),
    )
    .await;
    let second = body_json(resp).await;
    let items = second["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(second["data"]["truncated"], false);
    assert!(second["data"]["cursor"].is_null());

    let mut keys: Vec<String> = first["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .chain(items.iter())
        .map(|i| i["key"].as_str().unwrap().to_string())
        .collect();
    let sorted = {
        let mut k = keys.clone();
        k.sort();
        k
    };
    assert_eq!(keys, sorted);
    keys.dedup();
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn listing_limit_is_capped_at_one_hundred() {
    let h = harness().await;
    for i in 0..105 {
        h.state
            .storage
            .put_object_stream(
                &format!("bulk/{:03}.png", i),
                Some("image/png".into()),
                Some(1),
                stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"x"))]),
            )
            .await
            .unwrap();
    }

    let resp = send(
        &h.app,
        json_request(
            Method::POST,
            "/rest/list",
            Some(TOKEN),
            json!({ "delimiter": "bulk/", "limit": 1000 }),
        ),
    )
    .await;
    let json = body_json(resp).await;
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 100);
    assert_eq!(json["data"]["truncated"], true);

    let resp = send(
        &h.app,
        json_request(
            Method::POST,
            "/rest/list",
            Some(TOKEN),
            json!({ "delimiter": "bulk/", "limit": 0 }),
        ),
    )
    .await;
    let json = body_json(resp).await;
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn invalid_cursor_is_a_validation_error() {
    let h = harness().await;
    let resp = send(
        &h.app,
        json_request(
            Method::POST,
            "/rest/list",
            Some(TOKEN),
            json!({ "cursor": "%%%not-a-cursor" }),
        ),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], 1004);
}

#[tokio::test]
async fn uploads_are_limited_per_client() {
    let h = harness_with(|cfg| cfg.upload_rate_limit = 2).await;
    let file: [(&str, &str, &[u8]); 1] = [("a.png", "image/png", b"png")];

    for _ in 0..2 {
        let resp = send(&h.app, upload_request("203.0.113.9", &file)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = send(&h.app, upload_request("203.0.113.9", &file)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().get(header::RETRY_AFTER).is_some());
    assert_eq!(body_json(resp).await["code"], 1006);

    let resp = send(&h.app, upload_request("203.0.113.10", &file)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn uploads_are_limited_globally() {
    let h = harness_with(|cfg| cfg.global_rate_limit = 3).await;
    let file: [(&str, &str, &[u8]); 1] = [("a.png", "image/png", b"png")];

    for client in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        let resp = send(&h.app, upload_request(client, &file)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = send(&h.app, upload_request("198.51.100.4", &file)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn client_over_its_own_limit_does_not_spend_global_quota() {
    let h = harness_with(|cfg| {
        cfg.upload_rate_limit = 1;
        cfg.global_rate_limit = 2;
    })
    .await;
    let file: [(&str, &str, &[u8]); 1] = [("a.png", "image/png", b"png")];

    let resp = send(&h.app, upload_request("198.51.100.7", &file)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    for _ in 0..3 {
        let resp = send(&h.app, upload_request("198.51.100.7", &file)).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let resp = send(&h.app, upload_request("198.51.100.8", &file)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&h.app, upload_request("198.51.100.9", &file)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn sqlite_counters_back_the_limiter() {
    let h = harness_with(|cfg| {
        cfg.counter_backend = CounterBackend::Sqlite;
        cfg.upload_rate_limit = 1;
    })
    .await;
    let file: [(&str, &str, &[u8]); 1] = [("a.png", "image/png", b"png")];

    let resp = send(&h.app, upload_request("192.0.2.44", &file)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&h.app, upload_request("192.0.2.44", &file)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let count: i64 = sqlx::query_scalar("SELECT count FROM rate_limits WHERE key = ?")
        .bind("rate_limit_192.0.2.44")
        .fetch_one(&*h.state.storage.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn probes_report_ready() {
    let h = harness().await;
    let resp = send(&h.app, get_request("/healthz", &[])).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&h.app, get_request("/readyz", &[])).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["checks"]["metadata"]["ok"], true);
    assert_eq!(json["checks"]["payloads"]["ok"], true);
}
