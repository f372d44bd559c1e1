use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shutterbox::application::auth::AuthService;
use shutterbox::application::engine::{
    EncodeDirective, EngineError, ImageTransformEngine, ResizeDirective,
};
use shutterbox::application::library::LibraryService;
use shutterbox::application::render::RenderService;
use shutterbox::infra::http::{ApiState, HttpState, RouterState, build_router};
use shutterbox::infra::storage::{CacheStore, OriginalStore, StorageLayout};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "shutterbox-test-boundary";

struct EchoEngine;

#[async_trait]
impl ImageTransformEngine for EchoEngine {
    async fn transform(
        &self,
        source: Bytes,
        _resize: Option<ResizeDirective>,
        _encode: EncodeDirective,
    ) -> Result<Bytes, EngineError> {
        Ok(source)
    }
}

struct TestApp {
    dir: TempDir,
    router: Router,
}

impl TestApp {
    fn new(upload_limit: usize) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let layout = Arc::new(StorageLayout::new(dir.path(), "originals", "cache"));
        layout.ensure().expect("storage roots");
        let originals = Arc::new(OriginalStore::new(Arc::clone(&layout)));
        let cache = Arc::new(CacheStore::new(layout));

        let state = RouterState {
            http: HttpState {
                render: Arc::new(RenderService::new(
                    Arc::clone(&originals),
                    Arc::clone(&cache),
                    Arc::new(EchoEngine),
                )),
            },
            api: ApiState {
                library: Arc::new(LibraryService::new(originals, cache)),
                auth: Arc::new(AuthService::new("admin", "secret", time::Duration::hours(1))),
            },
        };

        Self {
            dir,
            router: build_router(state, upload_limit),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, headers, body)
    }

    async fn login(&self) -> String {
        let request = json_request(Method::POST, "/api/login", None, json!({
            "username": "admin",
            "password": "secret"
        }));
        let (status, headers, _) = self.send(request).await;
        assert_eq!(status, StatusCode::OK);

        let cookie = headers
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("session cookie");
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        cookie
            .split(';')
            .next()
            .expect("cookie pair")
            .to_string()
    }
}

fn json_request(method: Method, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request should build")
}

fn multipart_request(cookie: &str, folder: Option<&str>, files: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(folder) = folder {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"path\"\r\n\r\n{folder}\r\n"
            )
            .as_bytes(),
        );
    }
    for (name, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .expect("request should build")
}

fn json_body(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn management_routes_require_a_session() {
    let app = TestApp::new(1024 * 1024);

    for request in [
        get_request("/api/folders", None),
        get_request("/api/images", None),
        json_request(Method::POST, "/api/folders", None, json!({ "name": "x" })),
        json_request(Method::DELETE, "/api/images", None, json!({ "filename": "a.jpg" })),
    ] {
        let (status, _, body) = app.send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(&body)["error"]["code"], "unauthorized");
    }

    let (status, _, _) = app
        .send(get_request("/api/folders", Some("shutterbox_session=forged")))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Render stays public.
    std::fs::write(app.dir.path().join("originals/open.png"), b"png").expect("original");
    let (status, _, _) = app.send(get_request("/render/open.png", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn login_validates_credentials() {
    let app = TestApp::new(1024 * 1024);

    let (status, _, _) = app
        .send(json_request(Method::POST, "/api/login", None, json!({ "username": "admin" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, headers, body) = app
        .send(json_request(
            Method::POST,
            "/api/login",
            None,
            json!({ "username": "admin", "password": "wrong" }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.get(header::SET_COOKIE).is_none());
    assert_eq!(json_body(&body)["error"]["code"], "invalid_credentials");

    let cookie = app.login().await;
    let (status, _, body) = app.send(get_request("/api/session", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "authenticated": true, "username": "admin" }));

    let (_, _, body) = app.send(get_request("/api/session", None)).await;
    assert_eq!(json_body(&body), json!({ "authenticated": false }));
}

#[tokio::test]
async fn bearer_token_is_accepted_and_logout_revokes_it() {
    let app = TestApp::new(1024 * 1024);
    let cookie = app.login().await;
    let token = cookie
        .strip_prefix("shutterbox_session=")
        .expect("cookie value")
        .to_string();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/folders")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request should build");
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app
        .send(json_request(Method::POST, "/api/logout", Some(&cookie), json!({})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.send(get_request("/api/folders", Some(&cookie))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn folders_can_be_created_and_listed() {
    let app = TestApp::new(1024 * 1024);
    let cookie = app.login().await;

    let (status, _, body) = app
        .send(json_request(
            Method::POST,
            "/api/folders",
            Some(&cookie),
            json!({ "name": "blog" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({ "success": true, "name": "blog", "path": "blog" })
    );

    let (status, _, _) = app
        .send(json_request(
            Method::POST,
            "/api/folders",
            Some(&cookie),
            json!({ "name": "blog" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = app
        .send(json_request(
            Method::POST,
            "/api/folders",
            Some(&cookie),
            json!({ "name": "../escape" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = app.send(get_request("/api/folders?path=/", Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body)["folders"],
        json!([{ "name": "blog", "path": "blog", "count": 0 }])
    );
}

#[tokio::test]
async fn upload_list_delete_round_trip_purges_variants() {
    let app = TestApp::new(1024 * 1024);
    let cookie = app.login().await;

    let (status, _, body) = app
        .send(multipart_request(
            &cookie,
            Some("gallery"),
            &[("Cat.PNG", b"png-data"), ("notes.txt", b"text")],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["success"], true);
    let files = body["files"].as_array().expect("files");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["originalName"], "Cat.PNG");
    assert_eq!(files[0]["path"], "gallery");
    let filename = files[0]["filename"].as_str().expect("filename").to_string();
    assert!(filename.ends_with(".png"));

    // Two variants of the upload land in the cache.
    for query in ["w=10", "fm=jpg"] {
        let (status, headers, _) = app
            .send(get_request(
                &format!("/render/gallery/{filename}?{query}"),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-cache"], "MISS");
    }

    let (status, _, body) = app
        .send(get_request("/api/images?path=gallery&perPage=500", Some(&cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(
        body["pagination"],
        json!({ "page": 1, "perPage": 100, "total": 1, "totalPages": 1 })
    );
    assert_eq!(body["images"][0]["filename"], filename.as_str());
    assert_eq!(body["images"][0]["variants"], 2);
    assert_eq!(
        body["images"][0]["url"],
        format!("/render/gallery/{filename}")
    );

    let (status, _, body) = app
        .send(json_request(
            Method::DELETE,
            "/api/images",
            Some(&cookie),
            json!({ "path": "gallery", "filename": filename }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "success": true, "purged": 2 }));

    let (status, _, _) = app
        .send(get_request(&format!("/render/gallery/{filename}"), None))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_rejects_empty_and_invalid_payloads() {
    let app = TestApp::new(1024 * 1024);
    let cookie = app.login().await;

    let (status, _, _) = app.send(multipart_request(&cookie, None, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = app
        .send(multipart_request(&cookie, None, &[("virus.exe", b"MZ")]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"]["code"], "bad_request");
}

#[tokio::test]
async fn upload_body_limit_is_enforced() {
    let app = TestApp::new(1024);
    let cookie = app.login().await;
    let large = vec![0_u8; 4096];

    let (status, _, _) = app
        .send(multipart_request(&cookie, None, &[("big.png", &large)]))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn delete_rejects_separators_in_filename() {
    let app = TestApp::new(1024 * 1024);
    let cookie = app.login().await;

    for body in [
        json!({ "path": "blog" }),
        json!({ "filename": "" }),
        json!({ "filename": "../secret.png" }),
        json!({ "filename": "a\\b.png" }),
    ] {
        let (status, _, _) = app
            .send(json_request(Method::DELETE, "/api/images", Some(&cookie), body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // Deleting a file that does not exist is not an error.
    let (status, _, body) = app
        .send(json_request(
            Method::DELETE,
            "/api/images",
            Some(&cookie),
            json!({ "filename": "ghost.png" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["purged"], 0);
}
