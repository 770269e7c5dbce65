use std::{io::Cursor, sync::Arc};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use image::GenericImageView;
use lopdf::{
    Dictionary, Object, Stream,
    content::{Content, Operation},
    dictionary,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use docusafe::{
    build_router,
    config::Config,
    crypto::link::generate_link_id,
    models::document::{Document, NewDocument},
    repositories::sqlite::SqliteStore,
    services::sweep::burn_expired_now,
    state::AppState,
};

struct TestApp {
    app: Router,
    state: AppState,
    _dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::in_memory().await.unwrap();
        let state = AppState::with_store(&Config::local(dir.path()), Arc::new(store), None);
        let app = build_router(state.clone()).unwrap();
        Self {
            app,
            state,
            _dir: dir,
        }
    }

    async fn share(
        &self,
        extension: &str,
        bytes: &[u8],
        max_views: Option<i32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Document {
        let file_path = self.state.files.save(extension, bytes).await.unwrap();
        self.state
            .store
            .insert_document(&NewDocument {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                link_id: generate_link_id(),
                title: format!("shared.{extension}"),
                file_path,
                watermark_text: "CONFIDENTIAL".to_string(),
                expires_at,
                max_views,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.9")
            .header(header::USER_AGENT, "integration-test")
            .body(Body::empty())
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn heartbeat(&self, link_id: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/view/{link_id}/heartbeat"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn reload(&self, link_id: &str) -> Document {
        self.state.store.find_by_link(link_id).await.unwrap().unwrap()
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([30, 60, 90, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn three_page_pdf() -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let kids: Vec<Object> = (1..=3)
        .map(|n| {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(18)]),
                    Operation::new("Td", vec![Object::Integer(72), Object::Integer(720)]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Page {n}"))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));
            Object::Reference(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            }))
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(3),
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn one_time_link_serves_once_then_burns() {
    let t = TestApp::new().await;
    let doc = t.share("png", &png(240, 160), Some(1), None).await;

    let (status, headers, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert!(headers.contains_key("x-view-session"));

    let stamped = image::load_from_memory(&body).unwrap();
    assert_eq!(stamped.dimensions(), (240, 160));
    assert_ne!(body, png(240, 160), "delivered copy must carry the stamp");

    let after = t.reload(&doc.link_id).await;
    assert!(after.is_burned);
    assert_eq!(after.current_views, 1);

    let (status, _, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::GONE);
    let body = json_body(&body);
    assert_eq!(
        body["error"],
        "Document has been burned (view limit reached or expired)"
    );
    assert_eq!(body["reason"], "burned");
}

#[tokio::test]
async fn expired_link_reports_expiry_then_burned() {
    let t = TestApp::new().await;
    let doc = t
        .share("png", &png(32, 32), Some(5), Some(Utc::now() - Duration::seconds(1)))
        .await;

    let (status, _, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json_body(&body)["error"], "Document has expired");

    let (status, _, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json_body(&body)["reason"], "burned");

    assert_eq!(t.reload(&doc.link_id).await.current_views, 0);
}

#[tokio::test]
async fn swept_link_still_reports_expiry_on_first_visit() {
    let t = TestApp::new().await;
    let doc = t
        .share("png", &png(32, 32), Some(5), Some(Utc::now() - Duration::minutes(10)))
        .await;

    assert_eq!(burn_expired_now(t.state.store.as_ref()).await.unwrap(), 1);

    let (status, _, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json_body(&body)["reason"], "expired");

    let (status, _, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json_body(&body)["reason"], "burned");
}

#[tokio::test]
async fn unknown_link_is_not_found() {
    let t = TestApp::new().await;
    let (status, _, body) = t.get("/view/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["error"], "Document not found");
}

#[tokio::test]
async fn pdf_pages_carry_the_viewer_stamp() {
    let t = TestApp::new().await;
    let doc = t.share("pdf", &three_page_pdf(), None, None).await;

    let (status, headers, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");

    let stamped = lopdf::Document::load_mem(&body).unwrap();
    let pages = stamped.get_pages();
    assert_eq!(pages.len(), 3);

    let needle = b"(203.0.113.9 - ";
    for page_id in pages.into_values() {
        let content = stamped.get_page_content(page_id).unwrap();
        let hits = content.windows(needle.len()).filter(|w| *w == needle).count();
        assert_eq!(hits, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_views_never_exceed_max_views() {
    let t = TestApp::new().await;
    let doc = t.share("png", &png(16, 16), Some(3), None).await;
    let uri = format!("/view/{}", doc.link_id);

    let responses = futures::future::join_all((0..12).map(|_| t.get(&uri))).await;
    let ok = responses.iter().filter(|(s, _, _)| *s == StatusCode::OK).count();
    let gone = responses.iter().filter(|(s, _, _)| *s == StatusCode::GONE).count();

    assert_eq!(ok, 3);
    assert_eq!(gone, 9);
    let after = t.reload(&doc.link_id).await;
    assert_eq!(after.current_views, 3);
    assert!(after.is_burned);
}

#[tokio::test]
async fn heartbeat_bounds() {
    let t = TestApp::new().await;
    let doc = t.share("png", &png(16, 16), None, None).await;

    for delta in ["0", "-1", "61", "\"NaN\"", "null"] {
        let (status, body) = t
            .heartbeat(&doc.link_id, &format!(r#"{{"sessionId":"tab","deltaSeconds":{delta}}}"#))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "delta {delta}");
        assert_eq!(body["error"], "deltaSeconds must be a positive number (<= 60)");
    }

    let (status, body) = t.heartbeat(&doc.link_id, r#"{"deltaSeconds":5}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "sessionId is required");

    let oversized = format!(r#"{{"sessionId":"{}","deltaSeconds":5}}"#, "s".repeat(129));
    let (status, body) = t.heartbeat(&doc.link_id, &oversized).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "sessionId must be at most 128 characters");

    let (status, body) = t
        .heartbeat(&doc.link_id, r#"{"sessionId":"tab","deltaSeconds":60}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, _) = t
        .heartbeat("unknown-link", r#"{"sessionId":"tab","deltaSeconds":5}"#)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeats_accumulate_on_the_viewing_session() {
    let t = TestApp::new().await;
    let doc = t.share("png", &png(16, 16), Some(1), None).await;

    let (status, headers, _) = t.get(&format!("/view/{}?sid=tab-1", doc.link_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-view-session"], "tab-1");

    // The document is burned now; the open tab keeps reporting.
    for delta in [5, 7] {
        let (status, _) = t
            .heartbeat(
                &doc.link_id,
                &format!(r#"{{"sessionId":"tab-1","deltaSeconds":{delta}}}"#),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    t.heartbeat(&doc.link_id, r#"{"sessionId":"tab-2","deltaSeconds":3.9}"#)
        .await;

    let logs = t.state.store.list_view_logs(doc.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    let first = logs.iter().find(|l| l.session_id == "tab-1").unwrap();
    assert_eq!(first.duration_seconds, 12);
    assert_eq!(first.ip_address, "203.0.113.9");
    assert_eq!(first.user_agent, "integration-test");
    let second = logs.iter().find(|l| l.session_id == "tab-2").unwrap();
    assert_eq!(second.duration_seconds, 3);
    assert_eq!(t.reload(&doc.link_id).await.current_views, 1);
}

#[tokio::test]
async fn unsupported_original_fails_after_consuming_the_view() {
    let t = TestApp::new().await;
    let doc = t.share("txt", b"plain notes", Some(2), None).await;

    let (status, _, body) = t.get(&format!("/view/{}", doc.link_id)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&body)["reason"], "unsupported_format");
    assert_eq!(t.reload(&doc.link_id).await.current_views, 1);
}

#[tokio::test]
async fn health_and_owner_routes_without_redis() {
    let t = TestApp::new().await;

    let (status, _, body) = t.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "ok");

    let (status, _, _) = t.get("/api/documents").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
