// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// API surface tests over fake backends: auth, status mapping, artifact
// ownership, and the manual scan cycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use druckwerk_auth::{AuthGate, IdentityProvider};
use druckwerk_core::config::{AccountsSettings, Settings};
use druckwerk_core::error::Result;
use druckwerk_core::{JobState, Printer, Scanner};
use druckwerk_document::Convert;
use druckwerk_document::pdf::PdfBuilder;
use druckwerk_print::{FakePrintBackend, PrintBackend, PrintOrchestrator, StatusAggregator};
use druckwerk_scan::{FakeScanBackend, ScanBackend, ScanOrchestrator};
use druckwerk_store::ArtifactStore;

use druckwerk_api::app::{AppContext, router};

const ALICE: &str = "111:bot-secret";
const BOB: &str = "222:bot-secret";

struct StubProvider;

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn public_key_pem(&self, _force_refresh: bool) -> Result<String> {
        Ok("-----BEGIN PUBLIC KEY-----\nnot-a-key\n-----END PUBLIC KEY-----".into())
    }

    async fn resolve_telegram_id(&self, telegram_id: i64) -> Result<Option<String>> {
        Ok(match telegram_id {
            111 => Some("owner-a".into()),
            222 => Some("owner-b".into()),
            _ => None,
        })
    }
}

struct UnreachableConverter;

#[async_trait]
impl Convert for UnreachableConverter {
    async fn convert(&self, _input: &std::path::Path, _output: &std::path::Path) -> Result<()> {
        unreachable!("tests only upload PDFs")
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    app: Router,
    scan_backend: Arc<FakeScanBackend>,
}

fn fixture(print_backend: FakePrintBackend) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Arc::new(Settings {
        app_root_path: String::new(),
        bind_addr: "127.0.0.1:0".into(),
        database_path: dir.path().join("state.db"),
        cors_allow_origin_regex: ".*".into(),
        accounts: AccountsSettings {
            api_url: "http://accounts.test".into(),
            api_jwt_token: "svc".into(),
        },
        bot_token: "bot-secret".into(),
        converter_url: "http://converter.test".into(),
        temp_dir: dir.path().to_path_buf(),
        printers: vec![Printer {
            display_name: "Office".into(),
            cups_name: "office".into(),
            ipp: "http://10.0.0.10:631/ipp/print".into(),
        }],
        scanners: vec![Scanner {
            display_name: "Office scanner".into(),
            name: "office-scan".into(),
            escl: "https://10.0.0.11/eSCL".into(),
        }],
    });

    let store = Arc::new(ArtifactStore::new(dir.path().join("artifacts")).expect("store"));
    let backend: Arc<dyn PrintBackend> = Arc::new(print_backend);
    let print = Arc::new(PrintOrchestrator::new(
        settings.clone(),
        store.clone(),
        backend.clone(),
        Arc::new(UnreachableConverter),
    ));

    let scan_backend = Arc::new(FakeScanBackend::new());
    let mut scan_backends: HashMap<String, Arc<dyn ScanBackend>> = HashMap::new();
    scan_backends.insert("office-scan".to_string(), scan_backend.clone());
    let scan = Arc::new(ScanOrchestrator::with_backends(store.clone(), scan_backends));

    let status = Arc::new(StatusAggregator::new(backend));
    let gate = Arc::new(AuthGate::new(Arc::new(StubProvider), "bot-secret"));

    let context = Arc::new(AppContext {
        settings,
        store,
        print,
        scan,
        status,
        gate,
    });
    Fixture {
        _dir: dir,
        app: router(context).expect("router"),
        scan_backend,
    }
}

fn pdf_with_pages(n: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
    encoder
        .encode(img.as_raw(), 2, 2, image::ExtendedColorType::Rgb8)
        .expect("jpeg");
    let mut builder = PdfBuilder::new();
    for _ in 0..n {
        builder.add_jpeg_page(jpeg.clone(), 2, 2, 72.0);
    }
    builder.finish().expect("pdf")
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    request("GET", uri, bearer, Body::empty(), None)
}

fn post(uri: &str, bearer: Option<&str>) -> Request<Body> {
    request("POST", uri, bearer, Body::empty(), None)
}

fn request(
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Body,
    content_type: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(body).expect("request")
}

fn multipart_upload(uri: &str, bearer: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "XDRUCKWERKBOUNDARY";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    request(
        "POST",
        uri,
        Some(bearer),
        Body::from(body),
        Some(&format!("multipart/form-data; boundary={boundary}")),
    )
}

async fn json_of(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn requests_without_credentials_are_401() {
    let f = fixture(FakePrintBackend::with_states(vec![]));
    let response = f
        .app
        .oneshot(get("/print/get_printers", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_of(response).await;
    assert_eq!(body["detail"], "Credentials not provided");
}

#[tokio::test]
async fn bot_composite_tokens_resolve_owner() {
    let f = fixture(FakePrintBackend::with_states(vec![]));
    let response = f
        .app
        .oneshot(get("/users/my_id", Some(ALICE)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_of(response).await, serde_json::json!("owner-a"));
}

#[tokio::test]
async fn wrong_bot_secret_is_rejected() {
    let f = fixture(FakePrintBackend::with_states(vec![]));
    let response = f
        .app
        .oneshot(get("/users/my_id", Some("111:wrong")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn prepare_then_print_consumes_the_artifact() {
    let f = fixture(FakePrintBackend::with_states(vec![FakePrintBackend::attrs(
        JobState::Completed,
    )]));

    let response = f
        .app
        .clone()
        .oneshot(multipart_upload(
            "/print/prepare",
            ALICE,
            "doc.pdf",
            &pdf_with_pages(3),
        ))
        .await
        .expect("prepare");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert_eq!(body["pages"], 3);
    let filename = body["filename"].as_str().expect("filename").to_string();

    let uri = format!("/print/print?filename={filename}&printer_cups_name=office");
    let response = f
        .app
        .clone()
        .oneshot(request(
            "POST",
            &uri,
            Some(ALICE),
            Body::from(r#"{"printing_options":{"copies":2}}"#),
            Some("application/json"),
        ))
        .await
        .expect("print");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_of(response).await, serde_json::json!(1));

    // The handle is consumed; printing the same artifact again is a 404.
    let response = f
        .app
        .clone()
        .oneshot(post(&uri, Some(ALICE)))
        .await
        .expect("second print");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn prepare_rejects_unsupported_and_empty() {
    let f = fixture(FakePrintBackend::with_states(vec![]));

    let response = f
        .app
        .clone()
        .oneshot(multipart_upload("/print/prepare", ALICE, "movie.mkv", b"x"))
        .await
        .expect("unsupported");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = f
        .app
        .clone()
        .oneshot(multipart_upload("/print/prepare", ALICE, "doc.pdf", b""))
        .await
        .expect("empty");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn artifacts_are_owner_scoped() {
    let f = fixture(FakePrintBackend::with_states(vec![]));

    let response = f
        .app
        .clone()
        .oneshot(multipart_upload(
            "/print/prepare",
            ALICE,
            "doc.pdf",
            &pdf_with_pages(1),
        ))
        .await
        .expect("prepare");
    let body = json_of(response).await;
    let filename = body["filename"].as_str().expect("filename").to_string();

    // The owner sees the file; anyone else sees a 404.
    let response = f
        .app
        .clone()
        .oneshot(get(&format!("/print/get_file?filename={filename}"), Some(ALICE)))
        .await
        .expect("own file");
    assert_eq!(response.status(), StatusCode::OK);

    let response = f
        .app
        .clone()
        .oneshot(get(&format!("/print/get_file?filename={filename}"), Some(BOB)))
        .await
        .expect("foreign file");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_printer_is_400() {
    let f = fixture(FakePrintBackend::with_states(vec![]));
    let response = f
        .app
        .oneshot(get(
            "/print/get_printer_status?printer_cups_name=ghost",
            Some(ALICE),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn busy_scanner_maps_to_503() {
    let f = fixture(FakePrintBackend::with_states(vec![]));
    f.scan_backend
        .script_start(Err(druckwerk_core::DruckwerkError::Busy(
            "scanner is busy".into(),
        )));

    let response = f
        .app
        .oneshot(post(
            "/scan/manual/start_scan?scanner_name=office-scan",
            Some(ALICE),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn manual_scan_cycle_grows_and_shrinks() {
    let f = fixture(FakePrintBackend::with_states(vec![]));
    f.scan_backend.script_start(Ok("j1".into()));
    f.scan_backend.script_document(pdf_with_pages(2));
    f.scan_backend.script_document(pdf_with_pages(1));

    let response = f
        .app
        .clone()
        .oneshot(post(
            "/scan/manual/start_scan?scanner_name=office-scan",
            Some(ALICE),
        ))
        .await
        .expect("start");
    assert_eq!(response.status(), StatusCode::OK);
    let job_id = json_of(response).await;
    assert_eq!(job_id, serde_json::json!("j1"));

    let response = f
        .app
        .clone()
        .oneshot(post(
            "/scan/manual/wait_and_merge?scanner_name=office-scan&job_id=j1",
            Some(ALICE),
        ))
        .await
        .expect("merge 1");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_of(response).await;
    assert_eq!(body["page_count"], 2);
    let first = body["filename"].as_str().expect("filename").to_string();

    let response = f
        .app
        .clone()
        .oneshot(post(
            &format!(
                "/scan/manual/wait_and_merge?scanner_name=office-scan&job_id=j1&prev_filename={first}"
            ),
            Some(ALICE),
        ))
        .await
        .expect("merge 2");
    let body = json_of(response).await;
    assert_eq!(body["page_count"], 3);
    let merged = body["filename"].as_str().expect("filename").to_string();

    let response = f
        .app
        .clone()
        .oneshot(post(
            &format!("/scan/manual/remove_last_page?filename={merged}"),
            Some(ALICE),
        ))
        .await
        .expect("undo");
    let body = json_of(response).await;
    assert_eq!(body["page_count"], 2);
    let shrunk = body["filename"].as_str().expect("filename").to_string();

    let response = f
        .app
        .clone()
        .oneshot(post(
            &format!("/scan/manual/delete_file?filename={shrunk}"),
            Some(ALICE),
        ))
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::OK);

    // Merging against a deleted previous handle is a 404.
    let response = f
        .app
        .clone()
        .oneshot(post(
            &format!(
                "/scan/manual/wait_and_merge?scanner_name=office-scan&job_id=j1&prev_filename={shrunk}"
            ),
            Some(ALICE),
        ))
        .await
        .expect("merge after delete");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
