//! End-to-end tests for the HTTP surface, driven through the router with
//! `tower::ServiceExt::oneshot` against an in-memory chunk store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use chunkyard::config::{Config, MIB};
use chunkyard::storage::artifacts::ArtifactStore;
use chunkyard::storage::memory::MemoryChunkStore;
use chunkyard::AppState;

struct TestApp {
    state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(
            ArtifactStore::new(
                dir.path().join("public"),
                dir.path().join("scratch"),
                &config.storage.artifacts.public_prefix,
            )
            .unwrap(),
        );
        let state = Arc::new(AppState::new(
            config,
            Arc::new(MemoryChunkStore::default()),
            artifacts,
        ));
        Self { state, _dir: dir }
    }

    fn router(&self) -> Router {
        chunkyard::server::app(Arc::clone(&self.state))
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = self.router().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    async fn send_json(&self, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(req).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    async fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        total: u32,
        file_size: u64,
        data: &[u8],
    ) -> (StatusCode, Value) {
        let uri = format!(
            "/api/uploads/{session_id}/chunks/{index}?totalChunks={total}&fileName=data.bin&fileSize={file_size}"
        );
        self.send_json(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .body(Body::from(data.to_vec()))
                .unwrap(),
        )
        .await
    }

    async fn finalize(&self, session_id: &str, body: Value) -> (StatusCode, Value) {
        self.send_json(
            Request::builder()
                .method("POST")
                .uri(format!("/api/uploads/{session_id}/finalize"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Upload `data` in `chunk_size` pieces in the given index order, then finalize.
    async fn chunked(
        &self,
        session_id: &str,
        data: &[u8],
        chunk_size: usize,
        order: &[u32],
    ) -> (StatusCode, Value) {
        let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
        let total = chunks.len() as u32;
        for &index in order {
            let (status, _) = self
                .put_chunk(session_id, index, total, data.len() as u64, chunks[index as usize])
                .await;
            assert_eq!(status, StatusCode::OK, "chunk {index}");
        }
        self.finalize(
            session_id,
            json!({
                "fileName": "data.bin",
                "totalChunks": total,
                "fileSize": data.len(),
                "fileType": "application/octet-stream",
            }),
        )
        .await
    }

    async fn fetch(&self, public_path: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::get(public_path).body(Body::empty()).unwrap())
            .await
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app
        .send_json(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["limits"]["maxUploadSize"], 180 * MIB);
    assert_eq!(body["limits"]["maxChunkSize"], 8 * MIB);
    assert_eq!(body["limits"]["chunkSize"], MIB);
    assert_eq!(body["limits"]["chunkingThreshold"], 5 * MIB);
}

#[tokio::test]
async fn test_chunk_ack_and_common_headers() {
    let app = TestApp::new();
    let resp = app
        .router()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/uploads/s1/chunks/0?totalChunks=2&fileName=a.bin&fileSize=6")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("server").unwrap(), "chunkyard");
    assert!(resp.headers().contains_key("x-request-id"));

    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let ack: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(ack["success"], true);
    assert_eq!(ack["chunkIndex"], 0);
    assert_eq!(ack["totalChunks"], 2);
    assert_eq!(ack["message"], "Chunk 1/2 uploaded successfully");
}

#[tokio::test]
async fn test_chunked_upload_publishes_artifact() {
    let app = TestApp::new();
    let data = pattern(10_000);

    let (status, body) = app.chunked("s1", &data, 4096, &[0, 1, 2]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "File uploaded and merged successfully");
    assert_eq!(body["fileInfo"]["originalName"], "data.bin");
    assert_eq!(body["fileInfo"]["size"], 10_000);
    assert_eq!(body["fileInfo"]["type"], "application/octet-stream");
    assert_eq!(body["fileInfo"]["sha256"], sha256_hex(&data));

    let path = body["filePath"].as_str().unwrap();
    assert!(path.starts_with("/uploads/"));
    assert!(path.ends_with("_data.bin"));

    let (status, served) = app.fetch(path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, data);
}

#[tokio::test]
async fn test_arrival_order_does_not_matter() {
    let app = TestApp::new();
    let data = pattern(9_000);
    let mut digests = Vec::new();

    for (i, order) in [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]].iter().enumerate() {
        let (status, body) = app.chunked(&format!("perm-{i}"), &data, 3_000, order).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let (_, served) = app.fetch(body["filePath"].as_str().unwrap()).await;
        assert_eq!(served, data);
        digests.push(body["fileInfo"]["sha256"].as_str().unwrap().to_string());
    }
    digests.dedup();
    assert_eq!(digests.len(), 1);
}

#[tokio::test]
async fn test_single_shot_and_chunked_are_identical() {
    let app = TestApp::new();
    let data = pattern(800 * 1024);

    let (status, whole) = app
        .send_json(
            Request::builder()
                .method("POST")
                .uri("/api/upload-file?fileName=data.bin")
                .header("content-type", "application/octet-stream")
                .body(Body::from(data.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{whole}");
    assert_eq!(whole["message"], "File uploaded successfully");

    let (status, chunked) = app.chunked("s1", &data, 256 * 1024, &[3, 0, 2, 1]).await;
    assert_eq!(status, StatusCode::OK, "{chunked}");

    assert_eq!(whole["fileInfo"]["sha256"], chunked["fileInfo"]["sha256"]);
    assert_eq!(whole["fileInfo"]["size"], chunked["fileInfo"]["size"]);
    assert_ne!(whole["filePath"], chunked["filePath"]);

    let (_, a) = app.fetch(whole["filePath"].as_str().unwrap()).await;
    let (_, b) = app.fetch(chunked["filePath"].as_str().unwrap()).await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_single_shot_and_one_chunk_session_are_identical() {
    let app = TestApp::new();
    let data = pattern(800 * 1024);

    let (status, whole) = app
        .send_json(
            Request::builder()
                .method("POST")
                .uri("/api/upload-file?fileName=data.bin")
                .body(Body::from(data.clone()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{whole}");

    let (status, chunked) = app.chunked("s1", &data, MIB as usize, &[0]).await;
    assert_eq!(status, StatusCode::OK, "{chunked}");
    assert_eq!(whole["fileInfo"]["sha256"], chunked["fileInfo"]["sha256"]);
    assert_eq!(chunked["fileInfo"]["size"], 800 * 1024);
    assert_ne!(whole["fileInfo"]["fileName"], chunked["fileInfo"]["fileName"]);

    let (_, a) = app.fetch(whole["filePath"].as_str().unwrap()).await;
    let (_, b) = app.fetch(chunked["filePath"].as_str().unwrap()).await;
    assert_eq!(a, data);
    assert_eq!(b, data);
}

#[tokio::test]
async fn test_oversize_whole_file_is_size_exceeded() {
    let mut config = Config::default();
    config.limits.max_upload_size = 10;
    let app = TestApp::with_config(config);

    for len in [11, 4096] {
        let (status, body) = app
            .send_json(
                Request::builder()
                    .method("POST")
                    .uri("/api/upload-file?fileName=a.bin")
                    .body(Body::from(vec![7u8; len]))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{len} bytes");
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "SizeExceeded");
        assert_eq!(body["details"]["limit"], 10);
    }

    let (status, _) = app
        .send_json(
            Request::builder()
                .method("POST")
                .uri("/api/upload-file?fileName=a.bin")
                .body(Body::from(vec![7u8; 10]))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_chunk_over_body_limit_is_chunk_too_large() {
    let mut config = Config::default();
    config.limits.max_upload_size = 10;
    config.limits.max_chunk_size = 8;
    let app = TestApp::with_config(config);

    let (status, body) = app.put_chunk("s1", 0, 1, 10, &[1u8; 64]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ChunkTooLarge");
    assert_eq!(body["details"]["limit"], 8);
}

#[tokio::test]
async fn test_single_shot_declared_type_from_header() {
    let app = TestApp::new();
    let (status, body) = app
        .send_json(
            Request::builder()
                .method("POST")
                .uri("/api/upload-file?fileName=report.pdf")
                .header("content-type", "application/pdf")
                .body(Body::from("%PDF-1.7"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fileInfo"]["type"], "application/pdf");
    assert_eq!(body["fileInfo"]["originalName"], "report.pdf");
}

#[tokio::test]
async fn test_missing_params_rejected() {
    let app = TestApp::new();

    let (status, body) = app
        .send_json(
            Request::builder()
                .method("PUT")
                .uri("/api/uploads/s1/chunks/0?fileName=a.bin&fileSize=3")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "MissingField");
    assert_eq!(body["details"]["field"], "totalChunks");

    let (status, body) = app.put_chunk("s1", 0, 1, 3, b"").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MissingField");
    assert_eq!(body["details"]["field"], "chunk");

    let (status, body) = app
        .finalize("s1", json!({ "fileName": "a.bin", "totalChunks": 1 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MissingField");
    assert_eq!(body["details"]["field"], "fileSize");

    let (status, body) = app
        .send_json(
            Request::builder()
                .method("POST")
                .uri("/api/upload-file")
                .body(Body::from("abc"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "fileName");
}

#[tokio::test]
async fn test_index_out_of_range_rejected() {
    let app = TestApp::new();
    let (status, body) = app.put_chunk("s1", 3, 3, 9, b"abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "InvalidArgument");
}

#[tokio::test]
async fn test_oversized_declaration_rejected() {
    let app = TestApp::new();
    let declared = 200 * MIB;

    let (status, body) = app.put_chunk("s1", 0, 200, declared, b"abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SizeExceeded");
    assert_eq!(body["details"]["limit"], 180 * MIB);

    let (status, body) = app
        .finalize(
            "s1",
            json!({ "fileName": "a.bin", "totalChunks": 200, "fileSize": declared }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SizeExceeded");
}

#[tokio::test]
async fn test_chunk_over_ceiling_rejected() {
    let mut config = Config::default();
    config.limits.max_chunk_size = 4;
    let app = TestApp::with_config(config);

    let (status, body) = app.put_chunk("s1", 0, 2, 10, b"abcde").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ChunkTooLarge");
}

#[tokio::test]
async fn test_incomplete_reports_every_missing_index() {
    let app = TestApp::new();
    for index in [0, 2, 5] {
        app.put_chunk("s1", index, 6, 6, b"x").await;
    }

    let (status, body) = app
        .finalize(
            "s1",
            json!({ "fileName": "data.bin", "totalChunks": 6, "fileSize": 6 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "IncompleteUpload");
    assert_eq!(body["details"]["missing"], json!([1, 3, 4]));

    // Nothing was consumed.
    let (_, report) = app
        .send_json(
            Request::get("/api/uploads/s1?totalChunks=6")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(report["receivedIndices"], json!([0, 2, 5]));
    assert_eq!(report["missing"], json!([1, 3, 4]));
    assert_eq!(report["complete"], false);
}

#[tokio::test]
async fn test_truncated_upload_is_size_mismatch() {
    let app = TestApp::new();
    app.put_chunk("s1", 0, 2, 10, b"abcd").await;
    app.put_chunk("s1", 1, 2, 10, b"efgh").await;

    let (status, body) = app
        .finalize(
            "s1",
            json!({ "fileName": "data.bin", "totalChunks": 2, "fileSize": 10 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SizeMismatch");
    assert_eq!(body["details"]["expected"], 10);
    assert_eq!(body["details"]["actual"], 8);
}

#[tokio::test]
async fn test_overlong_upload_is_size_mismatch() {
    let app = TestApp::new();
    app.put_chunk("s1", 0, 2, 5, b"abcd").await;
    app.put_chunk("s1", 1, 2, 5, b"efgh").await;

    let (status, body) = app
        .finalize(
            "s1",
            json!({ "fileName": "data.bin", "totalChunks": 2, "fileSize": 5 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SizeMismatch");
}

#[tokio::test]
async fn test_rewrite_replaces_chunk() {
    let app = TestApp::new();
    app.put_chunk("s1", 0, 2, 6, b"zzz").await;
    app.put_chunk("s1", 1, 2, 6, b"def").await;
    app.put_chunk("s1", 0, 2, 6, b"abc").await;

    let (status, body) = app
        .finalize(
            "s1",
            json!({ "fileName": "data.bin", "totalChunks": 2, "fileSize": 6 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (_, served) = app.fetch(body["filePath"].as_str().unwrap()).await;
    assert_eq!(served, b"abcdef");
}

#[tokio::test]
async fn test_session_scope_removed_after_finalize() {
    let app = TestApp::new();
    let data = pattern(5_000);
    let (status, _) = app.chunked("s1", &data, 2_000, &[0, 1, 2]).await;
    assert_eq!(status, StatusCode::OK);

    let (_, status_body) = app
        .send_json(Request::get("/api/uploads/s1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status_body["receivedIndices"], json!([]));

    let (status, body) = app
        .finalize(
            "s1",
            json!({ "fileName": "data.bin", "totalChunks": 3, "fileSize": 5000 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "IncompleteUpload");
}

#[tokio::test]
async fn test_abort_discards_chunks() {
    let app = TestApp::new();
    app.put_chunk("s1", 0, 2, 6, b"abc").await;

    let (status, _) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/api/uploads/s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = app
        .send_json(Request::get("/api/uploads/s1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(body["receivedIndices"], json!([]));

    // Aborting again is harmless.
    let (status, _) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/api/uploads/s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_invalid_session_id_rejected() {
    let app = TestApp::new();
    let (status, body) = app.put_chunk("bad.id", 0, 1, 3, b"abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "InvalidArgument");
}

#[tokio::test]
async fn test_writes_refused_while_finalizing() {
    let app = TestApp::new();
    app.put_chunk("s1", 0, 2, 6, b"abc").await;

    let guard = app.state.uploads.guards().begin_finalize("s1").unwrap();
    let (status, body) = app.put_chunk("s1", 1, 2, 6, b"def").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SessionFinalizing");

    let (status, _) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/api/uploads/s1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    drop(guard);
    let (status, _) = app.put_chunk("s1", 1, 2, 6, b"def").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_client_orchestrator_over_in_process_transport() {
    use chunkyard::client::{
        ClientSettings, InProcessTransport, Orchestrator, RetryPolicy, UploadMode,
    };

    let app = TestApp::new();
    let transport = Arc::new(InProcessTransport::new(Arc::clone(&app.state.uploads)));
    let settings = ClientSettings {
        chunk_size: 1024,
        chunking_threshold: 4096,
        max_upload_size: 180 * MIB,
        concurrency: 3,
        retry: RetryPolicy::none(),
    };
    let orchestrator = Orchestrator::new(transport, settings);

    let data = pattern(10_000);
    let mut last = 0;
    let report = orchestrator
        .upload_bytes(
            bytes::Bytes::from(data.clone()),
            "data.bin",
            "application/octet-stream",
            |p| {
                assert!(p.acknowledged >= last);
                last = p.acknowledged;
            },
        )
        .await
        .unwrap();
    assert_eq!(last, 10);
    assert!(matches!(
        report.mode,
        UploadMode::Chunked {
            total_chunks: 10,
            ..
        }
    ));

    let (status, served) = app.fetch(&report.artifact.path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, data);
}
