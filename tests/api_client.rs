use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;
use vidqueue::{
    ApiClient, ClientError, ConfigBuilder, ProcessingBackend, UploadProgress, UploadRequest,
    VideoStatus,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    let config = ConfigBuilder::new()
        .with_base_url(&server.uri())
        .with_token("secret-token")
        .build();
    ApiClient::new(&config).expect("client")
}

#[tokio::test]
async fn status_is_parsed_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/processing/status/abc"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "ready", "progress": 100})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let status = client_for(&server).processing_status("abc").await.unwrap();
    assert_eq!(status.status, VideoStatus::Ready);
    assert_eq!(status.details.get("progress"), Some(&json!(100)));
}

#[tokio::test]
async fn http_errors_map_to_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/processing/status/expired"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/processing/status/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/processing/status/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database down"))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let err = client.processing_status("expired").await.unwrap_err();
    assert!(err.is_auth());
    assert!(err.to_string().contains("token expired"));

    let err = client.processing_status("missing").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    assert!(err.is_transient());

    let err = client.processing_status("broken").await.unwrap_err();
    match err {
        ClientError::Server { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "database down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn video_list_accepts_every_shape() {
    let record = json!({
        "video_id": "v1",
        "status": "processing",
        "original_name": "guard.mp4",
        "created_at": "2024-05-01T10:00:00Z",
        "file_size": 2048,
        "frame_count": 300
    });

    for body in [json!({"videos": [record.clone()]}), json!([record.clone()]), json!({"data": [record.clone()]})] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let videos = client_for(&server).list_videos().await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id, "v1");
        assert_eq!(videos[0].display_name(), "guard.mp4");
        assert_eq!(videos[0].size_bytes, 2048);
        assert_eq!(videos[0].frame_count, 300);
        assert!(videos[0].submitted_at().is_some());
    }
}

#[tokio::test]
async fn queue_endpoints_are_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/processing/queue/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queue_length": 4,
            "processing_count": 1,
            "videos_in_queue": 5,
            "estimated_wait_time": 360
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/processing/queue/position/v%201"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"position": 2, "estimated_wait_time": 180})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);

    let snapshot = client.queue_status().await.unwrap();
    assert_eq!(snapshot.queue_length, 4);
    assert_eq!(snapshot.estimated_wait_time, 360);

    let position = client.queue_position("v 1").await.unwrap();
    assert_eq!(position.position, 2);
    assert_eq!(position.estimated_wait_time, 180);
}

#[tokio::test]
async fn upload_sends_multipart_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/upload"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_string_contains("name=\"video\""))
        .and(body_string_contains("filename=\"roll.mp4\""))
        .and(body_string_contains("fake video bytes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"video_id": "new-1", "message": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("roll.mp4");
    std::fs::write(&file, b"fake video bytes").unwrap();

    let seen: Arc<Mutex<Vec<UploadProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let request = UploadRequest {
        path: file,
        filename: "roll.mp4".to_string(),
        size: 16,
        content_type: "video/mp4".to_string(),
        progress: Some(Arc::new(move |update| sink.lock().unwrap().push(update))),
    };

    let response = client_for(&server).upload_video(request).await.unwrap();
    assert_eq!(response.video_id.as_deref(), Some("new-1"));
    assert_eq!(response.message.as_deref(), Some("queued"));

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("progress reported");
    assert_eq!(last.bytes_sent, 16);
    assert_eq!(last.percent(), 100);
}

#[tokio::test]
async fn download_streams_to_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/storage/download/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("out").join("video-v1.zip");

    let written = client_for(&server)
        .download_video("v1", &destination)
        .await
        .unwrap();
    assert_eq!(written, 4096);
    assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 4096]);
}

#[tokio::test]
async fn delete_handles_json_and_empty_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/storage/videos/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": true})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/storage/videos/v2"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(client.delete_video("v1").await.unwrap(), json!({"deleted": true}));
    assert_eq!(client.delete_video("v2").await.unwrap(), serde_json::Value::Null);
}

#[tokio::test]
async fn health_reports_each_service() {
    let server = MockServer::start().await;
    for service in ["auth", "upload", "processing"] {
        Mock::given(method("GET"))
            .and(path(format!("/{}/health", service)))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/storage/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let health = client_for(&server).check_services().await;
    let names: Vec<&str> = health.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["auth", "upload", "processing", "storage"]);
    assert!(health[..3].iter().all(|h| h.online));
    assert!(!health[3].online);
}
