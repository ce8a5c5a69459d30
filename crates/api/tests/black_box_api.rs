use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use streamlab_api::app::{AppServices, build_app};
use streamlab_infra::{PipelineConfig, WorkerHandle};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _worker: Option<WorkerHandle>,
}

impl TestServer {
    /// Same router as prod over in-memory collaborators, on an ephemeral port.
    async fn spawn(with_worker: bool) -> Self {
        let config = PipelineConfig {
            bucket: "streamlab-test".to_string(),
            queue_wait: Duration::from_millis(20),
            ..PipelineConfig::default()
        };
        let services = Arc::new(AppServices::in_memory(&config));
        let worker = with_worker.then(|| services.spawn_worker());

        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}/api", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _worker: worker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_job(client: &reqwest::Client, srv: &TestServer, body: Value) -> Value {
    let res = client
        .post(srv.url("/jobs"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn job_with_status(
    client: &reqwest::Client,
    srv: &TestServer,
    id: &str,
    status: &str,
) -> Value {
    // The worker runs stages in the background; poll until the job catches up.
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/jobs/{id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let job: Value = res.json().await.unwrap();
        if job["status"] == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {id} did not reach {status} within timeout");
}

#[tokio::test]
async fn health_reports_ok() {
    let srv = TestServer::spawn(false).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn created_job_has_queued_stages() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let job = create_job(
        &client,
        &srv,
        json!({ "title": "Clip", "s3Key": "uploads/clip.mp4", "sourceMeta": { "size": 42 } }),
    )
    .await;

    assert_eq!(job["title"], "Clip");
    assert_eq!(job["status"], "queued");
    let names: Vec<&str> = job["stages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Transcode", "Thumbnail", "QC", "Package"]);
    for stage in job["stages"].as_array().unwrap() {
        assert_eq!(stage["status"], "queued");
        assert!(stage["startedAt"].is_null());
    }
    assert_eq!(job["source"]["bucket"], "streamlab-test");
    assert_eq!(job["source"]["key"], "uploads/clip.mp4");
    assert_eq!(job["source"]["size"], 42);
}

#[tokio::test]
async fn empty_body_creates_default_upload() {
    let srv = TestServer::spawn(false).await;
    let res = reqwest::Client::new()
        .post(srv.url("/jobs"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::CREATED);
    let job: Value = res.json().await.unwrap();
    assert_eq!(job["title"], "Upload");
    assert!(job.get("source").map_or(true, Value::is_null));
}

#[tokio::test]
async fn job_runs_to_ready_then_publishes_to_catalog() {
    let srv = TestServer::spawn(true).await;
    let client = reqwest::Client::new();

    let job = create_job(&client, &srv, json!({ "title": "Launch trailer" })).await;
    let id = job["id"].as_str().unwrap().to_string();

    let ready = job_with_status(&client, &srv, &id, "ready_to_publish").await;
    assert_eq!(ready["qcMarkers"].as_array().unwrap().len(), 3);
    assert!(ready["artifacts"]["transcoded"]["key"].is_string());

    let res = client
        .post(srv.url(&format!("/jobs/{id}/publish")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let published: Value = res.json().await.unwrap();
    assert_eq!(published["status"], "published");

    let catalog: Value = client
        .get(srv.url("/catalog"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = catalog.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["jobId"], id.as_str());
    assert_eq!(entries[0]["title"], "Launch trailer");

    // Publishing twice is a precondition failure.
    let res = client
        .post(srv.url(&format!("/jobs/{id}/publish")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn publish_before_ready_is_rejected() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let job = create_job(&client, &srv, json!({})).await;
    let id = job["id"].as_str().unwrap();

    let res = client
        .post(srv.url(&format!("/jobs/{id}/publish")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "precondition_failed");

    let after: Value = client
        .get(srv.url(&format!("/jobs/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["status"], "queued");
}

#[tokio::test]
async fn replay_resets_from_first_incomplete_stage() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let job = create_job(&client, &srv, json!({})).await;
    let id = job["id"].as_str().unwrap();

    let res = client
        .post(srv.url(&format!("/jobs/{id}/replay")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let replayed: Value = res.json().await.unwrap();
    assert_eq!(replayed["status"], "queued");
    let last_log = replayed["logs"].as_array().unwrap().last().unwrap();
    assert!(last_log["message"]
        .as_str()
        .unwrap()
        .starts_with("Replay queued from Transcode"));
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let missing = uuid::Uuid::now_v7();
    let res = client
        .get(srv.url(&format!("/jobs/{missing}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .post(srv.url(&format!("/jobs/{missing}/replay")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url("/jobs/not-a-uuid/publish"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn jobs_are_listed_newest_first() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let first = create_job(&client, &srv, json!({ "title": "first" })).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = create_job(&client, &srv, json!({ "title": "second" })).await;

    let jobs: Value = client
        .get(srv.url("/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&Value> = jobs.as_array().unwrap().iter().map(|j| &j["id"]).collect();
    assert_eq!(ids, vec![&second["id"], &first["id"]]);
}

#[tokio::test]
async fn presigned_urls_require_a_key() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/upload-url"))
        .json(&json!({ "contentType": "video/mp4" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/upload-url"))
        .json(&json!({ "key": "uploads/clip.mp4", "contentType": "video/mp4" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let url = body["url"].as_str().unwrap();
    assert!(url.contains("streamlab-test/uploads/clip.mp4"));
    assert!(url.contains("method=PUT"));

    let res = client.get(srv.url("/view-url")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/view-url?key=outputs/a/thumb.txt&bucket=other"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["url"].as_str().unwrap().starts_with("memory://other/outputs/a/thumb.txt"));
}
