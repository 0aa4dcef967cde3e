use std::time::Duration;

use genflow_api::app::{self, AppConfig};
use genflow_infra::config::BridgeConfig;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(config: AppConfig) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = app::build_app(&config).expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
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

fn fast_config() -> AppConfig {
    let mut config = AppConfig::in_memory();
    config.bridge = BridgeConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_timeout(Duration::from_secs(2));
    config
}

async fn wait_terminal(client: &reqwest::Client, server: &TestServer, job_id: &str) -> Value {
    // Jobs finish asynchronously; poll the status endpoint.
    for _ in 0..200 {
        let res = client
            .get(server.url(&format!("/generations/{job_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body: Value = res.json().await.unwrap();
        if body["status"] == "succeeded" || body["status"] == "failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {job_id} did not finish within timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_backend() {
    let server = TestServer::spawn(fast_config()).await;

    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "in_memory");
}

#[tokio::test(flavor = "multi_thread")]
async fn submitted_generation_completes() {
    let server = TestServer::spawn(fast_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/generations"))
        .json(&json!({ "store_id": "s-1", "kind": "scenario", "prompt": "holiday promo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let view = wait_terminal(&client, &server, &job_id).await;
    assert_eq!(view["status"], "succeeded");
    assert_eq!(view["progress"], 100);
    assert_eq!(view["result_key"], format!("s-1/scenario/{job_id}.json"));

    let list: Value = client
        .get(server.url("/generations"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["jobs"].as_array().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_job_id_conflicts() {
    let server = TestServer::spawn(fast_config()).await;
    let client = reqwest::Client::new();
    let body = json!({ "job_id": "campaign-7", "store_id": "s-1", "kind": "media", "prompt": "banner" });

    let first = client.post(server.url("/generations")).json(&body).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = client.post(server.url("/generations")).json(&body).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let err: Value = second.json().await.unwrap();
    assert_eq!(err["error"], "already_exists");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_job_is_not_found() {
    let server = TestServer::spawn(fast_config()).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/generations/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(server.url("/generations/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_store_fails_the_job() {
    let server = TestServer::spawn(fast_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/generations"))
        .json(&json!({ "store_id": "unknown-9", "kind": "media", "prompt": "banner" }))
        .send()
        .await
        .unwrap();
    let job_id = res.json::<Value>().await.unwrap()["job_id"].as_str().unwrap().to_string();

    let view = wait_terminal(&client, &server, &job_id).await;
    assert_eq!(view["status"], "failed");
    assert!(view["error"].as_str().unwrap().starts_with("remote_error:"));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_marks_job_failed() {
    // No responder: the pipeline waits on the bridge until cancelled.
    let mut config = fast_config();
    config.demo_workers = false;
    let server = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/generations"))
        .json(&json!({ "job_id": "to-cancel", "store_id": "s-1", "kind": "scenario", "prompt": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client.delete(server.url("/generations/to-cancel")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view: Value = res.json().await.unwrap();
    assert_eq!(view["status"], "failed");
    assert_eq!(view["error"], "cancelled");
}

#[tokio::test(flavor = "multi_thread")]
async fn store_info_round_trips_through_the_bridge() {
    let server = TestServer::spawn(fast_config()).await;
    let client = reqwest::Client::new();

    let res = client.post(server.url("/stores/s-5/info")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let info: Value = res.json().await.unwrap();
    assert_eq!(info["store_id"], "s-5");
    assert_eq!(info["name"], "Store s-5");

    let res = client.post(server.url("/stores/unknown-1/info")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test(flavor = "multi_thread")]
async fn store_info_timeout_asks_to_try_again() {
    let mut config = fast_config();
    config.demo_workers = false;
    config.bridge = config.bridge.with_timeout(Duration::from_millis(100));
    let server = TestServer::spawn(config).await;
    let client = reqwest::Client::new();

    let res = client.post(server.url("/stores/s-1/info")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "timeout");
    assert!(err["message"].as_str().unwrap().contains("try again"));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_submission_is_rejected() {
    let server = TestServer::spawn(fast_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/generations"))
        .json(&json!({ "store_id": " ", "kind": "media", "prompt": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
