use std::sync::Arc;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use codebox::config::{
    ByteSize, Config, LanguageConfig, LimitsConfig, MilliSecond, SandboxConfig, SandboxMode,
    ServerConfig,
};
use codebox::queue::JobQueue;
use codebox::routes::{ServiceStatus, execute_handler, json_error_handler, status_handler};
use codebox::security::SecurityScanner;
use codebox::worker::worker;
use codebox::workspace::WorkspaceStore;

// Configuration with a shell profile so submissions run on the host during tests
fn shell_config(auth_secret: Option<&str>) -> Config {
    Config {
        server: ServerConfig {
            bind_address: None,
            bind_port: None,
            auth_secret: auth_secret.map(str::to_string),
        },
        limits: LimitsConfig {
            case_timeout: MilliSecond(5000),
            compile_timeout: MilliSecond(10000),
            memory_limit: ByteSize(256 * 1024 * 1024),
            sample_interval: MilliSecond(10),
        },
        sandbox: SandboxConfig {
            mode: SandboxMode::Native,
            workspace_root: None,
            banned_tokens: vec!["forbidden_token".to_string()],
            seccomp_policy_path: None,
        },
        languages: vec![LanguageConfig {
            name: "shell".to_string(),
            file_name: "main.sh".to_string(),
            entry_symbol: None,
            compile_command: Some(vec![
                "sh".to_string(),
                "-n".to_string(),
                "%SOURCE%".to_string(),
            ]),
            run_command: vec!["sh".to_string(), "%SOURCE%".to_string()],
            image: None,
            container_compile_command: None,
            container_run_command: None,
        }],
    }
}

// Starts a real execution worker draining the queue, the same wiring main uses
fn spawn_worker(
    config: &Arc<Config>,
    queue: &Arc<JobQueue>,
    root: &std::path::Path,
) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let scanner = Arc::new(SecurityScanner::new(config.sandbox.banned_tokens.clone()));
    let store = Arc::new(WorkspaceStore::new(root).expect("workspace root"));
    tokio::spawn(worker(
        1,
        config.clone(),
        scanner,
        store,
        queue.clone(),
        CancellationToken::new(),
    ))
}

macro_rules! init_app {
    ($config:expr, $queue:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($config.clone()))
                .app_data(web::Data::from($queue.clone()))
                .app_data(web::Data::new(ServiceStatus::now()))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .service(execute_handler)
                .service(status_handler),
        )
        .await
    };
}

#[actix_web::test]
async fn test_execute_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let _worker = spawn_worker(&config, &queue, root.path());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "read a b\necho $((a+b))",
        "language": "shell",
        "inputs": ["1 2", "3 4"],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: &body,
        expected: json!({
            "status": "success",
            "message": "all cases finished",
            "outputs": ["3", "7"],
        })
    );
    assert_eq!(body["cases"][0]["outcome"], "success");
    assert_eq!(body["cases"][1]["output"], "7");
    assert!(body["cases"][0]["time"].is_u64());
    assert!(body["cases"][0]["memory"].is_u64());
}

#[actix_web::test]
async fn test_execute_reports_runtime_error_cases() {
    let root = tempfile::tempdir().unwrap();
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let _worker = spawn_worker(&config, &queue, root.path());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "read x\necho died >&2\nexit 9",
        "language": "shell",
        "inputs": ["a"],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "1 of 1 cases failed");
    assert_eq!(body["cases"][0]["outcome"], "runtime_error");
    assert_eq!(body["cases"][0]["output"], "died");
}

#[actix_web::test]
async fn test_execute_reports_compile_failure() {
    let root = tempfile::tempdir().unwrap();
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let _worker = spawn_worker(&config, &queue, root.path());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "if then fi (",
        "language": "shell",
        "inputs": ["1 2"],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "compile_failed");
    assert!(
        body["message"].as_str().unwrap().contains("yntax error"),
        "{body}"
    );
    assert_eq!(body["cases"], json!([]));
    assert_eq!(body["outputs"], json!([]));
}

#[actix_web::test]
async fn test_execute_blocks_banned_tokens() {
    let root = tempfile::tempdir().unwrap();
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let _worker = spawn_worker(&config, &queue, root.path());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "echo forbidden_token",
        "language": "shell",
        "inputs": ["1"],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: &body,
        expected: json!({
            "status": "failed",
            "message": "dangerous or sensitive code",
        })
    );
}

#[actix_web::test]
async fn test_execute_rejects_wrong_secret() {
    let config = Arc::new(shell_config(Some("open sesame")));
    let queue = Arc::new(JobQueue::new());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "echo hi",
        "language": "shell",
        "inputs": ["1"],
    });

    // No header at all
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"reason": "ERR_WRONG_SECRET", "code": 2}));

    // Wrong value
    let req = test::TestRequest::post()
        .uri("/execute")
        .insert_header(("auth", "let me in"))
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn test_execute_accepts_the_right_secret() {
    let config = Arc::new(shell_config(Some("open sesame")));
    let queue = Arc::new(JobQueue::new());
    let app = init_app!(config, queue);

    // Empty inputs short-circuit before the queue, so no worker is needed
    let request_body = json!({
        "source_code": "echo hi",
        "language": "shell",
        "inputs": [],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .insert_header(("auth", "open sesame"))
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["message"], "no test cases supplied");
}

#[actix_web::test]
async fn test_execute_fails_fast_on_empty_inputs() {
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "echo hi",
        "language": "shell",
        "inputs": [],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["message"], "no test cases supplied");
    assert!(body["outputs"].as_array().unwrap().is_empty());
    assert!(body["cases"].as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn test_execute_rejects_unknown_language() {
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let app = init_app!(config, queue);

    let request_body = json!({
        "source_code": "package main",
        "language": "golang",
        "inputs": ["1"],
    });
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"reason": "ERR_UNKNOWN_LANGUAGE", "code": 3}));
}

#[actix_web::test]
async fn test_execute_rejects_malformed_json() {
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let app = init_app!(config, queue);

    let req = test::TestRequest::post()
        .uri("/execute")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"source_code\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"reason": "ERR_INVALID_ARGUMENT", "code": 1}));
}

#[actix_web::test]
async fn test_status_reports_liveness() {
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let app = init_app!(config, queue);

    let req = test::TestRequest::get().uri("/status").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["service"], "codebox");
    assert_eq!(body["state"], "ok");
    assert!(!body["started_at"].as_str().unwrap().is_empty());
}

#[actix_web::test]
async fn test_submissions_queue_behind_one_worker() {
    let root = tempfile::tempdir().unwrap();
    let config = Arc::new(shell_config(None));
    let queue = Arc::new(JobQueue::new());
    let _worker = spawn_worker(&config, &queue, root.path());
    let app = init_app!(config, queue);

    for i in 0..3 {
        let request_body = json!({
            "source_code": format!("echo run{i}"),
            "language": "shell",
            "inputs": [""],
        });
        let req = test::TestRequest::post()
            .uri("/execute")
            .set_json(&request_body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["outputs"], json!([format!("run{i}")]));
    }
}
