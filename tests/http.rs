//! End-to-end tests over a real socket
//!
//! Python scenarios are skipped when no `python3` is on PATH; the rest drive
//! `sh` so they run anywhere.

use course_runner::config::{RunnerConfig, ServerConfig};
use course_runner::gateway::{build_router, AppState};
use course_runner::sandbox::ExecutionRequest;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

async fn spawn_server(runner: RunnerConfig) -> (String, AppState) {
    let state = AppState::new(runner);
    let app = build_router(state.clone(), &ServerConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn sh_runner() -> RunnerConfig {
    RunnerConfig {
        interpreter: PathBuf::from("sh"),
        args: vec!["-c".to_string()],
        ..RunnerConfig::default()
    }
}

fn has_python() -> bool {
    which::which("python3").is_ok()
}

async fn execute(base: &str, code: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/execute", base))
        .json(&serde_json::json!({ "code": code }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn python_hello_is_a_single_line() {
    if !has_python() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let (base, _) = spawn_server(RunnerConfig::default()).await;

    let response = execute(&base, r#"print("hello")"#).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello\n");
}

#[tokio::test]
async fn python_exception_is_streamed_with_success_status() {
    if !has_python() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let (base, _) = spawn_server(RunnerConfig::default()).await;

    let response = execute(&base, "1/0").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("Traceback"), "unexpected body: {body}");
    assert!(body.contains("ZeroDivisionError"));
}

#[tokio::test]
async fn python_output_arrives_progressively() {
    if !has_python() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let (base, _) = spawn_server(RunnerConfig::default()).await;

    let response = execute(&base, "import time; print(1); time.sleep(0.2); print(2)").await;
    let mut body = response.bytes_stream();

    let mut received = Vec::new();
    let mut first_at = None;
    let mut second_at = None;
    while let Some(frame) = body.next().await {
        received.extend_from_slice(&frame.unwrap());
        let text = String::from_utf8_lossy(&received);
        if first_at.is_none() && text.starts_with("1\n") {
            first_at = Some(Instant::now());
        }
        if second_at.is_none() && text.contains("2\n") {
            second_at = Some(Instant::now());
        }
    }

    assert_eq!(String::from_utf8_lossy(&received), "1\n2\n");
    let gap = second_at.unwrap() - first_at.expect("first line arrived alone");
    assert!(gap >= Duration::from_millis(100), "lines arrived {gap:?} apart");
}

#[tokio::test]
async fn python_empty_code_yields_empty_body() {
    if !has_python() {
        eprintln!("python3 not found, skipping");
        return;
    }
    let (base, state) = spawn_server(RunnerConfig::default().with_max_concurrent(1)).await;

    let response = execute(&base, "").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "");

    // The only slot comes back once the child has been reaped
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.launcher().available_slots() != 1 {
        assert!(Instant::now() < deadline, "slot never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn stdout_lines_precede_stderr_lines() {
    let (base, _) = spawn_server(sh_runner()).await;

    let code = "echo e1 >&2; echo o1; echo e2 >&2; echo o2; echo o3";
    let body = execute(&base, code).await.text().await.unwrap();

    assert_eq!(body, "o1\no2\no3\ne1\ne2\n");
}

#[tokio::test]
async fn deterministic_code_gives_identical_bodies() {
    let (base, _) = spawn_server(sh_runner()).await;

    let code = "for i in 1 2 3 4 5; do echo line $i; done; echo warn >&2";
    let first = execute(&base, code).await.text().await.unwrap();
    let second = execute(&base, code).await.text().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.lines().count(), 6);
}

#[tokio::test]
async fn timeout_appends_notice() {
    let (base, _) =
        spawn_server(sh_runner().with_timeout(Duration::from_millis(300))).await;

    let started = Instant::now();
    let body = execute(&base, "echo started; exec sleep 30").await.text().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(body.starts_with("started\n"));
    assert!(body.contains("Execution timed out"), "unexpected body: {body}");
}

#[tokio::test]
async fn missing_interpreter_is_json_error() {
    let (base, _) =
        spawn_server(RunnerConfig::default().with_interpreter("/nonexistent/python3")).await;

    let response = execute(&base, "print(1)").await;
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn exhausted_slots_return_service_unavailable() {
    let (base, state) = spawn_server(sh_runner().with_max_concurrent(1)).await;

    let held = state
        .launcher()
        .launch(ExecutionRequest::new("sleep 5"))
        .unwrap();

    let response = execute(&base, "echo hi").await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    drop(held);

    // The slot returns after the background reap
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let response = execute(&base, "echo hi").await;
        if response.status() == reqwest::StatusCode::OK {
            assert_eq!(response.text().await.unwrap(), "hi\n");
            break;
        }
        assert!(Instant::now() < deadline, "slot never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
