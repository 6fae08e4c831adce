//! Health monitor tests: a controllable probe target plus a runtime
//! recording restarts. Failing probes past the retry threshold trigger a
//! restart of the same container; a healthy service never does.

use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use deploy::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec};
use deploy::HealthMonitor;

/// Runtime that only counts restart requests.
#[derive(Default)]
struct RestartRecorder {
    restarts: AtomicUsize,
}

#[async_trait]
impl ContainerRuntime for RestartRecorder {
    async fn ping(&self) -> deploy::Result<String> {
        Ok("fake/1".to_string())
    }

    async fn start(&self, _spec: &ContainerSpec) -> deploy::Result<()> {
        Ok(())
    }

    async fn stop(&self, _name: &str, _timeout: Duration) -> deploy::Result<()> {
        Ok(())
    }

    async fn remove(&self, _name: &str) -> deploy::Result<()> {
        Ok(())
    }

    async fn inspect(&self, _name: &str) -> deploy::Result<Option<ContainerInfo>> {
        Ok(None)
    }

    async fn list(&self) -> deploy::Result<Vec<ContainerInfo>> {
        Ok(Vec::new())
    }

    async fn restart(&self, _name: &str, _timeout: Duration) -> deploy::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Serve /health on an ephemeral port; the flag flips it between 200 and
/// 503.
async fn spawn_probe_target(healthy: Arc<AtomicBool>) -> String {
    let app = Router::new().route(
        "/health",
        get(move || {
            let healthy = healthy.clone();
            async move {
                if healthy.load(Ordering::SeqCst) {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/health", addr)
}

async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_healthy_service_is_never_restarted() {
    let healthy = Arc::new(AtomicBool::new(true));
    let url = spawn_probe_target(healthy.clone()).await;
    let runtime = Arc::new(RestartRecorder::default());

    let monitor = HealthMonitor::new(
        url,
        Duration::from_millis(30),
        Duration::from_millis(500),
        3,
        runtime.clone(),
        "todo-app".to_string(),
        Duration::from_secs(1),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = {
        let token = shutdown.clone();
        tokio::spawn(async move { monitor.run(token).await })
    };

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runtime.restarts.load(Ordering::SeqCst), 0);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_consecutive_failures_trigger_a_restart() {
    let healthy = Arc::new(AtomicBool::new(false));
    let url = spawn_probe_target(healthy.clone()).await;
    let runtime = Arc::new(RestartRecorder::default());

    let monitor = HealthMonitor::new(
        url,
        Duration::from_millis(30),
        Duration::from_millis(500),
        3,
        runtime.clone(),
        "todo-app".to_string(),
        Duration::from_secs(1),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = {
        let token = shutdown.clone();
        tokio::spawn(async move { monitor.run(token).await })
    };

    // Three consecutive failures mark the service unhealthy and restart it
    let restarted = {
        let runtime = runtime.clone();
        wait_for(
            move || runtime.restarts.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(3),
        )
        .await
    };
    assert!(restarted, "no restart after consecutive probe failures");

    // Recovery stops the restarting
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = runtime.restarts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runtime.restarts.load(Ordering::SeqCst), settled);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_target_counts_as_failure() {
    // Nothing listens on this port
    let runtime = Arc::new(RestartRecorder::default());
    let monitor = HealthMonitor::new(
        "http://127.0.0.1:1/health".to_string(),
        Duration::from_millis(30),
        Duration::from_millis(200),
        2,
        runtime.clone(),
        "todo-app".to_string(),
        Duration::from_secs(1),
    )
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = {
        let token = shutdown.clone();
        tokio::spawn(async move { monitor.run(token).await })
    };

    let restarted = {
        let runtime = runtime.clone();
        wait_for(
            move || runtime.restarts.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(3),
        )
        .await
    };
    assert!(restarted, "unreachable target never marked unhealthy");

    shutdown.cancel();
    task.await.unwrap();
}
