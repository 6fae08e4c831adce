//! HTTP health monitoring for the application service.
//!
//! Follows the compose health check: probe at a fixed interval with a
//! bounded timeout, mark the service unhealthy after the configured
//! number of consecutive failures, and apply restart policy "always" by
//! relaunching the same container. No image change is involved.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::compose::HealthCheckSpec;
use crate::error::Result;
use crate::runtime::ContainerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Consecutive-failure counting, separated from the probing so the
/// threshold logic is testable on its own.
#[derive(Debug)]
pub struct HealthTracker {
    retries: u32,
    consecutive_failures: u32,
    state: HealthState,
}

impl HealthTracker {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            consecutive_failures: 0,
            state: HealthState::Healthy,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Record one probe result; returns the new state when it changed.
    pub fn record(&mut self, ok: bool) -> Option<HealthState> {
        if ok {
            self.consecutive_failures = 0;
            if self.state == HealthState::Unhealthy {
                self.state = HealthState::Healthy;
                return Some(HealthState::Healthy);
            }
            return None;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.retries && self.state == HealthState::Healthy {
            self.state = HealthState::Unhealthy;
            return Some(HealthState::Unhealthy);
        }
        None
    }

    /// A restart gives the container a fresh chance; counting starts over.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.state = HealthState::Healthy;
    }
}

pub struct HealthMonitor {
    url: String,
    interval: Duration,
    retries: u32,
    runtime: Arc<dyn ContainerRuntime>,
    container_name: String,
    stop_timeout: Duration,
    http: reqwest::Client,
}

impl HealthMonitor {
    /// Probe `http://127.0.0.1:<host_port><path>` per the compose check.
    pub fn from_check(
        check: &HealthCheckSpec,
        host_port: u16,
        runtime: Arc<dyn ContainerRuntime>,
        container_name: String,
        stop_timeout: Duration,
    ) -> Result<Self> {
        Self::new(
            format!("http://127.0.0.1:{}{}", host_port, check.path),
            Duration::from_secs(check.interval_secs),
            Duration::from_secs(check.timeout_secs),
            check.retries,
            runtime,
            container_name,
            stop_timeout,
        )
    }

    pub fn new(
        url: String,
        interval: Duration,
        timeout: Duration,
        retries: u32,
        runtime: Arc<dyn ContainerRuntime>,
        container_name: String,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            interval,
            retries,
            runtime,
            container_name,
            stop_timeout,
            http,
        })
    }

    /// One probe: success is any 2xx answer within the timeout.
    pub async fn probe_once(&self) -> bool {
        match self.http.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// The monitoring loop. Stops promptly on cancellation.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = HealthTracker::new(self.retries);

        tracing::info!(
            url = %self.url,
            interval_secs = self.interval.as_secs(),
            retries = self.retries,
            "[Health] Monitoring application service"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("[Health] Shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let ok = self.probe_once().await;
                    match tracker.record(ok) {
                        Some(HealthState::Unhealthy) => {
                            tracing::warn!(
                                container = %self.container_name,
                                "[Health] Service unhealthy after {} consecutive failures, restarting",
                                self.retries
                            );
                            match self
                                .runtime
                                .restart(&self.container_name, self.stop_timeout)
                                .await
                            {
                                Ok(()) => tracker.reset(),
                                Err(e) => {
                                    tracing::error!(
                                        container = %self.container_name,
                                        "[Health] Restart failed: {}",
                                        e
                                    );
                                }
                            }
                        }
                        Some(HealthState::Healthy) => {
                            tracing::info!(
                                container = %self.container_name,
                                "[Health] Service recovered"
                            );
                        }
                        None => {}
                    }
                }
            }
        }
    }
}
