//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; resolves port 0 to the port actually assigned.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    components_activated: IntGauge,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "emsd_starts_total",
            "Total number of times the energy manager daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "emsd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let components_activated = IntGauge::with_opts(Opts::new(
            "emsd_components_activated",
            "Components activated from configuration at startup",
        ))?;
        registry.register(Box::new(components_activated.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            components_activated,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_components_activated(&self, count: usize) {
        self.components_activated.set(count as i64);
    }
}

/// Supervisor loop instrumentation.
#[derive(Clone, Debug)]
pub struct ManagerMetrics {
    registry: SharedRegistry,
    passes_total: IntCounter,
    pass_seconds: Histogram,
    component_failures: IntCounterVec,
    registered_components: IntGauge,
    active_schedule_timestamp: IntGauge,
    maintenance: IntGauge,
}

impl ManagerMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let passes_total = IntCounter::with_opts(Opts::new(
            "ems_manager_passes_total",
            "Evaluation passes completed by the energy manager",
        ))?;
        registry.register(Box::new(passes_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let pass_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ems_manager_pass_seconds",
                "Wall time spent in one evaluation pass",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(pass_seconds.clone()))?;

        let component_failures = IntCounterVec::new(
            Opts::new(
                "ems_component_failures_total",
                "Status or schedule failures reported by components",
            ),
            &["component"],
        )?;
        registry.register(Box::new(component_failures.clone()))?;

        let registered_components = IntGauge::with_opts(Opts::new(
            "ems_registered_components",
            "Components bound to the energy manager",
        ))?;
        registry.register(Box::new(registered_components.clone()))?;

        let active_schedule_timestamp = IntGauge::with_opts(Opts::new(
            "ems_active_schedule_timestamp_ms",
            "Creation timestamp of the active control schedule",
        ))?;
        registry.register(Box::new(active_schedule_timestamp.clone()))?;

        let maintenance = IntGauge::with_opts(Opts::new(
            "ems_maintenance",
            "Indicator (0/1) whether maintenance mode is enabled",
        ))?;
        registry.register(Box::new(maintenance.clone()))?;

        Ok(Self {
            registry,
            passes_total,
            pass_seconds,
            component_failures,
            registered_components,
            active_schedule_timestamp,
            maintenance,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn observe_pass(&self, seconds: f64) {
        self.passes_total.inc();
        self.pass_seconds.observe(seconds);
    }

    pub fn record_failure(&self, component: &str) {
        self.component_failures
            .with_label_values(&[component])
            .inc();
    }

    pub fn set_registered(&self, count: usize) {
        self.registered_components.set(count as i64);
    }

    pub fn set_active_schedule(&self, timestamp: i64) {
        self.active_schedule_timestamp.set(timestamp);
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.set(if enabled { 1 } else { 0 });
    }
}

/// Outcome label for a calculator tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    Primed,
    Stale,
    Failed,
}

impl TickOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TickOutcome::Published => "published",
            TickOutcome::Primed => "primed",
            TickOutcome::Stale => "stale",
            TickOutcome::Failed => "failed",
        }
    }
}

/// Periodic calculator instrumentation.
#[derive(Clone, Debug)]
pub struct CalculatorMetrics {
    registry: SharedRegistry,
    ticks: IntCounterVec,
}

impl CalculatorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks = IntCounterVec::new(
            Opts::new(
                "ems_calculator_ticks_total",
                "Calculator firings by calculator and outcome",
            ),
            &["calculator", "outcome"],
        )?;
        registry.register(Box::new(ticks.clone()))?;
        Ok(Self { registry, ticks })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_tick(&self, calculator: &str, outcome: TickOutcome) {
        self.ticks
            .with_label_values(&[calculator, outcome.as_str()])
            .inc();
    }

    pub fn ticks(&self, calculator: &str, outcome: TickOutcome) -> u64 {
        self.ticks
            .with_label_values(&[calculator, outcome.as_str()])
            .get()
    }
}

pub use prometheus;
