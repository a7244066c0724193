//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Derived-value calculations for energy components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ems_bus::Value;
use ems_common::time::now_ms;
use ems_metrics::{CalculatorMetrics, TickOutcome};
use ems_rt::{AlignedSchedule, AlignedTicker};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::Result;

/// Periodic derivation of channels from raw samples.
pub trait Calculator: Send + 'static {
    fn name(&self) -> &str;

    /// Run one firing. Errors skip the tick and keep the previous sample.
    fn tick(&mut self, now_ms: i64) -> Result<TickOutcome>;
}

/// Classification of a fresh sample against the retained one.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleStep {
    /// No previous sample; store and publish nothing.
    Primed,
    /// Not newer than the previous sample; nothing to derive.
    Stale,
    /// Derive from `previous` to the new sample.
    Fresh { previous: Value },
}

/// Last accepted sample of a calculator.
#[derive(Debug, Clone, Default)]
pub struct SampleTracker {
    previous: Option<Value>,
}

impl SampleTracker {
    pub fn classify(&self, sample: &Value) -> SampleStep {
        match &self.previous {
            None => SampleStep::Primed,
            Some(previous) if sample.timestamp() <= previous.timestamp() => SampleStep::Stale,
            Some(previous) => SampleStep::Fresh {
                previous: previous.clone(),
            },
        }
    }

    pub fn retain(&mut self, sample: Value) {
        self.previous = Some(sample);
    }

    pub fn previous(&self) -> Option<&Value> {
        self.previous.as_ref()
    }
}

/// Tokio task driving a [`Calculator`] on an aligned schedule.
#[derive(Debug)]
pub struct CalculatorTask {
    name: String,
    shutdown: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CalculatorTask {
    pub fn spawn<C: Calculator>(
        runtime: &Handle,
        calculator: Arc<Mutex<C>>,
        schedule: AlignedSchedule,
        metrics: Option<CalculatorMetrics>,
    ) -> Self {
        let name = calculator.lock().name().to_owned();
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let task_name = name.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = AlignedTicker::start(&schedule);
            info!(calculator = %task_name, "calculator timer started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let outcome = run_tick(&task_name, &calculator, now_ms());
                        if let Some(metrics) = &metrics {
                            metrics.record_tick(&task_name, outcome);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(calculator = %task_name, "calculator shutdown signal received");
                        break;
                    }
                }
            }
            info!(calculator = %task_name, "calculator timer stopped");
        });
        Self {
            name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the timer to stop after the current firing.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Stop the timer and wait for the task to exit.
    pub async fn join(&self) {
        self.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(calculator = %self.name, error = %err, "calculator task failed");
            }
        }
    }
}

impl Drop for CalculatorTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_tick<C: Calculator>(name: &str, calculator: &Mutex<C>, now: i64) -> TickOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| calculator.lock().tick(now)));
    match result {
        Ok(Ok(outcome)) => {
            debug!(calculator = %name, outcome = outcome.as_str(), "calculator tick");
            outcome
        }
        Ok(Err(err)) => {
            warn!(calculator = %name, error = %err, "calculator tick skipped");
            TickOutcome::Failed
        }
        Err(_) => {
            error!(calculator = %name, "calculator tick panicked");
            TickOutcome::Failed
        }
    }
}
