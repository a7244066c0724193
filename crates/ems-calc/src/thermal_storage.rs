//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Derived-value calculations for energy components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use ems_bus::{Channel, ChannelBus, ChannelCollection, Value};
use ems_common::{
    ComponentError, ConfigRecord, ConfigurationError, FieldSpec, FromConfig, ResolvedConfig,
};
use ems_core::{Component, ComponentStatus, ComponentType, EmsContext, Schedule};
use ems_metrics::{CalculatorMetrics, TickOutcome};
use ems_rt::AlignedSchedule;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::calculator::{Calculator, CalculatorTask, SampleStep, SampleTracker};
use crate::errors::{CalculationError, Result};
use crate::heat_source::{HeatSource, HeatSources};

const KJ_PER_KWH: f64 = 3600.0;

/// Settings of a thermal energy storage, read from its component record.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalStorageConfig {
    /// Storage volume in litres.
    pub capacity: f64,
    /// Medium density in kg/l.
    pub density: f64,
    /// Medium specific heat in kJ/(kg·K).
    pub specific_heat: f64,
    /// Calculation interval in minutes.
    pub interval: u64,
    /// Minutes before each interval boundary at which the calculation fires.
    pub lead: u64,
    /// Pattern of the temperature sensor channels.
    pub temperatures: String,
    /// Channel receiving the aggregated temperature.
    pub temperature: String,
    pub power: String,
    pub energy: String,
}

impl ThermalStorageConfig {
    /// Medium mass in kg.
    pub fn mass(&self) -> f64 {
        self.capacity * self.density
    }
}

fn positive(config: &ResolvedConfig, name: &str) -> std::result::Result<f64, ConfigurationError> {
    let value = config.get_f64(name)?;
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigurationError::invalid(name, format!("{value} must be positive")))
    }
}

impl FromConfig for ThermalStorageConfig {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::mandatory("capacity"),
            FieldSpec::optional("density", 1.0),
            FieldSpec::optional("specific_heat", 4.1813),
            FieldSpec::optional("interval", 15_i64),
            FieldSpec::optional("lead", 5_i64),
            FieldSpec::optional("temperatures", "temp*"),
            FieldSpec::optional("temperature", "temp"),
            FieldSpec::mandatory("power"),
            FieldSpec::mandatory("energy"),
        ]
    }

    fn from_resolved(config: &ResolvedConfig) -> std::result::Result<Self, ConfigurationError> {
        let interval = config.get_u64("interval")?;
        if interval == 0 {
            return Err(ConfigurationError::invalid("interval", "must be positive"));
        }
        Ok(Self {
            capacity: positive(config, "capacity")?,
            density: positive(config, "density")?,
            specific_heat: positive(config, "specific_heat")?,
            interval,
            lead: config.get_u64("lead")?,
            temperatures: config.get_str("temperatures")?.to_owned(),
            temperature: config.get_str("temperature")?.to_owned(),
            power: config.get_str("power")?.to_owned(),
            energy: config.get_str("energy")?.to_owned(),
        })
    }
}

/// Turns storage temperature samples into thermal power and energy readings.
///
/// Energy released by the medium is `specific_heat × mass × (previous − new)`
/// minus whatever the bound heat sources fed in over the same span.
pub struct ThermalEnergyCalculator {
    name: String,
    specific_heat: f64,
    mass: f64,
    sensors: ChannelCollection,
    aggregate: Option<Arc<Channel>>,
    temperature: Arc<Channel>,
    power: Arc<Channel>,
    energy: Arc<Channel>,
    samples: SampleTracker,
    total_kwh: f64,
    heat_sources: HeatSources,
    // Last cumulative reading per heat source, in kWh.
    baselines: IndexMap<String, f64>,
}

impl ThermalEnergyCalculator {
    pub fn new(
        name: impl Into<String>,
        bus: &ChannelBus,
        config: &ThermalStorageConfig,
        heat_sources: HeatSources,
    ) -> std::result::Result<Self, ComponentError> {
        let sensors = bus.resolve(&config.temperatures)?.excluding(&config.temperature);
        let Some(first) = sensors.get(0).cloned() else {
            return Err(ConfigurationError::invalid(
                "temperatures",
                format!("pattern '{}' matches no sensor channel", config.temperatures),
            )
            .into());
        };
        // A single sensor is its own aggregate.
        let aggregate = if sensors.len() > 1 {
            Some(bus.channel(&config.temperature)?)
        } else {
            None
        };
        Ok(Self {
            name: name.into(),
            specific_heat: config.specific_heat,
            mass: config.mass(),
            temperature: aggregate.clone().unwrap_or(first),
            sensors,
            aggregate,
            power: bus.channel(&config.power)?,
            energy: bus.channel(&config.energy)?,
            samples: SampleTracker::default(),
            total_kwh: 0.0,
            heat_sources,
            baselines: IndexMap::new(),
        })
    }

    pub fn total_energy(&self) -> f64 {
        self.total_kwh
    }

    pub fn last_sample(&self) -> Option<&Value> {
        self.samples.previous()
    }

    pub fn sensors(&self) -> &ChannelCollection {
        &self.sensors
    }

    pub fn thermal_power(&self) -> Value {
        self.power.latest()
    }

    /// Aggregate temperature, or the single sensor's latest value.
    pub fn temperature(&self) -> Value {
        self.temperature.latest()
    }

    pub fn power_channel(&self) -> &Arc<Channel> {
        &self.power
    }

    /// The aggregate channel, or the only sensor when there is one.
    pub fn temperature_channel(&self) -> &Arc<Channel> {
        &self.temperature
    }

    /// Energy in kJ the heat sources produced since their last reading, and the new readings.
    fn auxiliary_energy(&self) -> Result<(f64, IndexMap<String, f64>)> {
        let mut produced = 0.0;
        let mut readings = IndexMap::new();
        for source in self.heat_sources.snapshot() {
            let reading = source
                .thermal_energy()
                .map_err(|source_err| CalculationError::HeatSource {
                    id: source.id().to_owned(),
                    source: source_err,
                })?;
            let kwh = reading
                .as_f64()
                .ok_or_else(|| CalculationError::NotNumeric(source.id().to_owned()))?;
            if let Some(baseline) = self.baselines.get(source.id()) {
                produced += (kwh - baseline) * KJ_PER_KWH;
            }
            readings.insert(source.id().to_owned(), kwh);
        }
        Ok((produced, readings))
    }
}

impl Calculator for ThermalEnergyCalculator {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self, now_ms: i64) -> Result<TickOutcome> {
        let sample = self.sensors.mean(now_ms)?;
        if let Some(aggregate) = &self.aggregate {
            aggregate.publish(sample.clone());
        }
        let current = sample
            .as_f64()
            .ok_or_else(|| CalculationError::NotNumeric(self.sensors.pattern().to_owned()))?;

        match self.samples.classify(&sample) {
            SampleStep::Primed => {
                let (_, readings) = self.auxiliary_energy()?;
                self.baselines = readings;
                self.samples.retain(sample);
                Ok(TickOutcome::Primed)
            }
            SampleStep::Stale => {
                self.samples.retain(sample);
                Ok(TickOutcome::Stale)
            }
            SampleStep::Fresh { previous } => {
                let previous_temp = previous
                    .as_f64()
                    .ok_or_else(|| CalculationError::NotNumeric(self.sensors.pattern().to_owned()))?;
                let elapsed_s = (sample.timestamp() - previous.timestamp()) as f64 / 1000.0;
                let (auxiliary, readings) = self.auxiliary_energy()?;

                // Q[kJ] = cp × m[kg] × dT[K]
                let delta = self.specific_heat * self.mass * (previous_temp - current) - auxiliary;
                let total = self.total_kwh + delta / KJ_PER_KWH;
                let timestamp = sample.timestamp();
                self.energy.publish(Value::double(total, timestamp));
                self.power.publish(Value::double(delta / elapsed_s, timestamp));

                self.total_kwh = total;
                self.baselines = readings;
                self.samples.retain(sample);
                Ok(TickOutcome::Published)
            }
        }
    }
}

struct ActiveStorage {
    config: ThermalStorageConfig,
    calculator: Arc<Mutex<ThermalEnergyCalculator>>,
    // Read without the calculator lock, which is held while a tick publishes.
    power: Arc<Channel>,
    temperature: Arc<Channel>,
    task: CalculatorTask,
}

/// Thermal energy storage component with its periodic energy calculation.
pub struct ThermalEnergyStorage {
    id: String,
    bus: Arc<ChannelBus>,
    runtime: Handle,
    metrics: Option<CalculatorMetrics>,
    status: Mutex<ComponentStatus>,
    heat_sources: HeatSources,
    active: Mutex<Option<ActiveStorage>>,
}

impl ThermalEnergyStorage {
    pub fn new(id: impl Into<String>, context: &EmsContext, runtime: Handle) -> Self {
        Self {
            id: id.into(),
            bus: context.bus().clone(),
            runtime,
            metrics: context.calculator_metrics().cloned(),
            status: Mutex::new(ComponentStatus::Starting),
            heat_sources: HeatSources::default(),
            active: Mutex::new(None),
        }
    }

    pub fn bind_heat_source(&self, source: Arc<dyn HeatSource>) -> bool {
        self.heat_sources.bind(source)
    }

    pub fn unbind_heat_source(&self, id: &str) -> Option<Arc<dyn HeatSource>> {
        self.heat_sources.unbind(id)
    }

    pub fn heat_sources(&self) -> &HeatSources {
        &self.heat_sources
    }

    pub fn capacity(&self) -> Option<f64> {
        self.active.lock().as_ref().map(|active| active.config.capacity)
    }

    pub fn calculator(&self) -> Option<Arc<Mutex<ThermalEnergyCalculator>>> {
        self.active.lock().as_ref().map(|active| active.calculator.clone())
    }

    pub fn thermal_power(&self) -> std::result::Result<Value, ComponentError> {
        Ok(self.active_channels()?.0.latest())
    }

    pub fn temperature(&self) -> std::result::Result<Value, ComponentError> {
        Ok(self.active_channels()?.1.latest())
    }

    /// Stop the calculation timer and wait for it to exit.
    pub async fn shutdown(&self) {
        let active = self.active.lock().take();
        if let Some(active) = active {
            active.task.join().await;
            info!(component = %self.id, "thermal storage calculation stopped");
        }
    }

    fn active_channels(&self) -> std::result::Result<(Arc<Channel>, Arc<Channel>), ComponentError> {
        self.active
            .lock()
            .as_ref()
            .map(|active| (active.power.clone(), active.temperature.clone()))
            .ok_or_else(|| ComponentError::unavailable(&self.id, "storage is not activated"))
    }
}

impl Component for ThermalEnergyStorage {
    fn id(&self) -> &str {
        &self.id
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::ThermalEnergyStorage
    }

    fn status(&self) -> ComponentStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: ComponentStatus) -> std::result::Result<(), ComponentError> {
        let previous = std::mem::replace(&mut *self.status.lock(), status);
        if previous != status {
            debug!(component = %self.id, from = %previous, to = %status, "status changed");
        }
        Ok(())
    }

    fn apply_schedule(&self, schedule: &Schedule) -> std::result::Result<(), ComponentError> {
        // Passive storage: nothing to actuate.
        debug!(component = %self.id, setpoints = schedule.len(), "schedule received");
        Ok(())
    }

    fn on_activate(&self, record: &ConfigRecord) -> std::result::Result<(), ComponentError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(ComponentError::rejected(&self.id, "already activated"));
        }
        let config = ThermalStorageConfig::from_record(record)?;
        let schedule = AlignedSchedule::minutes(config.interval, config.lead)?;
        let calculator = Arc::new(Mutex::new(ThermalEnergyCalculator::new(
            self.id.clone(),
            &self.bus,
            &config,
            self.heat_sources.clone(),
        )?));
        let (power, temperature, sensors) = {
            let calculator = calculator.lock();
            (
                calculator.power_channel().clone(),
                calculator.temperature_channel().clone(),
                calculator.sensors().names(),
            )
        };
        debug!(
            component = %self.id,
            sensors = ?sensors,
            mass_kg = config.mass(),
            interval_min = config.interval,
            lead_min = config.lead,
            "starting thermal power calculation"
        );
        let task = CalculatorTask::spawn(
            &self.runtime,
            calculator.clone(),
            schedule,
            self.metrics.clone(),
        );
        *active = Some(ActiveStorage {
            config,
            calculator,
            power,
            temperature,
            task,
        });
        info!(component = %self.id, "thermal storage activated");
        Ok(())
    }

    fn on_deactivate(&self) -> std::result::Result<(), ComponentError> {
        if let Some(active) = self.active.lock().take() {
            active.task.stop();
            info!(component = %self.id, "thermal storage deactivated");
        }
        Ok(())
    }
}
