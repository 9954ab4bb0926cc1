//! Battery Change Monitor
//!
//! The poll/compare/persist/notify loop. Each cycle fetches a battery
//! reading, compares it against the persisted last-known state, raises a
//! notification when range or charge moved, and saves the new state.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::notify::Notifier;
use crate::storage::StateStore;
use crate::telemetry::{BatteryReading, TelemetryClient, TelemetryError};

/// Default seconds between polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Seconds to wait after a failed cycle before retrying
const FAULT_RETRY_DELAY_SECS: u64 = 30;

const NOTIFICATION_TITLE: &str = "Ford EV Battery Update";
const STATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Source of battery readings, abstracted so the monitor can be driven
/// without a live upstream
#[async_trait]
pub trait BatterySource: Send + Sync {
    /// Current battery reading; `None` when the vehicle reported no usable
    /// battery metrics
    async fn battery_reading(&self) -> Result<Option<BatteryReading>, TelemetryError>;
}

#[async_trait]
impl BatterySource for TelemetryClient {
    async fn battery_reading(&self) -> Result<Option<BatteryReading>, TelemetryError> {
        Ok(self.fetch_raw_status().await?.battery_reading())
    }
}

/// Durable record of the last observed battery reading
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    pub last_range: Option<i64>,
    pub last_charge: Option<i64>,
    #[serde(default)]
    pub last_update: String,
}

impl MonitorState {
    /// Both fields observed in a prior cycle
    pub fn has_baseline(&self) -> bool {
        self.last_range.is_some() && self.last_charge.is_some()
    }

    /// True only when a full baseline exists and at least one field moved.
    /// A first run (absent fields) never counts as a change.
    pub fn differs_from(&self, reading: &BatteryReading) -> bool {
        match (self.last_range, self.last_charge) {
            (Some(range), Some(charge)) => {
                range != reading.range_miles || charge != reading.charge_percent
            }
            _ => false,
        }
    }

    fn record(&mut self, reading: &BatteryReading) {
        self.last_range = Some(reading.range_miles);
        self.last_charge = Some(reading.charge_percent);
        self.last_update = reading.captured_at.format(STATE_TIME_FORMAT).to_string();
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Reading differed from the baseline; a notification was attempted
    Changed,
    /// Reading matched the baseline, or this was the first observation
    NoChange,
    /// The vehicle reported no usable battery metrics
    Unavailable,
}

/// Orchestrates the poll/compare/persist/notify loop
pub struct ChangeMonitor {
    source: Box<dyn BatterySource>,
    notifier: Box<dyn Notifier>,
    store: StateStore,
    state: MonitorState,
    interval: Duration,
}

impl ChangeMonitor {
    /// Create a monitor, loading the prior state from the store
    pub fn new(
        source: Box<dyn BatterySource>,
        notifier: Box<dyn Notifier>,
        store: StateStore,
        interval: Duration,
    ) -> Self {
        let state = store.load();
        Self {
            source,
            notifier,
            store,
            state,
            interval,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Run one poll cycle. Errors propagate to the caller with the
    /// persisted state untouched.
    pub async fn tick(&mut self) -> Result<CycleOutcome, TelemetryError> {
        let Some(reading) = self.source.battery_reading().await? else {
            info!("Battery information not available");
            return Ok(CycleOutcome::Unavailable);
        };

        info!(
            "Current battery status - Range: {} miles, Charge: {}%",
            reading.range_miles, reading.charge_percent
        );

        let changed = self.state.differs_from(&reading);
        if changed {
            let message = self.delta_message(&reading);
            if !self.notifier.notify(NOTIFICATION_TITLE, &message) {
                println!("[NOTIFICATION] {}: {}", NOTIFICATION_TITLE, message);
            }
        }

        // State is persisted whether or not a notification fired; a failed
        // save is retried next cycle.
        self.state.record(&reading);
        if let Err(e) = self.store.save(&self.state) {
            warn!("Error saving state: {}", e);
        }

        Ok(if changed {
            CycleOutcome::Changed
        } else {
            CycleOutcome::NoChange
        })
    }

    /// Build the human-readable delta message: current values, then one
    /// direction/magnitude sentence per changed field
    fn delta_message(&self, reading: &BatteryReading) -> String {
        let mut changes = String::new();

        if let Some(last_range) = self.state.last_range {
            if reading.range_miles != last_range {
                let delta = reading.range_miles - last_range;
                let direction = if delta > 0 { "increased" } else { "decreased" };
                changes.push_str(&format!(
                    "Range has {} by {} miles. ",
                    direction,
                    delta.abs()
                ));
            }
        }

        if let Some(last_charge) = self.state.last_charge {
            if reading.charge_percent != last_charge {
                let delta = reading.charge_percent - last_charge;
                let direction = if delta > 0 { "increased" } else { "decreased" };
                changes.push_str(&format!("Charge has {} by {}%. ", direction, delta.abs()));
            }
        }

        format!(
            "Range: {} miles\nCharge: {}%\n{}",
            reading.range_miles, reading.charge_percent, changes
        )
    }

    /// Run the monitor until the future is dropped (the caller selects
    /// this against a shutdown signal). Transient failures are logged and
    /// answered with a fixed recovery delay; the loop never exits on its
    /// own.
    pub async fn run(&mut self) {
        info!(
            "Starting battery monitor. Checking every {} seconds",
            self.interval.as_secs()
        );

        loop {
            info!(
                "Checking battery status at {}",
                Utc::now().format(STATE_TIME_FORMAT)
            );

            match self.tick().await {
                Ok(CycleOutcome::Changed) => {
                    info!("Battery status changed - notification displayed");
                }
                Ok(CycleOutcome::NoChange) => {
                    info!("No change in battery status");
                }
                Ok(CycleOutcome::Unavailable) => {}
                Err(e) => {
                    error!("Error checking battery: {}", e);
                    info!("Retrying in {} seconds...", FAULT_RETRY_DELAY_SECS);
                    sleep(Duration::from_secs(FAULT_RETRY_DELAY_SECS)).await;
                    continue;
                }
            }

            // Interval measured from the end of the cycle, not wall-clock
            // alignment.
            sleep(self.interval).await;
        }
    }
}
