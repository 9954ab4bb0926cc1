//! Telemetry Module
//!
//! Fetches raw vehicle status over HTTP and projects it into typed views.
//! Projections are pure functions of one fetched document and substitute a
//! "not available" sentinel for absent metrics; only transport and auth
//! failures surface as errors.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::{build_client, AuthError, TokenManager};

/// Telemetry API base URL
pub const TELEMETRY_BASE_URL: &str = "https://api.autonomic.ai";

const KM_TO_MILES: f64 = 0.621371;

/// Raw decoded vehicle status: a metric-name-keyed document where each
/// metric is an object `{value, updateTime, ...}` or an array of such
/// objects (doors, tires, windows).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStatus {
    #[serde(default)]
    pub metrics: serde_json::Map<String, Value>,
}

/// Rounded, unit-normalized battery snapshot the change monitor compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryReading {
    pub range_miles: i64,
    pub charge_percent: i64,
    pub captured_at: DateTime<Utc>,
}

/// Full battery view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub main_battery_charge: Option<f64>,
    pub ev_battery_charge: Option<f64>,
    pub ev_battery_actual_charge: Option<f64>,
    pub ev_battery_range_km: Option<f64>,
    pub ev_battery_range_miles: Option<i64>,
    pub ev_battery_capacity_kwh: Option<f64>,
    pub ev_battery_energy_remaining_kwh: Option<f64>,
    pub ev_battery_temperature: Option<f64>,
    pub ev_battery_voltage: Option<f64>,
    pub ev_battery_performance: Option<String>,
    pub ev_time_to_full_charge: Option<f64>,
}

/// Door, lock, hood and alarm view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoorStatus {
    pub doors: HashMap<String, String>,
    pub locks: HashMap<String, String>,
    pub hood: Option<String>,
    pub alarm: Option<String>,
}

/// Per-wheel pressure with the recommended placard value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TirePressure {
    pub pressure: Option<f64>,
    pub recommended: Option<f64>,
}

/// Tire pressure and status view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TireStatus {
    pub pressures: HashMap<String, TirePressure>,
    pub statuses: HashMap<String, String>,
    pub system_status: Option<String>,
}

/// Vehicle position view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub compass_direction: Option<String>,
    pub update_time: Option<String>,
}

/// Window opening expressed as the reported double range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowPosition {
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

/// Climate and temperature view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateStatus {
    pub outside_temperature_c: Option<f64>,
    pub outside_temperature_f: Option<f64>,
    pub ambient_temp: Option<f64>,
    pub engine_coolant_temp: Option<f64>,
}

/// General vehicle view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleInfo {
    pub odometer_km: Option<f64>,
    pub odometer_miles: Option<i64>,
    pub speed: Option<f64>,
    pub ignition_status: Option<String>,
    pub oil_life_remaining: Option<f64>,
    pub parking_brake_status: Option<String>,
    pub gear_position: Option<String>,
    pub hybrid_vehicle_mode: Option<String>,
    pub display_units: Option<String>,
}

/// EV charging view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvChargingStatus {
    pub plug_status: Option<String>,
    pub charger_status: Option<String>,
    pub charger_current_output: Option<f64>,
    pub charger_voltage_output: Option<f64>,
    pub dc_voltage_output: Option<f64>,
    pub dc_current_output: Option<f64>,
    pub charger_type: Option<String>,
    pub communication_status: Option<String>,
}

/// Trip view, including the coaching scores buried in custom metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripInfo {
    pub trip_length: Option<f64>,
    pub trip_fuel_economy: Option<f64>,
    pub trip_battery_range_regenerated: Option<f64>,
    pub trip_battery_charge_regenerated: Option<f64>,
    pub trip_battery_distance: Option<f64>,
    pub acceleration_score: Option<f64>,
    pub deceleration_score: Option<f64>,
    pub cruising_score: Option<f64>,
}

/// Human-readable roll-up of the most-asked-about views
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub vehicle_status: VehicleSummary,
    pub battery_status: BatterySummary,
    pub climate: ClimateSummary,
    pub location: LocationSummary,
    pub tires: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSummary {
    pub odometer: String,
    pub ignition: String,
    pub doors_locked: String,
    pub alarm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySummary {
    pub ev_charge: String,
    pub range: String,
    pub time_to_full_charge: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateSummary {
    pub outside_temp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationSummary {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

const NOT_AVAILABLE: &str = "Not available";

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn f64_field(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

impl RawStatus {
    fn metric_value(&self, name: &str) -> Option<&Value> {
        self.metrics.get(name)?.get("value")
    }

    fn metric_f64(&self, name: &str) -> Option<f64> {
        self.metric_value(name)?.as_f64()
    }

    fn metric_str(&self, name: &str) -> Option<String> {
        self.metric_value(name)?.as_str().map(str::to_string)
    }

    fn metric_array(&self, name: &str) -> &[Value] {
        self.metrics
            .get(name)
            .and_then(Value::as_array)
            .map_or(&[], |v| v.as_slice())
    }

    /// Battery metrics, with miles derived from the reported kilometers
    pub fn battery_status(&self) -> BatteryStatus {
        let range_km = self.metric_f64("xevBatteryRange");

        BatteryStatus {
            main_battery_charge: self.metric_f64("batteryStateOfCharge"),
            ev_battery_charge: self.metric_f64("xevBatteryStateOfCharge"),
            ev_battery_actual_charge: self.metric_f64("xevBatteryActualStateOfCharge"),
            ev_battery_range_km: range_km,
            ev_battery_range_miles: range_km.map(|km| (km * KM_TO_MILES).round() as i64),
            ev_battery_capacity_kwh: self.metric_f64("xevBatteryCapacity"),
            ev_battery_energy_remaining_kwh: self.metric_f64("xevBatteryEnergyRemaining"),
            ev_battery_temperature: self.metric_f64("xevBatteryTemperature"),
            ev_battery_voltage: self.metric_f64("xevBatteryVoltage"),
            ev_battery_performance: self.metric_str("xevBatteryPerformanceStatus"),
            ev_time_to_full_charge: self.metric_f64("xevBatteryTimeToFullCharge"),
        }
    }

    /// The rounded snapshot the monitor compares across polls. `None` when
    /// either source metric is missing.
    pub fn battery_reading(&self) -> Option<BatteryReading> {
        let range_km = self.metric_f64("xevBatteryRange")?;
        let charge = self.metric_f64("xevBatteryActualStateOfCharge")?;

        Some(BatteryReading {
            range_miles: (range_km * KM_TO_MILES).round() as i64,
            charge_percent: charge.round() as i64,
            captured_at: Utc::now(),
        })
    }

    pub fn door_status(&self) -> DoorStatus {
        let mut doors = HashMap::new();
        for door in self.metric_array("doorStatus") {
            if let (Some(id), Some(value)) = (str_field(door, "vehicleDoor"), str_field(door, "value")) {
                doors.insert(id, value);
            }
        }

        let mut locks = HashMap::new();
        for lock in self.metric_array("doorLockStatus") {
            if let (Some(id), Some(value)) = (str_field(lock, "vehicleDoor"), str_field(lock, "value")) {
                locks.insert(id, value);
            }
        }

        DoorStatus {
            doors,
            locks,
            hood: self.metric_str("hoodStatus"),
            alarm: self.metric_str("alarmStatus"),
        }
    }

    pub fn tire_status(&self) -> TireStatus {
        let mut pressures = HashMap::new();
        for tire in self.metric_array("tirePressure") {
            if let Some(id) = str_field(tire, "vehicleWheel") {
                let recommended =
                    f64_field(tire, "wheelPlacardFront").or_else(|| f64_field(tire, "wheelPlacardRear"));
                pressures.insert(
                    id,
                    TirePressure {
                        pressure: f64_field(tire, "value"),
                        recommended,
                    },
                );
            }
        }

        // Status entries without a wheel id describe the whole vehicle.
        let mut statuses = HashMap::new();
        for tire in self.metric_array("tirePressureStatus") {
            if let Some(value) = str_field(tire, "value") {
                let id = str_field(tire, "vehicleWheel").unwrap_or_else(|| "overall".to_string());
                statuses.insert(id, value);
            }
        }

        let system_status = self
            .metric_array("tirePressureSystemStatus")
            .first()
            .and_then(|entry| str_field(entry, "value"));

        TireStatus {
            pressures,
            statuses,
            system_status,
        }
    }

    pub fn location(&self) -> Location {
        let position = self.metric_value("position").and_then(|v| v.get("location"));
        let heading = self.metric_value("heading");

        Location {
            latitude: position.and_then(|p| f64_field(p, "lat")),
            longitude: position.and_then(|p| f64_field(p, "lon")),
            altitude: position.and_then(|p| f64_field(p, "alt")),
            heading_degrees: heading.and_then(|h| f64_field(h, "heading")),
            compass_direction: self.metric_str("compassDirection"),
            update_time: self
                .metrics
                .get("position")
                .and_then(|p| p.get("updateTime"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Per-window opening ranges, keyed `<window>_<side>`
    pub fn window_status(&self) -> HashMap<String, WindowPosition> {
        let mut windows = HashMap::new();
        for window in self.metric_array("windowStatus") {
            let (Some(id), Some(side)) =
                (str_field(window, "vehicleWindow"), str_field(window, "vehicleSide"))
            else {
                continue;
            };
            let range = window.get("value").and_then(|v| v.get("doubleRange"));
            windows.insert(
                format!("{}_{}", id, side),
                WindowPosition {
                    lower_bound: range.and_then(|r| f64_field(r, "lowerBound")),
                    upper_bound: range.and_then(|r| f64_field(r, "upperBound")),
                },
            );
        }
        windows
    }

    pub fn climate_status(&self) -> ClimateStatus {
        let outside_c = self.metric_f64("outsideTemperature");

        ClimateStatus {
            outside_temperature_c: outside_c,
            outside_temperature_f: outside_c.map(|c| c * 9.0 / 5.0 + 32.0),
            ambient_temp: self.metric_f64("ambientTemp"),
            engine_coolant_temp: self.metric_f64("engineCoolantTemp"),
        }
    }

    pub fn vehicle_info(&self) -> VehicleInfo {
        let odometer_km = self.metric_f64("odometer");

        VehicleInfo {
            odometer_km,
            odometer_miles: odometer_km.map(|km| (km * KM_TO_MILES).round() as i64),
            speed: self.metric_f64("speed"),
            ignition_status: self.metric_str("ignitionStatus"),
            oil_life_remaining: self.metric_f64("oilLifeRemaining"),
            parking_brake_status: self.metric_str("parkingBrakeStatus"),
            gear_position: self.metric_str("gearLeverPosition"),
            hybrid_vehicle_mode: self.metric_str("hybridVehicleModeStatus"),
            display_units: self.metric_str("displaySystemOfMeasure"),
        }
    }

    /// Indicators currently lit, mapped to their additional info text
    pub fn warning_indicators(&self) -> HashMap<String, String> {
        let mut active = HashMap::new();
        if let Some(indicators) = self.metrics.get("indicators").and_then(Value::as_object) {
            for (name, indicator) in indicators {
                if indicator.get("value").and_then(Value::as_bool) == Some(true) {
                    let info = str_field(indicator, "additionalInfo").unwrap_or_default();
                    active.insert(name.clone(), info);
                }
            }
        }
        active
    }

    pub fn ev_charging_status(&self) -> EvChargingStatus {
        EvChargingStatus {
            plug_status: self.metric_str("xevPlugChargerStatus"),
            charger_status: self.metric_str("xevBatteryChargeDisplayStatus"),
            charger_current_output: self.metric_f64("xevBatteryChargerCurrentOutput"),
            charger_voltage_output: self.metric_f64("xevBatteryChargerVoltageOutput"),
            dc_voltage_output: self.metric_f64("xevEvseBatteryDcVoltageOutput"),
            dc_current_output: self.metric_f64("xevEvseBatteryDcCurrentOutput"),
            charger_type: self.metric_str("xevChargeStationPowerType"),
            communication_status: self.metric_str("xevChargeStationCommunicationStatus"),
        }
    }

    pub fn trip_info(&self) -> TripInfo {
        let mut trip_length = None;
        let mut acceleration_score = None;
        let mut deceleration_score = None;
        let mut cruising_score = None;

        // Coaching scores live under opaque per-vehicle keys; match by
        // substring the way the service's own clients do.
        if let Some(custom) = self.metrics.get("customMetrics").and_then(Value::as_object) {
            for (key, value) in custom {
                let value = f64_field(value, "value");
                if key.contains("trip-sum-length") {
                    trip_length = value;
                } else if key.contains("accumulated-acceleration-coaching-score") {
                    acceleration_score = value;
                } else if key.contains("accumulated-deceleration-coaching-score") {
                    deceleration_score = value;
                } else if key.contains("accumulated-vehicle-speed-cruising-coaching-score") {
                    cruising_score = value;
                }
            }
        }

        TripInfo {
            trip_length,
            trip_fuel_economy: self.metric_f64("tripFuelEconomy"),
            trip_battery_range_regenerated: self.metric_f64("tripXevBatteryRangeRegenerated"),
            trip_battery_charge_regenerated: self.metric_f64("tripXevBatteryChargeRegenerated"),
            trip_battery_distance: self.metric_f64("tripXevBatteryDistanceAccumulated"),
            acceleration_score,
            deceleration_score,
            cruising_score,
        }
    }

    /// Roll-up composed from this single document: one fetch, six views
    pub fn status_summary(&self) -> StatusSummary {
        let vehicle = self.vehicle_info();
        let battery = self.battery_status();
        let doors = self.door_status();
        let climate = self.climate_status();
        let location = self.location();
        let tires = self.tire_status();

        let odometer = match (vehicle.odometer_miles, vehicle.odometer_km) {
            (Some(miles), Some(km)) => format!("{} miles ({} km)", miles, km),
            _ => NOT_AVAILABLE.to_string(),
        };

        let doors_locked = if doors.locks.get("ALL_DOORS").map(String::as_str) == Some("LOCKED") {
            "All Locked".to_string()
        } else {
            "Not All Locked".to_string()
        };

        let ev_charge = battery
            .ev_battery_charge
            .map(|c| format!("{}%", c))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let range = match (battery.ev_battery_range_miles, battery.ev_battery_range_km) {
            (Some(miles), Some(km)) => format!("{} miles ({} km)", miles, km),
            _ => NOT_AVAILABLE.to_string(),
        };

        let time_to_full_charge = battery
            .ev_time_to_full_charge
            .map(|t| format!("{} minutes", t))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let outside_temp = match (climate.outside_temperature_f, climate.outside_temperature_c) {
            (Some(f), Some(c)) => format!("{}°F ({}°C)", f.round(), c),
            _ => NOT_AVAILABLE.to_string(),
        };

        let tires_ok = !tires.statuses.is_empty()
            && tires.statuses.values().all(|status| status == "NORMAL");
        let tire_line = if tires_ok {
            "All Normal".to_string()
        } else {
            "Check Tire Status".to_string()
        };

        StatusSummary {
            vehicle_status: VehicleSummary {
                odometer,
                ignition: vehicle
                    .ignition_status
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                doors_locked,
                alarm: doors.alarm.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            },
            battery_status: BatterySummary {
                ev_charge,
                range,
                time_to_full_charge,
            },
            climate: ClimateSummary { outside_temp },
            location: LocationSummary {
                latitude: location.latitude,
                longitude: location.longitude,
            },
            tires: tire_line,
        }
    }
}

/// HTTP client for the vehicle telemetry endpoint
pub struct TelemetryClient {
    tokens: Arc<TokenManager>,
    status_url: String,
    client: reqwest::Client,
}

impl TelemetryClient {
    /// Create a client against the production telemetry endpoint
    pub fn new(tokens: Arc<TokenManager>, vin: &str) -> Self {
        Self::with_base_url(tokens, vin, TELEMETRY_BASE_URL)
    }

    /// Create a client against an explicit base URL
    pub fn with_base_url(tokens: Arc<TokenManager>, vin: &str, base_url: &str) -> Self {
        let status_url = format!(
            "{}/v1/telemetry/sources/fordpass/vehicles/{}",
            base_url.trim_end_matches('/'),
            vin
        );

        Self {
            tokens,
            status_url,
            client: build_client(),
        }
    }

    /// Fetch the raw status document. Attaches a bearer token from the
    /// token manager, so a single fetch may trigger a refresh.
    pub async fn fetch_raw_status(&self) -> Result<RawStatus, TelemetryError> {
        let token = self.tokens.valid_exchange_token().await?;

        debug!("Fetching vehicle status at: {}", self.status_url);

        let response = self
            .client
            .get(&self.status_url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| TelemetryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<RawStatus>()
            .await
            .map_err(|e| TelemetryError::Parse(e.to_string()))
    }

    // Fetch-then-project conveniences. Each performs exactly one fetch;
    // callers needing several views from a consistent snapshot should fetch
    // the raw status once and project it themselves.

    pub async fn battery_status(&self) -> Result<BatteryStatus, TelemetryError> {
        Ok(self.fetch_raw_status().await?.battery_status())
    }

    pub async fn door_status(&self) -> Result<DoorStatus, TelemetryError> {
        Ok(self.fetch_raw_status().await?.door_status())
    }

    pub async fn tire_status(&self) -> Result<TireStatus, TelemetryError> {
        Ok(self.fetch_raw_status().await?.tire_status())
    }

    pub async fn location(&self) -> Result<Location, TelemetryError> {
        Ok(self.fetch_raw_status().await?.location())
    }

    pub async fn window_status(&self) -> Result<HashMap<String, WindowPosition>, TelemetryError> {
        Ok(self.fetch_raw_status().await?.window_status())
    }

    pub async fn climate_status(&self) -> Result<ClimateStatus, TelemetryError> {
        Ok(self.fetch_raw_status().await?.climate_status())
    }

    pub async fn vehicle_info(&self) -> Result<VehicleInfo, TelemetryError> {
        Ok(self.fetch_raw_status().await?.vehicle_info())
    }

    pub async fn warning_indicators(&self) -> Result<HashMap<String, String>, TelemetryError> {
        Ok(self.fetch_raw_status().await?.warning_indicators())
    }

    pub async fn ev_charging_status(&self) -> Result<EvChargingStatus, TelemetryError> {
        Ok(self.fetch_raw_status().await?.ev_charging_status())
    }

    pub async fn trip_info(&self) -> Result<TripInfo, TelemetryError> {
        Ok(self.fetch_raw_status().await?.trip_info())
    }

    pub async fn status_summary(&self) -> Result<StatusSummary, TelemetryError> {
        Ok(self.fetch_raw_status().await?.status_summary())
    }
}

/// Telemetry errors
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("status request failed: {status}/{body}")]
    Status { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
}
