//! End-to-end control scenarios: arbiter plus hysteresis on fixed inputs,
//! and the runtime driving simulated zones.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use zone_heating_controller::config::Config;
use zone_heating_controller::controller::{
    calculate_target, decide_heater, AppState, ArbiterInputs, MemoryAuditSink,
};
use zone_heating_controller::domain::{CommandStatus, CommandType, PriceLevel, ZonePreferences};
use zone_heating_controller::error::ControlError;
use zone_heating_controller::forecast::{StaticWeather, TimeOfUsePricing};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
}

fn inputs(prefs: &ZonePreferences, occupied: bool, level: PriceLevel) -> ArbiterInputs<'_> {
    ArbiterInputs {
        now: noon(),
        prefs,
        current_internal_c: 19.0,
        occupied,
        outdoor_c: Some(5.0),
        forecast: &[],
        price_level: level,
    }
}

#[test]
fn occupied_standard_price_heats_to_default() {
    let prefs = ZonePreferences::default();
    let target = calculate_target(&inputs(&prefs, true, PriceLevel::Standard));
    assert_eq!(target, 21.0);
    assert!(decide_heater(19.0, target, false));
}

#[test]
fn peak_price_trims_occupied_target() {
    let prefs = ZonePreferences {
        peak_occupied_temp_reduction: 0.5,
        ..ZonePreferences::default()
    };
    assert_eq!(calculate_target(&inputs(&prefs, true, PriceLevel::Peak)), 20.5);
}

#[test]
fn setback_applies_when_unoccupied() {
    let prefs = ZonePreferences {
        use_occupancy_for_heating: true,
        setback_setpoint: Some(16.0),
        ..ZonePreferences::default()
    };
    assert_eq!(calculate_target(&inputs(&prefs, false, PriceLevel::Standard)), 16.0);
}

const RUNTIME_CONFIG: &str = r#"
[controller]
control_interval_seconds = 3600
poll_interval_seconds = 3600

[simulator]
update_interval_seconds = 3600.0
stop_timeout_seconds = 0.5

[[zones]]
id = 1
name = "cold"
initial_temperature_c = 18.0
initial_target_c = 17.0
initial_occupancy = true

[[zones]]
id = 2
name = "warm"
initial_temperature_c = 21.0
initial_target_c = 21.0
initial_occupancy = true
"#;

fn runtime(audit: Arc<MemoryAuditSink>) -> AppState {
    let cfg = Config::from_toml_str(RUNTIME_CONFIG).unwrap();
    AppState::with_parts(
        cfg,
        Arc::new(StaticWeather::Fixed(5.0)),
        Arc::new(TimeOfUsePricing::default()),
        audit,
    )
    .unwrap()
}

#[tokio::test]
async fn runtime_cycle_writes_only_where_needed() {
    let audit = Arc::new(MemoryAuditSink::new());
    let state = runtime(audit.clone());
    state.start().await.unwrap();

    let results = state.run_control_cycle(noon()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let cold = audit.for_zone(1);
    assert_eq!(cold.len(), 2);
    assert_eq!(cold[0].command_type, CommandType::SetTargetTemp);
    assert_eq!(cold[0].target_temp, 21.0);
    assert_eq!(cold[1].command_type, CommandType::SetHeater);
    assert!(cold.iter().all(|r| r.status == CommandStatus::Success));
    assert!(audit.for_zone(2).is_empty());

    let sim = state.simulator(1).unwrap().state().snapshot();
    assert_eq!(sim.target_temperature, 21.0);
    assert!(sim.heater_on);

    // Same inputs against the updated device: nothing more to write.
    state.run_control_cycle(noon()).await.unwrap();
    assert_eq!(audit.len(), 2);

    state.shutdown().await;
}

#[tokio::test]
async fn runtime_poll_and_lifecycle() {
    let state = runtime(Arc::new(MemoryAuditSink::new()));
    assert!(state.run_control_cycle(noon()).await.is_err());

    state.start().await.unwrap();
    state.start().await.unwrap();
    assert!(state.is_running().await);

    state.poll_sensors(noon()).await.unwrap();
    let readings = state.latest_readings().await;
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[&2].snapshot.current_temp_c, 21.0);
    assert_eq!(state.poll_status().await.unwrap().error_count, 0);

    state.shutdown().await;
    assert!(!state.is_running().await);
    for sim in state.simulators() {
        assert!(sim.local_addr().await.is_none());
    }
}

#[tokio::test]
async fn occupied_register_port_is_a_device_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let cfg = Config::from_toml_str(&format!(
        r#"
[[zones]]
id = 1
name = "free"
initial_temperature_c = 20.0
initial_target_c = 21.0

[[zones]]
id = 2
name = "clash"
register_port = {port}
initial_temperature_c = 20.0
initial_target_c = 21.0
"#
    ))
    .unwrap();
    let state = AppState::with_parts(
        cfg,
        Arc::new(StaticWeather::Fixed(5.0)),
        Arc::new(TimeOfUsePricing::default()),
        Arc::new(MemoryAuditSink::new()),
    )
    .unwrap();

    let err = state.start().await.unwrap_err();
    assert!(matches!(err, ControlError::DeviceIo(_)), "got {err:?}");
    assert!(!state.is_running().await);
    // The zone that did bind is released again.
    assert!(state.simulator(1).unwrap().local_addr().await.is_none());
}
