//! Register-mapped zone simulator.
//!
//! One [`ZoneSimulator`] owns the [`ZoneRuntimeState`] of a zone. While
//! running it drives two tasks: a periodic updater that drifts the
//! temperature and a Modbus-TCP register server. Both reach the state only
//! through [`ZoneState`], whose lock serialises every access.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{round1, round2, ZoneRuntimeState};
use crate::error::{ControlError, ControlResult, DeviceError};
use crate::modbus::codec::ExceptionCode;
use crate::modbus::register_map::{
    decode_temp, encode_state, DEFAULT_UNIT_ID, REGISTER_COUNT, REG_TARGET_TEMP,
};
use crate::modbus::server::{serve, RegisterBank};
use crate::simulation::thermal::clamp_simulated;

/// Band around target inside which the idle heater only drifts.
const DRIFT_BAND_C: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub zone_id: u32,
    pub name: String,
    pub bind_addr: SocketAddr,
    pub update_interval: Duration,
    pub stop_timeout: Duration,
    pub unit_id: u8,
    /// Fixed RNG seed for reproducible drift.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn new(zone_id: u32, name: impl Into<String>, bind_addr: SocketAddr) -> Self {
        Self {
            zone_id,
            name: name.into(),
            bind_addr,
            update_interval: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            unit_id: DEFAULT_UNIT_ID,
            seed: None,
        }
    }
}

/// Lock-guarded runtime state of one zone.
#[derive(Debug)]
pub struct ZoneState {
    zone_id: u32,
    inner: Mutex<ZoneRuntimeState>,
}

impl ZoneState {
    pub fn new(zone_id: u32, initial: ZoneRuntimeState) -> Self {
        Self {
            zone_id,
            inner: Mutex::new(initial),
        }
    }

    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    pub fn snapshot(&self) -> ZoneRuntimeState {
        *self.inner.lock()
    }

    pub fn registers(&self) -> [u16; REGISTER_COUNT as usize] {
        encode_state(&self.inner.lock())
    }

    /// Returns the stored value, rounded to one decimal place.
    pub fn set_target_temperature(&self, celsius: f64) -> ControlResult<f64> {
        if !celsius.is_finite() {
            return Err(ControlError::InternalInvariant(format!(
                "non-finite target {celsius} for zone {}",
                self.zone_id
            )));
        }
        let value = round1(celsius);
        let mut state = self.inner.lock();
        if state.target_temperature != value {
            debug!(zone_id = self.zone_id, from = state.target_temperature, to = value, "target updated");
            state.target_temperature = value;
        }
        Ok(value)
    }

    pub fn set_heater(&self, on: bool) {
        self.inner.lock().heater_on = on;
    }

    pub fn set_occupancy(&self, occupied: bool) {
        self.inner.lock().occupancy = occupied;
    }

    /// Apply one drift step. The state is left untouched when the step
    /// would produce a non-finite temperature.
    pub fn tick<R: Rng>(&self, rng: &mut R) -> ControlResult<ZoneRuntimeState> {
        let mut state = self.inner.lock();
        let mut next = *state;
        drift_step(&mut next, rng);
        if !next.current_temperature.is_finite() {
            return Err(ControlError::InternalInvariant(format!(
                "zone {} drifted to non-finite temperature",
                self.zone_id
            )));
        }
        *state = next;
        Ok(next)
    }
}

impl RegisterBank for ZoneState {
    fn read_holding(&self, start: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        let end = usize::from(start) + usize::from(count);
        if end > usize::from(REGISTER_COUNT) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        Ok(self.registers()[usize::from(start)..end].to_vec())
    }

    fn write_holding(&self, start: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        match values {
            [raw] if start == REG_TARGET_TEMP => {
                self.set_target_temperature(decode_temp(*raw))
                    .map_err(|_| ExceptionCode::IllegalDataValue)?;
                info!(zone_id = self.zone_id, raw, "target temperature written over register bus");
                Ok(())
            }
            _ => Err(ExceptionCode::IllegalDataAddress),
        }
    }
}

/// Simplified self-contained thermostat used by the live simulator.
///
/// A running heater warms the zone until it passes target, then switches off.
/// An idle heater cools the zone when it is well above target, switches on
/// when well below, and otherwise lets it wander by a few hundredths.
pub fn drift_step<R: Rng>(state: &mut ZoneRuntimeState, rng: &mut R) {
    let current = state.current_temperature;
    let target = state.target_temperature;

    let delta = if state.heater_on {
        if current < target {
            rng.gen_range(0.1..=0.3)
        } else if current > target {
            state.heater_on = false;
            -rng.gen_range(0.05..=0.15)
        } else {
            0.0
        }
    } else if current > target + DRIFT_BAND_C {
        -rng.gen_range(0.05..=0.15)
    } else if current < target - DRIFT_BAND_C {
        state.heater_on = true;
        rng.gen_range(0.1..=0.3)
    } else {
        rng.gen_range(-0.05..=0.05)
    };

    state.current_temperature = round2(clamp_simulated(current + delta));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SimulatorStatus {
    Stopped,
    Running,
}

struct RunningTasks {
    cancel: CancellationToken,
    updater: JoinHandle<()>,
    server: JoinHandle<()>,
    local_addr: SocketAddr,
}

enum Lifecycle {
    Stopped,
    Running(RunningTasks),
}

/// A zone's virtual register device.
pub struct ZoneSimulator {
    config: SimulatorConfig,
    state: Arc<ZoneState>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl ZoneSimulator {
    pub fn new(config: SimulatorConfig, initial: ZoneRuntimeState) -> Self {
        let state = Arc::new(ZoneState::new(config.zone_id, initial));
        Self {
            config,
            state,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Stopped),
        }
    }

    pub fn zone_id(&self) -> u32 {
        self.config.zone_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn unit_id(&self) -> u8 {
        self.config.unit_id
    }

    /// Handle used by in-process clients; survives stop/start.
    pub fn state(&self) -> Arc<ZoneState> {
        Arc::clone(&self.state)
    }

    pub async fn status(&self) -> SimulatorStatus {
        match *self.lifecycle.lock().await {
            Lifecycle::Stopped => SimulatorStatus::Stopped,
            Lifecycle::Running(_) => SimulatorStatus::Running,
        }
    }

    /// Address the register server is bound to while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(tasks) => Some(tasks.local_addr),
            Lifecycle::Stopped => None,
        }
    }

    /// Bind the register server and spawn the updater. Starting a running
    /// simulator is a no-op that returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr, DeviceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Lifecycle::Running(tasks) = &*lifecycle {
            return Ok(tasks.local_addr);
        }

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();

        let rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let updater = tokio::spawn(run_updater(
            Arc::clone(&self.state),
            self.config.update_interval,
            rng,
            cancel.child_token(),
        ));
        let bank: Arc<dyn RegisterBank> = self.state.clone();
        let server = tokio::spawn(serve(listener, bank, self.config.unit_id, cancel.child_token()));

        info!(
            zone_id = self.config.zone_id,
            name = %self.config.name,
            %local_addr,
            "zone simulator started"
        );
        *lifecycle = Lifecycle::Running(RunningTasks {
            cancel,
            updater,
            server,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Signal both tasks and wait for them up to the stop timeout each. A
    /// server that does not finish in time is aborted, which closes its socket.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running(mut tasks) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) else {
            debug!(zone_id = self.config.zone_id, "simulator already stopped");
            return;
        };

        tasks.cancel.cancel();
        let limit = self.config.stop_timeout;

        if timeout(limit, &mut tasks.updater).await.is_err() {
            warn!(zone_id = self.config.zone_id, "updater did not stop in time, aborting");
            tasks.updater.abort();
        }
        if timeout(limit, &mut tasks.server).await.is_err() {
            warn!(zone_id = self.config.zone_id, "register server did not close in time, aborting");
            tasks.server.abort();
        }
        info!(zone_id = self.config.zone_id, "zone simulator stopped");
    }
}

async fn run_updater(
    state: Arc<ZoneState>,
    period: Duration,
    mut rng: StdRng,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial state stands for one period.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match state.tick(&mut rng) {
                Ok(s) => debug!(
                    zone_id = state.zone_id(),
                    current_c = s.current_temperature,
                    target_c = s.target_temperature,
                    occupied = s.occupancy,
                    heater_on = s.heater_on,
                    "simulator tick"
                ),
                Err(e) => warn!(zone_id = state.zone_id(), error = %e, "simulator tick skipped"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn state(current: f64, target: f64, heater_on: bool) -> ZoneRuntimeState {
        ZoneRuntimeState {
            current_temperature: current,
            target_temperature: target,
            occupancy: true,
            heater_on,
        }
    }

    #[rstest]
    #[case(state(19.0, 21.0, true), 0.1, 0.3, true)]
    #[case(state(21.5, 21.0, true), -0.15, -0.05, false)]
    #[case(state(22.0, 21.0, false), -0.15, -0.05, false)]
    #[case(state(20.0, 21.0, false), 0.1, 0.3, true)]
    #[case(state(21.2, 21.0, false), -0.05, 0.05, false)]
    fn drift_rules(
        #[case] s: ZoneRuntimeState,
        #[case] lo: f64,
        #[case] hi: f64,
        #[case] heater_after: bool,
    ) {
        let mut s = s;
        let before = s.current_temperature;
        drift_step(&mut s, &mut rng());
        let delta = s.current_temperature - before;
        assert!(delta >= lo - 0.006 && delta <= hi + 0.006, "delta {delta}");
        assert_eq!(s.heater_on, heater_after);
    }

    #[test]
    fn drift_clamps_to_band() {
        let mut s = state(29.95, 35.0, true);
        drift_step(&mut s, &mut rng());
        assert_eq!(s.current_temperature, 30.0);
    }

    #[test]
    fn register_reads_are_bounded() {
        let zone = ZoneState::new(1, state(20.04, 21.0, false));
        assert_eq!(zone.read_holding(0, 4).unwrap(), vec![200, 210, 1, 0]);
        assert_eq!(zone.read_holding(2, 2).unwrap(), vec![1, 0]);
        assert_eq!(zone.read_holding(3, 2), Err(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn only_target_register_is_writable() {
        let zone = ZoneState::new(1, state(20.0, 21.0, false));
        zone.write_holding(REG_TARGET_TEMP, &[225]).unwrap();
        assert_eq!(zone.snapshot().target_temperature, 22.5);

        for addr in [0, 2, 3] {
            assert_eq!(zone.write_holding(addr, &[1]), Err(ExceptionCode::IllegalDataAddress));
        }
        assert_eq!(
            zone.write_holding(REG_TARGET_TEMP, &[225, 1]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(zone.snapshot().target_temperature, 22.5);
    }

    #[test]
    fn non_finite_tick_leaves_state_untouched() {
        let zone = ZoneState::new(1, state(f64::NAN, 21.0, false));
        assert!(zone.tick(&mut rng()).is_err());
        assert!(zone.set_target_temperature(f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn lifecycle_start_and_stop() {
        let mut cfg = SimulatorConfig::new(4, "lab", "127.0.0.1:0".parse().unwrap());
        cfg.update_interval = Duration::from_millis(10);
        cfg.seed = Some(1);
        let sim = ZoneSimulator::new(cfg, ZoneRuntimeState::new(20.0, 21.0, false));

        assert_eq!(sim.status().await, SimulatorStatus::Stopped);
        let addr = sim.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(sim.start().await.unwrap(), addr);
        assert_eq!(sim.status().await, SimulatorStatus::Running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        sim.stop().await;
        assert_eq!(sim.status().await, SimulatorStatus::Stopped);
        assert!(sim.local_addr().await.is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
