//! Hardware boundary for Triphase
//!
//! The core never touches pins or registers directly: it talks to one
//! `PhaseIo` implementation providing an analog-input capability (one raw ADC
//! code per phase sensor) and a relay-output capability (energize one relay
//! per phase). The production implementation lives in [`crate::modbus`]; the
//! simulated one below backs the test suite and `simulate: true` runs.

use crate::config::SamplerConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Number of physical phases handled by the relay bank
pub const PHASE_COUNT: usize = 3;

/// Simulated mains frequency in Hz
const MAINS_HZ: f64 = 50.0;

/// Analog-input and relay-output capabilities per phase.
///
/// `set_relay(_, true)` energizes; any drive-level inversion the board needs
/// (active-low relay inputs) stays behind this trait.
#[async_trait]
pub trait PhaseIo: Send {
    /// Read one raw ADC code from the given phase's voltage sensor
    async fn read_code(&mut self, phase: usize) -> Result<u16>;

    /// Drive the given phase's relay
    async fn set_relay(&mut self, phase: usize, energized: bool) -> Result<()>;
}

/// Deterministic synthetic three-phase mains.
///
/// Each phase is a 50 Hz sinusoid riding on the sensor bias (VREF/2); the
/// waveform angle advances by one nominal inter-sample step per read, so a
/// burst over whole cycles reproduces the configured RMS voltage exactly,
/// independent of wall-clock timing.
pub struct SimulatedIo {
    vref: f64,
    adc_max: u16,
    calibration_factor: f64,
    angle_step: f64,
    rms_volts: [f64; PHASE_COUNT],
    angle: [f64; PHASE_COUNT],
    relays: [bool; PHASE_COUNT],
    transitions: Vec<(usize, bool)>,
}

impl SimulatedIo {
    /// Create a simulated backend producing a healthy 220 V on every phase
    pub fn new(sampler: &SamplerConfig) -> Self {
        let dt = sampler.sample_delay_us as f64 / 1_000_000.0;
        Self {
            vref: sampler.vref,
            adc_max: sampler.adc_max,
            calibration_factor: sampler.calibration_factor,
            angle_step: 2.0 * std::f64::consts::PI * MAINS_HZ * dt,
            rms_volts: [220.0; PHASE_COUNT],
            angle: [0.0; PHASE_COUNT],
            relays: [false; PHASE_COUNT],
            transitions: Vec::new(),
        }
    }

    /// Set the mains RMS voltage a phase's sensor will report
    pub fn set_phase_rms(&mut self, phase: usize, volts: f64) {
        if phase < PHASE_COUNT {
            self.rms_volts[phase] = volts;
        }
    }

    /// Current relay drive states, indexed by phase
    pub fn relay_states(&self) -> [bool; PHASE_COUNT] {
        self.relays
    }

    /// Every `set_relay` call in order, for asserting switch sequencing
    pub fn transitions(&self) -> &[(usize, bool)] {
        &self.transitions
    }
}

#[async_trait]
impl PhaseIo for SimulatedIo {
    async fn read_code(&mut self, phase: usize) -> Result<u16> {
        let idx = phase.min(PHASE_COUNT - 1);
        // Sensor output: bias plus the mains waveform scaled down by the
        // sensor ratio
        let sensor_rms = self.rms_volts[idx] / self.calibration_factor;
        let amplitude = sensor_rms * std::f64::consts::SQRT_2;
        let volts = self.vref / 2.0 + amplitude * self.angle[idx].sin();
        self.angle[idx] += self.angle_step;

        let code = (volts / self.vref * self.adc_max as f64).round();
        Ok(code.clamp(0.0, self.adc_max as f64) as u16)
    }

    async fn set_relay(&mut self, phase: usize, energized: bool) -> Result<()> {
        let idx = phase.min(PHASE_COUNT - 1);
        self.relays[idx] = energized;
        self.transitions.push((idx, energized));
        Ok(())
    }
}
