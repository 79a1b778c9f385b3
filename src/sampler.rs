//! Voltage sampling and RMS estimation
//!
//! AC voltage sensors ride the waveform on a DC bias so it stays within the
//! converter's unipolar range. A burst of raw codes is acquired per phase,
//! the mean code taken as the instantaneous bias, and the RMS of the
//! bias-subtracted samples scaled by the sensor calibration factor into a
//! mains-side voltage estimate.

use crate::config::SamplerConfig;
use crate::error::Result;
use crate::hal::PhaseIo;
use crate::logging::get_logger;
use crate::phase::PhaseState;
use tokio::time::{Duration, sleep};

/// One burst's estimate, ephemeral
#[derive(Debug, Clone, Copy)]
pub struct PhaseReading {
    /// Mean sensor output in volts (the sensor bias)
    pub dc_offset: f64,

    /// Calibrated mains-side RMS voltage
    pub ac_voltage: f64,
}

/// Compute the DC offset and calibrated AC RMS voltage from one burst of raw
/// codes. Pure; the async acquisition below feeds it.
pub fn evaluate_burst(codes: &[u16], config: &SamplerConfig) -> PhaseReading {
    if codes.is_empty() {
        return PhaseReading {
            dc_offset: 0.0,
            ac_voltage: 0.0,
        };
    }

    let scale = config.vref / config.adc_max as f64;

    let sum: f64 = codes.iter().map(|&c| c as f64).sum();
    let dc_offset = sum / codes.len() as f64 * scale;

    let sum_squared_ac: f64 = codes
        .iter()
        .map(|&c| {
            let ac = c as f64 * scale - dc_offset;
            ac * ac
        })
        .sum();
    let rms = (sum_squared_ac / codes.len() as f64).sqrt();

    PhaseReading {
        dc_offset,
        ac_voltage: rms * config.calibration_factor,
    }
}

/// Burst acquisition over the hardware boundary
pub struct VoltageSampler {
    config: SamplerConfig,
    logger: crate::logging::StructuredLogger,
}

impl VoltageSampler {
    /// Create a sampler with the given calibration
    pub fn new(config: SamplerConfig) -> Self {
        let logger = get_logger("sampler");
        Self { config, logger }
    }

    /// Acquire one burst from the given phase and fold the estimate into its
    /// statistics.
    ///
    /// Blocks the control loop for the burst window (samples x
    /// sample_delay_us, spanning at least one full AC cycle); the driver
    /// round-robins phases across ticks so no tick pays for more than one
    /// burst.
    pub async fn sample(
        &self,
        io: &mut dyn PhaseIo,
        phase: usize,
        state: &mut PhaseState,
    ) -> Result<PhaseReading> {
        let mut codes = Vec::with_capacity(self.config.samples);
        let delay = Duration::from_micros(self.config.sample_delay_us);

        for i in 0..self.config.samples {
            codes.push(io.read_code(phase).await?);
            if i + 1 < self.config.samples {
                sleep(delay).await;
            }
        }

        let reading = evaluate_burst(&codes, &self.config);
        state.record(
            reading.ac_voltage,
            self.config.noise_floor_volts,
            self.config.avg_alpha,
        );

        self.logger.debug(&format!(
            "{}: {:.1}V RMS (offset {:.2}V, avg {:.1}V)",
            state.name(),
            reading.ac_voltage,
            reading.dc_offset,
            state.avg_voltage
        ));

        Ok(reading)
    }
}
