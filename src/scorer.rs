//! Comparative phase quality scoring
//!
//! A composite score per phase: how close the smoothed voltage sits to the
//! nominal target, weighted against how tightly the recent min/max spread is
//! bounded. The currently selected phase gets a fixed hysteresis bonus so
//! near-equal phases do not cause relay oscillation. Scoring is a pure
//! function of the three phase records and the current selection.

use crate::config::ScoringConfig;
use crate::hal::PHASE_COUNT;
use crate::logging::get_logger;
use crate::phase::PhaseState;

/// Quality scorer over the three phase records
pub struct QualityScorer {
    config: ScoringConfig,
    logger: crate::logging::StructuredLogger,
}

impl QualityScorer {
    /// Create a scorer with the given constants
    pub fn new(config: ScoringConfig) -> Self {
        let logger = get_logger("scorer");
        Self { config, logger }
    }

    /// Composite score for one phase, or None when the phase is excluded
    /// outright because its average sits below the comparison floor.
    pub fn phase_score(&self, state: &PhaseState, is_selected: bool) -> Option<f64> {
        if state.avg_voltage < self.config.min_voltage {
            return None;
        }

        let variation = state.variation();
        let stability_score =
            100.0 * (1.0 - (variation / self.config.max_variation).clamp(0.0, 1.0));

        let voltage_error = (state.avg_voltage - self.config.target_voltage).abs();
        let voltage_score =
            100.0 * (1.0 - (voltage_error / self.config.voltage_error_span).min(1.0));

        let mut total = voltage_score * self.config.voltage_weight
            + stability_score * self.config.stability_weight;
        if is_selected {
            total += self.config.hysteresis_bonus;
        }
        Some(total)
    }

    /// Pick the best phase among those above the comparison floor.
    ///
    /// The strictly highest score wins; when every phase is excluded there is
    /// no valid alternative and the current selection comes back unchanged.
    pub fn best_phase(
        &self,
        phases: &[PhaseState; PHASE_COUNT],
        selected: Option<usize>,
    ) -> Option<usize> {
        let mut best = selected;
        let mut best_score = -1.0f64;

        for (i, state) in phases.iter().enumerate() {
            match self.phase_score(state, selected == Some(i)) {
                None => {
                    self.logger.debug(&format!(
                        "{}: rejected, {:.1}V below comparison floor",
                        state.name(),
                        state.avg_voltage
                    ));
                }
                Some(total) => {
                    self.logger.debug(&format!(
                        "{}: V={:.1}V var={:.1}V score={:.1}{}",
                        state.name(),
                        state.avg_voltage,
                        state.variation(),
                        total,
                        if selected == Some(i) { " (current)" } else { "" }
                    ));
                    if total > best_score {
                        best_score = total;
                        best = Some(i);
                    }
                }
            }
        }

        best
    }
}
