//! Safety-gated relay switchover
//!
//! The only steady state is "one phase selected"; a switch is a transition
//! guarded by an interval lockout and voltage bounds, sequenced strictly
//! break-before-make so two mains phases can never be connected to the load
//! at once. A denied switch leaves everything untouched; the decision is
//! simply reconsidered on the next evaluation or re-requested by the
//! operator.

use crate::config::SwitchingConfig;
use crate::error::Result;
use crate::hal::{PHASE_COUNT, PhaseIo};
use crate::logging::get_logger;
use crate::phase::PhaseState;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{Duration, sleep};

/// Why a switch request was not carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SwitchDenied {
    /// Phase index outside 0..3
    #[error("invalid phase index {0}")]
    InvalidPhase(usize),

    /// Interval lockout still active
    #[error("too soon, {remaining_secs}s of switch lockout remaining")]
    TooSoon { remaining_secs: u64 },

    /// Target average below the undervoltage gate
    #[error("target voltage too low")]
    Undervoltage,

    /// Target average above the overvoltage gate
    #[error("target voltage too high")]
    Overvoltage,
}

/// Outcome of a switch request that did not fail on I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAttempt {
    /// Relays were re-sequenced onto the target phase
    Completed,

    /// Request denied by a gate; prior state untouched
    Denied(SwitchDenied),
}

/// Relay switchover state machine
pub struct SwitchController {
    config: SwitchingConfig,
    selected: Option<usize>,
    last_switch: Option<Instant>,
    logger: crate::logging::StructuredLogger,
}

impl SwitchController {
    /// Create a controller with nothing selected and no switch on record
    pub fn new(config: SwitchingConfig) -> Self {
        let logger = get_logger("switch");
        Self {
            config,
            selected: None,
            last_switch: None,
            logger,
        }
    }

    /// Currently selected phase; None until the first accepted switch
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Monotonic time of the last accepted switch
    pub fn last_switch(&self) -> Option<Instant> {
        self.last_switch
    }

    /// Attempt a switch to `target`.
    ///
    /// `force` bypasses the interval lockout (manual requests); the voltage
    /// gates always apply. Gate denials come back as
    /// [`SwitchAttempt::Denied`] and never as a hard error; `Err` is reserved
    /// for relay I/O failures.
    pub async fn try_switch(
        &mut self,
        io: &mut dyn PhaseIo,
        phases: &mut [PhaseState; PHASE_COUNT],
        target: usize,
        force: bool,
    ) -> Result<SwitchAttempt> {
        if target >= PHASE_COUNT {
            self.logger
                .warn(&format!("Switch rejected: invalid phase index {}", target));
            return Ok(SwitchAttempt::Denied(SwitchDenied::InvalidPhase(target)));
        }

        // Lockout protects the contactor mechanics from oscillation
        if !force
            && let Some(last) = self.last_switch
        {
            let interval = Duration::from_secs(self.config.min_switch_interval_secs);
            let elapsed = last.elapsed();
            if elapsed < interval {
                let remaining_secs = (interval - elapsed).as_secs();
                self.logger.info(&format!(
                    "Switch blocked: too soon ({}s remaining)",
                    remaining_secs
                ));
                return Ok(SwitchAttempt::Denied(SwitchDenied::TooSoon {
                    remaining_secs,
                }));
            }
        }

        // Stricter voltage gate than the scorer's comparison floor, checked
        // against the latest average at switch time; force never bypasses it
        let avg = phases[target].avg_voltage;
        if avg < self.config.undervoltage_threshold {
            self.logger.warn(&format!(
                "Switch blocked: {} too low at {:.1}V",
                phases[target].name(),
                avg
            ));
            return Ok(SwitchAttempt::Denied(SwitchDenied::Undervoltage));
        }
        if avg > self.config.overvoltage_threshold {
            self.logger.warn(&format!(
                "Switch blocked: {} too high at {:.1}V",
                phases[target].name(),
                avg
            ));
            return Ok(SwitchAttempt::Denied(SwitchDenied::Overvoltage));
        }

        // Break-before-make: open everything, let the contacts settle, then
        // close exactly one. On an I/O failure mid-sequence the bank is left
        // with nothing commanded closed, which is the safe state.
        self.open_all(io, phases).await?;
        sleep(Duration::from_millis(self.config.relay_settle_ms)).await;

        if let Err(e) = io.set_relay(target, true).await {
            self.logger.error(&format!(
                "Failed to energize {}: {}",
                phases[target].name(),
                e
            ));
            return Err(e);
        }
        phases[target].is_active = true;
        self.selected = Some(target);
        self.last_switch = Some(Instant::now());

        self.logger
            .info(&format!("Switched to {}", phases[target].name()));
        Ok(SwitchAttempt::Completed)
    }

    /// Drive every relay inactive and clear the selection
    pub async fn reset_relays(
        &mut self,
        io: &mut dyn PhaseIo,
        phases: &mut [PhaseState; PHASE_COUNT],
    ) -> Result<()> {
        self.open_all(io, phases).await?;
        self.selected = None;
        Ok(())
    }

    async fn open_all(
        &mut self,
        io: &mut dyn PhaseIo,
        phases: &mut [PhaseState; PHASE_COUNT],
    ) -> Result<()> {
        for (i, phase) in phases.iter_mut().enumerate() {
            // Record state first: after a partial failure we no longer trust
            // any relay to be closed
            phase.is_active = false;
            if let Err(e) = io.set_relay(i, false).await {
                self.selected = None;
                self.logger
                    .error(&format!("Failed to open {}: {}", phase.name(), e));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Click each relay once in sequence so the installer can hear the bank
    /// is wired and alive
    pub async fn self_test(&self, io: &mut dyn PhaseIo) -> Result<()> {
        self.logger.info("Testing relays");
        for i in 0..PHASE_COUNT {
            io.set_relay(i, true).await?;
            sleep(Duration::from_millis(300)).await;
            io.set_relay(i, false).await?;
            sleep(Duration::from_millis(300)).await;
        }
        self.logger.info("Relay test complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::hal::SimulatedIo;
    use crate::phase::PHASE_NAMES;

    fn healthy_phases() -> [PhaseState; PHASE_COUNT] {
        let mut phases = [
            PhaseState::new(PHASE_NAMES[0]),
            PhaseState::new(PHASE_NAMES[1]),
            PhaseState::new(PHASE_NAMES[2]),
        ];
        for p in &mut phases {
            p.avg_voltage = 220.0;
        }
        phases
    }

    fn quick_config() -> SwitchingConfig {
        SwitchingConfig {
            relay_settle_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invalid_index_is_denied() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        let attempt = ctl.try_switch(&mut io, &mut phases, 7, true).await.unwrap();
        assert_eq!(
            attempt,
            SwitchAttempt::Denied(SwitchDenied::InvalidPhase(7))
        );
        assert_eq!(ctl.selected(), None);
    }

    #[tokio::test]
    async fn voltage_gates_hold_even_when_forced() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();
        phases[1].avg_voltage = 170.0;

        let attempt = ctl.try_switch(&mut io, &mut phases, 1, true).await.unwrap();
        assert_eq!(attempt, SwitchAttempt::Denied(SwitchDenied::Undervoltage));

        phases[1].avg_voltage = 275.0;
        let attempt = ctl.try_switch(&mut io, &mut phases, 1, true).await.unwrap();
        assert_eq!(attempt, SwitchAttempt::Denied(SwitchDenied::Overvoltage));
        assert!(!phases[1].is_active);
    }

    #[tokio::test]
    async fn first_switch_needs_no_lockout() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        let attempt = ctl
            .try_switch(&mut io, &mut phases, 0, false)
            .await
            .unwrap();
        assert_eq!(attempt, SwitchAttempt::Completed);
        assert_eq!(ctl.selected(), Some(0));
        assert!(phases[0].is_active);
    }

    #[tokio::test]
    async fn lockout_denies_rapid_second_switch() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        assert_eq!(
            ctl.try_switch(&mut io, &mut phases, 0, false).await.unwrap(),
            SwitchAttempt::Completed
        );
        let attempt = ctl
            .try_switch(&mut io, &mut phases, 1, false)
            .await
            .unwrap();
        assert!(matches!(
            attempt,
            SwitchAttempt::Denied(SwitchDenied::TooSoon { .. })
        ));
        // Prior selection untouched
        assert_eq!(ctl.selected(), Some(0));
        assert!(phases[0].is_active);
        assert!(!phases[1].is_active);

        // Forced requests bypass the lockout but not the voltage gates
        assert_eq!(
            ctl.try_switch(&mut io, &mut phases, 1, true).await.unwrap(),
            SwitchAttempt::Completed
        );
        assert_eq!(ctl.selected(), Some(1));
    }

    #[tokio::test]
    async fn lockout_expires_after_the_interval() {
        let mut ctl = SwitchController::new(SwitchingConfig {
            min_switch_interval_secs: 1,
            relay_settle_ms: 1,
            ..Default::default()
        });
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        assert_eq!(
            ctl.try_switch(&mut io, &mut phases, 0, false).await.unwrap(),
            SwitchAttempt::Completed
        );
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(
            ctl.try_switch(&mut io, &mut phases, 2, false).await.unwrap(),
            SwitchAttempt::Completed
        );
        assert_eq!(ctl.selected(), Some(2));
    }

    #[tokio::test]
    async fn transition_is_break_before_make() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        ctl.try_switch(&mut io, &mut phases, 0, false).await.unwrap();
        ctl.try_switch(&mut io, &mut phases, 2, true).await.unwrap();

        // Every energize is preceded by a full bank open; never two closed
        let mut closed = [false; PHASE_COUNT];
        let mut max_closed = 0;
        for &(phase, on) in io.transitions() {
            closed[phase] = on;
            max_closed = max_closed.max(closed.iter().filter(|&&c| c).count());
        }
        assert_eq!(max_closed, 1);
        assert_eq!(io.relay_states(), [false, false, true]);
    }

    #[tokio::test]
    async fn exactly_one_phase_active_after_switches() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        for target in [0usize, 2, 1] {
            ctl.try_switch(&mut io, &mut phases, target, true)
                .await
                .unwrap();
            let active = phases.iter().filter(|p| p.is_active).count();
            assert_eq!(active, 1);
            assert_eq!(ctl.selected(), Some(target));
        }
    }

    #[tokio::test]
    async fn reset_relays_clears_selection() {
        let mut ctl = SwitchController::new(quick_config());
        let mut io = SimulatedIo::new(&SamplerConfig::default());
        let mut phases = healthy_phases();

        ctl.try_switch(&mut io, &mut phases, 1, false).await.unwrap();
        ctl.reset_relays(&mut io, &mut phases).await.unwrap();
        assert_eq!(ctl.selected(), None);
        assert_eq!(io.relay_states(), [false, false, false]);
        assert!(phases.iter().all(|p| !p.is_active));
    }
}
