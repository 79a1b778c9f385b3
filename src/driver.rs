//! Core driver logic for Triphase
//!
//! One task owns all mutable state: the three phase records, the trend
//! history, and the switch controller. It round-robins sampling bursts,
//! periodically re-evaluates phase quality, and applies operator commands.
//! Everything outside this task sees state only through the published
//! snapshots and talks back only through the command channel, so no field
//! ever has more than one writer and the relay transition can never be
//! interrupted by a second transition.

use crate::config::Config;
use crate::error::Result;
use crate::hal::{PHASE_COUNT, PhaseIo};
use crate::logging::get_logger;
use crate::phase::{PHASE_NAMES, PhaseState, TrendHistory};
use crate::sampler::VoltageSampler;
use crate::scorer::QualityScorer;
use crate::switch::{SwitchAttempt, SwitchController};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, interval};

/// Operating mode: phase selection computed on a timer, or dictated by
/// explicit operator requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemMode {
    Automatic,
    Manual,
}

impl SystemMode {
    /// Wire representation used in the status object
    pub fn as_str(self) -> &'static str {
        match self {
            SystemMode::Automatic => "automatic",
            SystemMode::Manual => "manual",
        }
    }

    /// Parse an operator-supplied mode string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" | "automatic" => Some(SystemMode::Automatic),
            "manual" => Some(SystemMode::Manual),
            _ => None,
        }
    }
}

/// Commands accepted by the driver from external components (web, etc.)
#[derive(Debug, Clone)]
pub enum DriverCommand {
    /// Change the operating mode
    SetMode(SystemMode),
    /// Force a manual switch to the given phase (also forces Manual mode)
    SelectPhase(usize),
}

/// Per-phase slice of the published status object
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSnapshot {
    pub name: &'static str,
    pub voltage: f64,
    pub avg_voltage: f64,
    /// None until a reading above the noise floor has been seen
    pub min_voltage: Option<f64>,
    pub max_voltage: f64,
    pub is_active: bool,
}

/// Consistent point-in-time view of the whole system, published after every
/// sampling and evaluation cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub mode: &'static str,
    pub best_phase: Option<usize>,
    pub selected_phase: Option<usize>,
    pub phases: Vec<PhaseSnapshot>,
    pub timestamp: String,
}

/// Main driver for Triphase
pub struct PhaseDriver {
    config: Config,

    /// Hardware boundary
    io: Box<dyn PhaseIo>,

    /// Per-phase smoothed statistics
    phases: [PhaseState; PHASE_COUNT],

    sampler: VoltageSampler,
    scorer: QualityScorer,
    switcher: SwitchController,

    mode: SystemMode,
    history: TrendHistory,

    /// Round-robin cursor: one phase refreshed per sampling tick
    next_phase: usize,

    last_stats_reset: Instant,

    logger: crate::logging::StructuredLogger,

    /// Command receiver for external control
    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,

    /// Shutdown signal
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    /// Published status snapshots (web reads these, never the live records)
    snapshot_tx: watch::Sender<Arc<StatusSnapshot>>,

    /// Published trend history rows
    history_tx: watch::Sender<Arc<Vec<[f64; PHASE_COUNT]>>>,

    /// Broadcast channel for streaming live status updates (SSE)
    status_tx: broadcast::Sender<String>,
}

impl PhaseDriver {
    /// Create a new driver instance over the given hardware backend
    pub fn new(
        config: Config,
        io: Box<dyn PhaseIo>,
        commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Result<Self> {
        let logger = get_logger("driver");

        let phases = [
            PhaseState::new(PHASE_NAMES[0]),
            PhaseState::new(PHASE_NAMES[1]),
            PhaseState::new(PHASE_NAMES[2]),
        ];

        let sampler = VoltageSampler::new(config.sampler.clone());
        let scorer = QualityScorer::new(config.scoring.clone());
        let switcher = SwitchController::new(config.switching.clone());

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (status_tx, _status_rx) = broadcast::channel::<String>(100);

        let initial = Arc::new(Self::snapshot_of(
            &phases,
            SystemMode::Automatic,
            None,
            None,
        ));
        let (snapshot_tx, _) = watch::channel(initial);
        let (history_tx, _) = watch::channel(Arc::new(Vec::new()));

        logger.info("Initializing best-phase driver");

        Ok(Self {
            config,
            io,
            phases,
            sampler,
            scorer,
            switcher,
            mode: SystemMode::Automatic,
            history: TrendHistory::default(),
            next_phase: 0,
            last_stats_reset: Instant::now(),
            logger,
            commands_rx,
            shutdown_tx,
            shutdown_rx,
            snapshot_tx,
            history_tx,
            status_tx,
        })
    }

    /// Run the driver main loop
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting best-phase driver main loop");

        // Known relay state before anything else: everything open
        self.switcher
            .reset_relays(self.io.as_mut(), &mut self.phases)
            .await?;

        if self.config.switching.relay_self_test {
            self.switcher.self_test(self.io.as_mut()).await?;
        }

        let mut sample_tick = interval(Duration::from_millis(self.config.sample_interval_ms));
        let mut evaluate_tick = interval(Duration::from_millis(self.config.evaluation_interval_ms));

        loop {
            tokio::select! {
                _ = sample_tick.tick() => {
                    if let Err(e) = self.sample_cycle().await {
                        self.logger.error(&format!("Sampling cycle failed: {}", e));
                        // Keep sampling; the gates bound what a bad cycle can do
                    }
                }
                _ = evaluate_tick.tick() => {
                    if let Err(e) = self.evaluate_cycle().await {
                        self.logger.error(&format!("Evaluation cycle failed: {}", e));
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        // Relays hold their last commanded state so the load stays powered
        // across a daemon restart
        self.logger.info("Driver shutdown complete");
        Ok(())
    }

    /// Refresh one phase's statistics with a sampling burst
    async fn sample_cycle(&mut self) -> Result<()> {
        let idx = self.next_phase;
        self.next_phase = (idx + 1) % PHASE_COUNT;

        self.sampler
            .sample(self.io.as_mut(), idx, &mut self.phases[idx])
            .await?;

        self.publish_snapshot();
        Ok(())
    }

    /// Append trend history, reseed stale bounds, and in automatic mode act
    /// on the scorer's recommendation
    async fn evaluate_cycle(&mut self) -> Result<()> {
        let avgs = [
            self.phases[0].avg_voltage,
            self.phases[1].avg_voltage,
            self.phases[2].avg_voltage,
        ];
        self.history.record(avgs);
        let _ = self.history_tx.send(Arc::new(self.history.rows()));

        let reset_after = Duration::from_secs(self.config.stats_reset_interval_secs);
        if self.last_stats_reset.elapsed() >= reset_after {
            for phase in &mut self.phases {
                phase.reseed_bounds();
            }
            self.last_stats_reset = Instant::now();
            self.logger.debug("Reseeded per-phase min/max bounds");
        }

        if self.mode == SystemMode::Automatic {
            let selected = self.switcher.selected();
            if let Some(best) = self.scorer.best_phase(&self.phases, selected)
                && Some(best) != selected
            {
                self.logger.info(&format!(
                    "Auto mode: switching from {} to {}",
                    selected.map_or("none", |i| self.phases[i].name()),
                    self.phases[best].name()
                ));
                let attempt = self
                    .switcher
                    .try_switch(self.io.as_mut(), &mut self.phases, best, false)
                    .await?;
                if let SwitchAttempt::Denied(denied) = attempt {
                    self.logger.info(&format!("Auto switch not taken: {}", denied));
                }
            }
        }

        self.publish_snapshot();
        Ok(())
    }

    /// Handle external command
    async fn handle_command(&mut self, cmd: DriverCommand) {
        match cmd {
            DriverCommand::SetMode(mode) => {
                self.mode = mode;
                self.logger
                    .info(&format!("Mode changed to {}", mode.as_str()));
            }
            DriverCommand::SelectPhase(target) => {
                // An explicit phase choice implies the operator wants manual
                // control; the interval lockout is bypassed, the voltage
                // gates are not
                self.mode = SystemMode::Manual;
                match self
                    .switcher
                    .try_switch(self.io.as_mut(), &mut self.phases, target, true)
                    .await
                {
                    Ok(SwitchAttempt::Completed) => {}
                    Ok(SwitchAttempt::Denied(denied)) => {
                        self.logger
                            .warn(&format!("Manual switch denied: {}", denied));
                    }
                    Err(e) => {
                        self.logger.error(&format!("Manual switch failed: {}", e));
                    }
                }
            }
        }
        self.publish_snapshot();
    }

    fn snapshot_of(
        phases: &[PhaseState; PHASE_COUNT],
        mode: SystemMode,
        best: Option<usize>,
        selected: Option<usize>,
    ) -> StatusSnapshot {
        StatusSnapshot {
            mode: mode.as_str(),
            best_phase: best,
            selected_phase: selected,
            phases: phases
                .iter()
                .map(|p| PhaseSnapshot {
                    name: p.name(),
                    voltage: p.voltage,
                    avg_voltage: p.avg_voltage,
                    min_voltage: p.min_voltage.is_finite().then_some(p.min_voltage),
                    max_voltage: p.max_voltage,
                    is_active: p.is_active,
                })
                .collect(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Publish a consistent snapshot to the watch channel and SSE stream
    fn publish_snapshot(&mut self) {
        let best = self.scorer.best_phase(&self.phases, self.switcher.selected());
        let snapshot = Arc::new(Self::snapshot_of(
            &self.phases,
            self.mode,
            best,
            self.switcher.selected(),
        ));
        self.snapshot_tx.send_replace(snapshot.clone());

        if self.status_tx.receiver_count() > 0
            && let Ok(payload) = serde_json::to_string(snapshot.as_ref())
        {
            let _ = self.status_tx.send(payload);
        }
    }

    /// Current operating mode
    pub fn mode(&self) -> SystemMode {
        self.mode
    }

    /// Subscribe to published status snapshots
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Subscribe to published trend history rows
    pub fn subscribe_history(&self) -> watch::Receiver<Arc<Vec<[f64; PHASE_COUNT]>>> {
        self.history_tx.subscribe()
    }

    /// Sender feeding the SSE status stream
    pub fn status_sender(&self) -> broadcast::Sender<String> {
        self.status_tx.clone()
    }

    /// Handle for requesting shutdown from another task
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Get configuration reference
    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings_round_trip() {
        assert_eq!(SystemMode::parse("auto"), Some(SystemMode::Automatic));
        assert_eq!(SystemMode::parse("automatic"), Some(SystemMode::Automatic));
        assert_eq!(SystemMode::parse("manual"), Some(SystemMode::Manual));
        assert_eq!(SystemMode::parse("off"), None);
        assert_eq!(SystemMode::Automatic.as_str(), "automatic");
        assert_eq!(SystemMode::Manual.as_str(), "manual");
    }

    #[test]
    fn snapshot_hides_unset_minimum() {
        let phases = [
            PhaseState::new(PHASE_NAMES[0]),
            PhaseState::new(PHASE_NAMES[1]),
            PhaseState::new(PHASE_NAMES[2]),
        ];
        let snap = PhaseDriver::snapshot_of(&phases, SystemMode::Automatic, None, None);
        assert_eq!(snap.mode, "automatic");
        assert!(snap.phases.iter().all(|p| p.min_voltage.is_none()));
        assert!(snap.phases.iter().all(|p| !p.is_active));

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["phases"][0]["minVoltage"].is_null());
        assert_eq!(json["phases"][0]["name"], "Phase 1");
        assert!(json["selectedPhase"].is_null());
    }
}
