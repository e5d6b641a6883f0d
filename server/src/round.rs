//! Round lifecycle and scoring
//!
//! Exactly one round exists per server, cycling Idle -> Active -> Idle. A
//! round has no timer: once started it stays active until some client
//! submits it for settlement. Settlement is the only scoring pass, comparing
//! every live session's last reported frequency against the shared target.

use crate::registry::SessionRegistry;
use log::info;
use rand::Rng;
use shared::{GameConfig, DEFAULT_FREQUENCY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Idle,
    Active,
}

/// The single shared round: target frequency plus phase.
///
/// The target is only meaningful while the round is active; the last value
/// is retained after settlement for display but never scored against again.
pub struct RoundStateMachine {
    config: GameConfig,
    phase: RoundPhase,
    target_frequency: f64,
}

impl RoundStateMachine {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            phase: RoundPhase::Idle,
            target_frequency: DEFAULT_FREQUENCY,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    pub fn target_frequency(&self) -> f64 {
        self.target_frequency
    }

    /// Starts a round: draws a fresh target from the configured band, clears
    /// every session's match flag and goes active.
    ///
    /// Starting while a round is already active is a silent no-op returning
    /// false. Clients routinely double-send the start intent; the guard makes
    /// the duplicates harmless rather than an error worth reporting.
    pub fn start_round(&mut self, registry: &mut SessionRegistry) -> bool {
        if self.phase == RoundPhase::Active {
            return false;
        }

        self.target_frequency = rand::thread_rng()
            .gen_range(self.config.target_band_min..self.config.target_band_max);
        registry.reset_matched();
        self.phase = RoundPhase::Active;

        info!("Round started, target {:.0} Hz", self.target_frequency);
        true
    }

    #[cfg(test)]
    pub(crate) fn force_target(&mut self, target: f64) {
        self.target_frequency = target;
    }

    /// Settles the active round: scores every session against the target and
    /// queues one durable score write per player.
    ///
    /// A session matches when its last reported frequency lands strictly
    /// within tolerance of the target. Matching bumps the streak first and
    /// then awards `score_increment + streak`, so the reward grows with
    /// consecutive hits; the increment order is part of the game balance.
    /// Missing resets the streak and leaves the score alone. Settling while
    /// idle mutates nothing and writes nothing.
    pub fn settle_round(&mut self, registry: &mut SessionRegistry) -> bool {
        if self.phase != RoundPhase::Active {
            return false;
        }

        let target = self.target_frequency;
        let tolerance = self.config.frequency_tolerance;
        let increment = self.config.score_increment;

        let mut matched_count = 0usize;
        for session in registry.sessions_mut() {
            let matched = (session.current_frequency - target).abs() < tolerance;
            session.is_matched = matched;

            if matched {
                session.streak += 1;
                session.score += increment + session.streak;
                matched_count += 1;
            } else {
                session.streak = 0;
            }
        }

        registry.persist_scores();
        self.phase = RoundPhase::Idle;

        info!(
            "Round settled, {}/{} players matched {:.0} Hz",
            matched_count,
            registry.len(),
            target
        );
        true
    }
}
