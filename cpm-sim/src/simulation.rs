//! The simulation driver.
//!
//! Owns the synthetic environment and the round loop: every trial draws
//! fresh hidden reward models, every client runs its own bandit against
//! them, and the per-round records are aggregated into the learning and
//! regret curves. A uniformly random arm-selection baseline runs against the
//! same environment draws for comparison.
//!
//! Everything is sequential and every stochastic draw comes from a
//! generator derived from `(base_seed, trial, client)`, so a configuration
//! determines the curves exactly.

use rand::Rng;
use thiserror::Error;
use tracing::debug;

use cpm_core::{derive_rng, BanditError, LinUcb, PairEnvironment};

use crate::settings::SimSettings;

/// Stream tags for [`derive_rng`], so that the parameter, context, and
/// per-policy noise streams never overlap.
mod stream {
    pub const PARAMS: u64 = 0;
    pub const CONTEXT: u64 = 1;
    pub const LINUCB: u64 = 2;
    pub const RANDOM: u64 = 3;
}

#[derive(Debug, Error)]
/// Errors related to running the simulation.
pub enum SimulationError {
    #[error("bandit rejected a driver-generated input: {0}")]
    Bandit(#[from] BanditError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// The per-round outcome for one client under one policy.
pub struct RoundRecord {
    /// The arm the policy chose.
    pub chosen_arm: usize,
    /// The realized (noisy) reward of the chosen arm.
    pub realized_reward: f64,
    /// The best achievable noise-free reward this round, an oracle quantity
    /// used only for regret accounting.
    pub best_reward: f64,
}

impl RoundRecord {
    /// Gets this round's regret contribution.
    ///
    /// Clamped at zero so that a lucky noise draw cannot make the cumulative
    /// regret decrease.
    pub fn regret(&self) -> f64 {
        (self.best_reward - self.realized_reward).max(0.)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// The aggregated per-round curves of one policy.
pub struct MethodCurves {
    /// Mean Pass@1 proxy per round, over all clients and trials.
    pub learning: Vec<f64>,
    /// Mean cumulative regret per round, over all clients and trials.
    pub regret: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
/// The curves of the bandit policy and the random baseline.
pub struct SimulationCurves {
    pub linucb: MethodCurves,
    pub random: MethodCurves,
}

/// Runs the full simulation and aggregates the output curves.
///
/// # Errors
/// Fails only if a bandit rejects an input, which the driver rules out by
/// construction (contexts are generated with the configured dimension).
pub fn run(settings: &SimSettings) -> Result<SimulationCurves, SimulationError> {
    let mut linucb = Accumulator::new(settings.num_rounds);
    let mut random = Accumulator::new(settings.num_rounds);

    for trial in 0..settings.num_trials {
        let mut params_rng = derive_rng(settings.base_seed, &[stream::PARAMS, trial as u64]);
        let env = PairEnvironment::generate(
            &mut params_rng,
            settings.num_arms,
            settings.context_dim,
            settings.noise_sigma,
        );
        debug!(trial, "generated trial environment");

        for client in 0..settings.num_clients {
            let (linucb_records, random_records) = run_client(settings, &env, trial, client)?;
            linucb.absorb(&linucb_records);
            random.absorb(&random_records);
        }
    }

    let samples = settings.num_trials * settings.num_clients;
    Ok(SimulationCurves {
        linucb: linucb.into_curves(settings, samples),
        random: random.into_curves(settings, samples),
    })
}

/// Runs one client's trial: the bandit policy and the random baseline, both
/// against the same contexts and hidden reward models.
fn run_client(
    settings: &SimSettings,
    env: &PairEnvironment,
    trial: usize,
    client: usize,
) -> Result<(Vec<RoundRecord>, Vec<RoundRecord>), SimulationError> {
    let mut bandit = LinUcb::new(
        settings.num_arms,
        settings.context_dim,
        settings.alpha,
        settings.lambda,
    );

    let mut context_rng = derive_rng(
        settings.base_seed,
        &[stream::CONTEXT, trial as u64, client as u64],
    );
    let mut linucb_rng = derive_rng(
        settings.base_seed,
        &[stream::LINUCB, trial as u64, client as u64],
    );
    let mut random_rng = derive_rng(
        settings.base_seed,
        &[stream::RANDOM, trial as u64, client as u64],
    );

    let mut linucb_records = Vec::with_capacity(settings.num_rounds);
    let mut random_records = Vec::with_capacity(settings.num_rounds);

    for _ in 0..settings.num_rounds {
        let context = env.sample_context(&mut context_rng);
        let best_reward = env.best_reward(&context);

        let chosen_arm = bandit.select(&context)?;
        let realized_reward = env.realized_reward(&mut linucb_rng, chosen_arm, &context);
        bandit.update(chosen_arm, &context, realized_reward)?;
        linucb_records.push(RoundRecord {
            chosen_arm,
            realized_reward,
            best_reward,
        });

        let chosen_arm = random_rng.gen_range(0..settings.num_arms);
        let realized_reward = env.realized_reward(&mut random_rng, chosen_arm, &context);
        random_records.push(RoundRecord {
            chosen_arm,
            realized_reward,
            best_reward,
        });
    }

    Ok((linucb_records, random_records))
}

/// Per-round sums over all `(trial, client)` runs of one policy.
struct Accumulator {
    reward_sums: Vec<f64>,
    regret_sums: Vec<f64>,
}

impl Accumulator {
    fn new(num_rounds: usize) -> Self {
        Self {
            reward_sums: vec![0.; num_rounds],
            regret_sums: vec![0.; num_rounds],
        }
    }

    fn absorb(&mut self, records: &[RoundRecord]) {
        let mut cumulative_regret = 0.;
        for (round, record) in records.iter().enumerate() {
            cumulative_regret += record.regret();
            self.reward_sums[round] += record.realized_reward;
            self.regret_sums[round] += cumulative_regret;
        }
    }

    fn into_curves(self, settings: &SimSettings, samples: usize) -> MethodCurves {
        let learning = self
            .reward_sums
            .iter()
            .map(|&sum| {
                let mean = sum / samples as f64;
                (mean * settings.pass1_scale + settings.pass1_offset).clamp(0., 1.)
            })
            .collect();
        let regret = self
            .regret_sums
            .iter()
            .map(|&sum| sum / samples as f64)
            .collect();
        MethodCurves { learning, regret }
    }
}

#[cfg(test)]
mod tests {
    use crate::settings::SimSettings;

    use super::*;

    fn small_settings() -> SimSettings {
        SimSettings {
            num_clients: 2,
            num_arms: 3,
            context_dim: 4,
            num_rounds: 50,
            num_trials: 3,
            ..SimSettings::default()
        }
    }

    #[test]
    fn test_identical_seeds_produce_identical_curves() {
        let settings = small_settings();
        let first = run(&settings).unwrap();
        let second = run(&settings).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_curve_lengths_match_round_count() {
        let settings = small_settings();
        let curves = run(&settings).unwrap();
        for series in [
            &curves.linucb.learning,
            &curves.linucb.regret,
            &curves.random.learning,
            &curves.random.regret,
        ]
        .iter()
        {
            assert_eq!(series.len(), settings.num_rounds);
        }
    }

    #[test]
    fn test_regret_curves_are_non_decreasing() {
        let curves = run(&small_settings()).unwrap();
        for series in [&curves.linucb.regret, &curves.random.regret].iter() {
            for window in series.windows(2) {
                assert!(window[1] >= window[0]);
            }
        }
    }

    #[test]
    fn test_learning_curve_is_bounded() {
        let curves = run(&small_settings()).unwrap();
        for &value in curves.linucb.learning.iter().chain(&curves.random.learning) {
            assert!((0. ..=1.).contains(&value));
        }
    }

    #[test]
    fn test_bandit_beats_random_baseline() {
        let settings = SimSettings {
            num_rounds: 200,
            num_trials: 5,
            ..SimSettings::default()
        };
        let curves = run(&settings).unwrap();
        let linucb_final = *curves.linucb.regret.last().unwrap();
        let random_final = *curves.random.regret.last().unwrap();
        assert!(linucb_final < random_final);
    }

    #[test]
    fn test_round_record_regret_is_clamped() {
        let record = RoundRecord {
            chosen_arm: 0,
            realized_reward: 1.5,
            best_reward: 1.,
        };
        assert_eq!(record.regret(), 0.);
    }
}
