//! Simulation configuration
//!
//! All knobs of the medium, the relays and the replication layer. Every
//! struct has a `Default` and the medium has presets ranging from a perfect
//! channel to a hostile one. Configurations derive serde so an external
//! loader can read them from a parameter file.

use serde::{Deserialize, Serialize};

use crate::{RandomSource, ScuttleError, ScuttleResult};

/// Extra delay added to every delivery, in ticks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Jitter {
    None,
    /// Uniform in `[0, max)`
    Uniform { max: f64 },
    /// Normal, clamped at zero
    Normal { mean: f64, std_dev: f64 },
}

impl Jitter {
    /// Sample a jitter value
    pub fn sample(&self, rng: &mut dyn RandomSource) -> f64 {
        match self {
            Jitter::None => 0.0,
            Jitter::Uniform { max } => rng.uniform() * max,
            Jitter::Normal { mean, std_dev } => rng.normal(*mean, *std_dev).max(0.0),
        }
    }
}

/// Per-delivery loss decision
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossModel {
    None,
    /// Every delivery is lost independently with probability `probability`
    Uniform { probability: f64 },
    /// Distance-dependent bit errors: the signal-to-noise ratio falls with
    /// log-distance path loss plus gaussian noise, and a frame survives only
    /// if all of its bits do
    Snr {
        snr_db: f64,
        noise_std_dev_db: f64,
        reference_distance: f64,
        path_loss_exponent: f64,
        frame_bits: u32,
    },
}

impl LossModel {
    /// Decide whether one delivery over `distance` is lost
    pub fn is_lost(&self, distance: f64, rng: &mut dyn RandomSource) -> bool {
        match self {
            LossModel::None => false,
            LossModel::Uniform { probability } => rng.chance(*probability),
            LossModel::Snr { .. } => {
                let survival = self.survival_probability(distance, rng);
                !rng.chance(survival)
            }
        }
    }

    /// Probability that a frame crosses `distance` intact, noise sampled
    fn survival_probability(&self, distance: f64, rng: &mut dyn RandomSource) -> f64 {
        match self {
            LossModel::None => 1.0,
            LossModel::Uniform { probability } => 1.0 - probability,
            LossModel::Snr {
                snr_db,
                noise_std_dev_db,
                reference_distance,
                path_loss_exponent,
                frame_bits,
            } => {
                let ratio = (distance / reference_distance).max(f64::MIN_POSITIVE);
                let path_loss = 10.0 * path_loss_exponent * ratio.log10();
                let received_db = snr_db - path_loss - rng.normal(0.0, *noise_std_dev_db);
                let snr = 10f64.powf(received_db / 10.0);
                let bit_error = 0.5 * (-snr / 2.0).exp();
                (1.0 - bit_error).powi(*frame_bits as i32)
            }
        }
    }
}

/// Broadcast medium parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediumConfig {
    /// Relays further apart than this never hear each other
    pub broadcast_range: f64,
    /// Distance units covered per tick
    pub propagation_speed: f64,
    /// Ticks a frame occupies the channel at the receiver
    pub transmission_time: f64,
    pub jitter: Jitter,
    pub loss: LossModel,
    /// Overlapping receptions at one relay destroy each other
    pub collisions: bool,
    /// Deliveries per directed link per tick, 0 for unlimited
    pub link_bandwidth: usize,
}

impl Default for MediumConfig {
    fn default() -> Self {
        MediumConfig {
            broadcast_range: 100.0,
            propagation_speed: 100.0,
            transmission_time: 0.05,
            jitter: Jitter::Uniform { max: 0.5 },
            loss: LossModel::Uniform { probability: 0.01 },
            collisions: false,
            link_bandwidth: 64,
        }
    }
}

impl MediumConfig {
    /// Perfect channel: no jitter, loss, collisions or bandwidth cap
    pub fn ideal() -> Self {
        MediumConfig {
            jitter: Jitter::None,
            loss: LossModel::None,
            collisions: false,
            link_bandwidth: 0,
            ..Default::default()
        }
    }

    /// Good radio conditions
    pub fn good() -> Self {
        MediumConfig {
            jitter: Jitter::Uniform { max: 0.2 },
            loss: LossModel::Uniform { probability: 0.001 },
            ..Default::default()
        }
    }

    /// Poor radio conditions
    pub fn poor() -> Self {
        MediumConfig {
            jitter: Jitter::Normal {
                mean: 0.5,
                std_dev: 0.5,
            },
            loss: LossModel::Uniform { probability: 0.1 },
            collisions: true,
            link_bandwidth: 32,
            ..Default::default()
        }
    }

    /// Hostile radio conditions
    pub fn hostile() -> Self {
        MediumConfig {
            jitter: Jitter::Normal {
                mean: 1.0,
                std_dev: 1.0,
            },
            loss: LossModel::Uniform { probability: 0.3 },
            collisions: true,
            link_bandwidth: 8,
            ..Default::default()
        }
    }

    /// Distance-dependent loss calibrated to the broadcast range
    pub fn radio() -> Self {
        let range = 100.0;
        MediumConfig {
            broadcast_range: range,
            loss: LossModel::Snr {
                snr_db: 24.0,
                noise_std_dev_db: 1.0,
                reference_distance: range / 4.0,
                path_loss_exponent: 2.6,
                frame_bits: 8 * 256,
            },
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ScuttleResult<()> {
        if !(self.broadcast_range > 0.0) {
            return Err(invalid("broadcast_range must be positive"));
        }
        if !(self.propagation_speed > 0.0) {
            return Err(invalid("propagation_speed must be positive"));
        }
        if !(self.transmission_time >= 0.0) {
            return Err(invalid("transmission_time must not be negative"));
        }
        match &self.jitter {
            Jitter::None => {}
            Jitter::Uniform { max } if *max < 0.0 => {
                return Err(invalid("uniform jitter max must not be negative"))
            }
            Jitter::Normal { std_dev, .. } if *std_dev < 0.0 => {
                return Err(invalid("jitter std_dev must not be negative"))
            }
            _ => {}
        }
        match &self.loss {
            LossModel::Uniform { probability } if !(0.0..=1.0).contains(probability) => {
                Err(invalid("loss probability must be within [0, 1]"))
            }
            LossModel::Snr {
                reference_distance,
                frame_bits,
                ..
            } if *reference_distance <= 0.0 || *frame_bits == 0 => Err(invalid(
                "snr loss needs a positive reference distance and frame size",
            )),
            _ => Ok(()),
        }
    }
}

/// How a relay treats waves that arrive ahead of the next expected one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Drop anything out of order, no retransmission
    StrictOrder,
    /// Buffer out-of-order waves, no retransmission
    BufferedReorder,
    /// Buffer out-of-order waves and pull gaps with ARQ requests
    RequestResponse,
}

impl DeliveryPolicy {
    pub fn buffers(self) -> bool {
        !matches!(self, DeliveryPolicy::StrictOrder)
    }

    pub fn requests_retransmission(self) -> bool {
        matches!(self, DeliveryPolicy::RequestResponse)
    }
}

/// Relay behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub delivery: DeliveryPolicy,
    /// Ticks between ARQ rounds
    pub arq_interval: u64,
    /// Ticks between attempts to open a replication session
    pub gossip_interval: u64,
    /// Ticks between neighbor table refreshes
    pub neighbor_refresh_interval: u64,
    /// Out-of-order waves held per source
    pub max_buffered_per_source: usize,
    /// Waves re-forwarded in answer to one ARQ request
    pub max_retransmit_per_request: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            delivery: DeliveryPolicy::RequestResponse,
            arq_interval: 5,
            gossip_interval: 10,
            neighbor_refresh_interval: 20,
            max_buffered_per_source: 1024,
            max_retransmit_per_request: 32,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> ScuttleResult<()> {
        if self.arq_interval == 0 || self.gossip_interval == 0 || self.neighbor_refresh_interval == 0 {
            return Err(invalid("relay intervals must be at least one tick"));
        }
        if self.max_retransmit_per_request == 0 {
            return Err(invalid("max_retransmit_per_request must be positive"));
        }
        Ok(())
    }
}

/// Which feeds a participant replicates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestMode {
    /// Replicate every feed heard of
    Open,
    /// Replicate followed feeds and the feeds they follow, minus blocks
    Transitive,
}

/// What happens to the log of a feed once it is blocked
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPolicy {
    /// Drop the log
    Purge,
    /// Stop replicating but keep the log aside, restored on unblock
    Retain,
}

/// Replication layer behaviour
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GossipConfig {
    pub interest: InterestMode,
    pub block_policy: BlockPolicy,
    /// Ticks a session may stay open before it is abandoned
    pub session_timeout: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        GossipConfig {
            interest: InterestMode::Open,
            block_policy: BlockPolicy::Purge,
            session_timeout: 60,
        }
    }
}

impl GossipConfig {
    pub fn transitive() -> Self {
        GossipConfig {
            interest: InterestMode::Transitive,
            ..Default::default()
        }
    }
}

/// Complete simulation configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub seed: u64,
    pub medium: MediumConfig,
    pub relay: RelayConfig,
    pub gossip: GossipConfig,
}

impl SimConfig {
    /// Check every parameter before a simulation starts
    pub fn validate(&self) -> ScuttleResult<()> {
        self.medium.validate()?;
        self.relay.validate()?;
        if self.gossip.session_timeout == 0 {
            return Err(invalid("session_timeout must be at least one tick"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ScuttleError {
    ScuttleError::InvalidConfig(reason.to_string())
}
