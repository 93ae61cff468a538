//! Simulated network with deterministic latency, loss, and partitions.

use arbor_types::ReplicaId;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Message-delivery model of the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    /// Base one-way latency.
    pub latency: Duration,
    /// Jitter as a fraction of the base latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Probability of dropping any given message (0.0 - 1.0).
    pub packet_loss_rate: f64,
}

impl Default for NetworkModel {
    fn default() -> Self {
        NetworkModel {
            latency: Duration::from_millis(20),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
        }
    }
}

/// Deterministic message-delivery decisions plus partition state.
///
/// Partitions are directional: `(a, b)` blocks messages from `a` to `b`
/// only.
#[derive(Debug)]
pub struct SimulatedNetwork {
    model: NetworkModel,
    partitions: HashSet<(ReplicaId, ReplicaId)>,
}

impl SimulatedNetwork {
    pub fn new(model: NetworkModel) -> Self {
        SimulatedNetwork {
            model,
            partitions: HashSet::new(),
        }
    }

    pub fn is_partitioned(&self, from: ReplicaId, to: ReplicaId) -> bool {
        self.partitions.contains(&(from, to))
    }

    pub fn partition_unidirectional(&mut self, from: ReplicaId, to: ReplicaId) {
        self.partitions.insert((from, to));
    }

    pub fn partition_bidirectional(&mut self, a: ReplicaId, b: ReplicaId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    pub fn heal_bidirectional(&mut self, a: ReplicaId, b: ReplicaId) {
        self.partitions.remove(&(a, b));
        self.partitions.remove(&(b, a));
    }

    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    pub fn set_packet_loss_rate(&mut self, rate: f64) {
        self.model.packet_loss_rate = rate.clamp(0.0, 1.0);
    }

    /// `None` when the message is dropped (partition or loss), otherwise
    /// the sampled delivery latency.
    pub fn should_deliver(
        &self,
        from: ReplicaId,
        to: ReplicaId,
        rng: &mut ChaCha8Rng,
    ) -> Option<Duration> {
        if self.is_partitioned(from, to) {
            return None;
        }
        if self.model.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.model.packet_loss_rate {
            return None;
        }
        Some(self.sample_latency(rng))
    }

    pub fn sample_latency(&self, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.model.latency.as_secs_f64();
        let jitter_range = base * self.model.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.000_1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn same_seed_same_latency() {
        let network = SimulatedNetwork::new(NetworkModel::default());
        let mut a = ChaCha8Rng::seed_from_u64(42);
        let mut b = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..32 {
            assert_eq!(network.sample_latency(&mut a), network.sample_latency(&mut b));
        }
    }

    #[test]
    fn partitions_block_one_direction() {
        let mut network = SimulatedNetwork::new(NetworkModel::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        network.partition_unidirectional(ReplicaId(0), ReplicaId(1));
        assert!(network
            .should_deliver(ReplicaId(0), ReplicaId(1), &mut rng)
            .is_none());
        assert!(network
            .should_deliver(ReplicaId(1), ReplicaId(0), &mut rng)
            .is_some());

        network.heal_all();
        assert!(network
            .should_deliver(ReplicaId(0), ReplicaId(1), &mut rng)
            .is_some());
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut network = SimulatedNetwork::new(NetworkModel::default());
        network.set_packet_loss_rate(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..16 {
            assert!(network
                .should_deliver(ReplicaId(0), ReplicaId(1), &mut rng)
                .is_none());
        }
    }
}
