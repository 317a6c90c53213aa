//! The flat parameter set a scenario consumes. An external loader is expected
//! to deserialize into these structs; unit parsing, file inheritance, and
//! jitter are its business, not ours.

use serde::{Deserialize, Serialize};

use crate::types::SimDuration;
use crate::utils::prelude::*;

/// Seed used when the caller does not pick one. A fixed default keeps even
/// casual runs reproducible.
pub const DEFAULT_SEED: &str = "steady otter";

fn default_seed() -> String {
    DEFAULT_SEED.to_owned()
}

/// Cluster-wide parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    pub machine_count: usize,
    /// Duration multiplier applied to every task a machine runs.
    pub computation_speed: f64,
    pub drive_capacity: u64,
    pub block_size: u64,
    /// Chance that a task invocation kills its machine.
    pub machine_fail_probability: f64,
    /// Chance, drawn once per machine at creation, of being a straggler.
    pub straggler_probability: f64,
    /// Extra duration multiplier a straggler keeps for life.
    pub straggler_slowdown: f64,
    /// Idle-task count below which redundant instances are launched.
    pub compensation_threshold: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            machine_count: 100,
            computation_speed: 1.0,
            drive_capacity: 1 << 60,
            block_size: 64 * 1024 * 1024,
            machine_fail_probability: 0.01,
            straggler_probability: 0.0,
            straggler_slowdown: 1.0,
            compensation_threshold: 0,
        }
    }
}

/// Parameters of one map/reduce computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputationParams {
    pub map_duration: SimDuration,
    pub reduce_duration: SimDuration,
    pub shuffle_duration: SimDuration,
    /// Number of map tasks; the input file has one block per task.
    pub input_split_size: usize,
    /// Number of reduce tasks.
    pub output_split_size: usize,
    /// Minimum spacing between consecutive dispatches of this computation.
    pub internal_dispatch_delay: SimDuration,
    /// Network latency of a dispatch or a retry notification.
    pub network_dispatch_delay: SimDuration,
    /// One-time dispatch cost of assigning the computation's function to a
    /// machine.
    pub assign_function_delay: SimDuration,
    /// One-time duration cost of a machine's first task for this computation.
    pub setup_machine_delay: SimDuration,
    pub drive_read_delay: SimDuration,
}

impl Default for ComputationParams {
    fn default() -> Self {
        ComputationParams {
            map_duration: SimDuration::from_millis(30),
            reduce_duration: SimDuration::from_millis(30),
            shuffle_duration: SimDuration::from_millis(30),
            input_split_size: 10_000,
            output_split_size: 2_000,
            internal_dispatch_delay: SimDuration::from_millis(1),
            network_dispatch_delay: SimDuration::from_millis(3),
            assign_function_delay: SimDuration::from_millis(10),
            setup_machine_delay: SimDuration::from_millis(10),
            drive_read_delay: SimDuration::from_millis(1),
        }
    }
}

/// Everything one run needs: the cluster, its computations, and the RNG seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioParams {
    pub seed: String,
    pub cluster: ClusterParams,
    pub computations: Vec<ComputationParams>,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        ScenarioParams {
            seed: default_seed(),
            cluster: ClusterParams::default(),
            computations: vec![ComputationParams::default()],
        }
    }
}

impl ScenarioParams {
    pub fn validate(&self) -> Result<()> {
        fn probability(name: &str, p: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
            Ok(())
        }

        if self.cluster.machine_count == 0 {
            return Err(Error::InvalidConfig("machine_count must be positive".into()));
        }
        if self.cluster.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be positive".into()));
        }
        if !(self.cluster.computation_speed > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "computation_speed must be positive, got {}",
                self.cluster.computation_speed
            )));
        }
        if !(self.cluster.straggler_slowdown > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "straggler_slowdown must be positive, got {}",
                self.cluster.straggler_slowdown
            )));
        }
        probability("machine_fail_probability", self.cluster.machine_fail_probability)?;
        probability("straggler_probability", self.cluster.straggler_probability)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ScenarioParams::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let mut params = ScenarioParams::default();
        params.cluster.machine_fail_probability = 1.5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_empty_cluster() {
        let mut params = ScenarioParams::default();
        params.cluster.machine_count = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn roundtrips_through_serde() {
        let params = ScenarioParams::default();
        let json = serde_json::to_string(&params).unwrap();
        let back: ScenarioParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seed, params.seed);
        assert_eq!(back.cluster.block_size, params.cluster.block_size);
        assert_eq!(back.computations.len(), 1);
        assert_eq!(back.computations[0].map_duration, params.computations[0].map_duration);
    }

    #[test]
    fn partial_input_fills_defaults() {
        let params: ScenarioParams =
            serde_json::from_str(r#"{"cluster": {"machine_count": 3}}"#).unwrap();
        assert_eq!(params.cluster.machine_count, 3);
        assert_eq!(params.cluster.block_size, 64 * 1024 * 1024);
        assert_eq!(params.seed, DEFAULT_SEED);
    }
}
