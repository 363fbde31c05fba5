//! Destination host and datastore selection
//!
//! Hosts are ranked least-loaded first; datastores most-free (by ratio) first.
//! Both selections are pure functions of their candidate lists so the request
//! builder can feed them projected, rather than reported, usage.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::PlacementConfig;
use crate::error::{VmigrateError, VmigrateResult};
use crate::types::{DatastoreCandidate, HostCandidate};

/// Outcome of a host or datastore selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub id: String,
    pub name: String,
    /// Other qualifying candidates, best first
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlacementResolver {
    datastore_space_buffer: f64,
}

impl Default for PlacementResolver {
    fn default() -> Self {
        Self::new(&PlacementConfig::default())
    }
}

impl PlacementResolver {
    pub fn new(config: &PlacementConfig) -> Self {
        Self {
            datastore_space_buffer: config.datastore_space_buffer,
        }
    }

    pub fn datastore_space_buffer(&self) -> f64 {
        self.datastore_space_buffer
    }

    /// Pick the least-loaded host able to run the workload
    ///
    /// Eligible hosts are connected, powered on, have at least `required_cpu`
    /// cores and `required_memory_mb` unreserved memory. They are ordered by
    /// CPU usage ratio, then memory usage ratio.
    pub fn select_host(
        &self,
        workload: &str,
        candidates: &[HostCandidate],
        required_cpu: u32,
        required_memory_mb: u64,
    ) -> VmigrateResult<PlacementDecision> {
        let mut eligible: Vec<&HostCandidate> = candidates
            .iter()
            .filter(|h| h.is_available() && h.can_accommodate(required_cpu, required_memory_mb))
            .collect();

        if eligible.is_empty() {
            let available = candidates.iter().filter(|h| h.is_available()).count();
            return Err(VmigrateError::placement(
                workload,
                format!(
                    "no eligible host among {} candidates ({} connected and powered on) for {} vCPU / {} MB",
                    candidates.len(),
                    available,
                    required_cpu,
                    required_memory_mb
                ),
            ));
        }

        eligible.sort_by(|a, b| compare_host_load(a, b));

        let best = eligible[0];
        tracing::debug!(
            workload,
            host = %best.name,
            cpu_ratio = best.cpu_usage_ratio(),
            memory_ratio = best.memory_usage_ratio(),
            "Selected destination host"
        );

        Ok(PlacementDecision {
            id: best.id.clone(),
            name: best.name.clone(),
            alternatives: eligible[1..].iter().map(|h| h.name.clone()).collect(),
        })
    }

    /// Pick the datastore with the largest free ratio that fits the workload
    ///
    /// A datastore qualifies only when it is accessible and its free space is
    /// strictly greater than `required_space_gb` times the configured buffer.
    pub fn select_datastore(
        &self,
        workload: &str,
        candidates: &[DatastoreCandidate],
        required_space_gb: f64,
    ) -> VmigrateResult<PlacementDecision> {
        let needed = required_space_gb * self.datastore_space_buffer;
        let mut eligible: Vec<&DatastoreCandidate> = candidates
            .iter()
            .filter(|ds| ds.accessible && ds.free_space_gb > needed)
            .collect();

        if eligible.is_empty() {
            return Err(VmigrateError::placement(
                workload,
                format!(
                    "no datastore among {} candidates has more than {:.1} GB free ({:.1} GB x {:.2})",
                    candidates.len(),
                    needed,
                    required_space_gb,
                    self.datastore_space_buffer
                ),
            ));
        }

        eligible.sort_by(|a, b| {
            b.free_ratio()
                .partial_cmp(&a.free_ratio())
                .unwrap_or(Ordering::Equal)
        });

        let best = eligible[0];
        tracing::debug!(
            workload,
            datastore = %best.name,
            free_gb = best.free_space_gb,
            "Selected destination datastore"
        );

        Ok(PlacementDecision {
            id: best.id.clone(),
            name: best.name.clone(),
            alternatives: eligible[1..].iter().map(|ds| ds.name.clone()).collect(),
        })
    }
}

fn compare_host_load(a: &HostCandidate, b: &HostCandidate) -> Ordering {
    a.cpu_usage_ratio()
        .partial_cmp(&b.cpu_usage_ratio())
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.memory_usage_ratio()
                .partial_cmp(&b.memory_usage_ratio())
                .unwrap_or(Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostConnectionState, HostPowerState};
    use proptest::prelude::*;

    fn host(name: &str, cpu_used: u64, mem_used: u64) -> HostCandidate {
        HostCandidate {
            id: format!("host-{}", name),
            name: name.to_string(),
            cluster: "C1".to_string(),
            connection_state: HostConnectionState::Connected,
            power_state: HostPowerState::PoweredOn,
            cpu_cores: 16,
            cpu_capacity_mhz: 32_000,
            cpu_usage_mhz: cpu_used,
            memory_capacity_mb: 65_536,
            memory_usage_mb: mem_used,
        }
    }

    fn datastore(name: &str, capacity: f64, free: f64) -> DatastoreCandidate {
        DatastoreCandidate {
            id: format!("ds-{}", name),
            name: name.to_string(),
            capacity_gb: capacity,
            free_space_gb: free,
            accessible: true,
        }
    }

    #[test]
    fn test_select_host_prefers_lowest_cpu_then_memory() {
        let resolver = PlacementResolver::default();
        let hosts = vec![
            host("busy", 24_000, 1_024),
            host("idle-mem-heavy", 8_000, 40_000),
            host("idle", 8_000, 10_000),
        ];

        let decision = resolver.select_host("web01", &hosts, 2, 4_096).unwrap();
        assert_eq!(decision.name, "idle");
        assert_eq!(decision.alternatives, vec!["idle-mem-heavy", "busy"]);
    }

    #[test]
    fn test_select_host_skips_unavailable_and_undersized() {
        let resolver = PlacementResolver::default();
        let mut disconnected = host("disconnected", 0, 0);
        disconnected.connection_state = HostConnectionState::Disconnected;
        let mut off = host("off", 0, 0);
        off.power_state = HostPowerState::PoweredOff;
        let full = host("full", 0, 65_000);
        let ok = host("ok", 30_000, 30_000);

        let decision = resolver
            .select_host("db01", &[disconnected, off, full, ok], 4, 8_192)
            .unwrap();
        assert_eq!(decision.name, "ok");
    }

    #[test]
    fn test_select_host_without_candidates_is_placement_error() {
        let err = PlacementResolver::default()
            .select_host("db01", &[], 2, 1_024)
            .unwrap_err();
        assert!(matches!(err, VmigrateError::Placement { .. }));
    }

    #[test]
    fn test_select_datastore_applies_buffer_strictly() {
        let resolver = PlacementResolver::default();
        // 100 GB * 1.2 = 120 GB; exactly 120 free does not qualify
        let candidates = vec![datastore("exact", 200.0, 120.0), datastore("roomy", 1000.0, 121.0)];

        let decision = resolver.select_datastore("web01", &candidates, 100.0).unwrap();
        assert_eq!(decision.name, "roomy");

        let err = resolver
            .select_datastore("web01", &candidates[..1], 100.0)
            .unwrap_err();
        assert!(matches!(err, VmigrateError::Placement { .. }));
    }

    #[test]
    fn test_select_datastore_orders_by_free_ratio() {
        let resolver = PlacementResolver::default();
        let mut offline = datastore("offline", 100.0, 99.0);
        offline.accessible = false;
        let candidates = vec![
            datastore("big-but-full", 10_000.0, 1_000.0),
            datastore("small-but-empty", 500.0, 400.0),
            offline,
        ];

        let decision = resolver.select_datastore("web01", &candidates, 10.0).unwrap();
        assert_eq!(decision.name, "small-but-empty");
        assert_eq!(decision.alternatives, vec!["big-but-full"]);
    }

    fn arb_host() -> impl Strategy<Value = HostCandidate> {
        (
            "[a-z]{3,8}",
            0u64..32_000,
            0u64..65_536,
            any::<bool>(),
            1u32..32,
        )
            .prop_map(|(name, cpu, mem, connected, cores)| {
                let mut h = host(&name, cpu, mem);
                h.cpu_cores = cores;
                if !connected {
                    h.connection_state = HostConnectionState::NotResponding;
                }
                h
            })
    }

    fn arb_datastore() -> impl Strategy<Value = DatastoreCandidate> {
        ("[a-z]{3,8}", 1.0f64..10_000.0, 0.0f64..1.0).prop_map(|(name, capacity, fraction)| {
            datastore(&name, capacity, capacity * fraction)
        })
    }

    fn unique_ids<T>(items: Vec<T>, set: impl Fn(&mut T, String)) -> Vec<T> {
        items
            .into_iter()
            .enumerate()
            .map(|(i, mut item)| {
                set(&mut item, format!("id-{}", i));
                item
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_selected_host_is_never_more_loaded_than_an_eligible_peer(
            hosts in prop::collection::vec(arb_host(), 0..12),
            cpu in 1u32..8,
            memory in 0u64..16_384,
        ) {
            let hosts = unique_ids(hosts, |h, id| h.id = id);
            let resolver = PlacementResolver::default();
            let eligible: Vec<&HostCandidate> = hosts
                .iter()
                .filter(|h| h.is_available() && h.can_accommodate(cpu, memory))
                .collect();

            match resolver.select_host("w", &hosts, cpu, memory) {
                Ok(decision) => {
                    let chosen = hosts.iter().find(|h| h.id == decision.id).unwrap();
                    prop_assert!(chosen.is_available());
                    for other in &eligible {
                        prop_assert_ne!(compare_host_load(chosen, other), Ordering::Greater);
                    }
                }
                Err(e) => {
                    prop_assert!(eligible.is_empty());
                    let is_placement = matches!(e, VmigrateError::Placement { .. });
                    prop_assert!(is_placement);
                }
            }
        }

        #[test]
        fn prop_selected_datastore_always_has_buffered_space(
            datastores in prop::collection::vec(arb_datastore(), 0..12),
            required in 0.0f64..2_000.0,
        ) {
            let datastores = unique_ids(datastores, |d, id| d.id = id);
            let resolver = PlacementResolver::default();
            if let Ok(decision) = resolver.select_datastore("w", &datastores, required) {
                let chosen = datastores.iter().find(|d| d.id == decision.id).unwrap();
                prop_assert!(chosen.free_space_gb >= required * resolver.datastore_space_buffer());
                for other in datastores.iter().filter(|d| d.free_space_gb > required * 1.2) {
                    prop_assert!(chosen.free_ratio() >= other.free_ratio());
                }
            }
        }
    }
}
