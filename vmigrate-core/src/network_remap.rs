//! Network adapter capture and remapping
//!
//! Adapters are captured on the source before relocation and reapplied on the
//! destination afterwards. Snapshots and post-move adapters are matched by
//! position; the destination domain may have renamed the adapters, but never
//! reorders them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::domain::DomainSession;
use crate::error::{VmigrateError, VmigrateResult};
use crate::types::{AdapterAssignment, NetworkAdapterSnapshot, NetworkMapping, NetworkRef, WorkloadRef};

/// Per-call knobs for [`NetworkRemapper::apply_config`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemapOptions {
    /// Set each adapter's original MAC on the new assignment
    pub preserve_mac: bool,
    /// Disconnect each adapter before reassigning it
    pub disconnect_first: bool,
    /// Substitute a marker-matched network when the target is missing
    pub allow_fallback: bool,
}

/// What happened to one adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterOutcome {
    pub adapter: String,
    pub source_network: String,
    pub target_network: String,
    /// The mapped network was missing and a fallback was used
    pub fell_back: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapReport {
    pub adapters: Vec<AdapterOutcome>,
}

impl RemapReport {
    pub fn fallbacks(&self) -> usize {
        self.adapters.iter().filter(|a| a.fell_back).count()
    }
}

#[derive(Debug, Clone)]
pub struct NetworkRemapper {
    fallback_markers: Vec<String>,
}

impl Default for NetworkRemapper {
    fn default() -> Self {
        Self::new(&NetworkConfig::default())
    }
}

impl NetworkRemapper {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            fallback_markers: config
                .fallback_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Enumerate a workload's adapters in positional order
    pub async fn capture_config(
        &self,
        session: &dyn DomainSession,
        workload: &WorkloadRef,
    ) -> VmigrateResult<Vec<NetworkAdapterSnapshot>> {
        let adapters = session.network_adapters(workload).await?;
        debug!(workload = %workload.name, count = adapters.len(), "Captured network configuration");
        Ok(adapters)
    }

    /// Reapply `snapshots` to the (already relocated) workload
    ///
    /// Every adapter is attempted even after a failure; the first failure is
    /// returned once all adapters have been processed.
    pub async fn apply_config(
        &self,
        session: &dyn DomainSession,
        workload: &WorkloadRef,
        snapshots: &[NetworkAdapterSnapshot],
        mapping: &NetworkMapping,
        options: RemapOptions,
    ) -> VmigrateResult<RemapReport> {
        let current = session.network_adapters(workload).await?;
        let mut resolved: HashMap<String, Option<NetworkRef>> = HashMap::new();
        let mut report = RemapReport::default();
        let mut first_error: Option<VmigrateError> = None;

        for (position, snapshot) in snapshots.iter().enumerate() {
            let result = match current.get(position) {
                Some(adapter) => {
                    self.remap_adapter(
                        session,
                        workload,
                        &adapter.name,
                        snapshot,
                        mapping,
                        options,
                        &mut resolved,
                    )
                    .await
                }
                None => Err(VmigrateError::network(
                    &snapshot.name,
                    format!("adapter at position {} is missing after relocation", position + 1),
                )),
            };

            match result {
                Ok(outcome) => report.adapters.push(outcome),
                Err(e) => {
                    warn!(workload = %workload.name, adapter = %snapshot.name, "Adapter remap failed: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    workload = %workload.name,
                    adapters = report.adapters.len(),
                    fallbacks = report.fallbacks(),
                    "Network configuration applied"
                );
                Ok(report)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn remap_adapter(
        &self,
        session: &dyn DomainSession,
        workload: &WorkloadRef,
        adapter: &str,
        snapshot: &NetworkAdapterSnapshot,
        mapping: &NetworkMapping,
        options: RemapOptions,
        resolved: &mut HashMap<String, Option<NetworkRef>>,
    ) -> VmigrateResult<AdapterOutcome> {
        let target_name = mapping.target_for(&snapshot.network_name);

        let found = match resolved.get(target_name) {
            Some(cached) => cached.clone(),
            None => {
                let lookup = lookup_network(session, target_name).await?;
                resolved.insert(target_name.to_string(), lookup.clone());
                lookup
            }
        };

        let (network, fell_back) = match found {
            Some(network) => (network, false),
            None if options.allow_fallback => {
                let fallback = self.pick_fallback(session).await?.ok_or_else(|| {
                    VmigrateError::network(
                        adapter,
                        format!(
                            "network '{}' not found and no fallback network matches {:?}",
                            target_name, self.fallback_markers
                        ),
                    )
                })?;
                warn!(
                    workload = %workload.name,
                    adapter,
                    "Network '{}' not found at destination, falling back to '{}'",
                    target_name,
                    fallback.name
                );
                (fallback, true)
            }
            None => {
                return Err(VmigrateError::network(
                    adapter,
                    format!("network '{}' not found at destination", target_name),
                ));
            }
        };

        if options.disconnect_first {
            session
                .set_adapter_connection(workload, adapter, false, false)
                .await?;
        }

        let assignment = AdapterAssignment {
            network: network.clone(),
            mac_address: options.preserve_mac.then(|| snapshot.mac_address.clone()),
            connected: snapshot.connected,
            start_connected: snapshot.start_connected,
        };
        if let Err(e) = session.assign_adapter(workload, adapter, &assignment).await {
            if options.disconnect_first {
                if let Err(restore) = session
                    .set_adapter_connection(
                        workload,
                        adapter,
                        snapshot.connected,
                        snapshot.start_connected,
                    )
                    .await
                {
                    warn!(
                        workload = %workload.name,
                        adapter,
                        "Failed to restore adapter connection state: {}",
                        restore
                    );
                }
            }
            return Err(e);
        }

        debug!(
            workload = %workload.name,
            adapter,
            "{} -> {} ({:?})",
            snapshot.network_name,
            network.name,
            network.backing
        );

        Ok(AdapterOutcome {
            adapter: adapter.to_string(),
            source_network: snapshot.network_name.clone(),
            target_network: network.name,
            fell_back,
        })
    }

    /// First destination network whose name contains a marker, markers in priority order
    async fn pick_fallback(&self, session: &dyn DomainSession) -> VmigrateResult<Option<NetworkRef>> {
        let networks = session.list_networks().await?;
        for marker in &self.fallback_markers {
            if let Some(network) = networks
                .iter()
                .find(|n| n.name.to_lowercase().contains(marker.as_str()))
            {
                return Ok(Some(network.clone()));
            }
        }
        Ok(None)
    }
}

/// Distributed port groups shadow standard networks of the same name
async fn lookup_network(
    session: &dyn DomainSession,
    name: &str,
) -> VmigrateResult<Option<NetworkRef>> {
    if let Some(network) = session.find_distributed_network(name).await? {
        return Ok(Some(network));
    }
    session.find_standard_network(name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::inventory::WorkloadSpec;
    use crate::domain::{DomainConnectionProvider, InMemoryFabric};
    use crate::types::{Credentials, DomainEndpoint, NetworkBacking};
    use std::sync::Arc;

    async fn session_with(
        networks: &[(&str, NetworkBacking)],
        adapters: &[&str],
    ) -> (InMemoryFabric, Arc<dyn DomainSession>, WorkloadRef) {
        let fabric = InMemoryFabric::new();
        let domain = fabric.add_domain("dst");
        domain.add_datacenter("DC");
        domain.add_cluster("DC", "C").unwrap();
        for (name, backing) in networks {
            domain.add_network(name, *backing);
        }
        let mut spec = WorkloadSpec::new("app01", "C");
        for network in adapters {
            spec = spec.adapter(*network);
        }
        let workload = domain.add_workload(&spec).unwrap();
        let session = fabric
            .connect(&DomainEndpoint::new("dst"), &Credentials::new("u", "p"))
            .await
            .unwrap();
        (fabric, session, workload)
    }

    #[tokio::test]
    async fn test_empty_mapping_keeps_source_network() {
        let (fabric, session, workload) =
            session_with(&[("VM Network", NetworkBacking::Standard)], &["VM Network"]).await;
        let remapper = NetworkRemapper::default();
        let snapshots = remapper.capture_config(session.as_ref(), &workload).await.unwrap();

        let report = remapper
            .apply_config(
                session.as_ref(),
                &workload,
                &snapshots,
                &NetworkMapping::new(),
                RemapOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.adapters[0].target_network, "VM Network");
        let view = fabric.domain("dst").unwrap().workload("app01").unwrap();
        assert_eq!(view.adapters[0].network_name, "VM Network");
    }

    #[tokio::test]
    async fn test_distributed_lookup_wins_and_mac_is_preserved() {
        let (fabric, session, workload) = session_with(
            &[
                ("Prod", NetworkBacking::Standard),
                ("Prod", NetworkBacking::Distributed),
                ("Old", NetworkBacking::Standard),
            ],
            &["Old"],
        )
        .await;
        let remapper = NetworkRemapper::default();
        let mut snapshots = remapper.capture_config(session.as_ref(), &workload).await.unwrap();
        snapshots[0].mac_address = "00:50:56:aa:bb:cc".to_string();
        let mapping: NetworkMapping = [("Old".to_string(), "Prod".to_string())].into_iter().collect();

        remapper
            .apply_config(
                session.as_ref(),
                &workload,
                &snapshots,
                &mapping,
                RemapOptions {
                    preserve_mac: true,
                    disconnect_first: true,
                    allow_fallback: false,
                },
            )
            .await
            .unwrap();

        let adapter = &fabric.domain("dst").unwrap().workload("app01").unwrap().adapters[0];
        assert_eq!(adapter.network_name, "Prod");
        assert!(adapter.distributed);
        assert_eq!(adapter.mac_address, "00:50:56:aa:bb:cc");
        assert!(adapter.connected);
        assert!(adapter.start_connected);
    }

    #[tokio::test]
    async fn test_missing_network_falls_back_only_when_allowed() {
        let (_fabric, session, workload) = session_with(
            &[("Old", NetworkBacking::Standard), ("Management VLAN", NetworkBacking::Standard)],
            &["Old"],
        )
        .await;
        let remapper = NetworkRemapper::default();
        let snapshots = remapper.capture_config(session.as_ref(), &workload).await.unwrap();
        let mapping: NetworkMapping = [("Old".to_string(), "Gone".to_string())].into_iter().collect();

        let err = remapper
            .apply_config(session.as_ref(), &workload, &snapshots, &mapping, RemapOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VmigrateError::Network { .. }));

        let report = remapper
            .apply_config(
                session.as_ref(),
                &workload,
                &snapshots,
                &mapping,
                RemapOptions {
                    allow_fallback: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.adapters[0].target_network, "Management VLAN");
        assert_eq!(report.fallbacks(), 1);
    }

    #[tokio::test]
    async fn test_rejected_reassignment_restores_connection_state() {
        let (fabric, session, workload) =
            session_with(&[("A", NetworkBacking::Standard)], &["A"]).await;
        fabric.domain("dst").unwrap().fail_network("A");
        let remapper = NetworkRemapper::default();
        let snapshots = remapper.capture_config(session.as_ref(), &workload).await.unwrap();
        assert!(snapshots[0].connected);
        assert!(snapshots[0].start_connected);

        let err = remapper
            .apply_config(
                session.as_ref(),
                &workload,
                &snapshots,
                &NetworkMapping::new(),
                RemapOptions {
                    disconnect_first: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VmigrateError::Network { .. }));

        let adapter = &fabric.domain("dst").unwrap().workload("app01").unwrap().adapters[0];
        assert!(adapter.connected);
        assert!(adapter.start_connected);
    }

    #[tokio::test]
    async fn test_all_adapters_attempted_before_error_is_reported() {
        let (fabric, session, workload) = session_with(
            &[("A", NetworkBacking::Standard), ("B", NetworkBacking::Standard)],
            &["A", "B"],
        )
        .await;
        fabric.domain("dst").unwrap().fail_network("A");
        let remapper = NetworkRemapper::default();
        let snapshots = remapper.capture_config(session.as_ref(), &workload).await.unwrap();
        let mapping: NetworkMapping = [("B".to_string(), "A".to_string()), ("A".to_string(), "B".to_string())]
            .into_iter()
            .collect();

        let err = remapper
            .apply_config(session.as_ref(), &workload, &snapshots, &mapping, RemapOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VmigrateError::Network { .. }));

        // First adapter (A -> B) succeeded even though the second (B -> A) failed
        let view = fabric.domain("dst").unwrap().workload("app01").unwrap();
        assert_eq!(view.adapters[0].network_name, "B");
        assert_eq!(view.adapters[1].network_name, "B");
    }
}
