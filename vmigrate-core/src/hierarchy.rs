//! Folder and resource-pool path replication
//!
//! A workload's placement in the source domain is captured as a list of path
//! segments (outermost first) and recreated under a root in the destination
//! domain. The same code handles folder trees and resource-pool trees: the
//! tree is reached through [`HierarchyTree`], and nodes carry their
//! [`EntityKind`].
//!
//! Jobs run concurrently and may ask for overlapping paths. Segment creation
//! is serialized per `(kind, parent, name)` so that two workloads heading for
//! the same new folder end up sharing one node. A create that still loses a
//! race to another writer (`AlreadyExists`) is resolved by re-reading.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{VmigrateError, VmigrateResult};
use crate::types::{EntityKind, InventoryNode};

/// Navigable, growable inventory tree
#[async_trait]
pub trait HierarchyTree: Send + Sync {
    /// Parent of `node`, or `None` when `node` is the tree's root sentinel
    async fn parent(&self, node: &InventoryNode) -> VmigrateResult<Option<InventoryNode>>;

    /// Direct child of `parent` named `name`
    async fn child(&self, parent: &InventoryNode, name: &str)
        -> VmigrateResult<Option<InventoryNode>>;

    /// Create a direct child of `parent`; same kind as the parent
    async fn create_child(&self, parent: &InventoryNode, name: &str)
        -> VmigrateResult<InventoryNode>;
}

/// Walk `start` and its ancestors up to (not including) the root sentinel
///
/// Returns the segment names outermost first. A workload sitting directly in
/// the root yields an empty path.
pub async fn resolve_source_path<T>(tree: &T, start: &InventoryNode) -> VmigrateResult<Vec<String>>
where
    T: HierarchyTree + ?Sized,
{
    let mut segments = Vec::new();
    let mut current = start.clone();

    loop {
        match tree.parent(&current).await? {
            Some(parent) => {
                segments.push(current.name.clone());
                current = parent;
            }
            None => break,
        }
    }

    segments.reverse();
    Ok(segments)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SegmentKey {
    kind: EntityKind,
    parent_id: String,
    name: String,
}

/// Recreates hierarchy paths in a destination tree
///
/// Cloning is cheap and clones share the same segment locks, so one
/// replicator is handed to every job of a run.
#[derive(Debug, Clone, Default)]
pub struct HierarchyReplicator {
    segment_locks: Arc<DashMap<SegmentKey, Arc<Mutex<()>>>>,
}

impl HierarchyReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `segments` exists below `root`, creating missing levels
    ///
    /// Returns the leaf node (or `root` itself for an empty path). Calling it
    /// again with the same path returns the same leaf and creates nothing.
    pub async fn ensure_destination_path<T>(
        &self,
        tree: &T,
        segments: &[String],
        root: &InventoryNode,
    ) -> VmigrateResult<InventoryNode>
    where
        T: HierarchyTree + ?Sized,
    {
        let mut current = root.clone();

        for (depth, segment) in segments.iter().enumerate() {
            if segment.trim().is_empty() {
                return Err(VmigrateError::hierarchy(
                    display_path(&segments[..=depth]),
                    "empty path segment",
                ));
            }

            current = match tree.child(&current, segment).await? {
                Some(existing) => existing,
                None => {
                    self.create_segment(tree, &current, segment)
                        .await
                        .map_err(|e| match e {
                            VmigrateError::Hierarchy { .. } => e,
                            other => VmigrateError::hierarchy(
                                display_path(&segments[..=depth]),
                                other.to_string(),
                            ),
                        })?
                }
            };
        }

        Ok(current)
    }

    async fn create_segment<T>(
        &self,
        tree: &T,
        parent: &InventoryNode,
        name: &str,
    ) -> VmigrateResult<InventoryNode>
    where
        T: HierarchyTree + ?Sized,
    {
        let key = SegmentKey {
            kind: parent.kind,
            parent_id: parent.id.clone(),
            name: name.to_string(),
        };
        // Clone the lock out so no map shard guard is held across an await
        let lock = self
            .segment_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(existing) = tree.child(parent, name).await? {
            debug!("{} '{}' appeared under '{}' while waiting", parent.kind, name, parent.name);
            return Ok(existing);
        }

        match tree.create_child(parent, name).await {
            Ok(created) => {
                info!("Created {} '{}' under '{}'", parent.kind, name, parent.name);
                Ok(created)
            }
            Err(VmigrateError::AlreadyExists { .. }) => {
                tree.child(parent, name).await?.ok_or_else(|| {
                    VmigrateError::hierarchy(
                        name,
                        format!("{} reported as existing but cannot be read back", parent.kind),
                    )
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Render segments the way operators write inventory paths
pub fn display_path(segments: &[String]) -> String {
    segments.join("\\")
}
