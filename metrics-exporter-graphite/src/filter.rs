use std::collections::HashSet;

use crate::{key::KeyPath, snapshot::Snapshot};

/// Restricts a snapshot to the metrics whose key is in `whitelist`.
///
/// Membership is checked against the raw key path, before it is flattened or sanitized. When no whitelist is given,
/// the snapshot is returned unchanged. Order is preserved either way.
pub fn filter(mut snapshot: Snapshot, whitelist: Option<&HashSet<KeyPath>>) -> Snapshot {
    if let Some(whitelist) = whitelist {
        snapshot.retain(|metric| whitelist.contains(metric.key()));
    }

    snapshot
}
