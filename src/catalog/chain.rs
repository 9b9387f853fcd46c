//! Parent-chain resolution: from a target backup back to its FULL ancestor.

use std::collections::{HashMap, HashSet};

use super::{Backup, BackupMode, BackupStore};
use crate::{Error, Result};

/// Resolve the chain for `target_id`, ordered oldest (FULL) to newest.
///
/// The restore driver replays the result front to back, so "newer wins" falls
/// out of the ordering. Fails on unknown targets, parent cycles, and chains
/// whose oldest member is not a FULL backup.
pub fn parent_chain<'a>(store: &'a BackupStore, target_id: &str) -> Result<Vec<&'a Backup>> {
    let mut lookup: HashMap<&str, &Backup> = HashMap::new();
    for backup in &store.backups {
        lookup.insert(backup.id.as_str(), backup);
    }

    let target = store
        .find_backup(target_id)
        .ok_or_else(|| Error::MissingBackup(target_id.to_string()))?;

    let mut seen = HashSet::new();
    let mut chain: Vec<&Backup> = Vec::new();
    let mut current = target;

    loop {
        if !seen.insert(current.id.as_str()) {
            return Err(Error::ChainCycle(current.id.clone()).into());
        }
        chain.push(current);

        match current.parent_id.as_deref() {
            None => break,
            Some(parent) => {
                current = lookup
                    .get(parent)
                    .copied()
                    .ok_or_else(|| Error::MissingBackup(parent.to_string()))?;
            }
        }
    }

    chain.reverse();

    if !matches!(chain.first().map(|b| b.mode), Some(BackupMode::Full)) {
        return Err(Error::ChainNoFull(target_id.to_string()).into());
    }

    Ok(chain)
}
