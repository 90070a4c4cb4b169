//! Stale VM guard.
//!
//! A previous run that died halfway can leave a VM with the image's alias
//! behind. The guard deletes every such VM and lets the storage layer settle
//! before provisioning starts, so reruns are idempotent.

use anyhow::Result;
use thiserror::Error;

use crate::backend::{Clock, VmInventory};
use crate::config::PreflightConfig;

/// What the guard found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightOutcome {
    Absent,
    /// UUIDs of the VMs that were deleted.
    Removed(Vec<String>),
}

#[derive(Debug, Error)]
pub enum PreflightError {
    /// The inventory could not be read. Not the same as "no stale VM".
    #[error("looking up existing VMs named '{name}' failed")]
    Lookup {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("removing stale VM {uuid} ('{alias}') failed")]
    Remove {
        uuid: String,
        alias: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What to do when the inventory lookup itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupFailurePolicy {
    #[default]
    Abort,
    /// Proceed as if no stale VM exists. A duplicate alias then only shows
    /// up later, if at all.
    TreatAsAbsent,
}

impl LookupFailurePolicy {
    pub fn from_lenient(lenient: bool) -> Self {
        if lenient {
            LookupFailurePolicy::TreatAsAbsent
        } else {
            LookupFailurePolicy::Abort
        }
    }
}

/// Delete every VM whose alias matches `name`, then wait the settle period.
///
/// Returns immediately, without waiting, when nothing matches.
pub fn remove_stale_vms(
    inventory: &dyn VmInventory,
    clock: &dyn Clock,
    name: &str,
    config: &PreflightConfig,
) -> Result<PreflightOutcome, PreflightError> {
    let vms = inventory.list().map_err(|source| PreflightError::Lookup {
        name: name.to_string(),
        source,
    })?;

    let stale: Vec<_> = vms
        .into_iter()
        .filter(|vm| config.alias_match.matches(&vm.alias, name))
        .collect();
    if stale.is_empty() {
        tracing::debug!(name, "no stale VM found");
        return Ok(PreflightOutcome::Absent);
    }

    let mut removed = Vec::with_capacity(stale.len());
    for vm in stale {
        println!("  Removing stale VM {} ('{}')", vm.uuid, vm.alias);
        inventory
            .delete(&vm.uuid)
            .map_err(|source| PreflightError::Remove {
                uuid: vm.uuid.clone(),
                alias: vm.alias.clone(),
                source,
            })?;
        removed.push(vm.uuid);
    }

    clock.sleep(config.settle());
    Ok(PreflightOutcome::Removed(removed))
}

/// Apply `policy` to a guard result. Only lookup failures are affected.
pub fn resolve_lookup_failure(
    result: Result<PreflightOutcome, PreflightError>,
    policy: LookupFailurePolicy,
) -> Result<PreflightOutcome, PreflightError> {
    match (result, policy) {
        (Err(PreflightError::Lookup { name, source }), LookupFailurePolicy::TreatAsAbsent) => {
            eprintln!(
                "  [WARN] VM lookup for '{}' failed ({:#}); assuming no stale VM",
                name, source
            );
            Ok(PreflightOutcome::Absent)
        }
        (result, _) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AliasMatch;
    use crate::fakes::{FakeClock, FakeInventory};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn absent_returns_without_settling() {
        let temp = TempDir::new().unwrap();
        let inventory = FakeInventory::new(temp.path());
        let clock = FakeClock::new();

        let outcome =
            remove_stale_vms(&inventory, &clock, "centos-7", &PreflightConfig::default()).unwrap();
        assert_eq!(outcome, PreflightOutcome::Absent);
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn stale_vm_is_removed_then_settles() {
        let temp = TempDir::new().unwrap();
        let inventory = FakeInventory::new(temp.path());
        let stale = inventory.insert_vm("centos-7");
        let other = inventory.insert_vm("ubuntu-22.04");
        let clock = FakeClock::new();

        let outcome =
            remove_stale_vms(&inventory, &clock, "centos-7", &PreflightConfig::default()).unwrap();
        assert_eq!(outcome, PreflightOutcome::Removed(vec![stale.clone()]));
        assert!(!inventory.contains(&stale));
        assert!(inventory.contains(&other));
        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn running_twice_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let inventory = FakeInventory::new(temp.path());
        inventory.insert_vm("centos-7");
        inventory.insert_vm("centos-7");
        let clock = FakeClock::new();
        let config = PreflightConfig::default();

        let first = remove_stale_vms(&inventory, &clock, "centos-7", &config).unwrap();
        assert!(matches!(first, PreflightOutcome::Removed(ref ids) if ids.len() == 2));
        assert_eq!(inventory.count_alias("centos-7"), 0);

        let second = remove_stale_vms(&inventory, &clock, "centos-7", &config).unwrap();
        assert_eq!(second, PreflightOutcome::Absent);
        assert_eq!(clock.sleeps.borrow().len(), 1);
    }

    #[test]
    fn exact_match_spares_similar_names() {
        let temp = TempDir::new().unwrap();
        let inventory = FakeInventory::new(temp.path());
        let similar = inventory.insert_vm("centos-7-test");
        let clock = FakeClock::new();

        let outcome =
            remove_stale_vms(&inventory, &clock, "centos-7", &PreflightConfig::default()).unwrap();
        assert_eq!(outcome, PreflightOutcome::Absent);
        assert!(inventory.contains(&similar));

        let substring = PreflightConfig {
            alias_match: AliasMatch::Substring,
            ..Default::default()
        };
        let outcome = remove_stale_vms(&inventory, &clock, "centos-7", &substring).unwrap();
        assert_eq!(outcome, PreflightOutcome::Removed(vec![similar]));
    }

    #[test]
    fn lookup_failure_is_distinct_from_absence() {
        let temp = TempDir::new().unwrap();
        let inventory = FakeInventory::new(temp.path());
        inventory.fail_list.set(true);
        let clock = FakeClock::new();

        let result = remove_stale_vms(&inventory, &clock, "centos-7", &PreflightConfig::default());
        assert!(matches!(result, Err(PreflightError::Lookup { .. })));

        let strict = resolve_lookup_failure(
            remove_stale_vms(&inventory, &clock, "centos-7", &PreflightConfig::default()),
            LookupFailurePolicy::Abort,
        );
        assert!(strict.is_err());

        let lenient = resolve_lookup_failure(
            remove_stale_vms(&inventory, &clock, "centos-7", &PreflightConfig::default()),
            LookupFailurePolicy::TreatAsAbsent,
        );
        assert_eq!(lenient.unwrap(), PreflightOutcome::Absent);
    }
}
