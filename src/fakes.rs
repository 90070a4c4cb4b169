//! In-memory stand-ins for the host, used by unit tests.

use anyhow::{bail, Context, Result};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::backend::{
    Backend, BlockStorage, Clock, ManifestFields, ManifestTool, VmInventory, VmState, VmSummary,
    VncEndpoint,
};
use crate::signal::CancelToken;

struct FakeVm {
    uuid: String,
    alias: String,
    states: VecDeque<VmState>,
    current: VmState,
}

/// VM inventory backed by a vector, with zone roots under a temp directory.
pub(crate) struct FakeInventory {
    zones: PathBuf,
    vms: RefCell<Vec<FakeVm>>,
    next_id: Cell<u32>,
    script: RefCell<Vec<VmState>>,
    pub(crate) fail_list: Cell<bool>,
    pub(crate) fail_create: Cell<bool>,
    pub(crate) fail_boot: Cell<bool>,
    pub(crate) fail_vnc: Cell<bool>,
    pub(crate) fail_state_after: Cell<Option<usize>>,
    /// Cancel the token once this many state queries have been answered.
    pub(crate) cancel_after: RefCell<Option<(usize, CancelToken)>>,
    state_queries: Cell<usize>,
    delete_calls: Cell<usize>,
    pub(crate) ops: RefCell<Vec<String>>,
}

impl FakeInventory {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            zones: root.join("zones"),
            vms: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            script: RefCell::new(vec![VmState::Running, VmState::Stopped]),
            fail_list: Cell::new(false),
            fail_create: Cell::new(false),
            fail_boot: Cell::new(false),
            fail_vnc: Cell::new(false),
            fail_state_after: Cell::new(None),
            cancel_after: RefCell::new(None),
            state_queries: Cell::new(0),
            delete_calls: Cell::new(0),
            ops: RefCell::new(Vec::new()),
        }
    }

    /// States reported by successive `state` queries of newly created VMs;
    /// the last one repeats forever.
    pub(crate) fn script_states(&self, states: Vec<VmState>) {
        *self.script.borrow_mut() = states;
    }

    pub(crate) fn insert_vm(&self, alias: &str) -> String {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let uuid = format!("00000000-0000-4000-8000-{:012x}", id);
        let mut states: VecDeque<VmState> = self.script.borrow().iter().cloned().collect();
        let current = states.pop_front().unwrap_or(VmState::Stopped);
        self.vms.borrow_mut().push(FakeVm {
            uuid: uuid.clone(),
            alias: alias.to_string(),
            states,
            current,
        });
        uuid
    }

    pub(crate) fn contains(&self, uuid: &str) -> bool {
        self.vms.borrow().iter().any(|vm| vm.uuid == uuid)
    }

    pub(crate) fn count_alias(&self, alias: &str) -> usize {
        self.vms.borrow().iter().filter(|vm| vm.alias == alias).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.vms.borrow().is_empty()
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.delete_calls.get()
    }

    pub(crate) fn state_queries(&self) -> usize {
        self.state_queries.get()
    }

    fn record(&self, op: String) {
        self.ops.borrow_mut().push(op);
    }
}

impl VmInventory for FakeInventory {
    fn list(&self) -> Result<Vec<VmSummary>> {
        self.record("list".into());
        if self.fail_list.get() {
            bail!("vmadm list: cannot connect to vminfod");
        }
        Ok(self
            .vms
            .borrow()
            .iter()
            .map(|vm| VmSummary {
                uuid: vm.uuid.clone(),
                alias: vm.alias.clone(),
            })
            .collect())
    }

    fn create(&self, template: &Path) -> Result<String> {
        self.record("create".into());
        if self.fail_create.get() {
            bail!("vmadm create: Invalid value(s) for: nics");
        }
        let bytes = fs::read(template).context("fake create reading template")?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;
        let alias = value["alias"].as_str().unwrap_or_default().to_string();
        let uuid = self.insert_vm(&alias);
        fs::create_dir_all(self.zones.join(&uuid).join("root"))?;
        Ok(uuid)
    }

    fn zone_root(&self, uuid: &str) -> Result<PathBuf> {
        if !self.contains(uuid) {
            bail!("no such VM {uuid}");
        }
        Ok(self.zones.join(uuid).join("root"))
    }

    fn boot_from_cdrom(&self, uuid: &str, iso_name: &str) -> Result<()> {
        self.record(format!("boot {iso_name}"));
        if self.fail_boot.get() {
            bail!("vmadm boot: failed to start");
        }
        if !self.zone_root(uuid)?.join(iso_name).is_file() {
            bail!("cdrom {iso_name} missing from zone root");
        }
        Ok(())
    }

    fn vnc(&self, _uuid: &str) -> Result<VncEndpoint> {
        self.record("vnc".into());
        if self.fail_vnc.get() {
            bail!("vmadm info: VNC not available");
        }
        Ok(VncEndpoint {
            host: "10.88.88.3".into(),
            port: 39163,
        })
    }

    fn state(&self, uuid: &str) -> Result<VmState> {
        let n = self.state_queries.get() + 1;
        self.state_queries.set(n);
        if self.fail_state_after.get().is_some_and(|limit| n > limit) {
            bail!("vmadm list: query failed");
        }
        if let Some((limit, token)) = self.cancel_after.borrow().as_ref() {
            if n >= *limit {
                token.cancel();
            }
        }
        let mut vms = self.vms.borrow_mut();
        let vm = vms
            .iter_mut()
            .find(|vm| vm.uuid == uuid)
            .with_context(|| format!("no such VM {uuid}"))?;
        let state = vm.current.clone();
        if let Some(next) = vm.states.pop_front() {
            vm.current = next;
        }
        Ok(state)
    }

    fn delete(&self, uuid: &str) -> Result<()> {
        self.record(format!("delete {uuid}"));
        self.delete_calls.set(self.delete_calls.get() + 1);
        let mut vms = self.vms.borrow_mut();
        let before = vms.len();
        vms.retain(|vm| vm.uuid != uuid);
        if vms.len() == before {
            bail!("no such VM {uuid}");
        }
        Ok(())
    }
}

/// Block storage producing a fixed send stream.
#[derive(Default)]
pub(crate) struct FakeStorage {
    pub(crate) snapshots: RefCell<Vec<String>>,
    pub(crate) payload: Vec<u8>,
    pub(crate) fail_snapshot: Cell<bool>,
    pub(crate) fail_send: Cell<bool>,
}

impl FakeStorage {
    pub(crate) fn with_payload(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            ..Default::default()
        }
    }
}

impl BlockStorage for FakeStorage {
    fn snapshot(&self, snapshot: &str) -> Result<()> {
        if self.fail_snapshot.get() {
            bail!("zfs snapshot: dataset is busy");
        }
        self.snapshots.borrow_mut().push(snapshot.to_string());
        Ok(())
    }

    fn send(&self, snapshot: &str, sink: &mut dyn Write) -> Result<u64> {
        if !self.snapshots.borrow().iter().any(|s| s == snapshot) {
            bail!("zfs send: snapshot {snapshot} does not exist");
        }
        if self.fail_send.get() {
            sink.write_all(&self.payload[..self.payload.len() / 2])?;
            bail!("zfs send: I/O error");
        }
        sink.write_all(&self.payload)?;
        Ok(self.payload.len() as u64)
    }
}

/// Manifest generator that echoes its fields as JSON.
#[derive(Default)]
pub(crate) struct FakeManifest {
    pub(crate) calls: RefCell<Vec<String>>,
    pub(crate) fail: Cell<bool>,
}

impl ManifestTool for FakeManifest {
    fn generate(&self, fields: &ManifestFields<'_>) -> Result<Vec<u8>> {
        if self.fail.get() {
            bail!("imgmanifest: cannot read artifact");
        }
        if !fields.artifact.is_file() {
            bail!("imgmanifest: {} not found", fields.artifact.display());
        }
        self.calls.borrow_mut().push(fields.name.to_string());
        let manifest = serde_json::json!({
            "name": fields.name,
            "version": fields.version,
            "size": fields.size_mib,
            "description": fields.description,
            "homepage": fields.homepage,
            "os": fields.os,
        });
        Ok(serde_json::to_vec_pretty(&manifest)?)
    }
}

/// Clock whose sleeps advance virtual time instantly.
pub(crate) struct FakeClock {
    start: Instant,
    elapsed: Cell<Duration>,
    pub(crate) sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.elapsed.set(self.elapsed.get() + duration);
    }
}

/// One bundle of fakes wired into a [`Backend`].
pub(crate) struct FakeHost {
    pub(crate) inventory: FakeInventory,
    pub(crate) storage: FakeStorage,
    pub(crate) manifest: FakeManifest,
    pub(crate) clock: FakeClock,
}

impl FakeHost {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            inventory: FakeInventory::new(root),
            storage: FakeStorage::with_payload(b"ZFS-SEND-STREAM-PAYLOAD"),
            manifest: FakeManifest::default(),
            clock: FakeClock::new(),
        }
    }

    pub(crate) fn backend(&self) -> Backend<'_> {
        Backend {
            inventory: &self.inventory,
            storage: &self.storage,
            manifest: &self.manifest,
            clock: &self.clock,
        }
    }
}
