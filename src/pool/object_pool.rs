//! The object pool: tracks live objects by pid and persists them.
//!
//! Objects become *active* when first referenced or loaded and *dirty* when
//! they announce a mutation. Dirty objects are written in one transaction
//! after a coalescing delay; objects they reference that the pool has not
//! seen yet are picked up by the same transaction.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::rc::{Rc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::notification::{MutationChannel, MutationObserver};
use crate::pool::config::PoolConfig;
use crate::pool::error::{PoolError, PoolResult};
use crate::pool::scheduler::{ManualScheduler, Scheduler, TaskKey};
use crate::record::{
    encode, load_from_record, same_object, CodecError, ObjectRef, PidRef, Record,
    ReferenceResolver, SlotValue, TypeRegistry,
};
use crate::storage::{is_reserved_key, MemoryBackend, Pid, RecordBackend, StoreError, ROOT_KEY};
use crate::transaction::AtomicMap;

const STORE_METHOD: &str = "commit_store_dirty_objects";
const FINALIZE_METHOD: &str = "did_init_loading_pids";

/// Objects written by the running transaction.
#[derive(Default)]
pub(super) struct StorePass {
    pub(super) pids: HashSet<Pid>,
    pub(super) batch: Vec<(Pid, ObjectRef)>,
}

pub(super) struct PoolInner {
    pub(super) config: PoolConfig,
    pub(super) store: RefCell<AtomicMap>,
    registry: Rc<TypeRegistry>,
    scheduler: Rc<dyn Scheduler>,
    manual: Option<ManualScheduler>,
    channel: MutationChannel,
    observer: Rc<dyn MutationObserver>,
    pub(super) root: RefCell<Option<ObjectRef>>,
    pub(super) active: RefCell<HashMap<Pid, ObjectRef>>,
    pub(super) dirty: RefCell<HashMap<Pid, ObjectRef>>,
    loading_pids: RefCell<HashSet<Pid>>,
    pub(super) storing: RefCell<Option<StorePass>>,
    drift_pids: RefCell<HashSet<Pid>>,
    is_finalizing: Cell<bool>,
    is_committing: Cell<bool>,
    closed: Cell<bool>,
    last_sync_time: Cell<Option<DateTime<Utc>>>,
    last_error: RefCell<Option<String>>,
    open_listeners: RefCell<Vec<Rc<dyn Fn(&ObjectPool)>>>,
}

/// Forwards channel notifications to the pool without keeping it alive.
struct PoolObserver {
    pool: Weak<PoolInner>,
}

impl MutationObserver for PoolObserver {
    fn on_did_mutate(&self, pid: &Pid) {
        if let Some(inner) = self.pool.upgrade() {
            ObjectPool { inner }.on_did_mutate_object(pid);
        }
    }
}

/// Counters for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub dirty: usize,
    pub loading: usize,
    pub records: usize,
    pub total_bytes: usize,
}

/// Builder for [`ObjectPool`].
pub struct ObjectPoolBuilder {
    config: PoolConfig,
    backend: Option<Box<dyn RecordBackend>>,
    registry: Option<Rc<TypeRegistry>>,
    scheduler: Option<Rc<dyn Scheduler>>,
    channel: Option<MutationChannel>,
}

impl ObjectPoolBuilder {
    /// Durable medium. Defaults to a fresh [`MemoryBackend`].
    pub fn backend(mut self, backend: impl RecordBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Some(Rc::new(registry));
        self
    }

    pub fn shared_registry(mut self, registry: Rc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Task runner for coalesced commits and the end-of-load pass. Defaults
    /// to a [`ManualScheduler`] reachable through
    /// [`ObjectPool::manual_scheduler`].
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn channel(mut self, channel: MutationChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn build(self) -> ObjectPool {
        let config = self.config;
        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(MemoryBackend::named(config.name.clone())));
        let registry = self.registry.unwrap_or_default();
        let (scheduler, manual) = match self.scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let manual = ManualScheduler::new();
                (Rc::new(manual.clone()) as Rc<dyn Scheduler>, Some(manual))
            }
        };
        let channel = self.channel.unwrap_or_default();

        let inner = Rc::new_cyclic(|weak: &Weak<PoolInner>| PoolInner {
            config,
            store: RefCell::new(AtomicMap::from_boxed(backend)),
            registry,
            scheduler,
            manual,
            channel,
            observer: Rc::new(PoolObserver { pool: weak.clone() }),
            root: RefCell::new(None),
            active: RefCell::new(HashMap::new()),
            dirty: RefCell::new(HashMap::new()),
            loading_pids: RefCell::new(HashSet::new()),
            storing: RefCell::new(None),
            drift_pids: RefCell::new(HashSet::new()),
            is_finalizing: Cell::new(false),
            is_committing: Cell::new(false),
            closed: Cell::new(false),
            last_sync_time: Cell::new(None),
            last_error: RefCell::new(None),
            open_listeners: RefCell::new(Vec::new()),
        });
        ObjectPool { inner }
    }
}

/// Mark-and-sweep collected object store over a transactional record map.
///
/// Cheap to clone; clones share the same pool. Single-threaded.
///
/// Coalesced commits and the end-of-load pass ([`ObjectPool::finalize_loading`])
/// run as scheduler tasks. Until the host drives the scheduler, mutations stay
/// dirty and objects loaded since the last pass ignore mutations.
#[derive(Clone)]
pub struct ObjectPool {
    pub(super) inner: Rc<PoolInner>,
}

impl ObjectPool {
    pub fn builder(config: PoolConfig) -> ObjectPoolBuilder {
        ObjectPoolBuilder {
            config,
            backend: None,
            registry: None,
            scheduler: None,
            channel: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Rc<TypeRegistry> {
        &self.inner.registry
    }

    /// Channel that objects built for this pool must notify on.
    pub fn channel(&self) -> &MutationChannel {
        &self.inner.channel
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.scheduler.clone()
    }

    /// Driving handle for the default scheduler. `None` when the builder was
    /// given a scheduler.
    pub fn manual_scheduler(&self) -> Option<ManualScheduler> {
        self.inner.manual.clone()
    }

    // ==================== Lifecycle ====================

    /// Open the record store, collect (if configured) and notify listeners.
    ///
    /// If the collection fails the store is closed again and the pool stays
    /// unusable until the next successful `open()`.
    pub fn open(&self) -> PoolResult<()> {
        let opened = self.inner.store.borrow_mut().open();
        if let Err(e) = opened {
            warn!(pool = %self.name(), error = %e, "failed to open record store");
            self.record_error(&e);
            return Err(e.into());
        }
        self.inner.closed.set(false);

        let records = self.inner.store.borrow().count()?;
        info!(pool = %self.name(), records, "opened pool");

        if self.inner.config.collect_on_open {
            if let Err(e) = self.collect() {
                warn!(pool = %self.name(), error = %e, "collect on open failed, pool not opened");
                self.drop_caches();
                self.inner.scheduler.unschedule(&self.task_key(STORE_METHOD));
                self.inner.store.borrow_mut().close();
                return Err(e);
            }
        }

        let listeners: Vec<_> = self.inner.open_listeners.borrow().clone();
        for listener in listeners {
            listener(self);
        }
        Ok(())
    }

    /// Register a callback run after every successful `open()`.
    pub fn on_did_open(&self, listener: impl Fn(&ObjectPool) + 'static) {
        self.inner.open_listeners.borrow_mut().push(Rc::new(listener));
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.get() && self.inner.store.borrow().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Unsubscribe from all objects, drop caches and pending tasks.
    ///
    /// Pending mutations that were not committed are lost.
    pub fn close(&self) {
        let dropped = self.drop_caches();
        *self.inner.storing.borrow_mut() = None;
        self.inner.scheduler.unschedule(&self.task_key(STORE_METHOD));
        self.inner.scheduler.unschedule(&self.task_key(FINALIZE_METHOD));
        self.inner.store.borrow_mut().close();
        self.inner.closed.set(true);
        info!(pool = %self.name(), dropped, "closed pool");
    }

    /// Drop every cached object and reload the root from the store.
    pub fn clear_cache(&self) -> PoolResult<Option<ObjectRef>> {
        self.ensure_usable()?;
        let dropped = self.drop_caches();
        debug!(pool = %self.name(), dropped, "cleared cache");
        if self.has_stored_root()? {
            Ok(Some(self.read_root()?))
        } else {
            Ok(None)
        }
    }

    fn drop_caches(&self) -> usize {
        let active = std::mem::take(&mut *self.inner.active.borrow_mut());
        for pid in active.keys() {
            self.inner
                .channel
                .remove_mutation_observer(pid, &self.inner.observer);
        }
        self.inner.dirty.borrow_mut().clear();
        self.inner.loading_pids.borrow_mut().clear();
        self.inner.drift_pids.borrow_mut().clear();
        self.inner.root.borrow_mut().take();
        active.len()
    }

    pub(super) fn ensure_usable(&self) -> PoolResult<()> {
        if self.inner.closed.get() {
            return Err(PoolError::Closed);
        }
        if !self.inner.store.borrow().is_open() {
            return Err(PoolError::NotOpen);
        }
        Ok(())
    }

    pub(super) fn record_error(&self, error: &impl Display) {
        *self.inner.last_error.borrow_mut() = Some(error.to_string());
    }

    /// Most recent failure, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.borrow().clone()
    }

    /// When the last transaction committed.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.inner.last_sync_time.get()
    }

    // ==================== Root ====================

    pub fn root_object(&self) -> Option<ObjectRef> {
        self.inner.root.borrow().clone()
    }

    /// Pid recorded under the root key.
    pub fn root_pid(&self) -> PoolResult<Option<Pid>> {
        match self.inner.store.borrow().at(ROOT_KEY)? {
            Some(value) => Ok(Some(Pid::new(value).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    pub fn has_stored_root(&self) -> PoolResult<bool> {
        Ok(self.inner.store.borrow().has_key(ROOT_KEY)?)
    }

    /// Make `object` the root of a new pool. Only allowed once.
    pub fn set_root_object(&self, object: ObjectRef) -> PoolResult<()> {
        self.ensure_usable()?;
        if self.inner.root.borrow().is_some() || self.has_stored_root()? {
            return Err(PoolError::RootAlreadySet);
        }

        let (storable, pid, type_name) = {
            let obj = object.borrow();
            (obj.should_store(), obj.pid(), obj.type_name())
        };
        if !storable {
            return Err(PoolError::NotStorable(type_name));
        }
        let pid = match pid {
            Some(pid) if self.knows_pid(&pid)? => return Err(PoolError::ObjectAlreadyKnown(pid)),
            Some(pid) => pid,
            None => {
                let pid = Pid::generate();
                object.borrow_mut().set_pid(pid.clone());
                pid
            }
        };

        debug!(pool = %self.name(), pid = %pid, type_name = %type_name, "set root object");
        *self.inner.root.borrow_mut() = Some(object.clone());
        self.add_active(&object)?;
        self.add_dirty(&pid, &object)
    }

    /// The root, read from the store if one is stored, otherwise built by
    /// `factory` and installed.
    pub fn root_or_if_absent_from_closure<F>(&self, factory: F) -> PoolResult<ObjectRef>
    where
        F: FnOnce() -> ObjectRef,
    {
        if let Some(root) = self.root_object() {
            return Ok(root);
        }
        if self.has_stored_root()? {
            return self.read_root();
        }
        let root = factory();
        self.set_root_object(root.clone())?;
        Ok(root)
    }

    /// Load the stored root.
    pub fn read_root(&self) -> PoolResult<ObjectRef> {
        self.ensure_usable()?;
        let pid = self.root_pid()?.ok_or(PoolError::MissingRoot)?;
        let root = self.object_for_pid(&pid)?.ok_or(PoolError::MissingRoot)?;
        *self.inner.root.borrow_mut() = Some(root.clone());
        Ok(root)
    }

    fn set_root_pid(&self, pid: &Pid) -> PoolResult<()> {
        let current = self.inner.store.borrow().at(ROOT_KEY)?;
        if current.as_deref() != Some(pid.as_str()) {
            self.inner.store.borrow_mut().at_put(ROOT_KEY, pid.as_str())?;
            info!(pool = %self.name(), pid = %pid, "set root pid");
        }
        Ok(())
    }

    // ==================== Active and dirty objects ====================

    /// True if the pid is stored, active or dirty.
    pub fn knows_pid(&self, pid: &Pid) -> PoolResult<bool> {
        Ok(self.inner.store.borrow().has_key(pid.as_str())?
            || self.inner.active.borrow().contains_key(pid)
            || self.inner.dirty.borrow().contains_key(pid))
    }

    pub fn knows_object(&self, object: &ObjectRef) -> PoolResult<bool> {
        match object.borrow().pid() {
            Some(pid) => self.knows_pid(&pid),
            None => Ok(false),
        }
    }

    pub fn active_object_for_pid(&self, pid: &Pid) -> Option<ObjectRef> {
        self.inner.active.borrow().get(pid).cloned()
    }

    pub fn has_active_pid(&self, pid: &Pid) -> bool {
        self.inner.active.borrow().contains_key(pid)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.borrow().len()
    }

    pub fn is_dirty(&self, pid: &Pid) -> bool {
        self.inner.dirty.borrow().contains_key(pid)
    }

    pub fn has_dirty_objects(&self) -> bool {
        !self.inner.dirty.borrow().is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.inner.dirty.borrow().len()
    }

    pub fn is_loading(&self, pid: &Pid) -> bool {
        self.inner.loading_pids.borrow().contains(pid)
    }

    pub fn is_storing(&self, pid: &Pid) -> bool {
        self.inner
            .storing
            .borrow()
            .as_ref()
            .is_some_and(|pass| pass.pids.contains(pid))
    }

    /// Pids of lazy references held by active objects.
    pub fn active_lazy_pids(&self) -> HashSet<Pid> {
        let active: Vec<ObjectRef> = self.inner.active.borrow().values().cloned().collect();
        let mut pids = HashSet::new();
        for object in active {
            object.borrow().lazy_pids(&mut pids);
        }
        pids
    }

    /// Start tracking `object`. Returns `false` for objects that opt out of
    /// persistence.
    fn add_active(&self, object: &ObjectRef) -> PoolResult<bool> {
        let (storable, pid, type_name) = {
            let obj = object.borrow();
            (obj.should_store(), obj.pid(), obj.type_name())
        };
        if !storable {
            warn!(pool = %self.name(), type_name = %type_name, "not tracking object that should not be stored");
            return Ok(false);
        }
        let pid = pid.ok_or(PoolError::MissingPid)?;

        if !self.inner.active.borrow().contains_key(&pid) {
            self.inner
                .channel
                .add_mutation_observer(&pid, self.inner.observer.clone());
            self.inner.active.borrow_mut().insert(pid, object.clone());
        }
        Ok(true)
    }

    fn add_dirty(&self, pid: &Pid, object: &ObjectRef) -> PoolResult<()> {
        if !self.inner.active.borrow().contains_key(pid) {
            return Err(PoolError::NotReferenced(pid.clone()));
        }
        if self.is_storing(pid) || self.is_loading(pid) {
            return Ok(());
        }
        let inserted = self
            .inner
            .dirty
            .borrow_mut()
            .insert(pid.clone(), object.clone())
            .is_none();
        if inserted {
            debug!(pool = %self.name(), pid = %pid, "dirty");
        }
        self.schedule_store();
        Ok(())
    }

    /// Handle a mutation announced on the channel.
    pub fn on_did_mutate_object(&self, pid: &Pid) {
        if self.is_loading(pid) {
            return;
        }
        let Some(object) = self.active_object_for_pid(pid) else {
            return;
        };
        if let Err(e) = self.add_dirty(pid, &object) {
            warn!(pool = %self.name(), pid = %pid, error = %e, "could not mark object dirty");
        }
    }

    // ==================== Storing ====================

    fn task_key(&self, method: &'static str) -> TaskKey {
        TaskKey::new(self.name(), method)
    }

    /// Arrange for dirty objects to be committed after the store delay.
    ///
    /// Returns `false` when nothing new was scheduled: the pool is not open,
    /// a commit is running, or one is already pending.
    pub fn schedule_store(&self) -> bool {
        if !self.is_open() {
            debug!(pool = %self.name(), "not open, store not scheduled");
            return false;
        }
        let key = self.task_key(STORE_METHOD);
        if self.inner.is_committing.get()
            || self.inner.scheduler.is_running(&key)
            || self.inner.scheduler.is_scheduled(&key)
        {
            return false;
        }

        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.schedule(
            key,
            self.inner.config.store_delay,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let pool = ObjectPool { inner };
                if let Err(e) = pool.commit_store_dirty_objects() {
                    warn!(pool = %pool.name(), error = %e, "scheduled commit failed");
                    pool.record_error(&e);
                }
            }),
        )
    }

    /// Write every dirty object, and everything they newly reference, in one
    /// transaction. Returns the number of records written.
    ///
    /// On failure the transaction is aborted and every object of the batch is
    /// dirty again.
    pub fn commit_store_dirty_objects(&self) -> PoolResult<usize> {
        self.ensure_usable()?;
        if !self.has_dirty_objects() {
            return Ok(0);
        }
        let count = self.run_transaction(|| self.store_dirty_objects())?;
        info!(pool = %self.name(), count, "stored dirty objects");
        Ok(count)
    }

    /// Store dirty objects now, outside the coalescing delay.
    pub fn flush_if_needed(&self) -> PoolResult<usize> {
        if !self.has_dirty_objects() {
            return Ok(0);
        }
        if self.inner.store.borrow().in_transaction() {
            self.store_dirty_objects()
        } else {
            self.commit_store_dirty_objects()
        }
    }

    /// Run `body` inside a store transaction.
    pub(super) fn run_transaction<T>(&self, body: impl FnOnce() -> PoolResult<T>) -> PoolResult<T> {
        self.inner.store.borrow_mut().begin()?;
        *self.inner.storing.borrow_mut() = Some(StorePass::default());
        self.inner.is_committing.set(true);

        let result = body().and_then(|value| {
            self.inner.store.borrow_mut().commit()?;
            Ok(value)
        });

        self.inner.is_committing.set(false);
        let pass = self.inner.storing.borrow_mut().take();

        match result {
            Ok(value) => {
                self.inner.last_sync_time.set(Some(Utc::now()));
                if self.has_dirty_objects() {
                    self.schedule_store();
                }
                Ok(value)
            }
            Err(e) => {
                self.inner.store.borrow_mut().abort();
                if let Some(pass) = pass {
                    let mut dirty = self.inner.dirty.borrow_mut();
                    for (pid, object) in pass.batch {
                        dirty.entry(pid).or_insert(object);
                    }
                }
                warn!(pool = %self.name(), error = %e, "transaction aborted");
                self.record_error(&e);
                Err(e)
            }
        }
    }

    /// Store dirty objects until none are left. Requires an open transaction.
    pub(super) fn store_dirty_objects(&self) -> PoolResult<usize> {
        let mut total = 0;
        loop {
            let bucket: Vec<(Pid, ObjectRef)> = self.inner.dirty.borrow_mut().drain().collect();
            if bucket.is_empty() {
                break;
            }
            {
                let mut storing = self.inner.storing.borrow_mut();
                let pass = storing.get_or_insert_with(StorePass::default);
                pass.batch.extend(bucket.iter().cloned());
                for (pid, _) in &bucket {
                    if !pass.pids.insert(pid.clone()) {
                        return Err(PoolError::DoubleStore(pid.clone()));
                    }
                }
            }
            for (pid, object) in &bucket {
                self.store_object(pid, object)?;
                total += 1;
            }
        }
        Ok(total)
    }

    fn store_object(&self, pid: &Pid, object: &ObjectRef) -> PoolResult<()> {
        let is_root = self
            .inner
            .root
            .borrow()
            .as_ref()
            .is_some_and(|root| same_object(root, object));
        if is_root {
            self.set_root_pid(pid)?;
        }

        let record = encode(object, self)?;
        let json = record.to_json()?;
        if self.inner.config.verbose {
            debug!(pool = %self.name(), pid = %pid, record = %json, "store");
        } else {
            debug!(pool = %self.name(), pid = %pid, type_name = %record.type_name, "store");
        }
        self.inner.store.borrow_mut().at_put(pid.as_str(), json)?;
        self.link_stored_refs(object);
        Ok(())
    }

    /// Replace owning references to tracked objects with pid references, so
    /// the active set is the only owner of stored objects.
    fn link_stored_refs(&self, object: &ObjectRef) {
        let links: Vec<(String, PidRef)> = {
            let obj = object.borrow();
            let schema = obj.schema();
            let active = self.inner.active.borrow();
            schema
                .slots()
                .iter()
                .filter(|slot| obj.should_store_slot(slot))
                .filter_map(|slot| {
                    let SlotValue::Object(target) = obj.slot(&slot.name) else {
                        return None;
                    };
                    let pid = target.borrow().pid()?;
                    let tracked = active.get(&pid)?;
                    same_object(tracked, &target)
                        .then(|| (slot.name.clone(), PidRef::to(pid, &target)))
                })
                .collect()
        };
        if links.is_empty() {
            return;
        }
        let mut obj = object.borrow_mut();
        for (name, link) in links {
            obj.set_slot(&name, SlotValue::Ref(link));
        }
    }

    // ==================== Loading ====================

    /// Active object for `pid`, loading it from the store if needed.
    ///
    /// The first load of a turn schedules [`finalize_loading`]. Returns
    /// `None` when no record exists or its type is not registered.
    ///
    /// [`finalize_loading`]: ObjectPool::finalize_loading
    pub fn object_for_pid(&self, pid: &Pid) -> PoolResult<Option<ObjectRef>> {
        self.ensure_usable()?;
        if let Some(object) = self.active_object_for_pid(pid) {
            return Ok(Some(object));
        }

        let Some(json) = self.inner.store.borrow().at(pid.as_str())? else {
            return Ok(None);
        };

        if !self.inner.is_finalizing.get() && self.inner.loading_pids.borrow().is_empty() {
            self.schedule_finalize();
        }
        self.inner.loading_pids.borrow_mut().insert(pid.clone());

        let loaded = Record::from_json(&json)
            .map_err(PoolError::from)
            .and_then(|record| self.object_for_record(pid, &record));
        match loaded {
            Ok(object) => Ok(Some(object)),
            Err(PoolError::Codec(CodecError::MissingType(type_name))) => {
                warn!(pool = %self.name(), pid = %pid, type_name = %type_name, "missing type, record not loaded");
                self.forget_failed_load(pid);
                Ok(None)
            }
            Err(e) => {
                warn!(pool = %self.name(), pid = %pid, error = %e, "load failed");
                self.forget_failed_load(pid);
                Err(e)
            }
        }
    }

    /// Undo the tracking a failed load set up, so no partly populated object
    /// is handed out later.
    fn forget_failed_load(&self, pid: &Pid) {
        self.inner.loading_pids.borrow_mut().remove(pid);
        self.inner.drift_pids.borrow_mut().remove(pid);
        let removed = self.inner.active.borrow_mut().remove(pid);
        let Some(object) = removed else {
            return;
        };
        self.inner
            .channel
            .remove_mutation_observer(pid, &self.inner.observer);
        let mut root = self.inner.root.borrow_mut();
        if root.as_ref().is_some_and(|root| same_object(root, &object)) {
            *root = None;
        }
    }

    fn object_for_record(&self, pid: &Pid, record: &Record) -> PoolResult<ObjectRef> {
        let object = self
            .inner
            .registry
            .instantiate(record, &self.inner.channel)?;
        assign_pid(&object, pid)?;
        if !self.add_active(&object)? {
            return Err(PoolError::NotStorable(record.type_name.clone()));
        }
        if self.root_pid()?.as_ref() == Some(pid) {
            let mut root = self.inner.root.borrow_mut();
            if root.is_none() {
                *root = Some(object.clone());
            }
        }

        load_from_record(&object, record, self)?;
        debug!(pool = %self.name(), pid = %pid, type_name = %record.type_name, "loaded");
        Ok(object)
    }

    fn schedule_finalize(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.schedule(
            self.task_key(FINALIZE_METHOD),
            Duration::ZERO,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    ObjectPool { inner }.finalize_loading();
                }
            }),
        );
    }

    /// Call `did_load_from_store` on every object loaded this turn, until no
    /// new loads appear, then queue drifted records for re-store. Returns the
    /// number of objects notified.
    ///
    /// A batch stops counting as loading before its hooks run, so mutations
    /// made by the hooks are stored.
    pub fn finalize_loading(&self) -> usize {
        if self.inner.is_finalizing.get() {
            return 0;
        }
        self.inner.is_finalizing.set(true);

        let mut notified = 0;
        loop {
            let batch = std::mem::take(&mut *self.inner.loading_pids.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for pid in &batch {
                match self.active_object_for_pid(pid) {
                    Some(object) => {
                        object.borrow_mut().did_load_from_store();
                        notified += 1;
                    }
                    None => warn!(pool = %self.name(), pid = %pid, "missing active object for loaded pid"),
                }
            }
        }
        self.inner.is_finalizing.set(false);

        let drifted: Vec<Pid> = self.inner.drift_pids.borrow_mut().drain().collect();
        for pid in drifted {
            let Some(object) = self.active_object_for_pid(&pid) else {
                continue;
            };
            warn!(pool = %self.name(), pid = %pid, "schema drift, record will be rewritten");
            if let Err(e) = self.add_dirty(&pid, &object) {
                warn!(pool = %self.name(), pid = %pid, error = %e, "could not re-store drifted object");
            }
        }
        notified
    }

    /// Object a slot refers to, loading pid references on demand.
    pub fn resolve_slot(&self, value: &SlotValue) -> PoolResult<Option<ObjectRef>> {
        value.resolve(self)
    }

    // ==================== Store-wide operations ====================

    /// Stored pids, excluding the reserved keys.
    pub fn all_pids(&self) -> PoolResult<Vec<Pid>> {
        Ok(self
            .inner
            .store
            .borrow()
            .keys()?
            .into_iter()
            .filter(|key| !is_reserved_key(key))
            .filter_map(|key| Pid::new(key).ok())
            .collect())
    }

    /// Remove every record in one transaction. Memory is untouched.
    pub fn delete_all(&self) -> PoolResult<usize> {
        self.ensure_usable()?;
        let keys = self.inner.store.borrow().keys()?;
        let count = self.run_transaction(|| {
            let mut store = self.inner.store.borrow_mut();
            for key in &keys {
                store.remove_key(key)?;
            }
            Ok(keys.len())
        })?;
        info!(pool = %self.name(), count, "deleted all records");
        Ok(count)
    }

    /// Wipe the durable store outside of any transaction.
    pub fn clear_store(&self) -> PoolResult<()> {
        self.ensure_usable()?;
        self.inner.store.borrow_mut().clear()?;
        Ok(())
    }

    pub fn total_bytes(&self) -> PoolResult<usize> {
        Ok(self.inner.store.borrow().total_bytes()?)
    }

    /// Snapshot of all records as a JSON object.
    pub fn as_json(&self) -> PoolResult<Value> {
        Ok(self.inner.store.borrow().as_json()?)
    }

    /// Log every record, values shortened.
    pub fn show(&self, label: &str) -> PoolResult<()> {
        const MAX: usize = 40;
        let records = self.as_json()?;
        let Value::Object(map) = records else {
            return Ok(());
        };
        info!(pool = %self.name(), label, count = map.len(), "records");
        for (key, value) in &map {
            let text = value.as_str().unwrap_or_default();
            let shown: String = if text.chars().count() > MAX {
                text.chars().take(MAX).chain("...".chars()).collect()
            } else {
                text.to_string()
            };
            info!(pool = %self.name(), key = %key, value = %shown, "record");
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolResult<PoolStats> {
        let store = self.inner.store.borrow();
        Ok(PoolStats {
            active: self.inner.active.borrow().len(),
            dirty: self.inner.dirty.borrow().len(),
            loading: self.inner.loading_pids.borrow().len(),
            records: store.count()?,
            total_bytes: store.total_bytes()?,
        })
    }
}

fn assign_pid(object: &ObjectRef, pid: &Pid) -> PoolResult<()> {
    let existing = object.borrow().pid();
    match existing {
        Some(old) if old != *pid => Err(PoolError::PidReassignment {
            old,
            new: pid.clone(),
        }),
        Some(_) => Ok(()),
        None => {
            object.borrow_mut().set_pid(pid.clone());
            Ok(())
        }
    }
}

impl ReferenceResolver for ObjectPool {
    type Error = PoolError;

    fn ref_for(&self, object: &ObjectRef) -> PoolResult<Option<Pid>> {
        let (storable, pid, type_name) = {
            let obj = object.borrow();
            (obj.should_store(), obj.pid(), obj.type_name())
        };
        if !storable {
            warn!(pool = %self.name(), type_name = %type_name, "refusing reference to object that should not be stored");
            return Ok(None);
        }

        let pid = match pid {
            Some(pid) => pid,
            None => {
                let pid = Pid::generate();
                object.borrow_mut().set_pid(pid.clone());
                pid
            }
        };
        if !self.has_active_pid(&pid) {
            self.add_active(object)?;
            self.add_dirty(&pid, object)?;
        }
        Ok(Some(pid))
    }

    /// An unreadable target record resolves to `None`, like a missing one.
    fn resolve(&self, pid: &Pid) -> PoolResult<Option<ObjectRef>> {
        match self.object_for_pid(pid) {
            Err(PoolError::Codec(CodecError::Json(e))) => {
                warn!(pool = %self.name(), pid = %pid, error = %e, "unreadable record, reference left null");
                Ok(None)
            }
            other => other,
        }
    }

    fn schedule_restore(&self, pid: &Pid) {
        self.inner.drift_pids.borrow_mut().insert(pid.clone());
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.name())
            .field("open", &self.is_open())
            .field("active", &self.active_count())
            .field("dirty", &self.dirty_count())
            .finish()
    }
}
