//! Shared setup for pool tests.

use std::rc::Rc;

use serde_json::{json, Value};

use crate::pool::config::PoolConfig;
use crate::pool::object_pool::ObjectPool;
use crate::pool::scheduler::ManualScheduler;
use crate::record::{downcast_mut, DynamicObject, ObjectRef, SlotValue, TypeRegistry, TypeSchema};
use crate::storage::MemoryBackend;

pub(super) fn node_schema() -> TypeSchema {
    TypeSchema::new("Node")
        .literal("name")
        .object("child")
        .object("next")
        .lazy("later")
        .transient("cache")
}

pub(super) fn registry() -> Rc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register_dynamic(node_schema());
    Rc::new(registry)
}

pub(super) struct Fixture {
    pub pool: ObjectPool,
    pub backend: MemoryBackend,
    pub scheduler: ManualScheduler,
}

impl Fixture {
    /// Open pool over a fresh memory backend.
    pub fn new() -> Self {
        Self::open_with(MemoryBackend::named("test"), registry(), PoolConfig::new("test"))
    }

    pub fn open_with(backend: MemoryBackend, registry: Rc<TypeRegistry>, config: PoolConfig) -> Self {
        let fixture = Self::build(backend, registry, config);
        fixture.pool.open().unwrap();
        fixture
    }

    /// Pool that has not been opened.
    pub fn build(backend: MemoryBackend, registry: Rc<TypeRegistry>, config: PoolConfig) -> Self {
        let scheduler = ManualScheduler::new();
        let pool = ObjectPool::builder(config)
            .backend(backend.clone())
            .shared_registry(registry)
            .scheduler(Rc::new(scheduler.clone()))
            .build();
        Self {
            pool,
            backend,
            scheduler,
        }
    }

    /// Second pool over the same records.
    pub fn reopen(&self) -> Self {
        Self::open_with(
            self.backend.clone(),
            self.pool.registry().clone(),
            self.pool.config().clone(),
        )
    }

    pub fn node(&self, name: &str) -> ObjectRef {
        let schema = self.pool.registry().schema("Node").unwrap();
        let node = DynamicObject::new_ref(schema, self.pool.channel().clone());
        set(&node, "name", json!(name));
        node
    }

    /// Run every scheduled task.
    pub fn settle(&self) -> usize {
        self.scheduler.run_until_idle()
    }

    /// Resolve an object slot through the pool.
    pub fn follow(&self, object: &ObjectRef, slot: &str) -> Option<ObjectRef> {
        let value = object.borrow().slot(slot);
        self.pool.resolve_slot(&value).unwrap()
    }

    /// Stored record for `object`, parsed.
    pub fn record_of(&self, object: &ObjectRef) -> Value {
        let pid = object.borrow().pid().unwrap();
        serde_json::from_str(&self.backend.get(pid.as_str()).unwrap()).unwrap()
    }
}

pub(super) fn set(object: &ObjectRef, slot: &str, value: impl Into<SlotValue>) {
    downcast_mut::<DynamicObject>(object).unwrap().set(slot, value);
}

pub(super) fn name_of(object: &ObjectRef) -> Value {
    object
        .borrow()
        .slot("name")
        .as_literal()
        .cloned()
        .unwrap_or(Value::Null)
}
