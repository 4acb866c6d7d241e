//! A storable object whose slots are defined by its schema alone.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::notification::MutationChannel;
use crate::record::object::{ObjectRef, SlotValue, Storable};
use crate::record::schema::{SlotSchema, TypeSchema};
use crate::storage::Pid;

/// Schema-driven storable object.
///
/// Slot values are kept in a map keyed by slot name. [`DynamicObject::set`]
/// announces the change on the mutation channel once the object has a pid;
/// [`Storable::set_slot`] stays silent for the loader.
pub struct DynamicObject {
    schema: Rc<TypeSchema>,
    pid: Option<Pid>,
    values: HashMap<String, SlotValue>,
    channel: MutationChannel,
    storable: bool,
    load_count: usize,
}

impl DynamicObject {
    pub fn new(schema: Rc<TypeSchema>, channel: MutationChannel) -> Self {
        Self {
            schema,
            pid: None,
            values: HashMap::new(),
            channel,
            storable: true,
            load_count: 0,
        }
    }

    /// New object wrapped as a shared handle.
    pub fn new_ref(schema: Rc<TypeSchema>, channel: MutationChannel) -> ObjectRef {
        Rc::new(RefCell::new(Self::new(schema, channel)))
    }

    pub fn get(&self, name: &str) -> SlotValue {
        self.values.get(name).cloned().unwrap_or_default()
    }

    /// Set a slot and announce the mutation.
    pub fn set(&mut self, name: &str, value: impl Into<SlotValue>) {
        self.values.insert(name.to_string(), value.into());
        if let Some(pid) = &self.pid {
            self.channel.notify_mutation(pid);
        }
    }

    /// Mark the object as never persisted.
    pub fn set_storable(&mut self, storable: bool) {
        self.storable = storable;
    }

    /// How many times `did_load_from_store` ran.
    pub fn load_count(&self) -> usize {
        self.load_count
    }
}

impl Storable for DynamicObject {
    fn schema(&self) -> Rc<TypeSchema> {
        self.schema.clone()
    }

    fn type_name(&self) -> String {
        self.schema.name().to_string()
    }

    fn pid(&self) -> Option<Pid> {
        self.pid.clone()
    }

    fn set_pid(&mut self, pid: Pid) {
        self.pid = Some(pid);
    }

    fn slot(&self, name: &str) -> SlotValue {
        self.get(name)
    }

    fn set_slot(&mut self, name: &str, value: SlotValue) {
        self.values.insert(name.to_string(), value);
    }

    fn should_store(&self) -> bool {
        self.storable
    }

    fn should_store_slot(&self, slot: &SlotSchema) -> bool {
        slot.storable
    }

    fn did_load_from_store(&mut self) {
        self.load_count += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl std::fmt::Debug for DynamicObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicObject")
            .field("type", &self.schema.name())
            .field("pid", &self.pid)
            .field("slots", &self.values.len())
            .finish()
    }
}
