//! The storable object contract.
//!
//! Objects live in `Rc<RefCell<..>>` cells and are shared freely inside one
//! thread. They refer to each other through [`SlotValue`]s; the pool breaks
//! cycles on disk by writing pids instead of nested objects.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::record::resolver::ReferenceResolver;
use crate::record::schema::{SlotSchema, TypeSchema};
use crate::storage::Pid;

/// Shared handle to a storable object.
pub type ObjectRef = Rc<RefCell<dyn Storable>>;

/// Contract between the pool and application objects.
pub trait Storable: Any {
    fn schema(&self) -> Rc<TypeSchema>;

    fn type_name(&self) -> String {
        self.schema().name().to_string()
    }

    fn pid(&self) -> Option<Pid>;

    fn set_pid(&mut self, pid: Pid);

    /// Current value of a slot, `Null` when unset.
    fn slot(&self, name: &str) -> SlotValue;

    /// Set a slot without announcing a mutation. Used while loading.
    fn set_slot(&mut self, name: &str, value: SlotValue);

    /// Whether the object may be persisted at all.
    fn should_store(&self) -> bool {
        true
    }

    /// Whether this instance writes the slot.
    fn should_store_slot(&self, slot: &SlotSchema) -> bool {
        slot.storable
    }

    /// Called once every object loaded in the same turn has its fields.
    fn did_load_from_store(&mut self) {}

    /// Pids of lazy references held by this object.
    fn lazy_pids(&self, pids: &mut HashSet<Pid>) {
        for slot in self.schema().lazy_slots() {
            if let SlotValue::Ref(pid_ref) = self.slot(&slot.name) {
                pids.insert(pid_ref.pid().clone());
            }
        }
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Borrow an object as its concrete type.
pub fn downcast_ref<T: Storable>(object: &ObjectRef) -> Option<Ref<'_, T>> {
    Ref::filter_map(object.borrow(), |o| o.as_any().downcast_ref::<T>()).ok()
}

/// Mutably borrow an object as its concrete type.
pub fn downcast_mut<T: Storable>(object: &ObjectRef) -> Option<RefMut<'_, T>> {
    RefMut::filter_map(object.borrow_mut(), |o| o.as_any_mut().downcast_mut::<T>()).ok()
}

/// Pid of an object, if it has one.
pub fn pid_of(object: &ObjectRef) -> Option<Pid> {
    object.borrow().pid()
}

/// True if both handles point at the same object.
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

/// Value held by a slot.
///
/// `Object` owns its target and is what application code usually sets.
/// Once the pool has stored the owner, such slots are rewritten to `Ref`,
/// which names the target by pid and only caches it weakly, so objects the
/// pool loads or stores never own each other across a cycle.
#[derive(Clone, Default)]
pub enum SlotValue {
    #[default]
    Null,
    Literal(Value),
    Object(ObjectRef),
    Ref(PidRef),
}

impl SlotValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SlotValue::Null | SlotValue::Literal(Value::Null))
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            SlotValue::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// The referenced object if it is in memory. Pid references whose
    /// target is not loaded return `None`.
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            SlotValue::Object(object) => Some(object.clone()),
            SlotValue::Ref(pid_ref) => pid_ref.loaded(),
            _ => None,
        }
    }

    pub fn as_pid_ref(&self) -> Option<&PidRef> {
        match self {
            SlotValue::Ref(pid_ref) => Some(pid_ref),
            _ => None,
        }
    }

    /// Referenced object, loading pid references through `resolver`.
    pub fn resolve<R>(&self, resolver: &R) -> Result<Option<ObjectRef>, R::Error>
    where
        R: ReferenceResolver + ?Sized,
    {
        match self {
            SlotValue::Object(object) => Ok(Some(object.clone())),
            SlotValue::Ref(pid_ref) => pid_ref.resolve(resolver),
            _ => Ok(None),
        }
    }
}

impl From<Value> for SlotValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SlotValue::Null,
            value => SlotValue::Literal(value),
        }
    }
}

impl From<ObjectRef> for SlotValue {
    fn from(object: ObjectRef) -> Self {
        SlotValue::Object(object)
    }
}

impl From<PidRef> for SlotValue {
    fn from(pid_ref: PidRef) -> Self {
        SlotValue::Ref(pid_ref)
    }
}

impl fmt::Debug for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Null => write!(f, "Null"),
            SlotValue::Literal(value) => write!(f, "Literal({value})"),
            SlotValue::Object(object) => match object.try_borrow() {
                Ok(o) => write!(f, "Object({}, {:?})", o.type_name(), o.pid()),
                Err(_) => write!(f, "Object(<borrowed>)"),
            },
            SlotValue::Ref(pid_ref) => write!(f, "{pid_ref:?}"),
        }
    }
}

/// Reference to a stored object by pid.
///
/// The target is cached weakly: the pool's active set owns loaded objects.
/// When the cache is empty (never loaded, or dropped by the pool) the next
/// `resolve` goes back to the resolver.
#[derive(Clone)]
pub struct PidRef {
    inner: Rc<PidRefInner>,
}

struct PidRefInner {
    pid: Pid,
    target: RefCell<Option<Weak<RefCell<dyn Storable>>>>,
}

impl PidRef {
    /// Reference that has not been resolved yet.
    pub fn new(pid: Pid) -> Self {
        Self {
            inner: Rc::new(PidRefInner {
                pid,
                target: RefCell::new(None),
            }),
        }
    }

    /// Reference with its target already known.
    pub fn to(pid: Pid, target: &ObjectRef) -> Self {
        let pid_ref = Self::new(pid);
        *pid_ref.inner.target.borrow_mut() = Some(Rc::downgrade(target));
        pid_ref
    }

    pub fn pid(&self) -> &Pid {
        &self.inner.pid
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded().is_some()
    }

    pub fn loaded(&self) -> Option<ObjectRef> {
        self.inner.target.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// Target object, loading it through `resolver` when not cached.
    pub fn resolve<R>(&self, resolver: &R) -> Result<Option<ObjectRef>, R::Error>
    where
        R: ReferenceResolver + ?Sized,
    {
        if let Some(target) = self.loaded() {
            return Ok(Some(target));
        }
        let target = resolver.resolve(&self.inner.pid)?;
        if let Some(target) = &target {
            *self.inner.target.borrow_mut() = Some(Rc::downgrade(target));
        }
        Ok(target)
    }
}

impl fmt::Debug for PidRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidRef")
            .field("pid", &self.inner.pid)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
