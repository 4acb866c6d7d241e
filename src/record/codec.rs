//! Conversion between objects and records.
//!
//! Slot values are collected before any reference is resolved, so resolvers
//! are free to borrow the object again (self references, cycles).

use std::rc::Rc;

use serde_json::Value;
use tracing::warn;

use crate::record::error::CodecError;
use crate::record::format::{Record, RecordValue};
use crate::record::object::{ObjectRef, PidRef, SlotValue};
use crate::record::resolver::ReferenceResolver;
use crate::record::schema::{SlotKind, SlotSchema, TypeSchema};

/// Encode the storable slots of `object` in declaration order.
///
/// Object references become reference tokens through `resolver.ref_for`;
/// a refused reference is written as null. Pid references are written from
/// their pid without loading the target.
pub fn encode<R>(object: &ObjectRef, resolver: &R) -> Result<Record, R::Error>
where
    R: ReferenceResolver + ?Sized,
{
    let (type_name, values) = {
        let obj = object.borrow();
        let schema = obj.schema();
        let values: Vec<(SlotSchema, SlotValue)> = schema
            .slots()
            .iter()
            .filter(|slot| obj.should_store_slot(slot))
            .map(|slot| (slot.clone(), obj.slot(&slot.name)))
            .collect();
        (obj.type_name(), values)
    };

    let mut record = Record::new(type_name);
    for (slot, value) in values {
        let encoded = match (slot.kind, value) {
            (_, SlotValue::Null) => RecordValue::Literal(Value::Null),
            (SlotKind::Object, SlotValue::Literal(Value::Null)) => RecordValue::Literal(Value::Null),
            (SlotKind::Literal, SlotValue::Literal(value)) if resolver.is_literal(&value) => {
                RecordValue::Literal(value)
            }
            (SlotKind::Literal, _) => {
                return Err(CodecError::InvalidLiteral {
                    type_name: record.type_name,
                    slot: slot.name,
                }
                .into());
            }
            (SlotKind::Object, SlotValue::Literal(_)) => {
                return Err(CodecError::InvalidReference {
                    type_name: record.type_name,
                    slot: slot.name,
                }
                .into());
            }
            (SlotKind::Object, SlotValue::Object(target)) => encode_ref(&target, resolver)?,
            (SlotKind::Object, SlotValue::Ref(pid_ref)) => RecordValue::Ref(pid_ref.pid().clone()),
        };
        record.entries.push((slot.name, encoded));
    }
    Ok(record)
}

fn encode_ref<R>(target: &ObjectRef, resolver: &R) -> Result<RecordValue, R::Error>
where
    R: ReferenceResolver + ?Sized,
{
    Ok(match resolver.ref_for(target)? {
        Some(pid) => RecordValue::Ref(pid),
        None => RecordValue::Literal(Value::Null),
    })
}

/// Populate `object` from `record`.
///
/// The object must already be registered with the resolver. Entries for
/// slots the schema no longer stores, or whose value does not match the
/// slot kind, are dropped and reported through `schedule_restore`. Returns `true` if anything was dropped.
pub fn load_from_record<R>(object: &ObjectRef, record: &Record, resolver: &R) -> Result<bool, R::Error>
where
    R: ReferenceResolver + ?Sized,
{
    let (schema, pid): (Rc<TypeSchema>, _) = {
        let obj = object.borrow();
        (obj.schema(), obj.pid())
    };

    let mut drifted = false;
    for (name, value) in &record.entries {
        let Some(slot) = schema.get(name).filter(|slot| slot.storable) else {
            warn!(type_name = %record.type_name, slot = %name, "dropping stored slot unknown to schema");
            drifted = true;
            continue;
        };

        let decoded = match (slot.kind, value) {
            (SlotKind::Literal, RecordValue::Literal(value)) => SlotValue::from(value.clone()),
            (SlotKind::Object, RecordValue::Literal(Value::Null)) => SlotValue::Null,
            (SlotKind::Object, RecordValue::Literal(_)) | (SlotKind::Literal, RecordValue::Ref(_)) => {
                warn!(type_name = %record.type_name, slot = %name, "dropping stored value of the wrong kind");
                drifted = true;
                continue;
            }
            (SlotKind::Object, RecordValue::Ref(pid)) if slot.lazy => {
                SlotValue::Ref(PidRef::new(pid.clone()))
            }
            (SlotKind::Object, RecordValue::Ref(pid)) => match resolver.resolve(pid)? {
                Some(target) => SlotValue::Ref(PidRef::to(pid.clone(), &target)),
                None => {
                    warn!(type_name = %record.type_name, slot = %name, target = %pid, "reference to missing record");
                    SlotValue::Null
                }
            },
        };
        object.borrow_mut().set_slot(name, decoded);
    }

    if drifted {
        if let Some(pid) = &pid {
            resolver.schedule_restore(pid);
        }
    }
    Ok(drifted)
}
