//! The seam between the codec and whoever owns the objects.

use serde_json::Value;

use crate::record::error::CodecError;
use crate::record::format::is_literal;
use crate::record::object::ObjectRef;
use crate::storage::Pid;

/// Translates between in-memory references and pids while encoding and
/// decoding records.
///
/// Implementations must register an object before populating it, so that
/// cyclic references found while loading resolve to the same instance.
pub trait ReferenceResolver {
    type Error: From<CodecError>;

    /// Pid for `object`, allocating one and tracking the object if it is not
    /// known yet. `None` refuses the reference (the object is not storable).
    fn ref_for(&self, object: &ObjectRef) -> Result<Option<Pid>, Self::Error>;

    /// Object stored under `pid`, loading it if needed. `None` if no record
    /// exists.
    fn resolve(&self, pid: &Pid) -> Result<Option<ObjectRef>, Self::Error>;

    /// The record of `pid` no longer matches its type and should be written
    /// again once loading settles.
    fn schedule_restore(&self, pid: &Pid);

    fn is_literal(&self, value: &Value) -> bool {
        is_literal(value)
    }
}
