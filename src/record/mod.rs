//! Object records and the storable object model.
//!
//! Every tracked object is persisted as one [`Record`]: its type name plus
//! its storable slots in schema order. Object-valued slots are written as
//! reference tokens (`{"*": pid}`), so arbitrary object graphs, cycles
//! included, flatten to independent records.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐   encode    ┌──────────────┐
//!   │   Storable   │ ──────────▶ │    Record    │
//!   │  (objects)   │ ◀────────── │ (JSON text)  │
//!   └──────────────┘   decode    └──────────────┘
//!          │                            │
//!          ▼                            ▼
//!   ┌──────────────┐            ┌──────────────┐
//!   │ TypeRegistry │            │  Reference   │
//!   │  (factories) │            │   Resolver   │
//!   └──────────────┘            └──────────────┘
//! ```

mod codec;
mod dynamic;
mod error;
mod format;
mod object;
mod registry;
mod resolver;
mod schema;

pub use codec::{encode, load_from_record};
pub use dynamic::DynamicObject;
pub use error::{CodecError, CodecResult};
pub use format::{is_literal, ref_pids, ref_pids_in_json, Record, RecordValue, REF_TOKEN_KEY};
pub use object::{
    downcast_mut, downcast_ref, pid_of, same_object, ObjectRef, PidRef, SlotValue, Storable,
};
pub use registry::{Factory, TypeRegistry};
pub use resolver::ReferenceResolver;
pub use schema::{SlotKind, SlotSchema, TypeSchema};
