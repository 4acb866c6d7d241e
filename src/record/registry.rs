//! Registry of storable types, keyed by stored type name.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::notification::MutationChannel;
use crate::record::dynamic::DynamicObject;
use crate::record::error::{CodecError, CodecResult};
use crate::record::format::Record;
use crate::record::object::ObjectRef;
use crate::record::schema::TypeSchema;

/// Builds an empty instance for a stored record.
pub type Factory = Rc<dyn Fn(&Record, &MutationChannel) -> ObjectRef>;

struct RegisteredType {
    schema: Rc<TypeSchema>,
    factory: Factory,
}

/// Maps stored type names to schemas and factories.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, RegisteredType>,
    aliases: HashMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type with a custom factory.
    pub fn register<F>(&mut self, schema: TypeSchema, factory: F) -> Rc<TypeSchema>
    where
        F: Fn(&Record, &MutationChannel) -> ObjectRef + 'static,
    {
        let schema = Rc::new(schema);
        self.insert(schema.clone(), Rc::new(factory));
        schema
    }

    /// Register a type backed by [`DynamicObject`].
    pub fn register_dynamic(&mut self, schema: TypeSchema) -> Rc<TypeSchema> {
        let schema = Rc::new(schema);
        let for_factory = schema.clone();
        self.insert(
            schema.clone(),
            Rc::new(move |_record: &Record, channel: &MutationChannel| {
                DynamicObject::new_ref(for_factory.clone(), channel.clone())
            }),
        );
        schema
    }

    fn insert(&mut self, schema: Rc<TypeSchema>, factory: Factory) {
        debug!(type_name = schema.name(), "registered type");
        self.types.insert(
            schema.name().to_string(),
            RegisteredType { schema, factory },
        );
    }

    /// Load records of `old_name` as `new_name`.
    pub fn alias(&mut self, old_name: impl Into<String>, new_name: impl Into<String>) {
        self.aliases.insert(old_name.into(), new_name.into());
    }

    /// Current name for a stored type name, following aliases.
    pub fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        match self.aliases.get(name) {
            Some(current) => current,
            None => name,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(self.resolve_name(name))
    }

    pub fn schema(&self, name: &str) -> Option<Rc<TypeSchema>> {
        self.types
            .get(self.resolve_name(name))
            .map(|t| t.schema.clone())
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Empty instance for `record`, fields not yet loaded.
    pub fn instantiate(&self, record: &Record, channel: &MutationChannel) -> CodecResult<ObjectRef> {
        let registered = self
            .types
            .get(self.resolve_name(&record.type_name))
            .ok_or_else(|| CodecError::MissingType(record.type_name.clone()))?;
        Ok((registered.factory)(record, channel))
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate_registered_type() {
        let mut registry = TypeRegistry::new();
        registry.register_dynamic(TypeSchema::new("Node").literal("name"));

        let object = registry
            .instantiate(&Record::new("Node"), &MutationChannel::new())
            .unwrap();
        assert_eq!(object.borrow().type_name(), "Node");
        assert!(object.borrow().pid().is_none());
    }

    #[test]
    fn test_missing_type() {
        let registry = TypeRegistry::new();
        let Err(err) = registry.instantiate(&Record::new("Ghost"), &MutationChannel::new()) else {
            panic!("instantiated an unregistered type");
        };
        assert!(matches!(err, CodecError::MissingType(name) if name == "Ghost"));
    }

    #[test]
    fn test_alias_maps_renamed_type() {
        let mut registry = TypeRegistry::new();
        registry.register_dynamic(TypeSchema::new("Folder").literal("name"));
        registry.alias("Directory", "Folder");

        assert!(registry.contains("Directory"));
        assert_eq!(registry.schema("Directory").unwrap().name(), "Folder");
        let object = registry
            .instantiate(&Record::new("Directory"), &MutationChannel::new())
            .unwrap();
        assert_eq!(object.borrow().type_name(), "Folder");
    }
}
