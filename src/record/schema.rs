//! Type schemas: the ordered slot layout of a storable type.

/// What a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Literal,
    Object,
}

/// One slot of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSchema {
    pub name: String,
    pub kind: SlotKind,
    /// written to records
    pub storable: bool,
    /// references load on first access instead of with the owner
    pub lazy: bool,
}

impl SlotSchema {
    pub fn new(name: impl Into<String>, kind: SlotKind) -> Self {
        Self {
            name: name.into(),
            kind,
            storable: true,
            lazy: false,
        }
    }
}

/// Schema of a storable type. Slots are stored in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSchema {
    name: String,
    slots: Vec<SlotSchema>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
        }
    }

    /// Add a stored literal slot.
    pub fn literal(self, name: impl Into<String>) -> Self {
        self.slot(SlotSchema::new(name, SlotKind::Literal))
    }

    /// Add a stored, eagerly loaded reference slot.
    pub fn object(self, name: impl Into<String>) -> Self {
        self.slot(SlotSchema::new(name, SlotKind::Object))
    }

    /// Add a stored reference slot that loads on first access.
    pub fn lazy(self, name: impl Into<String>) -> Self {
        let mut slot = SlotSchema::new(name, SlotKind::Object);
        slot.lazy = true;
        self.slot(slot)
    }

    /// Add a slot that lives in memory only.
    pub fn transient(self, name: impl Into<String>) -> Self {
        let mut slot = SlotSchema::new(name, SlotKind::Literal);
        slot.storable = false;
        self.slot(slot)
    }

    /// Add a slot, replacing an earlier one with the same name.
    pub fn slot(mut self, slot: SlotSchema) -> Self {
        match self.slots.iter_mut().find(|s| s.name == slot.name) {
            Some(existing) => *existing = slot,
            None => self.slots.push(slot),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slots(&self) -> &[SlotSchema] {
        &self.slots
    }

    pub fn get(&self, name: &str) -> Option<&SlotSchema> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn storable_slots(&self) -> impl Iterator<Item = &SlotSchema> {
        self.slots.iter().filter(|s| s.storable)
    }

    pub fn lazy_slots(&self) -> impl Iterator<Item = &SlotSchema> {
        self.slots.iter().filter(|s| s.lazy)
    }
}
