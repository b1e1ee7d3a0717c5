//! The blackboard: hierarchical, thread-safe key/value storage nodes exchange data
//! through.
//!
//! A blackboard may have a parent. Entering a subtree creates a child blackboard
//! whose keys can be remapped to the parent: if the external text of a remapping is
//! a blackboard pointer (`{key}` or `${key}`) reads and writes are forwarded to the
//! parent under the stripped key, otherwise the text is a literal value that can be
//! read but not written.
//!
//! Every [`Entry`] remembers which types were ever written to it (output types) and
//! read from it (input types). Whenever a new type shows up, the entry checks that
//! every output type converts to every input type with the blackboard's
//! [`TypesConverter`], so a tree that could never exchange data through a key
//! fails right where the offending type is introduced, not at some later read.
//!
//! Each blackboard guards its own storage with a single lock. The lock is released
//! before a request is forwarded to the parent, so no two blackboard locks are ever
//! held at the same time.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    error::BlackboardError,
    port::{strip_blackboard_pointer, PortType},
    types_converter::{AnyValue, TypeTag, TypesConverter},
    Symbol,
};

/// A value slot plus the set of types that went through it.
#[derive(Debug, Default, Clone)]
pub struct Entry {
    value: Option<AnyValue>,
    input_types: BTreeSet<TypeTag>,
    output_types: BTreeSet<TypeTag>,
}

impl Entry {
    pub fn value(&self) -> Option<&AnyValue> {
        self.value.as_ref()
    }

    pub fn input_types(&self) -> &BTreeSet<TypeTag> {
        &self.input_types
    }

    pub fn output_types(&self) -> &BTreeSet<TypeTag> {
        &self.output_types
    }

    /// Records that `tag` is read and/or written through this entry. The entry is left
    /// untouched if the new type breaks the output-to-input convertibility invariant.
    pub fn add_type(
        &mut self,
        key: &str,
        tag: TypeTag,
        direction: PortType,
        converter: &TypesConverter,
    ) -> Result<(), BlackboardError> {
        let new_input = direction.is_input() && !self.input_types.contains(&tag);
        let new_output = direction.is_output() && !self.output_types.contains(&tag);
        if !new_input && !new_output {
            return Ok(());
        }

        let incompatible = |from: TypeTag, to: TypeTag| BlackboardError::IncompatibleTypes {
            key: key.to_owned(),
            from: from.name(),
            to: to.name(),
        };

        if new_output {
            let inputs = self.input_types.iter().copied();
            for input in inputs.chain(new_input.then_some(tag)) {
                if !converter.is_convertible(tag, input) {
                    return Err(incompatible(tag, input));
                }
            }
        }
        if new_input {
            for &output in &self.output_types {
                if !converter.is_convertible(output, tag) {
                    return Err(incompatible(output, tag));
                }
            }
        }

        if new_input {
            self.input_types.insert(tag);
        }
        if new_output {
            self.output_types.insert(tag);
        }
        Ok(())
    }
}

#[derive(Default)]
struct Storage {
    entries: HashMap<Symbol, Entry>,
    internal_to_external: HashMap<Symbol, String>,
}

enum Resolved {
    Local,
    Parent(Arc<Blackboard>, Symbol),
    Literal(String),
}

pub struct Blackboard {
    storage: Mutex<Storage>,
    parent: Weak<Blackboard>,
    converter: Arc<TypesConverter>,
}

impl Blackboard {
    /// A root blackboard using the given conversions.
    pub fn new(converter: Arc<TypesConverter>) -> Arc<Self> {
        Arc::new(Self {
            storage: Mutex::new(Storage::default()),
            parent: Weak::new(),
            converter,
        })
    }

    /// A root blackboard that knows only the built-in primitive conversions.
    pub fn create() -> Arc<Self> {
        Self::new(Arc::new(TypesConverter::new()))
    }

    /// A blackboard for a subtree scope. The parent is not kept alive by the child.
    pub fn with_parent(parent: &Arc<Blackboard>) -> Arc<Self> {
        Arc::new(Self {
            storage: Mutex::new(Storage::default()),
            parent: Arc::downgrade(parent),
            converter: parent.converter.clone(),
        })
    }

    pub fn parent(&self) -> Option<Arc<Blackboard>> {
        self.parent.upgrade()
    }

    pub fn types_converter(&self) -> &Arc<TypesConverter> {
        &self.converter
    }

    pub fn add_subtree_remapping(&self, internal: impl Into<Symbol>, external: impl Into<String>) {
        let internal = internal.into();
        let external = external.into();
        trace!(%internal, %external, "subtree remapping");
        self.storage
            .lock()
            .internal_to_external
            .insert(internal, external);
    }

    fn resolve(&self, key: Symbol) -> Resolved {
        let storage = self.storage.lock();
        let Some(external) = storage.internal_to_external.get(&key) else {
            return Resolved::Local;
        };
        match strip_blackboard_pointer(external) {
            Some(stripped) => match self.parent.upgrade() {
                Some(parent) => Resolved::Parent(parent, stripped.into()),
                None => Resolved::Local,
            },
            None => Resolved::Literal(external.clone()),
        }
    }

    /// Reads `key` as `T`, converting the stored value if its type differs.
    pub fn get<T: Any + Clone>(&self, key: impl Into<Symbol>) -> Result<T, BlackboardError> {
        let key = key.into();
        let to = TypeTag::of::<T>();
        let value = match self.resolve(key) {
            Resolved::Literal(text) => return self.converter.convert_literal(&text),
            Resolved::Parent(parent, external) => return parent.get(external),
            Resolved::Local => {
                let mut storage = self.storage.lock();
                let entry = storage
                    .entries
                    .get_mut(&key)
                    .filter(|entry| entry.value.is_some())
                    .ok_or_else(|| BlackboardError::KeyNotFound(key.to_string()))?;
                let value = entry
                    .value
                    .clone()
                    .ok_or_else(|| BlackboardError::KeyNotFound(key.to_string()))?;
                if !self.converter.is_convertible(value.tag(), to) {
                    return Err(BlackboardError::NoConversion {
                        from: value.tag().name(),
                        to: to.name(),
                    });
                }
                entry.add_type(&key, to, PortType::Input, &self.converter)?;
                value
            }
        };
        trace!(%key, ty = to.name(), "blackboard get");
        self.converter.convert(&value)
    }

    /// Reads the raw value without recording a type.
    pub fn get_any(&self, key: impl Into<Symbol>) -> Result<AnyValue, BlackboardError> {
        let key = key.into();
        match self.resolve(key) {
            Resolved::Literal(text) => Ok(AnyValue::new(text)),
            Resolved::Parent(parent, external) => parent.get_any(external),
            Resolved::Local => self
                .storage
                .lock()
                .entries
                .get(&key)
                .and_then(|entry| entry.value.clone())
                .ok_or_else(|| BlackboardError::KeyNotFound(key.to_string())),
        }
    }

    /// Writes `value`, creating the entry on first use.
    pub fn set<T: Any + Send + Sync>(
        &self,
        key: impl Into<Symbol>,
        value: T,
    ) -> Result<(), BlackboardError> {
        self.set_any(key, AnyValue::new(value))
    }

    pub fn set_any(&self, key: impl Into<Symbol>, value: AnyValue) -> Result<(), BlackboardError> {
        let key = key.into();
        let tag = value.tag();
        match self.resolve(key) {
            Resolved::Literal(literal) => Err(BlackboardError::WriteToLiteral {
                key: key.to_string(),
                literal,
            }),
            Resolved::Parent(parent, external) => {
                // The local shadow entry only keeps track of the types used on this side.
                self.storage
                    .lock()
                    .entries
                    .entry(key)
                    .or_default()
                    .add_type(&key, tag, PortType::Output, &self.converter)?;
                parent.set_any(external, value)
            }
            Resolved::Local => {
                trace!(%key, ty = tag.name(), "blackboard set");
                let mut storage = self.storage.lock();
                let entry = storage.entries.entry(key).or_default();
                entry.add_type(&key, tag, PortType::Output, &self.converter)?;
                entry.value = Some(value);
                Ok(())
            }
        }
    }

    /// Declares that a port of the given direction and type is bound to `key`.
    pub fn add_port_type(
        &self,
        key: impl Into<Symbol>,
        tag: TypeTag,
        direction: PortType,
    ) -> Result<(), BlackboardError> {
        let key = key.into();
        match self.resolve(key) {
            Resolved::Literal(literal) => {
                if direction.is_output() {
                    return Err(BlackboardError::WriteToLiteral {
                        key: key.to_string(),
                        literal,
                    });
                }
                let from = TypeTag::of::<String>();
                if !self.converter.is_convertible(from, tag) {
                    return Err(BlackboardError::IncompatibleTypes {
                        key: key.to_string(),
                        from: from.name(),
                        to: tag.name(),
                    });
                }
                Ok(())
            }
            Resolved::Parent(parent, external) => {
                self.storage
                    .lock()
                    .entries
                    .entry(key)
                    .or_default()
                    .add_type(&key, tag, direction, &self.converter)?;
                parent.add_port_type(external, tag, direction)
            }
            Resolved::Local => self
                .storage
                .lock()
                .entries
                .entry(key)
                .or_default()
                .add_type(&key, tag, direction, &self.converter),
        }
    }

    /// A copy of the local entry for `key`, without following remappings.
    pub fn entry(&self, key: impl Into<Symbol>) -> Option<Entry> {
        self.storage.lock().entries.get(&key.into()).cloned()
    }

    /// Whether `key` holds a value, following remappings.
    pub fn contains(&self, key: impl Into<Symbol>) -> bool {
        self.get_any(key).is_ok()
    }

    pub fn keys(&self) -> Vec<Symbol> {
        let mut keys: Vec<_> = self.storage.lock().entries.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Removes the local entry. Remappings are left alone.
    pub fn remove(&self, key: impl Into<Symbol>) -> Option<Entry> {
        self.storage.lock().entries.remove(&key.into())
    }

    pub fn debug_message(&self) {
        let storage = self.storage.lock();
        let mut keys: Vec<_> = storage.entries.keys().copied().collect();
        keys.sort();
        for key in keys {
            if let Some(external) = storage.internal_to_external.get(&key) {
                debug!(%key, %external, "remapped to parent");
                continue;
            }
            let entry = &storage.entries[&key];
            debug!(
                %key,
                value = ?entry.value,
                inputs = ?entry.input_types,
                outputs = ?entry.output_types,
                "entry"
            );
        }
    }
}

impl Debug for Blackboard {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let storage = self.storage.lock();
        f.debug_struct("Blackboard")
            .field("entries", &storage.entries)
            .field("remapping", &storage.internal_to_external)
            .field("has_parent", &(self.parent.strong_count() > 0))
            .finish()
    }
}
