use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::{types_converter::TypeTag, Symbol};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum PortType {
    Input,
    Output,
    InOut,
}

impl PortType {
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Self::Output | Self::InOut)
    }
}

/// Declaration of a port in a node's manifest.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PortSpec {
    pub ty: PortType,
    pub key: Symbol,
    /// The type the node reads or writes through this port, if it declares one.
    pub type_tag: Option<TypeTag>,
    /// Literal used when the port is not mapped.
    pub default: Option<String>,
}

impl PortSpec {
    pub fn new_in(key: impl Into<Symbol>) -> Self {
        Self::new(PortType::Input, key)
    }

    pub fn new_out(key: impl Into<Symbol>) -> Self {
        Self::new(PortType::Output, key)
    }

    pub fn new_inout(key: impl Into<Symbol>) -> Self {
        Self::new(PortType::InOut, key)
    }

    fn new(ty: PortType, key: impl Into<Symbol>) -> Self {
        Self {
            ty,
            key: key.into(),
            type_tag: None,
            default: None,
        }
    }

    pub fn typed<T: Any>(mut self) -> Self {
        self.type_tag = Some(TypeTag::of::<T>());
        self
    }

    pub fn with_default(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }
}

fn trim_spaces(text: &str) -> &str {
    text.trim_matches(' ')
}

/// Whether the text of a port refers to a blackboard entry, i.e. is `{key}` or
/// `${key}` once surrounding spaces are removed.
pub fn is_blackboard_pointer(text: &str) -> bool {
    strip_blackboard_pointer(text).is_some()
}

/// The key a blackboard pointer refers to.
pub fn strip_blackboard_pointer(text: &str) -> Option<&str> {
    let text = trim_spaces(text);
    text.strip_prefix("${")
        .or_else(|| text.strip_prefix('{'))
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|key| !key.is_empty())
}
