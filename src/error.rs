use thiserror::Error;

use crate::Symbol;

/// Conditions raised by [`crate::Blackboard`] and [`crate::TypesConverter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BlackboardError {
    #[error("key {0:?} not found in the blackboard")]
    KeyNotFound(String),
    #[error("no known conversion from {from} to {to}")]
    NoConversion { from: &'static str, to: &'static str },
    #[error("failed to convert {value:?} to {to}")]
    ConversionFailed { value: String, to: &'static str },
    #[error("incompatible types for entry {key:?}: no known conversion from {from} to {to}")]
    IncompatibleTypes {
        key: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("cannot write to {key:?}, it is remapped to the literal {literal:?}")]
    WriteToLiteral { key: String, literal: String },
}

impl BlackboardError {
    /// Whether the condition is an error in the tree definition rather than in the
    /// data flowing through it.
    pub fn is_logic_error(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleTypes { .. } | Self::WriteToLiteral { .. }
        )
    }
}

/// The error path of a tick.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BehaviorError {
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
    #[error("node {node:?} used port {port:?} that it does not declare")]
    UndeclaredPort { node: String, port: Symbol },
    #[error("node {node:?} accessed port {port:?} against its direction")]
    PortDirection { node: String, port: Symbol },
    #[error("node {node:?} requires {expected} children, but has {actual}")]
    ChildCount {
        node: String,
        expected: &'static str,
        actual: usize,
    },
    #[error("node {node:?} has no child at index {index}")]
    MissingChild { node: String, index: usize },
    #[error("node {node:?} got an invalid value for port {port:?}: {reason}")]
    InvalidPortValue {
        node: String,
        port: Symbol,
        reason: String,
    },
    #[error("node {0:?} returned Idle from tick")]
    ReturnedIdle(String),
    #[error("node {0:?} was ticked while it was already being ticked")]
    NodeBusy(String),
    #[error("failed to start the timer thread: {0}")]
    TimerUnavailable(String),
}

impl BehaviorError {
    /// Logic errors are mistakes in the tree definition. Everything else is a data
    /// condition a node may choose to turn into [`crate::BehaviorResult::Fail`].
    pub fn is_logic_error(&self) -> bool {
        match self {
            Self::Blackboard(e) => e.is_logic_error(),
            Self::TimerUnavailable(_) => false,
            _ => true,
        }
    }
}

pub type TickResult = Result<crate::BehaviorResult, BehaviorError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AddChildError {
    #[error("Attempted to add too many nodes")]
    TooManyNodes,
}

pub type AddChildResult = Result<(), AddChildError>;

/// Errors found while building a tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("Node type not found {0:?}")]
    MissingNode(String),
    #[error("Port {port:?} is not provided by node {node:?}")]
    PortUnmatch { node: String, port: String },
    #[error("Port {port:?} of node {node:?} is mapped against its direction")]
    PortIOUnmatch { node: String, port: String },
    #[error("Node name {0:?} is used more than once")]
    DuplicateName(String),
    #[error("Port {port:?} of node {node:?}: {source}")]
    PortType {
        node: String,
        port: String,
        #[source]
        source: BlackboardError,
    },
}
