//! # behavior-tree-runtime (Rust crate)
//!
//! A behavior tree execution runtime with typed blackboards, structured outcome
//! records and timer driven decorators.
//!
//!
//! ## Overview
//!
//! A behavior tree is an extension to finite state machines that makes describing transitional behavior easier.
//! See [BehaviorTreeCPP's documentation](https://www.behaviortree.dev/) for the thorough introduction to the idea.
//!
//! An external driver calls [`Tree::tick_root`] once per control cycle.
//! The call descends depth first through the node graph, each control or decorator
//! node ticking its children and combining their [`BehaviorResult`]s.
//! Leaves read and write the [`Blackboard`] through their declared ports.
//! Whenever a node reaches a terminal result it also produces a [`GeneralStatus`],
//! a machine readable record of why it ended the way it did, which its parent
//! nests into its own record, or merges into it when that child decided the outcome.
//!
//!
//! ## How it looks like
//!
//! First, you define a leaf node by implementing [`BehaviorNode`].
//!
//! ```rust
//! use ::behavior_tree_runtime::*;
//!
//! struct PrintArmNode;
//!
//! impl BehaviorNode for PrintArmNode {
//!     fn provided_ports(&self) -> Vec<PortSpec> {
//!         vec![PortSpec::new_in("arm").typed::<String>()]
//!     }
//!
//!     fn tick(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
//!         let arm: String = ctx.get_input("arm")?;
//!         println!("Got {}", arm);
//!         Ok(BehaviorResult::Success)
//!     }
//! }
//! ```
//!
//! Then you describe the tree with [`BehaviorNodeContainer`]s.
//! Note that `new` takes a mapping of ports as the second argument.
//! A value in braces refers to a blackboard entry, anything else is a literal.
//!
//! ```rust
//! # use ::behavior_tree_runtime::*;
//! # struct PrintArmNode;
//! # impl BehaviorNode for PrintArmNode {
//! #     fn provided_ports(&self) -> Vec<PortSpec> { vec![PortSpec::new_in("arm")] }
//! #     fn tick(&mut self, _: BehaviorCallback, _: &mut Context) -> TickResult { Ok(BehaviorResult::Success) }
//! # }
//! let mut root = BehaviorNodeContainer::new_node(SequenceNode::default());
//! root.add_child(BehaviorNodeContainer::new(Box::new(PrintArmNode), hash_map!("arm" => "{left_arm}")))
//!     .unwrap();
//! root.add_child(BehaviorNodeContainer::new(Box::new(PrintArmNode), hash_map!("arm" => "rightArm")))
//!     .unwrap();
//!
//! let blackboard = Blackboard::create();
//! blackboard.set("left_arm", "leftArm".to_string()).unwrap();
//!
//! let mut tree = Tree::new(root, blackboard).unwrap();
//! assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Success);
//! assert!(tree.general_status().unwrap().is_ok());
//! ```
//!
//! [`Tree::tick_root_with`] takes a callback for the behavior nodes to communicate with the environment.
//! The closure, aliased as `BehaviorCallback`, takes a `&dyn std::any::Any` and returns a `Box<dyn std::any::Any>`,
//! which allows the user to pass or return any type, but in exchange, the user needs to
//! check the type with `downcast_ref` in order to use it.
//! Values that must outlive a tick, or cross a subtree boundary, belong in the blackboard instead.
//!
//!
//! ### Optimizing port access by caching symbols
//!
//! Port names and blackboard keys are [`Symbol`]s, interned strings that compare by address.
//! You can use `Lazy<Symbol>` to cache the symbol on first use.
//! `Lazy` is re-exported from `once_cell`.
//!
//! ```rust
//! use ::behavior_tree_runtime::{
//!     BehaviorCallback, BehaviorNode, BehaviorResult, Context, Lazy, PortSpec, Symbol, TickResult,
//! };
//!
//! static GOAL: Lazy<Symbol> = Lazy::new(|| "goal".into());
//!
//! struct MoveTo;
//!
//! impl BehaviorNode for MoveTo {
//!     fn provided_ports(&self) -> Vec<PortSpec> {
//!         vec![PortSpec::new_in(*GOAL).typed::<f64>()]
//!     }
//!
//!     fn tick(&mut self, _: BehaviorCallback, ctx: &mut Context) -> TickResult {
//!         let goal: f64 = ctx.get_input(*GOAL)?;
//!         Ok(if goal >= 0. { BehaviorResult::Success } else { BehaviorResult::Fail })
//!     }
//! }
//! ```
//!
//!
//! ### Registry
//!
//! Node types are looked up by registration id in a [`Registry`].
//! Every built-in control, decorator and leaf node is registered by default.
//!
//! ```rust
//! # use ::behavior_tree_runtime::*;
//! # struct PrintArmNode;
//! # impl BehaviorNode for PrintArmNode { fn tick(&mut self, _: BehaviorCallback, _: &mut Context) -> TickResult { Ok(BehaviorResult::Success) }}
//! let mut registry = Registry::default();
//! registry.register("PrintArmNode", boxify(|| PrintArmNode));
//!
//! let mut retry = registry
//!     .instantiate("Retry", "retry", hash_map!("num_attempts" => "3"))
//!     .unwrap();
//! retry
//!     .add_child(registry.instantiate("PrintArmNode", "print", BBMap::new()).unwrap())
//!     .unwrap();
//! ```
//!
//!
//! ### Subtrees
//!
//! A subtree has its own blackboard scope.
//! Its port mapping remaps keys of the subtree scope to keys of the parent scope
//! (`{key}`) or to literals.
//!
//! ```rust
//! # use ::behavior_tree_runtime::*;
//! let subtree = BehaviorNodeContainer::new_subtree(
//!     BehaviorNodeContainer::new_node(AlwaysSuccessNode),
//!     hash_map!("target" => "{goal}", "speed" => "0.5"),
//! );
//! let tree = Tree::new(subtree, Blackboard::create()).unwrap();
//! ```

mod blackboard;
mod container;
mod context;
pub mod error;
pub mod general_status;
mod nodes;
mod port;
mod registry;
mod symbol;
pub mod timer_queue;
mod tree;
pub mod types_converter;

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use crate::blackboard::{Blackboard, Entry};
pub use crate::container::BehaviorNodeContainer;
pub use crate::context::Context;
pub use crate::error::{BehaviorError, BlackboardError, LoadError, TickResult};
pub use crate::general_status::{codes, GeneralStatus, StatusCode, StatusDetails};
pub use crate::nodes::{
    AlwaysFailureNode, AlwaysSuccessNode, BlackboardPreconditionNode, CooldownNode, DelayNode,
    FallbackNode, ForceFailureNode, ForceSuccessNode, IfThenElseNode, InverterNode,
    KeepRunningUntilFailureNode, LoopNode, OnlyOnceNode, ParallelNode, ReactiveFallbackNode,
    ReactiveSequenceNode, RepeatNode, RetryNode, SequenceNode, SequenceStarNode, SubtreeNode,
    SwitchNode, TimeoutNode, WaitNode, WhileDoElseNode,
};
pub use crate::symbol::Symbol;
pub use crate::tree::{NodeId, Tree};
pub use crate::types_converter::{AnyValue, TypeTag, TypesConverter};
pub use crate::{
    port::{is_blackboard_pointer, strip_blackboard_pointer, PortSpec, PortType},
    registry::{boxify, Constructor, Registry},
};
pub use ::once_cell::sync::*;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Hash, Serialize, Deserialize)]
pub enum BehaviorResult {
    /// The node has not started, or was reset by its parent.
    #[default]
    Idle,
    /// The node should keep running in the next tick
    Running,
    Success,
    Fail,
}

impl BehaviorResult {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

impl std::str::FromStr for BehaviorResult {
    type Err = String;

    /// Accepts the names in any case, and `FAILURE` for [`Self::Fail`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAIL" | "FAILURE" => Ok(Self::Fail),
            _ => Err(format!("{:?} is not a behavior result", s)),
        }
    }
}

/// Where a port reads from or writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlackboardValue {
    Ref(Symbol),
    Literal(String),
}

impl BlackboardValue {
    /// `{key}` or `${key}` refers to a blackboard entry, anything else is a literal.
    pub fn parse(text: &str) -> Self {
        match strip_blackboard_pointer(text) {
            Some(key) => Self::Ref(key.into()),
            None => Self::Literal(text.to_owned()),
        }
    }

    /// The text form accepted by [`Blackboard::add_subtree_remapping`].
    pub fn to_remapping(&self) -> String {
        match self {
            Self::Ref(key) => format!("{{{}}}", key),
            Self::Literal(text) => text.clone(),
        }
    }
}

impl From<&str> for BlackboardValue {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for BlackboardValue {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Symbol> for BlackboardValue {
    fn from(s: Symbol) -> Self {
        Self::Ref(s)
    }
}

pub type BBMap = HashMap<Symbol, BlackboardValue>;
pub type BehaviorCallback<'a> = &'a mut dyn FnMut(&dyn Any) -> Option<Box<dyn Any>>;

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NumChildren {
    Finite(usize),
    Infinite,
}

impl PartialOrd for NumChildren {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(match (self, other) {
            (NumChildren::Finite(_), NumChildren::Infinite) => std::cmp::Ordering::Less,
            (NumChildren::Infinite, NumChildren::Finite(_)) => std::cmp::Ordering::Greater,
            (NumChildren::Finite(lhs), NumChildren::Finite(rhs)) => lhs.cmp(rhs),
            (NumChildren::Infinite, NumChildren::Infinite) => return None,
        })
    }
}

pub trait BehaviorNode: Send {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult;

    /// Called when the node is interrupted while `Running`. Implementations that
    /// keep resumption state or timers must clear them here.
    fn halt(&mut self, ctx: &mut Context) {
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(0)
    }
}

/// Tree-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Validate port mappings against the node manifests while building.
    pub check_ports: bool,
    pub timer_thread_name: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            check_ports: true,
            timer_thread_name: "bt-timer".to_owned(),
        }
    }
}

#[macro_export]
macro_rules! hash_map {
    () => {
        std::collections::HashMap::default()
    };
    ($($name: literal => $val: expr),+ $(,)?) => {{
        let mut ret = std::collections::HashMap::default();
        $(
            ret.insert($name.into(), $val.into());
        )+
        ret
    }};
}
