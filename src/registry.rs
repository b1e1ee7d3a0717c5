use super::{
    error::LoadError,
    nodes::{
        AlwaysFailureNode, AlwaysSuccessNode, BlackboardPreconditionNode, CooldownNode,
        DelayNode, FallbackNode, ForceFailureNode, ForceSuccessNode, IfThenElseNode, InverterNode,
        KeepRunningUntilFailureNode, LoopNode, OnlyOnceNode, ParallelNode, ReactiveFallbackNode,
        ReactiveSequenceNode, RepeatNode, RetryNode, SequenceNode, SequenceStarNode, SubtreeNode,
        SwitchNode, TimeoutNode, WaitNode, WhileDoElseNode,
    },
    BBMap, BehaviorNode, BehaviorNodeContainer, BlackboardValue, PortSpec,
};
use std::collections::HashMap;

pub type Constructor = Box<dyn Fn() -> Box<dyn BehaviorNode> + Send + Sync>;

pub fn boxify<T>(cons: impl (Fn() -> T) + Send + Sync + 'static) -> Constructor
where
    T: BehaviorNode + 'static,
{
    Box::new(move || Box::new(cons()))
}

const SUBTREE: &str = "SubTree";

/// Node types by registration id. Every built-in node is registered by default.
pub struct Registry {
    node_types: HashMap<String, Constructor>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut ret = Self {
            node_types: HashMap::new(),
        };
        ret.register("Sequence", boxify(SequenceNode::default));
        ret.register("SequenceStar", boxify(SequenceStarNode::default));
        ret.register("ReactiveSequence", boxify(ReactiveSequenceNode::default));
        ret.register("Fallback", boxify(FallbackNode::default));
        ret.register("ReactiveFallback", boxify(ReactiveFallbackNode::default));
        ret.register("Parallel", boxify(ParallelNode::default));
        ret.register("Switch2", boxify(SwitchNode::<2>::default));
        ret.register("Switch3", boxify(SwitchNode::<3>::default));
        ret.register("Switch4", boxify(SwitchNode::<4>::default));
        ret.register("Switch5", boxify(SwitchNode::<5>::default));
        ret.register("Switch6", boxify(SwitchNode::<6>::default));
        ret.register("IfThenElse", boxify(IfThenElseNode::default));
        ret.register("WhileDoElse", boxify(|| WhileDoElseNode));
        ret.register("ForceSuccess", boxify(|| ForceSuccessNode));
        ret.register("ForceFailure", boxify(|| ForceFailureNode));
        ret.register("Inverter", boxify(|| InverterNode));
        ret.register("Repeat", boxify(RepeatNode::default));
        ret.register("Retry", boxify(RetryNode::default));
        ret.register(
            "KeepRunningUntilFailure",
            boxify(|| KeepRunningUntilFailureNode),
        );
        ret.register("Timeout", boxify(TimeoutNode::default));
        ret.register("Cooldown", boxify(CooldownNode::default));
        ret.register("Delay", boxify(DelayNode::default));
        ret.register(
            "BlackboardPrecondition",
            boxify(|| BlackboardPreconditionNode),
        );
        ret.register("OnlyOnce", boxify(OnlyOnceNode::default));
        ret.register("Loop", boxify(|| LoopNode));
        ret.register("AlwaysSuccess", boxify(|| AlwaysSuccessNode));
        ret.register("AlwaysFailure", boxify(|| AlwaysFailureNode));
        ret.register("Wait", boxify(WaitNode::default));
        ret.register(SUBTREE, boxify(|| SubtreeNode));
        ret
    }
}

impl Registry {
    pub fn register(&mut self, type_name: impl ToString, constructor: Constructor) {
        self.node_types.insert(type_name.to_string(), constructor);
    }

    pub fn build(&self, type_name: &str) -> Option<Box<dyn BehaviorNode>> {
        self.node_types
            .get(type_name)
            .map(|constructor| constructor())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.node_types.contains_key(type_name)
    }

    /// Registration ids in lexical order.
    pub fn registration_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.node_types.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The ports a node type declares.
    pub fn manifest(&self, type_name: &str) -> Option<Vec<PortSpec>> {
        self.build(type_name).map(|node| node.provided_ports())
    }

    /// Builds a container for a node of type `type_name`, validating `port_map`
    /// against the manifest of the type.
    ///
    /// For `"SubTree"` the mapping is the remapping of the new scope and is not
    /// validated; add the root of the subtree with
    /// [`BehaviorNodeContainer::add_child`].
    pub fn instantiate(
        &self,
        type_name: &str,
        name: impl Into<String>,
        port_map: BBMap,
    ) -> Result<BehaviorNodeContainer, LoadError> {
        let node = self
            .build(type_name)
            .ok_or_else(|| LoadError::MissingNode(type_name.to_owned()))?;
        let name = name.into();

        if type_name == SUBTREE {
            let mut container = BehaviorNodeContainer::new(node, port_map)
                .with_name(name)
                .with_registration_id(type_name);
            container.is_subtree = true;
            return Ok(container);
        }

        let ports = node.provided_ports();
        for (key, value) in &port_map {
            let spec = ports.iter().find(|spec| spec.key == *key).ok_or_else(|| {
                LoadError::PortUnmatch {
                    node: name.clone(),
                    port: key.to_string(),
                }
            })?;
            if matches!(value, BlackboardValue::Literal(_)) && spec.ty.is_output() {
                return Err(LoadError::PortIOUnmatch {
                    node: name,
                    port: key.to_string(),
                });
            }
        }

        Ok(BehaviorNodeContainer::new(node, port_map)
            .with_name(name)
            .with_registration_id(type_name))
    }
}
