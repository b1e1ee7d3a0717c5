use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    context::{Context, TimerHost},
    error::{BlackboardError, LoadError},
    general_status::{GeneralStatus, StatusDraft},
    BBMap, BehaviorCallback, BehaviorNode, BehaviorNodeContainer, BehaviorResult, Blackboard,
    BlackboardValue, PortSpec, TickResult, TreeConfig, TypeTag,
};

/// Index of a node in its [`Tree`]. The root is always the first node and
/// children follow their parent in depth first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct NodeSlot {
    pub(crate) name: String,
    pub(crate) registration_id: String,
    /// Taken out while the node itself is being ticked or halted.
    pub(crate) node: Option<Box<dyn BehaviorNode>>,
    pub(crate) ports: Vec<PortSpec>,
    pub(crate) port_map: BBMap,
    pub(crate) status: BehaviorResult,
    pub(crate) general_status: Option<GeneralStatus>,
    pub(crate) draft: StatusDraft,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) blackboard: Arc<Blackboard>,
}

/// Owns every node of a behavior tree and the blackboards of its scopes.
pub struct Tree {
    slots: Vec<NodeSlot>,
    /// The root scope first, then one blackboard per subtree.
    blackboards: Vec<Arc<Blackboard>>,
    timers: TimerHost,
    last_result: Option<BehaviorResult>,
    config: TreeConfig,
}

impl Tree {
    pub fn new(root: BehaviorNodeContainer, blackboard: Arc<Blackboard>) -> Result<Self, LoadError> {
        Self::with_config(root, blackboard, TreeConfig::default())
    }

    pub fn with_config(
        root: BehaviorNodeContainer,
        blackboard: Arc<Blackboard>,
        config: TreeConfig,
    ) -> Result<Self, LoadError> {
        let mut builder = Builder {
            slots: vec![],
            blackboards: vec![blackboard.clone()],
            names: HashSet::new(),
            check_ports: config.check_ports,
        };
        builder.add(root, None, blackboard)?;
        debug!(nodes = builder.slots.len(), "tree built");
        Ok(Self {
            slots: builder.slots,
            blackboards: builder.blackboards,
            timers: TimerHost::new(config.timer_thread_name.clone()),
            last_result: None,
            config,
        })
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Ticks the root with a callback that ignores every message.
    pub fn tick_root(&mut self) -> TickResult {
        self.tick_root_with(&mut |_| None)
    }

    /// Ticks the root once. After a terminal result the root is reset to `Idle`, but
    /// its GeneralStatus stays available until the next tick.
    pub fn tick_root_with(&mut self, arg: BehaviorCallback) -> TickResult {
        let root = self.root();
        match Context::tick_node(&mut self.slots, &self.timers, root, arg) {
            Ok(res) => {
                if res.is_terminal() {
                    Context::halt_node(&mut self.slots, &self.timers, root);
                }
                self.last_result = Some(res);
                Ok(res)
            }
            Err(e) => {
                warn!(error = %e, logic_error = e.is_logic_error(), "tick failed");
                Err(e)
            }
        }
    }

    /// Interrupts every node, cancels every timer and clears all statuses.
    pub fn halt_tree(&mut self) {
        for index in 0..self.slots.len() {
            Context::run_halt_hook(&mut self.slots, &self.timers, NodeId(index));
        }
        for slot in &mut self.slots {
            slot.status = BehaviorResult::Idle;
            slot.general_status = None;
            slot.draft = StatusDraft::default();
        }
        self.last_result = None;
        debug!("tree halted");
    }

    /// The result of the last successful [`Self::tick_root`].
    pub fn last_result(&self) -> Option<BehaviorResult> {
        self.last_result
    }

    pub fn general_status(&self) -> Option<&GeneralStatus> {
        self.node_general_status(self.root())
    }

    pub fn node_general_status(&self, id: NodeId) -> Option<&GeneralStatus> {
        self.slots.get(id.0)?.general_status.as_ref()
    }

    pub fn node_status(&self, id: NodeId) -> Option<BehaviorResult> {
        self.slots.get(id.0).map(|slot| slot.status)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.slots
            .iter()
            .position(|slot| slot.name == name)
            .map(NodeId)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.slots.get(id.0).map(|slot| slot.name.as_str())
    }

    pub fn registration_id(&self, id: NodeId) -> Option<&str> {
        self.slots.get(id.0).map(|slot| slot.registration_id.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots.get(id.0)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slots
            .get(id.0)
            .map(|slot| slot.children.as_slice())
            .unwrap_or_default()
    }

    /// The blackboard of the root scope.
    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboards[0]
    }

    pub fn node_blackboard(&self, id: NodeId) -> Option<&Arc<Blackboard>> {
        self.slots.get(id.0).map(|slot| &slot.blackboard)
    }

    pub fn blackboard_stack(&self) -> &[Arc<Blackboard>] {
        &self.blackboards
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.halt_tree();
    }
}

struct Builder {
    slots: Vec<NodeSlot>,
    blackboards: Vec<Arc<Blackboard>>,
    names: HashSet<String>,
    check_ports: bool,
}

impl Builder {
    fn add(
        &mut self,
        container: BehaviorNodeContainer,
        parent: Option<NodeId>,
        blackboard: Arc<Blackboard>,
    ) -> Result<NodeId, LoadError> {
        let id = NodeId(self.slots.len());
        let BehaviorNodeContainer {
            name,
            registration_id,
            node,
            blackboard_map,
            child_nodes,
            is_subtree,
        } = container;

        let name = if name.is_empty() {
            format!("{}#{}", registration_id, id.0)
        } else {
            name
        };
        if !self.names.insert(name.clone()) {
            return Err(LoadError::DuplicateName(name));
        }

        let ports = node.provided_ports();
        let blackboard = if is_subtree {
            let scope = Blackboard::with_parent(&blackboard);
            for (key, value) in &blackboard_map {
                scope.add_subtree_remapping(*key, value.to_remapping());
            }
            self.blackboards.push(scope.clone());
            scope
        } else {
            self.check_ports(&name, &ports, &blackboard_map, &blackboard)?;
            blackboard
        };

        self.slots.push(NodeSlot {
            name,
            registration_id,
            node: Some(node),
            ports,
            port_map: blackboard_map,
            status: BehaviorResult::Idle,
            general_status: None,
            draft: StatusDraft::default(),
            parent,
            children: vec![],
            blackboard: blackboard.clone(),
        });

        for child in child_nodes {
            let child = self.add(child, Some(id), blackboard.clone())?;
            self.slots[id.0].children.push(child);
        }
        Ok(id)
    }

    fn check_ports(
        &self,
        name: &str,
        ports: &[PortSpec],
        port_map: &BBMap,
        blackboard: &Blackboard,
    ) -> Result<(), LoadError> {
        if self.check_ports {
            for (key, value) in port_map {
                let spec = ports.iter().find(|spec| spec.key == *key).ok_or_else(|| {
                    LoadError::PortUnmatch {
                        node: name.to_owned(),
                        port: key.to_string(),
                    }
                })?;
                if matches!(value, BlackboardValue::Literal(_)) && spec.ty.is_output() {
                    return Err(LoadError::PortIOUnmatch {
                        node: name.to_owned(),
                        port: key.to_string(),
                    });
                }
            }
        }

        for spec in ports {
            let Some(tag) = spec.type_tag else {
                continue;
            };
            let port_error = |source| LoadError::PortType {
                node: name.to_owned(),
                port: spec.key.to_string(),
                source,
            };
            let value = port_map
                .get(&spec.key)
                .cloned()
                .or_else(|| spec.default.as_deref().map(BlackboardValue::parse))
                .unwrap_or(BlackboardValue::Ref(spec.key));
            match value {
                BlackboardValue::Ref(key) => blackboard
                    .add_port_type(key, tag, spec.ty)
                    .map_err(port_error)?,
                BlackboardValue::Literal(_) if spec.ty.is_input() => {
                    let from = TypeTag::of::<String>();
                    if !blackboard.types_converter().is_convertible(from, tag) {
                        return Err(port_error(BlackboardError::IncompatibleTypes {
                            key: spec.key.to_string(),
                            from: from.name(),
                            to: tag.name(),
                        }));
                    }
                }
                BlackboardValue::Literal(_) => (),
            }
        }
        Ok(())
    }
}
