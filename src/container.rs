use crate::{
    error::{AddChildError, AddChildResult},
    nodes::SubtreeNode,
    BBMap, BehaviorNode, BlackboardValue, NumChildren, PortSpec, Symbol,
};

/// Build-time description of a node and its descendants, flattened into a
/// [`crate::Tree`] by [`crate::Tree::new`].
pub struct BehaviorNodeContainer {
    /// Instance name, unique within a tree. Filled in by the tree if left empty.
    pub(crate) name: String,
    /// Name of the type of the node
    pub(crate) registration_id: String,
    pub(crate) node: Box<dyn BehaviorNode>,
    pub(crate) blackboard_map: BBMap,
    pub(crate) child_nodes: Vec<BehaviorNodeContainer>,
    pub(crate) is_subtree: bool,
}

fn short_type_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

impl BehaviorNodeContainer {
    pub fn new(node: Box<dyn BehaviorNode>, blackboard_map: BBMap) -> Self {
        Self {
            name: "".to_owned(),
            registration_id: "Node".to_owned(),
            node,
            blackboard_map,
            child_nodes: vec![],
            is_subtree: false,
        }
    }

    pub fn new_node<T: BehaviorNode + 'static>(node: T) -> Self {
        let mut ret = Self::new(Box::new(node), BBMap::new());
        ret.registration_id = short_type_name::<T>().to_owned();
        ret
    }

    /// Wraps `root` in a subtree with its own blackboard scope. Each entry of
    /// `remapping` maps a key of the new scope to a key of the enclosing scope
    /// (`{key}`) or to a literal.
    pub fn new_subtree(root: BehaviorNodeContainer, remapping: BBMap) -> Self {
        Self {
            name: "".to_owned(),
            registration_id: "SubTree".to_owned(),
            node: Box::new(SubtreeNode),
            blackboard_map: remapping,
            child_nodes: vec![root],
            is_subtree: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_registration_id(mut self, registration_id: impl Into<String>) -> Self {
        self.registration_id = registration_id.into();
        self
    }

    pub fn add_child(&mut self, child: BehaviorNodeContainer) -> AddChildResult {
        if NumChildren::Finite(self.child_nodes.len()) < self.node.max_children() {
            self.child_nodes.push(child);
            Ok(())
        } else {
            Err(AddChildError::TooManyNodes)
        }
    }

    pub fn children(&self) -> &[BehaviorNodeContainer] {
        &self.child_nodes
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    pub fn blackboard_map(&self) -> &BBMap {
        &self.blackboard_map
    }

    pub fn provided_ports(&self) -> Vec<PortSpec> {
        self.node.provided_ports()
    }

    /// Port mappings paired with the declaration of the port, skipping undeclared ones.
    pub fn port_map(&self) -> impl Iterator<Item = (PortSpec, BlackboardValue)> + '_ {
        self.node.provided_ports().into_iter().filter_map(move |port| {
            self.blackboard_map
                .get(&port.key)
                .map(|mapped| (port.clone(), mapped.clone()))
        })
    }

    pub fn mapped(&self, port: impl Into<Symbol>) -> Option<&BlackboardValue> {
        self.blackboard_map.get(&port.into())
    }

    pub fn is_subtree(&self) -> bool {
        self.is_subtree
    }
}
