use std::any::Any;
use std::ops::RangeInclusive;
use std::sync::Arc;

use ::once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::{
    error::BehaviorError,
    general_status::{GeneralStatus, StatusCode, StatusDetails},
    timer_queue::{TimerQueue, TimerScheduler},
    tree::{NodeId, NodeSlot},
    BehaviorCallback, BehaviorResult, Blackboard, BlackboardValue, PortSpec, Symbol, TickResult,
};

/// The timer thread of a tree, started on the first request.
pub(crate) struct TimerHost {
    scheduler: OnceCell<TimerScheduler>,
    thread_name: String,
}

impl TimerHost {
    pub(crate) fn new(thread_name: String) -> Self {
        Self {
            scheduler: OnceCell::new(),
            thread_name,
        }
    }

    fn queue(&self) -> Result<TimerQueue, BehaviorError> {
        let scheduler = self
            .scheduler
            .get_or_try_init(|| TimerScheduler::new(&self.thread_name))
            .map_err(|e| BehaviorError::TimerUnavailable(e.to_string()))?;
        Ok(scheduler.queue())
    }
}

/// The view of the tree a node gets while it is ticked or halted.
///
/// Children are addressed by their index in declaration order.
pub struct Context<'a> {
    slots: &'a mut [NodeSlot],
    timers: &'a TimerHost,
    id: NodeId,
}

impl<'a> Context<'a> {
    /// Ticks node `id`, starting a new cycle for it if it is not `Running`.
    ///
    /// A node whose tick returns an error is halted and reset to `Idle`.
    pub(crate) fn tick_node(
        slots: &mut [NodeSlot],
        timers: &TimerHost,
        id: NodeId,
        arg: BehaviorCallback,
    ) -> TickResult {
        let slot = &mut slots[id.index()];
        if slot.status != BehaviorResult::Running {
            slot.general_status = None;
            slot.draft = Default::default();
        }
        let Some(mut node) = slot.node.take() else {
            return Err(BehaviorError::NodeBusy(slot.name.clone()));
        };

        let res = node.tick(
            arg,
            &mut Context {
                slots: &mut *slots,
                timers,
                id,
            },
        );

        let slot = &mut slots[id.index()];
        slot.node = Some(node);
        let res = match res {
            Ok(res) => res,
            Err(e) => {
                // A failed tick leaves no half-started cycle behind.
                Self::run_halt_hook(slots, timers, id);
                let slot = &mut slots[id.index()];
                slot.status = BehaviorResult::Idle;
                slot.general_status = None;
                slot.draft = Default::default();
                debug!(node = %slot.name, error = %e, "tick failed, node halted");
                return Err(e);
            }
        };
        let slot = &mut slots[id.index()];
        match res {
            BehaviorResult::Idle => return Err(BehaviorError::ReturnedIdle(slot.name.clone())),
            BehaviorResult::Success | BehaviorResult::Fail => {
                let draft = std::mem::take(&mut slot.draft);
                slot.general_status = Some(draft.finalize(id.index() as u64, res));
            }
            BehaviorResult::Running => (),
        }
        if slot.status != res {
            trace!(node = %slot.name, from = ?slot.status, to = ?res, "status");
        }
        slot.status = res;
        Ok(res)
    }

    /// Interrupts node `id` if it is `Running`, then resets it to `Idle`. A node
    /// that already finished keeps its GeneralStatus.
    pub(crate) fn halt_node(slots: &mut [NodeSlot], timers: &TimerHost, id: NodeId) {
        if slots[id.index()].status == BehaviorResult::Running {
            Self::run_halt_hook(slots, timers, id);
            let slot = &mut slots[id.index()];
            slot.general_status = None;
            slot.draft = Default::default();
            debug!(node = %slot.name, "halted");
        }
        slots[id.index()].status = BehaviorResult::Idle;
    }

    pub(crate) fn run_halt_hook(slots: &mut [NodeSlot], timers: &TimerHost, id: NodeId) {
        if let Some(mut node) = slots[id.index()].node.take() {
            node.halt(&mut Context {
                slots: &mut *slots,
                timers,
                id,
            });
            slots[id.index()].node = Some(node);
        }
    }

    fn slot(&self) -> &NodeSlot {
        &self.slots[self.id.index()]
    }

    fn slot_mut(&mut self) -> &mut NodeSlot {
        &mut self.slots[self.id.index()]
    }

    fn child_id(&self, index: usize) -> Result<NodeId, BehaviorError> {
        self.slot()
            .children
            .get(index)
            .copied()
            .ok_or_else(|| BehaviorError::MissingChild {
                node: self.slot().name.clone(),
                index,
            })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.slot().name
    }

    /// The status this node ended its previous tick with. `Idle` means the node
    /// starts from scratch.
    pub fn status(&self) -> BehaviorResult {
        self.slot().status
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.slot().blackboard
    }

    pub fn num_children(&self) -> usize {
        self.slot().children.len()
    }

    /// Fails with [`BehaviorError::ChildCount`] unless the number of children is in
    /// `range`.
    pub fn require_children(
        &self,
        range: RangeInclusive<usize>,
        expected: &'static str,
    ) -> Result<(), BehaviorError> {
        let actual = self.num_children();
        if range.contains(&actual) {
            Ok(())
        } else {
            Err(BehaviorError::ChildCount {
                node: self.name().to_owned(),
                expected,
                actual,
            })
        }
    }

    pub fn tick_child(&mut self, index: usize, arg: BehaviorCallback) -> TickResult {
        let child = self.child_id(index)?;
        Self::tick_node(self.slots, self.timers, child, arg)
    }

    /// Halts the child if it is running and resets it to `Idle` either way.
    pub fn halt_child(&mut self, index: usize) {
        if let Ok(child) = self.child_id(index) {
            Self::halt_node(self.slots, self.timers, child);
        }
    }

    pub fn halt_children(&mut self) {
        self.halt_children_from(0);
    }

    pub fn halt_children_from(&mut self, start: usize) {
        for index in start..self.num_children() {
            self.halt_child(index);
        }
    }

    pub fn child_status(&self, index: usize) -> BehaviorResult {
        self.child_id(index)
            .map(|child| self.slots[child.index()].status)
            .unwrap_or_default()
    }

    pub fn child_general_status(&self, index: usize) -> Option<&GeneralStatus> {
        let child = self.child_id(index).ok()?;
        self.slots[child.index()].general_status.as_ref()
    }

    /// Nests a copy of the child's GeneralStatus into this node's record.
    pub fn nest_child_status(&mut self, index: usize) {
        if let Some(status) = self.child_general_status(index).cloned() {
            self.slot_mut().draft.nest(status);
        }
    }

    /// Makes the child's GeneralStatus the one that decides this node's code and
    /// details. Its record is merged into this node's instead of nested; a record
    /// adopted earlier in the cycle is nested.
    pub fn adopt_child_status(&mut self, index: usize) {
        if let Some(status) = self.child_general_status(index).cloned() {
            self.slot_mut().draft.adopt(status);
        }
    }

    /// Counts the child towards the multiple failures rule.
    pub fn note_child_failure(&mut self, index: usize) {
        if let Some(status) = self.child_general_status(index).cloned() {
            self.slot_mut().draft.note_failure(status);
        }
    }

    pub fn nest_status(&mut self, status: GeneralStatus) {
        self.slot_mut().draft.nest(status);
    }

    pub fn adopt_status(&mut self, status: GeneralStatus) {
        self.slot_mut().draft.adopt(status);
    }

    /// Overrides the code this node reports when it finishes the current cycle.
    pub fn set_status_code(&mut self, code: StatusCode) {
        self.slot_mut().draft.set_code(code);
    }

    pub fn status_details_mut(&mut self) -> &mut StatusDetails {
        self.slot_mut().draft.details_mut()
    }

    fn port_spec(&self, port: Symbol) -> Result<&PortSpec, BehaviorError> {
        self.slot()
            .ports
            .iter()
            .find(|spec| spec.key == port)
            .ok_or_else(|| BehaviorError::UndeclaredPort {
                node: self.name().to_owned(),
                port,
            })
    }

    fn resolve_port(&self, port: Symbol, spec: &PortSpec) -> BlackboardValue {
        match self.slot().port_map.get(&port) {
            Some(value) => value.clone(),
            None => spec
                .default
                .as_deref()
                .map(BlackboardValue::parse)
                .unwrap_or(BlackboardValue::Ref(port)),
        }
    }

    /// Reads an input port as `T`.
    pub fn get_input<T: Any + Clone>(&self, port: impl Into<Symbol>) -> Result<T, BehaviorError> {
        let port = port.into();
        let spec = self.port_spec(port)?;
        if !spec.ty.is_input() {
            return Err(BehaviorError::PortDirection {
                node: self.name().to_owned(),
                port,
            });
        }
        let blackboard = self.blackboard();
        Ok(match self.resolve_port(port, spec) {
            BlackboardValue::Literal(text) => blackboard.types_converter().convert_literal(&text)?,
            BlackboardValue::Ref(key) => blackboard.get(key)?,
        })
    }

    /// Like [`Self::get_input`], but a port that holds no value yet is `None`.
    /// Logic errors still propagate.
    pub fn get_input_opt<T: Any + Clone>(
        &self,
        port: impl Into<Symbol>,
    ) -> Result<Option<T>, BehaviorError> {
        match self.get_input(port) {
            Ok(value) => Ok(Some(value)),
            Err(BehaviorError::Blackboard(crate::BlackboardError::KeyNotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes `value` through an output port.
    pub fn set_output<T: Any + Send + Sync>(
        &self,
        port: impl Into<Symbol>,
        value: T,
    ) -> Result<(), BehaviorError> {
        let port = port.into();
        let spec = self.port_spec(port)?;
        if !spec.ty.is_output() {
            return Err(BehaviorError::PortDirection {
                node: self.name().to_owned(),
                port,
            });
        }
        match self.resolve_port(port, spec) {
            BlackboardValue::Literal(literal) => Err(crate::BlackboardError::WriteToLiteral {
                key: port.to_string(),
                literal,
            }
            .into()),
            BlackboardValue::Ref(key) => Ok(self.blackboard().set(key, value)?),
        }
    }

    /// A handle onto the tree's timer thread, which is started on first use.
    pub fn timer_queue(&self) -> Result<TimerQueue, BehaviorError> {
        self.timers.queue()
    }
}
