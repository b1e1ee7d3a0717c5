mod control;
mod decorator;

use std::time::{Duration, Instant};

use crate::{
    BehaviorCallback, BehaviorNode, BehaviorResult, Context, Lazy, NumChildren, PortSpec, Symbol,
    TickResult,
};

pub use self::control::{
    FallbackNode, IfThenElseNode, ParallelNode, ReactiveFallbackNode, ReactiveSequenceNode,
    SequenceNode, SequenceStarNode, SwitchNode, WhileDoElseNode,
};
pub use self::decorator::{
    BlackboardPreconditionNode, CooldownNode, DelayNode, ForceFailureNode, ForceSuccessNode,
    InverterNode, KeepRunningUntilFailureNode, LoopNode, OnlyOnceNode, RepeatNode, RetryNode,
    TimeoutNode,
};

pub(crate) static MSEC: Lazy<Symbol> = Lazy::new(|| "msec".into());

/// Whether two port values are equal as text, or as numbers when both parse.
fn values_match(lhs: &str, rhs: &str) -> bool {
    let (lhs, rhs) = (lhs.trim(), rhs.trim());
    if lhs == rhs {
        return true;
    }
    match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        (Ok(lhs), Ok(rhs)) => lhs == rhs,
        _ => false,
    }
}

/// Ticks the only child and hands its outcome up unchanged. Used by
/// single child pass-through nodes.
fn tick_through(arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
    let res = ctx.tick_child(0, arg)?;
    if res.is_terminal() {
        ctx.adopt_child_status(0);
        ctx.halt_child(0);
    }
    Ok(res)
}

/// SubtreeNode is the root of a subtree, introducing a local namescope of blackboard variables.
///
/// The scope itself is set up by the tree from the remapping of the
/// [`crate::BehaviorNodeContainer::new_subtree`] container; ticking is a pass-through.
#[derive(Default)]
pub struct SubtreeNode;

impl BehaviorNode for SubtreeNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        ctx.require_children(1..=1, "exactly 1")?;
        tick_through(arg, ctx)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

#[derive(Default)]
pub struct AlwaysSuccessNode;

impl BehaviorNode for AlwaysSuccessNode {
    fn tick(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        Ok(BehaviorResult::Success)
    }
}

#[derive(Default)]
pub struct AlwaysFailureNode;

impl BehaviorNode for AlwaysFailureNode {
    fn tick(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        Ok(BehaviorResult::Fail)
    }
}

/// Reports `Running` until `msec` milliseconds passed since its first tick.
#[derive(Default)]
pub struct WaitNode {
    deadline: Option<Instant>,
}

impl BehaviorNode for WaitNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in(*MSEC).typed::<u64>()]
    }

    fn tick(&mut self, _arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => {
                let msec: u64 = ctx.get_input(*MSEC)?;
                *self
                    .deadline
                    .insert(Instant::now() + Duration::from_millis(msec))
            }
        };
        if Instant::now() < deadline {
            return Ok(BehaviorResult::Running);
        }
        self.deadline = None;
        Ok(BehaviorResult::Success)
    }

    fn halt(&mut self, _ctx: &mut Context) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod test;
