//! Nodes that orchestrate several children.

use super::values_match;
use crate::{
    error::BehaviorError, BehaviorCallback, BehaviorNode, BehaviorResult, Context, Lazy,
    NumChildren, PortSpec, Symbol, TickResult,
};

/// Ticks children in order until one fails. A running child is resumed on the next
/// tick without re-ticking the ones before it.
///
/// The last child ticked decides the GeneralStatus; the ones before it are nested.
#[derive(Default)]
pub struct SequenceNode {
    current_child: usize,
}

impl BehaviorNode for SequenceNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        while self.current_child < ctx.num_children() {
            let i = self.current_child;
            match ctx.tick_child(i, arg)? {
                BehaviorResult::Running => return Ok(BehaviorResult::Running),
                BehaviorResult::Fail => {
                    ctx.adopt_child_status(i);
                    ctx.halt_children();
                    self.current_child = 0;
                    return Ok(BehaviorResult::Fail);
                }
                _ => {
                    ctx.adopt_child_status(i);
                    self.current_child += 1;
                }
            }
        }
        ctx.halt_children();
        self.current_child = 0;
        Ok(BehaviorResult::Success)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.current_child = 0;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// A sequence that, after a failure, resumes from the failed child on the next
/// tick instead of starting over.
#[derive(Default)]
pub struct SequenceStarNode {
    current_child: usize,
}

impl BehaviorNode for SequenceStarNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        while self.current_child < ctx.num_children() {
            let i = self.current_child;
            match ctx.tick_child(i, arg)? {
                BehaviorResult::Running => return Ok(BehaviorResult::Running),
                BehaviorResult::Fail => {
                    // Neither the index nor the failed child is reset.
                    ctx.adopt_child_status(i);
                    return Ok(BehaviorResult::Fail);
                }
                _ => {
                    ctx.adopt_child_status(i);
                    self.current_child += 1;
                }
            }
        }
        ctx.halt_children();
        self.current_child = 0;
        Ok(BehaviorResult::Success)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.current_child = 0;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// Ticks children in order until one succeeds.
#[derive(Default)]
pub struct FallbackNode {
    current_child: usize,
}

impl BehaviorNode for FallbackNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        while self.current_child < ctx.num_children() {
            let i = self.current_child;
            match ctx.tick_child(i, arg)? {
                BehaviorResult::Running => return Ok(BehaviorResult::Running),
                BehaviorResult::Success => {
                    ctx.adopt_child_status(i);
                    ctx.halt_children();
                    self.current_child = 0;
                    return Ok(BehaviorResult::Success);
                }
                _ => {
                    ctx.adopt_child_status(i);
                    self.current_child += 1;
                }
            }
        }
        ctx.halt_children();
        self.current_child = 0;
        Ok(BehaviorResult::Fail)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.current_child = 0;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// Shared body of the reactive sequence and fallback. Every tick starts from the
/// first child; `stop_on` is the result that ends the node early.
fn tick_reactive(
    arg: BehaviorCallback,
    ctx: &mut Context,
    stop_on: BehaviorResult,
) -> TickResult {
    let num_children = ctx.num_children();
    for i in 0..num_children {
        match ctx.tick_child(i, arg)? {
            BehaviorResult::Running => {
                // Children after a running one must not keep running.
                ctx.halt_children_from(i + 1);
                return Ok(BehaviorResult::Running);
            }
            res if res == stop_on => {
                for j in 0..i {
                    ctx.nest_child_status(j);
                }
                ctx.adopt_child_status(i);
                ctx.halt_children();
                return Ok(res);
            }
            _ => (),
        }
    }
    // The last child ends up adopted, the others nested.
    for j in 0..num_children {
        ctx.adopt_child_status(j);
    }
    ctx.halt_children();
    Ok(match stop_on {
        BehaviorResult::Fail => BehaviorResult::Success,
        _ => BehaviorResult::Fail,
    })
}

/// A sequence that re-evaluates every child from the first one on each tick.
#[derive(Default)]
pub struct ReactiveSequenceNode;

impl BehaviorNode for ReactiveSequenceNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        tick_reactive(arg, ctx, BehaviorResult::Fail)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// A fallback that re-evaluates every child from the first one on each tick.
#[derive(Default)]
pub struct ReactiveFallbackNode;

impl BehaviorNode for ReactiveFallbackNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        tick_reactive(arg, ctx, BehaviorResult::Success)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

pub(crate) static SUCCESS_THRESHOLD: Lazy<Symbol> = Lazy::new(|| "success_threshold".into());
pub(crate) static FAILURE_THRESHOLD: Lazy<Symbol> = Lazy::new(|| "failure_threshold".into());

/// Ticks every child that has not finished yet, on every tick.
///
/// A negative threshold counts from the number of children, so `-1` means all of
/// them. The node fails as soon as the failure threshold is reached or the success
/// threshold can no longer be reached.
#[derive(Default)]
pub struct ParallelNode {
    completed: Vec<BehaviorResult>,
}

impl ParallelNode {
    fn threshold(ctx: &Context, port: Symbol) -> Result<usize, BehaviorError> {
        let num_children = ctx.num_children() as i64;
        let value: i64 = ctx.get_input(port)?;
        let resolved = if value < 0 {
            num_children + value + 1
        } else {
            value
        };
        if resolved < 0 || resolved > num_children {
            return Err(BehaviorError::InvalidPortValue {
                node: ctx.name().to_owned(),
                port,
                reason: format!(
                    "threshold {} does not fit {} children",
                    value, num_children
                ),
            });
        }
        Ok(resolved as usize)
    }

    /// Nests every finished child but the deciding one. A failed node is decided by
    /// its first-declared failing child.
    fn finish(&mut self, ctx: &mut Context, res: BehaviorResult) -> TickResult {
        let decider = match res {
            BehaviorResult::Fail => self
                .completed
                .iter()
                .position(|completed| *completed == BehaviorResult::Fail),
            _ => None,
        };
        for (i, completed) in self.completed.iter().enumerate() {
            if *completed == BehaviorResult::Fail {
                ctx.note_child_failure(i);
            }
            if Some(i) == decider {
                ctx.adopt_child_status(i);
            } else if completed.is_terminal() {
                ctx.nest_child_status(i);
            }
        }
        ctx.halt_children();
        self.completed.clear();
        Ok(res)
    }
}

impl BehaviorNode for ParallelNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in(*SUCCESS_THRESHOLD)
                .typed::<i64>()
                .with_default("-1"),
            PortSpec::new_in(*FAILURE_THRESHOLD)
                .typed::<i64>()
                .with_default("1"),
        ]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        let num_children = ctx.num_children();
        let success_threshold = Self::threshold(ctx, *SUCCESS_THRESHOLD)?;
        let failure_threshold = Self::threshold(ctx, *FAILURE_THRESHOLD)?;
        self.completed.resize(num_children, BehaviorResult::Idle);

        for i in 0..num_children {
            if self.completed[i].is_terminal() {
                continue;
            }
            let res = ctx.tick_child(i, arg)?;
            if !res.is_terminal() {
                continue;
            }
            self.completed[i] = res;

            let count = |wanted| self.completed.iter().filter(|r| **r == wanted).count();
            let successes = count(BehaviorResult::Success);
            let failures = count(BehaviorResult::Fail);
            if successes >= success_threshold {
                return self.finish(ctx, BehaviorResult::Success);
            }
            if failures >= failure_threshold || num_children - failures < success_threshold {
                return self.finish(ctx, BehaviorResult::Fail);
            }
        }
        Ok(BehaviorResult::Running)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.completed.clear();
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

pub(crate) static VARIABLE: Lazy<Symbol> = Lazy::new(|| "variable".into());

/// Ticks the child whose `case_<i>` port equals `variable`, or the last child if
/// none does or `variable` is not set. Expects `N + 1` children.
pub struct SwitchNode<const N: usize> {
    cases: Vec<Symbol>,
    running_child: Option<usize>,
}

impl<const N: usize> Default for SwitchNode<N> {
    fn default() -> Self {
        Self {
            cases: (1..=N).map(|i| format!("case_{}", i).into()).collect(),
            running_child: None,
        }
    }
}

impl<const N: usize> SwitchNode<N> {
    fn select(&self, ctx: &Context) -> Result<usize, BehaviorError> {
        let Some(variable) = ctx.get_input_opt::<String>(*VARIABLE)? else {
            return Ok(N);
        };
        for (i, case) in self.cases.iter().enumerate() {
            if let Some(case) = ctx.get_input_opt::<String>(*case)? {
                if values_match(&variable, &case) {
                    return Ok(i);
                }
            }
        }
        Ok(N)
    }
}

impl<const N: usize> BehaviorNode for SwitchNode<N> {
    fn provided_ports(&self) -> Vec<PortSpec> {
        std::iter::once(*VARIABLE)
            .chain(self.cases.iter().copied())
            .map(|key| PortSpec::new_in(key).typed::<String>())
            .collect()
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        ctx.require_children(N + 1..=N + 1, "one per case plus a default")?;
        let selected = self.select(ctx)?;

        if let Some(running) = self.running_child.filter(|running| *running != selected) {
            ctx.halt_child(running);
        }

        let res = ctx.tick_child(selected, arg)?;
        if res == BehaviorResult::Running {
            self.running_child = Some(selected);
        } else {
            ctx.adopt_child_status(selected);
            ctx.halt_children();
            self.running_child = None;
        }
        Ok(res)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.running_child = None;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(N + 1)
    }
}

/// `if` with an optional `else`: the first child is the condition, the second the
/// `then` branch and the optional third the `else` branch.
///
/// The branch is chosen once per cycle; the condition is not re-evaluated while the
/// branch is running. Without an `else` branch a failed condition fails the node.
#[derive(Default)]
pub struct IfThenElseNode {
    child_idx: usize,
}

impl BehaviorNode for IfThenElseNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        ctx.require_children(2..=3, "2 or 3")?;

        if self.child_idx == 0 {
            match ctx.tick_child(0, arg)? {
                BehaviorResult::Running => return Ok(BehaviorResult::Running),
                BehaviorResult::Success => self.child_idx = 1,
                _ if ctx.num_children() == 3 => self.child_idx = 2,
                _ => {
                    ctx.nest_child_status(0);
                    ctx.halt_children();
                    return Ok(BehaviorResult::Fail);
                }
            }
            ctx.nest_child_status(0);
        }

        let res = ctx.tick_child(self.child_idx, arg)?;
        if res.is_terminal() {
            ctx.adopt_child_status(self.child_idx);
            ctx.halt_children();
            self.child_idx = 0;
        }
        Ok(res)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.child_idx = 0;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(3)
    }
}

/// Like [`IfThenElseNode`] with exactly three children, but the condition is
/// re-evaluated on every tick and the branch not taken is halted right away.
#[derive(Default)]
pub struct WhileDoElseNode;

impl BehaviorNode for WhileDoElseNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        ctx.require_children(3..=3, "exactly 3")?;

        let (run, halt) = match ctx.tick_child(0, arg)? {
            BehaviorResult::Running => return Ok(BehaviorResult::Running),
            BehaviorResult::Success => (1, 2),
            _ => (2, 1),
        };
        ctx.halt_child(halt);

        let res = ctx.tick_child(run, arg)?;
        if res.is_terminal() {
            ctx.nest_child_status(0);
            ctx.adopt_child_status(run);
            ctx.halt_children();
        }
        Ok(res)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(3)
    }
}
