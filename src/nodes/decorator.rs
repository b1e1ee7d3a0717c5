//! Nodes that wrap a single child.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{values_match, MSEC};
use crate::{
    error::BehaviorError, general_status::GeneralStatus, timer_queue::TimerQueue,
    BehaviorCallback, BehaviorNode, BehaviorResult, Context, Lazy, NumChildren, PortSpec, Symbol,
    TickResult,
};

/// Ticks the only child and, once it finishes, records its status and replaces
/// the result with `map(result)`.
fn tick_mapped(
    arg: BehaviorCallback,
    ctx: &mut Context,
    map: impl Fn(BehaviorResult) -> BehaviorResult,
) -> TickResult {
    let res = ctx.tick_child(0, arg)?;
    if !res.is_terminal() {
        return Ok(res);
    }
    ctx.adopt_child_status(0);
    ctx.halt_child(0);
    Ok(map(res))
}

#[derive(Default)]
pub struct InverterNode;

impl BehaviorNode for InverterNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        tick_mapped(arg, ctx, |res| match res {
            BehaviorResult::Success => BehaviorResult::Fail,
            _ => BehaviorResult::Success,
        })
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

#[derive(Default)]
pub struct ForceSuccessNode;

impl BehaviorNode for ForceSuccessNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        tick_mapped(arg, ctx, |_| BehaviorResult::Success)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

#[derive(Default)]
pub struct ForceFailureNode;

impl BehaviorNode for ForceFailureNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        tick_mapped(arg, ctx, |_| BehaviorResult::Fail)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

pub(crate) static NUM_ATTEMPTS: Lazy<Symbol> = Lazy::new(|| "num_attempts".into());

/// Ticks the child again after a failure, up to `num_attempts` attempts in
/// total. A negative `num_attempts` retries forever.
///
/// Every failed attempt before the last one is nested in the status of the node.
/// On eventual success the node reports `OK` no matter how many attempts failed
/// before.
#[derive(Default)]
pub struct RetryNode {
    failed_attempts: i64,
}

impl BehaviorNode for RetryNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in(*NUM_ATTEMPTS).typed::<i64>()]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        let num_attempts: i64 = ctx.get_input(*NUM_ATTEMPTS)?;

        while num_attempts < 0 || self.failed_attempts < num_attempts {
            let res = ctx.tick_child(0, arg)?;
            match res {
                BehaviorResult::Running => return Ok(res),
                BehaviorResult::Success => {
                    ctx.adopt_child_status(0);
                    ctx.halt_child(0);
                    self.failed_attempts = 0;
                    return Ok(res);
                }
                _ => {
                    ctx.adopt_child_status(0);
                    ctx.halt_child(0);
                    self.failed_attempts += 1;
                }
            }
        }
        debug!(node = ctx.name(), num_attempts, "out of attempts");
        self.failed_attempts = 0;
        Ok(BehaviorResult::Fail)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.failed_attempts = 0;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

pub(crate) static NUM_CYCLES: Lazy<Symbol> = Lazy::new(|| "num_cycles".into());

/// Ticks the child until it succeeded `num_cycles` times, failing as soon as
/// it fails once.
///
/// With a negative `num_cycles` the node repeats forever, reporting `Running`
/// after each success instead of re-ticking the child within the same tick.
#[derive(Default)]
pub struct RepeatNode {
    completed_cycles: i64,
}

impl BehaviorNode for RepeatNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in(*NUM_CYCLES).typed::<i64>()]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        let num_cycles: i64 = ctx.get_input(*NUM_CYCLES)?;

        while num_cycles < 0 || self.completed_cycles < num_cycles {
            let res = ctx.tick_child(0, arg)?;
            match res {
                BehaviorResult::Running => return Ok(res),
                BehaviorResult::Success => {
                    ctx.adopt_child_status(0);
                    ctx.halt_child(0);
                    self.completed_cycles += 1;
                    if num_cycles < 0 {
                        return Ok(BehaviorResult::Running);
                    }
                }
                _ => {
                    ctx.adopt_child_status(0);
                    ctx.halt_child(0);
                    self.completed_cycles = 0;
                    return Ok(res);
                }
            }
        }
        self.completed_cycles = 0;
        Ok(BehaviorResult::Success)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.completed_cycles = 0;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Restarts the child each time it succeeds and keeps reporting `Running` until
/// it fails.
#[derive(Default)]
pub struct KeepRunningUntilFailureNode;

impl BehaviorNode for KeepRunningUntilFailureNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        let res = ctx.tick_child(0, arg)?;
        match res {
            BehaviorResult::Running => Ok(res),
            BehaviorResult::Success => {
                ctx.adopt_child_status(0);
                ctx.halt_child(0);
                Ok(BehaviorResult::Running)
            }
            _ => {
                ctx.adopt_child_status(0);
                ctx.halt_child(0);
                Ok(res)
            }
        }
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Returns the timer queue of a node, creating it on first use.
fn timer_queue<'q>(
    timers: &'q mut Option<TimerQueue>,
    ctx: &Context,
) -> Result<&'q TimerQueue, BehaviorError> {
    let queue = match timers.take() {
        Some(queue) => queue,
        None => ctx.timer_queue()?,
    };
    Ok(timers.insert(queue))
}

/// Fails and halts the child if it is still running `msec` milliseconds after
/// the first tick of the cycle. A `msec` of 0 never times out.
#[derive(Default)]
pub struct TimeoutNode {
    timers: Option<TimerQueue>,
    expired: Arc<AtomicBool>,
    started: bool,
}

impl TimeoutNode {
    fn reset(&mut self) {
        self.started = false;
        if let Some(timers) = &self.timers {
            timers.cancel_all();
        }
        self.expired.store(false, Ordering::SeqCst);
    }
}

impl BehaviorNode for TimeoutNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in(*MSEC).typed::<u64>()]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        if !self.started {
            let msec: u64 = ctx.get_input(*MSEC)?;
            self.expired.store(false, Ordering::SeqCst);
            if msec > 0 {
                let expired = self.expired.clone();
                timer_queue(&mut self.timers, ctx)?.add(
                    Duration::from_millis(msec),
                    move |cancelled| {
                        if !cancelled {
                            expired.store(true, Ordering::SeqCst);
                        }
                    },
                );
            }
            self.started = true;
        }

        if self.expired.load(Ordering::SeqCst) {
            debug!(node = ctx.name(), "timed out");
            self.reset();
            ctx.halt_child(0);
            return Ok(BehaviorResult::Fail);
        }

        let res = ctx.tick_child(0, arg)?;
        if res.is_terminal() {
            self.reset();
            ctx.adopt_child_status(0);
            ctx.halt_child(0);
        }
        Ok(res)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.reset();
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

pub(crate) static DELAY_MSEC: Lazy<Symbol> = Lazy::new(|| "delay_msec".into());

/// Reports `Running` for `delay_msec` milliseconds after the first tick of the
/// cycle, then ticks the child until it finishes.
#[derive(Default)]
pub struct DelayNode {
    timers: Option<TimerQueue>,
    elapsed: Arc<AtomicBool>,
    started: bool,
}

impl DelayNode {
    fn reset(&mut self) {
        self.started = false;
        if let Some(timers) = &self.timers {
            timers.cancel_all();
        }
        self.elapsed.store(false, Ordering::SeqCst);
    }
}

impl BehaviorNode for DelayNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in(*DELAY_MSEC).typed::<u64>()]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        if !self.started {
            let msec: u64 = ctx.get_input(*DELAY_MSEC)?;
            if msec == 0 {
                self.elapsed.store(true, Ordering::SeqCst);
            } else {
                self.elapsed.store(false, Ordering::SeqCst);
                let elapsed = self.elapsed.clone();
                timer_queue(&mut self.timers, ctx)?.add(
                    Duration::from_millis(msec),
                    move |cancelled| {
                        if !cancelled {
                            elapsed.store(true, Ordering::SeqCst);
                        }
                    },
                );
            }
            self.started = true;
        }

        if !self.elapsed.load(Ordering::SeqCst) {
            return Ok(BehaviorResult::Running);
        }

        let res = ctx.tick_child(0, arg)?;
        if res.is_terminal() {
            self.reset();
            ctx.adopt_child_status(0);
            ctx.halt_child(0);
        }
        Ok(res)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.reset();
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

pub(crate) static COOLDOWN: Lazy<Symbol> = Lazy::new(|| "cooldown".into());

/// After the child finishes, reports the same result for `cooldown`
/// milliseconds without ticking the child.
#[derive(Default)]
pub struct CooldownNode {
    timers: Option<TimerQueue>,
    in_cooldown: Arc<AtomicBool>,
    last: Option<(BehaviorResult, Option<GeneralStatus>)>,
}

impl BehaviorNode for CooldownNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::new_in(*COOLDOWN).typed::<u64>()]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        if self.in_cooldown.load(Ordering::SeqCst) {
            if let Some((res, status)) = &self.last {
                if let Some(status) = status {
                    ctx.adopt_status(status.clone());
                }
                return Ok(*res);
            }
        }

        let cooldown: u64 = ctx.get_input(*COOLDOWN)?;
        let res = ctx.tick_child(0, arg)?;
        if !res.is_terminal() {
            return Ok(res);
        }

        let status = ctx.child_general_status(0).cloned();
        ctx.adopt_child_status(0);
        ctx.halt_child(0);
        self.last = Some((res, status));

        self.in_cooldown.store(true, Ordering::SeqCst);
        let in_cooldown = self.in_cooldown.clone();
        timer_queue(&mut self.timers, ctx)?.add(Duration::from_millis(cooldown), move |_| {
            in_cooldown.store(false, Ordering::SeqCst);
        });
        debug!(node = ctx.name(), cooldown, "cooling down");
        Ok(res)
    }

    fn halt(&mut self, ctx: &mut Context) {
        if let Some(timers) = &self.timers {
            timers.cancel_all();
        }
        self.in_cooldown.store(false, Ordering::SeqCst);
        self.last = None;
        ctx.halt_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

pub(crate) static VALUE_A: Lazy<Symbol> = Lazy::new(|| "value_A".into());
pub(crate) static VALUE_B: Lazy<Symbol> = Lazy::new(|| "value_B".into());
pub(crate) static RETURN_ON_MISMATCH: Lazy<Symbol> = Lazy::new(|| "return_on_mismatch".into());

/// Ticks the child only while `value_A` equals `value_B`. Otherwise halts the
/// child and reports `return_on_mismatch`, `FAILURE` by default.
///
/// Values are compared as text, or as numbers when both parse as one.
#[derive(Default)]
pub struct BlackboardPreconditionNode;

impl BehaviorNode for BlackboardPreconditionNode {
    fn provided_ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new_in(*VALUE_A).typed::<String>(),
            PortSpec::new_in(*VALUE_B).typed::<String>(),
            PortSpec::new_in(*RETURN_ON_MISMATCH)
                .typed::<String>()
                .with_default("FAILURE"),
        ]
    }

    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        let value_a: String = ctx.get_input(*VALUE_A)?;
        let value_b: String = ctx.get_input(*VALUE_B)?;
        if values_match(&value_a, &value_b) {
            return super::tick_through(arg, ctx);
        }

        let on_mismatch: String = ctx.get_input(*RETURN_ON_MISMATCH)?;
        let res = on_mismatch
            .parse::<BehaviorResult>()
            .ok()
            .filter(|res| *res != BehaviorResult::Idle)
            .ok_or_else(|| BehaviorError::InvalidPortValue {
                node: ctx.name().to_owned(),
                port: *RETURN_ON_MISMATCH,
                reason: format!("{:?} is not a result to report", on_mismatch),
            })?;
        debug!(node = ctx.name(), %value_a, %value_b, ?res, "precondition not met");
        ctx.halt_children();
        Ok(res)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Ticks the child until it finishes once. From then on the node reports the same
/// result and GeneralStatus without ticking the child, even across halts.
#[derive(Default)]
pub struct OnlyOnceNode {
    finished: Option<(BehaviorResult, Option<GeneralStatus>)>,
}

impl BehaviorNode for OnlyOnceNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        if let Some((res, status)) = &self.finished {
            if let Some(status) = status {
                ctx.adopt_status(status.clone());
            }
            return Ok(*res);
        }

        let res = ctx.tick_child(0, arg)?;
        if res.is_terminal() {
            let status = ctx.child_general_status(0).cloned();
            ctx.adopt_child_status(0);
            ctx.halt_child(0);
            self.finished = Some((res, status));
        }
        Ok(res)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Ticks the child forever, restarting it whenever it finishes. Always reports
/// `Running`.
#[derive(Default)]
pub struct LoopNode;

impl BehaviorNode for LoopNode {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        if ctx.tick_child(0, arg)?.is_terminal() {
            ctx.halt_child(0);
        }
        Ok(BehaviorResult::Running)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}
