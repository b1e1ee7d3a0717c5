use super::*;
use crate::{
    codes, error::BehaviorError, hash_map, BBMap, BehaviorNodeContainer, Blackboard, NodeId,
    StatusCode, Tree,
};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Append<const V: bool = true>;

impl<const V: bool> BehaviorNode for Append<V> {
    fn tick(&mut self, arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        arg(&V);
        Ok(BehaviorResult::Success)
    }
}

struct AppendAndFail<const V: bool = true>;

impl<const V: bool> BehaviorNode for AppendAndFail<V> {
    fn tick(&mut self, arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        arg(&V);
        Ok(BehaviorResult::Fail)
    }
}

struct Suspend;

impl BehaviorNode for Suspend {
    fn tick(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        Ok(BehaviorResult::Running)
    }
}

/// Reports its label through the callback, then plays the next step of its
/// script. The last step repeats forever.
struct Scripted {
    label: &'static str,
    steps: Vec<(BehaviorResult, StatusCode)>,
    next: usize,
}

impl Scripted {
    fn new(label: &'static str, steps: &[(BehaviorResult, StatusCode)]) -> Self {
        Self {
            label,
            steps: steps.to_vec(),
            next: 0,
        }
    }
}

impl BehaviorNode for Scripted {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        arg(&self.label);
        let (res, code) = self.steps[self.next.min(self.steps.len() - 1)];
        self.next += 1;
        if res.is_terminal() {
            ctx.set_status_code(code);
        }
        Ok(res)
    }
}

/// Runs for one tick, then finishes with the given result.
struct Delayed {
    label: &'static str,
    result: BehaviorResult,
}

impl BehaviorNode for Delayed {
    fn tick(&mut self, arg: BehaviorCallback, ctx: &mut Context) -> TickResult {
        arg(&self.label);
        if ctx.status() == BehaviorResult::Idle {
            return Ok(BehaviorResult::Running);
        }
        Ok(self.result)
    }
}

/// Runs forever and counts how often it was halted.
struct Busy(Arc<AtomicUsize>);

impl BehaviorNode for Busy {
    fn tick(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        Ok(BehaviorResult::Running)
    }

    fn halt(&mut self, _ctx: &mut Context) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

struct ReturnIdle;

impl BehaviorNode for ReturnIdle {
    fn tick(&mut self, _arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        Ok(BehaviorResult::Idle)
    }
}

/// Plays its script like [`Scripted`], where `None` is a tick that errors.
struct Erratic {
    label: &'static str,
    steps: Vec<Option<BehaviorResult>>,
    next: usize,
}

impl Erratic {
    fn new(label: &'static str, steps: &[Option<BehaviorResult>]) -> Self {
        Self {
            label,
            steps: steps.to_vec(),
            next: 0,
        }
    }
}

impl BehaviorNode for Erratic {
    fn tick(&mut self, arg: BehaviorCallback, _ctx: &mut Context) -> TickResult {
        arg(&self.label);
        let step = self.steps[self.next.min(self.steps.len() - 1)];
        self.next += 1;
        step.ok_or_else(|| crate::BlackboardError::KeyNotFound("sensor".to_owned()).into())
    }
}

const SUCCESS: BehaviorResult = BehaviorResult::Success;
const FAIL: BehaviorResult = BehaviorResult::Fail;

fn node(node: impl BehaviorNode + 'static) -> BehaviorNodeContainer {
    BehaviorNodeContainer::new_node(node)
}

fn mapped(node: impl BehaviorNode + 'static, port_map: BBMap) -> BehaviorNodeContainer {
    BehaviorNodeContainer::new(Box::new(node), port_map)
}

fn with_children(
    mut parent: BehaviorNodeContainer,
    children: impl IntoIterator<Item = BehaviorNodeContainer>,
) -> BehaviorNodeContainer {
    for child in children {
        parent.add_child(child).unwrap();
    }
    parent
}

fn tree(root: BehaviorNodeContainer) -> Tree {
    Tree::new(root, Blackboard::create()).unwrap()
}

/// A callback collecting the labels of [`Scripted`] and [`Delayed`] nodes.
fn record<'a>(
    log: &'a mut Vec<&'static str>,
) -> impl FnMut(&dyn Any) -> Option<Box<dyn Any>> + 'a {
    move |v| {
        if let Some(label) = v.downcast_ref::<&'static str>() {
            log.push(*label);
        }
        None
    }
}

fn underlying_codes(tree: &Tree) -> Vec<StatusCode> {
    tree.general_status()
        .unwrap()
        .underlying
        .iter()
        .map(|status| status.status_code)
        .collect()
}

#[test]
fn test_sequence() {
    let mut res = vec![];

    let mut tree = tree(with_children(
        node(SequenceNode::default()),
        [node(Append::<true>), node(Append::<false>)],
    ));

    assert_eq!(
        BehaviorResult::Success,
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap()
    );
    assert_eq!(res, vec![true, false]);

    // The root is reset right away, its status stays readable.
    assert_eq!(tree.node_status(tree.root()), Some(BehaviorResult::Idle));
    assert_eq!(tree.general_status().unwrap().status_code, codes::OK);
    // The last child decides, only the first one is nested.
    assert_eq!(underlying_codes(&tree), vec![codes::OK]);

    let mut res = vec![];
    let mut tree = self::tree(with_children(
        node(SequenceNode::default()),
        [node(AppendAndFail::<true>), node(AppendAndFail::<false>)],
    ));

    assert_eq!(
        BehaviorResult::Fail,
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap()
    );
    assert_eq!(res, vec![true]);
    assert_eq!(
        tree.general_status().unwrap().status_code,
        codes::NODE_FAILURE
    );
}

#[test]
fn test_sequence_suspend() {
    let mut res = vec![];

    let mut tree = tree(with_children(
        node(SequenceNode::default()),
        [node(Append::<true>), node(Suspend), node(Append::<false>)],
    ));

    assert_eq!(
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap(),
        BehaviorResult::Running
    );

    assert_eq!(res, vec![true]);
    assert!(tree.general_status().is_none());

    // Even ticking again won't invoke push(false)
    tree.tick_root_with(&mut |v: &dyn Any| {
        res.push(*v.downcast_ref::<bool>().unwrap());
        None
    })
    .unwrap();

    assert_eq!(res, vec![true]);
}

#[test]
fn test_reactive_sequence_suspend() {
    let mut res = vec![];

    let mut tree = tree(with_children(
        node(ReactiveSequenceNode),
        [node(Append::<true>), node(Suspend), node(Append::<false>)],
    ));

    assert_eq!(
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap(),
        BehaviorResult::Running
    );

    assert_eq!(res, vec![true]);

    // Unlike a SequenceNode, ticking again will invoke push(true) again
    tree.tick_root_with(&mut |v: &dyn Any| {
        res.push(*v.downcast_ref::<bool>().unwrap());
        None
    })
    .unwrap();

    assert_eq!(res, vec![true, true]);
}

#[test]
fn test_reactive_sequence_halts_running_child() {
    let halts = Arc::new(AtomicUsize::new(0));
    let mut tree = tree(with_children(
        node(ReactiveSequenceNode),
        [
            node(Scripted::new(
                "cond",
                &[(SUCCESS, codes::OK), (SUCCESS, codes::OK), (FAIL, 4)],
            )),
            node(Busy(halts.clone())),
        ],
    ));

    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(halts.load(Ordering::SeqCst), 0);

    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Fail);
    assert_eq!(halts.load(Ordering::SeqCst), 1);
    assert_eq!(tree.node_status(NodeId(2)), Some(BehaviorResult::Idle));
    assert_eq!(tree.general_status().unwrap().status_code, 4);
}

#[test]
fn test_fallback() {
    let mut res = vec![];

    let mut tree = tree(with_children(
        node(FallbackNode::default()),
        [node(AppendAndFail::<true>), node(AppendAndFail::<false>)],
    ));

    assert_eq!(
        BehaviorResult::Fail,
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap()
    );

    assert_eq!(res, vec![true, false]);

    let mut res = vec![];
    let mut tree = self::tree(with_children(
        node(FallbackNode::default()),
        [node(Append::<true>), node(Append::<false>)],
    ));

    assert_eq!(
        BehaviorResult::Success,
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap()
    );
    assert_eq!(res, vec![true]);
}

#[test]
fn test_fallback_suspend() {
    let mut res = vec![];

    let mut tree = tree(with_children(
        node(FallbackNode::default()),
        [
            node(AppendAndFail::<true>),
            node(Suspend),
            node(AppendAndFail::<false>),
        ],
    ));

    assert_eq!(
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap(),
        BehaviorResult::Running
    );

    assert_eq!(res, vec![true]);

    // Even ticking again won't invoke push(false)
    tree.tick_root_with(&mut |v: &dyn Any| {
        res.push(*v.downcast_ref::<bool>().unwrap());
        None
    })
    .unwrap();

    assert_eq!(res, vec![true]);
}

#[test]
fn test_reactive_fallback_suspend() {
    let mut res = vec![];

    let mut tree = tree(with_children(
        node(ReactiveFallbackNode),
        [
            node(AppendAndFail::<true>),
            node(Suspend),
            node(AppendAndFail::<false>),
        ],
    ));

    assert_eq!(
        tree.tick_root_with(&mut |v: &dyn Any| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap(),
        BehaviorResult::Running
    );

    assert_eq!(res, vec![true]);

    // Unlike a FallbackNode, ticking again will invoke push(true) again
    tree.tick_root_with(&mut |v: &dyn Any| {
        res.push(*v.downcast_ref::<bool>().unwrap());
        None
    })
    .unwrap();

    assert_eq!(res, vec![true, true]);
}

#[test]
fn test_sequence_star_resumes_failed_child() {
    let children = || {
        [
            node(Scripted::new("a", &[(SUCCESS, codes::OK)])),
            node(Scripted::new("b", &[(FAIL, 3), (SUCCESS, codes::OK)])),
        ]
    };

    let mut log = vec![];
    let mut star = tree(with_children(node(SequenceStarNode::default()), children()));
    assert_eq!(star.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(star.general_status().unwrap().status_code, 3);
    assert_eq!(star.tick_root_with(&mut record(&mut log)).unwrap(), SUCCESS);
    assert_eq!(log, vec!["a", "b", "b"]);

    let mut log = vec![];
    let mut plain = tree(with_children(node(SequenceNode::default()), children()));
    assert_eq!(plain.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(plain.tick_root_with(&mut record(&mut log)).unwrap(), SUCCESS);
    assert_eq!(log, vec!["a", "b", "a", "b"]);
}

#[test]
fn test_parallel_reports_first_declared_failure() {
    let children = || {
        [
            node(Scripted::new("a", &[(SUCCESS, codes::OK)])),
            node(Scripted::new("b", &[(FAIL, 21)])),
            node(Scripted::new("c", &[(FAIL, 22)])),
        ]
    };

    let mut log = vec![];
    let mut tree = tree(with_children(
        mapped(
            ParallelNode::default(),
            hash_map!("success_threshold" => "2", "failure_threshold" => "3"),
        ),
        children(),
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["a", "b", "c"]);
    assert_eq!(tree.general_status().unwrap().status_code, 21);
    assert_eq!(underlying_codes(&tree), vec![codes::OK, 22]);

    // With the default failure threshold of 1 the first failure decides.
    let mut log = vec![];
    let mut tree = self::tree(with_children(
        mapped(
            ParallelNode::default(),
            hash_map!("success_threshold" => "2"),
        ),
        children(),
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["a", "b"]);
    assert_eq!(tree.general_status().unwrap().status_code, 21);
}

#[test]
fn test_parallel_multiple_failures() {
    let mut tree = tree(with_children(
        mapped(
            ParallelNode::default(),
            hash_map!("success_threshold" => "1", "failure_threshold" => "2"),
        ),
        [
            node(Scripted::new("a", &[(FAIL, codes::OK)])),
            node(Scripted::new("b", &[(FAIL, codes::OK)])),
            node(Scripted::new("c", &[(SUCCESS, codes::OK)])),
        ],
    ));
    assert_eq!(tree.tick_root().unwrap(), FAIL);
    assert_eq!(
        tree.general_status().unwrap().status_code,
        codes::PARALLEL_MULTIPLE_FAILURES
    );
}

#[test]
fn test_parallel_does_not_retick_finished_children() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        node(ParallelNode::default()),
        [
            node(Scripted::new("a", &[(SUCCESS, codes::OK)])),
            node(Delayed {
                label: "b",
                result: SUCCESS,
            }),
        ],
    ));
    assert_eq!(
        tree.tick_root_with(&mut record(&mut log)).unwrap(),
        BehaviorResult::Running
    );
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), SUCCESS);
    assert_eq!(log, vec!["a", "b", "b"]);
    assert_eq!(tree.general_status().unwrap().status_code, codes::OK);
}

#[test]
fn test_parallel_invalid_threshold() {
    let mut tree = tree(with_children(
        mapped(
            ParallelNode::default(),
            hash_map!("success_threshold" => "3"),
        ),
        [node(Append::<true>), node(Append::<true>)],
    ));
    let err = tree.tick_root().unwrap_err();
    assert!(matches!(err, BehaviorError::InvalidPortValue { .. }));
    assert!(err.is_logic_error());
}

#[test]
fn test_switch_default_child() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        node(SwitchNode::<2>::default()),
        [
            node(Scripted::new("a", &[(SUCCESS, codes::OK)])),
            node(Scripted::new("b", &[(SUCCESS, codes::OK)])),
            node(Scripted::new("c", &[(FAIL, 33)])),
        ],
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["c"]);
    assert_eq!(tree.general_status().unwrap().status_code, 33);
}

#[test]
fn test_switch_matches_numbers() {
    let blackboard = Blackboard::create();
    blackboard.set("mode", 2i32).unwrap();

    let mut log = vec![];
    let mut tree = Tree::new(
        with_children(
            mapped(
                SwitchNode::<2>::default(),
                hash_map!("variable" => "{mode}", "case_1" => "1", "case_2" => "2.0"),
            ),
            [
                node(Scripted::new("a", &[(SUCCESS, codes::OK)])),
                node(Scripted::new("b", &[(SUCCESS, codes::OK)])),
                node(Scripted::new("c", &[(FAIL, 33)])),
            ],
        ),
        blackboard,
    )
    .unwrap();
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), SUCCESS);
    assert_eq!(log, vec!["b"]);
}

#[test]
fn test_switch_halts_previous_branch() {
    let blackboard = Blackboard::create();
    blackboard.set("mode", "walk".to_string()).unwrap();

    let halts = Arc::new(AtomicUsize::new(0));
    let mut tree = Tree::new(
        with_children(
            mapped(
                SwitchNode::<1>::default(),
                hash_map!("variable" => "{mode}", "case_1" => "walk"),
            ),
            [node(Busy(halts.clone())), node(AlwaysSuccessNode)],
        ),
        blackboard.clone(),
    )
    .unwrap();

    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    blackboard.set("mode", "stop".to_string()).unwrap();
    assert_eq!(tree.tick_root().unwrap(), SUCCESS);
    assert_eq!(halts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_if_then_else() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        node(IfThenElseNode::default()),
        [
            node(Scripted::new("cond", &[(FAIL, 5)])),
            node(Scripted::new("then", &[(SUCCESS, codes::OK)])),
        ],
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["cond"]);
    // Without an else branch the condition's code is not reported.
    assert_eq!(
        tree.general_status().unwrap().status_code,
        codes::NODE_FAILURE
    );
    assert_eq!(underlying_codes(&tree), vec![5]);

    let mut log = vec![];
    let mut tree = self::tree(with_children(
        node(IfThenElseNode::default()),
        [
            node(Scripted::new("cond", &[(FAIL, 5)])),
            node(Scripted::new("then", &[(SUCCESS, codes::OK)])),
            node(Scripted::new("else", &[(FAIL, 6)])),
        ],
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["cond", "else"]);
    assert_eq!(tree.general_status().unwrap().status_code, 6);
}

#[test]
fn test_if_then_else_latches_branch() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        node(IfThenElseNode::default()),
        [
            node(Scripted::new("cond", &[(SUCCESS, codes::OK)])),
            node(Delayed {
                label: "then",
                result: SUCCESS,
            }),
        ],
    ));
    assert_eq!(
        tree.tick_root_with(&mut record(&mut log)).unwrap(),
        BehaviorResult::Running
    );
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), SUCCESS);
    assert_eq!(log, vec!["cond", "then", "then"]);
}

#[test]
fn test_if_then_else_child_count() {
    let mut tree = tree(with_children(
        node(IfThenElseNode::default()),
        [node(Append::<true>)],
    ));
    assert!(matches!(
        tree.tick_root(),
        Err(BehaviorError::ChildCount { actual: 1, .. })
    ));

    let mut container = node(IfThenElseNode::default());
    for _ in 0..3 {
        container.add_child(node(Append::<true>)).unwrap();
    }
    assert!(container.add_child(node(Append::<true>)).is_err());
}

#[test]
fn test_while_do_else_halts_inactive_branch() {
    let do_halts = Arc::new(AtomicUsize::new(0));
    let else_halts = Arc::new(AtomicUsize::new(0));
    let mut tree = tree(with_children(
        node(WhileDoElseNode),
        [
            node(Scripted::new(
                "cond",
                &[(SUCCESS, codes::OK), (FAIL, codes::OK), (SUCCESS, codes::OK)],
            )),
            node(Busy(do_halts.clone())),
            node(Busy(else_halts.clone())),
        ],
    ));
    let (do_branch, else_branch) = (NodeId(2), NodeId(3));

    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(tree.node_status(do_branch), Some(BehaviorResult::Running));
    assert_eq!(tree.node_status(else_branch), Some(BehaviorResult::Idle));

    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(do_halts.load(Ordering::SeqCst), 1);
    assert_eq!(tree.node_status(do_branch), Some(BehaviorResult::Idle));
    assert_eq!(tree.node_status(else_branch), Some(BehaviorResult::Running));

    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(else_halts.load(Ordering::SeqCst), 1);
    assert_eq!(tree.node_status(do_branch), Some(BehaviorResult::Running));
}

#[test]
fn test_force_success() {
    let mut success_failure = tree(with_children(
        node(ForceSuccessNode),
        [node(Scripted::new("x", &[(FAIL, 7)]))],
    ));
    assert_eq!(success_failure.tick_root().unwrap(), SUCCESS);
    assert_eq!(success_failure.general_status().unwrap().status_code, codes::OK);

    let mut success_success =
        tree(with_children(node(ForceSuccessNode), [node(Append::<true>)]));
    assert_eq!(success_success.tick_root().unwrap(), SUCCESS);
}

#[test]
fn test_force_failure() {
    let mut failure_success =
        tree(with_children(node(ForceFailureNode), [node(Append::<true>)]));
    assert_eq!(failure_success.tick_root().unwrap(), FAIL);
    assert_eq!(
        failure_success.general_status().unwrap().status_code,
        codes::NODE_FAILURE
    );

    let mut failure_failure = tree(with_children(
        node(ForceFailureNode),
        [node(Scripted::new("x", &[(FAIL, 7)]))],
    ));
    assert_eq!(failure_failure.tick_root().unwrap(), FAIL);
    assert_eq!(failure_failure.general_status().unwrap().status_code, 7);
}

#[test]
fn test_inverter() {
    let mut invert_success = tree(with_children(node(InverterNode), [node(Append::<true>)]));
    assert_eq!(invert_success.tick_root().unwrap(), FAIL);
    assert_eq!(
        invert_success.general_status().unwrap().status_code,
        codes::NODE_FAILURE
    );

    let mut invert_failure = tree(with_children(
        node(InverterNode),
        [node(Scripted::new("x", &[(FAIL, 7)]))],
    ));
    assert_eq!(invert_failure.tick_root().unwrap(), SUCCESS);
    assert_eq!(invert_failure.general_status().unwrap().status_code, codes::OK);
    assert!(underlying_codes(&invert_failure).is_empty());

    let mut invert_running = tree(with_children(node(InverterNode), [node(Suspend)]));
    assert_eq!(
        invert_running.tick_root().unwrap(),
        BehaviorResult::Running
    );
}

#[test]
fn test_repeat() {
    let mut res = vec![];
    let mut tree = tree(with_children(
        mapped(RepeatNode::default(), hash_map!("num_cycles" => "3")),
        [node(Append::<true>)],
    ));

    while let BehaviorResult::Running = tree
        .tick_root_with(&mut |v| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap()
    {}
    assert_eq!(res, vec![true; 3]);
    assert_eq!(underlying_codes(&tree).len(), 2);
}

#[test]
fn test_repeat_fail() {
    let mut res = vec![];
    let mut tree = tree(with_children(
        mapped(RepeatNode::default(), hash_map!("num_cycles" => "3")),
        [node(AppendAndFail::<true>)],
    ));

    while let BehaviorResult::Running = tree
        .tick_root_with(&mut |v| {
            res.push(*v.downcast_ref::<bool>().unwrap());
            None
        })
        .unwrap()
    {}
    assert_eq!(res, vec![true]);
    assert_eq!(tree.last_result(), Some(FAIL));
}

#[test]
fn test_repeat_forever() {
    let mut res = vec![];
    let mut tree = tree(with_children(
        mapped(RepeatNode::default(), hash_map!("num_cycles" => "-1")),
        [node(Append::<true>)],
    ));
    for _ in 0..4 {
        let result = tree
            .tick_root_with(&mut |v| {
                res.push(*v.downcast_ref::<bool>().unwrap());
                None
            })
            .unwrap();
        assert_eq!(result, BehaviorResult::Running);
    }
    assert_eq!(res, vec![true; 4]);
}

#[test]
fn test_retry_nests_failed_attempts() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        mapped(RetryNode::default(), hash_map!("num_attempts" => "3")),
        [node(Scripted::new(
            "try",
            &[(FAIL, 11), (FAIL, 12), (SUCCESS, codes::OK)],
        ))],
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), SUCCESS);
    assert_eq!(log.len(), 3);
    assert_eq!(tree.general_status().unwrap().status_code, codes::OK);
    assert_eq!(underlying_codes(&tree), vec![11, 12]);
}

#[test]
fn test_retry_fail() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        mapped(RetryNode::default(), hash_map!("num_attempts" => "2")),
        [node(Scripted::new("try", &[(FAIL, 11)]))],
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log.len(), 2);
    assert_eq!(tree.general_status().unwrap().status_code, 11);
    assert_eq!(underlying_codes(&tree), vec![11]);
}

#[test]
fn test_retry_missing_port() {
    let mut tree = tree(with_children(
        node(RetryNode::default()),
        [node(Append::<true>)],
    ));
    let err = tree.tick_root().unwrap_err();
    assert!(matches!(
        err,
        BehaviorError::Blackboard(crate::BlackboardError::KeyNotFound(_))
    ));
    assert!(!err.is_logic_error());
}

#[test]
fn test_keep_running_until_failure() {
    let mut tree = tree(with_children(
        node(KeepRunningUntilFailureNode),
        [node(Scripted::new(
            "k",
            &[(SUCCESS, codes::OK), (SUCCESS, codes::OK), (FAIL, 9)],
        ))],
    ));
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(tree.tick_root().unwrap(), FAIL);
    assert_eq!(tree.general_status().unwrap().status_code, 9);
    assert_eq!(underlying_codes(&tree), vec![codes::OK, codes::OK]);
}

#[test]
fn test_halt_is_idempotent() {
    let halts = Arc::new(AtomicUsize::new(0));
    let mut tree = tree(with_children(
        node(SequenceNode::default()),
        [node(Append::<true>), node(Busy(halts.clone()))],
    ));
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);

    for _ in 0..2 {
        tree.halt_tree();
        for index in 0..tree.len() {
            let id = NodeId(index);
            assert_eq!(tree.node_status(id), Some(BehaviorResult::Idle));
            assert!(tree.node_general_status(id).is_none());
        }
        assert_eq!(tree.last_result(), None);
    }
    assert!(halts.load(Ordering::SeqCst) >= 1);

    // The sequence starts over after the halt.
    let mut res = vec![];
    tree.tick_root_with(&mut |v| {
        res.push(*v.downcast_ref::<bool>().unwrap());
        None
    })
    .unwrap();
    assert_eq!(res, vec![true]);
}

#[test]
fn test_timeout() {
    let halts = Arc::new(AtomicUsize::new(0));
    let mut tree = tree(with_children(
        mapped(TimeoutNode::default(), hash_map!("msec" => "20")),
        [node(Busy(halts.clone()))],
    ));
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(tree.tick_root().unwrap(), FAIL);
    assert_eq!(halts.load(Ordering::SeqCst), 1);
    assert_eq!(
        tree.general_status().unwrap().status_code,
        codes::NODE_FAILURE
    );

    // A child that finishes in time passes its result through.
    let mut tree = self::tree(with_children(
        mapped(TimeoutNode::default(), hash_map!("msec" => "10000")),
        [node(Scripted::new("x", &[(FAIL, 8)]))],
    ));
    assert_eq!(tree.tick_root().unwrap(), FAIL);
    assert_eq!(tree.general_status().unwrap().status_code, 8);
}

#[test]
fn test_cooldown() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        mapped(CooldownNode::default(), hash_map!("cooldown" => "50")),
        [node(Scripted::new("c", &[(FAIL, 12)]))],
    ));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["c"]);
    assert_eq!(tree.general_status().unwrap().status_code, 12);
    assert!(underlying_codes(&tree).is_empty());

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["c", "c"]);
}

#[test]
fn test_wait() {
    let mut tree = tree(mapped(WaitNode::default(), hash_map!("msec" => "30")));
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(tree.tick_root().unwrap(), SUCCESS);
}

#[test]
fn test_returned_idle() {
    let mut tree = tree(with_children(
        node(SequenceNode::default()),
        [node(ReturnIdle)],
    ));
    assert!(matches!(
        tree.tick_root(),
        Err(BehaviorError::ReturnedIdle(_))
    ));
}

#[test]
fn test_reactive_nests_all_but_deciding_child() {
    let mut sequence = tree(with_children(
        node(ReactiveSequenceNode),
        [
            node(AlwaysSuccessNode),
            node(AlwaysSuccessNode),
            node(Scripted::new(
                "c",
                &[(BehaviorResult::Running, codes::OK), (FAIL, 13)],
            )),
        ],
    ));
    assert_eq!(sequence.tick_root().unwrap(), BehaviorResult::Running);
    assert!(sequence.general_status().is_none());
    assert_eq!(sequence.tick_root().unwrap(), FAIL);
    assert_eq!(sequence.general_status().unwrap().status_code, 13);
    assert_eq!(underlying_codes(&sequence), vec![codes::OK, codes::OK]);

    let mut fallback = tree(with_children(
        node(ReactiveFallbackNode),
        [
            node(AlwaysFailureNode),
            node(AlwaysFailureNode),
            node(Scripted::new(
                "c",
                &[(BehaviorResult::Running, codes::OK), (SUCCESS, 13)],
            )),
        ],
    ));
    assert_eq!(fallback.tick_root().unwrap(), BehaviorResult::Running);
    assert_eq!(fallback.tick_root().unwrap(), SUCCESS);
    assert_eq!(fallback.general_status().unwrap().status_code, codes::OK);
    assert_eq!(
        underlying_codes(&fallback),
        vec![codes::NODE_FAILURE, codes::NODE_FAILURE]
    );
}

#[test]
fn test_repeat_nests_prior_cycles() {
    let mut tree = tree(with_children(
        mapped(RepeatNode::default(), hash_map!("num_cycles" => "3")),
        [node(Scripted::new("r", &[(SUCCESS, 123), (FAIL, 321)]))],
    ));
    assert_eq!(tree.tick_root().unwrap(), FAIL);
    assert_eq!(tree.general_status().unwrap().status_code, 321);
    assert_eq!(underlying_codes(&tree), vec![123]);

    let child = NodeId(1);
    assert_eq!(tree.node_status(child), Some(BehaviorResult::Idle));
    assert_eq!(
        tree.node_general_status(child).map(|status| status.status_code),
        Some(321)
    );
}

#[test]
fn test_timeout_zero_never_expires() {
    let mut tree = tree(with_children(
        mapped(TimeoutNode::default(), hash_map!("msec" => "0")),
        [node(Delayed {
            label: "x",
            result: SUCCESS,
        })],
    ));
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(tree.tick_root().unwrap(), SUCCESS);
    assert_eq!(tree.general_status().unwrap().status_code, codes::OK);
}

#[test]
fn test_error_resets_retry() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        mapped(RetryNode::default(), hash_map!("num_attempts" => "2")),
        [node(Erratic::new("e", &[Some(FAIL), None, Some(FAIL)]))],
    ));
    assert!(tree.tick_root_with(&mut record(&mut log)).is_err());
    assert_eq!(log.len(), 2);
    assert_eq!(tree.node_status(tree.root()), Some(BehaviorResult::Idle));

    // Both attempts are available again.
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log.len(), 4);
}

#[test]
fn test_error_cancels_timeout() {
    let mut tree = tree(with_children(
        mapped(TimeoutNode::default(), hash_map!("msec" => "40")),
        [node(Erratic::new(
            "e",
            &[None, Some(BehaviorResult::Running)],
        ))],
    ));
    assert!(tree.tick_root().is_err());
    std::thread::sleep(Duration::from_millis(100));

    // The new cycle starts a new deadline.
    assert_eq!(tree.tick_root().unwrap(), BehaviorResult::Running);
}

#[test]
fn test_delay() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        mapped(DelayNode::default(), hash_map!("delay_msec" => "20")),
        [node(Scripted::new(
            "x",
            &[(BehaviorResult::Running, codes::OK), (FAIL, 154)],
        ))],
    ));
    assert_eq!(
        tree.tick_root_with(&mut record(&mut log)).unwrap(),
        BehaviorResult::Running
    );
    assert!(log.is_empty());

    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(
        tree.tick_root_with(&mut record(&mut log)).unwrap(),
        BehaviorResult::Running
    );
    assert!(tree.general_status().is_none());
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(log, vec!["x", "x"]);
    assert_eq!(tree.general_status().unwrap().status_code, 154);
    assert_eq!(tree.node_status(NodeId(1)), Some(BehaviorResult::Idle));

    // A warning code of a successful child is not propagated.
    let mut tree = self::tree(with_children(
        mapped(DelayNode::default(), hash_map!("delay_msec" => "0")),
        [node(Scripted::new("x", &[(SUCCESS, 13)]))],
    ));
    assert_eq!(tree.tick_root().unwrap(), SUCCESS);
    assert_eq!(tree.general_status().unwrap().status_code, codes::OK);
    assert_eq!(
        tree.node_general_status(NodeId(1)).map(|status| status.status_code),
        Some(13)
    );
}

fn precondition_tree(value_a: i32, port_map: BBMap) -> Tree {
    let blackboard = Blackboard::create();
    blackboard.set("value_A", value_a).unwrap();
    blackboard.set("value_B", 42i32).unwrap();
    Tree::new(
        with_children(
            mapped(BlackboardPreconditionNode, port_map),
            [node(Scripted::new(
                "child",
                &[(BehaviorResult::Running, codes::OK), (FAIL, 154)],
            ))],
        ),
        blackboard,
    )
    .unwrap()
}

#[test]
fn test_blackboard_precondition() {
    let mut log = vec![];
    let mut tree = precondition_tree(42, BBMap::new());
    assert_eq!(
        tree.tick_root_with(&mut record(&mut log)).unwrap(),
        BehaviorResult::Running
    );
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert_eq!(tree.general_status().unwrap().status_code, 154);
    assert_eq!(log.len(), 2);

    // On a mismatch the child is never ticked.
    let mut log = vec![];
    let mut tree = precondition_tree(111, BBMap::new());
    assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
    assert!(log.is_empty());
    assert_eq!(
        tree.general_status().unwrap().status_code,
        codes::NODE_FAILURE
    );
    assert!(tree.node_general_status(NodeId(1)).is_none());

    let mut tree = precondition_tree(111, hash_map!("return_on_mismatch" => "SUCCESS"));
    assert_eq!(tree.tick_root().unwrap(), SUCCESS);

    let mut tree = precondition_tree(111, hash_map!("return_on_mismatch" => "IDLE"));
    assert!(matches!(
        tree.tick_root(),
        Err(BehaviorError::InvalidPortValue { .. })
    ));
}

#[test]
fn test_only_once() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        node(OnlyOnceNode::default()),
        [node(Scripted::new("x", &[(FAIL, 5), (SUCCESS, codes::OK)]))],
    ));
    for _ in 0..3 {
        assert_eq!(tree.tick_root_with(&mut record(&mut log)).unwrap(), FAIL);
        assert_eq!(tree.general_status().unwrap().status_code, 5);
    }
    assert_eq!(log, vec!["x"]);
}

#[test]
fn test_loop() {
    let mut log = vec![];
    let mut tree = tree(with_children(
        node(LoopNode),
        [node(Scripted::new("x", &[(SUCCESS, codes::OK), (FAIL, 3)]))],
    ));
    for _ in 0..3 {
        assert_eq!(
            tree.tick_root_with(&mut record(&mut log)).unwrap(),
            BehaviorResult::Running
        );
    }
    assert_eq!(log, vec!["x", "x", "x"]);
    assert!(tree.general_status().is_none());
}
