use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, trace};

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::Event;
use crate::syntax::{AsyncTask, Flow};
use crate::trigger::{NodeId, NodeKind, Trigger};

/// How a walk ended.
#[derive(Debug)]
pub enum WalkOutcome {
    /// Ran off the end of the trigger.
    Completed,
    /// A `stop` effect ended the walk.
    Stopped,
    /// The rest of the walk was handed to the event's scheduler.
    Suspended,
    Failed(RuntimeError),
}

impl WalkOutcome {
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

pub enum Suspension {
    Delay(Duration),
    Async(AsyncTask),
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Self::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// The remainder of a suspended walk.
pub struct Continuation {
    trigger: Arc<Trigger>,
    next: Option<NodeId>,
    event: Arc<Event>,
}

impl Continuation {
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn trigger(&self) -> &Arc<Trigger> {
        &self.trigger
    }

    /// Walk on from where the walk was suspended.
    pub fn resume(self) -> WalkOutcome {
        walk(&self.trigger, self.next, &self.event, true)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("trigger", &self.trigger.name())
            .field("next", &self.next)
            .field("event", &self.event.name())
            .finish()
    }
}

/// Runs suspended walks later.
pub trait Scheduler: Send + Sync {
    /// Resume `continuation` once `delay` has passed.
    fn schedule(&self, delay: Duration, continuation: Continuation);

    /// Run `task` off the walking thread, then resume `continuation`.
    fn spawn_async(&self, task: AsyncTask, continuation: Continuation);
}

enum Step {
    /// Go to the given node, or end the walk.
    Advance(Option<NodeId>),
    EnterBody(NodeId),
    /// Re-evaluate a loop header or take an else branch.
    JumpTo(NodeId),
    Suspend(Suspension, Option<NodeId>),
    Halt,
}

impl Trigger {
    /// Walk this trigger for `event`.
    ///
    /// Faults are logged here for top-level walks; nested walks (function
    /// bodies) leave reporting to their caller.
    pub fn execute(self: &Arc<Self>, event: &Arc<Event>) -> WalkOutcome {
        walk(self, self.first, event, event.depth() == 0)
    }

    fn step(&self, id: NodeId, event: &Event) -> RuntimeResult<Step> {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Effect(effect) => match effect.walk(event)? {
                Flow::Continue => Ok(Step::Advance(node.next)),
                Flow::Delay(delay) => Ok(Step::Suspend(Suspension::Delay(delay), node.next)),
                Flow::Async(task) => Ok(Step::Suspend(Suspension::Async(task), node.next)),
                Flow::Stop => Ok(Step::Halt),
                Flow::ContinueLoop => node
                    .enclosing_loop
                    .map(Step::JumpTo)
                    .ok_or(RuntimeError::NoEnclosingLoop),
            },
            NodeKind::Condition(condition) => {
                if condition.check(event)? {
                    return Ok(Step::Advance(node.next));
                }
                // Skip the rest of the section.
                Ok(match node.parent {
                    Some(parent) if self.node(parent).kind.is_loop() => Step::JumpTo(parent),
                    Some(parent) => Step::Advance(self.node(parent).next),
                    None => Step::Advance(None),
                })
            }
            NodeKind::Conditional {
                condition,
                first,
                else_branch,
            } => {
                let passed = match condition {
                    Some(condition) => condition.check(event)?,
                    None => true,
                };
                Ok(match (passed, first, else_branch) {
                    (true, Some(first), _) => Step::EnterBody(*first),
                    (true, None, _) | (false, _, None) => Step::Advance(node.next),
                    (false, _, Some(branch)) => Step::JumpTo(*branch),
                })
            }
            NodeKind::Loop { expr, first } => {
                let key = (self.id, id);
                if !event.is_looping(key) {
                    let iter = match expr.iter_indexed(event)? {
                        Some(iter) => iter,
                        None => Box::new(expr.iter(event)?.map(|v| (None, v))),
                    };
                    event.start_loop(key, iter);
                }
                if !event.advance_loop(key) {
                    return Ok(Step::Advance(node.next));
                }
                Ok(first.map_or(Step::JumpTo(id), Step::EnterBody))
            }
            NodeKind::While { condition, first } => {
                if !condition.check(event)? {
                    return Ok(Step::Advance(node.next));
                }
                Ok(first.map_or(Step::JumpTo(id), Step::EnterBody))
            }
        }
    }
}

/// Trampoline over node ids. Never recurses, however deeply sections nest.
///
/// A panicking element fails the walk like any other fault.
fn walk(trigger: &Arc<Trigger>, start: Option<NodeId>, event: &Arc<Event>, report: bool) -> WalkOutcome {
    let mut current = start;
    while let Some(id) = current {
        let step = panic::catch_unwind(AssertUnwindSafe(|| trigger.step(id, event)))
            .unwrap_or_else(|payload| Err(RuntimeError::fault(panic_message(payload.as_ref()))));
        let step = match step {
            Ok(step) => step,
            Err(e) => {
                if report {
                    let node = trigger.node(id);
                    error!(
                        trigger = trigger.name(),
                        script = trigger.script(),
                        event = event.name(),
                        line = node.line,
                        text = node.text.as_str(),
                        "{e}"
                    );
                }
                return WalkOutcome::Failed(e);
            }
        };
        current = match step {
            Step::Advance(next) => next,
            Step::EnterBody(next) | Step::JumpTo(next) => Some(next),
            Step::Halt => return WalkOutcome::Stopped,
            Step::Suspend(suspension, next) => {
                return suspend(trigger, next, event, suspension, report);
            }
        };
    }
    WalkOutcome::Completed
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("panicked: {message}")
}

fn suspend(
    trigger: &Arc<Trigger>,
    next: Option<NodeId>,
    event: &Arc<Event>,
    suspension: Suspension,
    report: bool,
) -> WalkOutcome {
    let Some(scheduler) = event.scheduler() else {
        let e = RuntimeError::fault("delays need a scheduler");
        if report {
            error!(trigger = trigger.name(), event = event.name(), "{e}");
        }
        return WalkOutcome::Failed(e);
    };
    trace!(trigger = trigger.name(), ?suspension, "suspending walk");
    let continuation = Continuation {
        trigger: Arc::clone(trigger),
        next,
        event: Arc::clone(event),
    };
    match suspension {
        Suspension::Delay(delay) => scheduler.schedule(delay, continuation),
        Suspension::Async(task) => scheduler.spawn_async(task, continuation),
    }
    WalkOutcome::Suspended
}
