//! A small syntax set for exercising the engine from unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{Node, SectionNode};
use crate::error::{RuntimeError, RuntimeResult};
use crate::event::{Event, LoopKey};
use crate::expr::{ExprRef, Expression};
use crate::kleenean::Kleenean;
use crate::log::Diagnostics;
use crate::matcher::ParseResult;
use crate::parser::{CurrentEvent, ParserState, ScriptEnv};
use crate::registry::{RegistryBuilder, SyntaxRegistry};
use crate::syntax::{AsyncTask, Condition, Effect, Flow, SkriptEvent, SyntaxElement};
use crate::trigger::{Continuation, Scheduler, Trigger, build_trigger};
use crate::types::{ClassInfo, OBJECT};
use crate::value::Value;
use crate::variables::Variables;

#[derive(Default)]
struct Record {
    values: Option<ExprRef>,
    sink: Option<Arc<Variables>>,
}

impl SyntaxElement for Record {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        self.values.clone_from(&exprs[0]);
        self.sink = Some(Arc::clone(&state.env().globals));
        true
    }
}

impl Effect for Record {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let (Some(values), Some(sink)) = (&self.values, &self.sink) else {
            return Ok(());
        };
        let texts: Vec<Value> = values
            .get_array(event)?
            .iter()
            .map(|v| Value::text(v.as_text()))
            .collect();
        sink.append_list("log::*", &texts);
        Ok(())
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let values = self.values.as_ref().map(|v| v.describe(event, debug));
        format!("record {}", values.unwrap_or_default())
    }
}

#[derive(Default)]
struct Wait {
    ticks: Option<ExprRef>,
}

impl SyntaxElement for Wait {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.ticks.clone_from(&exprs[0]);
        true
    }
}

impl Effect for Wait {
    fn execute(&self, _event: &Event) -> RuntimeResult<()> {
        Ok(())
    }

    fn walk(&self, event: &Event) -> RuntimeResult<Flow> {
        let ticks = match &self.ticks {
            Some(ticks) => ticks.get_single(event)?.map_or(0.0, |v| v.as_number()),
            None => 0.0,
        };
        Ok(Flow::Delay(Duration::from_millis(50).mul_f64(ticks.max(0.0))))
    }

    fn delays(&self) -> bool {
        true
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "wait".to_string()
    }
}

/// Reports the delay state it was parsed with as a warning.
#[derive(Default)]
struct ShowDelay;

impl SyntaxElement for ShowDelay {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        state.logger().warning(format!("delay is {delayed:?}"));
        true
    }
}

impl Effect for ShowDelay {
    fn execute(&self, _event: &Event) -> RuntimeResult<()> {
        Ok(())
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "show delay".to_string()
    }
}

#[derive(Default)]
struct Stop;

impl SyntaxElement for Stop {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        true
    }
}

impl Effect for Stop {
    fn execute(&self, _event: &Event) -> RuntimeResult<()> {
        Ok(())
    }

    fn walk(&self, _event: &Event) -> RuntimeResult<Flow> {
        Ok(Flow::Stop)
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "stop".to_string()
    }
}

#[derive(Default)]
struct Continue;

impl SyntaxElement for Continue {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        if state.loops().is_empty() {
            state.logger().error("Continue may only be used in loops");
            return false;
        }
        true
    }
}

impl Effect for Continue {
    fn execute(&self, _event: &Event) -> RuntimeResult<()> {
        Ok(())
    }

    fn walk(&self, _event: &Event) -> RuntimeResult<Flow> {
        Ok(Flow::ContinueLoop)
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "continue".to_string()
    }
}

#[derive(Default)]
struct Fail {
    message: Option<ExprRef>,
}

impl SyntaxElement for Fail {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.message.clone_from(&exprs[0]);
        true
    }
}

impl Effect for Fail {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let message = match &self.message {
            Some(message) => message.get_single(event)?.map(|v| v.as_text()),
            None => None,
        };
        Err(RuntimeError::fault(message.unwrap_or_default()))
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "fail".to_string()
    }
}

#[derive(Default)]
struct Equals {
    left: Option<ExprRef>,
    right: Option<ExprRef>,
}

impl SyntaxElement for Equals {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.left.clone_from(&exprs[0]);
        self.right.clone_from(&exprs[1]);
        true
    }
}

impl Condition for Equals {
    fn check(&self, event: &Event) -> RuntimeResult<bool> {
        let (Some(left), Some(right)) = (&self.left, &self.right) else {
            return Ok(false);
        };
        let right = right.get_array(event)?;
        left.check(event, &|l| right.iter().any(|r| l.equals(r)), false)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let side = |e: &Option<ExprRef>| e.as_ref().map(|e| e.describe(event, debug)).unwrap_or_default();
        format!("{} is {}", side(&self.left), side(&self.right))
    }
}

#[derive(Default)]
struct LoopValue {
    key: Option<LoopKey>,
}

impl SyntaxElement for LoopValue {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        self.key = state.loops().iter().rev().find(|l| l.expr.is_some()).map(|l| l.key);
        self.key.is_some()
    }
}

impl Expression for LoopValue {
    fn return_type(&self) -> &str {
        OBJECT
    }

    fn is_single(&self) -> bool {
        true
    }

    fn get_all(&self, event: &Event) -> RuntimeResult<Vec<Value>> {
        Ok(self
            .key
            .and_then(|key| event.loop_item(key))
            .map(|(_, value)| value)
            .into_iter()
            .collect())
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "loop-value".to_string()
    }
}

#[derive(Default)]
struct TestEvent;

impl SyntaxElement for TestEvent {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        true
    }
}

impl SkriptEvent for TestEvent {
    fn check(&self, _event: &Event) -> bool {
        true
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        "test".to_string()
    }
}

pub(crate) fn registry() -> SyntaxRegistry {
    let mut builder = RegistryBuilder::new();
    builder
        .register_type(
            ClassInfo::new("number")
                .name("number", "numbers")
                .parser(|s, _| s.parse::<f64>().ok().map(Value::Number)),
        )
        .register_type(ClassInfo::new("string").name("text", "texts"))
        .register_type(ClassInfo::new("item").name("item", "items").noun(|v, plural| {
            if plural {
                format!("{}s", v.as_text())
            } else {
                v.as_text()
            }
        }))
        .register_type(ClassInfo::new("boolean").name("boolean", "booleans").parser(|s, _| {
            match s {
                "true" => Some(Value::Boolean(true)),
                "false" => Some(Value::Boolean(false)),
                _ => None,
            }
        }))
        .event_kind("test", None)
        .event::<TestEvent>("test", &["test"], &["test"])
        .effect::<Record>(&["record %objects%"])
        .effect::<Wait>(&["wait %number% tick[s]"])
        .effect::<ShowDelay>(&["show delay"])
        .effect::<Stop>(&["stop"])
        .effect::<Continue>(&["continue"])
        .effect::<Fail>(&["fail with %string%"])
        .condition::<Equals>(&["%objects% is %objects%"])
        .expression::<LoopValue>(OBJECT, &["loop-value"]);
    match builder.build() {
        Ok(registry) => registry,
        Err(e) => panic!("test registry is valid: {e}"),
    }
}

pub(crate) fn env() -> ScriptEnv {
    ScriptEnv::new(Arc::new(registry()))
}

/// Build the first section of `script` as a trigger for the `test` event.
pub(crate) fn build(env: &ScriptEnv, script: &str) -> (Arc<Trigger>, Diagnostics) {
    let root = SectionNode::parse("test.sk", script).unwrap();
    let Some(Node::Section(section)) = root.children().next() else {
        panic!("script has no section");
    };
    let state = ParserState::new(env, "test.sk");
    state.set_current_event(Some(CurrentEvent {
        name: "test".to_string(),
        kinds: vec!["test".to_string()],
        values: Vec::new(),
    }));
    let trigger = build_trigger(&state, &section.key, section);
    (trigger, state.logger().take_diagnostics())
}

/// What `record` effects have written so far.
pub(crate) fn recorded(env: &ScriptEnv) -> Vec<String> {
    env.globals
        .list("log::*")
        .into_iter()
        .map(|(_, v)| v.as_text())
        .collect()
}

/// Collects suspended walks for the test to resume by hand. Async tasks run
/// immediately and their continuation is queued with no delay.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    queue: Mutex<VecDeque<(Duration, Continuation)>>,
}

impl ManualScheduler {
    pub(crate) fn pop(&self) -> Option<(Duration, Continuation)> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, continuation: Continuation) {
        self.queue.lock().push_back((delay, continuation));
    }

    fn spawn_async(&self, task: AsyncTask, continuation: Continuation) {
        if task().is_ok() {
            self.queue.lock().push_back((Duration::ZERO, continuation));
        }
    }
}
