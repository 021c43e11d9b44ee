//! Effects: statements that do something.

use std::cell::Cell;
use std::sync::Arc;

use skript_lang::expr::UnparsedLiteral;
use skript_lang::parser::not_of_type;
use skript_lang::value::Value;
use skript_lang::parser::CurrentEvent;
use skript_lang::trigger::build_trigger;
use skript_lang::{
    ChangeMode, Condition, Effect, EntryNode, Event, ExprRef, Flow, Kleenean, Node, ParseContext,
    ParseFlags, ParseResult, ParserState, RegistryBuilder, RuntimeError, RuntimeResult, ScriptEnv,
    SectionNode, SkriptParser, SyntaxElement, Trigger, WalkOutcome,
};
use tracing::{trace, warn};

use crate::output::OutputSink;

pub fn register(builder: &mut RegistryBuilder, sink: &Arc<dyn OutputSink>) {
    let broadcast_sink = Arc::clone(sink);
    let send_sink = Arc::clone(sink);
    builder
        .effect::<Change>(&[
            "set %objects% to %objects%",
            "add %objects% to %objects%",
            "remove all %objects% from %objects%",
            "remove %objects% from %objects%",
            "(delete|clear|1¦reset) %objects%",
        ])
        .effect_with("Broadcast", &["(broadcast|print) %objects%"], move || {
            Box::new(Broadcast {
                messages: None,
                sink: Arc::clone(&broadcast_sink),
            })
        })
        .effect_with("Send", &["send %objects% [to %players%]"], move || {
            Box::new(Send {
                messages: None,
                recipients: None,
                sink: Arc::clone(&send_sink),
            })
        })
        .effect::<Wait>(&["(wait|halt) [for] %timespan%"])
        .effect::<AsyncExec>(&[
            "async run %string%",
            "(exec[ute]|eval[uate]) %string% async[hronously]",
        ])
        .effect::<Exec>(&["(exec[ute]|eval[uate]) %string%"])
        .effect::<Stop>(&["(stop|exit) [trigger]"])
        .effect::<Continue>(&["continue [loop]"])
        .effect::<Return>(&["return %objects%"])
        .effect::<Cancel>(&[
            "(cancel|disallow) [the] [current] event",
            "(uncancel|allow) [the] [current] event",
        ])
        .effect::<Fail>(&["fail with %string%"])
        .effect::<DoIf>(&["<.+> if <.+>"]);
}

fn describe_opt(expr: Option<&ExprRef>, event: Option<&Event>, debug: bool) -> String {
    expr.map(|e| e.describe(event, debug)).unwrap_or_default()
}

/// `set`, `add`, `remove`, `remove all`, `delete` and `reset`.
#[derive(Default)]
struct Change {
    target: Option<ExprRef>,
    delta: Option<ExprRef>,
    mode: Option<ChangeMode>,
}

impl Change {
    fn unsupported_message(mode: ChangeMode, target: &str) -> String {
        match mode {
            ChangeMode::Set => format!("{target} can't be set to anything"),
            ChangeMode::Add => format!("{target} can't have anything added to it"),
            ChangeMode::Remove | ChangeMode::RemoveAll => {
                format!("{target} can't have anything removed from it")
            }
            ChangeMode::Delete => format!("{target} can't be deleted/cleared"),
            ChangeMode::Reset => format!("{target} can't be reset"),
        }
    }
}

impl SyntaxElement for Change {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let (mode, target, delta) = match matched_pattern {
            0 => (ChangeMode::Set, exprs[0].clone(), exprs[1].clone()),
            1 => (ChangeMode::Add, exprs[1].clone(), exprs[0].clone()),
            2 => (ChangeMode::RemoveAll, exprs[1].clone(), exprs[0].clone()),
            3 => (ChangeMode::Remove, exprs[1].clone(), exprs[0].clone()),
            _ if result.mark & 1 == 1 => (ChangeMode::Reset, exprs[0].clone(), None),
            _ => (ChangeMode::Delete, exprs[0].clone(), None),
        };
        let Some(target) = target else {
            return false;
        };
        let logger = state.logger();
        // e.g. `{a::}`: the variable's own error says more than ours would
        if let Some(error) = target
            .as_any()
            .downcast_ref::<UnparsedLiteral>()
            .and_then(UnparsedLiteral::error)
        {
            logger.log(error.clone());
            return false;
        }
        let target_text = target.describe(None, false);
        let Some(accepted) = target.accept_change(mode) else {
            logger.error(Self::unsupported_message(mode, &target_text));
            return false;
        };

        if let Some(delta) = delta {
            let accepted: Vec<&str> = accepted.iter().map(String::as_str).collect();
            let types = state.types();
            let delta_text = delta.describe(None, false);
            let fits = accepted
                .iter()
                .any(|t| types.is_assignable(delta.return_type(), t));
            let delta = if fits {
                delta
            } else if let Some(converted) = delta.get_converted(&accepted, types) {
                converted
            } else {
                let reason = not_of_type(types, &accepted);
                logger.error(match mode {
                    ChangeMode::Set => format!(
                        "{target_text} can't be set to {delta_text} because the latter is {reason}"
                    ),
                    ChangeMode::Add => format!(
                        "{delta_text} can't be added to {target_text} because the former is {reason}"
                    ),
                    _ => format!(
                        "{delta_text} can't be removed from {target_text} because the former is {reason}"
                    ),
                });
                return false;
            };
            if mode == ChangeMode::Set && target.is_single() && !delta.is_single() {
                let name = types
                    .get(delta.return_type())
                    .map_or_else(|| delta.return_type().to_string(), |c| c.singular());
                logger.error(format!(
                    "{target_text} can only be set to one {name}, not more"
                ));
                return false;
            }
            self.delta = Some(delta);
        }
        self.target = Some(target);
        self.mode = Some(mode);
        true
    }
}

impl Effect for Change {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let (Some(target), Some(mode)) = (&self.target, self.mode) else {
            return Ok(());
        };
        let Some(delta) = &self.delta else {
            return target.change(event, None, mode);
        };
        let values = delta.get_array(event)?;
        if values.is_empty() {
            // Setting to nothing clears the target.
            if mode == ChangeMode::Set && target.accept_change(ChangeMode::Delete).is_some() {
                return target.change(event, None, ChangeMode::Delete);
            }
            return Ok(());
        }
        target.change(event, Some(&values), mode)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let target = describe_opt(self.target.as_ref(), event, debug);
        let delta = describe_opt(self.delta.as_ref(), event, debug);
        match self.mode {
            Some(ChangeMode::Set) => format!("set {target} to {delta}"),
            Some(ChangeMode::Add) => format!("add {delta} to {target}"),
            Some(ChangeMode::Remove) => format!("remove {delta} from {target}"),
            Some(ChangeMode::RemoveAll) => format!("remove all {delta} from {target}"),
            Some(ChangeMode::Reset) => format!("reset {target}"),
            Some(ChangeMode::Delete) | None => format!("delete {target}"),
        }
    }
}

struct Broadcast {
    messages: Option<ExprRef>,
    sink: Arc<dyn OutputSink>,
}

impl SyntaxElement for Broadcast {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.messages.clone_from(&exprs[0]);
        self.messages.is_some()
    }
}

impl Effect for Broadcast {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let Some(messages) = &self.messages else {
            return Ok(());
        };
        for message in messages.get_array(event)? {
            self.sink.broadcast(&message.as_text());
        }
        Ok(())
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!("broadcast {}", describe_opt(self.messages.as_ref(), event, debug))
    }
}

/// `send %objects% [to %players%]`. Without a recipient the message goes to
/// the event's player.
struct Send {
    messages: Option<ExprRef>,
    recipients: Option<ExprRef>,
    sink: Arc<dyn OutputSink>,
}

impl SyntaxElement for Send {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        _state: &ParserState,
    ) -> bool {
        self.messages.clone_from(&exprs[0]);
        self.recipients.clone_from(&exprs[1]);
        self.messages.is_some() && self.recipients.is_some()
    }
}

impl Effect for Send {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let (Some(messages), Some(recipients)) = (&self.messages, &self.recipients) else {
            return Ok(());
        };
        let messages: Vec<String> = messages.get_array(event)?.iter().map(Value::as_text).collect();
        for recipient in recipients.get_array(event)? {
            for message in &messages {
                self.sink.send(&recipient, message);
            }
        }
        Ok(())
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!(
            "send {} to {}",
            describe_opt(self.messages.as_ref(), event, debug),
            describe_opt(self.recipients.as_ref(), event, debug)
        )
    }
}

#[derive(Default)]
struct Wait {
    duration: Option<ExprRef>,
}

impl SyntaxElement for Wait {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        if state.current_function().is_some() {
            state.logger().warning(
                "Delays in functions causes function to return instantly, this may cause bugs, so don't use delays in functions.",
            );
        }
        self.duration.clone_from(&exprs[0]);
        self.duration.is_some()
    }
}

impl Effect for Wait {
    fn execute(&self, _event: &Event) -> RuntimeResult<()> {
        Ok(())
    }

    fn walk(&self, event: &Event) -> RuntimeResult<Flow> {
        let duration = match &self.duration {
            Some(duration) => duration.get_single(event)?,
            None => None,
        };
        match duration {
            Some(Value::Timespan(duration)) => {
                trace!(event = event.name(), ?duration, "delaying");
                Ok(Flow::Delay(duration))
            }
            // Nothing to wait for ends the trigger.
            _ => Ok(Flow::Stop),
        }
    }

    fn delays(&self) -> bool {
        true
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!("wait for {}", describe_opt(self.duration.as_ref(), event, debug))
    }
}

/// Build `code` into a one-shot trigger for the event `current`. The error
/// is the best message the parse produced.
fn build_exec_trigger(
    env: &ScriptEnv,
    current: Option<&CurrentEvent>,
    code: &str,
) -> Result<Arc<Trigger>, String> {
    let state = ParserState::new(env, "<exec>");
    state.set_current_event(current.cloned());
    let section = SectionNode {
        key: "execute".to_string(),
        line: 0,
        nodes: vec![Node::Entry(EntryNode {
            text: code.trim().to_string(),
            line: 1,
        })],
    };
    let log = state.logger().start();
    let trigger = build_trigger(&state, "execute", &section);
    match log.error() {
        Some(error) => Err(error.message),
        None => Ok(trigger),
    }
}

/// Walk `code` against a nested copy of `event`. Delays in the code go to
/// the event's scheduler; the caller carries on without waiting for them.
fn run_code(
    env: &ScriptEnv,
    current: Option<&CurrentEvent>,
    code: &str,
    event: &Event,
) -> RuntimeResult<()> {
    let trigger = match build_exec_trigger(env, current, code) {
        Ok(trigger) => trigger,
        Err(message) => {
            warn!(code, event = event.name(), "{message}");
            return Ok(());
        }
    };
    let nested = Arc::new(event.nested());
    let outcome = trigger.execute(&nested);
    event.set_cancelled(nested.is_cancelled());
    trace!(code, ?outcome, "executed");
    match outcome {
        WalkOutcome::Failed(error) => Err(error),
        WalkOutcome::Completed | WalkOutcome::Stopped | WalkOutcome::Suspended => Ok(()),
    }
}

/// Parses and runs the text of its argument each time it runs.
#[derive(Default)]
struct Exec {
    code: Option<ExprRef>,
    env: Option<ScriptEnv>,
    current: Option<CurrentEvent>,
}

impl SyntaxElement for Exec {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        self.code.clone_from(&exprs[0]);
        self.env = Some(state.env().clone());
        self.current = state.current_event();
        self.code.is_some()
    }
}

impl Effect for Exec {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let (Some(code), Some(env)) = (&self.code, &self.env) else {
            return Ok(());
        };
        let Some(code) = code.get_single(event)? else {
            return Ok(());
        };
        run_code(env, self.current.as_ref(), &code.as_text(), event)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!("execute {}", describe_opt(self.code.as_ref(), event, debug))
    }
}

/// Like [`Exec`], but parsing and running happen on a worker. The trigger
/// resumes once the worker is done.
#[derive(Default)]
struct AsyncExec {
    code: Option<ExprRef>,
    env: Option<ScriptEnv>,
    current: Option<CurrentEvent>,
}

impl SyntaxElement for AsyncExec {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        self.code.clone_from(&exprs[0]);
        self.env = Some(state.env().clone());
        self.current = state.current_event();
        self.code.is_some()
    }
}

impl Effect for AsyncExec {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        let (Some(code), Some(env)) = (&self.code, &self.env) else {
            return Ok(());
        };
        let Some(code) = code.get_single(event)? else {
            return Ok(());
        };
        run_code(env, self.current.as_ref(), &code.as_text(), event)
    }

    fn walk(&self, event: &Event) -> RuntimeResult<Flow> {
        let (Some(code), Some(env)) = (&self.code, &self.env) else {
            return Ok(Flow::Continue);
        };
        let Some(code) = code.get_single(event)? else {
            return Ok(Flow::Continue);
        };
        let code = code.as_text();
        let env = env.clone();
        let current = self.current.clone();
        let detached = event.detach();
        Ok(Flow::Async(Box::new(move || {
            run_code(&env, current.as_ref(), &code, &detached)
        })))
    }

    fn delays(&self) -> bool {
        true
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!("async run {}", describe_opt(self.code.as_ref(), event, debug))
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
struct Return {
    values: Option<ExprRef>,
}

impl SyntaxElement for Return {
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let logger = state.logger();
        let Some(function) = state.current_function() else {
            logger.error("The return statement can only be used in a function");
            return false;
        };
        let Some((return_type, single)) = function.return_type.clone() else {
            logger.error(
                "This function doesn't return any value. Please use 'stop' or 'exit' if you want to stop the function.",
            );
            return false;
        };
        let Some(values) = exprs[0].clone() else {
            return false;
        };
        let types = state.types();
        let values = if types.is_assignable(values.return_type(), &return_type) {
            values
        } else {
            let text = values.describe(None, false);
            match values.get_converted(&[return_type.as_str()], types) {
                Some(converted) => converted,
                None => {
                    logger.error(format!(
                        "{text} is {}",
                        not_of_type(types, &[return_type.as_str()])
                    ));
                    return false;
                }
            }
        };
        if single && !values.is_single() {
            let name = types
                .get(&return_type)
                .map_or_else(|| return_type.clone(), |c| c.singular());
            logger.error(format!(
                "This function is declared to only return a single {name}, but this return statement can return multiple values."
            ));
            return false;
        }
        self.values = Some(values);
        true
    }
}

impl Effect for Return {
    fn execute(&self, _event: &Event) -> RuntimeResult<()> {
        Ok(())
    }

    fn walk(&self, event: &Event) -> RuntimeResult<Flow> {
        if let Some(values) = &self.values {
            event.set_return_value(values.get_array(event)?);
        }
        Ok(Flow::Stop)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!("return {}", describe_opt(self.values.as_ref(), event, debug))
    }
}

#[derive(Default)]
struct Cancel {
    cancel: bool,
}

impl SyntaxElement for Cancel {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        matched_pattern: usize,
        delayed: Kleenean,
        _result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let logger = state.logger();
        if state.current_function().is_some() || state.current_event().is_none() {
            logger.error("The cancel event effect only usable in an event");
            return false;
        }
        if delayed == Kleenean::True {
            logger.error(
                "Can't cancel an event anymore after it has been already passed, remove the wait statements!",
            );
            return false;
        }
        self.cancel = matched_pattern == 0;
        true
    }
}

impl Effect for Cancel {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        event.set_cancelled(self.cancel);
        Ok(())
    }

    fn describe(&self, _event: Option<&Event>, _debug: bool) -> String {
        if self.cancel {
            "cancel event".to_string()
        } else {
            "uncancel event".to_string()
        }
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
        self.message.is_some()
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

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        format!("fail with {}", describe_opt(self.message.as_ref(), event, debug))
    }
}

thread_local! {
    static PARSING_DO_IF: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside a do-if until dropped.
struct DoIfScope;

impl DoIfScope {
    fn enter() -> Option<Self> {
        PARSING_DO_IF.with(|flag| (!flag.replace(true)).then_some(Self))
    }
}

impl Drop for DoIfScope {
    fn drop(&mut self) {
        PARSING_DO_IF.with(|flag| flag.set(false));
    }
}

/// `<effect> if <condition>`.
#[derive(Default)]
struct DoIf {
    effect: Option<Box<dyn Effect>>,
    condition: Option<Box<dyn Condition>>,
}

impl SyntaxElement for DoIf {
    fn init(
        &mut self,
        _exprs: &[Option<ExprRef>],
        _matched_pattern: usize,
        _delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool {
        let (Some(effect), Some(condition)) = (result.regexes.first(), result.regexes.get(1))
        else {
            return false;
        };
        let Some(_scope) = DoIfScope::enter() else {
            state.logger().error("Do if effects may not be nested!");
            return false;
        };
        let flags = ParseFlags::all();
        self.effect =
            SkriptParser::new(state, effect.text.trim(), flags, ParseContext::Default).parse_effect();
        if self.effect.is_none() {
            return false;
        }
        self.condition = SkriptParser::new(state, condition.text.trim(), flags, ParseContext::Default)
            .parse_condition();
        self.condition.is_some()
    }
}

impl Effect for DoIf {
    fn execute(&self, event: &Event) -> RuntimeResult<()> {
        self.walk(event).map(|_| ())
    }

    fn walk(&self, event: &Event) -> RuntimeResult<Flow> {
        let (Some(effect), Some(condition)) = (&self.effect, &self.condition) else {
            return Ok(Flow::Continue);
        };
        if condition.check(event)? {
            return effect.walk(event);
        }
        Ok(Flow::Continue)
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String {
        let effect = self.effect.as_ref().map(|e| e.describe(event, debug));
        let condition = self.condition.as_ref().map(|c| c.describe(event, debug));
        format!(
            "{} if {}",
            effect.unwrap_or_default(),
            condition.unwrap_or_default()
        )
    }
}
