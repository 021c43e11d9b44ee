//! Contracts implemented by registered syntax elements.
//!
//! A syntax element is instantiated fresh for every line that matches one
//! of its patterns. The dispatcher hands it the bound placeholder
//! expressions through [`SyntaxElement::init`]; returning `false` rejects the
//! match and lets the dispatcher try the next pattern.

use std::fmt;
use std::time::Duration;

use crate::error::RuntimeResult;
use crate::event::Event;
use crate::expr::{ExprRef, Expression};
use crate::kleenean::Kleenean;
use crate::matcher::ParseResult;
use crate::parser::ParserState;

pub trait SyntaxElement: Send + Sync {
    /// Accept or reject a structural match.
    ///
    /// `exprs` has one entry per placeholder of the matched pattern, in
    /// textual order; `None` only for placeholders declared optional with
    /// `-` that matched nothing. `delayed` says whether a delay may have
    /// happened before this line.
    ///
    /// An element that rejects the match and also logs an error through
    /// `state` ends the whole parse attempt with that error.
    fn init(
        &mut self,
        exprs: &[Option<ExprRef>],
        matched_pattern: usize,
        delayed: Kleenean,
        result: &ParseResult,
        state: &ParserState,
    ) -> bool;
}

/// Work handed to a background thread by an asynchronous effect.
pub type AsyncTask = Box<dyn FnOnce() -> RuntimeResult<()> + Send>;

/// What the walker should do after an effect ran.
pub enum Flow {
    Continue,
    /// Resume with the next item after this long.
    Delay(Duration),
    /// Run the task off-thread, then resume with the next item.
    Async(AsyncTask),
    /// End the walk successfully.
    Stop,
    /// Jump to the enclosing loop's next iteration.
    ContinueLoop,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Self::Async(_) => f.write_str("Async(..)"),
            Self::Stop => f.write_str("Stop"),
            Self::ContinueLoop => f.write_str("ContinueLoop"),
        }
    }
}

/// A statement that does something.
pub trait Effect: SyntaxElement {
    fn execute(&self, event: &Event) -> RuntimeResult<()>;

    /// Run and tell the walker how to proceed. Effects that change control
    /// flow (delays, `stop`, `continue`) override this instead of
    /// [`Effect::execute`].
    fn walk(&self, event: &Event) -> RuntimeResult<Flow> {
        self.execute(event)?;
        Ok(Flow::Continue)
    }

    /// Whether running this effect always suspends the walk. Lines after it
    /// are parsed knowing the event has passed.
    fn delays(&self) -> bool {
        false
    }

    fn describe(&self, event: Option<&Event>, debug: bool) -> String;
}

/// A boolean test. As a statement, a failing condition skips the rest of
/// its section.
pub trait Condition: SyntaxElement {
    fn check(&self, event: &Event) -> RuntimeResult<bool>;

    fn describe(&self, event: Option<&Event>, debug: bool) -> String;
}

/// The header of an `on ...:` trigger. Placeholders of event patterns are
/// parsed as literals only.
pub trait SkriptEvent: SyntaxElement {
    /// Whether a fired event should run the trigger.
    fn check(&self, event: &Event) -> bool;

    fn describe(&self, event: Option<&Event>, debug: bool) -> String;
}

/// An expression that is itself registered syntax, e.g. `size of %objects%`.
pub trait ExpressionSyntax: Expression + SyntaxElement {
    /// Convert to a shareable handle once `init` has succeeded.
    fn into_expr(self: Box<Self>) -> ExprRef;
}

impl<T: Expression + SyntaxElement + 'static> ExpressionSyntax for T {
    fn into_expr(self: Box<Self>) -> ExprRef {
        self.into_boxed_ref()
    }
}

impl fmt::Debug for dyn Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(None, true))
    }
}

impl fmt::Debug for dyn Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(None, true))
    }
}

impl fmt::Debug for dyn SkriptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(None, true))
    }
}
