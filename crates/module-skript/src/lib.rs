//! Runtime for Skript scripts.
//!
//! `skript-lang` parses and walks scripts; this crate supplies the syntax
//! they are written in (types, events, effects, conditions, expressions and
//! native functions), a tick-driven scheduler for `wait` and async bodies,
//! and [`ScriptHost`], which loads scripts and fires events at them.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use module_skript::{ScriptHost, TracingSink, events};
//!
//! let registry = module_skript::registry(Arc::new(TracingSink))?;
//! let host = ScriptHost::new(registry);
//! host.load_dir("scripts".as_ref())?;
//! host.fire_named(events::LOAD);
//! loop {
//!     host.tick();
//!     # break;
//! }
//! # Ok::<(), module_skript::HostError>(())
//! ```

use std::sync::Arc;

use skript_lang::{RegistryBuilder, SyntaxRegistry};

mod conditions;
mod effects;
pub mod events;
mod expressions;
mod functions;
mod host;
mod output;
mod scheduler;
#[cfg(test)]
mod testing;
mod types;

pub use host::{HostError, HostResult, ScriptHost};
pub use output::{CollectingSink, OutputSink, TracingSink};
pub use scheduler::TickScheduler;
pub use types::parse_timespan;

/// Add the standard syntax to `builder`. Messages from `broadcast` and
/// `send` go to `sink`.
pub fn register(builder: &mut RegistryBuilder, sink: Arc<dyn OutputSink>) {
    types::register(builder);
    events::register(builder);
    functions::register(builder);
    conditions::register(builder);
    effects::register(builder, &sink);
    expressions::register(builder);
}

/// A registry holding only the standard syntax.
pub fn registry(sink: Arc<dyn OutputSink>) -> HostResult<SyntaxRegistry> {
    let mut builder = RegistryBuilder::new();
    register(&mut builder, sink);
    let registry = builder.build()?;
    tracing::debug!(
        effects = registry.effects().len(),
        conditions = registry.conditions().len(),
        expressions = registry.expressions().len(),
        events = registry.events().len(),
        "built syntax registry"
    );
    Ok(registry)
}
