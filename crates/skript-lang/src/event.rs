//! The runtime context a trigger is walked against.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::trigger::{NodeId, Scheduler, TriggerId};
use crate::value::Value;
use crate::variables::Variables;

/// Items produced by looping an expression: the list index, if the source
/// has one, and the value.
pub type IndexedIter = Box<dyn Iterator<Item = (Option<String>, Value)> + Send>;

/// Identifies one loop section of one trigger.
pub type LoopKey = (TriggerId, NodeId);

struct LoopFrame {
    iter: IndexedIter,
    current: Option<(Option<String>, Value)>,
}

/// A fired event.
///
/// Holds the event's values (`player`, `message`, ...), its local variables,
/// and the per-walk state of loops. Nothing walk-specific is stored on the
/// trigger itself, so one trigger can be walked for many events at once.
pub struct Event {
    name: String,
    values: FxHashMap<String, Value>,
    locals: Arc<Variables>,
    loops: Mutex<FxHashMap<LoopKey, LoopFrame>>,
    depth: usize,
    return_value: Mutex<Option<Vec<Value>>>,
    cancelled: AtomicBool,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Event {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            values: FxHashMap::default(),
            locals: Arc::new(Variables::new()),
            loops: Mutex::new(FxHashMap::default()),
            depth: 0,
            return_value: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            scheduler: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_lowercase(), value);
        self
    }

    /// Scheduler used for delays inside function calls made by this event.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// The event a script function body runs against.
    pub(crate) fn for_function(parent: &Self, function: &str) -> Self {
        Self {
            name: format!("function {function}"),
            depth: parent.depth + 1,
            scheduler: parent.scheduler.clone(),
            ..Self::new("")
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn locals(&self) -> &Variables {
        &self.locals
    }

    /// Shared handle to the locals, for iterators that outlive a borrow.
    pub fn locals_handle(&self) -> Arc<Variables> {
        Arc::clone(&self.locals)
    }

    /// Function call nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn scheduler(&self) -> Option<&Arc<dyn Scheduler>> {
        self.scheduler.as_ref()
    }

    pub fn cancel(&self) {
        self.set_cancelled(true);
    }

    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::Relaxed);
    }

    /// A copy for work that continues on another thread. Values, locals and
    /// the scheduler are shared; loop frames and the return slot are not.
    pub fn detach(&self) -> Self {
        Self {
            name: self.name.clone(),
            values: self.values.clone(),
            locals: Arc::clone(&self.locals),
            depth: self.depth,
            scheduler: self.scheduler.clone(),
            cancelled: AtomicBool::new(self.is_cancelled()),
            ..Self::new("")
        }
    }

    /// A copy for a walk started from inside this event's own walk. Like
    /// [`Event::detach`], but one level deeper, so faults in the nested walk
    /// are left to the caller to report.
    pub fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.detach()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn set_return_value(&self, values: Vec<Value>) {
        *self.return_value.lock() = Some(values);
    }

    pub fn take_return_value(&self) -> Option<Vec<Value>> {
        self.return_value.lock().take()
    }

    pub(crate) fn start_loop(&self, key: LoopKey, iter: IndexedIter) {
        self.loops.lock().insert(
            key,
            LoopFrame {
                iter,
                current: None,
            },
        );
    }

    /// Move a loop to its next item. Returns false, and forgets the loop,
    /// once it is exhausted.
    pub(crate) fn advance_loop(&self, key: LoopKey) -> bool {
        let mut loops = self.loops.lock();
        let Some(frame) = loops.get_mut(&key) else {
            return false;
        };
        frame.current = frame.iter.next();
        if frame.current.is_none() {
            loops.remove(&key);
            return false;
        }
        true
    }

    pub(crate) fn is_looping(&self, key: LoopKey) -> bool {
        self.loops.lock().contains_key(&key)
    }

    /// Current item of a running loop.
    pub fn loop_item(&self, key: LoopKey) -> Option<(Option<String>, Value)> {
        self.loops.lock().get(&key).and_then(|f| f.current.clone())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("values", &self.values)
            .field("depth", &self.depth)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_frames() {
        let event = Event::new("test");
        let key = (TriggerId(1), NodeId(0));
        let items = vec![(None, Value::Number(1.0)), (None, Value::Number(2.0))];
        event.start_loop(key, Box::new(items.into_iter()));

        assert!(event.advance_loop(key));
        assert_eq!(event.loop_item(key), Some((None, Value::Number(1.0))));
        assert!(event.advance_loop(key));
        assert!(!event.advance_loop(key));
        assert!(!event.is_looping(key));
    }

    #[test]
    fn test_function_event_depth() {
        let event = Event::new("join").with_value("player", Value::object("player", "Notch"));
        let inner = Event::for_function(&event, "greet");
        assert_eq!(inner.depth(), 1);
        assert_eq!(inner.name(), "function greet");
        assert!(inner.value("player").is_none());
    }
}
