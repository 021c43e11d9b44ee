//! A host wired to a collecting sink, for unit tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use skript_lang::{LoadedScript, Value};

use crate::{CollectingSink, ScriptHost};

pub(crate) struct Harness {
    pub(crate) host: ScriptHost,
    sink: Arc<CollectingSink>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let sink = Arc::new(CollectingSink::new());
        let registry = crate::registry(sink.clone()).unwrap();
        Self {
            host: ScriptHost::new(registry),
            sink,
        }
    }

    /// Load `script` as `test.sk`, failing the test on any diagnostic error.
    pub(crate) fn load(&self, script: &str) -> Arc<LoadedScript> {
        let loaded = self.host.load_str("test.sk", script).unwrap();
        assert!(
            !loaded.diagnostics.has_errors(),
            "{}",
            loaded.diagnostics.render()
        );
        loaded
    }

    /// Load `script` as `errors.sk` and return its rendered diagnostics.
    pub(crate) fn load_errors(&self, script: &str) -> String {
        let loaded = self.host.load_str("errors.sk", script).unwrap();
        loaded.diagnostics.render()
    }

    /// Load, fire `event` and wait for every suspended walk to finish.
    pub(crate) fn run(&self, script: &str, event: &str) {
        self.load(script);
        self.fire(event);
        self.settle();
    }

    pub(crate) fn fire(&self, event: &str) -> usize {
        self.host.fire_named(event)
    }

    pub(crate) fn fire_player(&self, event: &str, player: &str) -> usize {
        let event = self
            .host
            .new_event(event)
            .with_value("player", Value::object("player", player));
        self.host.fire(&Arc::new(event))
    }

    /// Tick until nothing is pending.
    pub(crate) fn settle(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.host.scheduler().pending() > 0 {
            assert!(Instant::now() < deadline, "walks still pending after 5s");
            self.host.tick();
            std::thread::yield_now();
        }
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.sink.messages()
    }
}
