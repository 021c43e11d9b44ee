//! Loaded scripts and event dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use skript_lang::value::TICK;
use skript_lang::{
    CommandOutcome, Event, LoadError, LoadResult, LoadedScript, RegistryError, Scheduler,
    ScriptEnv, ScriptLoader, StorageError, SyntaxRegistry, Value, WalkOutcome, storage,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events;
use crate::scheduler::TickScheduler;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to read script directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type HostResult<T> = Result<T, HostError>;

/// Scripts loaded against one registry, sharing globals, functions and a
/// scheduler.
pub struct ScriptHost {
    loader: ScriptLoader,
    scheduler: Arc<TickScheduler>,
    scripts: RwLock<Vec<Arc<LoadedScript>>>,
}

impl ScriptHost {
    pub fn new(registry: SyntaxRegistry) -> Self {
        Self::with_tick_length(registry, TICK)
    }

    pub fn with_tick_length(registry: SyntaxRegistry, tick_length: Duration) -> Self {
        Self {
            loader: ScriptLoader::new(ScriptEnv::new(Arc::new(registry))),
            scheduler: Arc::new(TickScheduler::new(tick_length)),
            scripts: RwLock::new(Vec::new()),
        }
    }

    pub const fn env(&self) -> &ScriptEnv {
        self.loader.env()
    }

    pub const fn scheduler(&self) -> &Arc<TickScheduler> {
        &self.scheduler
    }

    pub fn scripts(&self) -> Vec<Arc<LoadedScript>> {
        self.scripts.read().clone()
    }

    /// Load a script from text, replacing a loaded script of the same name.
    pub fn load_str(&self, name: &str, text: &str) -> LoadResult<Arc<LoadedScript>> {
        self.unload(name);
        let script = Arc::new(self.loader.load_str(name, text)?);
        self.scripts.write().push(Arc::clone(&script));
        Ok(script)
    }

    pub fn load_file(&self, path: &Path) -> LoadResult<Arc<LoadedScript>> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.load_str(&name, &text)
    }

    /// Load every `.sk` file in `dir`, in name order. Files whose name
    /// starts with `-` are disabled and skipped.
    pub fn load_dir(&self, dir: &Path) -> HostResult<Vec<Arc<LoadedScript>>> {
        let read_dir_error = |source| HostError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_dir_error)? {
            let path = entry.map_err(read_dir_error)?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_script = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sk"));
            if !is_script || !path.is_file() {
                continue;
            }
            if file_name.starts_with('-') {
                debug!(script = file_name, "skipping disabled script");
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let script = self.load_file(&path)?;
            if script.diagnostics.has_errors() {
                warn!(
                    script = script.name.as_str(),
                    "script loaded with errors:\n{}",
                    script.diagnostics.render()
                );
            }
            loaded.push(script);
        }
        info!(dir = %dir.display(), scripts = loaded.len(), "loaded script directory");
        Ok(loaded)
    }

    /// Drop a script's triggers, functions and commands. Walks already
    /// suspended keep running to their end.
    pub fn unload(&self, name: &str) -> bool {
        let mut scripts = self.scripts.write();
        let before = scripts.len();
        scripts.retain(|script| script.name != name);
        let removed = scripts.len() != before;
        drop(scripts);
        if removed {
            self.env().functions.remove_script(name);
            self.env().commands.remove_script(name);
            debug!(script = name, "unloaded script");
        }
        removed
    }

    /// A new event that suspends onto this host's scheduler.
    pub fn new_event(&self, name: &str) -> Event {
        let scheduler: Arc<dyn Scheduler> = self.scheduler.clone();
        Event::new(name).with_scheduler(scheduler)
    }

    /// Run every trigger listening to `event`. Returns how many were started.
    pub fn fire(&self, event: &Arc<Event>) -> usize {
        let registry = &self.env().registry;
        let scripts = self.scripts();
        let mut started = 0;
        for script in &scripts {
            for listener in &script.triggers {
                let listens = listener
                    .kinds
                    .iter()
                    .any(|kind| registry.kind_matches(event.name(), kind));
                if !listens || !listener.event.check(event) {
                    continue;
                }
                started += 1;
                if let WalkOutcome::Failed(e) = listener.trigger.execute(event) {
                    debug!(
                        script = script.name.as_str(),
                        trigger = listener.trigger.name(),
                        "trigger failed: {e}"
                    );
                }
            }
        }
        if started > 0 {
            debug!(event = event.name(), started, "fired event");
        }
        started
    }

    /// Fire a new event named `name` with no values.
    pub fn fire_named(&self, name: &str) -> usize {
        self.fire(&Arc::new(self.new_event(name)))
    }

    /// Run a command line such as `/heal Notch 5` for `sender`, a player
    /// name, or for the console when `sender` is `None`. Returns `None` if no
    /// loaded script declares the command.
    pub fn run_command(&self, sender: Option<&str>, line: &str) -> Option<CommandOutcome> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let (label, args) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(label, args)| (label, args.trim()));
        let command = self.env().commands.get(label)?;
        let mut event = self.new_event(events::COMMAND);
        if let Some(player) = sender {
            event = event.with_value("player", Value::object("player", player));
        }
        let outcome = command.execute(self.env(), event, args);
        match &outcome {
            CommandOutcome::Executed(WalkOutcome::Failed(e)) => {
                debug!(command = label, "command failed: {e}");
            }
            CommandOutcome::InvalidArguments { error, .. } => {
                debug!(command = label, ?error, "invalid command arguments");
            }
            _ => {}
        }
        Some(outcome)
    }

    /// Write every global variable to `path`.
    pub fn save_variables(&self, path: &Path) -> HostResult<usize> {
        let saved = storage::save(&self.env().globals, path)?;
        info!(path = %path.display(), variables = saved, "saved variables");
        Ok(saved)
    }

    /// Restore global variables saved by [`Self::save_variables`]. A missing
    /// file restores nothing.
    pub fn load_variables(&self, path: &Path) -> HostResult<usize> {
        let env = self.env();
        let loaded = storage::load(&env.globals, env.registry.types(), path)?;
        info!(path = %path.display(), variables = loaded, "loaded variables");
        Ok(loaded)
    }

    /// Advance the scheduler by one tick.
    pub fn tick(&self) -> usize {
        self.scheduler.tick()
    }
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.scripts.read().iter().map(|s| s.name.clone()).collect();
        f.debug_struct("ScriptHost")
            .field("scripts", &names)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use skript_lang::{CommandOutcome, Value, WalkOutcome};

    use crate::testing::Harness;

    #[test]
    fn test_reload_replaces_script() {
        let harness = Harness::new();
        harness.load("on load:\n    broadcast \"first\"\n");
        harness.load("on load:\n    broadcast \"second\"\n");
        assert_eq!(harness.host.scripts().len(), 1);
        harness.fire("load");
        assert_eq!(harness.messages(), ["second"]);
    }

    #[test]
    fn test_unload_removes_functions() {
        let harness = Harness::new();
        harness.load(
            "\
function twice(n: number) :: number:
    return {_n} * 2
",
        );
        assert!(harness.host.env().functions.signature("twice").is_some());
        assert!(harness.host.unload("test.sk"));
        assert!(harness.host.env().functions.signature("twice").is_none());
        assert!(!harness.host.unload("test.sk"));
    }

    #[test]
    fn test_load_dir_skips_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.sk"), "on load:\n    broadcast \"b\"\n").unwrap();
        fs::write(dir.path().join("a.sk"), "on load:\n    broadcast \"a\"\n").unwrap();
        fs::write(dir.path().join("-off.sk"), "on load:\n    broadcast \"off\"\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

        let harness = Harness::new();
        let loaded = harness.host.load_dir(dir.path()).unwrap();
        let names: Vec<_> = loaded.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a.sk", "b.sk"]);
        harness.fire("load");
        assert_eq!(harness.messages(), ["a", "b"]);
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let harness = Harness::new();
        let err = harness
            .host
            .load_dir(std::path::Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to read script directory"));
    }

    #[test]
    fn test_custom_event_filters_by_name() {
        let harness = Harness::new();
        harness.load("on custom event \"ping\":\n    broadcast \"pong\"\n");
        assert_eq!(harness.fire("load"), 0);
        let event = harness
            .host
            .new_event("custom")
            .with_value("name", skript_lang::Value::text("ping"));
        assert_eq!(harness.host.fire(&std::sync::Arc::new(event)), 1);
        let other = harness
            .host
            .new_event("custom")
            .with_value("name", skript_lang::Value::text("other"));
        assert_eq!(harness.host.fire(&std::sync::Arc::new(other)), 0);
        assert_eq!(harness.messages(), ["pong"]);
    }

    #[test]
    fn test_command_arguments() {
        let harness = Harness::new();
        harness.load(
            "\
command /give <item name: text> [<amount: number = 1>]:
    usage: /give <name> [amount]
    trigger:
        broadcast \"%arg-1% x%arg-2%\"
        broadcast \"%{_item name}% x%the 2nd argument%\"
",
        );
        let outcome = harness.host.run_command(None, "/give apple 3").unwrap();
        assert!(matches!(outcome, CommandOutcome::Executed(WalkOutcome::Completed)));
        assert!(outcome.reply().is_empty());
        harness.host.run_command(None, "GIVE pear").unwrap();
        assert_eq!(
            harness.messages(),
            ["apple x3", "apple x3", "pear x1", "pear x1"]
        );

        let outcome = harness.host.run_command(None, "give").unwrap();
        assert!(matches!(outcome, CommandOutcome::InvalidArguments { .. }));
        assert_eq!(
            outcome.reply().last().map(String::as_str),
            Some("Correct usage: /give <name> [amount]")
        );
        assert!(harness.host.run_command(None, "/take apple").is_none());
    }

    #[test]
    fn test_command_sender() {
        let harness = Harness::new();
        harness.load(
            "\
command /hello:
    executable by: players
    trigger:
        send \"hi\" to player
        broadcast \"%player% said hello\"
",
        );
        harness.host.run_command(Some("Notch"), "/hello").unwrap();
        assert_eq!(harness.messages(), ["Notch: hi", "Notch said hello"]);

        let outcome = harness.host.run_command(None, "/hello").unwrap();
        assert_eq!(outcome.reply(), ["This command can only be used by players."]);
    }

    #[test]
    fn test_player_argument() {
        let harness = Harness::new();
        harness.load(
            "\
command /poke <player>:
    trigger:
        send \"poked by %player%\" to argument
",
        );
        harness.host.run_command(Some("Notch"), "/poke jeb_").unwrap();
        let outcome = harness.host.run_command(Some("Notch"), "/poke not a name").unwrap();
        assert!(matches!(outcome, CommandOutcome::InvalidArguments { .. }));
        assert_eq!(harness.messages(), ["jeb_: poked by Notch"]);
    }

    #[test]
    fn test_argument_outside_commands() {
        let harness = Harness::new();
        insta::assert_snapshot!(harness.load_errors(
            "\
on load:
    broadcast \"%argument%\"
command /pair <number> <number>:
    trigger:
        broadcast \"%argument%\"
        broadcast \"%argument 3%\"
"
        ), @r"
        error: The expression 'argument' can only be used within a command (errors.sk, line 2)
        error: 'argument' cannot be used if the command has multiple arguments. Use 'argument 1', 'argument 2', etc. instead (errors.sk, line 5)
        error: The command doesn't have a 3rd argument (errors.sk, line 6)
        ");
    }

    #[test]
    fn test_reload_replaces_command() {
        let harness = Harness::new();
        harness.load("command /ping:\n    trigger:\n        broadcast \"one\"\n");
        harness.load("command /ping:\n    trigger:\n        broadcast \"two\"\n");
        harness.host.run_command(None, "ping").unwrap();
        assert_eq!(harness.messages(), ["two"]);
        assert!(harness.host.unload("test.sk"));
        assert!(harness.host.run_command(None, "ping").is_none());
    }

    #[test]
    fn test_variables_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variables.csv");

        let first = Harness::new();
        first.run(
            "\
on load:
    set {score::Notch} to 12
    set {motd} to \"hello, world\"
",
            "load",
        );
        let env = first.host.env();
        env.globals.set("owner", Some(Value::object("player", "Notch")));
        assert_eq!(first.host.save_variables(&path).unwrap(), 3);

        let second = Harness::new();
        assert_eq!(second.host.load_variables(&path).unwrap(), 3);
        second.run(
            "\
on load:
    broadcast \"%{motd}% %{score::Notch}%\"
    send \"welcome back\" to {owner}
",
            "load",
        );
        assert_eq!(second.messages(), ["hello, world 12", "Notch: welcome back"]);
    }
}
