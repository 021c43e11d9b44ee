//! Whole scripts loaded through the public host API.

use std::sync::Arc;

use module_skript::{CollectingSink, ScriptHost, events};
use skript_lang::Value;

const FUNCTIONS: &str = include_str!("scripts/functions.sk");
const LOOPS: &str = include_str!("scripts/loops.sk");
const OPTIONS: &str = include_str!("scripts/options.sk");
const DELAYS: &str = include_str!("scripts/delays.sk");
const BROKEN: &str = include_str!("scripts/broken.sk");

fn host() -> (ScriptHost, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let registry = module_skript::registry(sink.clone()).unwrap();
    (ScriptHost::new(registry), sink)
}

fn load(host: &ScriptHost, name: &str, text: &str) {
    let script = host.load_str(name, text).unwrap();
    assert!(
        !script.diagnostics.has_errors(),
        "{name}:\n{}",
        script.diagnostics.render()
    );
}

fn fire_custom(host: &ScriptHost, name: &str) -> usize {
    let event = host
        .new_event(events::CUSTOM)
        .with_value("name", Value::text(name));
    host.fire(&Arc::new(event))
}

#[test]
fn test_functions() {
    let (host, sink) = host();
    load(&host, "functions.sk", FUNCTIONS);
    host.fire_named(events::LOAD);
    assert_eq!(sink.take(), ["120", "hello, world", "hi, bob"]);
}

#[test]
fn test_loops() {
    let (host, sink) = host();
    load(&host, "loops.sk", LOOPS);
    host.fire_named(events::LOAD);
    assert_eq!(
        sink.take(),
        ["i=1", "i=3", "i=4", "i=5", "a", "c", "done"]
    );
}

#[test]
fn test_options_and_globals() {
    let (host, sink) = host();
    load(&host, "options.sk", OPTIONS);
    host.fire_named(events::LOAD);
    assert_eq!(fire_custom(&host, "score"), 1);
    assert_eq!(fire_custom(&host, "score"), 1);
    assert_eq!(fire_custom(&host, "clear"), 1);
    assert_eq!(fire_custom(&host, "unknown"), 0);
    assert_eq!(
        sink.take(),
        ["Welcome!", "score is 15", "score is 20", "reset by clear"]
    );
    assert!(host.env().globals.get("score").is_none());
}

#[test]
fn test_delays_follow_ticks() {
    let (host, sink) = host();
    load(&host, "delays.sk", DELAYS);

    fire_custom(&host, "countdown");
    let event = host
        .new_event(events::JOIN)
        .with_value("player", Value::object("player", "Notch"));
    host.fire(&Arc::new(event));
    assert_eq!(sink.take(), ["3", "Notch: hello Notch"]);
    assert_eq!(host.scheduler().pending(), 2);

    host.tick();
    assert_eq!(sink.take(), ["2"]);
    host.tick();
    assert_eq!(sink.take(), ["Notch has been here a while"]);
    host.tick();
    assert_eq!(sink.take(), ["1"]);
    assert_eq!(host.scheduler().pending(), 0);
    assert_eq!(host.scheduler().current_tick(), 3);
}

#[test]
fn test_broken_lines_are_skipped() {
    let (host, sink) = host();
    let script = host.load_str("broken.sk", BROKEN).unwrap();
    assert_eq!(
        script.diagnostics.errors().count(),
        3,
        "{}",
        script.diagnostics.render()
    );
    assert!(script.diagnostics.render().contains("frobnicate the server"));
    assert_eq!(script.triggers.len(), 1);

    host.fire_named(events::LOAD);
    assert_eq!(sink.take(), ["fine"]);
}

#[test]
fn test_scripts_share_functions() {
    let (host, sink) = host();
    load(&host, "functions.sk", FUNCTIONS);
    load(
        &host,
        "caller.sk",
        "on custom event \"fact\":\n    broadcast factorial(4)\n",
    );
    fire_custom(&host, "fact");
    assert_eq!(sink.take(), ["24"]);

    host.unload("functions.sk");
    let reloaded = host
        .load_str("caller.sk", "on custom event \"fact\":\n    broadcast factorial(4)\n")
        .unwrap();
    assert!(reloaded.diagnostics.has_errors());
}
