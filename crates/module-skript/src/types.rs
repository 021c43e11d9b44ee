//! Built-in types and their literal parsers.

use std::time::Duration;

use skript_lang::expr::EventValueDefault;
use skript_lang::value::{TICK, Value};
use skript_lang::{ClassInfo, ParseContext, RegistryBuilder};

pub fn register(builder: &mut RegistryBuilder) {
    builder
        .register_type(
            ClassInfo::new("boolean")
                .name("boolean", "booleans")
                .parser(|s, _| parse_boolean(s).map(Value::Boolean)),
        )
        .register_type(
            ClassInfo::new("number")
                .name("number", "numbers")
                .parser(|s, _| parse_number(s).map(Value::Number)),
        )
        .register_type(
            ClassInfo::new("string")
                .name("text", "texts")
                .name("string", "strings")
                .parser(parse_text),
        )
        .register_type(
            ClassInfo::new("timespan")
                .name("timespan", "timespans")
                .parser(|s, _| parse_timespan(s).map(Value::Timespan)),
        )
        .register_type(
            ClassInfo::new("player")
                .name("player", "players")
                .parser(parse_player)
                .default_expression(EventValueDefault::new("player")),
        )
        .converter("player", "string", |v| match v {
            Value::Object(player) => Some(Value::text(&*player.id)),
            _ => None,
        });
}

fn parse_boolean(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    // Rust accepts "inf" and "nan"; scripts never mean those.
    if !s.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Quoted in scripts and event headers, raw in commands and config values.
fn parse_text(s: &str, context: ParseContext) -> Option<Value> {
    match context {
        ParseContext::Command | ParseContext::Config => Some(Value::text(s)),
        ParseContext::Default | ParseContext::Event => {
            let inner = s.strip_prefix('"')?.strip_suffix('"')?;
            let mut text = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '"' {
                    // Only doubled quotes may appear inside.
                    if chars.next() != Some('"') {
                        return None;
                    }
                }
                text.push(c);
            }
            Some(Value::Text(text))
        }
    }
}

/// Player names in commands and saved variables. Scripts refer to players
/// through expressions, never by a bare name.
fn parse_player(s: &str, context: ParseContext) -> Option<Value> {
    let is_name = (1..=16).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    match context {
        ParseContext::Command | ParseContext::Config if is_name => Some(Value::object("player", s)),
        _ => None,
    }
}

fn unit_length(unit: &str) -> Option<Duration> {
    let unit = unit.strip_suffix('s').unwrap_or(unit);
    Some(match unit {
        "tick" => TICK,
        "millisecond" => Duration::from_millis(1),
        "second" => Duration::from_secs(1),
        "minute" => Duration::from_secs(60),
        "hour" => Duration::from_secs(60 * 60),
        "day" => Duration::from_secs(24 * 60 * 60),
        _ => return None,
    })
}

/// `5 seconds`, `a tick`, `1 minute and 30 seconds`.
pub fn parse_timespan(s: &str) -> Option<Duration> {
    let lowered = s.to_lowercase().replace(',', " ");
    let words: Vec<&str> = lowered
        .split_whitespace()
        .filter(|w| *w != "and")
        .collect();
    if words.is_empty() || words.len() % 2 != 0 {
        return None;
    }
    let mut total = Duration::ZERO;
    for pair in words.chunks(2) {
        let amount = match pair[0] {
            "a" | "an" => 1.0,
            n => parse_number(n).filter(|n| *n >= 0.0)?,
        };
        let unit = unit_length(pair[1])?;
        let part = Duration::try_from_secs_f64(unit.as_secs_f64() * amount).ok()?;
        total = total.checked_add(part)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booleans() {
        assert_eq!(parse_boolean("Yes"), Some(true));
        assert_eq!(parse_boolean("off"), Some(false));
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn test_numbers_reject_words() {
        assert_eq!(parse_number("-2.5"), Some(-2.5));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("five"), None);
    }

    #[test]
    fn test_text_by_context() {
        assert_eq!(
            parse_text("\"say \"\"hi\"\"\"", ParseContext::Event),
            Some(Value::text("say \"hi\""))
        );
        assert_eq!(parse_text("\"a\"b\"", ParseContext::Default), None);
        assert_eq!(parse_text("plain", ParseContext::Default), None);
        assert_eq!(parse_text("plain", ParseContext::Config), Some(Value::text("plain")));
    }

    #[test]
    fn test_player_names_only_outside_scripts() {
        assert_eq!(
            parse_player("Notch_2", ParseContext::Command),
            Some(Value::object("player", "Notch_2"))
        );
        assert_eq!(parse_player("Notch", ParseContext::Default), None);
        assert_eq!(parse_player("two words", ParseContext::Command), None);
        assert_eq!(parse_player("a_name_far_too_long", ParseContext::Config), None);
    }

    #[test]
    fn test_timespans() {
        assert_eq!(parse_timespan("1 tick"), Some(TICK));
        assert_eq!(parse_timespan("a second"), Some(Duration::from_secs(1)));
        assert_eq!(
            parse_timespan("1 minute and 30 seconds"),
            Some(Duration::from_secs(90))
        );
        assert_eq!(parse_timespan("2 hours, 1 day"), Some(Duration::from_secs(26 * 3600)));
        assert_eq!(parse_timespan("0.5 seconds"), Some(Duration::from_millis(500)));
        assert_eq!(parse_timespan("5"), None);
        assert_eq!(parse_timespan("-1 seconds"), None);
        assert_eq!(parse_timespan("3 fortnights"), None);
    }
}
