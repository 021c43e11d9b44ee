//! Named variable storage.
//!
//! Variables form a tree keyed by the `::`-separated parts of their name, so
//! `{scores::*}` is simply the children of the `scores` node. Keys are stored
//! lowercased; numeric keys order numerically and before textual ones.
//!
//! Every method takes the lock once, so a single call is atomic. A sequence
//! of calls is not: two walks incrementing the same variable may interleave.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::value::Value;

/// Separates the parts of a variable name.
pub const SEPARATOR: &str = "::";
/// Prefix marking an event-local variable.
pub const LOCAL_PREFIX: char = '_';
/// Suffix marking a whole list.
pub const LIST_SUFFIX: &str = "::*";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Key(String);

impl Key {
    fn number(&self) -> Option<f64> {
        self.0.parse::<f64>().ok().filter(|n| n.is_finite())
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.number(), other.number()) {
            (Some(a), Some(b)) => a.total_cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Node {
    value: Option<Value>,
    children: BTreeMap<Key, Node>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    fn find(&self, path: &[String]) -> Option<&Self> {
        path.iter()
            .try_fold(self, |node, part| node.children.get(&Key(part.clone())))
    }

    fn find_or_create(&mut self, path: &[String]) -> &mut Self {
        path.iter().fold(self, |node, part| {
            node.children.entry(Key(part.clone())).or_default()
        })
    }

    /// Apply `f` to the node at `path` if it exists, then prune empty nodes
    /// on the way back up.
    fn modify(&mut self, path: &[String], f: &mut dyn FnMut(&mut Self)) {
        match path.split_first() {
            None => f(self),
            Some((head, rest)) => {
                let key = Key(head.clone());
                if let Some(child) = self.children.get_mut(&key) {
                    child.modify(rest, f);
                    if child.is_empty() {
                        self.children.remove(&key);
                    }
                }
            }
        }
    }

    fn count(&self) -> usize {
        usize::from(self.value.is_some()) + self.children.values().map(Self::count).sum::<usize>()
    }
}

fn split(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(SEPARATOR)
        .map(str::to_string)
        .collect()
}

/// Strip the list suffix, if any.
fn list_prefix(name: &str) -> &str {
    name.strip_suffix(LIST_SUFFIX).unwrap_or(name)
}

/// A variable store. Shared between walks via `Arc`.
#[derive(Debug, Default)]
pub struct Variables {
    root: RwLock<Node>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a single variable.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.root.read().find(&split(name)).and_then(|n| n.value.clone())
    }

    /// Set or delete a single variable. Children are untouched.
    pub fn set(&self, name: &str, value: Option<Value>) {
        let path = split(name);
        let mut root = self.root.write();
        match value {
            Some(v) => root.find_or_create(&path).value = Some(v),
            None => root.modify(&path, &mut |node: &mut Node| node.value = None),
        }
    }

    /// Read-modify-write a single variable under one lock.
    pub fn update(&self, name: &str, f: impl FnOnce(Option<&Value>) -> Option<Value>) {
        let path = split(name);
        let mut root = self.root.write();
        let current = root.find(&path).and_then(|n| n.value.as_ref());
        match f(current) {
            Some(v) => root.find_or_create(&path).value = Some(v),
            None => root.modify(&path, &mut |node: &mut Node| node.value = None),
        }
    }

    /// Direct children of a list that hold a value, in list order.
    pub fn list(&self, name: &str) -> Vec<(String, Value)> {
        let root = self.root.read();
        root.find(&split(list_prefix(name)))
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|(k, child)| child.value.clone().map(|v| (k.0.clone(), v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of a list's keys.
    pub fn keys(&self, name: &str) -> Vec<String> {
        self.list(name).into_iter().map(|(k, _)| k).collect()
    }

    /// Delete every element of a list, keeping the list's own value.
    pub fn clear_list(&self, name: &str) {
        let path = split(list_prefix(name));
        self.root
            .write()
            .modify(&path, &mut |node: &mut Node| node.children.clear());
    }

    /// Replace a list with `values` at indices `1..=n`.
    pub fn set_list(&self, name: &str, values: &[Value]) {
        let path = split(list_prefix(name));
        let mut root = self.root.write();
        root.modify(&path, &mut |node: &mut Node| node.children.clear());
        if values.is_empty() {
            return;
        }
        let node = root.find_or_create(&path);
        for (i, value) in values.iter().enumerate() {
            node.children
                .entry(Key((i + 1).to_string()))
                .or_default()
                .value = Some(value.clone());
        }
    }

    /// Store each value at the first free integer index.
    pub fn append_list(&self, name: &str, values: &[Value]) {
        if values.is_empty() {
            return;
        }
        let path = split(list_prefix(name));
        let mut root = self.root.write();
        let node = root.find_or_create(&path);
        let mut index = 1usize;
        for value in values {
            while node
                .children
                .get(&Key(index.to_string()))
                .is_some_and(|c| c.value.is_some())
            {
                index += 1;
            }
            node.children
                .entry(Key(index.to_string()))
                .or_default()
                .value = Some(value.clone());
            index += 1;
        }
    }

    /// Remove list entries equal to the given values. With `all`, every
    /// matching entry goes; otherwise only the first match per value.
    pub fn remove_from_list(&self, name: &str, values: &[Value], all: bool) {
        let path = split(list_prefix(name));
        let mut root = self.root.write();
        root.modify(&path, &mut |node: &mut Node| {
            let mut doomed: Vec<Key> = Vec::new();
            if all {
                for (key, child) in &node.children {
                    if child
                        .value
                        .as_ref()
                        .is_some_and(|v| values.iter().any(|d| v.equals(d)))
                    {
                        doomed.push(key.clone());
                    }
                }
            } else {
                for delta in values {
                    let hit = node.children.iter().find(|(key, child)| {
                        !doomed.contains(key) && child.value.as_ref().is_some_and(|v| v.equals(delta))
                    });
                    if let Some((key, _)) = hit {
                        doomed.push(key.clone());
                    }
                }
            }
            for key in doomed {
                if let Some(child) = node.children.get_mut(&key) {
                    child.value = None;
                    if child.is_empty() {
                        node.children.remove(&key);
                    }
                }
            }
        });
    }

    /// Every stored value with its full name, parents before children.
    pub fn entries(&self) -> Vec<(String, Value)> {
        fn walk(node: &Node, prefix: &str, out: &mut Vec<(String, Value)>) {
            for (key, child) in &node.children {
                let name = if prefix.is_empty() {
                    key.0.clone()
                } else {
                    format!("{prefix}{SEPARATOR}{}", key.0)
                };
                if let Some(value) = &child.value {
                    out.push((name.clone(), value.clone()));
                }
                walk(child, &name, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root.read(), "", &mut out);
        out
    }

    /// Number of stored values, at any depth.
    pub fn len(&self) -> usize {
        self.root.read().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_values() {
        let vars = Variables::new();
        vars.set("Score", Some(Value::Number(3.0)));
        assert_eq!(vars.get("score"), Some(Value::Number(3.0)));
        vars.set("score", None);
        assert_eq!(vars.get("score"), None);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_list_order_is_numeric() {
        let vars = Variables::new();
        for key in ["10", "2", "b", "1", "a"] {
            vars.set(&format!("list::{key}"), Some(Value::text(key)));
        }
        assert_eq!(vars.keys("list::*"), vec!["1", "2", "10", "a", "b"]);
    }

    #[test]
    fn test_set_and_append_list() {
        let vars = Variables::new();
        vars.set_list("l::*", &[Value::Number(1.0), Value::Number(2.0)]);
        vars.set("l::2", None);
        vars.append_list("l::*", &[Value::Number(5.0), Value::Number(6.0)]);
        let values: Vec<_> = vars.list("l::*").into_iter().collect();
        assert_eq!(
            values,
            vec![
                ("1".to_string(), Value::Number(1.0)),
                ("2".to_string(), Value::Number(5.0)),
                ("3".to_string(), Value::Number(6.0)),
            ]
        );
    }

    #[test]
    fn test_remove_first_vs_all() {
        let vars = Variables::new();
        let x = Value::text("x");
        vars.set_list("l", &[x.clone(), Value::text("y"), x.clone()]);
        vars.remove_from_list("l", &[x.clone()], false);
        assert_eq!(vars.keys("l::*"), vec!["2", "3"]);
        vars.remove_from_list("l", &[x], true);
        assert_eq!(vars.keys("l::*"), vec!["2"]);
    }

    #[test]
    fn test_list_and_value_are_separate() {
        let vars = Variables::new();
        vars.set("a", Some(Value::Number(1.0)));
        vars.set("a::1", Some(Value::Number(2.0)));
        vars.clear_list("a::*");
        assert_eq!(vars.get("a"), Some(Value::Number(1.0)));
        assert!(vars.list("a::*").is_empty());
    }

    #[test]
    fn test_entries_are_full_names() {
        let vars = Variables::new();
        vars.set("b", Some(Value::Number(1.0)));
        vars.set_list("a::*", &[Value::text("x"), Value::text("y")]);
        vars.set("a", Some(Value::Boolean(true)));
        let names: Vec<String> = vars.entries().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "a::1", "a::2", "b"]);
    }

    #[test]
    fn test_update() {
        let vars = Variables::new();
        vars.update("n", |v| Some(Value::Number(v.map_or(0.0, Value::as_number) + 1.0)));
        vars.update("n", |v| Some(Value::Number(v.map_or(0.0, Value::as_number) + 1.0)));
        assert_eq!(vars.get("n"), Some(Value::Number(2.0)));
    }
}
