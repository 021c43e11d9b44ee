//! The indentation-based section tree scripts are written in.
//!
//! ```text
//! on join:              <- section "on join"
//!     if x is 1:        <- nested section
//!         broadcast "#" <- entry
//! ```
//!
//! A file is indented with either spaces or tabs. The first indented line
//! fixes the width of one level.

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Entry(EntryNode),
    Section(SectionNode),
    /// A blank or comment-only line.
    Void { line: usize },
}

impl Node {
    pub const fn line(&self) -> usize {
        match self {
            Self::Entry(entry) => entry.line,
            Self::Section(section) => section.line,
            Self::Void { line } => *line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryNode {
    /// The whole line, without indentation and comments.
    pub text: String,
    pub line: usize,
}

impl EntryNode {
    /// Split `key: value`, as used by the options section.
    pub fn key_value(&self) -> Option<(&str, &str)> {
        self.text
            .split_once(": ")
            .map(|(k, v)| (k.trim(), v.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNode {
    /// The header without its trailing `:`.
    pub key: String,
    pub line: usize,
    pub nodes: Vec<Node>,
}

impl SectionNode {
    fn new(key: &str, line: usize) -> Self {
        Self {
            key: key.to_string(),
            line,
            nodes: Vec::new(),
        }
    }

    /// Read a whole file. The returned root section is named `name` and has
    /// line 0.
    pub fn parse(name: &str, text: &str) -> Result<Self, ConfigError> {
        let mut stack = vec![Self::new(name, 0)];
        let mut unit: Option<(char, usize)> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let content = strip_comment(raw);
            let content = content.trim_end();
            let body = content.trim_start();
            if body.is_empty() {
                if let Some(section) = stack.last_mut() {
                    section.nodes.push(Node::Void { line });
                }
                continue;
            }

            let indent: Vec<char> = content
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect();
            let depth = match (indent.first(), unit) {
                (None, _) => 0,
                (Some(&c), None) => {
                    check_uniform(&indent, c, line)?;
                    unit = Some((c, indent.len()));
                    1
                }
                (Some(_), Some((c, width))) => {
                    check_uniform(&indent, c, line)?;
                    let current = stack.len() - 1;
                    if indent.len() % width != 0 || indent.len() / width > current {
                        let expected = (indent.len() / width).min(current) * width;
                        return Err(indentation_error(expected, indent.len(), c, line));
                    }
                    indent.len() / width
                }
            };

            let current = stack.len() - 1;
            if depth > current {
                let (c, _) = unit.unwrap_or((' ', 0));
                return Err(indentation_error(0, indent.len(), c, line));
            }
            while stack.len() - 1 > depth {
                close(&mut stack);
            }

            match body.strip_suffix(':') {
                Some(key) => stack.push(Self::new(key.trim_end(), line)),
                None => {
                    if let Some(section) = stack.last_mut() {
                        section.nodes.push(Node::Entry(EntryNode {
                            text: body.to_string(),
                            line,
                        }));
                    }
                }
            }
        }

        while stack.len() > 1 {
            close(&mut stack);
        }
        stack.pop().ok_or_else(|| ConfigError {
            line: 0,
            message: "empty section stack".to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| matches!(n, Node::Void { .. }))
    }

    /// Entries and sections, skipping void lines.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !matches!(n, Node::Void { .. }))
    }

    /// Indented outline of the tree, for tests and debugging.
    pub fn dump(&self) -> String {
        fn walk(section: &SectionNode, depth: usize, out: &mut String) {
            for node in section.children() {
                let pad = "    ".repeat(depth);
                match node {
                    Node::Entry(entry) => {
                        out.push_str(&format!("{pad}{}: {}\n", entry.line, entry.text));
                    }
                    Node::Section(inner) => {
                        out.push_str(&format!("{pad}{}: {}:\n", inner.line, inner.key));
                        walk(inner, depth + 1, out);
                    }
                    Node::Void { .. } => {}
                }
            }
        }
        let mut out = String::new();
        walk(self, 0, &mut out);
        out
    }
}

fn close(stack: &mut Vec<SectionNode>) {
    if let Some(done) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.nodes.push(Node::Section(done));
        }
    }
}

/// `#` starts a comment; `##` is a literal `#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' {
            if chars.peek() == Some(&'#') {
                chars.next();
                out.push('#');
                continue;
            }
            break;
        }
        out.push(c);
    }
    out
}

fn check_uniform(indent: &[char], expected: char, line: usize) -> Result<(), ConfigError> {
    if indent.iter().all(|c| *c == expected) {
        Ok(())
    } else {
        Err(ConfigError {
            line,
            message: "indentation error: indent must not mix tabs and spaces".to_string(),
        })
    }
}

fn indentation_error(expected: usize, found: usize, unit: char, line: usize) -> ConfigError {
    let what = if unit == '\t' { "tabs" } else { "spaces" };
    ConfigError {
        line,
        message: format!("indentation error: expected {expected} {what}, found {found}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sections() {
        let text = "\
options:
    greeting: hi ## there # comment

on join:
    if {x} is 1:
        broadcast \"a\"
    broadcast \"b\"
";
        let root = SectionNode::parse("test.sk", text).unwrap();
        insta::assert_snapshot!(root.dump(), @r#"
        1: options:
            2: greeting: hi # there
        4: on join:
            5: if {x} is 1:
                6: broadcast "a"
            7: broadcast "b"
        "#);
        let Node::Section(options) = &root.children().next().unwrap() else {
            panic!("expected a section");
        };
        let Node::Entry(entry) = options.children().next().unwrap() else {
            panic!("expected an entry");
        };
        assert_eq!(entry.key_value(), Some(("greeting", "hi # there")));
    }

    #[test]
    fn test_tabs() {
        let root = SectionNode::parse("t.sk", "a:\n\tb:\n\t\tc\n\td\n").unwrap();
        assert_eq!(root.dump(), "1: a:\n    2: b:\n        3: c\n    4: d\n");
    }

    #[test]
    fn test_too_deep() {
        let err = SectionNode::parse("t.sk", "a:\n  b\n      c\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.message, "indentation error: expected 2 spaces, found 6");
    }

    #[test]
    fn test_indent_under_entry() {
        let err = SectionNode::parse("t.sk", "a\n    b\n").unwrap_err();
        assert_eq!(err.to_string(), "indentation error: expected 0 spaces, found 4 (line 2)");
    }

    #[test]
    fn test_mixed_indentation() {
        let err = SectionNode::parse("t.sk", "a:\n    b\n\tc\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_empty_section() {
        let root = SectionNode::parse("t.sk", "on join:\n# nothing\n").unwrap();
        let Some(Node::Section(section)) = root.children().next() else {
            panic!("expected a section");
        };
        assert!(section.is_empty());
    }
}
