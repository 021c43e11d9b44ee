//! Triggers: parsed sections stored as a flat arena of nodes.
//!
//! Every statement and section header becomes a [`Node`]. Nodes refer to
//! each other by [`NodeId`]: `next` is the node to run afterwards, `parent`
//! the section the node is in. The last node of a loop body points back at
//! the loop, the last node of a conditional body at whatever follows the
//! conditional. Walking is then a loop over ids (see [`Trigger::execute`]),
//! and suspending a walk only needs to remember the next id.

mod builder;
mod walker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use builder::build_trigger;
pub use walker::{Continuation, Scheduler, Suspension, WalkOutcome};

use crate::expr::ExprRef;
use crate::syntax::{Condition, Effect};

/// Index of a node in its trigger's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-unique id of a trigger, part of every loop key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(pub(crate) u64);

impl TriggerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub enum NodeKind {
    Effect(Box<dyn Effect>),
    /// A condition used as a statement: if it fails, the rest of the section
    /// is skipped.
    Condition(Box<dyn Condition>),
    /// `if`, `else if` (with a condition) and `else` (without).
    Conditional {
        condition: Option<Box<dyn Condition>>,
        first: Option<NodeId>,
        else_branch: Option<NodeId>,
    },
    Loop {
        expr: ExprRef,
        first: Option<NodeId>,
    },
    While {
        condition: Box<dyn Condition>,
        first: Option<NodeId>,
    },
}

impl NodeKind {
    const fn label(&self) -> &'static str {
        match self {
            Self::Effect(_) => "effect",
            Self::Condition(_) => "condition",
            Self::Conditional { .. } => "if",
            Self::Loop { .. } => "loop",
            Self::While { .. } => "while",
        }
    }

    const fn is_loop(&self) -> bool {
        matches!(self, Self::Loop { .. } | Self::While { .. })
    }
}

pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub next: Option<NodeId>,
    pub line: usize,
    /// The source line, after option substitution.
    pub text: String,
    /// Target of `continue`.
    pub enclosing_loop: Option<NodeId>,
}

/// A parsed trigger or function body.
pub struct Trigger {
    id: TriggerId,
    name: String,
    script: String,
    nodes: Vec<Node>,
    first: Option<NodeId>,
}

impl Trigger {
    pub const fn id(&self) -> TriggerId {
        self.id
    }

    /// e.g. `on join` or `function greet`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub const fn first(&self) -> Option<NodeId> {
        self.first
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.node(parent).parent;
        }
        depth
    }

    /// One line per node in arena order, indented by nesting.
    pub fn dump(&self) -> String {
        let mut out = format!("{} (first {})\n", self.name, show(self.first));
        for (index, node) in self.nodes.iter().enumerate() {
            let id = NodeId(u32::try_from(index).unwrap_or(u32::MAX));
            let pad = "    ".repeat(self.depth(id));
            let mut extra = String::new();
            match &node.kind {
                NodeKind::Conditional {
                    first, else_branch, ..
                } => {
                    extra = format!(" body {} else {}", show(*first), show(*else_branch));
                }
                NodeKind::Loop { first, .. } | NodeKind::While { first, .. } => {
                    extra = format!(" body {}", show(*first));
                }
                NodeKind::Effect(_) | NodeKind::Condition(_) => {}
            }
            out.push_str(&format!(
                "{pad}{id} {} `{}` -> {}{extra}\n",
                node.kind.label(),
                node.text,
                show(node.next)
            ));
        }
        out
    }
}

fn show(id: Option<NodeId>) -> String {
    id.map_or_else(|| "end".to_string(), |id| id.to_string())
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}
