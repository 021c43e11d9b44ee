use std::sync::Arc;

use tracing::debug;

use crate::config::{Node as ConfigNode, SectionNode};
use crate::dispatch::Statement;
use crate::kleenean::Kleenean;
use crate::matcher::validate_line;
use crate::parser::{LoopScope, ParseContext, ParseFlags, ParserState, SkriptParser};
use crate::trigger::{Node, NodeId, NodeKind, Trigger, TriggerId};
use crate::types::OBJECT;

const EMPTY_SECTION: &str = "Empty configuration section! You might want to indent one or more of the \
                             subsequent lines to make them belong to this section or remove the colon at \
                             the end of the line if you don't want this line to start a section.";

/// Build the body of `section` into a trigger named `name`.
///
/// Lines that cannot be understood are reported through the state's logger
/// and left out; the trigger is built from everything else.
pub fn build_trigger(state: &ParserState, name: &str, section: &SectionNode) -> Arc<Trigger> {
    let mut builder = Builder {
        state,
        id: TriggerId::next(),
        nodes: Vec::new(),
        bodies: Vec::new(),
    };
    let body = builder.load_items(section, None, None);
    builder.link(&body, None);
    debug!(trigger = name, nodes = builder.nodes.len(), "built trigger");
    Arc::new(Trigger {
        id: builder.id,
        name: name.to_string(),
        script: state.script_name().to_string(),
        nodes: builder.nodes,
        first: body.first().copied(),
    })
}

struct Builder<'s> {
    state: &'s ParserState,
    id: TriggerId,
    nodes: Vec<Node>,
    /// Direct children of each section node, in order. Else branches are
    /// reached through their conditional, not listed here.
    bodies: Vec<Vec<NodeId>>,
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| text.get(prefix.len()..))
}

impl Builder<'_> {
    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>, enclosing_loop: Option<NodeId>, line: usize, text: &str) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(Node {
            kind,
            parent,
            next: None,
            line,
            text: text.to_string(),
            enclosing_loop,
        });
        self.bodies.push(Vec::new());
        id
    }

    fn parser(&self, text: &str) -> SkriptParser<'_> {
        SkriptParser::new(self.state, text, ParseFlags::all(), ParseContext::Default)
    }

    fn set_first(&mut self, id: NodeId, body: Vec<NodeId>) {
        if let NodeKind::Conditional { first, .. }
        | NodeKind::Loop { first, .. }
        | NodeKind::While { first, .. } = &mut self.nodes[id.index()].kind
        {
            *first = body.first().copied();
        }
        self.bodies[id.index()] = body;
    }

    /// The last node of the conditional chain ending the body so far, if
    /// that chain can still take an `else`.
    fn open_chain(&self, items: &[NodeId]) -> Option<NodeId> {
        let mut current = *items.last()?;
        loop {
            match &self.nodes[current.index()].kind {
                NodeKind::Conditional {
                    condition,
                    else_branch,
                    ..
                } => match else_branch {
                    Some(next) => current = *next,
                    None if condition.is_some() => return Some(current),
                    None => return None,
                },
                _ => return None,
            }
        }
    }

    fn load_items(
        &mut self,
        section: &SectionNode,
        parent: Option<NodeId>,
        enclosing_loop: Option<NodeId>,
    ) -> Vec<NodeId> {
        let state = self.state;
        let logger = state.logger();
        if section.is_empty() && section.line != 0 {
            state.set_line(section.line);
            logger.warning(EMPTY_SECTION);
        }

        let mut items = Vec::new();
        let mut delay_before_last_if = Kleenean::False;

        for node in section.children() {
            state.set_line(node.line());
            match node {
                ConfigNode::Entry(entry) => {
                    let text = state.replace_options(&entry.text);
                    if !validate_line(&text, state) {
                        continue;
                    }
                    let Some(statement) = self.parser(&text).parse_statement() else {
                        continue;
                    };
                    let kind = match statement {
                        Statement::Effect(effect) => {
                            if effect.delays() {
                                state.set_has_delay_before(Kleenean::True);
                            }
                            NodeKind::Effect(effect)
                        }
                        Statement::Condition(condition) => NodeKind::Condition(condition),
                    };
                    items.push(self.push(kind, parent, enclosing_loop, entry.line, &text));
                }
                ConfigNode::Section(inner) => {
                    let header = state.replace_options(&inner.key);
                    if !validate_line(&header, state) {
                        continue;
                    }
                    self.load_section(inner, &header, parent, enclosing_loop, &mut items, &mut delay_before_last_if);
                }
                ConfigNode::Void { .. } => {}
            }
        }
        items
    }

    fn load_section(
        &mut self,
        section: &SectionNode,
        header: &str,
        parent: Option<NodeId>,
        enclosing_loop: Option<NodeId>,
        items: &mut Vec<NodeId>,
        delay_before_last_if: &mut Kleenean,
    ) {
        let state = self.state;
        let logger = state.logger();
        let line = section.line;

        if let Some(looped) = strip_prefix_ignore_case(header, "loop ") {
            let log = logger.start();
            let Some(expr) = self.parser(looped).parse_expression(&[OBJECT]) else {
                log.print_error(Some(&format!("Can't understand this loop: '{header}'")));
                return;
            };
            log.print_log();
            if expr.is_single() {
                logger.error(format!(
                    "Can't loop {} because it's only a single value",
                    expr.describe(None, false)
                ));
                return;
            }
            let had = state.has_delay_before();
            let id = self.push(
                NodeKind::Loop {
                    expr: Arc::clone(&expr),
                    first: None,
                },
                parent,
                enclosing_loop,
                line,
                header,
            );
            state.push_loop(LoopScope {
                key: (self.id, id),
                expr: Some(expr),
            });
            let body = self.load_items(section, Some(id), Some(id));
            state.pop_loop();
            self.set_first(id, body);
            items.push(id);
            if had != Kleenean::True && state.has_delay_before() != Kleenean::False {
                state.set_has_delay_before(Kleenean::Unknown);
            }
        } else if let Some(condition_text) = strip_prefix_ignore_case(header, "while ") {
            let Some(condition) = self.parser(condition_text).parse_condition() else {
                return;
            };
            let had = state.has_delay_before();
            let id = self.push(
                NodeKind::While {
                    condition,
                    first: None,
                },
                parent,
                enclosing_loop,
                line,
                header,
            );
            state.push_loop(LoopScope {
                key: (self.id, id),
                expr: None,
            });
            let body = self.load_items(section, Some(id), Some(id));
            state.pop_loop();
            self.set_first(id, body);
            items.push(id);
            if had != Kleenean::True && state.has_delay_before() != Kleenean::False {
                state.set_has_delay_before(Kleenean::Unknown);
            }
        } else if header.eq_ignore_ascii_case("else") {
            let Some(chain_end) = self.open_chain(items) else {
                logger.error("'else' has to be placed just after an 'if' or 'else if' section");
                return;
            };
            let after_last_if = state.has_delay_before();
            state.set_has_delay_before(*delay_before_last_if);
            let id = self.push_else(None, chain_end, parent, enclosing_loop, line, header);
            let body = self.load_items(section, Some(id), enclosing_loop);
            self.set_first(id, body);
            state.set_has_delay_before(
                delay_before_last_if.or(after_last_if.and(state.has_delay_before())),
            );
        } else if let Some(condition_text) = strip_prefix_ignore_case(header, "else if ") {
            let Some(chain_end) = self.open_chain(items) else {
                logger.error("'else if' has to be placed just after another 'if' or 'else if' section");
                return;
            };
            let default = format!("can't understand this condition: '{condition_text}'");
            let Some(condition) = self.parse_condition(condition_text, &default) else {
                return;
            };
            let after_last_if = state.has_delay_before();
            state.set_has_delay_before(*delay_before_last_if);
            let id = self.push_else(Some(condition), chain_end, parent, enclosing_loop, line, header);
            let body = self.load_items(section, Some(id), enclosing_loop);
            self.set_first(id, body);
            state.set_has_delay_before(delay_before_last_if.or(
                after_last_if.and(state.has_delay_before().and(Kleenean::Unknown)),
            ));
        } else {
            let condition_text = strip_prefix_ignore_case(header, "if ").unwrap_or(header);
            let default = format!("can't understand this condition: '{condition_text}'");
            let Some(condition) = self.parse_condition(condition_text, &default) else {
                return;
            };
            let had = state.has_delay_before();
            *delay_before_last_if = had;
            let id = self.push(
                NodeKind::Conditional {
                    condition: Some(condition),
                    first: None,
                    else_branch: None,
                },
                parent,
                enclosing_loop,
                line,
                header,
            );
            let body = self.load_items(section, Some(id), enclosing_loop);
            self.set_first(id, body);
            items.push(id);
            state.set_has_delay_before(had.or(state.has_delay_before().and(Kleenean::Unknown)));
        }
    }

    fn parse_condition(&self, text: &str, default: &str) -> Option<Box<dyn crate::syntax::Condition>> {
        let logger = self.state.logger();
        let log = logger.start();
        let condition = self.parser(text).parse_condition();
        if condition.is_some() {
            log.print_log();
        } else {
            log.print_error(Some(default));
        }
        condition
    }

    fn push_else(
        &mut self,
        condition: Option<Box<dyn crate::syntax::Condition>>,
        chain_end: NodeId,
        parent: Option<NodeId>,
        enclosing_loop: Option<NodeId>,
        line: usize,
        header: &str,
    ) -> NodeId {
        let id = self.push(
            NodeKind::Conditional {
                condition,
                first: None,
                else_branch: None,
            },
            parent,
            enclosing_loop,
            line,
            header,
        );
        if let NodeKind::Conditional { else_branch, .. } = &mut self.nodes[chain_end.index()].kind {
            *else_branch = Some(id);
        }
        id
    }

    /// Point every node of `body` at its successor, the last one at `tail`.
    fn link(&mut self, body: &[NodeId], tail: Option<NodeId>) {
        for (i, &id) in body.iter().enumerate() {
            self.link_node(id, body.get(i + 1).copied().or(tail));
        }
    }

    fn link_node(&mut self, id: NodeId, next: Option<NodeId>) {
        self.nodes[id.index()].next = next;
        let body = std::mem::take(&mut self.bodies[id.index()]);
        let kind = &self.nodes[id.index()].kind;
        let is_loop = kind.is_loop();
        let else_branch = match kind {
            NodeKind::Conditional { else_branch, .. } => *else_branch,
            _ => None,
        };
        if is_loop {
            self.link(&body, Some(id));
        } else {
            self.link(&body, next);
        }
        if let Some(branch) = else_branch {
            self.link_node(branch, next);
        }
        self.bodies[id.index()] = body;
    }
}
