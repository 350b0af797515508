//! Function dependency graph.
//!
//! Builds a reachability graph from the entry points: a module-level
//! `main` binding when one exists and is callable, otherwise the whole
//! top-level statement sequence. Two edge kinds are tracked: direct
//! calls and containment (a parent lambda contains the lambdas defined
//! inside it): and reachability is a DFS over their union. Callables
//! that are not reachable are dropped before code emission.

use crate::ast::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// Virtual root node for the top-level statement sequence.
pub const ENTRY: &str = "<entry>";

#[derive(Debug, Default)]
pub struct DepGraph {
    /// node → nodes it calls or contains
    edges: FxHashMap<String, FxHashSet<String>>,
    roots: Vec<String>,
    /// All known callable names (function bindings + lifted lambdas)
    callables: FxHashSet<String>,
}

impl DepGraph {
    pub fn build(module: &Module) -> Self {
        let mut graph = DepGraph::default();

        for lifted in &module.lambdas {
            graph.callables.insert(lifted.name.clone());
        }
        for stmt in &module.statements {
            if let Statement::Binding(b) = stmt {
                if matches!(b.value, Expression::Lambda(_)) {
                    graph.callables.insert(b.name.clone());
                }
            }
        }

        let has_main = graph.callables.contains("main");
        graph.roots.push(if has_main { "main".to_string() } else { ENTRY.to_string() });

        for stmt in &module.statements {
            match stmt {
                Statement::Binding(b) => {
                    if let Expression::Lambda(lambda) = &b.value {
                        // Function binding: body edges originate at the
                        // binding name; the lifted alias points at it too.
                        graph.scan_lambda(&b.name, lambda);
                        graph.add_edge(&lambda.name.clone(), &b.name.clone());
                    } else {
                        graph.scan_expr(ENTRY, &b.value);
                    }
                }
                other => graph.scan_stmt(ENTRY, other),
            }
        }

        graph
    }

    /// DFS from the entry roots over the union of call and containment
    /// edges.
    pub fn reachable(&self) -> FxHashSet<String> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<String> = self.roots.clone();

        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(next) = self.edges.get(&node) {
                for n in next {
                    if !seen.contains(n) {
                        stack.push(n.clone());
                    }
                }
            }
        }

        seen
    }

    /// Is the named callable reachable from the entry roots?
    pub fn is_reachable(&self, name: &str) -> bool {
        self.reachable().contains(name)
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    fn scan_lambda(&mut self, owner: &str, lambda: &LambdaExpression) {
        // Containment edge: the owner contains this lambda's body
        for clause in &lambda.clauses {
            self.scan_expr(owner, &clause.body);
        }
    }

    fn scan_stmt(&mut self, owner: &str, stmt: &Statement) {
        match stmt {
            Statement::Binding(b) => self.scan_expr(owner, &b.value),
            Statement::IndexedUpdate(u) => {
                self.scan_expr(owner, &u.target.object);
                self.scan_expr(owner, &u.target.index);
                self.scan_expr(owner, &u.value);
            }
            Statement::Loop(l) => {
                self.scan_expr(owner, &l.iterable);
                for s in &l.body.statements {
                    self.scan_stmt(owner, s);
                }
                if let Some(r) = &l.reducer {
                    self.scan_expr(owner, r);
                }
            }
            Statement::Return(r) => {
                if let Some(v) = &r.value {
                    self.scan_expr(owner, v);
                }
            }
            Statement::Defer(d) => self.scan_expr(owner, &d.expression),
            Statement::ArenaBlock(a) => {
                for s in &a.body.statements {
                    self.scan_stmt(owner, s);
                }
            }
            Statement::ClassDecl(c) => {
                for (_, lambda) in &c.methods {
                    self.add_edge(owner, &lambda.name);
                    self.scan_lambda(&lambda.name.clone(), lambda);
                }
            }
            Statement::Receive(r) => self.scan_expr(owner, &r.channel),
            Statement::Expression(e) => self.scan_expr(owner, &e.expression),
            Statement::Jump(_)
            | Statement::CStructDecl(_)
            | Statement::Import(_)
            | Statement::Export(_) => {}
        }
    }

    fn scan_expr(&mut self, owner: &str, expr: &Expression) {
        match expr {
            // Any mention of a callable name keeps it alive: direct
            // calls and higher-order uses alike.
            Expression::Identifier(id) => {
                if self.callables.contains(&id.name) {
                    self.add_edge(owner, &id.name.clone());
                }
            }
            Expression::Call(c) => {
                self.scan_expr(owner, &c.callee);
                for a in &c.arguments {
                    self.scan_expr(owner, a);
                }
            }
            Expression::Binary(b) => {
                self.scan_expr(owner, &b.left);
                self.scan_expr(owner, &b.right);
            }
            Expression::Unary(u) => self.scan_expr(owner, &u.operand),
            Expression::Postfix(p) => self.scan_expr(owner, &p.operand),
            Expression::Index(i) => {
                self.scan_expr(owner, &i.object);
                self.scan_expr(owner, &i.index);
            }
            Expression::Range(r) => {
                self.scan_expr(owner, &r.start);
                self.scan_expr(owner, &r.end);
            }
            Expression::List(l) => {
                for e in &l.elements {
                    self.scan_expr(owner, e);
                }
            }
            Expression::Map(m) => {
                for (k, v) in &m.entries {
                    self.scan_expr(owner, k);
                    self.scan_expr(owner, v);
                }
            }
            Expression::Match(m) => {
                if let Some(s) = &m.scrutinee {
                    self.scan_expr(owner, s);
                }
                for clause in &m.clauses {
                    if let Some(p) = &clause.pattern {
                        self.scan_expr(owner, p);
                    }
                    if let Some(g) = &clause.guard {
                        self.scan_expr(owner, g);
                    }
                    self.scan_expr(owner, &clause.body);
                }
            }
            Expression::Block(b) => {
                for s in &b.block.statements {
                    self.scan_stmt(owner, s);
                }
            }
            Expression::Lambda(l) => {
                // Containment: the enclosing callable keeps the lambda
                self.add_edge(owner, &l.name);
                self.scan_lambda(&l.name.clone(), l);
            }
            Expression::FString(f) => {
                for part in &f.parts {
                    if let FStringPart::Expr(e) = part {
                        self.scan_expr(owner, e);
                    }
                }
            }
            Expression::Send(s) => {
                self.scan_expr(owner, &s.channel);
                self.scan_expr(owner, &s.value);
            }
            Expression::Receive(r) => self.scan_expr(owner, &r.channel),
            Expression::Spawn(s) => self.scan_expr(owner, &s.call),
            Expression::Cast(c) => self.scan_expr(owner, &c.operand),
            Expression::Move(m) => self.scan_expr(owner, &m.operand),
            Expression::Length(l) => self.scan_expr(owner, &l.operand),
            Expression::LoopExpr(l) => {
                self.scan_expr(owner, &l.iterable);
                for s in &l.body.statements {
                    self.scan_stmt(owner, s);
                }
            }
            Expression::Vector(v) => {
                for e in &v.elements {
                    self.scan_expr(owner, e);
                }
            }
            Expression::Fma(f) => {
                self.scan_expr(owner, &f.a);
                self.scan_expr(owner, &f.b);
                self.scan_expr(owner, &f.c);
            }
            Expression::Number(_)
            | Expression::Str(_)
            | Expression::Namespaced(_)
            | Expression::UnsafeBlock(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_lambda_dropped() {
        let module = crate::parse(
            "used = x -> x + 1\nunused = x -> x * 2\nresult = used(3)\n",
        )
        .unwrap();
        let graph = DepGraph::build(&module);
        let reachable = graph.reachable();
        assert!(reachable.contains("used"));
        assert!(!reachable.contains("unused"));
    }

    #[test]
    fn test_mutual_recursion_reachable() {
        let module = crate::parse(
            "is_even = n -> n == 0 { 1 => 1, _ => is_odd(n - 1) max 100 }\nis_odd = n -> n == 0 { 1 => 0, _ => is_even(n - 1) max 100 }\nresult = is_even(10)\n",
        )
        .unwrap();
        let graph = DepGraph::build(&module);
        let reachable = graph.reachable();
        assert!(reachable.contains("is_even"));
        assert!(reachable.contains("is_odd"));
    }
}
