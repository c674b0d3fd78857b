use std::collections::BTreeSet;

use super::ast::{Expr, Stmt};

/// Names every script environment defines up front; never reported as refs.
pub const BUILTINS: &[&str] = &["p", "undefined", "NaN", "Infinity"];

/// Free identifiers of a script: every name it reads or writes outside the
/// reach of its own declarations, minus builtins. `var` is hoisted to the
/// whole script; `let`/`const`, declared loop bindings and `catch`
/// parameters only cover their block.
pub fn free_identifiers(body: &[Stmt]) -> BTreeSet<String> {
    let mut crawler = Crawler {
        seen: BTreeSet::new(),
        hoisted: BTreeSet::new(),
        scopes: vec![BTreeSet::new()],
    };
    crawler.statements(body);
    let Crawler { seen, hoisted, .. } = crawler;
    seen.into_iter()
        .filter(|name| !hoisted.contains(name) && !BUILTINS.contains(&name.as_str()))
        .collect()
}

struct Crawler {
    seen: BTreeSet<String>,
    hoisted: BTreeSet<String>,
    scopes: Vec<BTreeSet<String>>,
}

impl Crawler {
    fn reference(&mut self, name: &str) {
        if !self.scopes.iter().any(|scope| scope.contains(name)) {
            self.seen.insert(name.to_string());
        }
    }

    fn scoped(&mut self, bindings: impl IntoIterator<Item = String>, f: impl FnOnce(&mut Self)) {
        self.scopes.push(bindings.into_iter().collect());
        f(self);
        self.scopes.pop();
    }

    fn statements(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.statement(stmt);
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        self.scoped(None, |c| c.statements(stmts));
    }

    fn statement(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Empty | Stmt::Break | Stmt::Continue => {}
            Stmt::Expr(e) | Stmt::Throw(e) => self.expression(e),
            Stmt::Decl { hoisted, decls } => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        self.expression(init);
                    }
                    if *hoisted {
                        self.hoisted.insert(name.clone());
                    } else if let Some(scope) = self.scopes.last_mut() {
                        scope.insert(name.clone());
                    }
                }
            }
            Stmt::Block(body) => self.block(body),
            Stmt::If { test, cons, alt } => {
                self.expression(test);
                self.statement(cons);
                if let Some(alt) = alt {
                    self.statement(alt);
                }
            }
            Stmt::While { test, body } | Stmt::DoWhile { body, test } => {
                self.expression(test);
                self.statement(body);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.scoped(None, |c| {
                if let Some(init) = init {
                    c.statement(init);
                }
                for e in [test, update].into_iter().flatten() {
                    c.expression(e);
                }
                c.statement(body);
            }),
            Stmt::ForEach {
                binding,
                declared,
                object,
                body,
                ..
            } => {
                self.expression(object);
                if *declared {
                    self.scoped(Some(binding.clone()), |c| c.statement(body));
                } else {
                    self.reference(binding);
                    self.statement(body);
                }
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                self.expression(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.expression(test);
                    }
                    self.block(&case.body);
                }
            }
            Stmt::Try {
                body,
                param,
                handler,
                finalizer,
            } => {
                self.block(body);
                if let Some(handler) = handler {
                    self.scoped(param.clone(), |c| c.statements(handler));
                }
                if let Some(finalizer) = finalizer {
                    self.block(finalizer);
                }
            }
        }
    }

    fn expression(&mut self, expr: &Expr) {
        match expr {
            Expr::Num(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null => {}
            Expr::Ident(name) | Expr::Update { target: name, .. } => self.reference(name),
            Expr::Assign { target, value, .. } => {
                self.reference(target);
                self.expression(value);
            }
            Expr::Array(items) | Expr::Seq(items) => {
                for item in items {
                    self.expression(item);
                }
            }
            Expr::Unary(_, operand) => self.expression(operand),
            Expr::Binary(_, lhs, rhs) | Expr::Logical(_, lhs, rhs) => {
                self.expression(lhs);
                self.expression(rhs);
            }
            Expr::Cond { test, cons, alt } => {
                self.expression(test);
                self.expression(cons);
                self.expression(alt);
            }
            Expr::Call { callee, args } => {
                self.expression(callee);
                for arg in args {
                    self.expression(arg);
                }
            }
            // `obj.name`: only `obj` is a reference
            Expr::Member { object, .. } => self.expression(object),
            Expr::Index { object, index } => {
                self.expression(object);
                self.expression(index);
            }
        }
    }
}
