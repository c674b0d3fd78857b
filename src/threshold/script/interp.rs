use std::collections::HashMap;
use std::fmt::{self, Write as _};

use super::ast::{BinOp, Expr, LogicalOp, Stmt, UnaryOp};
use super::ScriptError;
use crate::stats::Sink;

/// Statements (and loop iterations) one run may execute.
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

/// Largest value a script may hold: string bytes, or array elements
/// counted through nested arrays.
pub const MAX_VALUE_SIZE: usize = 1 << 20;

/// Building or copying this much of a value costs one step.
const SIZE_PER_STEP: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<Value>),
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `p(pct)`: the `pct`th percentile of the bound sink.
    Percentile,
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Builtin(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined | Self::Builtin(_) => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Num(n) => *n,
            Self::Str(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse().unwrap_or(f64::NAN)
                }
            }
            Self::Array(items) => match items.as_slice() {
                [] => 0.0,
                [only] => only.to_number(),
                _ => f64::NAN,
            },
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Array(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Builtin(_) => "function",
        }
    }

    fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    fn size(&self) -> usize {
        match self {
            Self::Str(s) => s.len(),
            Self::Array(items) => items.len() + items.iter().map(Value::size).sum::<usize>(),
            _ => 0,
        }
    }
}

/// A `fmt::Write` sink that refuses to grow past `MAX_VALUE_SIZE`.
struct CappedString(String);

impl fmt::Write for CappedString {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.0.len() + s.len() > MAX_VALUE_SIZE {
            return Err(fmt::Error);
        }
        self.0.push_str(s);
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => fmt_number(*n, f),
            Self::Str(s) => f.write_str(s),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Builtin(Builtin::Percentile) => f.write_str("function p() { [native code] }"),
        }
    }
}

fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == n.trunc() && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

// ─── Runtime ─────────────────────────────────────────────────────

/// The sandbox threshold scripts run in: global bindings, the currently
/// bound sink, and a step budget. Not reentrant; `run` takes `&mut self`.
pub struct Runtime {
    globals: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    sink: Option<Sink>,
    completion: Value,
    steps: u64,
    step_limit: u64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        let globals = HashMap::from([
            ("p".to_string(), Value::Builtin(Builtin::Percentile)),
            ("undefined".to_string(), Value::Undefined),
            ("NaN".to_string(), Value::Num(f64::NAN)),
            ("Infinity".to_string(), Value::Num(f64::INFINITY)),
        ]);
        Self {
            globals,
            scopes: Vec::new(),
            sink: None,
            completion: Value::Undefined,
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Makes `sink` the target of `p()` and exposes its formatted values
    /// as globals.
    pub fn bind_sink(&mut self, sink: Sink) {
        for (name, value) in sink.format() {
            self.globals.insert(name, Value::Num(value));
        }
        self.sink = Some(sink);
    }

    /// Executes `body` and returns the value of the last expression
    /// statement evaluated (the script's completion value).
    pub fn run(&mut self, body: &[Stmt]) -> Result<Value, ScriptError> {
        self.scopes.clear();
        self.completion = Value::Undefined;
        self.steps = 0;
        match self.exec_block(body)? {
            Flow::Normal => Ok(std::mem::replace(&mut self.completion, Value::Undefined)),
            Flow::Break | Flow::Continue => Err(ScriptError::Syntax {
                pos: 0,
                message: "`break`/`continue` outside of a loop or switch".into(),
            }),
        }
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.charge(1)
    }

    fn charge(&mut self, steps: u64) -> Result<(), ScriptError> {
        self.steps += steps;
        if self.steps > self.step_limit {
            return Err(ScriptError::StepLimit(self.step_limit));
        }
        Ok(())
    }

    /// Bills the budget for a value that was just built or copied.
    fn sized(&mut self, value: Value) -> Result<Value, ScriptError> {
        let size = value.size();
        if size > MAX_VALUE_SIZE {
            return Err(ScriptError::TooLarge(MAX_VALUE_SIZE));
        }
        self.charge((size / SIZE_PER_STEP) as u64)?;
        Ok(value)
    }

    // ── Variables ───────────────────────────────────────────────

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| ScriptError::Reference(name.to_string()))
    }

    fn assign(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.globals.insert(name.to_string(), value);
    }

    fn declare(&mut self, name: &str, hoisted: bool, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) if !hoisted => {
                scope.insert(name.to_string(), value);
            }
            _ => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    // ── Statements ──────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Empty => {}
            Stmt::Expr(e) => {
                self.completion = self.eval(e)?;
            }
            Stmt::Decl { hoisted, decls } => {
                for (name, init) in decls {
                    let value = match init {
                        Some(init) => self.eval(init)?,
                        None => Value::Undefined,
                    };
                    self.declare(name, *hoisted, value);
                }
            }
            Stmt::Block(body) => return self.scoped(|rt| rt.exec_block(body)),
            Stmt::If { test, cons, alt } => {
                if self.eval(test)?.truthy() {
                    return self.exec(cons);
                } else if let Some(alt) = alt {
                    return self.exec(alt);
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test)?.truthy() {
                    self.tick()?;
                    if let Flow::Break = self.exec(body)? {
                        break;
                    }
                }
            }
            Stmt::DoWhile { body, test } => loop {
                self.tick()?;
                if let Flow::Break = self.exec(body)? {
                    break;
                }
                if !self.eval(test)?.truthy() {
                    break;
                }
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                return self.scoped(|rt| {
                    if let Some(init) = init {
                        rt.exec(init)?;
                    }
                    loop {
                        rt.tick()?;
                        if let Some(test) = test {
                            if !rt.eval(test)?.truthy() {
                                break;
                            }
                        }
                        if let Flow::Break = rt.exec(body)? {
                            break;
                        }
                        if let Some(update) = update {
                            rt.eval(update)?;
                        }
                    }
                    Ok(Flow::Normal)
                });
            }
            Stmt::ForEach {
                binding,
                declared,
                values,
                object,
                body,
            } => {
                let items = iteration_items(self.eval(object)?, *values);
                return self.scoped(|rt| {
                    for item in items {
                        rt.tick()?;
                        if *declared {
                            rt.declare(binding, false, item);
                        } else {
                            rt.assign(binding, item);
                        }
                        if let Flow::Break = rt.exec(body)? {
                            break;
                        }
                    }
                    Ok(Flow::Normal)
                });
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant)?;
                let mut start = None;
                for (i, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        if strict_equals(&value, &self.eval(test)?) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
                if let Some(start) = start {
                    // fall through from the matching case until `break`
                    for case in &cases[start..] {
                        match self.scoped(|rt| rt.exec_block(&case.body))? {
                            Flow::Normal => {}
                            Flow::Break => break,
                            Flow::Continue => return Ok(Flow::Continue),
                        }
                    }
                }
            }
            Stmt::Try {
                body,
                param,
                handler,
                finalizer,
            } => {
                let mut outcome = self.scoped(|rt| rt.exec_block(body));
                let caught = match &outcome {
                    Err(err) if err.is_catchable() => Some(err.thrown_value()),
                    _ => None,
                };
                if let (Some(thrown), Some(handler)) = (caught, handler) {
                    outcome = self.scoped(|rt| {
                        if let Some(param) = param {
                            rt.declare(param, false, thrown);
                        }
                        rt.exec_block(handler)
                    });
                }
                if let Some(finalizer) = finalizer {
                    let completion = self.completion.clone();
                    let flow = self.scoped(|rt| rt.exec_block(finalizer))?;
                    self.completion = completion;
                    if !matches!(flow, Flow::Normal) {
                        return Ok(flow);
                    }
                }
                return outcome;
            }
            Stmt::Throw(e) => {
                let value = self.eval(e)?;
                return Err(ScriptError::Thrown(value.to_string()));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    // ── Expressions ─────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        Ok(match expr {
            Expr::Num(n) => Value::Num(*n),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::Ident(name) => {
                let value = self.lookup(name)?;
                self.sized(value)?
            }
            Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?;
                self.sized(Value::Array(items))?
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => Value::Num(-v.to_number()),
                    UnaryOp::Plus => Value::Num(v.to_number()),
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Typeof => Value::Str(v.type_name().to_string()),
                }
            }
            Expr::Update {
                target,
                delta,
                prefix,
            } => {
                let old = self.lookup(target)?.to_number();
                let new = old + delta;
                self.assign(target, Value::Num(new));
                Value::Num(if *prefix { new } else { old })
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                let value = binary(*op, &l, &r)?;
                self.sized(value)?
            }
            Expr::Logical(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short_circuit {
                    l
                } else {
                    self.eval(rhs)?
                }
            }
            Expr::Assign { target, op, value } => {
                let rhs = self.eval(value)?;
                let new = match op {
                    None => rhs,
                    Some(op) => {
                        let value = binary(*op, &self.lookup(target)?, &rhs)?;
                        self.sized(value)?
                    }
                };
                self.assign(target, new.clone());
                new
            }
            Expr::Cond { test, cons, alt } => {
                if self.eval(test)?.truthy() {
                    self.eval(cons)?
                } else {
                    self.eval(alt)?
                }
            }
            Expr::Call { callee, args } => {
                let f = self.eval(callee)?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                match f {
                    Value::Builtin(builtin) => self.call(builtin, &args)?,
                    other => {
                        let name = describe(callee, &other);
                        return Err(ScriptError::Type(format!("{name} is not a function")));
                    }
                }
            }
            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                member(&obj, property)?
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                match (&obj, idx.to_number()) {
                    (Value::Undefined | Value::Null, _) => {
                        return Err(ScriptError::Type(format!("cannot index {obj}")))
                    }
                    (Value::Array(items), i) if i >= 0.0 && i.fract() == 0.0 => {
                        items.get(i as usize).cloned().unwrap_or(Value::Undefined)
                    }
                    (Value::Str(s), i) if i >= 0.0 && i.fract() == 0.0 => s
                        .chars()
                        .nth(i as usize)
                        .map_or(Value::Undefined, |c| Value::Str(c.to_string())),
                    (_, _) => match idx {
                        Value::Str(name) => member(&obj, &name)?,
                        _ => Value::Undefined,
                    },
                }
            }
            Expr::Seq(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item)?;
                }
                last
            }
        })
    }

    fn call(&self, builtin: Builtin, args: &[Value]) -> Result<Value, ScriptError> {
        match builtin {
            Builtin::Percentile => {
                let pct = args.first().map_or(f64::NAN, Value::to_number);
                let sink = self
                    .sink
                    .as_ref()
                    .ok_or_else(|| ScriptError::Type("p() called with no metric bound".into()))?;
                let undefined = || {
                    ScriptError::Type(format!("p() is not defined for {:?} metrics", sink.kind()))
                };
                sink.percentile(pct / 100.0).map(Value::Num).ok_or_else(undefined)
            }
        }
    }
}

fn describe(callee: &Expr, value: &Value) -> String {
    match callee {
        Expr::Ident(name) => name.clone(),
        _ => value.to_string(),
    }
}

fn member(obj: &Value, property: &str) -> Result<Value, ScriptError> {
    match (obj, property) {
        (Value::Undefined | Value::Null, _) => Err(ScriptError::Type(format!(
            "cannot read property `{property}` of {obj}"
        ))),
        (Value::Array(items), "length") => Ok(Value::Num(items.len() as f64)),
        (Value::Str(s), "length") => Ok(Value::Num(s.chars().count() as f64)),
        _ => Ok(Value::Undefined),
    }
}

fn iteration_items(value: Value, values: bool) -> Vec<Value> {
    match value {
        Value::Array(items) if values => items,
        Value::Array(items) => (0..items.len()).map(|i| Value::Str(i.to_string())).collect(),
        Value::Str(s) if values => s.chars().map(|c| Value::Str(c.to_string())).collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| Value::Str(i.to_string())).collect(),
        _ => Vec::new(),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ScriptError> {
    Ok(match op {
        BinOp::Add => match (l, r) {
            (Value::Str(_) | Value::Array(_), _) | (_, Value::Str(_) | Value::Array(_)) => {
                concat(l, r)?
            }
            _ => Value::Num(l.to_number() + r.to_number()),
        },
        BinOp::Sub => Value::Num(l.to_number() - r.to_number()),
        BinOp::Mul => Value::Num(l.to_number() * r.to_number()),
        BinOp::Div => Value::Num(l.to_number() / r.to_number()),
        BinOp::Rem => Value::Num(l.to_number() % r.to_number()),
        BinOp::Pow => Value::Num(l.to_number().powf(r.to_number())),
        BinOp::Eq => Value::Bool(loose_equals(l, r)),
        BinOp::NotEq => Value::Bool(!loose_equals(l, r)),
        BinOp::StrictEq => Value::Bool(strict_equals(l, r)),
        BinOp::StrictNotEq => Value::Bool(!strict_equals(l, r)),
        BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
            let ord = match (l, r) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            Value::Bool(match (op, ord) {
                (_, None) => false,
                (BinOp::Lt, Some(o)) => o.is_lt(),
                (BinOp::LtEq, Some(o)) => o.is_le(),
                (BinOp::Gt, Some(o)) => o.is_gt(),
                (_, Some(o)) => o.is_ge(),
            })
        }
    })
}

fn concat(l: &Value, r: &Value) -> Result<Value, ScriptError> {
    let mut out = CappedString(String::new());
    write!(out, "{l}{r}").map_err(|_| ScriptError::TooLarge(MAX_VALUE_SIZE))?;
    Ok(Value::Str(out.0))
}

fn strict_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Array(_), Value::Array(_)) => false,
        _ => l == r,
    }
}

fn loose_equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (a, b) if a.is_nullish() && b.is_nullish() => true,
        (a, _) | (_, a) if a.is_nullish() => false,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Array(_), Value::Array(_)) => false,
        _ => l.to_number() == r.to_number(),
    }
}
