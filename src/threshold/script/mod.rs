//! A small JavaScript-flavoured expression language for threshold checks.
//!
//! Scripts are statement lists (`if`, loops, `switch`, `try`/`catch`,
//! declarations, expressions); the value of the last expression statement
//! evaluated is the script's result. Before anything runs, the parsed tree is
//! crawled for the free identifiers it references, which is how a threshold
//! knows which metric values it depends on.

pub mod ast;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod refs;

use std::collections::BTreeSet;
use thiserror::Error;

pub use interp::{Runtime, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("syntax error at offset {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("uncaught exception: {0}")]
    Thrown(String),

    #[error("script exceeded its budget of {0} steps")]
    StepLimit(u64),

    #[error("script built a value larger than {0}")]
    TooLarge(usize),
}

impl ScriptError {
    pub(crate) fn syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }

    /// Everything except running out of budget can be handled by `catch`.
    fn is_catchable(&self) -> bool {
        !matches!(self, Self::StepLimit(_) | Self::TooLarge(_) | Self::Syntax { .. })
    }

    /// What a `catch (e)` binding sees.
    fn thrown_value(&self) -> Value {
        match self {
            Self::Thrown(v) => Value::Str(v.clone()),
            other => Value::Str(other.to_string()),
        }
    }
}

/// A parsed script plus the free identifiers it references.
#[derive(Debug, Clone)]
pub struct Script {
    body: Vec<ast::Stmt>,
    refs: BTreeSet<String>,
}

impl Script {
    pub fn compile(source: &str) -> Result<Self, ScriptError> {
        let body = parser::parse(source)?;
        let refs = refs::free_identifiers(&body);
        Ok(Self { body, refs })
    }

    pub fn refs(&self) -> &BTreeSet<String> {
        &self.refs
    }

    pub fn run(&self, rt: &mut Runtime) -> Result<Value, ScriptError> {
        rt.run(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_collects_refs_once() {
        let script = Script::compile("http_reqs > 100 && p(99) < budget").unwrap();
        let refs: Vec<&str> = script.refs().iter().map(String::as_str).collect();
        assert_eq!(refs, vec!["budget", "http_reqs"]);
    }

    #[test]
    fn compile_rejects_garbage() {
        assert!(matches!(Script::compile("p(95 <"), Err(ScriptError::Syntax { .. })));
    }

    #[test]
    fn caught_errors_are_described() {
        let mut rt = Runtime::new();
        let script = Script::compile("var m; try { ghost } catch (e) { m = e } m").unwrap();
        assert_eq!(
            script.run(&mut rt).unwrap(),
            Value::Str("ReferenceError: ghost is not defined".into())
        );
    }
}
