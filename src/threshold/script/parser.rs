use super::ast::{BinOp, Case, Expr, LogicalOp, Stmt, UnaryOp};
use super::lexer::{tokenize, Keyword, Tok, Token};
use super::ScriptError;

/// How deeply statements and expressions may nest. The parser, the refs
/// crawler and the interpreter all recurse over the tree.
pub const MAX_DEPTH: usize = 128;

/// Parses a whole script into its statement list.
pub fn parse(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.push(parser.statement()?);
    }
    Ok(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    // ── Token helpers ───────────────────────────────────────────

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let pos = self.tokens[self.pos.min(self.tokens.len() - 1)].pos;
        ScriptError::syntax(pos, message)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.eat_punct(p) {
            return Ok(());
        }
        Err(self.error(format!("expected `{p}`, found {}", describe(self.peek()))))
    }

    fn is_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), Tok::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.is_kw(kw) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<(), ScriptError> {
        if self.eat_kw(kw) {
            return Ok(());
        }
        Err(self.error(format!("expected `{kw:?}`, found {}", describe(self.peek()))))
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        match self.peek() {
            Tok::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected identifier, found {}", describe(other)))),
        }
    }

    fn too_deep(&self) -> ScriptError {
        self.error(format!("nesting deeper than {MAX_DEPTH} levels"))
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Operator chains are parsed in a loop but still build a deep tree.
    fn check_height(&self, expr: &Expr) -> Result<(), ScriptError> {
        if expr.height() > MAX_DEPTH {
            return Err(self.too_deep());
        }
        Ok(())
    }

    /// Semicolons are optional.
    fn semicolon(&mut self) {
        self.eat_punct(";");
    }

    // ── Statements ──────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek() {
            Tok::Punct("{") => Ok(Stmt::Block(self.block()?)),
            Tok::Punct(";") => {
                self.advance();
                Ok(Stmt::Empty)
            }
            Tok::Keyword(Keyword::Var | Keyword::Let | Keyword::Const) => {
                let decl = self.declaration()?;
                self.semicolon();
                Ok(decl)
            }
            Tok::Keyword(Keyword::If) => {
                self.advance();
                let test = self.paren_expression()?;
                let cons = Box::new(self.statement()?);
                let alt = if self.eat_kw(Keyword::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If { test, cons, alt })
            }
            Tok::Keyword(Keyword::While) => {
                self.advance();
                let test = self.paren_expression()?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            Tok::Keyword(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.statement()?);
                self.expect_kw(Keyword::While)?;
                let test = self.paren_expression()?;
                self.semicolon();
                Ok(Stmt::DoWhile { body, test })
            }
            Tok::Keyword(Keyword::For) => self.for_statement(),
            Tok::Keyword(Keyword::Switch) => self.switch_statement(),
            Tok::Keyword(Keyword::Try) => self.try_statement(),
            Tok::Keyword(Keyword::Throw) => {
                self.advance();
                let arg = self.expression()?;
                self.semicolon();
                Ok(Stmt::Throw(arg))
            }
            Tok::Keyword(Keyword::Break) => {
                self.advance();
                self.semicolon();
                Ok(Stmt::Break)
            }
            Tok::Keyword(Keyword::Continue) => {
                self.advance();
                self.semicolon();
                Ok(Stmt::Continue)
            }
            _ => {
                let expr = self.expression()?;
                self.semicolon();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at(&Tok::Eof) {
                return Err(self.error("unterminated block"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn paren_expression(&mut self) -> Result<Expr, ScriptError> {
        self.expect_punct("(")?;
        let expr = self.expression()?;
        self.expect_punct(")")?;
        Ok(expr)
    }

    fn declaration(&mut self) -> Result<Stmt, ScriptError> {
        let hoisted = self.is_kw(Keyword::Var);
        self.advance();
        let mut decls = Vec::new();
        loop {
            let name = self.ident()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl { hoisted, decls })
    }

    fn is_each_keyword(tok: &Tok) -> Option<bool> {
        match tok {
            Tok::Keyword(Keyword::In) => Some(false),
            Tok::Ident(word) if word == "of" => Some(true),
            _ => None,
        }
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        self.expect_punct("(")?;

        let declares = matches!(
            self.peek(),
            Tok::Keyword(Keyword::Var | Keyword::Let | Keyword::Const)
        );
        let offset = usize::from(declares);
        let each = match self.peek_at(offset) {
            Tok::Ident(_) => Self::is_each_keyword(self.peek_at(offset + 1)),
            _ => None,
        };
        if let Some(values) = each {
            if declares {
                self.advance();
            }
            let binding = self.ident()?;
            self.advance();
            let object = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::ForEach {
                binding,
                declared: declares,
                values,
                object,
                body,
            });
        }

        let init = if self.is_punct(";") {
            None
        } else if declares {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let discriminant = self.paren_expression()?;
        self.expect_punct("{")?;

        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_kw(Keyword::Case) {
                Some(self.expression()?)
            } else if self.eat_kw(Keyword::Default) {
                None
            } else {
                return Err(self.error(format!(
                    "expected `case` or `default`, found {}",
                    describe(self.peek())
                )));
            };
            self.expect_punct(":")?;

            let mut body = Vec::new();
            while !self.is_kw(Keyword::Case)
                && !self.is_kw(Keyword::Default)
                && !self.is_punct("}")
            {
                if self.at(&Tok::Eof) {
                    return Err(self.error("unterminated switch"));
                }
                body.push(self.statement()?);
            }
            cases.push(Case { test, body });
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let body = self.block()?;

        let mut param = None;
        let mut handler = None;
        if self.eat_kw(Keyword::Catch) {
            if self.eat_punct("(") {
                param = Some(self.ident()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_kw(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("`try` without `catch` or `finally`"));
        }
        Ok(Stmt::Try {
            body,
            param,
            handler,
            finalizer,
        })
    }

    // ── Expressions (lowest precedence first) ───────────────────

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        let first = self.assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.assignment()?);
        }
        Ok(Expr::Seq(items))
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> Result<Expr, ScriptError> {
        let target = self.conditional()?;
        let op = match self.peek() {
            Tok::Punct("=") => None,
            Tok::Punct("+=") => Some(BinOp::Add),
            Tok::Punct("-=") => Some(BinOp::Sub),
            Tok::Punct("*=") => Some(BinOp::Mul),
            Tok::Punct("/=") => Some(BinOp::Div),
            Tok::Punct("%=") => Some(BinOp::Rem),
            Tok::Punct("**=") => Some(BinOp::Pow),
            _ => return Ok(target),
        };
        let Expr::Ident(name) = target else {
            return Err(self.error("invalid assignment target"));
        };
        self.advance();
        let value = Box::new(self.assignment()?);
        Ok(Expr::Assign {
            target: name,
            op,
            value,
        })
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let test = self.nullish()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let cons = self.assignment()?;
        self.expect_punct(":")?;
        let alt = self.assignment()?;
        Ok(Expr::Cond {
            test: Box::new(test),
            cons: Box::new(cons),
            alt: Box::new(alt),
        })
    }

    fn logical_level(
        &mut self,
        punct: &str,
        op: LogicalOp,
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        while self.eat_punct(punct) {
            let rhs = next(self)?;
            lhs = Expr::Logical(op, Box::new(lhs), Box::new(rhs));
            self.check_height(&lhs)?;
        }
        Ok(lhs)
    }

    fn nullish(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level("??", LogicalOp::Nullish, Self::logical_or)
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level("||", LogicalOp::Or, Self::logical_and)
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        self.logical_level("&&", LogicalOp::And, Self::equality)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (p, op) in ops {
                if self.eat_punct(p) {
                    let rhs = next(self)?;
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                    self.check_height(&lhs)?;
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNotEq),
                ("==", BinOp::Eq),
                ("!=", BinOp::NotEq),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                ("<=", BinOp::LtEq),
                (">=", BinOp::GtEq),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::exponent,
        )
    }

    fn exponent(&mut self) -> Result<Expr, ScriptError> {
        let base = self.unary()?;
        if self.eat_punct("**") {
            let power = self.nested(Self::exponent)?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(power)));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Tok::Punct("!") => UnaryOp::Not,
            Tok::Punct("-") => UnaryOp::Neg,
            Tok::Punct("+") => UnaryOp::Plus,
            Tok::Keyword(Keyword::Typeof) => UnaryOp::Typeof,
            Tok::Punct(p @ ("++" | "--")) => {
                let delta = if *p == "++" { 1.0 } else { -1.0 };
                self.advance();
                return match self.unary()? {
                    Expr::Ident(target) => Ok(Expr::Update {
                        target,
                        delta,
                        prefix: true,
                    }),
                    _ => Err(self.error("invalid update target")),
                };
            }
            _ => return self.postfix(),
        };
        self.advance();
        Ok(Expr::Unary(op, Box::new(self.unary()?)))
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let expr = self.call_member()?;
        let delta = match self.peek() {
            Tok::Punct("++") => 1.0,
            Tok::Punct("--") => -1.0,
            _ => return Ok(expr),
        };
        let Expr::Ident(target) = expr else {
            return Err(self.error("invalid update target"));
        };
        self.advance();
        Ok(Expr::Update {
            target,
            delta,
            prefix: false,
        })
    }

    fn call_member(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.eat_punct(".") {
                let property = self.ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
            self.check_height(&expr)?;
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let expr = match self.peek().clone() {
            Tok::Num(n) => Expr::Num(n),
            Tok::Str(s) => Expr::Str(s),
            Tok::Ident(name) => Expr::Ident(name),
            Tok::Keyword(Keyword::True) => Expr::Bool(true),
            Tok::Keyword(Keyword::False) => Expr::Bool(false),
            Tok::Keyword(Keyword::Null) => Expr::Null,
            Tok::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            Tok::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                return Ok(Expr::Array(items));
            }
            other => return Err(self.error(format!("unexpected {}", describe(&other)))),
        };
        self.advance();
        Ok(expr)
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Num(n) => format!("number `{n}`"),
        Tok::Str(s) => format!("string {s:?}"),
        Tok::Ident(name) => format!("identifier `{name}`"),
        Tok::Keyword(kw) => format!("keyword `{}`", format!("{kw:?}").to_lowercase()),
        Tok::Punct(p) => format!("`{p}`"),
        Tok::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        match parse(src).unwrap().as_slice() {
            [Stmt::Expr(e)] => e.clone(),
            other => panic!("expected one expression statement, got {other:?}"),
        }
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    #[test]
    fn percentile_comparison() {
        assert_eq!(
            expr("p(95) < 500"),
            Expr::Binary(
                BinOp::Lt,
                Box::new(Expr::Call {
                    callee: ident("p"),
                    args: vec![Expr::Num(95.0)],
                }),
                Box::new(Expr::Num(500.0)),
            )
        );
    }

    #[test]
    fn precedence_and_associativity() {
        // a || b && c  ==>  a || (b && c)
        assert_eq!(
            expr("a || b && c"),
            Expr::Logical(
                LogicalOp::Or,
                ident("a"),
                Box::new(Expr::Logical(LogicalOp::And, ident("b"), ident("c"))),
            )
        );
        // 1 - 2 - 3  ==>  (1 - 2) - 3
        assert_eq!(
            expr("1 - 2 - 3"),
            Expr::Binary(
                BinOp::Sub,
                Box::new(Expr::Binary(
                    BinOp::Sub,
                    Box::new(Expr::Num(1.0)),
                    Box::new(Expr::Num(2.0)),
                )),
                Box::new(Expr::Num(3.0)),
            )
        );
        // 2 ** 3 ** 2  ==>  2 ** (3 ** 2)
        assert!(matches!(
            expr("2 ** 3 ** 2"),
            Expr::Binary(BinOp::Pow, _, rhs) if matches!(*rhs, Expr::Binary(BinOp::Pow, _, _))
        ));
    }

    #[test]
    fn conditional_and_assignment() {
        assert!(matches!(expr("x = a ? 1 : 2"), Expr::Assign { op: None, .. }));
        assert!(matches!(expr("x += 1"), Expr::Assign { op: Some(BinOp::Add), .. }));
        assert!(parse("1 = 2").is_err());
        assert!(parse("f() = 2").is_err());
    }

    #[test]
    fn statements() {
        let src = r#"
            var hits = 0;
            for (var i = 0; i < 3; i++) { hits += i }
            for (let k in list) continue;
            for (v of list) { break }
            while (false) {}
            do { hits-- } while (hits > 10)
            switch (hits) { case 1: hits = 2; break; default: hits = 0 }
            try { throw "boom" } catch (e) { hits = e } finally { hits }
            if (hits) { 1 } else 2
        "#;
        let body = parse(src).unwrap();
        assert_eq!(body.len(), 9);
        assert!(matches!(body[1], Stmt::For { .. }));
        assert!(matches!(
            &body[2],
            Stmt::ForEach { declared: true, values: false, binding, .. } if binding == "k"
        ));
        assert!(matches!(&body[3], Stmt::ForEach { declared: false, values: true, .. }));
        assert!(matches!(&body[6], Stmt::Switch { cases, .. } if cases.len() == 2));
        assert!(matches!(&body[7], Stmt::Try { param: Some(p), .. } if p == "e"));
    }

    #[test]
    fn member_index_and_arrays() {
        assert!(matches!(
            expr("[1, 2, 3].length"),
            Expr::Member { property, .. } if property == "length"
        ));
        assert!(matches!(expr("xs[0]"), Expr::Index { .. }));
        assert!(matches!(expr("a, b"), Expr::Seq(items) if items.len() == 2));
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("{}1{} > 0", "(".repeat(20_000), ")".repeat(20_000));
        let blocks = format!("{}1{}", "{".repeat(20_000), "}".repeat(20_000));
        let nots = format!("{}true", "!".repeat(20_000));
        let assigns = format!("{}1", "a = ".repeat(20_000));
        let sums = format!("1{}", " + 1".repeat(20_000));
        let powers = format!("2{}", " ** 2".repeat(20_000));
        let calls = format!("f{}", "()".repeat(20_000));
        let ors = format!("a{}", " || a".repeat(20_000));
        for src in [parens, blocks, nots, assigns, sums, powers, calls, ors] {
            assert!(matches!(parse(&src), Err(ScriptError::Syntax { .. })));
        }

        let modest = format!("{}1{} > 0", "(".repeat(50), ")".repeat(50));
        assert!(parse(&modest).is_ok());
        assert!(parse(&format!("1{}", " + 1".repeat(100))).is_ok());
    }

    #[test]
    fn malformed_sources() {
        for src in ["p(95) <", "(1 + 2", "if x", "try {}", "switch (a) { foo }", "{", "a b c ?"] {
            assert!(
                matches!(parse(src), Err(ScriptError::Syntax { .. })),
                "{src} should not parse"
            );
        }
    }
}
