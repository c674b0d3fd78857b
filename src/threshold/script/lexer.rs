use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Keyword(Keyword),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Var,
    Let,
    Const,
    If,
    Else,
    While,
    Do,
    For,
    In,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Try,
    Catch,
    Finally,
    Throw,
    True,
    False,
    Null,
    Typeof,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Self> {
        Some(match word {
            "var" => Self::Var,
            "let" => Self::Let,
            "const" => Self::Const,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "do" => Self::Do,
            "for" => Self::For,
            "in" => Self::In,
            "switch" => Self::Switch,
            "case" => Self::Case,
            "default" => Self::Default,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            "throw" => Self::Throw,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "typeof" => Self::Typeof,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: usize,
}

/// Longest first, so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**=", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=", "-=", "*=",
    "/=", "%=", "**", "(", ")", "{", "}", "[", "]", ";", ",", ".", "?", ":", "+", "-", "*", "/",
    "%", "<", ">", "=", "!",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        // comments
        if src[i..].starts_with("//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if src[i..].starts_with("/*") {
            match src[i + 2..].find("*/") {
                Some(end) => i += end + 4,
                None => return Err(ScriptError::syntax(i, "unterminated comment")),
            }
            continue;
        }

        let start = i;

        if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i = scan_number(bytes, i);
            let text = &src[start..i];
            let n = text
                .parse::<f64>()
                .map_err(|_| ScriptError::syntax(start, format!("invalid number `{text}`")))?;
            tokens.push(Token {
                tok: Tok::Num(n),
                pos: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            let word = &src[start..i];
            let tok = match Keyword::lookup(word) {
                Some(kw) => Tok::Keyword(kw),
                None => Tok::Ident(word.to_string()),
            };
            tokens.push(Token { tok, pos: start });
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (s, next) = scan_string(src, i)?;
            tokens.push(Token {
                tok: Tok::Str(s),
                pos: start,
            });
            i = next;
            continue;
        }

        match PUNCTUATORS.iter().find(|p| src[i..].starts_with(**p)) {
            Some(p) => {
                tokens.push(Token {
                    tok: Tok::Punct(p),
                    pos: start,
                });
                i += p.len();
            }
            None => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(ScriptError::syntax(i, format!("unexpected character `{ch}`")));
            }
        }
    }

    tokens.push(Token {
        tok: Tok::Eof,
        pos: src.len(),
    });
    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

fn scan_string(src: &str, start: usize) -> Result<(String, usize), ScriptError> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next().ok_or_else(|| ScriptError::syntax(start, "expected string"))?;
    let mut out = String::new();

    while let Some((off, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + off + c.len_utf8())),
            '\n' => break,
            '\\' => {
                let (_, esc) = chars
                    .next()
                    .ok_or_else(|| ScriptError::syntax(start, "unterminated string"))?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            other => out.push(other),
        }
    }
    Err(ScriptError::syntax(start, "unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn threshold_expression() {
        assert_eq!(
            kinds("p(95) < 500"),
            vec![
                Tok::Ident("p".into()),
                Tok::Punct("("),
                Tok::Num(95.0),
                Tok::Punct(")"),
                Tok::Punct("<"),
                Tok::Num(500.0),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn longest_punctuator_wins() {
        assert_eq!(
            kinds("a !== b ** 2"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("!=="),
                Tok::Ident("b".into()),
                Tok::Punct("**"),
                Tok::Num(2.0),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn numbers_strings_and_comments() {
        assert_eq!(
            kinds("1.5e3 .25 'it\\'s' /* skip */ \"x\" // tail"),
            vec![
                Tok::Num(1500.0),
                Tok::Num(0.25),
                Tok::Str("it's".into()),
                Tok::Str("x".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn errors_carry_position() {
        match tokenize("a # b") {
            Err(ScriptError::Syntax { pos, .. }) => assert_eq!(pos, 2),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(tokenize("'open").is_err());
        assert!(tokenize("/* open").is_err());
    }
}
