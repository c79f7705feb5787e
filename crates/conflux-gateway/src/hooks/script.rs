//! Hook rule language: lexer, parser and compiled program.
//!
//! ```text
//! # block destructive calls outside the sandbox dir
//! if toolName == "delete" && !(arguments.path startsWith "/tmp/") {
//!     block "delete outside /tmp";
//! }
//! set metadata.audited = true;
//! log "checked " + toolName;
//! ```
//!
//! Statements: `block [expr];`, `set path = expr;`, `unset path;`,
//! `log expr;`, `if expr { .. } else if expr { .. } else { .. }`.
//! There are no loops and no access to anything outside the invocation
//! context, so every program runs in time linear in its size.

use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Context fields a script may read.
pub const READABLE_ROOTS: &[&str] = &[
    "requestType",
    "serverId",
    "serverName",
    "clientId",
    "toolName",
    "arguments",
    "request",
    "response",
    "error",
    "metadata",
];

/// Context fields a script may assign or unset.
pub const WRITABLE_ROOTS: &[&str] = &["arguments", "response", "metadata"];

/// Errors from compiling or running a hook script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("{0}")]
    Runtime(String),

    #[error("script timed out")]
    Timeout,

    #[error("script exceeded its step budget")]
    StepLimit,
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
}

/// A context path such as `arguments.items[0].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Path {
    pub root: String,
    pub segments: Vec<Segment>,
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StrOp {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Path(Path),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Str(StrOp, Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, Regex),
    Add(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Block(Option<Expr>),
    Set(Path, Expr),
    Unset(Path),
    Log(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
    },
}

/// JSON number for `n`, integral when `n` has no fraction.
pub(crate) fn number_value(n: f64) -> Option<Value> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < MAX_EXACT {
        #[allow(clippy::cast_possible_truncation)]
        return Some(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n).map(Value::Number)
}

/// A compiled hook script.
#[derive(Debug, Clone)]
pub struct Script {
    pub(crate) body: Vec<Stmt>,
}

impl Script {
    /// Parse and check `source`.
    ///
    /// # Errors
    ///
    /// `ScriptError::Syntax` with the position of the first problem,
    /// including reads of unknown roots, writes to read-only roots and
    /// invalid regular expressions.
    pub fn compile(source: &str) -> Result<Self, ScriptError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };
        let mut body = Vec::new();
        while !parser.at_end() {
            body.push(parser.statement()?);
        }
        Ok(Self { body })
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::Str(_) => f.write_str("string"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Punct(p) => write!(f, "'{p}'"),
            Self::Eof => f.write_str("end of script"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    line: usize,
    column: usize,
}

const PUNCTS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "=", "(", ")", "{", "}", "[", "]", ";",
    ".", "+",
];

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>, ScriptError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let (line, column) = (self.line, self.column);
            let Some(&(offset, c)) = self.chars.peek() else {
                out.push(Spanned {
                    tok: Tok::Eof,
                    line,
                    column,
                });
                return Ok(out);
            };

            let tok = if c == '"' || c == '\'' {
                self.string(c, line, column)?
            } else if c.is_ascii_digit() {
                self.number(line, column)?
            } else if c.is_alphabetic() || c == '_' {
                let mut ident = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    ident.push(c);
                    self.bump();
                }
                Tok::Ident(ident)
            } else {
                let rest = &self.src[offset..];
                let punct: &'static str = PUNCTS
                    .iter()
                    .copied()
                    .find(|p| rest.starts_with(*p))
                    .ok_or_else(|| self.error(line, column, format!("unexpected character '{c}'")))?;
                for _ in 0..punct.len() {
                    self.bump();
                }
                Tok::Punct(punct)
            };
            out.push(Spanned { tok, line, column });
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '#' {
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn string(&mut self, quote: char, line: usize, column: usize) -> Result<Tok, ScriptError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string")),
                Some(c) if c == quote => return Ok(Tok::Str(text)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(c @ ('\\' | '"' | '\'')) => c,
                        Some(c) => {
                            return Err(self.error(
                                self.line,
                                self.column - 1,
                                format!("unknown escape '\\{c}'"),
                            ));
                        }
                        None => return Err(self.error(line, column, "unterminated string")),
                    };
                    text.push(escaped);
                }
                Some(c) => text.push(c),
            }
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<Tok, ScriptError> {
        let mut text = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.bump();
        }
        // A fraction needs a digit after the dot so `items.0` style paths
        // never lex as numbers.
        let mut lookahead = self.chars.clone();
        if let (Some((_, '.')), Some((_, d))) = (lookahead.next(), lookahead.next()) {
            if d.is_ascii_digit() {
                text.push('.');
                self.bump();
                while let Some(&(_, c)) = self.chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    text.push(c);
                    self.bump();
                }
            }
        }
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|e| self.error(line, column, format!("invalid number: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        self.peek().tok == Tok::Eof
    }

    fn error_at(spanned: &Spanned, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: spanned.line,
            column: spanned.column,
            message: message.into(),
        }
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.peek().tok, Tok::Punct(q) if *q == p)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().tok, Tok::Ident(name) if name == kw)
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), ScriptError> {
        if self.is_punct(p) {
            self.advance();
            Ok(())
        } else {
            let found = self.peek();
            Err(Self::error_at(
                found,
                format!("expected '{p}', found {}", found.tok),
            ))
        }
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let start = self.advance();
        let Tok::Ident(keyword) = &start.tok else {
            return Err(Self::error_at(
                &start,
                format!("expected a statement, found {}", start.tok),
            ));
        };

        let stmt = match keyword.as_str() {
            "block" => {
                let reason = if self.is_punct(";") {
                    None
                } else {
                    Some(self.expression()?)
                };
                Stmt::Block(reason)
            }
            "set" => {
                let path = self.writable_path()?;
                self.expect_punct("=")?;
                Stmt::Set(path, self.expression()?)
            }
            "unset" => Stmt::Unset(self.writable_path()?),
            "log" => Stmt::Log(self.expression()?),
            "if" => return self.if_chain(),
            other => {
                return Err(Self::error_at(
                    &start,
                    format!("unknown statement '{other}'"),
                ));
            }
        };
        self.expect_punct(";")?;
        Ok(stmt)
    }

    fn if_chain(&mut self) -> Result<Stmt, ScriptError> {
        let mut branches = vec![(self.expression()?, self.braced()?)];
        let mut otherwise = None;
        while self.is_keyword("else") {
            self.advance();
            if self.is_keyword("if") {
                self.advance();
                branches.push((self.expression()?, self.braced()?));
            } else {
                otherwise = Some(self.braced()?);
                break;
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn braced(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_end() {
                return Err(Self::error_at(self.peek(), "expected '}'"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn writable_path(&mut self) -> Result<Path, ScriptError> {
        let at = self.peek().clone();
        let path = self.path()?;
        if !WRITABLE_ROOTS.contains(&path.root.as_str()) {
            return Err(Self::error_at(
                &at,
                format!("'{}' is read-only", path.root),
            ));
        }
        Ok(path)
    }

    fn path(&mut self) -> Result<Path, ScriptError> {
        let at = self.advance();
        let Tok::Ident(root) = &at.tok else {
            return Err(Self::error_at(
                &at,
                format!("expected a name, found {}", at.tok),
            ));
        };
        if !READABLE_ROOTS.contains(&root.as_str()) {
            return Err(Self::error_at(&at, format!("unknown name '{root}'")));
        }

        let mut segments = Vec::new();
        loop {
            if self.is_punct(".") {
                self.advance();
                let key = self.advance();
                match &key.tok {
                    Tok::Ident(name) => segments.push(Segment::Key(name.clone())),
                    other => {
                        return Err(Self::error_at(
                            &key,
                            format!("expected a field name, found {other}"),
                        ));
                    }
                }
            } else if self.is_punct("[") {
                self.advance();
                let index = self.advance();
                match &index.tok {
                    Tok::Str(key) => segments.push(Segment::Key(key.clone())),
                    Tok::Num(n) if n.fract() == 0.0 && *n >= 0.0 => {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        segments.push(Segment::Index(*n as usize));
                    }
                    other => {
                        return Err(Self::error_at(
                            &index,
                            format!("expected an index or quoted key, found {other}"),
                        ));
                    }
                }
                self.expect_punct("]")?;
            } else {
                break;
            }
        }
        Ok(Path {
            root: root.clone(),
            segments,
        })
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.conjunction()?;
        while self.is_punct("||") {
            self.advance();
            lhs = Expr::Or(Box::new(lhs), Box::new(self.conjunction()?));
        }
        Ok(lhs)
    }

    fn conjunction(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.comparison()?;
        while self.is_punct("&&") {
            self.advance();
            lhs = Expr::And(Box::new(lhs), Box::new(self.comparison()?));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        let lhs = self.sum()?;
        let op_token = self.peek().clone();

        let cmp = match &op_token.tok {
            Tok::Punct("==") => Some(CmpOp::Eq),
            Tok::Punct("!=") => Some(CmpOp::Ne),
            Tok::Punct("<") => Some(CmpOp::Lt),
            Tok::Punct("<=") => Some(CmpOp::Le),
            Tok::Punct(">") => Some(CmpOp::Gt),
            Tok::Punct(">=") => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = cmp {
            self.advance();
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(self.sum()?)));
        }

        let Tok::Ident(word) = &op_token.tok else {
            return Ok(lhs);
        };
        let str_op = match word.as_str() {
            "contains" => StrOp::Contains,
            "startsWith" => StrOp::StartsWith,
            "endsWith" => StrOp::EndsWith,
            "matches" => {
                self.advance();
                let pattern_at = self.advance();
                let Tok::Str(pattern) = &pattern_at.tok else {
                    return Err(Self::error_at(
                        &pattern_at,
                        "'matches' needs a string literal pattern",
                    ));
                };
                let regex = Regex::new(pattern).map_err(|e| {
                    Self::error_at(&pattern_at, format!("invalid pattern: {e}"))
                })?;
                return Ok(Expr::Matches(Box::new(lhs), regex));
            }
            _ => return Ok(lhs),
        };
        self.advance();
        Ok(Expr::Str(str_op, Box::new(lhs), Box::new(self.sum()?)))
    }

    fn sum(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary()?;
        while self.is_punct("+") {
            self.advance();
            lhs = Expr::Add(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        if self.is_punct("!") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let at = self.peek().clone();
        match &at.tok {
            Tok::Str(text) => {
                self.advance();
                Ok(Expr::Literal(Value::String(text.clone())))
            }
            Tok::Num(n) => {
                self.advance();
                number_value(*n)
                    .map(Expr::Literal)
                    .ok_or_else(|| Self::error_at(&at, "number out of range"))
            }
            Tok::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Tok::Ident(word) => match word.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Literal(Value::Null))
                }
                _ => self.path().map(Expr::Path),
            },
            other => Err(Self::error_at(
                &at,
                format!("expected an expression, found {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_position(source: &str) -> (usize, usize, String) {
        match Script::compile(source) {
            Err(ScriptError::Syntax {
                line,
                column,
                message,
            }) => (line, column, message),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_compiles_full_grammar() {
        let source = r#"
            # comment
            if toolName == "delete" && !(arguments.path startsWith "/tmp/") {
                block "delete outside /tmp";
            } else if arguments["dry-run"] == true || arguments.items[0] > 2.5 {
                unset arguments.force;
            } else {
                set metadata.seen = true;
            }
            if serverName matches "^a.*" { log "on alpha: " + toolName; }
            block;
        "#;
        let script = Script::compile(source).unwrap();
        assert_eq!(script.body.len(), 3);
    }

    #[test]
    fn test_reports_line_and_column() {
        let (line, column, message) = syntax_position("log toolName;\nset arguments.x = ;");
        assert_eq!((line, column), (2, 19));
        assert!(message.contains("expected an expression"));
    }

    #[test]
    fn test_rejects_writes_to_read_only_roots() {
        let (_, _, message) = syntax_position("set toolName = \"x\";");
        assert!(message.contains("read-only"));
    }

    #[test]
    fn test_rejects_unknown_names() {
        let (_, _, message) = syntax_position("if process.env { block; }");
        assert!(message.contains("unknown name 'process'"));
    }

    #[test]
    fn test_rejects_bad_regex_at_compile_time() {
        let (_, _, message) = syntax_position("if toolName matches \"(\" { block; }");
        assert!(message.contains("invalid pattern"));
    }

    #[test]
    fn test_missing_semicolon() {
        let (line, _, message) = syntax_position("block \"x\"\nlog toolName;");
        assert_eq!(line, 2);
        assert!(message.contains("expected ';'"));
    }

    #[test]
    fn test_unterminated_string() {
        let (_, column, message) = syntax_position("log  'abc");
        assert_eq!(column, 6);
        assert!(message.contains("unterminated"));
    }

    #[test]
    fn test_path_display() {
        let Stmt::Unset(path) = &Script::compile("unset arguments.a[2].b;").unwrap().body[0]
        else {
            panic!("expected unset");
        };
        assert_eq!(path.to_string(), "arguments.a[2].b");
    }
}
