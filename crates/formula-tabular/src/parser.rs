use crate::error::{TabularError, TabularResult};

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// A bare or quoted identifier that is not followed by `(` or `[`.
    TableName(String),
    /// `[Name]`: a measure, or a column of the current row-context table.
    Measure(String),
    ColumnRef {
        table: String,
        column: String,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Calculate {
        expr: Box<Expr>,
        filters: Vec<FilterArg>,
    },
    CalculateTable {
        table: Box<Expr>,
        filters: Vec<FilterArg>,
    },
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::Less
                | BinaryOp::LessEquals
                | BinaryOp::Greater
                | BinaryOp::GreaterEquals
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossFilterSetting {
    Both,
    OneWay,
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterTarget {
    Table(String),
    Column { table: String, column: String },
}

/// A `CALCULATE` / `CALCULATETABLE` filter argument, classified by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterArg {
    /// `USERELATIONSHIP(a, b)`
    UseRelationship {
        left: (String, String),
        right: (String, String),
    },
    /// `CROSSFILTER(a, b, direction)`
    CrossFilter {
        left: (String, String),
        right: (String, String),
        setting: CrossFilterSetting,
    },
    /// `ALL(x)` / `REMOVEFILTERS(x)`
    RemoveFilters(FilterTarget),
    KeepFilters(Box<FilterArg>),
    /// `T[C] <op> scalar`
    Compare {
        table: String,
        column: String,
        op: BinaryOp,
        value: Expr,
    },
    /// `VALUES(T[C])` / `DISTINCT(T[C])`
    Values { table: String, column: String },
    /// `TREATAS(VALUES(S[C]), T[C])`
    TreatAs {
        source: (String, String),
        target: (String, String),
    },
    /// Boolean expression over the columns of a single table.
    Predicate(Expr),
    /// Any other table expression; its rows become a row filter.
    Table(Expr),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    BracketIdentifier(String),
    Number(f64),
    String(String),
    Comma,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Ampersand,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    AndAnd,
    OrOr,
    Eof,
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn consume_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&predicate) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn error(&self, message: impl std::fmt::Display) -> TabularError {
        TabularError::Parse(format!("{message} at offset {}", self.pos))
    }

    /// Reads a delimited literal where a doubled closing delimiter escapes itself.
    fn delimited(&mut self, close: char, what: &str) -> TabularResult<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(format!("unterminated {what}"))),
                Some(c) if c == close => {
                    if self.eat(close) {
                        out.push(close);
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn next_token(&mut self) -> TabularResult<(usize, Token)> {
        self.consume_while(char::is_whitespace);
        let start = self.pos;
        let Some(ch) = self.bump() else {
            return Ok((start, Token::Eof));
        };

        let token = match ch {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '=' => Token::Equals,
            '<' if self.eat('=') => Token::LessEquals,
            '<' if self.eat('>') => Token::NotEquals,
            '<' => Token::Less,
            '>' if self.eat('=') => Token::GreaterEquals,
            '>' => Token::Greater,
            '&' if self.eat('&') => Token::AndAnd,
            '&' => Token::Ampersand,
            '|' if self.eat('|') => Token::OrOr,
            '"' => Token::String(self.delimited('"', "string literal")?),
            '\'' => Token::Identifier(self.delimited('\'', "quoted identifier")?),
            '[' => Token::BracketIdentifier(self.delimited(']', "bracket identifier")?.trim().to_string()),
            c if c.is_ascii_digit() || c == '.' => {
                self.consume_while(|c| c.is_ascii_digit() || c == '.');
                let text = &self.input[start..self.pos];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| self.error(format!("invalid number {text:?}")))?;
                Token::Number(n)
            }
            c if c.is_alphabetic() || c == '_' => {
                self.consume_while(|c| c.is_alphanumeric() || c == '_' || c == '.');
                Token::Identifier(self.input[start..self.pos].to_string())
            }
            other => {
                self.pos = start;
                return Err(self.error(format!("unexpected character {other:?}")));
            }
        };
        Ok((start, token))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
    lookahead_pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> TabularResult<Self> {
        let mut lexer = Lexer::new(input);
        let (lookahead_pos, lookahead) = lexer.next_token()?;
        Ok(Self {
            lexer,
            lookahead,
            lookahead_pos,
        })
    }

    fn error(&self, message: impl std::fmt::Display) -> TabularError {
        TabularError::Parse(format!("{message} at offset {}", self.lookahead_pos))
    }

    fn bump(&mut self) -> TabularResult<Token> {
        let (pos, next) = self.lexer.next_token()?;
        self.lookahead_pos = pos;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn expect(&mut self, token: Token) -> TabularResult<()> {
        if self.lookahead != token {
            return Err(self.error(format!("expected {token:?}, found {:?}", self.lookahead)));
        }
        self.bump()?;
        Ok(())
    }

    fn parse(&mut self) -> TabularResult<Expr> {
        let expr = self.parse_expr(0)?;
        if self.lookahead != Token::Eof {
            return Err(self.error(format!("unexpected token {:?}", self.lookahead)));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self, min_prec: u8) -> TabularResult<Expr> {
        let mut left = self.parse_prefix()?;
        while let Some((op, prec)) = self.infix_binding_power() {
            if prec < min_prec {
                break;
            }
            self.bump()?;
            let right = self.parse_expr(prec + 1)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> TabularResult<Expr> {
        match self.bump()? {
            Token::Minus => {
                let expr = self.parse_expr(7)?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Negate,
                    expr: Box::new(expr),
                })
            }
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::String(s) => Ok(Expr::Text(s)),
            Token::BracketIdentifier(name) => Ok(Expr::Measure(name)),
            Token::Identifier(ident) => self.parse_ident_like(ident),
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(self.error(format!("unexpected token in expression: {other:?}"))),
        }
    }

    fn parse_ident_like(&mut self, ident: String) -> TabularResult<Expr> {
        match &self.lookahead {
            Token::LParen => {
                self.bump()?;
                let mut args = Vec::new();
                if self.lookahead != Token::RParen {
                    loop {
                        args.push(self.parse_expr(0)?);
                        if self.lookahead != Token::Comma {
                            break;
                        }
                        self.bump()?;
                    }
                }
                self.expect(Token::RParen)?;
                self.finish_call(ident, args)
            }
            Token::BracketIdentifier(column) => {
                let column = column.clone();
                self.bump()?;
                Ok(Expr::ColumnRef {
                    table: ident,
                    column,
                })
            }
            _ if ident.eq_ignore_ascii_case("TRUE") => Ok(Expr::Boolean(true)),
            _ if ident.eq_ignore_ascii_case("FALSE") => Ok(Expr::Boolean(false)),
            _ => Ok(Expr::TableName(ident)),
        }
    }

    fn finish_call(&self, name: String, args: Vec<Expr>) -> TabularResult<Expr> {
        let upper = name.to_ascii_uppercase();
        if upper != "CALCULATE" && upper != "CALCULATETABLE" {
            return Ok(Expr::Call { name, args });
        }
        let mut args = args.into_iter();
        let Some(first) = args.next() else {
            return Err(self.error(format!("{upper} expects at least 1 argument")));
        };
        let filters = args
            .map(classify_filter_arg)
            .collect::<TabularResult<Vec<_>>>()?;
        Ok(if upper == "CALCULATE" {
            Expr::Calculate {
                expr: Box::new(first),
                filters,
            }
        } else {
            Expr::CalculateTable {
                table: Box::new(first),
                filters,
            }
        })
    }

    fn infix_binding_power(&self) -> Option<(BinaryOp, u8)> {
        // Loosest to tightest: ||, &&, comparisons, &, + -, * /.
        Some(match self.lookahead {
            Token::OrOr => (BinaryOp::Or, 1),
            Token::AndAnd => (BinaryOp::And, 2),
            Token::Equals => (BinaryOp::Equals, 3),
            Token::NotEquals => (BinaryOp::NotEquals, 3),
            Token::Less => (BinaryOp::Less, 3),
            Token::LessEquals => (BinaryOp::LessEquals, 3),
            Token::Greater => (BinaryOp::Greater, 3),
            Token::GreaterEquals => (BinaryOp::GreaterEquals, 3),
            Token::Ampersand => (BinaryOp::Concat, 4),
            Token::Plus => (BinaryOp::Add, 5),
            Token::Minus => (BinaryOp::Subtract, 5),
            Token::Star => (BinaryOp::Multiply, 6),
            Token::Slash => (BinaryOp::Divide, 6),
            _ => return None,
        })
    }
}

fn column_pair(expr: &Expr, function: &str) -> TabularResult<(String, String)> {
    match expr {
        Expr::ColumnRef { table, column } => Ok((table.clone(), column.clone())),
        other => Err(TabularError::Parse(format!(
            "{function} expects column references, got {other:?}"
        ))),
    }
}

fn is_call(expr: &Expr, names: &[&str]) -> bool {
    matches!(expr, Expr::Call { name, .. } if names.iter().any(|n| name.eq_ignore_ascii_case(n)))
}

/// Classify one filter argument of `CALCULATE` / `CALCULATETABLE`.
pub(crate) fn classify_filter_arg(expr: Expr) -> TabularResult<FilterArg> {
    match expr {
        Expr::Call { name, args } => {
            let upper = name.to_ascii_uppercase();
            match (upper.as_str(), args.as_slice()) {
                ("USERELATIONSHIP", [left, right]) => Ok(FilterArg::UseRelationship {
                    left: column_pair(left, "USERELATIONSHIP")?,
                    right: column_pair(right, "USERELATIONSHIP")?,
                }),
                ("USERELATIONSHIP", _) => Err(TabularError::Parse(
                    "USERELATIONSHIP expects 2 arguments".into(),
                )),
                ("CROSSFILTER", [left, right, direction]) => {
                    let direction = match direction {
                        Expr::TableName(name) => name.as_str(),
                        Expr::Text(text) => text.as_str(),
                        other => {
                            return Err(TabularError::Parse(format!(
                                "CROSSFILTER expects a direction, got {other:?}"
                            )))
                        }
                    };
                    let setting = match direction.trim().to_ascii_uppercase().as_str() {
                        "BOTH" => CrossFilterSetting::Both,
                        "ONEWAY" | "SINGLE" => CrossFilterSetting::OneWay,
                        "NONE" => CrossFilterSetting::None,
                        other => {
                            return Err(TabularError::Parse(format!(
                                "unknown CROSSFILTER direction {other}"
                            )))
                        }
                    };
                    Ok(FilterArg::CrossFilter {
                        left: column_pair(left, "CROSSFILTER")?,
                        right: column_pair(right, "CROSSFILTER")?,
                        setting,
                    })
                }
                ("CROSSFILTER", _) => Err(TabularError::Parse(
                    "CROSSFILTER expects 3 arguments".into(),
                )),
                ("ALL" | "REMOVEFILTERS", [target]) => match target {
                    Expr::TableName(table) => {
                        Ok(FilterArg::RemoveFilters(FilterTarget::Table(table.clone())))
                    }
                    Expr::ColumnRef { table, column } => {
                        Ok(FilterArg::RemoveFilters(FilterTarget::Column {
                            table: table.clone(),
                            column: column.clone(),
                        }))
                    }
                    other => Err(TabularError::Parse(format!(
                        "{upper} expects a table or column, got {other:?}"
                    ))),
                },
                ("KEEPFILTERS", [_]) => {
                    let inner = args.into_iter().next().map(classify_filter_arg);
                    match inner {
                        Some(Ok(
                            inner @ (FilterArg::UseRelationship { .. }
                            | FilterArg::CrossFilter { .. }
                            | FilterArg::KeepFilters(_)),
                        )) => Err(TabularError::Parse(format!(
                            "KEEPFILTERS cannot wrap {inner:?}"
                        ))),
                        Some(Ok(inner)) => Ok(FilterArg::KeepFilters(Box::new(inner))),
                        Some(Err(err)) => Err(err),
                        None => Err(TabularError::Parse("KEEPFILTERS expects 1 argument".into())),
                    }
                }
                ("KEEPFILTERS", _) => Err(TabularError::Parse(
                    "KEEPFILTERS expects 1 argument".into(),
                )),
                ("VALUES" | "DISTINCT", [Expr::ColumnRef { table, column }]) => {
                    Ok(FilterArg::Values {
                        table: table.clone(),
                        column: column.clone(),
                    })
                }
                ("TREATAS", [source, target]) => {
                    let source = match source {
                        Expr::Call { args, .. } if is_call(source, &["VALUES", "DISTINCT"]) => {
                            match args.as_slice() {
                                [col] => column_pair(col, "TREATAS")?,
                                _ => {
                                    return Err(TabularError::Parse(
                                        "TREATAS source must be VALUES(column)".into(),
                                    ))
                                }
                            }
                        }
                        _ => {
                            return Err(TabularError::Parse(
                                "TREATAS source must be VALUES(column) or DISTINCT(column)".into(),
                            ))
                        }
                    };
                    Ok(FilterArg::TreatAs {
                        source,
                        target: column_pair(target, "TREATAS")?,
                    })
                }
                ("NOT" | "AND" | "OR", _) => Ok(FilterArg::Predicate(Expr::Call { name, args })),
                _ => Ok(FilterArg::Table(Expr::Call { name, args })),
            }
        }
        Expr::BinaryOp { op, left, right } if op.is_comparison() => match *left {
            Expr::ColumnRef { table, column } if !references_columns(&right) => {
                Ok(FilterArg::Compare {
                    table,
                    column,
                    op,
                    value: *right,
                })
            }
            left => Ok(FilterArg::Predicate(Expr::BinaryOp {
                op,
                left: Box::new(left),
                right,
            })),
        },
        expr @ Expr::BinaryOp {
            op: BinaryOp::And | BinaryOp::Or,
            ..
        } => Ok(FilterArg::Predicate(expr)),
        expr @ (Expr::TableName(_) | Expr::CalculateTable { .. }) => Ok(FilterArg::Table(expr)),
        other => Err(TabularError::Parse(format!(
            "unsupported filter argument {other:?}"
        ))),
    }
}

fn references_columns(expr: &Expr) -> bool {
    match expr {
        Expr::ColumnRef { .. } => true,
        Expr::UnaryOp { expr, .. } => references_columns(expr),
        Expr::BinaryOp { left, right, .. } => {
            references_columns(left) || references_columns(right)
        }
        Expr::Call { args, .. } => args.iter().any(references_columns),
        _ => false,
    }
}

pub fn parse(input: &str) -> TabularResult<Expr> {
    Parser::new(input)?.parse()
}

/// Parse and classify one standalone filter argument, as accepted by
/// [`crate::TabularEngine::apply_calculate_filters`].
pub(crate) fn parse_filter_arg(input: &str) -> TabularResult<FilterArg> {
    classify_filter_arg(parse(input)?)
}
