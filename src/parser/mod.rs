//! Snippet parser
//!
//! Parses script source into a small AST: `def` blocks containing command
//! calls and scoped `with` statements. Dispatch semantics live in the
//! interpreter; the parser only fixes the shape.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

#[derive(Parser)]
#[grammar = "parser/script.pest"]
struct SnippetParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parse error on line {line}: {message}")]
    Grammar { line: usize, message: String },

    #[error("invalid number on line {line}: {literal}")]
    InvalidNumber { line: usize, literal: String },
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let line = match err.line_col {
            pest::error::LineColLocation::Pos((line, _)) => line,
            pest::error::LineColLocation::Span((line, _), _) => line,
        };
        ParseError::Grammar {
            line,
            message: err.variant.message().to_string(),
        }
    }
}

/* ===================== AST ===================== */

/// A parsed snippet: the ordered list of `def` blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub defs: Vec<FnDef>,
}

impl Snippet {
    pub fn def(&self, name: &str) -> Option<&FnDef> {
        self.defs.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Call(Call),
    With { head: Call, body: Vec<Stmt> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Expr {
    Lit(Value),
    Ident(String),
}

/* ===================== Builders ===================== */

pub fn parse_snippet(source: &str) -> Result<Snippet, ParseError> {
    let mut pairs = SnippetParser::parse(Rule::script, source)?;
    let script = pairs.next().ok_or(ParseError::Grammar {
        line: 1,
        message: "empty parse".to_string(),
    })?;

    let mut defs = Vec::new();
    for pair in script.into_inner() {
        if pair.as_rule() == Rule::def {
            defs.push(build_def(pair)?);
        }
    }
    Ok(Snippet { defs })
}

fn unexpected(pair: &Pair<Rule>) -> ParseError {
    ParseError::Grammar {
        line: pair.line_col().0,
        message: format!("unexpected {:?}", pair.as_rule()),
    }
}

fn build_def(pair: Pair<Rule>) -> Result<FnDef, ParseError> {
    let line = pair.line_col().0;
    let mut inner = pair.into_inner();

    let name = match inner.next() {
        Some(p) if p.as_rule() == Rule::ident => p.as_str().to_string(),
        _ => {
            return Err(ParseError::Grammar {
                line,
                message: "def without a name".to_string(),
            })
        }
    };

    let mut params = Vec::new();
    let mut body = Vec::new();
    for p in inner {
        match p.as_rule() {
            Rule::params => {
                params = p.into_inner().map(|i| i.as_str().to_string()).collect();
            }
            Rule::block => {
                body = build_block(p)?;
            }
            _ => return Err(unexpected(&p)),
        }
    }

    Ok(FnDef {
        name,
        params,
        body,
        line,
    })
}

fn build_block(pair: Pair<Rule>) -> Result<Vec<Stmt>, ParseError> {
    pair.into_inner().map(build_stmt).collect()
}

fn build_stmt(pair: Pair<Rule>) -> Result<Stmt, ParseError> {
    let line = pair.line_col().0;
    let inner = pair.into_inner().next().ok_or(ParseError::Grammar {
        line,
        message: "empty statement".to_string(),
    })?;

    match inner.as_rule() {
        Rule::call => Ok(Stmt::Call(build_call(inner)?)),
        Rule::with_stmt => {
            let mut parts = inner.into_inner();
            let head = match parts.next() {
                Some(p) if p.as_rule() == Rule::call => build_call(p)?,
                _ => {
                    return Err(ParseError::Grammar {
                        line,
                        message: "with requires a call".to_string(),
                    })
                }
            };
            let body = match parts.next() {
                Some(p) if p.as_rule() == Rule::block => build_block(p)?,
                _ => {
                    return Err(ParseError::Grammar {
                        line,
                        message: "with requires a block".to_string(),
                    })
                }
            };
            Ok(Stmt::With { head, body })
        }
        _ => Err(unexpected(&inner)),
    }
}

fn build_call(pair: Pair<Rule>) -> Result<Call, ParseError> {
    let line = pair.line_col().0;
    let mut inner = pair.into_inner();

    let name = match inner.next() {
        Some(p) if p.as_rule() == Rule::ident => p.as_str().to_string(),
        _ => {
            return Err(ParseError::Grammar {
                line,
                message: "call without a name".to_string(),
            })
        }
    };

    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    if let Some(arglist) = inner.next() {
        for arg in arglist.into_inner() {
            let item = arg.into_inner().next().ok_or(ParseError::Grammar {
                line,
                message: "empty argument".to_string(),
            })?;
            match item.as_rule() {
                Rule::expr => args.push(build_expr(item)?),
                Rule::kwarg => {
                    let mut kw = item.into_inner();
                    let key = match kw.next() {
                        Some(p) if p.as_rule() == Rule::ident => p.as_str().to_string(),
                        _ => {
                            return Err(ParseError::Grammar {
                                line,
                                message: "keyword argument without a name".to_string(),
                            })
                        }
                    };
                    let value = match kw.next() {
                        Some(p) if p.as_rule() == Rule::expr => build_expr(p)?,
                        _ => {
                            return Err(ParseError::Grammar {
                                line,
                                message: "keyword argument without a value".to_string(),
                            })
                        }
                    };
                    kwargs.push((key, value));
                }
                _ => return Err(unexpected(&item)),
            }
        }
    }

    Ok(Call {
        name,
        args,
        kwargs,
        line,
    })
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let line = pair.line_col().0;
    let inner = pair.into_inner().next().ok_or(ParseError::Grammar {
        line,
        message: "empty expression".to_string(),
    })?;

    match inner.as_rule() {
        Rule::ident => Ok(Expr::Ident(inner.as_str().to_string())),
        Rule::literal => {
            let lit = inner.into_inner().next().ok_or(ParseError::Grammar {
                line,
                message: "empty literal".to_string(),
            })?;
            let value = match lit.as_rule() {
                Rule::number => {
                    let text = lit.as_str();
                    let n = text.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
                        line,
                        literal: text.to_string(),
                    })?;
                    Value::Num(n)
                }
                Rule::string => {
                    let text = lit.as_str();
                    Value::Str(text[1..text.len() - 1].to_string())
                }
                Rule::boolean => Value::Bool(lit.as_str() == "true"),
                Rule::null => Value::Null,
                _ => return Err(unexpected(&lit)),
            };
            Ok(Expr::Lit(value))
        }
        _ => Err(unexpected(&inner)),
    }
}
