//! Argument-list parsing for `CREATE FUNCTION`/`CREATE MACRO` prototypes
//! (§4.3.4): a comma-separated `name TYPE` list, where `TYPE` is one of
//! a small fixed set of scalar keywords or the parameterized
//! `JOINID(table.column)` form.

use crate::error::{SqlppError, SqlppResult};
use crate::tokenizer::{tokenize, TokenKind};

const RESERVED_WORDS: &[&str] = &[
    "select", "from", "where", "group", "order", "by", "limit", "offset", "create", "table",
    "view", "index", "function", "macro", "include", "drop", "insert", "update", "delete",
    "join", "on", "as", "and", "or", "not", "null",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgType {
    Long,
    Int,
    String,
    Double,
    Bool,
    Bytes,
    Expr,
    TableOrSubquery,
    /// `JOINID(table.column)`: a long/id column parameterized by which
    /// table and column it joins against. Behaves as `Long` for scalar
    /// compatibility checks.
    JoinId { table: String, column: String },
}

impl ArgType {
    /// The scalar kind this type behaves as for compatibility checks;
    /// `JoinId` collapses to `Long`.
    pub fn scalar_kind(&self) -> &'static str {
        match self {
            ArgType::Long | ArgType::JoinId { .. } => "LONG",
            ArgType::Int => "INT",
            ArgType::String => "STRING",
            ArgType::Double => "DOUBLE",
            ArgType::Bool => "BOOL",
            ArgType::Bytes => "BYTES",
            ArgType::Expr => "EXPR",
            ArgType::TableOrSubquery => "TABLEORSUBQUERY",
        }
    }

    fn from_keyword(keyword: &str) -> Option<ArgType> {
        match keyword.to_ascii_uppercase().as_str() {
            "LONG" => Some(ArgType::Long),
            "INT" => Some(ArgType::Int),
            "STRING" => Some(ArgType::String),
            "DOUBLE" => Some(ArgType::Double),
            "BOOL" => Some(ArgType::Bool),
            "BYTES" => Some(ArgType::Bytes),
            "EXPR" => Some(ArgType::Expr),
            "TABLEORSUBQUERY" => Some(ArgType::TableOrSubquery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub arg_type: ArgType,
}

fn split_top_level_commas(text: &str) -> SqlppResult<Vec<(usize, usize)>> {
    let tokens = tokenize(text).map_err(|e| SqlppError::Lexical(e.message))?;
    let mut segments = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for t in &tokens {
        match t.kind {
            TokenKind::Lp => depth += 1,
            TokenKind::Rp => depth -= 1,
            TokenKind::Comma if depth == 0 => {
                segments.push((start, t.start));
                start = t.end;
            }
            _ => {}
        }
    }
    segments.push((start, text.len()));
    Ok(segments)
}

fn parse_one(segment: &str) -> SqlppResult<Argument> {
    let tokens = tokenize(segment).map_err(|e| SqlppError::Lexical(e.message))?;
    let sig: Vec<_> = tokens.iter().filter(|t| t.kind != TokenKind::Space).collect();
    let name_tok = sig
        .first()
        .ok_or_else(|| SqlppError::Semantic("expected an argument name".into()))?;
    if name_tok.kind != TokenKind::Id {
        return Err(SqlppError::Semantic(format!(
            "expected an argument name, found '{}'",
            name_tok.text
        )));
    }
    if RESERVED_WORDS.contains(&name_tok.text.to_ascii_lowercase().as_str()) {
        return Err(SqlppError::Semantic(format!(
            "'{}' is a reserved word and cannot be used as an argument name",
            name_tok.text
        )));
    }
    let type_tok = sig
        .get(1)
        .ok_or_else(|| SqlppError::Semantic(format!("argument '{}' is missing a type", name_tok.text)))?;

    if type_tok.kind == TokenKind::Id && type_tok.text.eq_ignore_ascii_case("JOINID") {
        let lp = sig.get(2).filter(|t| t.kind == TokenKind::Lp).ok_or_else(|| {
            SqlppError::Semantic(format!("JOINID type for argument '{}' expects '(table.column)'", name_tok.text))
        })?;
        let table = sig.get(3).filter(|t| t.kind == TokenKind::Id).ok_or_else(|| {
            SqlppError::Semantic(format!("JOINID type for argument '{}' is missing a table name", name_tok.text))
        })?;
        let _dot = sig.get(4).filter(|t| t.kind == TokenKind::Dot).ok_or_else(|| {
            SqlppError::Semantic(format!("JOINID type for argument '{}' expects 'table.column'", name_tok.text))
        })?;
        let column = sig.get(5).filter(|t| t.kind == TokenKind::Id).ok_or_else(|| {
            SqlppError::Semantic(format!("JOINID type for argument '{}' is missing a column name", name_tok.text))
        })?;
        let _rp = sig.get(6).filter(|t| t.kind == TokenKind::Rp).ok_or_else(|| {
            SqlppError::Semantic(format!("JOINID type for argument '{}' is missing a closing ')'", name_tok.text))
        })?;
        let _ = lp;
        return Ok(Argument {
            name: name_tok.text.to_string(),
            arg_type: ArgType::JoinId { table: table.text.to_string(), column: column.text.to_string() },
        });
    }

    if type_tok.kind != TokenKind::Id {
        return Err(SqlppError::Semantic(format!(
            "unrecognized type '{}' for argument '{}'",
            type_tok.text, name_tok.text
        )));
    }
    let arg_type = ArgType::from_keyword(type_tok.text).ok_or_else(|| {
        SqlppError::Semantic(format!("unrecognized type '{}' for argument '{}'", type_tok.text, name_tok.text))
    })?;
    Ok(Argument { name: name_tok.text.to_string(), arg_type })
}

/// Parses a `name TYPE, name TYPE, ...` argument prototype. An empty
/// (all-whitespace) list yields zero arguments.
pub fn parse_argument_list(text: &str) -> SqlppResult<Vec<Argument>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut args = Vec::new();
    for (start, end) in split_top_level_commas(text)? {
        let segment = text[start..end].trim();
        if segment.is_empty() {
            continue;
        }
        args.push(parse_one(segment)?);
    }
    Ok(args)
}
