//! Macro declarations and expansion (§4.3.2): lexical substitution of
//! `$arg` placeholders with call-site argument text, plus the three
//! built-in intrinsics.
//!
//! Argument text is substituted *before* recursively expanding the
//! result, so a macro body itself calling another macro — or an
//! argument that happens to contain a call — still expands. Argument
//! substitution is a flat textual splice rather than its own
//! provenance layer: this keeps `as_traceback` at two frames (call
//! site, macro body) for the common case instead of growing one frame
//! per substituted argument.

use std::ops::Range;

use fhm::Map;

use crate::error::{SqlppError, SqlppResult};
use crate::source::SqlSource;
use crate::tokenizer::{tokenize, TokenKind};

#[derive(Debug, Clone)]
pub struct Macro {
    pub replace: bool,
    pub name: String,
    pub args: Vec<String>,
    pub body: SqlSource,
}

pub type MacroMap = Map<String, Macro>;

struct Invocation {
    call_start: usize,
    call_end: usize,
    name: String,
    arg_ranges: Vec<Range<usize>>,
}

fn push_trimmed_arg(text: &str, start: usize, end: usize, out: &mut Vec<Range<usize>>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let trimmed_start = slice.len() - slice.trim_start().len();
    let trimmed_end = slice.trim_end().len();
    if trimmed_start >= trimmed_end {
        return;
    }
    out.push((start + trimmed_start)..(start + trimmed_end));
}

fn find_invocation(text: &str) -> SqlppResult<Option<Invocation>> {
    let tokens = tokenize(text).map_err(|e| SqlppError::Lexical(e.message))?;
    let sig: Vec<_> = tokens.iter().filter(|t| t.kind != TokenKind::Space).collect();

    let mut i = 0usize;
    while i + 2 < sig.len() {
        if sig[i].kind == TokenKind::Id && sig[i + 1].kind == TokenKind::Bang && sig[i + 2].kind == TokenKind::Lp {
            let call_start = sig[i].start;
            let name = sig[i].text.to_string();
            let args_start = sig[i + 2].end;
            let mut depth = 1i32;
            let mut current_arg_start = args_start;
            let mut arg_ranges = Vec::new();
            let mut j = i + 3;
            while j < sig.len() {
                match sig[j].kind {
                    TokenKind::Lp => depth += 1,
                    TokenKind::Rp => {
                        depth -= 1;
                        if depth == 0 {
                            push_trimmed_arg(text, current_arg_start, sig[j].start, &mut arg_ranges);
                            return Ok(Some(Invocation {
                                call_start,
                                call_end: sig[j].end,
                                name,
                                arg_ranges,
                            }));
                        }
                    }
                    TokenKind::Comma if depth == 1 => {
                        push_trimmed_arg(text, current_arg_start, sig[j].start, &mut arg_ranges);
                        current_arg_start = sig[j].end;
                    }
                    _ => {}
                }
                j += 1;
            }
            return Err(SqlppError::Lexical(format!(
                "unterminated macro invocation '{}!('",
                name
            )));
        }
        i += 1;
    }
    Ok(None)
}

fn parse_paren_list(text: &str) -> SqlppResult<Vec<String>> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| SqlppError::Semantic("expected a parenthesized, comma-separated list".into()))?;
    let tokens = tokenize(inner).map_err(|e| SqlppError::Lexical(e.message))?;
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for t in &tokens {
        match t.kind {
            TokenKind::Lp => depth += 1,
            TokenKind::Rp => depth -= 1,
            TokenKind::Comma if depth == 0 => {
                items.push(inner[start..t.start].trim().to_string());
                start = t.end;
            }
            _ => {}
        }
    }
    let last = inner[start..].trim();
    if !last.is_empty() || !items.is_empty() {
        items.push(last.to_string());
    }
    Ok(items)
}

fn expand_stringify(arg_ranges: &[Range<usize>], text: &str) -> SqlppResult<SqlSource> {
    if arg_ranges.len() != 1 {
        return Err(SqlppError::Semantic(format!(
            "__intrinsic_stringify! must specify exactly one argument, got {}",
            arg_ranges.len()
        )));
    }
    let raw = &text[arg_ranges[0].clone()];
    let escaped = raw.replace('\'', "''");
    Ok(SqlSource::from_trace_processor_implementation(format!(
        "'{}'",
        escaped
    )))
}

fn expand_token_zip_join(
    arg_ranges: &[Range<usize>],
    text: &str,
    macros: &MacroMap,
    depth: usize,
) -> SqlppResult<SqlSource> {
    if arg_ranges.len() != 4 {
        return Err(SqlppError::Semantic(format!(
            "__intrinsic_token_zip_join! expects 4 arguments, got {}",
            arg_ranges.len()
        )));
    }
    let list1 = parse_paren_list(&text[arg_ranges[0].clone()])?;
    let list2 = parse_paren_list(&text[arg_ranges[1].clone()])?;
    let per_pair_name = text[arg_ranges[2].clone()].trim().to_string();
    let separator_name = text[arg_ranges[3].clone()].trim().to_string();
    if list2.len() < list1.len() {
        return Err(SqlppError::Semantic(
            "__intrinsic_token_zip_join!: list2 must be at least as long as list1".into(),
        ));
    }
    let mut pieces = Vec::with_capacity(list1.len());
    for i in 0..list1.len() {
        let call = format!("{}!({}, {})", per_pair_name, list1[i], list2[i]);
        let expanded = expand_macros_at_depth(&SqlSource::from_trace_processor_implementation(call), macros, depth + 1)?;
        pieces.push(expanded.sql().to_string());
    }
    let sep_call = format!("{}!()", separator_name);
    let sep_expanded = expand_macros_at_depth(&SqlSource::from_trace_processor_implementation(sep_call), macros, depth + 1)?;
    Ok(SqlSource::from_trace_processor_implementation(
        pieces.join(sep_expanded.sql()),
    ))
}

fn substitute_args(mac: &Macro, arg_ranges: &[Range<usize>], call_text: &str) -> SqlppResult<String> {
    if arg_ranges.len() != mac.args.len() {
        return Err(SqlppError::Semantic(format!(
            "macro '{}' expects {} argument(s), got {}",
            mac.name,
            mac.args.len(),
            arg_ranges.len()
        )));
    }
    let body_text = mac.body.sql();
    let body_tokens = tokenize(body_text).map_err(|e| SqlppError::Lexical(e.message))?;
    let mut result = String::with_capacity(body_text.len());
    let mut last = 0usize;
    for t in &body_tokens {
        if t.kind == TokenKind::Variable && t.text.starts_with('$') {
            let arg_name = &t.text[1..];
            if let Some(idx) = mac.args.iter().position(|a| a == arg_name) {
                result.push_str(&body_text[last..t.start]);
                result.push_str(&call_text[arg_ranges[idx].clone()]);
                last = t.end;
            }
        }
    }
    result.push_str(&body_text[last..]);
    Ok(result)
}

/// Recursively expands every `name!(args)` invocation in `source`,
/// including invocations introduced by a prior expansion, up to a
/// bounded recursion depth (guards against a macro that calls itself).
pub fn expand_macros(source: &SqlSource, macros: &MacroMap) -> SqlppResult<SqlSource> {
    expand_macros_at_depth(source, macros, 0)
}

fn expand_macros_at_depth(source: &SqlSource, macros: &MacroMap, depth: usize) -> SqlppResult<SqlSource> {
    if depth > 64 {
        return Err(SqlppError::Semantic("macro expansion recursion limit exceeded".into()));
    }
    let text = source.sql().to_string();
    let invocation = match find_invocation(&text)? {
        Some(inv) => inv,
        None => return Ok(source.clone()),
    };

    tracing::debug!(macro_name = %invocation.name, "expanding macro invocation");

    let expanded_leaf = match invocation.name.as_str() {
        "__intrinsic_stringify" => expand_stringify(&invocation.arg_ranges, &text)?,
        "__intrinsic_token_zip_join" => expand_token_zip_join(&invocation.arg_ranges, &text, macros, depth)?,
        "__intrinsic_token_comma" => SqlSource::from_trace_processor_implementation(","),
        _ => {
            let mac = macros
                .find(invocation.name.as_str())
                .ok_or_else(|| SqlppError::Semantic(format!("unknown macro '{}'", invocation.name)))?
                .clone();
            let substituted = substitute_args(&mac, &invocation.arg_ranges, &text)?;
            SqlSource::from_trace_processor_implementation(substituted)
        }
    };
    let expanded_leaf = expand_macros_at_depth(&expanded_leaf, macros, depth + 1)?;

    let rewritten = crate::source::Rewriter::new(source)
        .rewrite(invocation.call_start, invocation.call_end, expanded_leaf)
        .build();
    expand_macros_at_depth(&rewritten, macros, depth + 1)
}
