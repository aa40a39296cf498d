//! Recognizes the PerfettoSQL statement surface (§4.3.4) on top of
//! statement splitting and macro expansion: `CREATE PERFETTO ...`,
//! `INCLUDE PERFETTO MODULE ...`, `DROP PERFETTO INDEX ...`, and a
//! fallback for anything else (handed to SQLite unmodified, but still
//! macro-expanded).

use crate::argument::parse_argument_list;
use crate::error::{SqlppError, SqlppResult};
use crate::macros::{expand_macros, MacroMap};
use crate::preprocessor::Preprocessor;
use crate::source::{SqlSource, TracebackHeader};
use crate::statement::Statement;
use crate::tokenizer::{tokenize, Token, TokenKind};

pub struct Parser {
    pp: Preprocessor,
    macros: MacroMap,
    current: Option<Statement>,
    error: Option<SqlppError>,
}

impl Parser {
    pub fn new(source: SqlSource, macros: MacroMap) -> Self {
        Parser { pp: Preprocessor::new(source), macros, current: None, error: None }
    }

    pub fn status(&self) -> SqlppResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Advances to the next statement. Returns `false` at end of input
    /// or on error (distinguish the two via `status()`).
    pub fn next(&mut self) -> bool {
        if self.error.is_some() {
            return false;
        }
        let raw = match self.pp.next_statement() {
            Some(s) => s,
            None => {
                if let Err(e) = self.pp.status() {
                    self.error = Some(e);
                }
                return false;
            }
        };
        let result = expand_macros(&raw, &self.macros)
            .map(|expanded| expanded.with_header(TracebackHeader::FullyExpandedStatement))
            .and_then(parse_statement);
        match result {
            Ok(stmt) => {
                self.current = Some(stmt);
                true
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    pub fn statement(&self) -> &Statement {
        self.current.as_ref().expect("next() must return true before calling statement()")
    }
}

fn expect_id<'a>(sig: &[&'a Token<'a>], i: usize, what: &str) -> SqlppResult<&'a str> {
    let tok = sig.get(i).ok_or_else(|| SqlppError::Semantic(format!("expected {}", what)))?;
    if tok.kind != TokenKind::Id {
        return Err(SqlppError::Semantic(format!("expected {}, found '{}'", what, tok.text)));
    }
    Ok(tok.text)
}

fn expect_kw(sig: &[&Token], i: usize, kw: &str) -> SqlppResult<()> {
    let tok = sig.get(i).ok_or_else(|| SqlppError::Semantic(format!("expected '{}'", kw)))?;
    if !tok.text.eq_ignore_ascii_case(kw) {
        return Err(SqlppError::Semantic(format!("expected '{}', found '{}'", kw, tok.text)));
    }
    Ok(())
}

fn expect_parens(sig: &[&Token], i: usize, what: &str) -> SqlppResult<(usize, usize)> {
    sig.get(i)
        .filter(|t| t.kind == TokenKind::Lp)
        .ok_or_else(|| SqlppError::Semantic(format!("expected '(' for {}", what)))?;
    let mut depth = 1i32;
    let mut j = i + 1;
    while j < sig.len() {
        match sig[j].kind {
            TokenKind::Lp => depth += 1,
            TokenKind::Rp => {
                depth -= 1;
                if depth == 0 {
                    return Ok((i, j));
                }
            }
            _ => {}
        }
        j += 1;
    }
    Err(SqlppError::Semantic(format!("unterminated '(' for {}", what)))
}

/// Text spanned by sig-token indices `[start_idx, end_idx)`.
fn slice_between(text: &str, sig: &[&Token], start_idx: usize, end_idx: usize) -> String {
    if start_idx >= end_idx || start_idx >= sig.len() {
        return String::new();
    }
    let start = sig[start_idx].start;
    let end = sig[end_idx - 1].end;
    text[start..end].to_string()
}

fn parse_returns_clause(text: &str, sig: &[&Token], i: usize) -> SqlppResult<(String, bool, usize)> {
    let tok = sig.get(i).ok_or_else(|| SqlppError::Semantic("expected a type after RETURNS".into()))?;
    if tok.text.eq_ignore_ascii_case("TABLE") {
        let (open, close) = expect_parens(sig, i + 1, "RETURNS TABLE column list")?;
        let inner = slice_between(text, sig, open + 1, close);
        Ok((inner, true, close + 1))
    } else {
        Ok((tok.text.to_string(), false, i + 1))
    }
}

fn parse_create_function(source: &SqlSource, text: &str, sig: &[&Token], mut i: usize, replace: bool) -> SqlppResult<Statement> {
    let name = expect_id(sig, i, "function name")?.to_string();
    i += 1;
    let (open, close) = expect_parens(sig, i, "function argument list")?;
    let inner = slice_between(text, sig, open + 1, close);
    i = close + 1;
    let prototype = parse_argument_list(&inner)?;
    expect_kw(sig, i, "RETURNS")?;
    i += 1;
    let (returns, is_table, next_i) = parse_returns_clause(text, sig, i)?;
    i = next_i;
    expect_kw(sig, i, "AS")?;
    i += 1;
    let sql_start = sig
        .get(i)
        .map(|t| t.start)
        .ok_or_else(|| SqlppError::Semantic(format!("function '{}' is missing a body after AS", name)))?;
    let sql = source.leaf_at(sql_start, text[sql_start..].trim_end());
    Ok(Statement::CreateFunction { replace, prototype, returns, sql, target_function: None, is_table })
}

fn parse_create_table(source: &SqlSource, text: &str, sig: &[&Token], mut i: usize, replace: bool) -> SqlppResult<Statement> {
    let name = expect_id(sig, i, "table name")?.to_string();
    i += 1;
    let schema = if sig.get(i).map(|t| t.kind) == Some(TokenKind::Lp) {
        let (open, close) = expect_parens(sig, i, "table schema")?;
        let inner = slice_between(text, sig, open + 1, close);
        i = close + 1;
        parse_argument_list(&inner)?
    } else {
        Vec::new()
    };
    expect_kw(sig, i, "AS")?;
    i += 1;
    let sql_start = sig
        .get(i)
        .map(|t| t.start)
        .ok_or_else(|| SqlppError::Semantic(format!("table '{}' is missing a body after AS", name)))?;
    let sql = source.leaf_at(sql_start, text[sql_start..].trim_end());
    Ok(Statement::CreateTable { replace, name, schema, sql })
}

fn parse_create_view(source: &SqlSource, text: &str, sig: &[&Token], mut i: usize, replace: bool) -> SqlppResult<Statement> {
    let name = expect_id(sig, i, "view name")?.to_string();
    i += 1;
    let schema = if sig.get(i).map(|t| t.kind) == Some(TokenKind::Lp) {
        let (open, close) = expect_parens(sig, i, "view schema")?;
        let inner = slice_between(text, sig, open + 1, close);
        i = close + 1;
        Some(parse_argument_list(&inner)?)
    } else {
        None
    };
    expect_kw(sig, i, "AS")?;
    i += 1;
    let sql_start = sig
        .get(i)
        .map(|t| t.start)
        .ok_or_else(|| SqlppError::Semantic(format!("view '{}' is missing a body after AS", name)))?;
    let select_text = text[sql_start..].trim_end().to_string();
    let select_sql = source.leaf_at(sql_start, select_text.clone());
    let create_view_sql_text = format!(
        "CREATE {}VIEW {} AS {}",
        if replace { "OR REPLACE " } else { "" },
        name,
        select_text
    );
    let create_view_sql = source.leaf_at(0, create_view_sql_text);
    Ok(Statement::CreateView { replace, name, schema, select_sql, create_view_sql })
}

fn parse_create_index(text: &str, sig: &[&Token], mut i: usize, replace: bool) -> SqlppResult<Statement> {
    let name = expect_id(sig, i, "index name")?.to_string();
    i += 1;
    expect_kw(sig, i, "ON")?;
    i += 1;
    let table = expect_id(sig, i, "table name")?.to_string();
    i += 1;
    let (open, close) = expect_parens(sig, i, "index column list")?;
    let inner = slice_between(text, sig, open + 1, close);
    let cols: Vec<String> = inner.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    if cols.is_empty() {
        return Err(SqlppError::Semantic(format!("index '{}' must name at least one column", name)));
    }
    Ok(Statement::CreateIndex { replace, name, table, cols })
}

fn parse_create_macro(source: &SqlSource, text: &str, sig: &[&Token], mut i: usize, replace: bool) -> SqlppResult<Statement> {
    let name = expect_id(sig, i, "macro name")?.to_string();
    i += 1;
    let (open, close) = expect_parens(sig, i, "macro argument list")?;
    let inner = slice_between(text, sig, open + 1, close);
    i = close + 1;
    let args = parse_argument_list(&inner)?;
    expect_kw(sig, i, "RETURNS")?;
    i += 1;
    let returns = sig
        .get(i)
        .ok_or_else(|| SqlppError::Semantic(format!("macro '{}' is missing a RETURNS type", name)))?
        .text
        .to_string();
    i += 1;
    expect_kw(sig, i, "AS")?;
    i += 1;
    let sql_start = sig
        .get(i)
        .map(|t| t.start)
        .ok_or_else(|| SqlppError::Semantic(format!("macro '{}' is missing a body after AS", name)))?;
    let sql = source.leaf_at(sql_start, text[sql_start..].trim_end());
    Ok(Statement::CreateMacro { replace, name, args, returns, sql })
}

fn parse_statement(source: SqlSource) -> SqlppResult<Statement> {
    let text = source.sql().to_string();
    let tokens = tokenize(&text).map_err(|e| SqlppError::Lexical(e.message))?;
    let sig: Vec<&Token> = tokens.iter().filter(|t| t.kind != TokenKind::Space).collect();
    let kw = |i: usize| sig.get(i).map(|t| t.text.to_ascii_uppercase());

    if kw(0).as_deref() == Some("INCLUDE") && kw(1).as_deref() == Some("PERFETTO") && kw(2).as_deref() == Some("MODULE") {
        let start = sig
            .get(3)
            .map(|t| t.start)
            .ok_or_else(|| SqlppError::Semantic("INCLUDE PERFETTO MODULE expects a module key".into()))?;
        let key = text[start..].trim().to_string();
        return Ok(Statement::Include { key });
    }

    if kw(0).as_deref() == Some("DROP") && kw(1).as_deref() == Some("PERFETTO") && kw(2).as_deref() == Some("INDEX") {
        let name = expect_id(&sig, 3, "index name")?.to_string();
        expect_kw(&sig, 4, "ON")?;
        let table = expect_id(&sig, 5, "table name")?.to_string();
        return Ok(Statement::DropIndex { name, table });
    }

    let (mut i, replace) = if kw(0).as_deref() == Some("CREATE")
        && kw(1).as_deref() == Some("OR")
        && kw(2).as_deref() == Some("REPLACE")
    {
        (3, true)
    } else if kw(0).as_deref() == Some("CREATE") {
        (1, false)
    } else {
        return Ok(Statement::SqliteSql(source));
    };

    if kw(i).as_deref() == Some("TRIGGER") {
        return Err(SqlppError::Semantic("CREATE TRIGGER is not supported".into()));
    }
    if kw(i).as_deref() != Some("PERFETTO") {
        return Ok(Statement::SqliteSql(source));
    }
    i += 1;

    match kw(i).as_deref() {
        Some("FUNCTION") => parse_create_function(&source, &text, &sig, i + 1, replace),
        Some("TABLE") => parse_create_table(&source, &text, &sig, i + 1, replace),
        Some("VIEW") => parse_create_view(&source, &text, &sig, i + 1, replace),
        Some("INDEX") => parse_create_index(&text, &sig, i + 1, replace),
        Some("MACRO") => parse_create_macro(&source, &text, &sig, i + 1, replace),
        other => Err(SqlppError::Semantic(format!(
            "unrecognized PERFETTO statement kind '{}'",
            other.unwrap_or_default()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::MacroMap;

    fn init_test_log() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn empty_macros() -> MacroMap {
        MacroMap::new(0, 75).unwrap()
    }

    #[test]
    fn plain_select_falls_through_as_sqlite_sql() {
        init_test_log();
        let mut p = Parser::new(SqlSource::from_execute_query("SELECT 1;"), empty_macros());
        assert!(p.next());
        assert!(matches!(p.statement(), Statement::SqliteSql(_)));
        assert!(!p.next());
        assert!(p.status().is_ok());
    }

    #[test]
    fn create_perfetto_function_is_recognized() {
        init_test_log();
        let mut p = Parser::new(
            SqlSource::from_execute_query("CREATE PERFETTO FUNCTION f(a LONG) RETURNS LONG AS SELECT $a;"),
            empty_macros(),
        );
        assert!(p.next());
        match p.statement() {
            Statement::CreateFunction { replace, prototype, returns, sql, is_table, .. } => {
                assert!(!replace);
                assert_eq!(prototype.len(), 1);
                assert_eq!(returns, "LONG");
                assert!(!is_table);
                assert_eq!(sql.sql(), "SELECT $a");
            }
            other => panic!("expected CreateFunction, got {:?}", other),
        }
    }

    #[test]
    fn create_or_replace_perfetto_table_function_is_table_shaped() {
        init_test_log();
        let mut p = Parser::new(
            SqlSource::from_execute_query(
                "CREATE OR REPLACE PERFETTO FUNCTION f() RETURNS TABLE(x LONG) AS SELECT 1 AS x;",
            ),
            empty_macros(),
        );
        assert!(p.next());
        match p.statement() {
            Statement::CreateFunction { replace, returns, is_table, .. } => {
                assert!(*replace);
                assert!(*is_table);
                assert_eq!(returns.trim(), "x LONG");
            }
            other => panic!("expected CreateFunction, got {:?}", other),
        }
    }

    #[test]
    fn create_perfetto_view_builds_plain_sqlite_create_view() {
        init_test_log();
        let mut p = Parser::new(
            SqlSource::from_execute_query("CREATE PERFETTO VIEW v AS SELECT 1 AS x;"),
            empty_macros(),
        );
        assert!(p.next());
        match p.statement() {
            Statement::CreateView { name, create_view_sql, select_sql, .. } => {
                assert_eq!(name, "v");
                assert_eq!(select_sql.sql(), "SELECT 1 AS x");
                assert_eq!(create_view_sql.sql(), "CREATE VIEW v AS SELECT 1 AS x");
            }
            other => panic!("expected CreateView, got {:?}", other),
        }
    }

    #[test]
    fn include_perfetto_module_is_recognized() {
        init_test_log();
        let mut p = Parser::new(
            SqlSource::from_execute_query("INCLUDE PERFETTO MODULE android.battery;"),
            empty_macros(),
        );
        assert!(p.next());
        match p.statement() {
            Statement::Include { key } => assert_eq!(key, "android.battery"),
            other => panic!("expected Include, got {:?}", other),
        }
    }

    #[test]
    fn create_trigger_is_explicitly_rejected() {
        init_test_log();
        let mut p = Parser::new(SqlSource::from_execute_query("CREATE TRIGGER t AFTER INSERT ON x BEGIN SELECT 1; END;"), empty_macros());
        assert!(!p.next());
        let err = p.status().unwrap_err();
        assert!(err.to_string().contains("CREATE TRIGGER is not supported"));
    }

    #[test]
    fn drop_perfetto_index_is_recognized() {
        init_test_log();
        let mut p = Parser::new(SqlSource::from_execute_query("DROP PERFETTO INDEX idx ON t;"), empty_macros());
        assert!(p.next());
        match p.statement() {
            Statement::DropIndex { name, table } => {
                assert_eq!(name, "idx");
                assert_eq!(table, "t");
            }
            other => panic!("expected DropIndex, got {:?}", other),
        }
    }
}
