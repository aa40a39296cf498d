//! Statement splitting (`NextStatement`, §4.3.3): walks a source's
//! token stream, carving out one statement at a time without treating
//! every `;` in the raw text as a boundary (a `;` inside a string
//! literal or nested parens is just another character of some other
//! token).

use crate::error::{SqlppError, SqlppResult};
use crate::source::SqlSource;
use crate::tokenizer::{tokenize, TokenKind};

pub struct Preprocessor {
    source: SqlSource,
    cursor: usize,
    error: Option<SqlppError>,
}

impl Preprocessor {
    pub fn new(source: SqlSource) -> Self {
        Preprocessor { source, cursor: 0, error: None }
    }

    /// `Ok(())` if the stream hasn't hit a lexical error; `Err` with the
    /// error that caused the most recent `next_statement()` to return
    /// `None` before reaching end of input.
    pub fn status(&self) -> SqlppResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Returns the next statement, or `None` at end of input or after a
    /// lexical error (distinguish the two via `status()`).
    pub fn next_statement(&mut self) -> Option<SqlSource> {
        if self.error.is_some() {
            return None;
        }
        let text = self.source.sql().to_string();
        let tail = &text[self.cursor..];
        let tokens = match tokenize(tail) {
            Ok(t) => t,
            Err(e) => {
                self.error = Some(SqlppError::Lexical(e.message));
                return None;
            }
        };

        let mut idx = 0usize;
        while idx < tokens.len() && matches!(tokens[idx].kind, TokenKind::Space | TokenKind::Semi) {
            idx += 1;
        }
        if idx >= tokens.len() {
            self.cursor = text.len();
            return None;
        }
        let stmt_start = tokens[idx].start;

        let mut depth = 0i32;
        let mut stmt_end = tail.len();
        let mut consumed_semi = false;
        let mut j = idx;
        while j < tokens.len() {
            match tokens[j].kind {
                TokenKind::Lp => depth += 1,
                TokenKind::Rp => depth -= 1,
                TokenKind::Semi if depth <= 0 => {
                    stmt_end = tokens[j].start;
                    consumed_semi = true;
                    break;
                }
                _ => {}
            }
            j += 1;
        }

        let raw = &tail[stmt_start..stmt_end];
        let trimmed_len = raw.trim_end().len();
        let abs_start = self.cursor + stmt_start;
        let stmt = self.source.substr(abs_start, trimmed_len);
        self.cursor += stmt_end + if consumed_semi { 1 } else { 0 };
        Some(stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_log() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn collect(sql: &str) -> (Vec<String>, SqlppResult<()>) {
        let mut pp = Preprocessor::new(SqlSource::from_execute_query(sql));
        let mut out = Vec::new();
        while let Some(stmt) = pp.next_statement() {
            out.push(stmt.sql().to_string());
        }
        (out, pp.status())
    }

    #[test]
    fn splits_two_statements_and_trims_trailing_whitespace() {
        init_test_log();
        let (stmts, status) = collect("SELECT 1;  \nSELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
        assert!(status.is_ok());
    }

    #[test]
    fn skips_leading_and_isolated_semicolons() {
        init_test_log();
        let (stmts, _) = collect(";;  SELECT 1;;;SELECT 2;");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn final_statement_without_trailing_semicolon_is_still_returned() {
        init_test_log();
        let (stmts, _) = collect("SELECT 1;SELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn semicolon_inside_a_string_literal_does_not_split_the_statement() {
        init_test_log();
        let (stmts, _) = collect("SELECT ';';SELECT 2;");
        assert_eq!(stmts, vec!["SELECT ';'", "SELECT 2"]);
    }

    #[test]
    fn lexical_error_surfaces_via_status_after_next_statement_returns_none() {
        init_test_log();
        let mut pp = Preprocessor::new(SqlSource::from_execute_query("SELECT 1; SELECT 'oops"));
        assert_eq!(pp.next_statement().unwrap().sql(), "SELECT 1");
        assert!(pp.next_statement().is_none());
        assert!(pp.status().is_err());
        assert!(pp.status().unwrap_err().is_lexical());
    }

    #[test]
    fn empty_input_yields_no_statements() {
        init_test_log();
        let (stmts, status) = collect("   ");
        assert!(stmts.is_empty());
        assert!(status.is_ok());
    }
}
