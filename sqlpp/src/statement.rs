//! The parsed-statement surface (§4.3.4/§6.3): what `Parser::statement`
//! hands back once a `CREATE PERFETTO ...` / `INCLUDE PERFETTO MODULE`
//! form has been recognized, or the unmodified source for anything
//! that falls through to SQLite as-is.

use crate::argument::Argument;
use crate::source::SqlSource;

#[derive(Debug, Clone)]
pub enum Statement {
    /// Anything not recognized as a PerfettoSQL extension: handed to
    /// SQLite unmodified (still macro-expanded).
    SqliteSql(SqlSource),
    CreateFunction {
        replace: bool,
        prototype: Vec<Argument>,
        returns: String,
        sql: SqlSource,
        /// Populated only for the `USING` redirection form; always
        /// `None` from this parser today (that form isn't recognized
        /// yet — see DESIGN.md).
        target_function: Option<String>,
        is_table: bool,
    },
    CreateTable {
        replace: bool,
        name: String,
        schema: Vec<Argument>,
        sql: SqlSource,
    },
    CreateView {
        replace: bool,
        name: String,
        schema: Option<Vec<Argument>>,
        select_sql: SqlSource,
        create_view_sql: SqlSource,
    },
    CreateIndex {
        replace: bool,
        name: String,
        table: String,
        cols: Vec<String>,
    },
    DropIndex {
        name: String,
        table: String,
    },
    Include {
        key: String,
    },
    CreateMacro {
        replace: bool,
        name: String,
        args: Vec<Argument>,
        returns: String,
        sql: SqlSource,
    },
}

impl Statement {
    /// The object name this statement declares, if any (`SqliteSql` and
    /// `Include` have none of the relevant shape).
    pub fn name(&self) -> Option<&str> {
        match self {
            Statement::SqliteSql(_) => None,
            Statement::CreateFunction { .. } => None,
            Statement::CreateTable { name, .. } => Some(name),
            Statement::CreateView { name, .. } => Some(name),
            Statement::CreateIndex { name, .. } => Some(name),
            Statement::DropIndex { name, .. } => Some(name),
            Statement::Include { key } => Some(key),
            Statement::CreateMacro { name, .. } => Some(name),
        }
    }
}
