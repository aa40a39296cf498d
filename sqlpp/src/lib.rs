mod argument;
mod error;
mod macros;
mod parser;
mod preprocessor;
mod source;
mod statement;
mod tokenizer;

pub use argument::{parse_argument_list, ArgType, Argument};
pub use error::{SqlppError, SqlppResult};
pub use macros::{expand_macros, Macro, MacroMap};
pub use parser::Parser;
pub use preprocessor::Preprocessor;
pub use source::{Rewriter, SqlSource, TracebackHeader};
pub use statement::Statement;
pub use tokenizer::{significant, tokenize, LexError, Token, TokenKind};
