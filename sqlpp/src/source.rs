//! `SqlSource`: a string paired with the tree of rewrites that
//! produced it, so any offset into the final text can be traced back
//! to the file/macro-call/rewrite chain that generated it.

use std::ops::Range;

/// Which header (if any) `as_traceback` prefixes its output with.
/// Top-level user-supplied sources get the classic
/// "Traceback (most recent call last):" framing; a parser's final,
/// fully macro-expanded statement gets a distinct header describing
/// exactly that, since it isn't necessarily reporting an error.
/// Nodes created by `substr`/rewrite inherit their parent's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracebackHeader {
    None,
    Traceback,
    FullyExpandedStatement,
}

impl TracebackHeader {
    fn text(self) -> Option<&'static str> {
        match self {
            TracebackHeader::None => None,
            TracebackHeader::Traceback => Some("Traceback (most recent call last):"),
            TracebackHeader::FullyExpandedStatement => Some("Fully expanded statement:"),
        }
    }
}

#[derive(Debug, Clone)]
struct Rewrite {
    orig_range: Range<usize>,
    rewritten_range: Range<usize>,
    child: SqlSource,
}

#[derive(Debug, Clone)]
pub struct SqlSource {
    name: String,
    line: u32,
    col: u32,
    original: String,
    rewritten: String,
    rewrites: Vec<Rewrite>,
    header: TracebackHeader,
}

impl SqlSource {
    fn leaf(name: impl Into<String>, sql: impl Into<String>, header: TracebackHeader) -> Self {
        let sql = sql.into();
        SqlSource {
            name: name.into(),
            line: 1,
            col: 1,
            original: sql.clone(),
            rewritten: sql,
            rewrites: Vec::new(),
            header,
        }
    }

    pub fn from_execute_query(sql: impl Into<String>) -> Self {
        Self::leaf("File \"stdin\"", sql, TracebackHeader::Traceback)
    }

    pub fn from_metric(metric_name: &str, sql: impl Into<String>) -> Self {
        Self::leaf(format!("Metric \"{}\"", metric_name), sql, TracebackHeader::Traceback)
    }

    pub fn from_metric_file(file_name: &str, sql: impl Into<String>) -> Self {
        Self::leaf(format!("Metric file \"{}\"", file_name), sql, TracebackHeader::Traceback)
    }

    pub fn from_module_include(module_name: &str, sql: impl Into<String>) -> Self {
        Self::leaf(format!("Module include \"{}\"", module_name), sql, TracebackHeader::Traceback)
    }

    /// Convenience equivalent to `from_name("Trace Processor Internal",
    /// sql)` with no traceback header (§1.2): used for SQL the engine
    /// generates itself rather than text a user supplied.
    pub fn from_trace_processor_implementation(sql: impl Into<String>) -> Self {
        Self::leaf("Trace Processor Internal", sql, TracebackHeader::None)
    }

    pub fn sql(&self) -> &str {
        &self.rewritten
    }

    pub fn len(&self) -> usize {
        self.rewritten.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewritten.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn with_header(mut self, header: TracebackHeader) -> Self {
        self.header = header;
        self
    }

    pub(crate) fn header(&self) -> TracebackHeader {
        self.header
    }

    /// A fresh, not-yet-rewritten view of `self.rewritten[offset..offset+len]`.
    /// Used by statement splitting to carve one statement out of a
    /// larger source before that statement is macro-expanded on its
    /// own. Line/column are computed relative to the parent.
    pub fn substr(&self, offset: usize, len: usize) -> SqlSource {
        assert!(
            self.rewrites.is_empty(),
            "substr on an already-rewritten SqlSource is not supported"
        );
        let (line, col) = self.line_col_at(offset);
        let text = self.original[offset..offset + len].to_string();
        SqlSource {
            name: self.name.clone(),
            line,
            col,
            original: text.clone(),
            rewritten: text,
            rewrites: Vec::new(),
            header: self.header,
        }
    }

    /// Replaces the entire source with `new`, recording one rewrite
    /// spanning the whole original text.
    pub fn full_rewrite(&self, new: SqlSource) -> SqlSource {
        Rewriter::new(self).rewrite(0, self.rewritten.len(), new).build()
    }

    /// A leaf view of `text`, found at `offset` in `self`'s *rewritten*
    /// text, labeled like `self` but without carrying `self`'s rewrite
    /// chain. Used once a statement has already been macro-expanded and
    /// needs to be split into structural pieces (a function body, a
    /// view's select, ...): full provenance for the whole statement
    /// remains available from the un-split source; each split-out piece
    /// just gets its own line/col for error messages instead.
    pub(crate) fn leaf_at(&self, offset: usize, text: impl Into<String>) -> SqlSource {
        let offset = offset.min(self.rewritten.len());
        let before = &self.rewritten[..offset];
        let newlines = before.matches('\n').count() as u32;
        let (line, col) = if newlines == 0 {
            (self.line, self.col + offset as u32)
        } else {
            let last_nl = before.rfind('\n').unwrap();
            (self.line + newlines, (offset - last_nl) as u32)
        };
        let text = text.into();
        SqlSource {
            name: self.name.clone(),
            line,
            col,
            original: text.clone(),
            rewritten: text,
            rewrites: Vec::new(),
            header: self.header,
        }
    }

    fn line_col_at(&self, offset: usize) -> (u32, u32) {
        let before = &self.original[..offset.min(self.original.len())];
        let newlines = before.matches('\n').count() as u32;
        if newlines == 0 {
            (self.line, self.col + offset as u32)
        } else {
            let last_nl = before.rfind('\n').unwrap();
            (self.line + newlines, (offset - last_nl) as u32)
        }
    }

    /// Maps a `rewritten`-space offset back into `original`-space,
    /// returning the rewrite node to recurse into if `off` falls
    /// inside one.
    fn map_offset(&self, off: usize) -> (usize, Option<&Rewrite>) {
        let mut orig_cursor = 0usize;
        let mut rewritten_cursor = 0usize;
        for rewrite in &self.rewrites {
            if off < rewrite.rewritten_range.start {
                break;
            }
            if rewrite.rewritten_range.contains(&off)
                || (off == rewrite.rewritten_range.end && rewrite.rewritten_range.start == rewrite.rewritten_range.end)
            {
                return (rewrite.orig_range.start, Some(rewrite));
            }
            orig_cursor = rewrite.orig_range.end;
            rewritten_cursor = rewrite.rewritten_range.end;
        }
        (orig_cursor + (off - rewritten_cursor), None)
    }

    fn render_frame(&self, orig_offset: usize) -> String {
        let orig_offset = orig_offset.min(self.original.len());
        let (line, col) = self.line_col_at(orig_offset);
        let line_start = self.original[..orig_offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = self.original[orig_offset..]
            .find('\n')
            .map(|i| orig_offset + i)
            .unwrap_or(self.original.len());
        let excerpt_begin = line_start.max(orig_offset.saturating_sub(128));
        let excerpt_end = line_end.min(orig_offset + 128);
        let excerpt = &self.original[excerpt_begin..excerpt_end];
        let caret_col = orig_offset - excerpt_begin;
        format!(
            "  {}, line {}, column {}\n    {}\n    {}^",
            self.name,
            line,
            col,
            excerpt,
            " ".repeat(caret_col)
        )
    }

    /// Renders a traceback for `offset` in this source's `rewritten`
    /// text: one frame per enclosing rewrite layer, innermost last.
    pub fn as_traceback(&self, offset: usize) -> String {
        let mut frames = Vec::new();
        let mut node = self;
        let mut off = offset.min(node.rewritten.len());
        loop {
            let (orig_off, child) = node.map_offset(off);
            frames.push(node.render_frame(orig_off));
            match child {
                Some(rewrite) => {
                    off = off.saturating_sub(rewrite.rewritten_range.start);
                    node = &rewrite.child;
                }
                None => break,
            }
        }
        let mut out = String::new();
        if let Some(header) = self.header.text() {
            out.push_str(header);
            out.push('\n');
        }
        out.push_str(&frames.join("\n"));
        out
    }

    /// Variant used when the only thing known is an offset into the
    /// final SQL text handed to SQLite (e.g. from a SQLite error
    /// callback). `None` renders the traceback for the statement as a
    /// whole, anchored at offset 0.
    pub fn as_traceback_for_sqlite_offset(&self, offset: Option<usize>) -> String {
        self.as_traceback(offset.unwrap_or(0))
    }
}

/// Accumulates any number of staged `(start, end, new)` edits before a
/// single `build()` materializes the rewritten `SqlSource` (§1.2):
/// avoids eagerly allocating an intermediate string per rewrite.
pub struct Rewriter<'a> {
    base: &'a SqlSource,
    edits: Vec<(usize, usize, SqlSource)>,
}

impl<'a> Rewriter<'a> {
    pub fn new(base: &'a SqlSource) -> Self {
        assert!(
            base.rewrites.is_empty(),
            "cannot start a Rewriter over an already-rewritten SqlSource"
        );
        Rewriter { base, edits: Vec::new() }
    }

    /// Stages replacing `base.sql()[start..end]` with `new`. Ranges
    /// across calls must be non-overlapping; `build()` applies them in
    /// source order regardless of call order.
    pub fn rewrite(mut self, start: usize, end: usize, new: SqlSource) -> Self {
        self.edits.push((start, end, new));
        self
    }

    pub fn build(mut self) -> SqlSource {
        self.edits.sort_by_key(|(start, _, _)| *start);
        let original = self.base.rewritten.clone();
        let mut rewritten = String::new();
        let mut rewrites = Vec::new();
        let mut cursor = 0usize;
        for (start, end, child) in self.edits {
            assert!(start >= cursor, "rewrite ranges must be non-overlapping and sorted");
            rewritten.push_str(&original[cursor..start]);
            let rewritten_start = rewritten.len();
            rewritten.push_str(&child.rewritten);
            let rewritten_end = rewritten.len();
            rewrites.push(Rewrite {
                orig_range: start..end,
                rewritten_range: rewritten_start..rewritten_end,
                child,
            });
            cursor = end;
        }
        rewritten.push_str(&original[cursor..]);
        tracing::trace!(rewrites = rewrites.len(), "built rewritten SqlSource");
        SqlSource {
            name: self.base.name.clone(),
            line: self.base.line,
            col: self.base.col,
            original,
            rewritten,
            rewrites,
            header: self.base.header,
        }
    }
}
