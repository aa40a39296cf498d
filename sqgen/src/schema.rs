//! The wire shape of a `StructuredQuery` message and its nested types
//! (§3.4), decoded through [`dec::Cursor`]. Field numbers below are
//! this crate's own wire contract — there is no external `.proto` in
//! this workspace to check them against, so treat them as an internal
//! implementation detail rather than a cross-process wire format.

use dec::{Cursor, Scalar};

use crate::error::{SqgenError, SqgenResult};

// StructuredQuery top-level fields.
const F_ID: u16 = 1;
const F_TABLE: u16 = 2;
const F_SQL: u16 = 3;
const F_SIMPLE_SLICES: u16 = 4;
const F_TIME_RANGE: u16 = 5;
const F_INTERVAL_INTERSECT: u16 = 6;
const F_JOIN: u16 = 7;
const F_UNION: u16 = 8;
const F_ADD_COLUMNS: u16 = 9;
const F_CREATE_SLICES: u16 = 10;
const F_INNER_QUERY: u16 = 11;
const F_INNER_QUERY_ID: u16 = 12;
const F_FILTERS: u16 = 20;
const F_GROUP_BY: u16 = 21;
const F_AGGREGATES: u16 = 22;
const F_SELECT_COLUMNS: u16 = 23;
const F_ORDER_BY: u16 = 24;
const F_LIMIT: u16 = 25;
const F_OFFSET: u16 = 26;
const F_FILTER_GROUP: u16 = 27;

fn opt_string(cursor: Cursor, id: u16) -> SqgenResult<Option<String>> {
    let mut c = cursor;
    match c.enter_field(id) {
        Ok(()) => {
            let bytes = c.get_bytes().map_err(|s| SqgenError::semantic(s.message))?;
            Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
        }
        Err(status) if !status.is_abort() => Ok(None),
        Err(status) => Err(SqgenError::semantic(status.message)),
    }
}

fn req_string(cursor: Cursor, id: u16, what: &str) -> SqgenResult<String> {
    opt_string(cursor, id)?.ok_or_else(|| SqgenError::semantic(format!("missing required field '{}'", what)))
}

fn scalar_as_i64(scalar: Scalar) -> i64 {
    match scalar {
        Scalar::VarInt(v) => v as i64,
        Scalar::Fixed32(v) => v as i64,
        Scalar::Fixed64(v) => v as i64,
    }
}

fn opt_i64(cursor: Cursor, id: u16) -> SqgenResult<Option<i64>> {
    let mut c = cursor;
    match c.enter_field(id) {
        Ok(()) => {
            let scalar = c.get_scalar().map_err(|s| SqgenError::semantic(s.message))?;
            Ok(Some(scalar_as_i64(scalar)))
        }
        Err(status) if !status.is_abort() => Ok(None),
        Err(status) => Err(SqgenError::semantic(status.message)),
    }
}

fn opt_f64(cursor: Cursor, id: u16) -> SqgenResult<Option<f64>> {
    let mut c = cursor;
    match c.enter_field(id) {
        Ok(()) => {
            let scalar = c.get_scalar().map_err(|s| SqgenError::semantic(s.message))?;
            Ok(Some(match scalar {
                Scalar::Fixed64(bits) => f64::from_bits(bits),
                other => scalar_as_i64(other) as f64,
            }))
        }
        Err(status) if !status.is_abort() => Ok(None),
        Err(status) => Err(SqgenError::semantic(status.message)),
    }
}

fn opt_bool(cursor: Cursor, id: u16) -> SqgenResult<bool> {
    Ok(opt_i64(cursor, id)?.unwrap_or(0) != 0)
}

fn repeated_strings(cursor: Cursor, id: u16) -> SqgenResult<Vec<String>> {
    let iter = cursor.iterate_repeated_field(id).map_err(|s| SqgenError::semantic(s.message))?;
    iter.map(|c| {
        c.get_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .map_err(|s| SqgenError::semantic(s.message))
    })
    .collect()
}

fn repeated_messages<T>(cursor: Cursor, id: u16, decode: impl Fn(Cursor) -> SqgenResult<T>) -> SqgenResult<Vec<T>> {
    let iter = cursor.iterate_repeated_field(id).map_err(|s| SqgenError::semantic(s.message))?;
    iter.map(decode).collect()
}

fn enter(cursor: Cursor, id: u16) -> SqgenResult<Option<Cursor>> {
    let mut c = cursor;
    match c.enter_field(id) {
        Ok(()) => Ok(Some(c)),
        Err(status) if !status.is_abort() => Ok(None),
        Err(status) => Err(SqgenError::semantic(status.message)),
    }
}

fn req_message<T>(cursor: Cursor, id: u16, what: &str, decode: impl Fn(Cursor) -> SqgenResult<T>) -> SqgenResult<T> {
    let child = enter(cursor, id)?.ok_or_else(|| SqgenError::semantic(format!("missing required field '{}'", what)))?;
    decode(child)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Glob,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    fn parse(raw: &str) -> SqgenResult<FilterOp> {
        match raw {
            "EQ" => Ok(FilterOp::Eq),
            "NE" => Ok(FilterOp::Ne),
            "LT" => Ok(FilterOp::Lt),
            "LE" => Ok(FilterOp::Le),
            "GT" => Ok(FilterOp::Gt),
            "GE" => Ok(FilterOp::Ge),
            "GLOB" => Ok(FilterOp::Glob),
            "IS_NULL" => Ok(FilterOp::IsNull),
            "IS_NOT_NULL" => Ok(FilterOp::IsNotNull),
            other => Err(SqgenError::semantic(format!("unknown filter op '{}'", other))),
        }
    }

    pub fn sql_operator(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Glob => "GLOB",
            FilterOp::IsNull => "IS NULL",
            FilterOp::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn takes_rhs(&self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Double(f64),
    Str(String),
}

fn decode_filter_value(cursor: Cursor) -> SqgenResult<FilterValue> {
    if let Some(i) = opt_i64(cursor, 1)? {
        Ok(FilterValue::Int(i))
    } else if let Some(d) = opt_f64(cursor, 2)? {
        Ok(FilterValue::Double(d))
    } else if let Some(s) = opt_string(cursor, 3)? {
        Ok(FilterValue::Str(s))
    } else {
        Err(SqgenError::semantic("filter value carries none of int/double/string"))
    }
}

/// A single `(column, op, rhs)` triple. `rhs` holds zero or more typed
/// values: zero for `IS NULL`/`IS NOT NULL`, otherwise one or more,
/// OR-joined when lowered (§4.4.4).
#[derive(Debug, Clone)]
pub struct Filter {
    pub column_name: String,
    pub op: FilterOp,
    pub rhs: Vec<FilterValue>,
}

fn decode_filter(cursor: Cursor) -> SqgenResult<Filter> {
    let column_name = req_string(cursor, 1, "Filter.column_name")?;
    let op = FilterOp::parse(&req_string(cursor, 2, "Filter.op")?)?;
    let rhs = repeated_messages(cursor, 3, decode_filter_value)?;
    if op.takes_rhs() && rhs.is_empty() {
        return Err(SqgenError::semantic(format!("filter on '{}' requires at least one rhs value", column_name)));
    }
    Ok(Filter { column_name, op, rhs })
}

/// AND/OR tree of filters and raw SQL expressions (§4.4.4). A node is
/// either a group (`op` plus one or more `children`) or a leaf (a
/// `Filter` or an arbitrary SQL expression string).
#[derive(Debug, Clone)]
pub enum FilterGroup {
    And(Vec<FilterGroup>),
    Or(Vec<FilterGroup>),
    Leaf(Filter),
    Raw(String),
}

fn decode_filter_group(cursor: Cursor) -> SqgenResult<FilterGroup> {
    if let Some(op) = opt_string(cursor, 1)? {
        let children = repeated_messages(cursor, 2, decode_filter_group)?;
        if children.is_empty() {
            return Err(SqgenError::semantic("filter group must be non-empty"));
        }
        return match op.as_str() {
            "AND" => Ok(FilterGroup::And(children)),
            "OR" => Ok(FilterGroup::Or(children)),
            other => Err(SqgenError::semantic(format!("unknown filter group op '{}'", other))),
        };
    }
    if let Some(filter) = enter(cursor, 3)? {
        return Ok(FilterGroup::Leaf(decode_filter(filter)?));
    }
    if let Some(sql) = opt_string(cursor, 4)? {
        return Ok(FilterGroup::Raw(sql));
    }
    Err(SqgenError::semantic("filter group node has neither op, filter, nor sql_expr"))
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub column_name: String,
    pub op: String,
    pub result_column_name: Option<String>,
    pub percentile: Option<f64>,
    pub custom_sql: Option<String>,
}

fn decode_aggregate(cursor: Cursor) -> SqgenResult<Aggregate> {
    Ok(Aggregate {
        // Empty for ops that need no column (`COUNT(*)`, `CUSTOM`).
        column_name: opt_string(cursor, 1)?.unwrap_or_default(),
        op: req_string(cursor, 2, "Aggregate.op")?,
        result_column_name: opt_string(cursor, 3)?,
        percentile: opt_f64(cursor, 4)?,
        custom_sql: opt_string(cursor, 5)?,
    })
}

#[derive(Debug, Clone)]
pub struct SelectColumn {
    pub column_name: String,
    pub alias: Option<String>,
}

fn decode_select_column(cursor: Cursor) -> SqgenResult<SelectColumn> {
    Ok(SelectColumn { column_name: req_string(cursor, 1, "SelectColumn.column_name")?, alias: opt_string(cursor, 2)? })
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column_name: String,
    pub descending: bool,
}

fn decode_order_by(cursor: Cursor) -> SqgenResult<OrderBy> {
    Ok(OrderBy { column_name: req_string(cursor, 1, "OrderBy.column_name")?, descending: opt_bool(cursor, 2)? })
}

#[derive(Debug, Clone)]
pub struct TableSource {
    pub table_name: String,
    pub module_name: Option<String>,
}

/// A dependency of a `Sql` source: the user SQL text references it as
/// `$alias`, substituted at lowering time with the nested query's CTE
/// name (§4.4.3).
#[derive(Debug, Clone)]
pub struct SqlDependency {
    pub alias: String,
    pub query: Box<StructuredQuery>,
}

#[derive(Debug, Clone)]
pub struct SqlSource {
    pub sql: String,
    pub column_names: Vec<String>,
    pub dependencies: Vec<SqlDependency>,
}

#[derive(Debug, Clone)]
pub struct SimpleSlicesSource {
    pub slice_name_glob: String,
    pub thread_name_glob: String,
    pub process_name_glob: String,
    pub track_name_glob: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRangeMode {
    Static,
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct TimeRangeSource {
    pub mode: TimeRangeMode,
    pub ts: Option<String>,
    pub dur: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IntervalIntersectSource {
    pub base: Box<StructuredQuery>,
    pub intervals: Vec<StructuredQuery>,
    pub partition_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    fn parse(raw: &str) -> SqgenResult<JoinType> {
        match raw {
            "INNER" => Ok(JoinType::Inner),
            "LEFT" => Ok(JoinType::Left),
            other => Err(SqgenError::semantic(format!("unknown join type '{}'", other))),
        }
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A join's ON-condition (§3.4): either a single named-column equality,
/// whose two sides may carry different column names, or a freeform SQL
/// expression over two explicitly aliased sides.
#[derive(Debug, Clone)]
pub enum JoinCondition {
    EqualityColumns { left_column: String, right_column: String },
    FreeformCondition { left_alias: String, right_alias: String, sql_expression: String },
}

fn decode_join_condition(cursor: Cursor) -> SqgenResult<JoinCondition> {
    if let Some(eq) = enter(cursor, 4)? {
        return Ok(JoinCondition::EqualityColumns {
            left_column: req_string(eq, 1, "EqualityColumns.left_column")?,
            right_column: req_string(eq, 2, "EqualityColumns.right_column")?,
        });
    }
    if let Some(fc) = enter(cursor, 5)? {
        return Ok(JoinCondition::FreeformCondition {
            left_alias: req_string(fc, 1, "FreeformCondition.left_alias")?,
            right_alias: req_string(fc, 2, "FreeformCondition.right_alias")?,
            sql_expression: req_string(fc, 3, "FreeformCondition.sql_expression")?,
        });
    }
    Err(SqgenError::semantic("join requires a condition"))
}

#[derive(Debug, Clone)]
pub struct JoinSource {
    pub left: Box<StructuredQuery>,
    pub right: Box<StructuredQuery>,
    pub condition: JoinCondition,
    pub join_type: JoinType,
}

#[derive(Debug, Clone)]
pub struct UnionSource {
    pub queries: Vec<StructuredQuery>,
    pub use_union_all: bool,
}

#[derive(Debug, Clone)]
pub struct AddColumnsSource {
    pub core: Box<StructuredQuery>,
    pub input: Box<StructuredQuery>,
    pub input_columns: Vec<SelectColumn>,
    pub condition: JoinCondition,
}

#[derive(Debug, Clone)]
pub struct CreateSlicesSource {
    pub starts_query: Box<StructuredQuery>,
    pub ends_query: Box<StructuredQuery>,
    pub starts_ts_column: String,
    pub ends_ts_column: String,
}

/// The tagged union of the ten ways a query can source its rows
/// (§3.4). `InnerQuery`/`InnerQueryId` both wrap another query by value
/// or by reference; every other variant carries its own leaf payload.
#[derive(Debug, Clone)]
pub enum Source {
    Table(TableSource),
    Sql(SqlSource),
    SimpleSlices(SimpleSlicesSource),
    ExperimentalTimeRange(TimeRangeSource),
    IntervalIntersect(IntervalIntersectSource),
    ExperimentalJoin(JoinSource),
    ExperimentalUnion(UnionSource),
    ExperimentalAddColumns(AddColumnsSource),
    ExperimentalCreateSlices(CreateSlicesSource),
    InnerQuery(Box<StructuredQuery>),
    InnerQueryId(String),
}

#[derive(Debug, Clone)]
pub struct StructuredQuery {
    pub id: Option<String>,
    pub source: Source,
    pub filters: Vec<Filter>,
    pub filter_group: Option<FilterGroup>,
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
    pub select_columns: Vec<SelectColumn>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn decode_source(cursor: Cursor) -> SqgenResult<Source> {
    if let Some(id) = opt_string(cursor, F_INNER_QUERY_ID)? {
        return Ok(Source::InnerQueryId(id));
    }
    let mut c = cursor;
    if c.enter_field(F_TABLE).is_ok() {
        return Ok(Source::Table(TableSource {
            table_name: req_string(c, 1, "Table.table_name")?,
            module_name: opt_string(c, 2)?,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_SQL).is_ok() {
        let dependencies = repeated_messages(c, 3, |dep| {
            Ok(SqlDependency {
                alias: req_string(dep, 1, "SqlDependency.alias")?,
                query: Box::new(req_message(dep, 2, "SqlDependency.query", decode_structured_query)?),
            })
        })?;
        return Ok(Source::Sql(SqlSource {
            sql: req_string(c, 1, "Sql.sql")?,
            column_names: repeated_strings(c, 2)?,
            dependencies,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_SIMPLE_SLICES).is_ok() {
        return Ok(Source::SimpleSlices(SimpleSlicesSource {
            slice_name_glob: opt_string(c, 1)?.unwrap_or_default(),
            thread_name_glob: opt_string(c, 2)?.unwrap_or_default(),
            process_name_glob: opt_string(c, 3)?.unwrap_or_default(),
            track_name_glob: opt_string(c, 4)?.unwrap_or_default(),
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_TIME_RANGE).is_ok() {
        let mode = match req_string(c, 1, "TimeRange.mode")?.as_str() {
            "STATIC" => TimeRangeMode::Static,
            "DYNAMIC" => TimeRangeMode::Dynamic,
            other => return Err(SqgenError::semantic(format!("unknown time range mode '{}'", other))),
        };
        let ts = opt_string(c, 2)?;
        let dur = opt_string(c, 3)?;
        if mode == TimeRangeMode::Static && (ts.is_none() || dur.is_none()) {
            return Err(SqgenError::semantic("a static time range requires both ts and dur"));
        }
        return Ok(Source::ExperimentalTimeRange(TimeRangeSource { mode, ts, dur }));
    }
    let mut c = cursor;
    if c.enter_field(F_INTERVAL_INTERSECT).is_ok() {
        return Ok(Source::IntervalIntersect(IntervalIntersectSource {
            base: Box::new(req_message(c, 1, "IntervalIntersect.base", decode_structured_query)?),
            intervals: repeated_messages(c, 2, decode_structured_query)?,
            partition_columns: repeated_strings(c, 3)?,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_JOIN).is_ok() {
        return Ok(Source::ExperimentalJoin(JoinSource {
            left: Box::new(req_message(c, 1, "Join.left", decode_structured_query)?),
            right: Box::new(req_message(c, 2, "Join.right", decode_structured_query)?),
            join_type: JoinType::parse(&opt_string(c, 3)?.unwrap_or_else(|| "INNER".to_string()))?,
            condition: decode_join_condition(c)?,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_UNION).is_ok() {
        return Ok(Source::ExperimentalUnion(UnionSource {
            queries: repeated_messages(c, 1, decode_structured_query)?,
            use_union_all: opt_bool(c, 2)?,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_ADD_COLUMNS).is_ok() {
        return Ok(Source::ExperimentalAddColumns(AddColumnsSource {
            core: Box::new(req_message(c, 1, "AddColumns.core", decode_structured_query)?),
            input: Box::new(req_message(c, 2, "AddColumns.input", decode_structured_query)?),
            input_columns: repeated_messages(c, 3, decode_select_column)?,
            condition: decode_join_condition(c)?,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_CREATE_SLICES).is_ok() {
        let starts_ts_column = opt_string(c, 3)?.filter(|s| !s.is_empty()).unwrap_or_else(|| "ts".to_string());
        let ends_ts_column = opt_string(c, 4)?.filter(|s| !s.is_empty()).unwrap_or_else(|| "ts".to_string());
        return Ok(Source::ExperimentalCreateSlices(CreateSlicesSource {
            starts_query: Box::new(req_message(c, 1, "CreateSlices.starts_query", decode_structured_query)?),
            ends_query: Box::new(req_message(c, 2, "CreateSlices.ends_query", decode_structured_query)?),
            starts_ts_column,
            ends_ts_column,
        }));
    }
    let mut c = cursor;
    if c.enter_field(F_INNER_QUERY).is_ok() {
        return Ok(Source::InnerQuery(Box::new(decode_structured_query(c)?)));
    }
    Err(SqgenError::semantic("structured query has no recognized source"))
}

pub fn decode_structured_query(cursor: Cursor) -> SqgenResult<StructuredQuery> {
    let id = opt_string(cursor, F_ID)?;
    let source = decode_source(cursor)?;
    let filters = repeated_messages(cursor, F_FILTERS, decode_filter)?;
    let filter_group = match enter(cursor, F_FILTER_GROUP)? {
        Some(c) => Some(decode_filter_group(c)?),
        None => None,
    };
    let group_by = match enter(cursor, F_GROUP_BY)? {
        Some(c) => repeated_strings(c, 1)?,
        None => Vec::new(),
    };
    let aggregates = repeated_messages(cursor, F_AGGREGATES, decode_aggregate)?;
    let select_columns = repeated_messages(cursor, F_SELECT_COLUMNS, decode_select_column)?;
    let order_by = repeated_messages(cursor, F_ORDER_BY, decode_order_by)?;
    let limit = opt_i64(cursor, F_LIMIT)?;
    let offset = opt_i64(cursor, F_OFFSET)?;
    Ok(StructuredQuery { id, source, filters, filter_group, group_by, aggregates, select_columns, order_by, limit, offset })
}

/// Decodes a top-level `StructuredQuery` from its encoded bytes.
pub fn decode(bytes: &[u8]) -> SqgenResult<StructuredQuery> {
    decode_structured_query(Cursor::new(bytes))
}
