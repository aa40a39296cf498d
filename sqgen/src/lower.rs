//! Structured-query lowering: turns a decoded [`StructuredQuery`] tree
//! into SQL text, materializing shared and nested sub-queries as CTEs
//! via a [`CteBuilder`] (§4.4.2-§4.4.5).

use std::collections::{BTreeSet, HashMap, HashSet};

use fhm::Map;
use sqlpp::{Preprocessor, SqlSource as PpSource, TokenKind};

use crate::cte::CteBuilder;
use crate::error::{SqgenError, SqgenResult};
use crate::schema::{
    Aggregate, Filter, FilterGroup, FilterValue, JoinCondition, OrderBy, SelectColumn, Source,
    StructuredQuery, TimeRangeMode,
};

pub type RegisteredQueries = Map<String, Vec<u8>>;

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn render_filter_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Int(i) => i.to_string(),
        FilterValue::Double(d) => d.to_string(),
        FilterValue::Str(s) => quote_string(s),
    }
}

/// Renders one `(column, op, rhs)` triple. Multi-valued `rhs` becomes an
/// OR-joined chain (§4.4.4); `IS NULL`/`IS NOT NULL` carry no rhs.
fn render_filter(f: &Filter) -> SqgenResult<String> {
    if !f.op.takes_rhs() {
        return Ok(format!("{} {}", f.column_name, f.op.sql_operator()));
    }
    if f.rhs.is_empty() {
        return Err(SqgenError::semantic(format!("filter on '{}' requires at least one rhs value", f.column_name)));
    }
    if f.rhs.len() == 1 {
        return Ok(format!("{} {} {}", f.column_name, f.op.sql_operator(), render_filter_value(&f.rhs[0])));
    }
    let terms: Vec<String> =
        f.rhs.iter().map(|v| format!("{} {} {}", f.column_name, f.op.sql_operator(), render_filter_value(v))).collect();
    Ok(format!("({})", terms.join(" OR ")))
}

/// Renders a `FilterGroup` tree: AND/OR nodes in parentheses, leaves as
/// either a rendered `Filter` or a raw SQL expression (§4.4.4).
fn render_filter_group(group: &FilterGroup) -> SqgenResult<String> {
    match group {
        FilterGroup::And(children) => {
            let parts = children.iter().map(render_filter_group).collect::<SqgenResult<Vec<_>>>()?;
            Ok(format!("({})", parts.join(" AND ")))
        }
        FilterGroup::Or(children) => {
            let parts = children.iter().map(render_filter_group).collect::<SqgenResult<Vec<_>>>()?;
            Ok(format!("({})", parts.join(" OR ")))
        }
        FilterGroup::Leaf(filter) => render_filter(filter),
        FilterGroup::Raw(sql) => Ok(sql.clone()),
    }
}

fn render_where_clause(sq: &StructuredQuery) -> SqgenResult<Option<String>> {
    let mut clauses = Vec::new();
    for f in &sq.filters {
        clauses.push(render_filter(f)?);
    }
    if let Some(group) = &sq.filter_group {
        clauses.push(render_filter_group(group)?);
    }
    if clauses.is_empty() {
        Ok(None)
    } else {
        Ok(Some(clauses.join(" AND ")))
    }
}

fn render_aggregate(agg: &Aggregate) -> SqgenResult<String> {
    let expr = match agg.op.as_str() {
        "COUNT" if agg.column_name.is_empty() => "COUNT(*)".to_string(),
        "COUNT" => format!("COUNT({})", agg.column_name),
        "COUNT_DISTINCT" => format!("COUNT(DISTINCT {})", agg.column_name),
        "SUM" => format!("SUM({})", agg.column_name),
        "MIN" => format!("MIN({})", agg.column_name),
        "MAX" => format!("MAX({})", agg.column_name),
        "MEAN" | "AVG" => format!("AVG({})", agg.column_name),
        "MEDIAN" => format!("PERCENTILE({}, 50)", agg.column_name),
        "PERCENTILE" => {
            let p = agg
                .percentile
                .ok_or_else(|| SqgenError::semantic("a PERCENTILE aggregate requires a percentile value"))?;
            format!("PERCENTILE({}, {})", agg.column_name, p)
        }
        "DURATION_WEIGHTED_MEAN" => {
            format!("SUM(cast_double!({} * dur)) / cast_double!(SUM(dur))", agg.column_name)
        }
        "CUSTOM" => agg
            .custom_sql
            .clone()
            .ok_or_else(|| SqgenError::semantic("a CUSTOM aggregate requires custom_sql"))?,
        other => return Err(SqgenError::semantic(format!("unknown aggregate op '{}'", other))),
    };
    Ok(match &agg.result_column_name {
        Some(alias) => format!("{} AS {}", expr, alias),
        None => expr,
    })
}

fn render_select_column(col: &SelectColumn) -> String {
    match &col.alias {
        Some(alias) => format!("{} AS {}", col.column_name, alias),
        None => col.column_name.clone(),
    }
}

fn render_select_column_qualified(prefix: &str, col: &SelectColumn) -> String {
    let base = format!("{}.{}", prefix, col.column_name);
    match &col.alias {
        Some(alias) => format!("{} AS {}", base, alias),
        None => base,
    }
}

fn render_select_clause(sq: &StructuredQuery) -> SqgenResult<String> {
    if !sq.group_by.is_empty() {
        let mut parts: Vec<String> = sq.group_by.clone();
        for agg in &sq.aggregates {
            parts.push(render_aggregate(agg)?);
        }
        if parts.is_empty() {
            return Ok("*".to_string());
        }
        return Ok(parts.join(", "));
    }
    if !sq.select_columns.is_empty() {
        return Ok(sq.select_columns.iter().map(render_select_column).collect::<Vec<_>>().join(", "));
    }
    Ok("*".to_string())
}

fn render_order_by(order_by: &[OrderBy]) -> SqgenResult<Option<String>> {
    if order_by.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::with_capacity(order_by.len());
    for spec in order_by {
        if spec.column_name.is_empty() {
            return Err(SqgenError::semantic("ORDER BY column name must not be empty"));
        }
        parts.push(format!("{} {}", spec.column_name, if spec.descending { "DESC" } else { "ASC" }));
    }
    Ok(Some(parts.join(", ")))
}

/// Lowers `sq` to a self-contained SQL body (no trailing CTE wrapping):
/// `SELECT ... FROM ... [WHERE ...] [GROUP BY ...] [ORDER BY ...] [LIMIT n] [OFFSET m]`.
fn assemble(sq: &StructuredQuery, cte: &mut CteBuilder, registered: &RegisteredQueries) -> SqgenResult<String> {
    let select_clause = render_select_clause(sq)?;
    let from_clause = lower_source(&sq.source, cte, registered)?;
    let mut sql = format!("SELECT {}\nFROM {}", select_clause, from_clause);
    if let Some(w) = render_where_clause(sq)? {
        sql.push_str(&format!("\nWHERE {}", w));
    }
    if !sq.group_by.is_empty() {
        sql.push_str(&format!("\nGROUP BY {}", sq.group_by.join(", ")));
    }
    if let Some(o) = render_order_by(&sq.order_by)? {
        sql.push_str(&format!("\nORDER BY {}", o));
    }
    if let Some(limit) = sq.limit {
        if limit < 0 {
            return Err(SqgenError::semantic("LIMIT must be non-negative"));
        }
        sql.push_str(&format!("\nLIMIT {}", limit));
        if let Some(offset) = sq.offset {
            if offset < 0 {
                return Err(SqgenError::semantic("OFFSET must be non-negative"));
            }
            sql.push_str(&format!("\nOFFSET {}", offset));
        }
    } else if sq.offset.is_some() {
        return Err(SqgenError::semantic("OFFSET requires LIMIT"));
    }
    Ok(sql)
}

/// Lowers `sq` into its own CTE and returns the CTE's name, for use as a
/// bare `FROM <name>` reference from a containing query.
fn lower_to_name(sq: &StructuredQuery, cte: &mut CteBuilder, registered: &RegisteredQueries) -> SqgenResult<String> {
    if let Source::InnerQueryId(id) = &sq.source {
        return lower_shared(id, cte, registered);
    }
    let body = assemble(sq, cte, registered)?;
    Ok(cte.emit_anonymous(body))
}

fn lower_shared(id: &str, cte: &mut CteBuilder, registered: &RegisteredQueries) -> SqgenResult<String> {
    match cte.begin_shared(id)? {
        Some(name) => Ok(name),
        None => {
            let bytes = registered
                .find(id)
                .ok_or_else(|| SqgenError::semantic(format!("unknown registered query id '{}'", id)))?;
            let inner = crate::schema::decode(bytes)?;
            let body = assemble(&inner, cte, registered)?;
            Ok(cte.finish_shared(id, body))
        }
    }
}

/// Splits a user-supplied SQL blob into preamble statements (all but the
/// last) and a final statement. The preamble is handed to the caller to
/// accumulate; the final statement is what gets embedded as a subquery.
fn split_preamble(sql_text: &str) -> SqgenResult<(Vec<String>, String)> {
    let source = PpSource::from_trace_processor_implementation(sql_text);
    let mut pp = Preprocessor::new(source);
    let mut statements = Vec::new();
    while let Some(stmt) = pp.next_statement() {
        statements.push(stmt.sql().to_string());
    }
    pp.status()?;
    let final_stmt = statements
        .pop()
        .ok_or_else(|| SqgenError::semantic("Sql source must contain at least one statement"))?;
    Ok((statements, final_stmt))
}

/// Substitutes every `$alias` variable token in `sql` with the CTE name
/// of the dependency registered under that alias, building each
/// dependency as a fresh nested state (§4.4.3).
fn substitute_dependencies(
    sql: &str,
    dependencies: &[crate::schema::SqlDependency],
    cte: &mut CteBuilder,
    registered: &RegisteredQueries,
) -> SqgenResult<String> {
    if dependencies.is_empty() {
        return Ok(sql.to_string());
    }
    let mut names = HashMap::with_capacity(dependencies.len());
    for dep in dependencies {
        let name = lower_to_name(&dep.query, cte, registered)?;
        names.insert(dep.alias.clone(), name);
    }
    let tokens = sqlpp::tokenize(sql).map_err(|e| SqgenError::semantic(format!("failed to tokenize sql dependencies: {}", e.message)))?;
    let mut out = String::with_capacity(sql.len());
    let mut last = 0usize;
    for tok in &tokens {
        if tok.kind != TokenKind::Variable || !tok.text.starts_with('$') {
            continue;
        }
        let alias = &tok.text[1..];
        if let Some(name) = names.get(alias) {
            out.push_str(&sql[last..tok.start]);
            out.push_str(name);
            last = tok.end;
        }
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

fn lower_join_condition(condition: &JoinCondition, left_alias: &str, right_alias: &str) -> String {
    match condition {
        JoinCondition::EqualityColumns { left_column, right_column } => {
            format!("{}.{} = {}.{}", left_alias, left_column, right_alias, right_column)
        }
        JoinCondition::FreeformCondition { sql_expression, .. } => sql_expression.clone(),
    }
}

fn lower_interval_intersect(
    i: &crate::schema::IntervalIntersectSource,
    cte: &mut CteBuilder,
    registered: &RegisteredQueries,
) -> SqgenResult<String> {
    if i.partition_columns.is_empty() {
        return Err(SqgenError::semantic("interval intersect requires at least one partition column"));
    }
    if i.intervals.is_empty() {
        return Err(SqgenError::semantic("interval intersect requires at least one interval query"));
    }
    let mut seen = HashSet::new();
    for col in &i.partition_columns {
        let lower = col.to_ascii_lowercase();
        if matches!(lower.as_str(), "id" | "ts" | "dur") {
            return Err(SqgenError::semantic(format!("interval intersect partition column '{}' is reserved", col)));
        }
        if !seen.insert(lower) {
            return Err(SqgenError::semantic(format!("interval intersect partition column '{}' is duplicated", col)));
        }
    }
    cte.note_referenced_module("intervals.intersect");

    let base_body = assemble(&i.base, cte, registered)?;
    let interval_bodies: Vec<String> = i.intervals.iter().map(|q| assemble(q, cte, registered)).collect::<SqgenResult<_>>()?;

    let mut with_parts = vec![format!("iibase AS (\n{}\n)", base_body)];
    for (idx, body) in interval_bodies.iter().enumerate() {
        with_parts.push(format!("iisource{} AS (\n{}\n)", idx, body));
    }
    let source_names: Vec<String> =
        std::iter::once("iibase".to_string()).chain((0..interval_bodies.len()).map(|n| format!("iisource{}", n))).collect();
    let partitions = i.partition_columns.join(", ");
    with_parts.push(format!(
        "ii_result AS (\nSELECT * FROM _interval_intersect!(({}), ({}))\n)",
        source_names.join(", "),
        partitions
    ));

    let mut select_cols = vec!["ii_result.ts AS ts".to_string(), "ii_result.dur AS dur".to_string()];
    for col in &i.partition_columns {
        select_cols.push(format!("ii_result.{0} AS {0}", col));
    }
    select_cols.push("iibase.*".to_string());
    for idx in 0..interval_bodies.len() {
        select_cols.push(format!("iisource{}.*", idx));
    }

    let mut from_clause = "ii_result\nJOIN iibase ON iibase.id = ii_result.id_0".to_string();
    for idx in 0..interval_bodies.len() {
        from_clause.push_str(&format!("\nJOIN iisource{0} ON iisource{0}.id = ii_result.id_{1}", idx, idx + 1));
    }

    Ok(format!(
        "(WITH {}\nSELECT {}\nFROM {})",
        with_parts.join(",\n"),
        select_cols.join(", "),
        from_clause
    ))
}

fn lower_source(source: &Source, cte: &mut CteBuilder, registered: &RegisteredQueries) -> SqgenResult<String> {
    match source {
        Source::Table(t) => {
            if let Some(module) = &t.module_name {
                cte.note_referenced_module(module);
            }
            Ok(t.table_name.clone())
        }
        Source::Sql(s) => {
            let (preamble, final_stmt) = split_preamble(&s.sql)?;
            for p in preamble {
                cte.add_preamble(p);
            }
            let substituted = substitute_dependencies(&final_stmt, &s.dependencies, cte, registered)?;
            let cols = if s.column_names.is_empty() { "*".to_string() } else { s.column_names.join(", ") };
            Ok(format!("(SELECT {} FROM ({}))", cols, substituted))
        }
        Source::SimpleSlices(s) => {
            cte.note_referenced_module("slices.with_context");
            let mut body = "SELECT id, ts, dur, name AS slice_name, thread_name, process_name, track_name \
FROM thread_or_process_slice"
                .to_string();
            let mut wheres = Vec::new();
            if !s.slice_name_glob.is_empty() {
                wheres.push(format!("slice_name GLOB {}", quote_string(&s.slice_name_glob)));
            }
            if !s.thread_name_glob.is_empty() {
                wheres.push(format!("thread_name GLOB {}", quote_string(&s.thread_name_glob)));
            }
            if !s.process_name_glob.is_empty() {
                wheres.push(format!("process_name GLOB {}", quote_string(&s.process_name_glob)));
            }
            if !s.track_name_glob.is_empty() {
                wheres.push(format!("track_name GLOB {}", quote_string(&s.track_name_glob)));
            }
            if !wheres.is_empty() {
                body.push_str(&format!("\nWHERE {}", wheres.join(" AND ")));
            }
            Ok(format!("({})", body))
        }
        Source::ExperimentalTimeRange(t) => {
            let ts = t.ts.clone().unwrap_or_else(|| "trace_start()".to_string());
            let dur = t.dur.clone().unwrap_or_else(|| "trace_dur()".to_string());
            if t.mode == TimeRangeMode::Static && (t.ts.is_none() || t.dur.is_none()) {
                return Err(SqgenError::semantic("a static time range requires both ts and dur"));
            }
            Ok(format!("(SELECT 0 AS id, ({}) AS ts, ({}) AS dur)", ts, dur))
        }
        Source::IntervalIntersect(i) => lower_interval_intersect(i, cte, registered),
        Source::ExperimentalJoin(j) => {
            let left_name = lower_to_name(&j.left, cte, registered)?;
            let right_name = lower_to_name(&j.right, cte, registered)?;
            let keyword = j.join_type.sql_keyword();
            match &j.condition {
                JoinCondition::EqualityColumns { .. } => {
                    let cond = lower_join_condition(&j.condition, &left_name, &right_name);
                    Ok(format!("({} {} {} ON {})", left_name, keyword, right_name, cond))
                }
                JoinCondition::FreeformCondition { left_alias, right_alias, sql_expression } => Ok(format!(
                    "({} AS {} {} {} AS {} ON {})",
                    left_name, left_alias, keyword, right_name, right_alias, sql_expression
                )),
            }
        }
        Source::ExperimentalUnion(u) => {
            if u.queries.len() < 2 {
                return Err(SqgenError::semantic("a union requires at least two queries"));
            }
            let mut expected: Option<BTreeSet<String>> = None;
            for q in &u.queries {
                if q.select_columns.is_empty() {
                    continue;
                }
                let names: BTreeSet<String> = q.select_columns.iter().map(|c| c.column_name.clone()).collect();
                match &expected {
                    None => expected = Some(names),
                    Some(exp) if *exp != names => {
                        return Err(SqgenError::semantic("union members select different sets of column names"));
                    }
                    _ => {}
                }
            }
            let bodies: Vec<String> = u.queries.iter().map(|q| assemble(q, cte, registered)).collect::<SqgenResult<_>>()?;
            let with_parts: Vec<String> =
                bodies.iter().enumerate().map(|(idx, body)| format!("union_query_{} AS (\n{}\n)", idx, body)).collect();
            let union_kw = if u.use_union_all { "UNION ALL" } else { "UNION" };
            let selects: Vec<String> = (0..bodies.len()).map(|idx| format!("SELECT * FROM union_query_{}", idx)).collect();
            Ok(format!("(WITH {}\n{})", with_parts.join(",\n"), selects.join(&format!("\n{}\n", union_kw))))
        }
        Source::ExperimentalAddColumns(a) => {
            if a.input_columns.is_empty() {
                return Err(SqgenError::semantic("add columns requires at least one input column"));
            }
            if let JoinCondition::FreeformCondition { left_alias, right_alias, .. } = &a.condition {
                if left_alias != "core" || right_alias != "input" {
                    return Err(SqgenError::semantic(
                        "add columns freeform condition aliases must be exactly 'core' and 'input'",
                    ));
                }
            }
            let core_name = lower_to_name(&a.core, cte, registered)?;
            let input_name = lower_to_name(&a.input, cte, registered)?;
            let cond = lower_join_condition(&a.condition, "core", "input");
            let extra =
                a.input_columns.iter().map(|c| render_select_column_qualified("input", c)).collect::<Vec<_>>().join(", ");
            Ok(format!(
                "(SELECT core.*, {extra} FROM {core} AS core LEFT JOIN {input} AS input ON {cond})",
                extra = extra,
                core = core_name,
                input = input_name,
                cond = cond
            ))
        }
        Source::ExperimentalCreateSlices(c) => {
            let starts_name = lower_to_name(&c.starts_query, cte, registered)?;
            let ends_name = lower_to_name(&c.ends_query, cte, registered)?;
            Ok(format!(
                "(SELECT ts, (end_ts - ts) AS dur FROM (\n\
SELECT starts.{sc} AS ts, (SELECT MIN(ends.{ec}) FROM {ends} AS ends WHERE ends.{ec} > starts.{sc}) AS end_ts\n\
FROM {starts} AS starts\n\
) WHERE end_ts IS NOT NULL)",
                sc = c.starts_ts_column,
                ec = c.ends_ts_column,
                starts = starts_name,
                ends = ends_name
            ))
        }
        Source::InnerQuery(inner) => lower_to_name(inner, cte, registered),
        Source::InnerQueryId(id) => lower_shared(id, cte, registered),
    }
}

fn is_root_passthrough(sq: &StructuredQuery) -> bool {
    matches!(sq.source, Source::InnerQuery(_))
        && sq.filters.is_empty()
        && sq.filter_group.is_none()
        && sq.group_by.is_empty()
        && sq.aggregates.is_empty()
        && sq.select_columns.is_empty()
}

/// Lowers a fully decoded root query to its final SQL text (§4.4.1,
/// §4.4.5). `registered` backs `InnerQueryId` lookups for shared
/// sub-queries added via `Generator::add_query`.
pub fn generate_sql(root: &StructuredQuery, cte: &mut CteBuilder, registered: &RegisteredQueries) -> SqgenResult<String> {
    if is_root_passthrough(root) {
        let inner = match &root.source {
            Source::InnerQuery(q) => q.as_ref(),
            _ => unreachable!(),
        };
        let inner_name = lower_to_name(inner, cte, registered)?;
        let mut sql = format!("SELECT * FROM {}", inner_name);
        if let Some(o) = render_order_by(&root.order_by)? {
            sql.push_str(&format!("\nORDER BY {}", o));
        }
        if let Some(limit) = root.limit {
            sql.push_str(&format!("\nLIMIT {}", limit));
            if let Some(offset) = root.offset {
                sql.push_str(&format!("\nOFFSET {}", offset));
            }
        }
        return Ok(format!("{}{}", cte.render_with_clause(), sql));
    }
    let body = assemble(root, cte, registered).map_err(|e| {
        SqgenError::semantic(format!(
            "Failed to generate SQL for query (id={}, idx=0): {}",
            root.id.as_deref().unwrap_or("unknown"),
            e
        ))
    })?;
    let root_name = cte.emit_anonymous(body);
    Ok(format!("{}SELECT *\nFROM {}", cte.render_with_clause(), root_name))
}
