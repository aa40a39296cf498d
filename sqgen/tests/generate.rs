use dec::encode;
use sqgen::Generator;

fn table_source(table_name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, table_name.as_bytes());
    body
}

fn inner_query_id_query(own_id: Option<&str>, referenced_id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(id) = own_id {
        encode::write_bytes_field(&mut out, 1, id.as_bytes());
    }
    encode::write_bytes_field(&mut out, 12, referenced_id.as_bytes());
    out
}

/// A filter with a single string rhs value.
fn filter(column: &str, op: &str, value: &str) -> Vec<u8> {
    multi_value_filter(column, op, &[value])
}

/// A filter with zero or more string rhs values, OR-joined when lowered.
fn multi_value_filter(column: &str, op: &str, values: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, column.as_bytes());
    encode::write_bytes_field(&mut body, 2, op.as_bytes());
    for v in values {
        let mut rhs = Vec::new();
        encode::write_bytes_field(&mut rhs, 3, v.as_bytes());
        encode::write_bytes_field(&mut body, 3, &rhs);
    }
    body
}

fn filter_group_leaf(filter_bytes: &[u8]) -> Vec<u8> {
    let mut node = Vec::new();
    encode::write_bytes_field(&mut node, 3, filter_bytes);
    node
}

fn filter_group_raw(sql_expr: &str) -> Vec<u8> {
    let mut node = Vec::new();
    encode::write_bytes_field(&mut node, 4, sql_expr.as_bytes());
    node
}

fn filter_group_op(op: &str, children: &[Vec<u8>]) -> Vec<u8> {
    let mut node = Vec::new();
    encode::write_bytes_field(&mut node, 1, op.as_bytes());
    for c in children {
        encode::write_bytes_field(&mut node, 2, c);
    }
    node
}

fn percentile_aggregate(column: &str, p: f64, result_name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, column.as_bytes());
    encode::write_bytes_field(&mut body, 2, b"PERCENTILE");
    encode::write_bytes_field(&mut body, 3, result_name.as_bytes());
    encode::write_fixed64_field(&mut body, 4, p.to_bits());
    body
}

fn custom_aggregate(custom_sql: &str, result_name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 2, b"CUSTOM");
    encode::write_bytes_field(&mut body, 3, result_name.as_bytes());
    encode::write_bytes_field(&mut body, 5, custom_sql.as_bytes());
    body
}

fn equality_condition(left_column: &str, right_column: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, left_column.as_bytes());
    encode::write_bytes_field(&mut body, 2, right_column.as_bytes());
    body
}

fn freeform_condition(left_alias: &str, right_alias: &str, sql_expression: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, left_alias.as_bytes());
    encode::write_bytes_field(&mut body, 2, right_alias.as_bytes());
    encode::write_bytes_field(&mut body, 3, sql_expression.as_bytes());
    body
}

/// A `Table` source wrapped as a full `StructuredQuery`, for embedding as
/// the `left`/`right`/`core`/`input`/`starts_query`/`ends_query` of a
/// two-query source kind.
fn table_query(table_name: &str) -> Vec<u8> {
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source(table_name));
    root
}

fn join_query(
    left: &[u8],
    right: &[u8],
    join_type: Option<&str>,
    equality: Option<&[u8]>,
    freeform: Option<&[u8]>,
) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, left);
    encode::write_bytes_field(&mut body, 2, right);
    if let Some(jt) = join_type {
        encode::write_bytes_field(&mut body, 3, jt.as_bytes());
    }
    if let Some(eq) = equality {
        encode::write_bytes_field(&mut body, 4, eq);
    }
    if let Some(fc) = freeform {
        encode::write_bytes_field(&mut body, 5, fc);
    }
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 7, &body);
    root
}

fn add_columns_query(
    core: &[u8],
    input: &[u8],
    input_columns: &[&str],
    equality: Option<&[u8]>,
    freeform: Option<&[u8]>,
) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, core);
    encode::write_bytes_field(&mut body, 2, input);
    for col in input_columns {
        let mut c = Vec::new();
        encode::write_bytes_field(&mut c, 1, col.as_bytes());
        encode::write_bytes_field(&mut body, 3, &c);
    }
    if let Some(eq) = equality {
        encode::write_bytes_field(&mut body, 4, eq);
    }
    if let Some(fc) = freeform {
        encode::write_bytes_field(&mut body, 5, fc);
    }
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 9, &body);
    root
}

fn create_slices_query(starts: &[u8], ends: &[u8], starts_ts: Option<&str>, ends_ts: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, starts);
    encode::write_bytes_field(&mut body, 2, ends);
    if let Some(s) = starts_ts {
        encode::write_bytes_field(&mut body, 3, s.as_bytes());
    }
    if let Some(e) = ends_ts {
        encode::write_bytes_field(&mut body, 4, e.as_bytes());
    }
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 10, &body);
    root
}

fn time_range_query(mode: &str, ts: Option<&str>, dur: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, mode.as_bytes());
    if let Some(ts) = ts {
        encode::write_bytes_field(&mut body, 2, ts.as_bytes());
    }
    if let Some(dur) = dur {
        encode::write_bytes_field(&mut body, 3, dur.as_bytes());
    }
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 5, &body);
    root
}

fn union_query(members: &[Vec<u8>], use_union_all: bool) -> Vec<u8> {
    let mut body = Vec::new();
    for m in members {
        encode::write_bytes_field(&mut body, 1, m);
    }
    if use_union_all {
        encode::write_varint_field(&mut body, 2, 1);
    }
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 8, &body);
    root
}

fn group_by(keys: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    for k in keys {
        encode::write_bytes_field(&mut body, 1, k.as_bytes());
    }
    body
}

fn aggregate(column: &str, op: &str, result_name: &str) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, column.as_bytes());
    encode::write_bytes_field(&mut body, 2, op.as_bytes());
    encode::write_bytes_field(&mut body, 3, result_name.as_bytes());
    body
}

fn order_by(column: &str, descending: bool) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_bytes_field(&mut body, 1, column.as_bytes());
    encode::write_varint_field(&mut body, 2, if descending { 1 } else { 0 });
    body
}

#[test]
fn s6_minimal_table_query_wraps_a_single_anonymous_cte() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    let sql = gen.generate(&root).unwrap();
    assert_eq!(sql, "WITH sq_0 AS (\nSELECT *\nFROM slice\n)\nSELECT *\nFROM sq_0");
}

#[test]
fn s7_filter_group_by_and_aggregate_assemble_in_order() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    encode::write_bytes_field(&mut root, 20, &filter("name", "EQ", "foo"));
    encode::write_bytes_field(&mut root, 21, &group_by(&["name"]));
    encode::write_bytes_field(&mut root, 22, &aggregate("dur", "SUM", "total_dur"));
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("SELECT name, SUM(dur) AS total_dur"));
    assert!(sql.contains("FROM slice"));
    assert!(sql.contains("WHERE name = 'foo'"));
    assert!(sql.contains("GROUP BY name"));
}

#[test]
fn p8_clause_emission_order_is_always_respected() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    encode::write_bytes_field(&mut root, 20, &filter("name", "EQ", "foo"));
    encode::write_bytes_field(&mut root, 21, &group_by(&["name"]));
    encode::write_bytes_field(&mut root, 22, &aggregate("dur", "SUM", "total_dur"));
    encode::write_bytes_field(&mut root, 24, &order_by("name", false));
    encode::write_varint_field(&mut root, 25, 10);
    encode::write_varint_field(&mut root, 26, 5);
    let sql = gen.generate(&root).unwrap();

    let from_pos = sql.find("FROM").unwrap();
    let where_pos = sql.find("WHERE").unwrap();
    let group_pos = sql.find("GROUP BY").unwrap();
    let order_pos = sql.find("ORDER BY").unwrap();
    let limit_pos = sql.find("LIMIT").unwrap();
    let offset_pos = sql.find("OFFSET").unwrap();

    assert!(from_pos < where_pos);
    assert!(where_pos < group_pos);
    assert!(group_pos < order_pos);
    assert!(order_pos < limit_pos);
    assert!(limit_pos < offset_pos);
}

#[test]
fn p9_a_shared_query_referenced_three_times_is_materialized_once() {
    let mut gen = Generator::new();
    let mut shared = Vec::new();
    encode::write_bytes_field(&mut shared, 1, b"x");
    encode::write_bytes_field(&mut shared, 2, &table_source("slice"));
    gen.add_query(&shared).unwrap();

    let reference = inner_query_id_query(None, "x");
    let mut union_body = Vec::new();
    encode::write_bytes_field(&mut union_body, 1, &reference);
    encode::write_bytes_field(&mut union_body, 1, &reference);
    encode::write_bytes_field(&mut union_body, 1, &reference);
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 8, &union_body);

    let sql = gen.generate(&root).unwrap();
    assert_eq!(sql.matches("shared_sq_x AS (").count(), 1);
    assert_eq!(sql.matches("FROM shared_sq_x").count(), 3);
}

#[test]
fn p10_and_s8_a_transitive_self_reference_is_a_cycle_error() {
    let mut gen = Generator::new();
    gen.add_query(&inner_query_id_query(Some("A"), "B")).unwrap();
    gen.add_query(&inner_query_id_query(Some("B"), "A")).unwrap();

    let err = gen.generate_by_id("A").unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Failed to generate SQL for query (id=A, idx=0):"));
    assert!(message.contains("Cycle detected in structured query dependencies involving query with id 'B'"));
}

#[test]
fn s10_add_query_then_generate_by_id_resolves_through_the_shared_registry() {
    let mut gen = Generator::new();
    let mut shared = Vec::new();
    encode::write_bytes_field(&mut shared, 1, b"x");
    encode::write_bytes_field(&mut shared, 2, &table_source("slice"));
    gen.add_query(&shared).unwrap();

    let by_id = gen.generate_by_id("x").unwrap();
    assert!(by_id.contains("FROM slice"));

    let mut gen2 = Generator::new();
    gen2.add_query(&shared).unwrap();
    let mut referencing_root = Vec::new();
    encode::write_bytes_field(&mut referencing_root, 12, b"x");
    let via_reference = gen2.generate(&referencing_root).unwrap();
    // Both paths resolve the same underlying table with no extra
    // filtering; they differ only in which CTE layer wraps it.
    assert!(via_reference.contains("FROM slice"));
    assert!(by_id.contains("WITH") && via_reference.contains("WITH"));
}

#[test]
fn duplicate_query_id_is_rejected() {
    let mut gen = Generator::new();
    let mut shared = Vec::new();
    encode::write_bytes_field(&mut shared, 1, b"dup");
    encode::write_bytes_field(&mut shared, 2, &table_source("slice"));
    gen.add_query(&shared).unwrap();
    let err = gen.add_query(&shared).unwrap_err();
    assert!(err.to_string().contains("duplicate query id 'dup'"));
}

#[test]
fn multi_valued_filter_rhs_is_or_joined() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    encode::write_bytes_field(&mut root, 20, &multi_value_filter("name", "EQ", &["a", "b", "c"]));
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("WHERE (name = 'a' OR name = 'b' OR name = 'c')"));
}

#[test]
fn is_null_filter_carries_no_rhs_value() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    let mut no_rhs = Vec::new();
    encode::write_bytes_field(&mut no_rhs, 1, b"parent_id");
    encode::write_bytes_field(&mut no_rhs, 2, b"IS_NULL");
    encode::write_bytes_field(&mut root, 20, &no_rhs);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("WHERE parent_id IS NULL"));
}

#[test]
fn filter_group_nests_and_or_and_raw_sql_leaves() {
    let mut gen = Generator::new();
    let eq_filter = filter("name", "EQ", "foo");
    let or_group = filter_group_op("OR", &[filter_group_leaf(&eq_filter), filter_group_raw("dur > 100")]);
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    encode::write_bytes_field(&mut root, 27, &or_group);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("WHERE (name = 'foo' OR dur > 100)"));
}

#[test]
fn join_with_differently_named_equality_columns() {
    let mut gen = Generator::new();
    let left = table_query("slice");
    let right = table_query("thread_track");
    let eq = equality_condition("track_id", "id");
    let root = join_query(&left, &right, None, Some(&eq), None);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("JOIN"));
    assert!(sql.contains(".track_id = "));
    assert!(sql.contains(".id)"));
}

#[test]
fn join_with_freeform_condition_and_left_join_type() {
    let mut gen = Generator::new();
    let left = table_query("slice");
    let right = table_query("thread_track");
    let fc = freeform_condition("s", "t", "s.track_id = t.id AND t.name IS NOT NULL");
    let root = join_query(&left, &right, Some("LEFT"), None, Some(&fc));
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("LEFT JOIN"));
    assert!(sql.contains("AS s"));
    assert!(sql.contains("AS t"));
    assert!(sql.contains("s.track_id = t.id AND t.name IS NOT NULL"));
}

#[test]
fn add_columns_left_joins_a_separate_input_query() {
    let mut gen = Generator::new();
    let core = table_query("slice");
    let input = table_query("thread_track");
    let eq = equality_condition("track_id", "id");
    let root = add_columns_query(&core, &input, &["name"], Some(&eq), None);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("LEFT JOIN"));
    assert!(sql.contains("core.track_id = input.id"));
    assert!(sql.contains("input.name"));
    assert!(sql.contains("AS core"));
    assert!(sql.contains("AS input"));
}

#[test]
fn add_columns_rejects_a_freeform_condition_with_the_wrong_aliases() {
    let mut gen = Generator::new();
    let core = table_query("slice");
    let input = table_query("thread_track");
    let fc = freeform_condition("left", "right", "left.track_id = right.id");
    let root = add_columns_query(&core, &input, &["name"], None, Some(&fc));
    let err = gen.generate(&root).unwrap_err();
    assert!(err.to_string().contains("'core' and 'input'"));
}

#[test]
fn create_slices_joins_independently_sourced_starts_and_ends_queries() {
    let mut gen = Generator::new();
    let starts = table_query("slice_start");
    let ends = table_query("slice_end");
    let root = create_slices_query(&starts, &ends, None, None);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("FROM slice_start"));
    assert!(sql.contains("FROM slice_end"));
    assert!(sql.contains("ends.ts > starts.ts"));
}

#[test]
fn time_range_static_mode_embeds_both_bounds_verbatim() {
    let mut gen = Generator::new();
    let root = time_range_query("STATIC", Some("100"), Some("200"));
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("(100) AS ts"));
    assert!(sql.contains("(200) AS dur"));
}

#[test]
fn time_range_dynamic_mode_defaults_missing_bounds_to_trace_functions() {
    let mut gen = Generator::new();
    let root = time_range_query("DYNAMIC", None, None);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("(trace_start()) AS ts"));
    assert!(sql.contains("(trace_dur()) AS dur"));
}

#[test]
fn time_range_static_mode_requires_both_bounds() {
    let mut gen = Generator::new();
    let root = time_range_query("STATIC", Some("100"), None);
    let err = gen.generate(&root).unwrap_err();
    assert!(err.to_string().contains("static time range requires both ts and dur"));
}

#[test]
fn union_all_uses_the_all_keyword() {
    let mut gen = Generator::new();
    let members = vec![table_query("slice_a"), table_query("slice_b")];
    let root = union_query(&members, true);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("UNION ALL"));
}

#[test]
fn union_without_all_omits_the_all_keyword() {
    let mut gen = Generator::new();
    let members = vec![table_query("slice_a"), table_query("slice_b")];
    let root = union_query(&members, false);
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("UNION"));
    assert!(!sql.contains("UNION ALL"));
}

#[test]
fn union_members_with_mismatched_select_columns_are_rejected() {
    let mut gen = Generator::new();
    let mut a = table_query("slice_a");
    let mut select_a = Vec::new();
    encode::write_bytes_field(&mut select_a, 1, b"name");
    encode::write_bytes_field(&mut a, 23, &select_a);

    let mut b = table_query("slice_b");
    let mut select_b = Vec::new();
    encode::write_bytes_field(&mut select_b, 1, b"dur");
    encode::write_bytes_field(&mut b, 23, &select_b);

    let root = union_query(&[a, b], false);
    let err = gen.generate(&root).unwrap_err();
    assert!(err.to_string().contains("different sets of column names"));
}

#[test]
fn aggregate_percentile_honors_an_explicit_percentile_value() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    encode::write_bytes_field(&mut root, 21, &group_by(&["name"]));
    encode::write_bytes_field(&mut root, 22, &percentile_aggregate("dur", 95.0, "p95_dur"));
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("PERCENTILE(dur, 95) AS p95_dur"));
}

#[test]
fn aggregate_custom_sql_is_used_verbatim() {
    let mut gen = Generator::new();
    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 2, &table_source("slice"));
    encode::write_bytes_field(&mut root, 21, &group_by(&["name"]));
    encode::write_bytes_field(&mut root, 22, &custom_aggregate("MAX(dur) - MIN(dur)", "dur_range"));
    let sql = gen.generate(&root).unwrap();
    assert!(sql.contains("MAX(dur) - MIN(dur) AS dur_range"));
}

#[test]
fn sql_source_dependency_alias_is_substituted_with_the_dependencys_cte_name() {
    let mut gen = Generator::new();
    let mut dep = Vec::new();
    encode::write_bytes_field(&mut dep, 1, b"base");
    encode::write_bytes_field(&mut dep, 2, &table_query("slice"));

    let mut sql_source = Vec::new();
    encode::write_bytes_field(&mut sql_source, 1, b"SELECT * FROM $base WHERE dur > 0");
    encode::write_bytes_field(&mut sql_source, 3, &dep);

    let mut root = Vec::new();
    encode::write_bytes_field(&mut root, 3, &sql_source);

    let sql = gen.generate(&root).unwrap();
    assert!(!sql.contains("$base"));
    assert!(sql.contains("WHERE dur > 0"));
}
