use sqlpp::{expand_macros, Macro, MacroMap, Parser, SqlSource, Statement};

fn macros_with(entries: Vec<Macro>) -> MacroMap {
    let mut map = MacroMap::new(0, 75).unwrap();
    for m in entries {
        map.insert(m.name.clone(), m);
    }
    map
}

#[test]
fn parsed_statement_traceback_uses_fully_expanded_statement_header() {
    let macros = macros_with(vec![Macro {
        replace: false,
        name: "double".to_string(),
        args: vec!["a".to_string()],
        body: SqlSource::from_trace_processor_implementation("($a * 2)"),
    }]);
    let mut parser = Parser::new(SqlSource::from_execute_query("SELECT double!(21);"), macros);
    assert!(parser.next());
    match parser.statement() {
        Statement::SqliteSql(sql) => {
            assert_eq!(sql.sql(), "SELECT (21 * 2)");
            let tb = sql.as_traceback(0);
            assert!(tb.starts_with("Fully expanded statement:"));
        }
        other => panic!("expected SqliteSql, got {:?}", other),
    }
    assert!(!parser.next());
}

#[test]
fn macro_expansion_traceback_has_exactly_call_site_and_macro_body_frames() {
    let macros = macros_with(vec![Macro {
        replace: false,
        name: "wrap".to_string(),
        args: vec!["a".to_string()],
        body: SqlSource::from_trace_processor_implementation("COALESCE($a, 0)"),
    }]);
    let src = SqlSource::from_execute_query("wrap!(x.val)");
    let expanded = expand_macros(&src, &macros).unwrap();
    assert_eq!(expanded.sql(), "COALESCE(x.val, 0)");

    // An offset inside the substituted `x.val` argument text.
    let offset = expanded.sql().find("x.val").unwrap() + 1;
    let tb = expanded.as_traceback(offset);
    assert_eq!(tb.lines().filter(|l| l.contains("line")).count(), 2);
    assert!(tb.contains("File \"stdin\""));
    assert!(tb.contains("Trace Processor Internal"));
}

#[test]
fn stringify_intrinsic_round_trips_through_a_macro_body() {
    let macros = macros_with(vec![Macro {
        replace: false,
        name: "label".to_string(),
        args: vec!["col".to_string()],
        body: SqlSource::from_trace_processor_implementation("__intrinsic_stringify!($col)"),
    }]);
    let src = SqlSource::from_execute_query("label!(ts)");
    let expanded = expand_macros(&src, &macros).unwrap();
    assert_eq!(expanded.sql(), "'ts'");
}

#[test]
fn stringify_with_zero_arguments_reports_the_documented_error() {
    let macros = macros_with(vec![]);
    let src = SqlSource::from_execute_query("__intrinsic_stringify!()");
    let err = expand_macros(&src, &macros).unwrap_err();
    assert!(err.to_string().contains("must specify exactly one argument"));
}
