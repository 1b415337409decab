//! End-to-end data step flows over real storage.

use datastep_core::data_step;
use datastep_core::{
    BasicLibrary, CanonicalLibrary, ColumnType, CsvOptions, DataLibrary, DataSet, DataStepError,
    DelimitedTextLibrary, ReadOptions, ShellLibrary, SortKey, SortOptions, StateError, Value,
    VariableMeta,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn sales(lib: &CanonicalLibrary) -> DataSet {
    let mut ds = lib.build_replace("sales").unwrap();
    ds.declare("region", VariableMeta::new().with_type(ColumnType::String))
        .unwrap();
    ds.declare("month", VariableMeta::new().with_type(ColumnType::Integer))
        .unwrap();
    ds.declare(
        "amount",
        VariableMeta::new()
            .with_type(ColumnType::Float)
            .with_format("%.2f")
            .with_label("Net amount"),
    )
    .unwrap();
    let rows = [
        ("east", 1, 10.5),
        ("east", 1, 4.0),
        ("east", 2, 7.25),
        ("west", 2, 3.0),
    ];
    data_step::create(&mut [&mut ds], |sets| {
        let ds = &mut *sets[0];
        for (region, month, amount) in rows {
            ds.set("region", region)?;
            ds.set("month", month)?;
            ds.set("amount", amount)?;
            ds.write_row()?;
        }
        Ok(())
    })
    .unwrap();
    lib.get("sales").unwrap()
}

#[test]
fn test_schema_round_trips_through_canonical_storage() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let ds = sales(&lib);
    let amount = ds.variables().get("amount").unwrap();
    assert_eq!(amount.index, 2);
    assert_eq!(amount.meta.type_hint, Some(ColumnType::Float));
    assert_eq!(amount.meta.format.as_deref(), Some("%.2f"));
    assert_eq!(amount.meta.label.as_deref(), Some("Net amount"));
}

#[test]
fn test_nested_by_groups_with_totals() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let mut input = sales(&lib);

    let mut totals = lib.build_replace("totals").unwrap();
    totals.declare("region", VariableMeta::new()).unwrap();
    totals.declare("month", VariableMeta::new()).unwrap();
    totals.declare("total", VariableMeta::new()).unwrap();

    let mut flags = Vec::new();
    data_step::create(&mut [&mut totals], |out| {
        let out = &mut *out[0];
        let mut running = 0.0;
        data_step::read(&mut input, &["region", "month"], |ds| {
            flags.push((ds.first(0), ds.first(1), ds.last(0), ds.last(1)));
            if ds.first(1) {
                running = 0.0;
            }
            running += ds.get("amount")?.as_f64().unwrap_or(0.0);
            if ds.last_by("month")? {
                out.copy_from(ds, Some(&["region", "month"][..]))?;
                out.set("total", running)?;
                out.write_row()?;
            }
            Ok(())
        })
    })
    .unwrap();

    assert_eq!(
        flags,
        vec![
            (true, true, false, false),
            (false, false, false, true),
            (false, true, true, true),
            (true, true, true, true),
        ]
    );

    let mut totals = lib.get("totals").unwrap();
    let mut rows = Vec::new();
    data_step::read(&mut totals, &[], |ds| {
        rows.push(ds.row().to_vec());
        Ok(())
    })
    .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![json!("east"), json!(1), json!(14.5)],
            vec![json!("east"), json!(2), json!(7.25)],
            vec![json!("west"), json!(2), json!(3.0)],
        ]
    );
}

#[test]
fn test_lag_and_lead_while_reading() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let mut ds = sales(&lib);
    ds.open_for_read(ReadOptions::default().with_lag_rows(2).with_lead_rows(2))
        .unwrap();
    ds.read_row().unwrap();
    ds.read_row().unwrap();
    ds.read_row().unwrap();
    assert_eq!(ds.get("amount").unwrap(), &json!(7.25));
    assert_eq!(ds.lag(1).unwrap().get("amount").unwrap(), &json!(4.0));
    assert_eq!(ds.lag(2).unwrap().get("amount").unwrap(), &json!(10.5));
    assert_eq!(ds.lead(1).unwrap().get("region").unwrap(), &json!("west"));
    assert!(ds.lead(2).unwrap().is_end_of_stream());
    assert_eq!(ds.lag(-1).unwrap().get("month").unwrap(), &json!(2));
    assert!(ds.lag(3).is_err());
    ds.close().unwrap();
}

#[test]
fn test_single_row_is_first_and_last_at_every_level() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let mut ds = lib.build_replace("one").unwrap();
    ds.define_variables(|vars| {
        vars.declare("a", VariableMeta::new());
        vars.declare("b", VariableMeta::new());
    })
    .unwrap();
    data_step::create(&mut [&mut ds], |sets| {
        sets[0].set_values(vec![json!(1), json!(2)])?;
        sets[0].write_row()
    })
    .unwrap();

    let mut ds = lib.get("one").unwrap();
    let mut seen = Vec::new();
    data_step::read(&mut ds, &["a", "b"], |ds| {
        seen.push([ds.first(0), ds.last(0), ds.first(1), ds.last(1), ds.last_row()]);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen, vec![[true; 5]]);
}

#[test]
fn test_empty_data_set_reports_last_row_immediately() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let mut ds = lib.build("empty").unwrap();
    ds.declare("x", VariableMeta::new()).unwrap();
    data_step::create(&mut [&mut ds], |_| Ok(())).unwrap();

    let mut ds = lib.get("empty").unwrap();
    ds.open_for_read(ReadOptions::default()).unwrap();
    let row = ds.read_row().unwrap();
    assert!(row.last_row());
    assert_eq!(row.values(), &[Value::Null]);
    ds.close().unwrap();
}

#[test]
fn test_build_versus_build_replace() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    sales(&lib);
    assert!(matches!(
        lib.build("sales").unwrap_err(),
        DataStepError::AlreadyExists { .. }
    ));
    let replaced = lib.build_replace("sales").unwrap();
    drop(replaced);
    let reloaded = lib.get("sales").unwrap();
    assert!(reloaded.variables().is_empty());
}

#[test]
fn test_failed_step_closes_every_data_set() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let mut a = lib.build_replace("a").unwrap();
    let mut b = lib.build_replace("b").unwrap();
    a.declare("x", VariableMeta::new()).unwrap();
    b.declare("y", VariableMeta::new()).unwrap();

    let err = data_step::create(&mut [&mut a, &mut b], |sets| {
        sets[0].set("x", 1)?;
        sets[0].write_row()?;
        sets[1].set("x", 1)?;
        Ok(())
    })
    .unwrap_err();
    assert_eq!(err.to_string(), "Schema error: Unknown field 'x'");
    assert!(!a.is_open());
    assert!(!b.is_open());

    // both were closed cleanly, so both are readable
    assert_eq!(lib.get("a").unwrap().variables().keys(), vec!["x"]);
    assert_eq!(lib.get("b").unwrap().variables().keys(), vec!["y"]);
}

#[test]
fn test_read_without_open_is_a_state_error() {
    let dir = TempDir::new().unwrap();
    let lib = CanonicalLibrary::new(dir.path());
    let mut ds = sales(&lib);
    assert!(matches!(
        ds.read_row().unwrap_err(),
        DataStepError::State(StateError::NotOpen { .. })
    ));
    assert!(matches!(
        ds.write_row().unwrap_err(),
        DataStepError::State(StateError::NotOpen { .. })
    ));
}

#[test]
fn test_csv_import_sort_export() {
    let dir = TempDir::new().unwrap();
    let text = DelimitedTextLibrary::new(dir.path().join("csv"), CsvOptions::default());
    let store = CanonicalLibrary::new(dir.path().join("store"));
    std::fs::create_dir_all(dir.path().join("csv")).unwrap();
    std::fs::write(
        dir.path().join("csv/people.csv"),
        "name,age\nGrace,85\nAda,36\nLinus,\n",
    )
    .unwrap();

    let mut source = text.get("people").unwrap();
    source
        .declare("age", VariableMeta::new().with_column(1).with_type(ColumnType::Integer))
        .unwrap();
    let mut imported = store.build_replace("people").unwrap();
    imported.like(&source).unwrap();
    data_step::create(&mut [&mut imported], |out| {
        let out = &mut *out[0];
        data_step::read(&mut source, &[], |row| {
            out.copy_from(row, None)?;
            out.write_row()
        })
    })
    .unwrap();

    let mut imported = store.get("people").unwrap();
    let mut sorted = store.build_replace("by_age").unwrap();
    let options = SortOptions::new(vec![SortKey::desc("age")]).with_split_size(2);
    let summary = data_step::sort(&mut imported, &mut sorted, &options).unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.chunks, 2);

    let mut sorted = store.get("by_age").unwrap();
    let mut export = text.build_replace("by_age").unwrap();
    export.like(&sorted).unwrap();
    data_step::create(&mut [&mut export], |out| {
        let out = &mut *out[0];
        data_step::read(&mut sorted, &[], |row| {
            out.copy_from(row, None)?;
            out.write_row()
        })
    })
    .unwrap();

    let written = std::fs::read_to_string(dir.path().join("csv/by_age.csv")).unwrap();
    assert_eq!(written, "name,age\nGrace,85\nAda,36\nLinus,\n");
}

#[test]
fn test_basic_and_shell_libraries() {
    let basic = BasicLibrary::new();
    let mut stub = basic.build("stub").unwrap();
    stub.declare("k", VariableMeta::new()).unwrap();
    stub.open_for_read(ReadOptions::default()).unwrap();
    for _ in 0..3 {
        assert!(!stub.read_row().unwrap().last_row());
    }
    stub.close().unwrap();
    assert_eq!(basic.list().unwrap(), vec!["stub".to_string()]);

    let mut buffer = ShellLibrary.get("buffer").unwrap();
    buffer.declare("v", VariableMeta::new()).unwrap();
    let mut calls = 0;
    data_step::read(&mut buffer, &[], |_| {
        calls += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(calls, 0);
}
