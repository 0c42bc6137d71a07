#![cfg(feature = "sqlite")]

use std::path::{Path, PathBuf};

use sql_context::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn context_at(path: &Path) -> Result<DbContext, DbContextError> {
    DbContext::sqlite(path.to_string_lossy().into_owned())
}

/// A fresh database holding two cases.
fn seeded() -> Result<(TempDir, PathBuf, DbContext), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cases.db");
    let mut ctx = context_at(&path)?;
    ctx.execute_non_query(
        "CREATE TABLE cases (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)",
        &[],
        -1,
    )?;
    let inserted = ctx.execute_non_query(
        "INSERT INTO cases (name, score) VALUES (@first, 1.5), (@second, NULL)",
        &[Parameter::new("@first", "alpha"), Parameter::new("@second", "beta")],
        -1,
    )?;
    assert_eq!(inserted, 2);
    Ok((dir, path, ctx))
}

#[test]
fn count_scalar_returns_two() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;

    let count: i64 = ctx.execute_scalar("SELECT COUNT(*) FROM cases", &[], -1)?;
    assert_eq!(count, 2);

    let untyped = ctx.execute_scalar_value("SELECT name FROM cases WHERE id = ?", &[Parameter::positional(1)], 10)?;
    assert_eq!(untyped, RowValues::Text("alpha".into()));

    let missing: Option<String> =
        ctx.execute_scalar("SELECT name FROM cases WHERE id = 99", &[], -1)?;
    assert!(missing.is_none());

    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn committed_changes_are_visible_to_other_contexts() -> TestResult {
    let (_dir, path, mut ctx) = seeded()?;
    ctx.execute_non_query(
        "UPDATE cases SET score = :score WHERE name = :name",
        &[Parameter::new(":score", 9.0), Parameter::new(":name", "beta")],
        -1,
    )?;

    let mut other = context_at(&path)?;
    let score: f64 = other.execute_scalar("SELECT score FROM cases WHERE name = 'beta'", &[], -1)?;
    assert!((score - 9.0).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn failed_statements_leave_no_trace() -> TestResult {
    let (_dir, path, mut ctx) = seeded()?;

    let err = ctx
        .execute_non_query(
            "INSERT INTO cases (name) VALUES ('gamma'); INSERT INTO cases (name) VALUES (NULL);",
            &[],
            -1,
        )
        .unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert!(matches!(err.cause(), Some(DriverError::SqliteError(_))));
    assert!(!ctx.in_transaction());
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);

    let mut other = context_at(&path)?;
    let count: i64 = other.execute_scalar("SELECT COUNT(*) FROM cases", &[], -1)?;
    assert_eq!(count, 2);
    Ok(())
}

#[test]
fn invalid_calls_do_not_create_the_database() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("untouched.db");
    let mut ctx = context_at(&path)?;

    assert!(ctx.execute_table("", &[], -1).unwrap_err().is_invalid_argument());
    assert!(ctx.execute_data_set("SELECT 1", &[], 0).unwrap_err().is_invalid_argument());
    assert!(ctx.execute_reader(" \n ", -1).unwrap_err().is_invalid_argument());
    assert!(
        ctx.execute_enumerable("SELECT 1", &[], -5, |r| r.get_as::<i64>("1"))
            .unwrap_err()
            .is_invalid_argument()
    );

    assert!(!path.exists());
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn reader_keeps_connection_open_until_closed() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;

    let mut names = Vec::new();
    {
        let mut reader = ctx.execute_reader("SELECT id, name FROM cases ORDER BY id", -1)?;
        assert_eq!(reader.connection_state(), ConnectionState::Open);
        assert_eq!(reader.column_names(), ["id", "name"]);
        while reader.read()? {
            names.push(reader.get_as::<String>("name")?);
        }
        assert_eq!(reader.connection_state(), ConnectionState::Open);
        reader.close();
        assert_eq!(reader.connection_state(), ConnectionState::Closed);
        assert!(reader.read().is_err());
    }
    assert_eq!(names, ["alpha", "beta"]);
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);

    {
        let reader = ctx.execute_parameterized_reader(
            "SELECT name FROM cases WHERE id > @min",
            &[Parameter::new("@min", 1)],
            -1,
            true,
        )?;
        assert!(reader.behavior().sequential_access);
        assert!(reader.behavior().close_connection);
    }
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn sequential_reader_fetches_rows_as_they_are_read() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;

    // Never ends, so it can only be read incrementally.
    {
        let mut reader = ctx.execute_parameterized_reader(
            "WITH RECURSIVE n(i) AS (SELECT @start UNION ALL SELECT i + 1 FROM n) SELECT i FROM n",
            &[Parameter::new("@start", 10)],
            -1,
            true,
        )?;
        for expected in 10..13 {
            assert!(reader.read()?);
            assert_eq!(reader.get_as::<i64>("i")?, expected);
        }
        assert_eq!(reader.connection_state(), ConnectionState::Open);
    }
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);

    ctx.begin_transaction()?;
    {
        let mut reader =
            ctx.execute_parameterized_reader("SELECT name FROM cases ORDER BY id", &[], -1, true)?;
        assert!(reader.read()?);
        assert_eq!(reader.get_as::<String>("name")?, "alpha");
        reader.close();
        assert_eq!(reader.connection_state(), ConnectionState::Open);
    }
    let names = ctx.execute_enumerable("SELECT name FROM cases ORDER BY id", &[], -1, |r| {
        r.get_as::<String>("name")
    })?;
    assert_eq!(names, ["alpha", "beta"]);
    ctx.commit_transaction()?;
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);

    let err = ctx
        .execute_parameterized_reader("SELECT nope FROM cases", &[], -1, true)
        .unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::Plain));
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn reader_failure_is_wrapped_without_rollback() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;
    let err = ctx.execute_reader("SELECT nope FROM cases", -1).unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::Plain));
    assert_eq!(
        err.to_string(),
        "An error occured when executing the SQL Statement. Check inner exception."
    );
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[derive(Debug, PartialEq)]
struct Case {
    id: i64,
    name: String,
    score: Option<f64>,
}

fn to_case(record: &RecordCursor) -> Result<Case, DriverError> {
    Ok(Case {
        id: record.get_as("id")?,
        name: record.get_as("name")?,
        score: record.get_as("score")?,
    })
}

#[test]
fn enumerable_converts_every_row_in_order() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;
    let cases = ctx.execute_enumerable("SELECT id, name, score FROM cases ORDER BY id", &[], -1, to_case)?;
    assert_eq!(
        cases,
        [
            Case { id: 1, name: "alpha".into(), score: Some(1.5) },
            Case { id: 2, name: "beta".into(), score: None },
        ]
    );
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn object_runs_converter_on_empty_results() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;

    let first = ctx.execute_object("SELECT id, name, score FROM cases ORDER BY id", &[], -1, to_case)?;
    assert_eq!(first.name, "alpha");

    let nothing = ctx.execute_object("SELECT id, name FROM cases WHERE id < 0", &[], -1, |record| {
        assert!(!record.has_row());
        assert!(matches!(record.get("name"), Err(DriverError::NoCurrentRow)));
        Ok(None::<Case>)
    })?;
    assert!(nothing.is_none());
    Ok(())
}

#[test]
fn tables_and_data_sets() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;

    let table = ctx.execute_table("SELECT id, name FROM cases ORDER BY id", &[], -1)?;
    assert_eq!(table.row_count(), 2);
    assert_eq!(table.results[1].get("name"), Some(&RowValues::Text("beta".into())));

    let set = ctx.execute_data_set("SELECT 1 AS a; SELECT name FROM cases;", &[], -1)?;
    assert_eq!(set.len(), 2);

    let second = ctx.execute_second_table(
        "UPDATE cases SET score = 0 WHERE id = 1; SELECT 1 AS a; SELECT name FROM cases ORDER BY id;",
        &[],
        -1,
    )?;
    assert_eq!(second.row_count(), 2);

    let err = ctx.execute_second_table("SELECT 1 AS a", &[], -1).unwrap_err();
    assert!(matches!(err.cause(), Some(DriverError::MissingResultSet(1))));
    Ok(())
}

#[test]
fn procedures_are_unsupported_on_sqlite() -> TestResult {
    let (_dir, _path, mut ctx) = seeded()?;
    let err = ctx
        .execute_procedure_non_query("usp_ArchiveCase", &[Parameter::new("@caseId", 1)])
        .unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert!(matches!(err.cause(), Some(DriverError::Unsupported(_))));
    Ok(())
}

#[test]
fn caller_transaction_rolls_back_everything() -> TestResult {
    let (_dir, path, mut ctx) = seeded()?;

    ctx.begin_transaction()?;
    let mut source = VecRowSource::new(
        vec!["label".into()],
        vec![vec![RowValues::Text("gamma".into())]],
    );
    ctx.execute_bulk_copy(&mut source, &BulkCopyConfig::new("cases").map("label", "name"))?;
    {
        let mut reader = ctx.execute_reader("SELECT COUNT(*) AS n FROM cases", -1)?;
        assert!(reader.read()?);
        assert_eq!(reader.get_as::<i64>("n")?, 3);
    }
    assert!(ctx.in_transaction());
    ctx.rollback_transaction();

    let mut other = context_at(&path)?;
    let count: i64 = other.execute_scalar("SELECT COUNT(*) FROM cases", &[], -1)?;
    assert_eq!(count, 2);
    Ok(())
}
