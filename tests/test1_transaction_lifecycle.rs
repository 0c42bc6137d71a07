mod common;

use common::scripted_context;
use sql_context::prelude::*;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn successful_statement_commits_and_closes() -> TestResult {
    let (mut ctx, handle) = scripted_context();

    let affected = ctx.execute_non_query("UPDATE t SET x = 1", &[], -1)?;

    assert_eq!(affected, 1);
    assert_eq!(
        handle.log(),
        ["open", "begin", "execute:UPDATE t SET x = 1", "commit", "close"]
    );
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    assert!(!ctx.in_transaction());
    Ok(())
}

#[test]
fn failing_statement_is_rolled_back() {
    let (mut ctx, handle) = scripted_context();
    handle.script(|s| s.fail_statement = true);

    let err = ctx.execute_table("SELECT n", &[], -1).unwrap_err();

    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert_eq!(
        err.to_string(),
        "An error occured when executing the SQL Statement. Rollback Success. Check inner exception."
    );
    assert!(matches!(
        err.cause(),
        Some(DriverError::ExecutionError(msg)) if msg == "scripted statement failure"
    ));
    assert_eq!(
        handle.log(),
        ["open", "begin", "query:SELECT n", "rollback", "close"]
    );
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
}

#[test]
fn failed_rollback_still_reports_original_cause() {
    let (mut ctx, handle) = scripted_context();
    handle.script(|s| {
        s.fail_statement = true;
        s.fail_rollback = true;
    });

    let err = ctx.execute_non_query("DELETE FROM t", &[], -1).unwrap_err();

    assert_eq!(err.phase(), Some(FailurePhase::RollbackFailed));
    assert!(matches!(
        err.cause(),
        Some(DriverError::ExecutionError(msg)) if msg == "scripted statement failure"
    ));
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    assert!(!ctx.in_transaction());
}

#[test]
fn failing_commit_takes_the_rollback_path() {
    let (mut ctx, handle) = scripted_context();
    handle.script(|s| s.fail_commit = true);

    let err = ctx.execute_non_query("UPDATE t SET x = 2", &[], -1).unwrap_err();

    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert!(matches!(
        err.cause(),
        Some(DriverError::ExecutionError(msg)) if msg == "scripted commit failure"
    ));
    assert_eq!(
        handle.log(),
        ["open", "begin", "execute:UPDATE t SET x = 2", "commit", "rollback", "close"]
    );
}

#[test]
fn invalid_arguments_never_reach_the_driver() {
    let (mut ctx, handle) = scripted_context();

    let blank = ctx.execute_table("  ", &[], -1).unwrap_err();
    assert!(matches!(
        blank,
        DbContextError::InvalidArgument { argument: "sqlStatement", .. }
    ));

    let zero = ctx.execute_non_query("SELECT 1", &[], 0).unwrap_err();
    assert!(matches!(
        zero,
        DbContextError::InvalidArgument { argument: "timeout", .. }
    ));

    let output = Parameter::new("@out", RowValues::Null).with_direction(ParameterDirection::Output);
    let param = ctx.execute_scalar_value("SELECT 1", &[output], -1).unwrap_err();
    assert!(param.is_invalid_argument());

    let procedure = ctx.execute_procedure_reader("", &[]).unwrap_err();
    assert!(matches!(
        procedure,
        DbContextError::InvalidArgument { argument: "procedureName", .. }
    ));

    assert!(handle.log().is_empty());
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
}

#[test]
fn failures_do_not_leak_into_the_next_call() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    handle.script(|s| s.fail_statement = true);
    assert!(ctx.execute_non_query("UPDATE t SET x = 3", &[], -1).is_err());

    handle.script(|s| s.fail_statement = false);
    handle.clear();
    let value: i64 = ctx.execute_scalar("SELECT n", &[], 5)?;

    assert_eq!(value, 1);
    assert_eq!(
        handle.log(),
        ["open", "begin", "cursor:SELECT n", "commit", "close"]
    );
    Ok(())
}

#[test]
fn broken_connection_is_reopened_before_use() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    assert_eq!(ctx.get_connection(true)?, ConnectionState::Open);
    handle.script(|s| s.broken = true);
    assert_eq!(ctx.connection_state(), ConnectionState::Broken);

    ctx.execute_non_query("UPDATE t SET x = 4", &[], -1)?;

    assert_eq!(
        handle.log(),
        [
            "open",
            "close",
            "open",
            "begin",
            "execute:UPDATE t SET x = 4",
            "commit",
            "close"
        ]
    );
    Ok(())
}

#[test]
fn missing_second_result_set_rolls_back() -> TestResult {
    let (mut ctx, handle) = scripted_context();

    let err = ctx.execute_second_table("SELECT n", &[], -1).unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert!(matches!(err.cause(), Some(DriverError::MissingResultSet(1))));

    handle.script(|s| s.row_sets = 2);
    let second = ctx.execute_second_table("SELECT n", &[], -1)?;
    assert_eq!(second.first_cell(), Some(&RowValues::Int(2)));
    let all = ctx.execute_data_set("SELECT n", &[], -1)?;
    assert_eq!(all.len(), 2);
    Ok(())
}

#[test]
fn caller_owned_transaction_spans_several_reads() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    ctx.begin_transaction()?;
    assert!(ctx.in_transaction());

    let nested = ctx.execute_non_query("UPDATE t SET x = 5", &[], -1).unwrap_err();
    assert!(matches!(
        nested,
        DbContextError::InvalidArgument { argument: "transaction", .. }
    ));

    let values = ctx.execute_enumerable("SELECT n", &[], -1, |r| r.get_as::<i64>("n"))?;
    assert_eq!(values, [1]);
    {
        let mut reader = ctx.execute_reader("SELECT n", -1)?;
        assert!(!reader.behavior().close_connection);
        assert!(reader.read()?);
        reader.close();
        assert_eq!(reader.connection_state(), ConnectionState::Open);
    }
    assert!(ctx.in_transaction());
    assert_eq!(ctx.connection_state(), ConnectionState::Open);

    ctx.commit_transaction()?;
    assert!(!ctx.in_transaction());
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    assert_eq!(
        handle.log(),
        ["open", "begin", "cursor:SELECT n", "cursor:SELECT n", "commit", "close"]
    );
    Ok(())
}

#[test]
fn caller_rollback_swallows_failures() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    ctx.begin_transaction()?;
    handle.script(|s| s.fail_rollback = true);

    ctx.rollback_transaction();

    assert!(!ctx.in_transaction());
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    assert!(ctx.commit_transaction().is_err());
    Ok(())
}

#[test]
fn cancellation_is_best_effort() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    let cancel = ctx.cancel_handle();
    assert!(!cancel.is_attached());
    cancel.cancel();

    {
        let reader = ctx.execute_reader("SELECT n", -1)?;
        assert!(cancel.is_attached());

        handle.script(|s| s.fail_cancel = true);
        cancel.cancel();
        assert!(cancel.is_attached());

        handle.script(|s| s.fail_cancel = false);
        reader.cancel();
        assert!(!cancel.is_attached());
    }

    assert_eq!(handle.log().iter().filter(|e| *e == "cancel").count(), 2);
    assert_eq!(ctx.connection_state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn cancelled_call_does_not_leak_into_the_next_one() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    let cancel = ctx.cancel_handle();

    let err = ctx
        .execute_object("SELECT n", &[], -1, |record| {
            cancel.cancel();
            record.get_as::<i64>("n")
        })
        .unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert!(matches!(err.cause(), Some(DriverError::Cancelled)));
    assert!(!cancel.is_attached());

    handle.clear();
    assert_eq!(ctx.execute_non_query("UPDATE t SET x = 6", &[], -1)?, 1);
    assert_eq!(
        handle.log(),
        ["open", "begin", "execute:UPDATE t SET x = 6", "commit", "close"]
    );
    let value: i64 = ctx.execute_scalar("SELECT n", &[], -1)?;
    assert_eq!(value, 1);
    Ok(())
}

#[test]
fn object_converter_sees_the_first_row() -> TestResult {
    let (mut ctx, _handle) = scripted_context();
    let first = ctx.execute_object("SELECT n", &[], -1, |record| {
        record.get_as::<i64>("n")
    })?;
    assert_eq!(first, 1);

    let err = ctx
        .execute_object("SELECT n", &[], -1, |record| record.get_as::<i64>("missing"))
        .unwrap_err();
    assert_eq!(err.phase(), Some(FailurePhase::RollbackSucceeded));
    assert!(matches!(err.cause(), Some(DriverError::ColumnNotFound(_))));
    Ok(())
}

#[test]
fn bulk_copy_releases_connection_and_closes_source() -> TestResult {
    let (mut ctx, handle) = scripted_context();
    let mut source = VecRowSource::new(
        vec!["A".into(), "B".into()],
        vec![
            vec![RowValues::Int(1), RowValues::Text("one".into())],
            vec![RowValues::Int(2), RowValues::Text("two".into())],
        ],
    );
    let config = BulkCopyConfig::new("target").map("A", "X").map("B", "Y");

    assert_eq!(ctx.execute_bulk_copy(&mut source, &config)?, 2);
    assert!(source.is_closed());
    assert_eq!(handle.log(), ["open", "bulk:target:2", "close"]);

    let mut unmapped = VecRowSource::new(vec!["A".into()], vec![vec![RowValues::Int(1)]]);
    let err = ctx
        .execute_bulk_copy(&mut unmapped, &BulkCopyConfig::new("target").map("Q", "X"))
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(unmapped.is_closed());

    let blank = ctx
        .execute_bulk_copy(&mut unmapped, &BulkCopyConfig::new(" ").map("A", "X"))
        .unwrap_err();
    assert!(matches!(
        blank,
        DbContextError::InvalidArgument { argument: "destinationTableName", .. }
    ));
    Ok(())
}
