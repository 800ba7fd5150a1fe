//! ON ERROR / RESUME and the error taxonomy end to end.

use qb_runtime::{run_source, HeadlessHost};

fn run(src: &str) -> String {
    let mut host = HeadlessHost::default();
    run_source(src, &mut host).unwrap();
    host.surface.transcript
}

fn run_err(src: &str) -> qb_lang::RuntimeError {
    let mut host = HeadlessHost::default();
    run_source(src, &mut host).unwrap_err()
}

#[test]
fn test_error_statement_resume_next() {
    let src = "ON ERROR GOTO H\nERROR 11\nPRINT \"after\"\nEND\nH: PRINT ERR; ERL: RESUME NEXT";
    assert_eq!(run(src), " 11  2 \nafter\n");
}

#[test]
fn test_resume_reruns_offending_statement() {
    let src = r#"
ON ERROR GOTO fix
tries = tries + 1
x = 1 \ divisor
PRINT "x="; x; "tries="; tries
END
fix:
divisor = 2
RESUME
"#;
    assert_eq!(run(src), "x= 0 tries= 1 \n");
}

#[test]
fn test_resume_label() {
    let src = r#"
ON ERROR GOTO H
ERROR 5
PRINT "skipped"
safe:
PRINT "landed"
END
H: RESUME safe
"#;
    assert_eq!(run(src), "landed\n");
}

#[test]
fn test_unhandled_error_carries_code_and_line() {
    let err = run_err("x = 1\ny = 1 / 0");
    assert_eq!(err.code, 11);
    assert_eq!(err.line, 2);
    assert_eq!(err.kind, qb_lang::ErrorKind::DivisionByZero);
}

#[test]
fn test_line_numbered_erl() {
    let src = "ON ERROR GOTO H\n100 ERROR 7\nEND\nH: PRINT ERL: RESUME NEXT";
    // ERL reports the classic line number when the line has one
    assert_eq!(run(src), " 100 \n");
}

#[test]
fn test_on_error_goto_zero_disables() {
    let err = run_err("ON ERROR GOTO H\nON ERROR GOTO 0\nERROR 9\nEND\nH: RESUME NEXT");
    assert_eq!(err.code, 9);
}

#[test]
fn test_error_inside_handler_is_fatal() {
    let err = run_err("ON ERROR GOTO H\nERROR 5\nEND\nH: ERROR 11");
    assert_eq!(err.code, 11);
}

#[test]
fn test_resume_without_error_is_20() {
    let err = run_err("RESUME NEXT");
    assert_eq!(err.code, 20);
}

#[test]
fn test_overflow_on_narrowing() {
    let err = run_err("x% = 40000");
    assert_eq!(err.kind, qb_lang::ErrorKind::Overflow);
    assert_eq!(err.code, 6);
}

#[test]
fn test_type_mismatch() {
    let err = run_err("x = \"words\" + 1");
    assert_eq!(err.kind, qb_lang::ErrorKind::TypeMismatch);
    assert_eq!(err.code, 13);
}

#[test]
fn test_out_of_data_code_4() {
    let err = run_err("DATA 1\nREAD a\nREAD b");
    assert_eq!(err.code, 4);
    assert_eq!(err.line, 3);
}

#[test]
fn test_block_mismatch_codes() {
    let err = run_err("NEXT");
    assert_eq!(err.code, 1);
    let err = run_err("RETURN");
    assert_eq!(err.code, 3);
}

#[test]
fn test_duplicate_definition_on_redim_static() {
    // Without $DYNAMIC a literal-bounds DIM is static
    let err = run_err("DIM a(5)\nREDIM a(9)");
    assert_eq!(err.kind, qb_lang::ErrorKind::DuplicateDefinition);
    assert_eq!(err.code, 10);
}

#[test]
fn test_error_in_sub_trapped_at_module_level() {
    let src = r#"
ON ERROR GOTO H
SUB risky
ERROR 6
END SUB
risky
PRINT "after"
END
H: PRINT ERR: RESUME NEXT
"#;
    assert_eq!(run(src), " 6 \nafter\n");
}

#[test]
fn test_error_function_restores_state() {
    // A failing FUNCTION call unwinds its frame before the handler runs
    let src = r#"
ON ERROR GOTO H
FUNCTION boom
ERROR 5
END FUNCTION
deep = 0
x = boom
PRINT "after"; deep
END
H: PRINT ERR: RESUME NEXT
"#;
    assert_eq!(run(src), " 5 \nafter 0 \n");
}

#[test]
fn test_illegal_function_call_domain() {
    let err = run_err("x = SQR(-4)");
    assert_eq!(err.code, 5);
}
