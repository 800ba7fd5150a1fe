//! SUB/FUNCTION semantics: binding modes, scopes, STATIC, DEF FN.

use qb_runtime::{run_source, HeadlessHost};

fn run(src: &str) -> String {
    let mut host = HeadlessHost::default();
    run_source(src, &mut host).unwrap();
    host.surface.transcript
}

#[test]
fn test_by_ref_and_parenthesized_by_value() {
    let src = r#"
SUB bump (x, y)
x = x + 1
y = y + 1
END SUB
a = 10
b = 20
bump a, (b)
PRINT a; b
"#;
    assert_eq!(run(src), " 11  20 \n");
}

#[test]
fn test_call_keyword_form() {
    let src = r#"
SUB greet (name$)
PRINT "hi "; name$
END SUB
CALL greet("ada")
"#;
    assert_eq!(run(src), "hi ada\n");
}

#[test]
fn test_function_return_value() {
    let src = r#"
FUNCTION add2 (a, b)
add2 = a + b
END FUNCTION
PRINT add2(3, 4)
"#;
    assert_eq!(run(src), " 7 \n");
}

#[test]
fn test_function_never_assigned_returns_zero() {
    let src = "FUNCTION nothing\nEND FUNCTION\nPRINT nothing + 1";
    assert_eq!(run(src), " 1 \n");
}

#[test]
fn test_recursion() {
    let src = r#"
FUNCTION fact& (n)
IF n <= 1 THEN
fact& = 1
ELSE
fact& = n * fact&(n - 1)
END IF
END FUNCTION
PRINT fact&(10)
"#;
    assert_eq!(run(src), " 3628800 \n");
}

#[test]
fn test_call_depth_limit() {
    let src = "SUB down (n)\ndown n + 1\nEND SUB\ndown 0";
    let mut host = HeadlessHost::default();
    let err = run_source(src, &mut host).unwrap_err();
    assert_eq!(err.kind, qb_lang::ErrorKind::StackOverflow);
}

#[test]
fn test_locals_do_not_leak() {
    let src = r#"
SUB work
t = 42
END SUB
t = 1
work
PRINT t
"#;
    assert_eq!(run(src), " 1 \n");
}

#[test]
fn test_shared_statement_aliases_module_cell() {
    let src = r#"
SUB addpoint
SHARED score
score = score + 5
END SUB
score = 10
addpoint
PRINT score
"#;
    assert_eq!(run(src), " 15 \n");
}

#[test]
fn test_dim_shared_visible_everywhere() {
    let src = r#"
DIM SHARED lives
SUB hit
lives = lives - 1
END SUB
lives = 3
hit
hit
PRINT lives
"#;
    assert_eq!(run(src), " 1 \n");
}

#[test]
fn test_array_passed_by_reference() {
    let src = r#"
SUB fill (a())
FOR i = 0 TO 3
a(i) = i * i
NEXT
END SUB
DIM nums(3)
fill nums()
PRINT nums(2); nums(3)
"#;
    assert_eq!(run(src), " 4  9 \n");
}

#[test]
fn test_array_element_written_back() {
    let src = r#"
SUB bump (x)
x = x + 1
END SUB
DIM a(5)
a(2) = 10
bump a(2)
PRINT a(2)
"#;
    assert_eq!(run(src), " 11 \n");
}

#[test]
fn test_static_local_survives_calls() {
    let src = r#"
SUB counter
STATIC n
n = n + 1
PRINT n;
END SUB
counter
counter
counter
PRINT ""
"#;
    assert_eq!(run(src), " 1  2  3 \n");
}

#[test]
fn test_static_sub_keeps_all_locals() {
    let src = r#"
SUB tally STATIC
n = n + 1
PRINT n;
END SUB
tally
tally
PRINT ""
"#;
    assert_eq!(run(src), " 1  2 \n");
}

#[test]
fn test_exit_sub() {
    let src = r#"
SUB guard (n)
IF n < 0 THEN EXIT SUB
PRINT "ok";
END SUB
guard -1
guard 1
PRINT ""
"#;
    assert_eq!(run(src), "ok\n");
}

#[test]
fn test_def_fn() {
    let src = "DEF FNsq(x) = x * x\nPRINT FNsq(5)";
    assert_eq!(run(src), " 25 \n");
}

#[test]
fn test_def_fn_by_value_params() {
    let src = "DEF FNtwice(x) = x + x\na = 3\nPRINT FNtwice(a); a";
    assert_eq!(run(src), " 6  3 \n");
}

#[test]
fn test_gosub_local_to_procedure() {
    let src = r#"
SUB show
GOSUB inner
EXIT SUB
inner:
PRINT "inner"
RETURN
END SUB
show
PRINT "done"
"#;
    assert_eq!(run(src), "inner\ndone\n");
}

#[test]
fn test_undefined_sub_raises_35() {
    let mut host = HeadlessHost::default();
    let err = run_source("CALL nosuch(1)", &mut host).unwrap_err();
    assert_eq!(err.code, 35);
}

#[test]
fn test_argument_count_mismatch() {
    let src = "SUB two (a, b)\nEND SUB\ntwo 1";
    let mut host = HeadlessHost::default();
    let err = run_source(src, &mut host).unwrap_err();
    assert_eq!(err.kind, qb_lang::ErrorKind::IllegalCall);
}

#[test]
fn test_function_sigil_return_type() {
    let src = "FUNCTION name$\nname$ = \"qb\"\nEND FUNCTION\nPRINT name$ + \"!\"";
    assert_eq!(run(src), "qb!\n");
}

#[test]
fn test_end_inside_function_ends_program() {
    let src = r#"
FUNCTION f
END
END FUNCTION
PRINT f
PRINT "unreachable"
"#;
    let mut host = HeadlessHost::default();
    let reason = run_source(src, &mut host).unwrap();
    assert_eq!(reason, qb_runtime::ExitReason::Normal);
    assert_eq!(host.surface.transcript, "");
}
