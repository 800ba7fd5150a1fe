//! End-to-end control-flow programs against the headless host.

use qb_runtime::{run_source, HeadlessHost};

fn run(src: &str) -> String {
    let mut host = HeadlessHost::default();
    run_source(src, &mut host).unwrap();
    host.surface.transcript
}

#[test]
fn test_hello_world() {
    let out = run("PRINT \"Hello, \"; : PRINT \"World!\"");
    assert_eq!(out, "Hello, World!\n");
}

#[test]
fn test_for_step_negative() {
    let out = run("FOR I = 10 TO 1 STEP -2 : PRINT I; : NEXT");
    assert_eq!(out, " 10  8  6  4  2 ");
}

#[test]
fn test_for_zero_trip() {
    let out = run("FOR I = 5 TO 1\nPRINT \"body\"\nNEXT\nPRINT \"done\"");
    assert_eq!(out, "done\n");
}

#[test]
fn test_nested_for_shared_next() {
    let out = run("FOR I = 1 TO 2\nFOR J = 1 TO 2\nPRINT I; J;\nNEXT J, I\nPRINT \"x\"");
    assert_eq!(out, " 1  1  1  2  2  1  2  2 x\n");
}

#[test]
fn test_for_counter_modified_in_body() {
    // Writes to the counter feed the next increment
    let out = run("FOR I = 1 TO 10\nPRINT I;\nI = I + 1\nNEXT\nPRINT \"\"");
    assert_eq!(out, " 1  3  5  7  9 \n");
}

#[test]
fn test_gosub_return_order() {
    let out = run("GOSUB L1 : PRINT \"A\" : END\nL1: PRINT \"B\": RETURN");
    assert_eq!(out, "B\nA\n");
}

#[test]
fn test_gosub_inside_single_line_if() {
    let out = run("IF 1 THEN GOSUB sub1: PRINT \"after\"\nEND\nsub1: PRINT \"in\": RETURN");
    assert_eq!(out, "in\nafter\n");
}

#[test]
fn test_on_goto_out_of_range_falls_through() {
    let out = run("K = 0\nON K GOTO a, b\nPRINT \"fell\"\nEND\na: PRINT \"a\"\nb: PRINT \"b\"");
    assert_eq!(out, "fell\n");
    let out = run("K = 9\nON K GOTO a, b\nPRINT \"fell\"\nEND\na: PRINT \"a\"\nb: PRINT \"b\"");
    assert_eq!(out, "fell\n");
}

#[test]
fn test_on_gosub_dispatch() {
    let out = run(
        "K = 2\nON K GOSUB one, two\nPRINT \"back\"\nEND\none: PRINT \"1\": RETURN\ntwo: PRINT \"2\": RETURN",
    );
    assert_eq!(out, "2\nback\n");
}

#[test]
fn test_do_while_pre_test() {
    let out = run("X = 0\nDO WHILE X < 3\nX = X + 1\nPRINT X;\nLOOP\nPRINT \"\"");
    assert_eq!(out, " 1  2  3 \n");
}

#[test]
fn test_do_until_post_test_runs_once() {
    let out = run("DO\nPRINT \"once\"\nLOOP UNTIL 1");
    assert_eq!(out, "once\n");
}

#[test]
fn test_exit_do() {
    let out = run("X = 0\nDO\nX = X + 1\nIF X = 2 THEN EXIT DO\nLOOP\nPRINT X");
    assert_eq!(out, " 2 \n");
}

#[test]
fn test_while_wend() {
    let out = run("N = 3\nWHILE N > 0\nPRINT N;\nN = N - 1\nWEND\nPRINT \"\"");
    assert_eq!(out, " 3  2  1 \n");
}

#[test]
fn test_select_case_ranges() {
    let src = "x=75 : SELECT CASE x : CASE 100 : PRINT \"P\" : CASE 90 TO 99 : PRINT \"E\" : CASE IS >= 70 : PRINT \"OK\" : CASE ELSE : PRINT \"N\" : END SELECT";
    assert_eq!(run(src), "OK\n");
}

#[test]
fn test_select_case_else_and_strings() {
    let src = r#"
w$ = "maybe"
SELECT CASE w$
CASE "yes"
PRINT "y"
CASE "no"
PRINT "n"
CASE ELSE
PRINT "?"
END SELECT
"#;
    assert_eq!(run(src), "?\n");
}

#[test]
fn test_multiline_if_elseif_chain() {
    let src = r#"
x = 50
IF x > 90 THEN
PRINT "A"
ELSEIF x > 40 THEN
PRINT "B"
ELSEIF x > 10 THEN
PRINT "C"
ELSE
PRINT "D"
END IF
PRINT "end"
"#;
    assert_eq!(run(src), "B\nend\n");
}

#[test]
fn test_multiline_if_false_no_else() {
    let out = run("IF 0 THEN\nPRINT \"no\"\nEND IF\nPRINT \"yes\"");
    assert_eq!(out, "yes\n");
}

#[test]
fn test_single_line_if_else_binding() {
    let out = run("IF 1 THEN IF 0 THEN PRINT \"a\" ELSE PRINT \"b\"");
    assert_eq!(out, "b\n");
    let out = run("IF 0 THEN IF 1 THEN PRINT \"a\" ELSE PRINT \"b\"");
    assert_eq!(out, "");
}

#[test]
fn test_for_loop_inside_single_line_if() {
    let out = run("IF 1 THEN FOR I = 1 TO 3: PRINT I;: NEXT\nPRINT \"\"");
    assert_eq!(out, " 1  2  3 \n");
}

#[test]
fn test_goto_with_line_numbers() {
    let out = run("10 GOTO 30\n20 PRINT \"skipped\"\n30 PRINT \"landed\"");
    assert_eq!(out, "landed\n");
}

#[test]
fn test_print_zones_and_tab() {
    let out = run("PRINT 1, 2");
    // " 1 " then padding to column 15, then " 2 "
    assert_eq!(out, format!(" 1 {} 2 \n", " ".repeat(11)));
    let out = run("PRINT TAB(5); \"x\"");
    assert_eq!(out, "    x\n");
    let out = run("PRINT SPC(3); \"y\"");
    assert_eq!(out, "   y\n");
}

#[test]
fn test_print_using() {
    let out = run("PRINT USING \"##.##\"; 3.14159");
    assert_eq!(out, " 3.14\n");
}

#[test]
fn test_integer_division_and_float_division() {
    let out = run("PRINT 7 / 2; 7 \\ 2; 7 MOD 2");
    assert_eq!(out, " 3.5  3  1 \n");
}

#[test]
fn test_string_ops_end_to_end() {
    let out = run("A$ = \"hello\" + \" \" + UCASE$(\"world\")\nPRINT LEN(A$); A$");
    assert_eq!(out, " 11 hello WORLD\n");
}

#[test]
fn test_swap_and_mid_assignment() {
    let out = run("A = 1: B = 2: SWAP A, B: PRINT A; B");
    assert_eq!(out, " 2  1 \n");
    let out = run("S$ = \"abcdef\"\nMID$(S$, 3, 2) = \"XY\"\nPRINT S$");
    assert_eq!(out, "abXYef\n");
}

#[test]
fn test_clear_resets_variables() {
    let out = run("X = 5\nCLEAR\nPRINT X");
    assert_eq!(out, " 0 \n");
}

#[test]
fn test_stop_exits() {
    let mut host = HeadlessHost::default();
    let reason = run_source("PRINT \"a\"\nSTOP\nPRINT \"b\"", &mut host).unwrap();
    assert_eq!(reason, qb_runtime::ExitReason::Stopped);
    assert_eq!(host.surface.transcript, "a\n");
}

#[test]
fn test_system_is_normal_end() {
    let mut host = HeadlessHost::default();
    let reason = run_source("SYSTEM\nPRINT \"no\"", &mut host).unwrap();
    assert_eq!(reason, qb_runtime::ExitReason::Normal);
}

#[test]
fn test_unsupported_statement_is_trappable() {
    let src = "ON ERROR GOTO H\nSHELL \"dir\"\nPRINT \"survived\"\nEND\nH: PRINT ERR: RESUME NEXT";
    assert_eq!(run(src), " 73 \nsurvived\n");
}

#[test]
fn test_arrays_and_bounds() {
    let src = "DIM a(2 TO 5)\na(3) = 7\nPRINT a(3); LBOUND(a); UBOUND(a)";
    assert_eq!(run(src), " 7  2  5 \n");
}

#[test]
fn test_redim_zeroes_dynamic_array() {
    let src = "' $DYNAMIC\nDIM a(5)\na(1) = 9\nREDIM a(8)\nPRINT a(1); UBOUND(a)";
    assert_eq!(run(src), " 0  8 \n");
}

#[test]
fn test_subscript_out_of_range_code() {
    let mut host = HeadlessHost::default();
    let err = run_source("DIM a(5)\na(9) = 1", &mut host).unwrap_err();
    assert_eq!(err.code, 9);
    assert_eq!(err.line, 2);
}

#[test]
fn test_records_and_fields() {
    let src = r#"
TYPE Vec
x AS SINGLE
y AS SINGLE
END TYPE
DIM p AS Vec
p.x = 3
p.y = 4
PRINT p.x * p.x + p.y * p.y
"#;
    assert_eq!(run(src), " 25 \n");
}

#[test]
fn test_record_arrays() {
    let src = r#"
TYPE Score
pts AS LONG
END TYPE
DIM best(3) AS Score
best(1).pts = 500
PRINT best(1).pts; best(2).pts
"#;
    assert_eq!(run(src), " 500  0 \n");
}

#[test]
fn test_constants_and_option_base() {
    let src = "OPTION BASE 1\nCONST N = 3\nDIM a(N)\na(1) = 10\nPRINT a(1); LBOUND(a)";
    assert_eq!(run(src), " 10  1 \n");
}

#[test]
fn test_deftype_default() {
    let out = run("DEFINT A-Z\nx = 2.7\nPRINT x");
    // Narrowing on assignment truncates toward zero
    assert_eq!(out, " 2 \n");
}
