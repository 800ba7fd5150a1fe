//! DATA/READ/RESTORE, keyboard INPUT scripting, and the file collaborator.

use qb_runtime::{run_source, ExitReason, HeadlessHost};
use serial_test::serial;

fn run(src: &str) -> String {
    let mut host = HeadlessHost::default();
    run_source(src, &mut host).unwrap();
    host.surface.transcript
}

#[test]
fn test_read_restore() {
    let src = r#"
DATA 10, 20, "thirty"
READ a, b, c$
PRINT a; b; c$
RESTORE
READ again
PRINT again
"#;
    assert_eq!(run(src), " 10  20 thirty\n 10 \n");
}

#[test]
fn test_restore_to_label() {
    let src = r#"
DATA 1
second:
DATA 2
READ a
RESTORE second
READ b
PRINT a; b
"#;
    assert_eq!(run(src), " 1  2 \n");
}

#[test]
fn test_read_type_coercion() {
    let src = "DATA 3.5\nREAD n%\nPRINT n%";
    // Narrowing truncates toward zero on assignment
    assert_eq!(run(src), " 3 \n");
}

#[test]
fn test_data_inside_procedure_feeds_module_pool() {
    let src = r#"
SUB unused
DATA 99
END SUB
READ x
PRINT x
"#;
    assert_eq!(run(src), " 99 \n");
}

#[test]
fn test_input_scripted() {
    let mut host = HeadlessHost::default();
    host.input.lines.push_back("7, hello".to_string());
    run_source("INPUT \"vals\"; n, s$\nPRINT n; s$", &mut host).unwrap();
    assert!(host.surface.transcript.contains("vals? "));
    assert!(host.surface.transcript.ends_with(" 7 hello\n"));
}

#[test]
fn test_input_redo_on_bad_number() {
    let mut host = HeadlessHost::default();
    host.input.lines.push_back("not a number".to_string());
    host.input.lines.push_back("42".to_string());
    run_source("INPUT n\nPRINT n", &mut host).unwrap();
    assert!(host.surface.transcript.contains("Redo from start"));
    assert!(host.surface.transcript.ends_with(" 42 \n"));
}

#[test]
fn test_line_input_keeps_commas() {
    let mut host = HeadlessHost::default();
    host.input.lines.push_back("a, b, c".to_string());
    run_source("LINE INPUT s$\nPRINT s$", &mut host).unwrap();
    assert_eq!(host.surface.transcript, "a, b, c\n");
}

#[test]
fn test_inkey_nonblocking() {
    let mut host = HeadlessHost::default();
    host.input.keys.push_back("q".to_string());
    run_source("a$ = INKEY$\nb$ = INKEY$\nPRINT a$; \"|\"; b$", &mut host).unwrap();
    assert_eq!(host.surface.transcript, "q|\n");
}

#[test]
fn test_sequential_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("save.txt");
    let src = format!(
        r#"
OPEN "{p}" FOR OUTPUT AS #1
PRINT #1, "score"; 42
WRITE #1, "quoted", 7
CLOSE #1
OPEN "{p}" FOR INPUT AS #2
LINE INPUT #2, first$
INPUT #2, w$, n
CLOSE
PRINT first$
PRINT w$; n
"#,
        p = path.display()
    );
    assert_eq!(run(&src), "score 42 \nquoted 7 \n");
}

#[test]
fn test_eof_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nums.txt");
    std::fs::write(&path, "1\n2\n3\n").unwrap();
    let src = format!(
        r#"
OPEN "{p}" FOR INPUT AS #1
total = 0
DO WHILE NOT EOF(1)
INPUT #1, n
total = total + n
LOOP
CLOSE #1
PRINT total
"#,
        p = path.display()
    );
    assert_eq!(run(&src), " 6 \n");
}

#[test]
fn test_random_access_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scores.dat");
    let src = format!(
        r#"
TYPE Entry
tag AS STRING * 4
pts AS LONG
END TYPE
DIM e AS Entry
OPEN "{p}" FOR RANDOM AS #1 LEN = 8
e.tag = "bob"
e.pts = 900
PUT #1, 2, e
e.tag = "al"
e.pts = 1200
PUT #1, 1, e
DIM r AS Entry
GET #1, 2, r
CLOSE #1
PRINT r.tag; r.pts
"#,
        p = path.display()
    );
    assert_eq!(run(&src), "bob  900 \n");
}

#[test]
fn test_binary_get_put() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.bin");
    let src = format!(
        r#"
OPEN "{p}" FOR BINARY AS #1
v& = 123456
PUT #1, 1, v&
w& = 0
GET #1, 1, w&
CLOSE #1
PRINT w&
"#,
        p = path.display()
    );
    assert_eq!(run(&src), " 123456 \n");
}

#[test]
fn test_freefile_and_lof() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.txt");
    std::fs::write(&path, "abcde").unwrap();
    let src = format!(
        "h = FREEFILE\nOPEN \"{p}\" FOR INPUT AS #h\nPRINT h; LOF(h)\nCLOSE #h",
        p = path.display()
    );
    assert_eq!(run(&src), " 1  5 \n");
}

#[test]
fn test_kill_and_name() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    std::fs::write(&a, "x").unwrap();
    let src = format!(
        "NAME \"{a}\" AS \"{b}\"\nKILL \"{b}\"",
        a = a.display(),
        b = b.display()
    );
    let mut host = HeadlessHost::default();
    assert_eq!(run_source(&src, &mut host).unwrap(), ExitReason::Normal);
    assert!(!a.exists());
    assert!(!b.exists());
}

#[test]
#[serial]
fn test_mkdir_and_rmdir() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("saves");
    run(&format!("MKDIR \"{p}\"", p = sub.display()));
    assert!(sub.is_dir());
    run(&format!("RMDIR \"{p}\"", p = sub.display()));
    assert!(!sub.exists());
}

#[test]
#[serial]
fn test_rmdir_missing_is_trappable() {
    let dir = tempfile::tempdir().unwrap();
    let src = format!(
        "ON ERROR GOTO H\nRMDIR \"{p}\"\nPRINT \"after\"\nEND\nH: PRINT ERR: RESUME NEXT",
        p = dir.path().join("nope").display()
    );
    assert_eq!(run(&src), " 53 \nafter\n");
}

#[test]
#[serial]
fn test_files_lists_matching_pattern() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["one.bas", "two.bas", "notes.txt"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }
    let out = run(&format!("FILES \"{p}/*.bas\"", p = dir.path().display()));
    // Sorted, one per line, the .txt filtered out
    assert_eq!(out, "one.bas\ntwo.bas\n");
}

#[test]
#[serial]
fn test_chdir_round_trip() {
    // CHDIR moves the process-wide current directory; restore it before
    // asserting so a failure cannot poison other tests
    let original = std::env::current_dir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let src = format!(
        r#"
CHDIR "{p}"
OPEN "made-here.txt" FOR OUTPUT AS #1
PRINT #1, "x"
CLOSE #1
"#,
        p = dir.path().display()
    );
    let mut host = HeadlessHost::default();
    let result = run_source(&src, &mut host);
    std::env::set_current_dir(&original).unwrap();
    result.unwrap();
    assert!(dir.path().join("made-here.txt").exists());
}

#[test]
fn test_file_not_found_code_53() {
    let mut host = HeadlessHost::default();
    let err = run_source("OPEN \"no/such/file.txt\" FOR INPUT AS #1", &mut host).unwrap_err();
    assert_eq!(err.code, 53);
}

#[test]
fn test_input_past_end_trappable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.txt");
    std::fs::write(&path, "only").unwrap();
    let src = format!(
        r#"
ON ERROR GOTO H
OPEN "{p}" FOR INPUT AS #1
INPUT #1, a$
INPUT #1, b$
PRINT "never"
END
H: PRINT ERR: END
"#,
        p = path.display()
    );
    assert_eq!(run(&src), " 62 \n");
}

#[test]
fn test_string_codecs_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packed.bin");
    let src = format!(
        r#"
OPEN "{p}" FOR BINARY AS #1
s$ = MKI$(-12345)
PUT #1, 1, s$
t$ = "  "
GET #1, 1, t$
CLOSE #1
PRINT CVI(t$)
"#,
        p = path.display()
    );
    assert_eq!(run(&src), "-12345 \n");
}
