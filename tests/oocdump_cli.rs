use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use oocmap::{OocMap, Store, StoreOptions, Value};

fn oocdump() -> Command {
    Command::new(env!("CARGO_BIN_EXE_oocdump"))
}

fn run(args: &[&str], file: &Path) -> Output {
    let mut command = oocdump();
    let mut rest = args.iter();
    // Flags go before the file, the subcommand after it.
    while let Some(arg) = rest.as_slice().first() {
        if !arg.starts_with("--") {
            break;
        }
        command.arg(arg);
        rest.next();
    }
    command.arg(file);
    command.args(rest);
    command.output().expect("failed to run oocdump")
}

fn tempdir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("oocdump-test-{}", std::process::id()));
    let thread = std::thread::current();
    let name = thread.name().unwrap_or("unknown");
    let dir = dir.join(name.replace("::", "_"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("failed to create temp dir");
    dir
}

/// Root dict {"xs": [1, 2, 3], "name": "ooc"}; the list gets id 1.
fn sample_store() -> PathBuf {
    let path = tempdir().join("sample.ooc");
    let map = OocMap::open(&path, StoreOptions::default()).unwrap();
    map.insert(&Value::str("xs"), &Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        .unwrap();
    map.insert(&Value::str("name"), &Value::str("ooc")).unwrap();
    path
}

#[test]
fn test_help() {
    let output = oocdump().arg("--help").output().expect("failed to run oocdump");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["stats", "list", "dict", "check"] {
        assert!(stdout.contains(command), "help should list {}", command);
    }
}

#[test]
fn test_stats() {
    let path = sample_store();
    let output = run(&["stats"], &path);
    assert!(
        output.status.success(),
        "stats failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("lists"));
    assert!(stdout.contains("object_index"));
}

#[test]
fn test_list_dump() {
    let path = sample_store();
    let output = run(&["list", "1"], &path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["0: 1", "1: 2", "2: 3"]);
}

#[test]
fn test_dict_dump_json() {
    let path = sample_store();
    let output = run(&["--json", "dict", "0"], &path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"length\":2"), "got: {}", stdout);
    assert!(stdout.contains("LazyList(id=1)"), "got: {}", stdout);
}

#[test]
fn test_check() {
    let path = sample_store();
    let output = run(&["check"], &path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "ok: 1 lists, 1 dicts");
}

#[test]
fn test_unknown_list_fails() {
    let path = sample_store();
    let output = run(&["list", "42"], &path);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no length record"), "got: {}", stderr);
}

#[test]
fn test_missing_file_fails() {
    let path = tempdir().join("missing.ooc");
    let output = run(&["stats"], &path);
    assert!(!output.status.success());
    assert!(!path.exists(), "a read-only dump must not create the file");
}

#[test]
fn test_store_without_root_fails_check() {
    let path = tempdir().join("bare.ooc");
    {
        let store = Store::open(&path, StoreOptions::default()).unwrap();
        oocmap::LazyList::create(&store).unwrap();
    }
    let output = run(&["check"], &path);
    assert!(!output.status.success());
}
