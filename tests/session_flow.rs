use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_workspace(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

#[test]
fn sign_in_caches_profile_until_sign_out() {
    let workspace = temp_workspace("rosterd-session-flow");
    let (mut child, mut stdin, mut reader) = spawn_daemon();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "session.signIn",
        json!({ "email": "nobody@school.test" }),
    );
    assert_eq!(error_code(&error), "not_found");
    let current = request_ok(&mut stdin, &mut reader, "4", "session.current", json!({}));
    assert!(current.get("profile").map(|p| p.is_null()).unwrap_or(false));

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({ "email": "guru@school.test", "name": "Bu Sari" }),
    );
    let teacher_id = teacher
        .get("teacherId")
        .and_then(|v| v.as_str())
        .expect("teacherId")
        .to_string();

    // Email lookup is case-insensitive.
    let signed_in = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.signIn",
        json!({ "email": "Guru@School.Test" }),
    );
    let profile = signed_in.get("profile").expect("profile");
    assert_eq!(
        profile.get("teacherId").and_then(|v| v.as_str()),
        Some(teacher_id.as_str())
    );
    assert_eq!(
        profile.get("email").and_then(|v| v.as_str()),
        Some("guru@school.test")
    );

    let current = request_ok(&mut stdin, &mut reader, "7", "session.current", json!({}));
    assert_eq!(
        current
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str()),
        Some("Bu Sari")
    );

    // The dropdown defaults to the signed-in teacher's classes.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "classes.create",
        json!({ "name": "8A", "teacherId": teacher_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "classes.create",
        json!({ "name": "Unassigned" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "10", "classes.list", json!({}));
    let classes = listed
        .get("classes")
        .and_then(|v| v.as_array())
        .expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0].get("name").and_then(|v| v.as_str()), Some("8A"));
    assert_eq!(
        classes[0].get("studentCount").and_then(|v| v.as_i64()),
        Some(0)
    );

    let _ = request_ok(&mut stdin, &mut reader, "11", "session.signOut", json!({}));
    let current = request_ok(&mut stdin, &mut reader, "12", "session.current", json!({}));
    assert!(current.get("profile").map(|p| p.is_null()).unwrap_or(false));

    // No cached profile, no filter: every class comes back.
    let listed = request_ok(&mut stdin, &mut reader, "13", "classes.list", json!({}));
    assert_eq!(
        listed
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|c| c.len()),
        Some(2)
    );

    let _ = child.kill();
}
