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
fn reset_is_password_gated_and_total() {
    let workspace = temp_workspace("rosterd-reset-totals");
    let (mut child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "8D" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Intan", "Joko"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "classId": class_id, "name": name }),
        );
        student_ids.push(
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.open",
        json!({ "classId": class_id, "semester": "sem1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.setStatus",
        json!({ "studentId": student_ids[0], "status": "absent" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.setStatus",
        json!({ "studentId": student_ids[1], "status": "sick" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "6", "attendance.saveBatch", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.save",
        json!({
            "classId": class_id,
            "studentId": student_ids[0],
            "semester": "sem1",
            "fields": { "periodic1": 75, "exam": 60 }
        }),
    );

    // Wrong password aborts before any mutation.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "class.resetTotals",
        json!({ "classId": class_id, "password": "letmein" }),
    );
    assert_eq!(error_code(&error), "invalid_password");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "classId": class_id }),
    );
    let rows = listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    let absent_total: i64 = rows
        .iter()
        .map(|r| r.get("totalAbsent").and_then(|v| v.as_i64()).unwrap_or(0))
        .sum();
    assert_eq!(absent_total, 1, "failed reset must not touch counters");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "class.resetTotals",
        json!({ "classId": "nope", "password": "123456" }),
    );
    assert_eq!(error_code(&error), "not_found");

    // Correct password: counters zeroed, grades gone, statuses back to Present.
    let reset = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "class.resetTotals",
        json!({ "classId": class_id, "password": "123456" }),
    );
    assert_eq!(reset.get("reset").and_then(|v| v.as_u64()), Some(2));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.list",
        json!({ "classId": class_id }),
    );
    for row in listed
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students")
    {
        assert_eq!(row.get("totalSick").and_then(|v| v.as_i64()), Some(0));
        assert_eq!(row.get("totalExcused").and_then(|v| v.as_i64()), Some(0));
        assert_eq!(row.get("totalAbsent").and_then(|v| v.as_i64()), Some(0));
    }

    let tallied = request_ok(&mut stdin, &mut reader, "13", "attendance.tally", json!({}));
    assert_eq!(
        tallied
            .get("tally")
            .and_then(|t| t.get("present"))
            .and_then(|v| v.as_u64()),
        Some(2)
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "roster.open",
        json!({ "classId": class_id, "semester": "sem1" }),
    );
    for row in opened.get("rows").and_then(|v| v.as_array()).expect("rows") {
        assert_eq!(
            row.get("grades")
                .and_then(|g| g.as_object())
                .map(|g| g.len()),
            Some(0)
        );
        assert_eq!(row.get("finalScore").and_then(|v| v.as_str()), Some("5.0"));
    }

    let _ = child.kill();
}
