use super::roster::{class_exists, get_required_str, HandlerErr};
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, RosterSession};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 of the shared reset password. The destructive reset is gated on
/// the frontend by a confirmation dialog plus this password; the daemon
/// re-checks it so the gate cannot be bypassed by a raw request.
const RESET_PASSWORD_SHA256: &str =
    "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92";

fn password_matches(candidate: &str) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(candidate.as_bytes());
    format!("{:x}", hasher.finalize()) == RESET_PASSWORD_SHA256
}

fn target_student_ids(
    conn: &Connection,
    class_id: &str,
    params: &serde_json::Value,
) -> Result<Vec<String>, HandlerErr> {
    if let Some(ids) = params.get("studentIds").and_then(|v| v.as_array()) {
        return Ok(ids
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect());
    }
    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE class_id = ? ORDER BY sort_order")
        .map_err(HandlerErr::query)?;
    stmt.query_map([class_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

/// Zeroes the cumulative counters and deletes every grade and attendance-log
/// row for the targeted students, all semesters, in one transaction.
fn reset_class_totals(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, Vec<String>), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let password = get_required_str(params, "password")?;

    if !password_matches(&password) {
        return Err(HandlerErr {
            code: "invalid_password",
            message: "reset password does not match".to_string(),
            details: None,
        });
    }

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let student_ids = target_student_ids(conn, &class_id, params)?;
    if student_ids.is_empty() {
        return Ok((class_id, student_ids));
    }

    let placeholders = std::iter::repeat("?")
        .take(student_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let mut bind_values: Vec<Value> = Vec::with_capacity(student_ids.len() + 1);
    bind_values.push(Value::Text(class_id.clone()));
    for id in &student_ids {
        bind_values.push(Value::Text(id.clone()));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut update_bind: Vec<Value> = Vec::with_capacity(bind_values.len() + 1);
    update_bind.push(Value::Text(now));
    update_bind.extend(bind_values.iter().cloned());

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let update_sql = format!(
        "UPDATE students
         SET total_sick = 0, total_excused = 0, total_absent = 0, updated_at = ?
         WHERE class_id = ? AND id IN ({placeholders})"
    );
    tx.execute(&update_sql, params_from_iter(update_bind.iter()))
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;

    let delete_grades_sql = format!(
        "DELETE FROM grades WHERE class_id = ? AND student_id IN ({placeholders})"
    );
    tx.execute(&delete_grades_sql, params_from_iter(bind_values.iter()))
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grades" })),
        })?;

    let delete_log_sql = format!(
        "DELETE FROM attendance_log WHERE class_id = ? AND student_id IN ({placeholders})"
    );
    tx.execute(&delete_log_sql, params_from_iter(bind_values.iter()))
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance_log" })),
        })?;

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok((class_id, student_ids))
}

fn apply_to_open_roster(roster: &mut Option<RosterSession>, class_id: &str, student_ids: &[String]) {
    let Some(session) = roster.as_mut() else {
        return;
    };
    if session.class_id != class_id {
        return;
    }
    for id in student_ids {
        if let Some(student) = session.students.get_mut(id) {
            student.total_sick = 0;
            student.total_excused = 0;
            student.total_absent = 0;
            student.grades = BTreeMap::new();
        }
    }
    // Session-local statuses start over along with the totals.
    calc::reset_attendance_statuses(&mut session.students);
}

fn handle_reset_totals(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, roster, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match reset_class_totals(conn, &req.params) {
        Ok((class_id, student_ids)) => {
            apply_to_open_roster(roster, &class_id, &student_ids);
            ok(
                &req.id,
                json!({ "classId": class_id, "reset": student_ids.len() }),
            )
        }
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "class.resetTotals" => Some(handle_reset_totals(state, req)),
        _ => None,
    }
}
