use crate::calc::{self, AttendanceStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open a class roster first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let status_raw = match req.params.get("status").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing status", None),
    };
    let Some(status) = AttendanceStatus::parse(&status_raw) else {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: present, sick, excused, absent",
            Some(json!({ "status": status_raw })),
        );
    };

    if !calc::set_attendance_status(&mut session.students, &student_id, status) {
        return err(&req.id, "not_found", "student not in open roster", None);
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "status": status.as_str(),
            "tally": calc::tally_attendance(&session.students)
        }),
    )
}

fn handle_tally(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.roster.as_ref() else {
        return err(&req.id, "no_roster", "open a class roster first", None);
    };
    ok(
        &req.id,
        json!({ "tally": calc::tally_attendance(&session.students) }),
    )
}

/// Persists the whole roster's current statuses in one transaction: the
/// counter matching each student's status is incremented (Present increments
/// nothing) and the day's log row is upserted. In-memory counters follow only
/// after the commit succeeds.
fn handle_save_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, roster, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = roster.as_mut() else {
        return err(&req.id, "no_roster", "open a class roster first", None);
    };

    let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for student in session.students.values() {
        let counter_column = match student.status {
            AttendanceStatus::Present => None,
            AttendanceStatus::Sick => Some("total_sick"),
            AttendanceStatus::Excused => Some("total_excused"),
            AttendanceStatus::Absent => Some("total_absent"),
        };
        if let Some(column) = counter_column {
            let sql = format!(
                "UPDATE students SET {column} = {column} + 1, updated_at = ?
                 WHERE id = ? AND class_id = ?"
            );
            if let Err(e) = tx.execute(&sql, (&now, &student.id, &session.class_id)) {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "students" })),
                );
            }
        }
        if let Err(e) = tx.execute(
            "INSERT INTO attendance_log(class_id, student_id, day, status)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(class_id, student_id, day) DO UPDATE SET
               status = excluded.status",
            (&session.class_id, &student.id, &day, student.status.as_str()),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_log" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    // Store confirmed the write; mirror the increments into the open roster.
    let mut saved = 0usize;
    for student in session.students.values_mut() {
        match student.status {
            AttendanceStatus::Present => {}
            AttendanceStatus::Sick => student.total_sick += 1,
            AttendanceStatus::Excused => student.total_excused += 1,
            AttendanceStatus::Absent => student.total_absent += 1,
        }
        saved += 1;
    }

    ok(
        &req.id,
        json!({
            "saved": saved,
            "day": day,
            "tally": calc::tally_attendance(&session.students)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.setStatus" => Some(handle_set_status(state, req)),
        "attendance.tally" => Some(handle_tally(state, req)),
        "attendance.saveBatch" => Some(handle_save_batch(state, req)),
        _ => None,
    }
}
