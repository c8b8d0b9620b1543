use super::roster::{get_required_str, parse_semester, HandlerErr};
use crate::calc::{self, GradeInputs};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, RosterSession};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

fn is_known_slot(slot: &str) -> bool {
    slot == calc::EXAM_SLOT || calc::PERIODIC_SLOTS.contains(&slot)
}

/// Validates the slot names and coerces every value best-effort; a malformed
/// value becomes 0, an unknown slot name is the caller's error.
fn parse_fields(params: &serde_json::Value) -> Result<BTreeMap<String, f64>, HandlerErr> {
    let Some(fields) = params.get("fields").and_then(|v| v.as_object()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing fields object".to_string(),
            details: None,
        });
    };

    let mut parsed = BTreeMap::new();
    for (slot, value) in fields {
        if !is_known_slot(slot) {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!(
                    "unknown grade slot (expected {} or {})",
                    calc::PERIODIC_SLOTS.join(", "),
                    calc::EXAM_SLOT
                ),
                details: Some(json!({ "slot": slot })),
            });
        }
        parsed.insert(slot.clone(), calc::coerce_score(value));
    }
    Ok(parsed)
}

fn student_in_class(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
        (class_id, student_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn saved_slots(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    semester: &str,
) -> Result<BTreeMap<String, f64>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT slot, score FROM grades
             WHERE class_id = ? AND student_id = ? AND semester = ?",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((class_id, student_id, semester), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
    })
    .and_then(|it| it.collect::<Result<BTreeMap<_, _>, _>>())
    .map_err(HandlerErr::query)
}

fn grades_save(
    conn: &Connection,
    roster: &mut Option<RosterSession>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let semester = parse_semester(params)?;
    let fields = parse_fields(params)?;

    if !student_in_class(conn, &class_id, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found in class".to_string(),
            details: None,
        });
    }

    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (slot, score) in &fields {
        tx.execute(
            "INSERT INTO grades(class_id, student_id, semester, slot, score, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(class_id, student_id, semester, slot) DO UPDATE SET
               score = excluded.score,
               updated_at = excluded.updated_at",
            (&class_id, &student_id, &semester, slot, score, &now),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "grades" })),
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    let slots = saved_slots(conn, &class_id, &student_id, &semester)?;
    let (total_sick, total_excused, total_absent) = conn
        .query_row(
            "SELECT total_sick, total_excused, total_absent FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(HandlerErr::query)?;

    // Confirmed write; refresh the open roster when it is the same view.
    if let Some(session) = roster.as_mut() {
        if session.class_id == class_id && session.semester == semester {
            if let Some(student) = session.students.get_mut(&student_id) {
                student.grades = slots.clone();
            }
        }
    }

    let final_score = calc::compute_final_score(
        &GradeInputs::from_slots(&slots),
        total_sick,
        total_excused,
        total_absent,
    );
    Ok(json!({
        "studentId": student_id,
        "semester": semester,
        "grades": slots,
        "finalScore": calc::format_final_score(final_score)
    }))
}

fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, roster, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match grades_save(conn, roster, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.save" => Some(handle_grades_save(state, req)),
        _ => None,
    }
}
