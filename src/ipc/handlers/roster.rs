use crate::calc::{self, AttendanceStatus, GradeInputs, Roster, Student};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, RosterSession};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

pub(super) struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub(super) fn get_required_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

pub(super) fn parse_semester(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let semester = get_required_str(params, "semester")?;
    if !calc::SEMESTERS.contains(&semester.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("semester must be one of: {}", calc::SEMESTERS.join(", ")),
            details: Some(json!({ "semester": semester })),
        });
    }
    Ok(semester)
}

pub(super) fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

/// Builds the in-memory roster for one class and semester: the student query
/// merged with that semester's grade rows, every status Present.
pub(super) fn load_roster(
    conn: &Connection,
    class_id: &str,
    semester: &str,
) -> Result<Roster, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, student_no, sort_order, total_sick, total_excused, total_absent
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::query)?;
    let students: Vec<Student> = stmt
        .query_map([class_id], |r| {
            Ok(Student {
                id: r.get(0)?,
                name: r.get(1)?,
                student_no: r.get(2)?,
                sort_order: r.get(3)?,
                grades: BTreeMap::new(),
                status: AttendanceStatus::Present,
                total_sick: r.get(4)?,
                total_excused: r.get(5)?,
                total_absent: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut roster: Roster = students.into_iter().map(|s| (s.id.clone(), s)).collect();

    let mut grades_stmt = conn
        .prepare(
            "SELECT student_id, slot, score
             FROM grades
             WHERE class_id = ? AND semester = ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = grades_stmt
        .query_map((class_id, semester), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    for (student_id, slot, score) in rows {
        if let Some(student) = roster.get_mut(&student_id) {
            student.grades.insert(slot, score);
        }
    }

    Ok(roster)
}

pub(super) fn student_row_json(student: &Student) -> serde_json::Value {
    let inputs = GradeInputs::from_slots(&student.grades);
    let final_score = calc::compute_final_score(
        &inputs,
        student.total_sick,
        student.total_excused,
        student.total_absent,
    );
    json!({
        "studentId": student.id,
        "name": student.name,
        "studentNo": student.student_no,
        "sortOrder": student.sort_order,
        "grades": student.grades,
        "status": student.status.as_str(),
        "totalSick": student.total_sick,
        "totalExcused": student.total_excused,
        "totalAbsent": student.total_absent,
        "finalScore": calc::format_final_score(final_score)
    })
}

pub(super) fn roster_rows_json(roster: &Roster) -> Vec<serde_json::Value> {
    let mut students: Vec<&Student> = roster.values().collect();
    students.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });
    students.into_iter().map(student_row_json).collect()
}

fn roster_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(RosterSession, serde_json::Value), HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let semester = parse_semester(params)?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let roster = load_roster(conn, &class_id, &semester)?;
    let tally = calc::tally_attendance(&roster);
    let result = json!({
        "classId": class_id,
        "semester": semester,
        "rows": roster_rows_json(&roster),
        "tally": tally
    });

    Ok((
        RosterSession {
            class_id,
            semester,
            students: roster,
        },
        result,
    ))
}

fn handle_roster_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match roster_open(conn, &req.params) {
        Ok((session, result)) => {
            // Replaces any previously open roster wholesale; session edits to
            // the old class are gone, statuses start over at Present.
            state.roster = Some(session);
            ok(&req.id, result)
        }
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.open" => Some(handle_roster_open(state, req)),
        _ => None,
    }
}
