use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // The dashboard dropdown shows the signed-in teacher's classes; an
    // explicit teacherId overrides, no filter at all lists everything.
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => Some(v.to_string()),
        None => match db::settings_get_json(conn, db::SESSION_PROFILE_KEY) {
            Ok(profile) => profile
                .as_ref()
                .and_then(|p| p.get("teacherId"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
    };

    // Correlated subquery for the count to avoid double-counting from joins.
    let sql = "SELECT
                 c.id,
                 c.name,
                 (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
               FROM classes c
               WHERE (?1 IS NULL OR c.teacher_id = ?1)
               ORDER BY c.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&teacher_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let teacher_id = req
        .params
        .get("teacherId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, teacher_id) VALUES(?, ?, ?)",
        (&class_id, &name, &teacher_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        _ => None,
    }
}
