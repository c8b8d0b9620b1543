use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

// The identity provider lives in the frontend; it hands us an email address.
// These handlers map that onto a teacher profile and keep the signed-in
// profile cached under a fixed settings key until sign-out.

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if email.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "email and name must not be empty", None);
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, email, name) VALUES(?, ?, ?)",
        (&teacher_id, &email, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "email": email, "name": name }),
    )
}

fn handle_session_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT id, email, name FROM teachers WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some((teacher_id, email, name)) = row else {
        return err(
            &req.id,
            "not_found",
            "no teacher profile for email",
            Some(json!({ "email": email })),
        );
    };

    let profile = json!({ "teacherId": teacher_id, "email": email, "name": name });
    if let Err(e) = db::settings_set_json(conn, db::SESSION_PROFILE_KEY, &profile) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "profile": profile }))
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match db::settings_get_json(conn, db::SESSION_PROFILE_KEY) {
        Ok(profile) => ok(
            &req.id,
            json!({ "profile": profile.unwrap_or(serde_json::Value::Null) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_session_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Err(e) = db::settings_delete(conn, db::SESSION_PROFILE_KEY) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    // Sign-out clears all session-local state, the open roster included.
    state.roster = None;
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "session.signIn" => Some(handle_session_sign_in(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        "session.signOut" => Some(handle_session_sign_out(state, req)),
        _ => None,
    }
}
