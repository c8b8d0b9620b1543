use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::calc::Roster;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The roster the dashboard currently has open: one class, one semester,
/// statuses session-local. Replaced wholesale on every `roster.open`.
pub struct RosterSession {
    pub class_id: String,
    pub semester: String,
    pub students: Roster,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub roster: Option<RosterSession>,
}
