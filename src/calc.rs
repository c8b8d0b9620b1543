use serde::Serialize;
use std::collections::BTreeMap;

/// Weights of the three final-grade components. They must sum to 1.
pub const PERIODIC_WEIGHT: f64 = 0.65;
pub const EXAM_WEIGHT: f64 = 0.30;
pub const ATTENDANCE_WEIGHT: f64 = 0.05;

/// Attendance component: start from the base and subtract a fixed penalty
/// per recorded absence, by category. Floored at zero.
pub const ATTENDANCE_BASE: f64 = 100.0;
pub const ABSENT_PENALTY: f64 = 5.0;
pub const EXCUSED_PENALTY: f64 = 2.0;
pub const SICK_PENALTY: f64 = 1.0;

/// Grade slots persisted per student per semester.
pub const PERIODIC_SLOTS: [&str; 4] = ["periodic1", "periodic2", "periodic3", "periodic4"];
pub const EXAM_SLOT: &str = "exam";

pub const SEMESTERS: [&str; 2] = ["sem1", "sem2"];

/// Shown wherever a final score cannot be computed.
pub const FINAL_SCORE_PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttendanceStatus {
    #[default]
    Present,
    Sick,
    Excused,
    Absent,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "sick" => Some(AttendanceStatus::Sick),
            "excused" => Some(AttendanceStatus::Excused),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Absent => "absent",
        }
    }
}

/// One student's record inside an open roster. `status` is session-local and
/// resets to Present on every roster load; the cumulative counters mirror the
/// persisted columns and only change after a confirmed write.
#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub student_no: Option<String>,
    pub sort_order: i64,
    pub grades: BTreeMap<String, f64>,
    pub status: AttendanceStatus,
    pub total_sick: i64,
    pub total_excused: i64,
    pub total_absent: i64,
}

/// Roster for one class, keyed by student id. Rebuilt wholesale on every
/// class selection, never merged.
pub type Roster = BTreeMap<String, Student>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradeInputs {
    pub periodic: [f64; 4],
    pub exam: f64,
}

impl GradeInputs {
    pub fn from_slots(grades: &BTreeMap<String, f64>) -> Self {
        let mut periodic = [0.0; 4];
        for (i, slot) in PERIODIC_SLOTS.iter().enumerate() {
            periodic[i] = grades.get(*slot).copied().unwrap_or(0.0);
        }
        GradeInputs {
            periodic,
            exam: grades.get(EXAM_SLOT).copied().unwrap_or(0.0),
        }
    }
}

/// Half-up rounding to one decimal place.
pub fn round_to_tenth(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Best-effort numeric coercion for grade fields: missing, non-numeric, or
/// unparseable input degrades to 0 instead of signaling an error.
pub fn coerce_score(v: &serde_json::Value) -> f64 {
    match v {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(0.0),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Mean of the periodic scores that were actually taken. A value <= 0 means
/// "not taken" and is excluded; if nothing remains the average is 0.
pub fn periodic_average(periodic: &[f64; 4]) -> f64 {
    let taken: Vec<f64> = periodic.iter().copied().filter(|v| *v > 0.0).collect();
    if taken.is_empty() {
        return 0.0;
    }
    taken.iter().sum::<f64>() / taken.len() as f64
}

pub fn attendance_score(sick: i64, excused: i64, absent: i64) -> f64 {
    let score = ATTENDANCE_BASE
        - ABSENT_PENALTY * absent as f64
        - EXCUSED_PENALTY * excused as f64
        - SICK_PENALTY * sick as f64;
    score.max(0.0)
}

/// Weighted final grade. Returns None when the result is not computable
/// (<= 0), which the UI renders as a dash. Total over well-typed inputs.
pub fn compute_final_score(
    inputs: &GradeInputs,
    sick: i64,
    excused: i64,
    absent: i64,
) -> Option<f64> {
    let final_raw = PERIODIC_WEIGHT * periodic_average(&inputs.periodic)
        + EXAM_WEIGHT * inputs.exam
        + ATTENDANCE_WEIGHT * attendance_score(sick, excused, absent);
    if final_raw > 0.0 {
        Some(round_to_tenth(final_raw))
    } else {
        None
    }
}

pub fn format_final_score(score: Option<f64>) -> String {
    match score {
        Some(v) => format!("{:.1}", v),
        None => FINAL_SCORE_PLACEHOLDER.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceTally {
    pub present: usize,
    pub sick: usize,
    pub excused: usize,
    pub absent: usize,
}

/// Counts per status category, recomputed from scratch. Rosters are class
/// sized, so recomputation beats keeping incremental counters honest.
pub fn tally_attendance(roster: &Roster) -> AttendanceTally {
    let mut tally = AttendanceTally::default();
    for student in roster.values() {
        match student.status {
            AttendanceStatus::Present => tally.present += 1,
            AttendanceStatus::Sick => tally.sick += 1,
            AttendanceStatus::Excused => tally.excused += 1,
            AttendanceStatus::Absent => tally.absent += 1,
        }
    }
    tally
}

/// Overwrites the student's session-local status. Returns false when the
/// student is not in the roster.
pub fn set_attendance_status(
    roster: &mut Roster,
    student_id: &str,
    status: AttendanceStatus,
) -> bool {
    match roster.get_mut(student_id) {
        Some(student) => {
            student.status = status;
            true
        }
        None => false,
    }
}

pub fn reset_attendance_statuses(roster: &mut Roster) {
    for student in roster.values_mut() {
        student.status = AttendanceStatus::Present;
    }
}
