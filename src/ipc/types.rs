use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::split::{GradeRef, PageAssignment, SplitSettings, StudentRef};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// One in-flight split workflow. Owns the assignment list exclusively; the
/// roster and grade snapshots are read-only copies taken at `split.begin` and
/// discarded with the session.
pub struct SplitSession {
    pub course_id: String,
    pub course_name: String,
    pub source_path: PathBuf,
    pub total_pages: u32,
    pub settings: SplitSettings,
    pub students: Vec<StudentRef>,
    pub grades: HashMap<String, GradeRef>,
    pub assignments: Vec<PageAssignment>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub split: Option<SplitSession>,
}
