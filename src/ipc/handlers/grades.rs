use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradeFilters {
    pub course_ids: Vec<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub student_number: Option<String>,
    pub class_number: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl GradeFilters {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        match params.get("filters") {
            None => Ok(GradeFilters::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| HandlerErr::new("bad_params", format!("invalid filters: {}", e))),
        }
    }

    /// WHERE-clause fragment over `grade_entries ge` (and optionally the
    /// roster join alias `cs`). Appended after `WHERE 1=1`.
    pub fn where_sql(&self, with_roster_join: bool) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut binds: Vec<Value> = Vec::new();

        if !self.course_ids.is_empty() {
            let placeholders = vec!["?"; self.course_ids.len()].join(",");
            sql.push_str(&format!(" AND ge.course_id IN ({})", placeholders));
            binds.extend(self.course_ids.iter().cloned().map(Value::from));
        }
        if let Some(ref d) = self.start_date {
            sql.push_str(" AND ge.entry_date >= ?");
            binds.push(Value::from(d.clone()));
        }
        if let Some(ref d) = self.end_date {
            sql.push_str(" AND ge.entry_date <= ?");
            binds.push(Value::from(d.clone()));
        }
        if let Some(ref n) = self.student_number {
            sql.push_str(" AND ge.student_number LIKE ?");
            binds.push(Value::from(format!("%{}%", n)));
        }
        if with_roster_join {
            if let Some(ref c) = self.class_number {
                sql.push_str(" AND cs.class_number = ?");
                binds.push(Value::from(c.clone()));
            }
        }

        (sql, binds)
    }

    /// Sort column is whitelisted; anything else falls back to entry date.
    pub fn order_sql(&self) -> String {
        let col = match self.sort_by.as_deref() {
            Some("student_number") => "ge.student_number",
            Some("course_name") => "c.course_name",
            Some("class_number") => "cs.class_number",
            Some("created_at") => "ge.created_at",
            Some("updated_at") => "ge.updated_at",
            _ => "ge.entry_date",
        };
        let dir = match self.sort_order.as_deref() {
            Some("DESC") | Some("desc") => "DESC",
            _ => "ASC",
        };
        format!(" ORDER BY {} {}, ge.student_number ASC", col, dir)
    }
}

/// Accepts `YYYY-MM-DD` and `YYYY/MM/DD`, with or without zero padding, and
/// renders the canonical `YYYY-MM-DD` the store keys on.
pub fn normalize_entry_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    None
}

const GRADE_LIST_SQL: &str = "SELECT ge.id, ge.course_id, c.course_name, ge.entry_date,
        ge.student_number, cs.student_name, cs.class_number,
        ge.grade1, ge.grade2, ge.grade3, ge.grade4, ge.grade5, ge.grade6,
        ge.note1, ge.note2, ge.created_at, ge.updated_at
 FROM grade_entries ge
 JOIN courses c ON c.course_id = ge.course_id
 LEFT JOIN course_students cs
   ON cs.course_id = ge.course_id AND cs.student_number = ge.student_number
 WHERE 1=1";

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let filters = match GradeFilters::from_params(&req.params) {
        Ok(f) => f,
        Err(e) => return e.response(&req.id),
    };

    let (where_sql, binds) = filters.where_sql(true);
    let sql = format!("{}{}{}", GRADE_LIST_SQL, where_sql, filters.order_sql());

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "gradeId": r.get::<_, String>(0)?,
                "courseId": r.get::<_, String>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "entryDate": r.get::<_, String>(3)?,
                "studentNumber": r.get::<_, String>(4)?,
                "studentName": r.get::<_, Option<String>>(5)?,
                "classNumber": r.get::<_, Option<String>>(6)?,
                "grade1": r.get::<_, Option<i64>>(7)?,
                "grade2": r.get::<_, Option<i64>>(8)?,
                "grade3": r.get::<_, Option<i64>>(9)?,
                "grade4": r.get::<_, Option<f64>>(10)?,
                "grade5": r.get::<_, Option<f64>>(11)?,
                "grade6": r.get::<_, Option<f64>>(12)?,
                "note1": r.get::<_, Option<String>>(13)?,
                "note2": r.get::<_, Option<String>>(14)?,
                "createdAt": r.get::<_, Option<String>>(15)?,
                "updatedAt": r.get::<_, Option<String>>(16)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let entry_date_raw = match get_required_str(&req.params, "entryDate") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(entry_date) = normalize_entry_date(&entry_date_raw) else {
        return err(
            &req.id,
            "bad_params",
            format!("invalid entryDate: {}", entry_date_raw),
            None,
        );
    };
    let student_number = match get_required_str(&req.params, "studentNumber") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let p = &req.params;
    let grade1 = p.get("grade1").and_then(|v| v.as_i64());
    let grade2 = p.get("grade2").and_then(|v| v.as_i64());
    let grade3 = p.get("grade3").and_then(|v| v.as_i64());
    let grade4 = p.get("grade4").and_then(|v| v.as_f64());
    let grade5 = p.get("grade5").and_then(|v| v.as_f64());
    let grade6 = p.get("grade6").and_then(|v| v.as_f64());
    let note1 = p.get("note1").and_then(|v| v.as_str()).map(str::to_string);
    let note2 = p.get("note2").and_then(|v| v.as_str()).map(str::to_string);

    let new_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grade_entries
         (id, course_id, entry_date, student_number,
          grade1, grade2, grade3, grade4, grade5, grade6, note1, note2)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id, entry_date, student_number)
         DO UPDATE SET
             grade1 = excluded.grade1,
             grade2 = excluded.grade2,
             grade3 = excluded.grade3,
             grade4 = excluded.grade4,
             grade5 = excluded.grade5,
             grade6 = excluded.grade6,
             note1 = excluded.note1,
             note2 = excluded.note2,
             updated_at = CURRENT_TIMESTAMP",
        rusqlite::params![
            new_id,
            course_id,
            entry_date,
            student_number,
            grade1,
            grade2,
            grade3,
            grade4,
            grade5,
            grade6,
            note1,
            note2
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grade_entries" })),
        );
    }

    // The conflict path keeps the existing row id; read it back either way.
    let grade_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM grade_entries
             WHERE course_id = ? AND entry_date = ? AND student_number = ?",
            (&course_id, &entry_date, &student_number),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "gradeId": grade_id, "entryDate": entry_date }),
    )
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grade_id = match get_required_str(&req.params, "gradeId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM grade_entries WHERE id = ?", [&grade_id]) {
        Ok(0) => err(&req.id, "not_found", "grade entry not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_grades_delete_by_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let filters = match GradeFilters::from_params(&req.params) {
        Ok(f) => f,
        Err(e) => return e.response(&req.id),
    };

    // Deletion scopes by course and date range only; the roster-joined
    // filters are list-view conveniences.
    let (where_sql, binds) = GradeFilters {
        student_number: None,
        class_number: None,
        ..filters
    }
    .where_sql(false);
    let sql = format!("DELETE FROM grade_entries AS ge WHERE 1=1{}", where_sql);

    match conn.execute(&sql, params_from_iter(binds)) {
        Ok(n) => ok(&req.id, json!({ "deletedCount": n })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.deleteByFilter" => Some(handle_grades_delete_by_filter(state, req)),
        _ => None,
    }
}
