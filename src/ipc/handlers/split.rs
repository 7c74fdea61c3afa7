use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grades::normalize_entry_date;
use crate::ipc::handlers::students::list_students_for_course;
use crate::ipc::helpers::{get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request, SplitSession};
use crate::pdf::{self, PdfSource};
use crate::split::{
    self, GradeRef, PageAssignment, SplitSettings,
};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;

fn load_grade_snapshot(
    conn: &Connection,
    course_id: &str,
    entry_date: &str,
) -> Result<HashMap<String, GradeRef>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_number, grade1, grade2, grade3, grade4, grade5, grade6, note1, note2
             FROM grade_entries
             WHERE course_id = ? AND entry_date = ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([course_id, entry_date], |r| {
            Ok((
                r.get::<_, String>(0)?,
                GradeRef {
                    grade1: r.get(1)?,
                    grade2: r.get(2)?,
                    grade3: r.get(3)?,
                    grade4: r.get(4)?,
                    grade5: r.get(5)?,
                    grade6: r.get(6)?,
                    note1: r.get(7)?,
                    note2: r.get(8)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(rows.into_iter().collect())
}

fn assignment_json(a: &PageAssignment) -> serde_json::Value {
    json!({
        "studentNumber": a.student.student_number,
        "studentName": a.student.student_name,
        "classNumber": a.student.class_number,
        "startPage": a.start_page,
        "endPage": a.end_page,
        "pageCount": a.page_count,
        "isAbsent": a.is_absent,
        "order": a.order,
        "pageRange": a.page_range_label(),
    })
}

fn session_state_json(session: &SplitSession) -> serde_json::Value {
    let assignments: Vec<serde_json::Value> =
        session.assignments.iter().map(assignment_json).collect();
    let absent = session
        .assignments
        .iter()
        .filter(|a| a.is_absent)
        .count();
    let used_pages: u64 = session
        .assignments
        .iter()
        .filter(|a| !a.is_absent)
        .map(|a| u64::from(a.page_count))
        .sum();
    json!({
        "courseId": session.course_id,
        "courseName": session.course_name,
        "sourcePath": session.source_path.to_string_lossy(),
        "settings": session.settings,
        "assignments": assignments,
        "summary": {
            "total": session.assignments.len(),
            "absent": absent,
            "usedPages": used_pages,
            "totalPages": session.total_pages,
        }
    })
}

fn handle_split_begin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let source_path = match get_required_str(&req.params, "sourcePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let settings: SplitSettings = match req.params.get("settings") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("invalid settings: {}", e),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing params.settings", None),
    };
    if settings.pages_per_student == 0 {
        return err(
            &req.id,
            "bad_params",
            "pagesPerStudent must be at least 1",
            None,
        );
    }

    let course_name: String = match conn.query_row(
        "SELECT course_name FROM courses WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return err(&req.id, "not_found", "course not found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let students = match list_students_for_course(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if students.is_empty() {
        return err(
            &req.id,
            "empty_roster",
            "course has no students to assign pages to",
            None,
        );
    }

    // Grade values only appear in filenames when the caller pins a date.
    let grades = match get_opt_str(&req.params, "entryDate") {
        Some(raw) => {
            let Some(entry_date) = normalize_entry_date(&raw) else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("invalid entryDate: {}", raw),
                    None,
                );
            };
            match load_grade_snapshot(conn, &course_id, &entry_date) {
                Ok(g) => g,
                Err(e) => return e.response(&req.id),
            }
        }
        None => HashMap::new(),
    };

    let total_pages = match PdfSource::open(&source_path) {
        Ok(source) => source.page_count(),
        Err(e) => return err(&req.id, "pdf_open_failed", format!("{e:#}"), None),
    };

    let assignments = split::initialize_assignments(&students, settings.pages_per_student);
    let session = SplitSession {
        course_id,
        course_name,
        source_path,
        total_pages,
        settings,
        students,
        grades,
        assignments,
    };
    let payload = session_state_json(&session);
    state.split = Some(session);

    ok(&req.id, payload)
}

fn with_session<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a mut SplitSession, serde_json::Value> {
    state
        .split
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_split_session", "begin a split session first", None))
}

fn handle_split_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    match with_session(state, req) {
        Ok(session) => ok(&req.id, session_state_json(session)),
        Err(resp) => resp,
    }
}

fn handle_split_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let order: Vec<String> = match req.params.get("order") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(o) => o,
            Err(e) => {
                return err(&req.id, "bad_params", format!("invalid order: {}", e), None)
            }
        },
        None => return err(&req.id, "bad_params", "missing params.order", None),
    };
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if let Err(msg) = split::reorder_assignments(&mut session.assignments, &order) {
        return err(&req.id, "bad_params", msg, None);
    }
    split::recompute_sequential(&mut session.assignments);
    ok(&req.id, session_state_json(session))
}

fn handle_split_set_absent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_number = match get_required_str(&req.params, "studentNumber") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let absent = req
        .params
        .get("absent")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if !split::set_absent(&mut session.assignments, &student_number, absent) {
        return err(&req.id, "not_found", "student not in this session", None);
    }
    split::recompute_sequential(&mut session.assignments);
    ok(&req.id, session_state_json(session))
}

fn handle_split_set_page_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_number = match get_required_str(&req.params, "studentNumber") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let count = match req.params.get("pageCount").and_then(|v| v.as_u64()) {
        Some(v) if v >= 1 => v as u32,
        _ => return err(&req.id, "bad_params", "pageCount must be at least 1", None),
    };
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if !split::set_page_count(&mut session.assignments, &student_number, count) {
        return err(&req.id, "not_found", "student not in this session", None);
    }
    split::recompute_sequential(&mut session.assignments);
    ok(&req.id, session_state_json(session))
}

// Unlike the other mutators this one does NOT repack: a manual range is an
// explicit placement and repacking would immediately undo it.
fn handle_split_set_page_range(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_number = match get_required_str(&req.params, "studentNumber") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let start = match req.params.get("startPage").and_then(|v| v.as_u64()) {
        Some(v) if v >= 1 => v as u32,
        _ => return err(&req.id, "bad_params", "startPage must be at least 1", None),
    };
    let end = match req.params.get("endPage").and_then(|v| v.as_u64()) {
        Some(v) if v >= 1 => v as u32,
        _ => return err(&req.id, "bad_params", "endPage must be at least 1", None),
    };
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if !split::set_page_range(&mut session.assignments, &student_number, start, end) {
        return err(&req.id, "not_found", "student not in this session", None);
    }
    ok(&req.id, session_state_json(session))
}

fn handle_split_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    split::recompute_sequential(&mut session.assignments);
    ok(&req.id, session_state_json(session))
}

/// Back to the state `split.begin` produced: roster order, uniform page
/// counts, nobody absent.
fn handle_split_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    session.assignments =
        split::initialize_assignments(&session.students, session.settings.pages_per_student);
    ok(&req.id, session_state_json(session))
}

fn handle_split_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match split::validate_assignments(&session.assignments, session.total_pages) {
        Ok(()) => ok(&req.id, json!({ "valid": true, "message": null })),
        Err(msg) => ok(&req.id, json!({ "valid": false, "message": msg })),
    }
}

fn handle_split_execute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let output_dir = match get_required_str(&req.params, "outputDir") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let session = match with_session(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    // Never touch the filesystem with an assignment list that cannot work.
    if let Err(msg) = split::validate_assignments(&session.assignments, session.total_pages) {
        return err(&req.id, "validation_failed", msg, None);
    }

    match pdf::split_document(
        &session.source_path,
        &session.assignments,
        &session.grades,
        &session.course_name,
        &session.settings,
        &output_dir,
    ) {
        Ok(outcome) => ok(&req.id, json!({ "outcome": outcome })),
        Err(e) => err(&req.id, "pdf_split_failed", format!("{e:#}"), None),
    }
}

fn handle_split_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.split = None;
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "split.begin" => Some(handle_split_begin(state, req)),
        "split.state" => Some(handle_split_state(state, req)),
        "split.reorder" => Some(handle_split_reorder(state, req)),
        "split.setAbsent" => Some(handle_split_set_absent(state, req)),
        "split.setPageCount" => Some(handle_split_set_page_count(state, req)),
        "split.setPageRange" => Some(handle_split_set_page_range(state, req)),
        "split.recompute" => Some(handle_split_recompute(state, req)),
        "split.reset" => Some(handle_split_reset(state, req)),
        "split.validate" => Some(handle_split_validate(state, req)),
        "split.execute" => Some(handle_split_execute(state, req)),
        "split.cancel" => Some(handle_split_cancel(state, req)),
        _ => None,
    }
}
