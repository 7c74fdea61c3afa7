use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_exists, get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.course_id,
           c.course_name,
           c.note1, c.note2, c.note3,
           (SELECT COUNT(*) FROM course_students cs WHERE cs.course_id = c.course_id) AS student_count,
           (SELECT COUNT(*) FROM grade_entries ge WHERE ge.course_id = c.course_id) AS grade_count
         FROM courses c
         ORDER BY c.course_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let course_id: String = row.get(0)?;
            let course_name: String = row.get(1)?;
            let note1: Option<String> = row.get(2)?;
            let note2: Option<String> = row.get(3)?;
            let note3: Option<String> = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            let grade_count: i64 = row.get(6)?;
            Ok(json!({
                "courseId": course_id,
                "courseName": course_name,
                "note1": note1,
                "note2": note2,
                "note3": note3,
                "studentCount": student_count,
                "gradeCount": grade_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("courseName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing courseName", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "courseName must not be empty", None);
    }

    let course_id = Uuid::new_v4().to_string();
    let note1 = get_opt_str(&req.params, "note1");
    let note2 = get_opt_str(&req.params, "note2");
    let note3 = get_opt_str(&req.params, "note3");
    if let Err(e) = conn.execute(
        "INSERT INTO courses(course_id, course_name, note1, note2, note3) VALUES(?, ?, ?, ?, ?)",
        (&course_id, &name, &note1, &note2, &note3),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "courseName": name }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match req.params.get("courseName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing courseName", None),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    let note1 = get_opt_str(&req.params, "note1");
    let note2 = get_opt_str(&req.params, "note2");
    let note3 = get_opt_str(&req.params, "note3");
    if let Err(e) = conn.execute(
        "UPDATE courses
         SET course_name = ?, note1 = ?, note2 = ?, note3 = ?,
             updated_at = CURRENT_TIMESTAMP
         WHERE course_id = ?",
        (&name, &note1, &note2, &note3, &course_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "courseId": course_id, "courseName": name }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM courses WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if exists.is_none() {
        return err(&req.id, "not_found", "course not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM grade_entries WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grade_entries" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM scan_assets WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "scan_assets" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM course_students WHERE course_id = ?",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "course_students" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM courses WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
