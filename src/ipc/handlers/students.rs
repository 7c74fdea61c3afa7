use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_exists, get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn list_students_for_course(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<crate::split::StudentRef>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT student_number, student_name, class_number, note1, note2, note3
             FROM course_students
             WHERE course_id = ?
             ORDER BY student_number",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([course_id], |r| {
        Ok(crate::split::StudentRef {
            student_number: r.get(0)?,
            student_name: r.get(1)?,
            class_number: r.get(2)?,
            note1: r.get(3)?,
            note2: r.get(4)?,
            note3: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, student_number, class_number, student_name, note1, note2, note3
         FROM course_students
         WHERE course_id = ?
         ORDER BY student_number",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "studentNumber": r.get::<_, String>(1)?,
                "classNumber": r.get::<_, Option<String>>(2)?,
                "studentName": r.get::<_, String>(3)?,
                "note1": r.get::<_, Option<String>>(4)?,
                "note2": r.get::<_, Option<String>>(5)?,
                "note3": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let student_number = match get_required_str(&req.params, "studentNumber") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        Ok(_) => return err(&req.id, "bad_params", "studentNumber must not be empty", None),
        Err(e) => return e.response(&req.id),
    };
    let student_name = match get_required_str(&req.params, "studentName") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        Ok(_) => return err(&req.id, "bad_params", "studentName must not be empty", None),
        Err(e) => return e.response(&req.id),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    let student_id = Uuid::new_v4().to_string();
    let class_number = get_opt_str(&req.params, "classNumber");
    let note1 = get_opt_str(&req.params, "note1");
    let note2 = get_opt_str(&req.params, "note2");
    let note3 = get_opt_str(&req.params, "note3");

    if let Err(e) = conn.execute(
        "INSERT INTO course_students
         (id, course_id, student_number, class_number, student_name, note1, note2, note3)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &course_id,
            &student_number,
            &class_number,
            &student_name,
            &note1,
            &note2,
            &note3,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "course_students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "studentNumber": student_number }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM course_students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let student_number = match get_required_str(&req.params, "studentNumber") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    let student_name = match get_required_str(&req.params, "studentName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    let class_number = get_opt_str(&req.params, "classNumber");
    let note1 = get_opt_str(&req.params, "note1");
    let note2 = get_opt_str(&req.params, "note2");
    let note3 = get_opt_str(&req.params, "note3");

    if let Err(e) = conn.execute(
        "UPDATE course_students
         SET student_number = ?, class_number = ?, student_name = ?,
             note1 = ?, note2 = ?, note3 = ?,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?",
        (
            &student_number,
            &class_number,
            &student_name,
            &note1,
            &note2,
            &note3,
            &student_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match conn.execute("DELETE FROM course_students WHERE id = ?", [&student_id]) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
