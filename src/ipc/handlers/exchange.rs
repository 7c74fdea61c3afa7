use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grades::{normalize_entry_date, GradeFilters};
use crate::ipc::helpers::{get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// Excel on Windows wants a BOM on the roster/course files; the original
// app wrote those with utf-8-sig and the grade export without.
const UTF8_BOM: &str = "\u{feff}";

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

/// Header-keyed view over one CSV record, DictReader style.
struct CsvRow<'a> {
    header: &'a HashMap<String, usize>,
    fields: Vec<String>,
}

impl CsvRow<'_> {
    fn get(&self, name: &str) -> String {
        self.header
            .get(name)
            .and_then(|i| self.fields.get(*i))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn get_opt(&self, name: &str) -> Option<String> {
        let v = self.get(name);
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }
}

fn parse_csv_text(text: &str) -> Option<(HashMap<String, usize>, Vec<(usize, Vec<String>)>)> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let mut lines = text.lines().enumerate();
    let (_, header_line) = lines.next()?;
    let header: HashMap<String, usize> = parse_csv_record(header_line)
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_string(), i))
        .collect();

    let mut records = Vec::new();
    for (line_no, raw_line) in lines {
        if raw_line.trim().is_empty() {
            continue;
        }
        // 1-based line number as a spreadsheet user would count it.
        records.push((line_no + 1, parse_csv_record(raw_line)));
    }
    Some((header, records))
}

fn backup_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn backups_dir(state: &AppState) -> Result<PathBuf, HandlerErr> {
    let workspace = state
        .workspace
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
    let dir = workspace.join("backups");
    std::fs::create_dir_all(&dir)
        .map_err(|e| HandlerErr::new("io_failed", format!("failed to create backups dir: {}", e)))?;
    Ok(dir)
}

fn write_csv_file(path: &Path, contents: &str) -> Result<(), HandlerErr> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("io_failed", format!("failed to create {}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, contents)
        .map_err(|e| HandlerErr::new("io_failed", format!("failed to write {}: {}", path.display(), e)))
}

fn read_csv_file(path: &str) -> Result<String, HandlerErr> {
    std::fs::read_to_string(path)
        .map_err(|e| HandlerErr::new("io_failed", format!("failed to read {}: {}", path, e)))
}

fn course_id_by_name(conn: &Connection, name: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT course_id FROM courses WHERE course_name = ?",
        [name],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db)
}

// --- exports -----------------------------------------------------------

fn export_courses_csv(conn: &Connection, path: &Path) -> Result<usize, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT course_name, note1, note2, note3 FROM courses ORDER BY course_name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut csv = format!("{}course_name,note1,note2,note3\n", UTF8_BOM);
    for (name, n1, n2, n3) in &rows {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            csv_quote(name),
            csv_quote(n1.as_deref().unwrap_or("")),
            csv_quote(n2.as_deref().unwrap_or("")),
            csv_quote(n3.as_deref().unwrap_or(""))
        ));
    }
    write_csv_file(path, &csv)?;
    Ok(rows.len())
}

fn export_students_csv(
    conn: &Connection,
    path: &Path,
    course_id: Option<&str>,
) -> Result<usize, HandlerErr> {
    let sql = "SELECT c.course_name, cs.student_number, cs.class_number,
                      cs.student_name, cs.note1, cs.note2, cs.note3
               FROM course_students cs
               JOIN courses c ON cs.course_id = c.course_id";
    let (sql, binds): (String, Vec<String>) = match course_id {
        Some(id) => (
            format!("{} WHERE cs.course_id = ? ORDER BY cs.student_number", sql),
            vec![id.to_string()],
        ),
        None => (
            format!("{} ORDER BY c.course_name, cs.student_number", sql),
            vec![],
        ),
    };

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let mut fields: Vec<String> = Vec::with_capacity(7);
            for i in 0..7 {
                fields.push(r.get::<_, Option<String>>(i)?.unwrap_or_default());
            }
            Ok(fields)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut csv = format!(
        "{}course_name,student_number,class_number,student_name,note1,note2,note3\n",
        UTF8_BOM
    );
    for fields in &rows {
        let quoted: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
        csv.push_str(&quoted.join(","));
        csv.push('\n');
    }
    write_csv_file(path, &csv)?;
    Ok(rows.len())
}

fn export_grades_csv(
    conn: &Connection,
    path: &Path,
    filters: &GradeFilters,
) -> Result<usize, HandlerErr> {
    let (where_sql, binds) = filters.where_sql(true);
    let sql = format!(
        "SELECT c.course_name, ge.entry_date, ge.student_number,
                cs.student_name, cs.class_number,
                ge.grade1, ge.grade2, ge.grade3, ge.grade4, ge.grade5, ge.grade6,
                ge.note1, ge.note2
         FROM grade_entries ge
         JOIN courses c ON c.course_id = ge.course_id
         LEFT JOIN course_students cs
           ON cs.course_id = ge.course_id AND cs.student_number = ge.student_number
         WHERE 1=1{}{}",
        where_sql,
        filters.order_sql()
    );

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let int_cell = |v: Option<i64>| v.map(|x| x.to_string()).unwrap_or_default();
            let real_cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
            Ok(vec![
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                r.get::<_, Option<String>>(4)?.unwrap_or_default(),
                int_cell(r.get(5)?),
                int_cell(r.get(6)?),
                int_cell(r.get(7)?),
                real_cell(r.get(8)?),
                real_cell(r.get(9)?),
                real_cell(r.get(10)?),
                r.get::<_, Option<String>>(11)?.unwrap_or_default(),
                r.get::<_, Option<String>>(12)?.unwrap_or_default(),
            ])
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut csv = String::from(
        "course_name,entry_date,student_number,student_name,class_number,\
         grade1,grade2,grade3,grade4,grade5,grade6,note1,note2\n",
    );
    for fields in &rows {
        let quoted: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
        csv.push_str(&quoted.join(","));
        csv.push('\n');
    }
    write_csv_file(path, &csv)?;
    Ok(rows.len())
}

// --- replacement imports -----------------------------------------------

fn handle_import_courses_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backup_dir = match backups_dir(state) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_required_str(&req.params, "path") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let text = match read_csv_file(&path) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let Some((header, records)) = parse_csv_text(&text) else {
        return err(&req.id, "bad_csv", "CSV file is empty", None);
    };

    let mut errors: Vec<String> = Vec::new();
    let mut parsed: Vec<(String, Option<String>, Option<String>, Option<String>)> = Vec::new();
    for (line_no, fields) in records {
        let row = CsvRow {
            header: &header,
            fields,
        };
        let course_name = row.get("course_name");
        if course_name.is_empty() {
            errors.push(format!("行 {}: 講座名が空です", line_no));
            continue;
        }
        parsed.push((
            course_name,
            row.get_opt("note1"),
            row.get_opt("note2"),
            row.get_opt("note3"),
        ));
    }

    if parsed.is_empty() {
        return ok(
            &req.id,
            json!({ "deleted": 0, "created": 0, "errors": errors, "backupPath": null }),
        );
    }

    let backup_path = backup_dir.join(format!("before_import_courses_{}.csv", backup_timestamp()));
    if let Err(e) = export_courses_csv(conn, &backup_path) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Replacing the course list means replacing everything keyed off it,
    // matching the cascade the original schema relied on.
    for table in ["grade_entries", "scan_assets", "course_students"] {
        if let Err(e) = tx.execute(&format!("DELETE FROM {}", table), []) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    let deleted = match tx.execute("DELETE FROM courses", []) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };

    let mut created = 0usize;
    for (name, n1, n2, n3) in &parsed {
        let id = Uuid::new_v4().to_string();
        match tx.execute(
            "INSERT INTO courses(course_id, course_name, note1, note2, note3) VALUES(?, ?, ?, ?, ?)",
            (&id, name, n1, n2, n3),
        ) {
            Ok(_) => created += 1,
            Err(e) => errors.push(format!("挿入エラー: 講座名={}: {}", name, e)),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "deleted": deleted,
            "created": created,
            "errors": errors,
            "backupPath": backup_path.to_string_lossy()
        }),
    )
}

fn handle_import_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backup_dir = match backups_dir(state) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_required_str(&req.params, "path") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let scope_course_id = get_opt_str(&req.params, "courseId");

    let text = match read_csv_file(&path) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let Some((header, records)) = parse_csv_text(&text) else {
        return err(&req.id, "bad_csv", "CSV file is empty", None);
    };

    struct StudentRow {
        course_id: String,
        student_number: String,
        class_number: Option<String>,
        student_name: String,
        note1: Option<String>,
        note2: Option<String>,
        note3: Option<String>,
    }

    let mut errors: Vec<String> = Vec::new();
    let mut parsed: Vec<StudentRow> = Vec::new();
    for (line_no, fields) in records {
        let row = CsvRow {
            header: &header,
            fields,
        };
        let course_name = row.get("course_name");
        let student_number = row.get("student_number");
        let student_name = row.get("student_name");
        if course_name.is_empty() || student_number.is_empty() || student_name.is_empty() {
            errors.push(format!("行 {}: 必須項目が空です", line_no));
            continue;
        }
        let course_id = match course_id_by_name(conn, &course_name) {
            Ok(Some(id)) => id,
            Ok(None) => {
                errors.push(format!("行 {}: 講座が見つかりません: {}", line_no, course_name));
                continue;
            }
            Err(e) => return e.response(&req.id),
        };
        // Scoped import only replaces one course's roster; rows for other
        // courses are silently passed over, as the original did.
        if let Some(ref scope) = scope_course_id {
            if &course_id != scope {
                continue;
            }
        }
        parsed.push(StudentRow {
            course_id,
            student_number,
            class_number: row.get_opt("class_number"),
            student_name,
            note1: row.get_opt("note1"),
            note2: row.get_opt("note2"),
            note3: row.get_opt("note3"),
        });
    }

    if parsed.is_empty() {
        return ok(
            &req.id,
            json!({ "deleted": 0, "created": 0, "errors": errors, "backupPath": null }),
        );
    }

    let scope_label = scope_course_id.as_deref().unwrap_or("all");
    let backup_path = backup_dir.join(format!(
        "before_import_students_{}_{}.csv",
        scope_label,
        backup_timestamp()
    ));
    if let Err(e) = export_students_csv(conn, &backup_path, scope_course_id.as_deref()) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let deleted = match &scope_course_id {
        Some(id) => tx.execute("DELETE FROM course_students WHERE course_id = ?", [id]),
        None => tx.execute("DELETE FROM course_students", []),
    };
    let deleted = match deleted {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };

    let mut created = 0usize;
    for s in &parsed {
        let id = Uuid::new_v4().to_string();
        match tx.execute(
            "INSERT INTO course_students
             (id, course_id, student_number, class_number, student_name, note1, note2, note3)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &s.course_id,
                &s.student_number,
                &s.class_number,
                &s.student_name,
                &s.note1,
                &s.note2,
                &s.note3,
            ),
        ) {
            Ok(_) => created += 1,
            Err(e) => errors.push(format!(
                "挿入エラー: 講座ID={}, 生徒番号={}: {}",
                s.course_id, s.student_number, e
            )),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "deleted": deleted,
            "created": created,
            "errors": errors,
            "backupPath": backup_path.to_string_lossy()
        }),
    )
}

fn handle_import_grades_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backup_dir = match backups_dir(state) {
        Ok(d) => d,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match get_required_str(&req.params, "path") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let filters = match GradeFilters::from_params(&req.params) {
        Ok(f) => f,
        Err(e) => return e.response(&req.id),
    };

    let text = match read_csv_file(&path) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let Some((header, records)) = parse_csv_text(&text) else {
        return err(&req.id, "bad_csv", "CSV file is empty", None);
    };

    struct GradeRow {
        course_id: String,
        entry_date: String,
        student_number: String,
        grade1: Option<i64>,
        grade2: Option<i64>,
        grade3: Option<i64>,
        grade4: Option<f64>,
        grade5: Option<f64>,
        grade6: Option<f64>,
        note1: Option<String>,
        note2: Option<String>,
    }

    fn parse_int(row: &CsvRow, name: &str) -> Result<Option<i64>, String> {
        match row.get_opt(name) {
            None => Ok(None),
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|_| format!("数値変換エラー: {}={}", name, v)),
        }
    }
    fn parse_real(row: &CsvRow, name: &str) -> Result<Option<f64>, String> {
        match row.get_opt(name) {
            None => Ok(None),
            Some(v) => v
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("数値変換エラー: {}={}", name, v)),
        }
    }

    let mut errors: Vec<String> = Vec::new();
    let mut parsed: Vec<GradeRow> = Vec::new();
    for (line_no, fields) in records {
        let row = CsvRow {
            header: &header,
            fields,
        };
        let course_name = row.get("course_name");
        let entry_date_raw = row.get("entry_date");
        let student_number = row.get("student_number");
        if course_name.is_empty() || entry_date_raw.is_empty() || student_number.is_empty() {
            errors.push(format!("行 {}: 必須項目が空です", line_no));
            continue;
        }
        let Some(entry_date) = normalize_entry_date(&entry_date_raw) else {
            errors.push(format!(
                "行 {}: 日付フォーマットが不正です: {}",
                line_no, entry_date_raw
            ));
            continue;
        };
        let course_id = match course_id_by_name(conn, &course_name) {
            Ok(Some(id)) => id,
            Ok(None) => {
                errors.push(format!("行 {}: 講座が見つかりません: {}", line_no, course_name));
                continue;
            }
            Err(e) => return e.response(&req.id),
        };

        let numeric = (|| -> Result<_, String> {
            Ok((
                parse_int(&row, "grade1")?,
                parse_int(&row, "grade2")?,
                parse_int(&row, "grade3")?,
                parse_real(&row, "grade4")?,
                parse_real(&row, "grade5")?,
                parse_real(&row, "grade6")?,
            ))
        })();
        let (grade1, grade2, grade3, grade4, grade5, grade6) = match numeric {
            Ok(v) => v,
            Err(msg) => {
                errors.push(format!("行 {}: {}", line_no, msg));
                continue;
            }
        };

        parsed.push(GradeRow {
            course_id,
            entry_date,
            student_number,
            grade1,
            grade2,
            grade3,
            grade4,
            grade5,
            grade6,
            note1: row.get_opt("note1"),
            note2: row.get_opt("note2"),
        });
    }

    if parsed.is_empty() {
        return ok(
            &req.id,
            json!({ "deleted": 0, "created": 0, "errors": errors, "backupPath": null }),
        );
    }

    let backup_path = backup_dir.join(format!("before_import_grades_{}.csv", backup_timestamp()));
    if let Err(e) = export_grades_csv(conn, &backup_path, &filters) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let (where_sql, binds) = GradeFilters {
        student_number: None,
        class_number: None,
        ..filters
    }
    .where_sql(false);
    let delete_sql = format!("DELETE FROM grade_entries AS ge WHERE 1=1{}", where_sql);
    let deleted = match tx.execute(&delete_sql, params_from_iter(binds)) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };

    let mut created = 0usize;
    for g in &parsed {
        let id = Uuid::new_v4().to_string();
        match tx.execute(
            "INSERT INTO grade_entries
             (id, course_id, entry_date, student_number,
              grade1, grade2, grade3, grade4, grade5, grade6, note1, note2)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                id,
                g.course_id,
                g.entry_date,
                g.student_number,
                g.grade1,
                g.grade2,
                g.grade3,
                g.grade4,
                g.grade5,
                g.grade6,
                g.note1,
                g.note2
            ],
        ) {
            Ok(_) => created += 1,
            Err(e) => errors.push(format!(
                "挿入エラー: 講座ID={}, 日付={}, 生徒={}: {}",
                g.course_id, g.entry_date, g.student_number, e
            )),
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "deleted": deleted,
            "created": created,
            "errors": errors,
            "backupPath": backup_path.to_string_lossy()
        }),
    )
}

// --- export handlers ---------------------------------------------------

fn handle_export_courses_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    match export_courses_csv(conn, &out) {
        Ok(n) => ok(
            &req.id,
            json!({ "exported": n, "outPath": out.to_string_lossy() }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_export_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let course_id = get_opt_str(&req.params, "courseId");
    match export_students_csv(conn, &out, course_id.as_deref()) {
        Ok(n) => ok(
            &req.id,
            json!({ "exported": n, "outPath": out.to_string_lossy() }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_export_grades_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let filters = match GradeFilters::from_params(&req.params) {
        Ok(f) => f,
        Err(e) => return e.response(&req.id),
    };
    match export_grades_csv(conn, &out, &filters) {
        Ok(n) => ok(
            &req.id,
            json!({ "exported": n, "outPath": out.to_string_lossy() }),
        ),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportCoursesCsv" => Some(handle_export_courses_csv(state, req)),
        "exchange.importCoursesCsv" => Some(handle_import_courses_csv(state, req)),
        "exchange.exportStudentsCsv" => Some(handle_export_students_csv(state, req)),
        "exchange.importStudentsCsv" => Some(handle_import_students_csv(state, req)),
        "exchange.exportGradesCsv" => Some(handle_export_grades_csv(state, req)),
        "exchange.importGradesCsv" => Some(handle_import_grades_csv(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{csv_quote, parse_csv_record, parse_csv_text};

    #[test]
    fn quote_roundtrip_with_commas_and_quotes() {
        let raw = "数学,\"応用\"";
        let quoted = csv_quote(raw);
        let parsed = parse_csv_record(&format!("{},b", quoted));
        assert_eq!(parsed, vec![raw.to_string(), "b".to_string()]);
    }

    #[test]
    fn header_map_strips_bom() {
        let text = "\u{feff}course_name,note1\n数学,x\n";
        let (header, records) = parse_csv_text(text).expect("parse");
        assert_eq!(header.get("course_name"), Some(&0));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, 2);
        assert_eq!(records[0].1[0], "数学");
    }
}
