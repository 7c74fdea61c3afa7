use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradedesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            course_id TEXT PRIMARY KEY,
            course_name TEXT NOT NULL UNIQUE,
            note1 TEXT,
            note2 TEXT,
            note3 TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_students(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            student_number TEXT NOT NULL,
            class_number TEXT,
            student_name TEXT NOT NULL,
            note1 TEXT,
            note2 TEXT,
            note3 TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(course_id, student_number),
            FOREIGN KEY(course_id) REFERENCES courses(course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_students_course ON course_students(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            entry_date TEXT NOT NULL,
            student_number TEXT NOT NULL,
            grade1 INTEGER,
            grade2 INTEGER,
            grade3 INTEGER,
            grade4 REAL,
            grade5 REAL,
            grade6 REAL,
            note1 TEXT,
            note2 TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(course_id, entry_date, student_number),
            FOREIGN KEY(course_id) REFERENCES courses(course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_course ON grade_entries(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_course_date ON grade_entries(course_id, entry_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_student ON grade_entries(student_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scan_assets(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            entry_date TEXT,
            file_name TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            byte_len INTEGER NOT NULL,
            imported_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY(course_id) REFERENCES courses(course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scan_assets_course ON scan_assets(course_id)",
        [],
    )?;

    // Early workspaces predate the third roster note column and the second
    // grade note column. Add them where missing.
    ensure_course_students_note3(&conn)?;
    ensure_grade_entries_note2(&conn)?;

    Ok(conn)
}

fn ensure_course_students_note3(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "course_students", "note3")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE course_students ADD COLUMN note3 TEXT", [])?;
    Ok(())
}

fn ensure_grade_entries_note2(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grade_entries", "note2")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grade_entries ADD COLUMN note2 TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
