use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradedeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradedeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn expect_ok<'a>(value: &'a serde_json::Value, method: &str) -> &'a serde_json::Value {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").expect("result")
}

#[test]
fn students_import_replaces_course_roster_and_backs_up_first() {
    let workspace = temp_dir("gradedesk-exchange-students");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseName": "数学" }),
    );
    let course_id = expect_ok(&resp, "courses.create")
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    for (i, number) in ["001", "002"].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({
                "courseId": course_id,
                "studentNumber": number,
                "studentName": format!("旧生徒{}", number)
            }),
        );
        expect_ok(&resp, "students.create");
    }

    // Replacement roster with one new student plus one row pointing at a
    // course that does not exist.
    let csv_path = workspace.join("roster.csv");
    std::fs::write(
        &csv_path,
        "\u{feff}course_name,student_number,class_number,student_name,note1,note2,note3\n\
         数学,003,1,新生徒,,,\n\
         存在しない講座,004,1,迷子,,,\n",
    )
    .expect("write roster csv");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "exchange.importStudentsCsv",
        json!({ "path": csv_path.to_string_lossy(), "courseId": course_id }),
    );
    let result = expect_ok(&resp, "exchange.importStudentsCsv");
    assert_eq!(result.get("deleted").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(1));
    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("errors array");
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].as_str().unwrap_or("").contains("講座が見つかりません"),
        "{}",
        errors[0]
    );
    let backup_path = result
        .get("backupPath")
        .and_then(|v| v.as_str())
        .expect("backupPath");
    let backup = std::fs::read_to_string(backup_path).expect("read pre-import backup");
    assert!(backup.starts_with('\u{feff}'), "students backup carries a BOM");
    assert!(backup.contains("旧生徒001"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "courseId": course_id }),
    );
    let students = expect_ok(&resp, "students.list")
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students array")
        .clone();
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("studentNumber").and_then(|v| v.as_str()),
        Some("003")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grades_import_normalizes_slash_dates_and_rejects_bad_rows() {
    let workspace = temp_dir("gradedesk-exchange-grades");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseName": "数学" }),
    );
    let course_id = expect_ok(&resp, "courses.create")
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let csv_path = workspace.join("grades.csv");
    std::fs::write(
        &csv_path,
        "course_name,entry_date,student_number,grade1,grade4\n\
         数学,2024/4/5,001,4,3.5\n\
         数学,2024-13-40,002,1,\n\
         数学,2024-04-05,003,abc,\n",
    )
    .expect("write grades csv");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.importGradesCsv",
        json!({ "path": csv_path.to_string_lossy() }),
    );
    let result = expect_ok(&resp, "exchange.importGradesCsv");
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(1));
    let errors = result
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("errors array");
    assert_eq!(errors.len(), 2);
    let joined = errors
        .iter()
        .filter_map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(" / ");
    assert!(joined.contains("日付フォーマットが不正です"), "{}", joined);
    assert!(joined.contains("数値変換エラー"), "{}", joined);

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "grades.list",
        json!({ "filters": { "courseIds": [course_id] } }),
    );
    let grades = expect_ok(&resp, "grades.list")
        .get("grades")
        .and_then(|v| v.as_array())
        .expect("grades array")
        .clone();
    assert_eq!(grades.len(), 1);
    assert_eq!(
        grades[0].get("entryDate").and_then(|v| v.as_str()),
        Some("2024-04-05")
    );
    assert_eq!(grades[0].get("grade4").and_then(|v| v.as_f64()), Some(3.5));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn grades_export_is_plain_utf8_without_bom() {
    let workspace = temp_dir("gradedesk-exchange-export");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "courseName": "数学" }),
    );
    let course_id = expect_ok(&resp, "courses.create")
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.upsert",
        json!({
            "courseId": course_id,
            "entryDate": "2024-04-05",
            "studentNumber": "001",
            "grade1": 4
        }),
    );
    expect_ok(&resp, "grades.upsert");

    let out_path = workspace.join("grades-out.csv");
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "exchange.exportGradesCsv",
        json!({ "outPath": out_path.to_string_lossy() }),
    );
    let result = expect_ok(&resp, "exchange.exportGradesCsv");
    assert_eq!(result.get("exported").and_then(|v| v.as_u64()), Some(1));

    let text = std::fs::read_to_string(&out_path).expect("read grades export");
    assert!(!text.starts_with('\u{feff}'), "grades export has no BOM");
    assert!(text.lines().next().unwrap_or("").starts_with("course_name,"));
    assert!(text.contains("2024-04-05"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
