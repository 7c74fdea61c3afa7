#[path = "../src/split.rs"]
mod split;

#[path = "../src/pdf.rs"]
mod pdf;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use split::{GradeField, GradeRef, SplitSettings, StudentField, StudentRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
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

fn write_sample_pdf(path: &Path, pages: u32) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for i in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Page {}", i))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode page content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(path).expect("save sample pdf");
}

fn student(number: &str, name: &str, class_number: &str) -> StudentRef {
    StudentRef {
        student_number: number.to_string(),
        student_name: name.to_string(),
        class_number: Some(class_number.to_string()),
        note1: None,
        note2: None,
        note3: None,
    }
}

fn settings(pages_per_student: u32) -> SplitSettings {
    SplitSettings {
        pages_per_student,
        grade_field: GradeField::Grade1,
        student_field: StudentField::Note1,
        session_number: String::new(),
    }
}

#[test]
fn writes_one_file_per_present_student() {
    let dir = temp_dir("gradedesk-split");
    let source = dir.join("scan.pdf");
    write_sample_pdf(&source, 4);

    let roster = vec![
        student("001", "佐藤花子", "1"),
        student("002", "鈴木一郎", "2"),
        student("003", "田中次郎", "3"),
    ];
    let mut assignments = split::initialize_assignments(&roster, 2);
    split::set_absent(&mut assignments, "002", true);
    split::recompute_sequential(&mut assignments);
    assert!(split::validate_assignments(&assignments, 4).is_ok());

    let grades: HashMap<String, GradeRef> = HashMap::new();
    let out_dir = dir.join("out");
    let outcome = pdf::split_document(
        &source,
        &assignments,
        &grades,
        "数学",
        &settings(2),
        &out_dir,
    )
    .expect("split");

    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.skipped_count, 1);
    assert_eq!(outcome.error_count, 0);
    assert!(outcome.errors.is_empty());

    let first = out_dir.join("1_佐藤花子_数学.pdf");
    let third = out_dir.join("3_田中次郎_数学.pdf");
    assert!(first.is_file(), "missing {}", first.display());
    assert!(third.is_file(), "missing {}", third.display());
    assert!(!out_dir.join("2_鈴木一郎_数学.pdf").exists());

    let reloaded = Document::load(&first).expect("reload split output");
    assert_eq!(reloaded.get_pages().len(), 2);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn out_of_range_assignment_fails_alone_and_batch_continues() {
    let dir = temp_dir("gradedesk-split-range");
    let source = dir.join("scan.pdf");
    write_sample_pdf(&source, 5);

    let roster = vec![
        student("001", "佐藤花子", "1"),
        student("002", "鈴木一郎", "2"),
    ];
    let mut assignments = split::initialize_assignments(&roster, 3);
    // 4-6 runs one page past the 5-page source.
    split::set_page_range(&mut assignments, "002", 4, 6);

    let grades: HashMap<String, GradeRef> = HashMap::new();
    let out_dir = dir.join("out");
    let outcome = pdf::split_document(
        &source,
        &assignments,
        &grades,
        "数学",
        &settings(3),
        &out_dir,
    )
    .expect("split");

    assert_eq!(outcome.success_count, 1);
    assert_eq!(outcome.error_count, 1);
    assert_eq!(outcome.skipped_count, 0);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].contains("鈴木一郎"), "{}", outcome.errors[0]);
    assert!(outcome.errors[0].contains("ページ 6"), "{}", outcome.errors[0]);

    assert!(out_dir.join("1_佐藤花子_数学.pdf").is_file());
    assert!(!out_dir.join("2_鈴木一郎_数学.pdf").exists());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn unreadable_source_is_fatal() {
    let dir = temp_dir("gradedesk-split-missing");
    let roster = vec![student("001", "佐藤花子", "1")];
    let assignments = split::initialize_assignments(&roster, 1);
    let grades: HashMap<String, GradeRef> = HashMap::new();

    let result = pdf::split_document(
        &dir.join("no-such.pdf"),
        &assignments,
        &grades,
        "数学",
        &settings(1),
        &dir.join("out"),
    );
    assert!(result.is_err());

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn grade_and_note_fields_reach_the_filename() {
    let dir = temp_dir("gradedesk-split-fields");
    let source = dir.join("scan.pdf");
    write_sample_pdf(&source, 2);

    let mut s = student("001", "山田 太郎", "3");
    s.note1 = Some("午前".to_string());
    let assignments = split::initialize_assignments(&[s], 2);

    let mut grades: HashMap<String, GradeRef> = HashMap::new();
    grades.insert(
        "001".to_string(),
        GradeRef {
            grade1: Some(4),
            ..GradeRef::default()
        },
    );
    let mut cfg = settings(2);
    cfg.session_number = "2".to_string();

    let out_dir = dir.join("out");
    let outcome =
        pdf::split_document(&source, &assignments, &grades, "数学", &cfg, &out_dir).expect("split");
    assert_eq!(outcome.success_count, 1);
    assert!(out_dir.join("3_山田太郎_数学_第2回_4_午前.pdf").is_file());

    let _ = std::fs::remove_dir_all(dir);
}
