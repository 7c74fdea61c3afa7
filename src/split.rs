use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Roster entry as loaded from `course_students`. Read-only within a split
/// session; the session keeps its own snapshot taken at `split.begin`.
#[derive(Debug, Clone)]
pub struct StudentRef {
    pub student_number: String,
    pub student_name: String,
    pub class_number: Option<String>,
    pub note1: Option<String>,
    pub note2: Option<String>,
    pub note3: Option<String>,
}

/// One grade row keyed by student number (course + entry date scoped by the
/// caller). grade1..grade3 are the radio-coded integer fields, grade4..grade6
/// the decimal ones.
#[derive(Debug, Clone, Default)]
pub struct GradeRef {
    pub grade1: Option<i64>,
    pub grade2: Option<i64>,
    pub grade3: Option<i64>,
    pub grade4: Option<f64>,
    pub grade5: Option<f64>,
    pub grade6: Option<f64>,
    pub note1: Option<String>,
    pub note2: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeField {
    Grade1,
    Grade2,
    Grade3,
    Grade4,
    Grade5,
    Grade6,
    Note1,
    Note2,
}

impl GradeField {
    pub fn value_of(self, grade: &GradeRef) -> String {
        match self {
            GradeField::Grade1 => grade.grade1.map(|v| v.to_string()).unwrap_or_default(),
            GradeField::Grade2 => grade.grade2.map(|v| v.to_string()).unwrap_or_default(),
            GradeField::Grade3 => grade.grade3.map(|v| v.to_string()).unwrap_or_default(),
            GradeField::Grade4 => grade.grade4.map(|v| v.to_string()).unwrap_or_default(),
            GradeField::Grade5 => grade.grade5.map(|v| v.to_string()).unwrap_or_default(),
            GradeField::Grade6 => grade.grade6.map(|v| v.to_string()).unwrap_or_default(),
            GradeField::Note1 => grade.note1.clone().unwrap_or_default(),
            GradeField::Note2 => grade.note2.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentField {
    Note1,
    Note2,
    Note3,
}

impl StudentField {
    pub fn value_of(self, student: &StudentRef) -> String {
        match self {
            StudentField::Note1 => student.note1.clone().unwrap_or_default(),
            StudentField::Note2 => student.note2.clone().unwrap_or_default(),
            StudentField::Note3 => student.note3.clone().unwrap_or_default(),
        }
    }
}

/// Settings for one split session. Immutable once the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSettings {
    pub pages_per_student: u32,
    pub grade_field: GradeField,
    pub student_field: StudentField,
    #[serde(default)]
    pub session_number: String,
}

/// Per-student page assignment. When not absent, `end_page = start_page +
/// page_count - 1` and `page_count >= 1`. Absent entries keep whatever range
/// they last had; layout and validation skip them.
#[derive(Debug, Clone)]
pub struct PageAssignment {
    pub student: StudentRef,
    pub start_page: u32,
    pub end_page: u32,
    pub page_count: u32,
    pub is_absent: bool,
    pub order: usize,
}

impl PageAssignment {
    pub fn page_range_label(&self) -> String {
        if self.is_absent {
            "-".to_string()
        } else {
            format!("{}-{}", self.start_page, self.end_page)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub output_dir: String,
    pub errors: Vec<String>,
}

/// One assignment per student, in roster order, packed back-to-back from
/// page 1 with the default page count. Page arithmetic saturates at
/// `u32::MAX`; oversized counts are rejected by validation, never wrapped.
pub fn initialize_assignments(students: &[StudentRef], pages_per_student: u32) -> Vec<PageAssignment> {
    let per = pages_per_student.max(1);
    let mut current_page = 1u32;
    let mut out = Vec::with_capacity(students.len());
    for (order, student) in students.iter().enumerate() {
        let start = current_page;
        let end = start.saturating_add(per - 1);
        out.push(PageAssignment {
            student: student.clone(),
            start_page: start,
            end_page: end,
            page_count: per,
            is_absent: false,
            order,
        });
        current_page = end.saturating_add(1);
    }
    out
}

/// Re-sequences the list to match `order` (student numbers). Ranges are left
/// untouched; the caller recomputes afterwards. Fails if `order` is not a
/// permutation of the current assignment set.
pub fn reorder_assignments(
    assignments: &mut Vec<PageAssignment>,
    order: &[String],
) -> Result<(), String> {
    if order.len() != assignments.len() {
        return Err(format!(
            "expected {} student numbers, got {}",
            assignments.len(),
            order.len()
        ));
    }
    let mut remaining: HashMap<&str, usize> = assignments
        .iter()
        .enumerate()
        .map(|(i, a)| (a.student.student_number.as_str(), i))
        .collect();
    let mut picked: Vec<usize> = Vec::with_capacity(order.len());
    for number in order {
        match remaining.remove(number.as_str()) {
            Some(i) => picked.push(i),
            None => return Err(format!("unknown or duplicate student number: {}", number)),
        }
    }
    let mut reordered: Vec<PageAssignment> = picked
        .into_iter()
        .map(|i| assignments[i].clone())
        .collect();
    for (i, a) in reordered.iter_mut().enumerate() {
        a.order = i;
    }
    *assignments = reordered;
    Ok(())
}

/// Toggles the absence flag. The student keeps their slot in the list; they
/// are only excluded from layout and output.
pub fn set_absent(assignments: &mut [PageAssignment], student_number: &str, absent: bool) -> bool {
    match find_mut(assignments, student_number) {
        Some(a) => {
            a.is_absent = absent;
            true
        }
        None => false,
    }
}

pub fn set_page_count(assignments: &mut [PageAssignment], student_number: &str, count: u32) -> bool {
    let count = count.max(1);
    match find_mut(assignments, student_number) {
        Some(a) => {
            a.page_count = count;
            a.end_page = a.start_page.saturating_add(count - 1);
            true
        }
        None => false,
    }
}

/// Sets a range directly. `end < start` clamps to a single page. The page
/// count is derived from the range.
pub fn set_page_range(
    assignments: &mut [PageAssignment],
    student_number: &str,
    start: u32,
    end: u32,
) -> bool {
    let start = start.max(1);
    let end = end.max(start);
    match find_mut(assignments, student_number) {
        Some(a) => {
            a.start_page = start;
            a.end_page = end;
            a.page_count = end - start + 1;
            true
        }
        None => false,
    }
}

/// Packs non-absent assignments back-to-back from page 1 in list order,
/// preserving each page count. Absent entries are skipped and keep stale
/// ranges. Idempotent.
pub fn recompute_sequential(assignments: &mut [PageAssignment]) {
    let mut current_page = 1u32;
    for a in assignments.iter_mut() {
        if a.is_absent {
            continue;
        }
        a.start_page = current_page;
        a.end_page = current_page.saturating_add(a.page_count - 1);
        current_page = a.end_page.saturating_add(1);
    }
}

fn find_mut<'a>(
    assignments: &'a mut [PageAssignment],
    student_number: &str,
) -> Option<&'a mut PageAssignment> {
    assignments
        .iter_mut()
        .find(|a| a.student.student_number == student_number)
}

/// Pre-flight check before executing a split. Absent assignments are excluded
/// from both the page-count sum and the overlap scan. On overlap, the first
/// claimant of the page in list order is the one cited.
pub fn validate_assignments(assignments: &[PageAssignment], total_pages: u32) -> Result<(), String> {
    // Summed in u64 so absurd per-student counts surface as a validation
    // failure instead of wrapping.
    let used_pages: u64 = assignments
        .iter()
        .filter(|a| !a.is_absent)
        .map(|a| u64::from(a.page_count))
        .sum();
    if used_pages > u64::from(total_pages) {
        return Err(format!(
            "割り当てページ数（{}）が総ページ数（{}）を超えています",
            used_pages, total_pages
        ));
    }

    let mut page_map: HashMap<u32, &str> = HashMap::new();
    for a in assignments {
        if a.is_absent {
            continue;
        }
        for page in a.start_page..=a.end_page {
            if let Some(owner) = page_map.get(&page) {
                return Err(format!(
                    "ページ {} が重複しています（担当: {}）",
                    page, owner
                ));
            }
            page_map.insert(page, a.student.student_name.as_str());
        }
    }

    Ok(())
}

const INVALID_FILENAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Output filename:
/// `{クラス番号}_{氏名}_{講座名}_第{回数}回_{成績項目の値}_{生徒情報項目の値}.pdf`
/// with empty components dropped and filesystem-hostile characters replaced.
pub fn compose_filename(
    student: &StudentRef,
    grade: Option<&GradeRef>,
    course_name: &str,
    settings: &SplitSettings,
) -> String {
    let class_number = student
        .class_number
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "未設定".to_string());

    // Strip both ASCII and full-width spaces from the display name.
    let student_name: String = student
        .student_name
        .chars()
        .filter(|c| *c != ' ' && *c != '　')
        .collect();

    let session = if settings.session_number.is_empty() {
        String::new()
    } else {
        format!("第{}回", settings.session_number)
    };

    let grade_value = grade
        .map(|g| settings.grade_field.value_of(g))
        .unwrap_or_default();
    let student_value = settings.student_field.value_of(student);

    let parts = [
        class_number,
        student_name,
        course_name.to_string(),
        session,
        grade_value,
        student_value,
    ];
    let filename = parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("_")
        + ".pdf";

    filename
        .chars()
        .map(|c| {
            if INVALID_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(number: &str, name: &str) -> StudentRef {
        StudentRef {
            student_number: number.to_string(),
            student_name: name.to_string(),
            class_number: None,
            note1: None,
            note2: None,
            note3: None,
        }
    }

    fn settings() -> SplitSettings {
        SplitSettings {
            pages_per_student: 2,
            grade_field: GradeField::Grade1,
            student_field: StudentField::Note1,
            session_number: String::new(),
        }
    }

    fn ranges(assignments: &[PageAssignment]) -> Vec<(u32, u32)> {
        assignments
            .iter()
            .map(|a| (a.start_page, a.end_page))
            .collect()
    }

    #[test]
    fn initialize_packs_uniform_ranges_in_roster_order() {
        let roster = vec![student("1", "A"), student("2", "B"), student("3", "C")];
        let assignments = initialize_assignments(&roster, 3);
        assert_eq!(ranges(&assignments), vec![(1, 3), (4, 6), (7, 9)]);
        assert!(assignments.iter().all(|a| !a.is_absent));
        assert_eq!(
            assignments.iter().map(|a| a.order).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn recompute_is_idempotent() {
        let roster = vec![student("1", "A"), student("2", "B"), student("3", "C")];
        let mut assignments = initialize_assignments(&roster, 2);
        set_page_count(&mut assignments, "2", 5);
        recompute_sequential(&mut assignments);
        let first = ranges(&assignments);
        recompute_sequential(&mut assignments);
        assert_eq!(ranges(&assignments), first);
        assert_eq!(first, vec![(1, 2), (3, 7), (8, 9)]);
    }

    #[test]
    fn absence_removes_pages_without_shifting_order() {
        let roster = vec![student("1", "A"), student("2", "B"), student("3", "C")];
        let mut assignments = initialize_assignments(&roster, 2);
        set_absent(&mut assignments, "2", true);
        recompute_sequential(&mut assignments);
        assert_eq!(assignments[0].page_range_label(), "1-2");
        assert_eq!(assignments[1].page_range_label(), "-");
        assert_eq!(assignments[2].page_range_label(), "3-4");
        // List order is unchanged; only the packed pages move.
        assert_eq!(assignments[1].student.student_number, "2");
    }

    #[test]
    fn reorder_keeps_counts_and_requires_permutation() {
        let roster = vec![student("1", "A"), student("2", "B"), student("3", "C")];
        let mut assignments = initialize_assignments(&roster, 2);
        set_page_count(&mut assignments, "3", 4);

        let order = vec!["3".to_string(), "1".to_string(), "2".to_string()];
        reorder_assignments(&mut assignments, &order).expect("reorder");
        recompute_sequential(&mut assignments);
        assert_eq!(ranges(&assignments), vec![(1, 4), (5, 6), (7, 8)]);
        assert_eq!(assignments[0].student.student_number, "3");

        let bad = vec!["3".to_string(), "3".to_string(), "2".to_string()];
        assert!(reorder_assignments(&mut assignments, &bad).is_err());
        let short = vec!["1".to_string()];
        assert!(reorder_assignments(&mut assignments, &short).is_err());
    }

    #[test]
    fn huge_page_count_saturates_and_fails_validation() {
        let roster = vec![student("1", "A"), student("2", "B")];
        let mut assignments = initialize_assignments(&roster, 2);
        set_page_count(&mut assignments, "1", u32::MAX);
        recompute_sequential(&mut assignments);
        // Pages stay 1-based; the follower must not wrap past the end of
        // the saturated range.
        assert!(assignments.iter().all(|a| a.start_page >= 1));
        assert_eq!(assignments[0].end_page, u32::MAX);
        assert!(validate_assignments(&assignments, 10).is_err());
    }

    #[test]
    fn huge_pages_per_student_does_not_wrap_at_initialize() {
        let roster = vec![student("1", "A"), student("2", "B")];
        let assignments = initialize_assignments(&roster, u32::MAX);
        assert!(assignments.iter().all(|a| a.start_page >= 1));
        assert!(validate_assignments(&assignments, 100).is_err());
    }

    #[test]
    fn set_page_range_clamps_inverted_end() {
        let roster = vec![student("1", "A")];
        let mut assignments = initialize_assignments(&roster, 2);
        set_page_range(&mut assignments, "1", 5, 3);
        assert_eq!(assignments[0].start_page, 5);
        assert_eq!(assignments[0].end_page, 5);
        assert_eq!(assignments[0].page_count, 1);
    }

    #[test]
    fn validate_accepts_in_bounds_non_overlapping() {
        let roster = vec![student("1", "A"), student("2", "B")];
        let assignments = initialize_assignments(&roster, 2);
        assert!(validate_assignments(&assignments, 4).is_ok());
    }

    #[test]
    fn validate_rejects_page_overflow_naming_both_totals() {
        let roster = vec![student("1", "A"), student("2", "B")];
        let assignments = initialize_assignments(&roster, 3);
        let msg = validate_assignments(&assignments, 4).unwrap_err();
        assert!(msg.contains('6'), "{}", msg);
        assert!(msg.contains('4'), "{}", msg);
    }

    #[test]
    fn validate_rejects_overlap_naming_page_and_first_claimant() {
        let roster = vec![student("1", "Alice"), student("2", "Bob")];
        let mut assignments = initialize_assignments(&roster, 2);
        set_page_range(&mut assignments, "2", 2, 3);
        let msg = validate_assignments(&assignments, 10).unwrap_err();
        assert!(msg.contains("ページ 2"), "{}", msg);
        assert!(msg.contains("Alice"), "{}", msg);
    }

    #[test]
    fn validate_ignores_absent_stale_ranges() {
        let roster = vec![student("1", "A"), student("2", "B")];
        let mut assignments = initialize_assignments(&roster, 2);
        // Absent student keeps a stale 1-2 range that would otherwise clash.
        set_absent(&mut assignments, "1", true);
        recompute_sequential(&mut assignments);
        assert!(validate_assignments(&assignments, 2).is_ok());
    }

    #[test]
    fn filename_strips_spaces_and_sanitizes() {
        let mut s = student("1", "山田 太郎");
        s.class_number = Some("3:A".to_string());
        s.note1 = Some("午前".to_string());
        let grade = GradeRef {
            grade1: Some(4),
            ..GradeRef::default()
        };
        let mut cfg = settings();
        cfg.session_number = "4-5".to_string();
        let name = compose_filename(&s, Some(&grade), "数学", &cfg);
        assert_eq!(name, "3_A_山田太郎_数学_第4-5回_4_午前.pdf");
    }

    #[test]
    fn filename_full_width_space_and_defaults() {
        let s = student("1", "山田　太郎");
        let cfg = settings();
        let name = compose_filename(&s, None, "数学", &cfg);
        assert_eq!(name, "未設定_山田太郎_数学.pdf");
    }

    #[test]
    fn filename_decimal_grade_field() {
        let mut s = student("1", "A");
        s.class_number = Some("1".to_string());
        let grade = GradeRef {
            grade4: Some(3.5),
            ..GradeRef::default()
        };
        let mut cfg = settings();
        cfg.grade_field = GradeField::Grade4;
        let name = compose_filename(&s, Some(&grade), "数学", &cfg);
        assert_eq!(name, "1_A_数学_3.5.pdf");
    }
}
