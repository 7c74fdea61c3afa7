use crate::split::{
    compose_filename, GradeRef, PageAssignment, SplitOutcome, SplitSettings,
};
use anyhow::{Context, Result};
use lopdf::Document;
use std::collections::HashMap;
use std::path::Path;

/// Read-only handle on the scanned source document. Held open for the
/// duration of one split run and dropped on return.
pub struct PdfSource {
    doc: Document,
}

impl PdfSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let doc = Document::load(&path).with_context(|| {
            format!("Failed to open PDF: {}", path.as_ref().display())
        })?;
        Ok(PdfSource { doc })
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Build a new document holding the 1-based inclusive page range. The
    /// first page outside the source is reported; nothing is produced then.
    pub fn extract_range(&self, start: u32, end: u32) -> Result<Document> {
        let total = self.page_count();
        for page in start..=end {
            if page == 0 || page > total {
                anyhow::bail!("ページ {} は存在しません", page);
            }
        }

        let mut new_doc = self.doc.clone();
        let pages_to_delete: Vec<u32> = (1..=total).filter(|p| *p < start || *p > end).collect();
        if !pages_to_delete.is_empty() {
            new_doc.delete_pages(&pages_to_delete);
        }
        Ok(new_doc)
    }
}

/// Walks the assignment list in order and writes one file per non-absent
/// student. Per-item failures (range past the source, write errors) are
/// recorded and never stop the batch; only a source that cannot be opened at
/// all is fatal.
pub fn split_document(
    source_path: &Path,
    assignments: &[PageAssignment],
    grades: &HashMap<String, GradeRef>,
    course_name: &str,
    settings: &SplitSettings,
    output_dir: &Path,
) -> Result<SplitOutcome> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    let source = PdfSource::open(source_path)?;

    let mut outcome = SplitOutcome {
        success_count: 0,
        error_count: 0,
        skipped_count: 0,
        output_dir: output_dir.to_string_lossy().to_string(),
        errors: Vec::new(),
    };

    for assignment in assignments {
        if assignment.is_absent {
            outcome.skipped_count += 1;
            continue;
        }

        let student = &assignment.student;
        let grade = grades.get(&student.student_number);
        let filename = compose_filename(student, grade, course_name, settings);
        let output_path = output_dir.join(&filename);

        let result = source
            .extract_range(assignment.start_page, assignment.end_page)
            .and_then(|mut doc| {
                doc.save(&output_path)
                    .with_context(|| format!("Failed to save PDF: {}", output_path.display()))?;
                Ok(())
            });

        match result {
            Ok(()) => outcome.success_count += 1,
            Err(e) => {
                outcome.error_count += 1;
                outcome
                    .errors
                    .push(format!("{}: {}", student.student_name, e));
            }
        }
    }

    Ok(outcome)
}
