use anyhow::{anyhow, Context};
use chrono::Local;
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT: &str = "gradedesk-workspace-v1";

const DB_FILE: &str = "gradedesk.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/gradedesk.sqlite3";
const SCANS_ENTRY_PREFIX: &str = "scans/";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub scan_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub scan_count: usize,
    pub snapshot_path: Option<PathBuf>,
}

/// Timestamped plain-sqlite copy into `<workspace>/backups/`. This is the
/// same backup the desktop app made on every risky operation, and restoring
/// one is just `workspace.select` pointed at a copy (or a legacy import).
pub fn snapshot_database(workspace: &Path) -> anyhow::Result<PathBuf> {
    let db_path = workspace.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.display()
        ));
    }

    let backups = workspace.join("backups");
    std::fs::create_dir_all(&backups)
        .with_context(|| format!("failed to create {}", backups.display()))?;
    let dest = backups.join(format!(
        "gradedesk_backup_{}.sqlite3",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    std::fs::copy(&db_path, &dest)
        .with_context(|| format!("failed to copy database to {}", dest.display()))?;
    Ok(dest)
}

/// Bundle = manifest + database + the stored scan copies. Attached scans
/// live outside the database, so a db-only export would restore dangling
/// `scan_assets` rows.
pub fn export_workspace_bundle(
    workspace: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.display()
        ));
    }

    let scan_files = list_scan_files(workspace)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Local::now().to_rfc3339(),
        "scanCount": scan_files.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    for (name, path) in &scan_files {
        zip.start_file(format!("{}{}", SCANS_ENTRY_PREFIX, name), opts)
            .with_context(|| format!("failed to start scan entry {}", name))?;
        let mut f = File::open(path)
            .with_context(|| format!("failed to open scan {}", path.display()))?;
        std::io::copy(&mut f, &mut zip)
            .with_context(|| format!("failed to write scan entry {}", name))?;
    }

    zip.finish().context("failed to finalize bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        scan_count: scan_files.len(),
    })
}

/// Restores a bundle (or a bare sqlite copy, which is what the desktop app's
/// own backups were) into the workspace. An existing database is snapshotted
/// into `backups/` before it is replaced.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE);

    let snapshot_path = if db_path.is_file() {
        Some(snapshot_database(workspace)?)
    } else {
        None
    };

    if !is_zip_file(in_path)? {
        std::fs::copy(in_path, &db_path).with_context(|| {
            format!(
                "failed to copy sqlite backup from {}",
                in_path.display()
            )
        })?;
        return Ok(ImportSummary {
            bundle_format_detected: "legacy-sqlite3".to_string(),
            scan_count: 0,
            snapshot_path,
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.display()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    // Extract next to the target and rename, so a truncated bundle never
    // leaves a half-written database behind.
    let staging = workspace.join(format!("{}.importing", DB_FILE));
    if staging.exists() {
        let _ = std::fs::remove_file(&staging);
    }
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {}", DB_ENTRY))?;
        let mut staged = File::create(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        std::io::copy(&mut db_entry, &mut staged)
            .context("failed to extract database entry")?;
        staged.flush().context("failed to flush extracted database")?;
    }
    std::fs::rename(&staging, &db_path)
        .with_context(|| format!("failed to move database into {}", db_path.display()))?;

    let scan_count = extract_scan_entries(&mut archive, workspace)?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT.to_string(),
        scan_count,
        snapshot_path,
    })
}

fn list_scan_files(workspace: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let scans = workspace.join("scans");
    let mut out = Vec::new();
    if !scans.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(&scans)
        .with_context(|| format!("failed to read {}", scans.display()))?
    {
        let entry = entry.context("failed to read scans directory entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        out.push((name.to_string(), path));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn extract_scan_entries(
    archive: &mut ZipArchive<File>,
    workspace: &Path,
) -> anyhow::Result<usize> {
    let scans = workspace.join("scans");
    let mut count = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read bundle entry")?;
        let Some(name) = entry
            .name()
            .strip_prefix(SCANS_ENTRY_PREFIX)
            .map(str::to_string)
        else {
            continue;
        };
        // Flat namespace only; anything trying to escape scans/ is ignored.
        if name.is_empty() || name.contains('/') || name.contains("..") {
            continue;
        }
        std::fs::create_dir_all(&scans)
            .with_context(|| format!("failed to create {}", scans.display()))?;
        let dest = scans.join(&name);
        let mut out = File::create(&dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract scan {}", name))?;
        count += 1;
    }
    Ok(count)
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.display()))?;
    let mut sig = [0u8; 4];
    match f.read_exact(&mut sig) {
        Ok(()) => Ok(sig == [0x50, 0x4B, 0x03, 0x04]),
        Err(_) => Ok(false),
    }
}
