use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grades::normalize_entry_date;
use crate::ipc::helpers::{course_exists, get_opt_str, get_required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn scans_dir(workspace: &Path) -> PathBuf {
    workspace.join("scans")
}

// Stored copies are keyed by asset id so two uploads of "scan.pdf" never
// clobber each other.
fn stored_path(workspace: &Path, asset_id: &str, file_name: &str) -> PathBuf {
    scans_dir(workspace).join(format!("{}_{}", asset_id, file_name))
}

fn handle_assets_attach_scan(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let course_id = match get_required_str(&req.params, "courseId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let source = match get_required_str(&req.params, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let entry_date = match get_opt_str(&req.params, "entryDate") {
        Some(raw) => match normalize_entry_date(&raw) {
            Some(d) => Some(d),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("invalid entryDate: {}", raw),
                    None,
                )
            }
        },
        None => None,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return e.response(&req.id),
    }

    let file_name = match source.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_string(),
        None => return err(&req.id, "bad_params", "path has no file name", None),
    };

    let bytes = match std::fs::read(&source) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                format!("failed to read {}: {}", source.display(), e),
                None,
            )
        }
    };
    let digest = format!("{:x}", Sha256::digest(&bytes));

    let asset_id = Uuid::new_v4().to_string();
    let dest = stored_path(&workspace, &asset_id, &file_name);
    if let Err(e) = std::fs::create_dir_all(scans_dir(&workspace)) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }
    if let Err(e) = std::fs::write(&dest, &bytes) {
        return err(
            &req.id,
            "io_failed",
            format!("failed to write {}: {}", dest.display(), e),
            None,
        );
    }

    if let Err(e) = conn.execute(
        "INSERT INTO scan_assets(id, course_id, entry_date, file_name, sha256, byte_len)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &asset_id,
            &course_id,
            &entry_date,
            &file_name,
            &digest,
            bytes.len() as i64,
        ),
    ) {
        // Do not leave an orphaned copy behind.
        let _ = std::fs::remove_file(&dest);
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "scan_assets" })),
        );
    }

    ok(
        &req.id,
        json!({
            "assetId": asset_id,
            "fileName": file_name,
            "sha256": digest,
            "byteLen": bytes.len(),
            "storedPath": dest.to_string_lossy()
        }),
    )
}

fn handle_assets_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT id, entry_date, file_name, sha256, byte_len, imported_at
         FROM scan_assets
         WHERE course_id = ?
         ORDER BY imported_at DESC, file_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "assetId": r.get::<_, String>(0)?,
                "entryDate": r.get::<_, Option<String>>(1)?,
                "fileName": r.get::<_, String>(2)?,
                "sha256": r.get::<_, String>(3)?,
                "byteLen": r.get::<_, i64>(4)?,
                "importedAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assets) => ok(&req.id, json!({ "assets": assets })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assets_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let asset_id = match get_required_str(&req.params, "assetId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let file_name: String = match conn.query_row(
        "SELECT file_name FROM scan_assets WHERE id = ?",
        [&asset_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return err(&req.id, "not_found", "scan asset not found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = conn.execute("DELETE FROM scan_assets WHERE id = ?", [&asset_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    // The row is authoritative; a missing file on disk is not an error.
    let _ = std::fs::remove_file(stored_path(&workspace, &asset_id, &file_name));

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assets.attachScan" => Some(handle_assets_attach_scan(state, req)),
        "assets.list" => Some(handle_assets_list(state, req)),
        "assets.delete" => Some(handle_assets_delete(state, req)),
        _ => None,
    }
}
