//! Folder scanning and the commit step.
//!
//! Commit materializes the session ledger to disk: kept images are rotated,
//! moved into a `sorted_kept/` subfolder and tagged via EXIF `UserComment`;
//! deleted images move to `sorted_deleted/`. A JSON log of kept files is
//! written alongside. Per-file problems are collected into the summary; only
//! infrastructure failures (directory creation, log write) abort the commit.

use image::DynamicImage;
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::DirConfig;
use crate::session::{Decision, ImageId, SessionLedger};

/// Extensions accepted by the folder scan (lowercase).
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

/// Infrastructure failure that aborts a commit.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("A critical error occurred during commit: {0}")]
    Io(#[from] std::io::Error),
}

/// What a commit did, plus any per-file issues encountered.
#[derive(Debug, Default, Clone)]
pub struct CommitSummary {
    pub kept: usize,
    pub deleted: usize,
    pub issues: Vec<String>,
}

impl CommitSummary {
    /// One-line form for the status bar.
    pub fn status_line(&self) -> String {
        if self.kept == 0 && self.deleted == 0 && self.issues.is_empty() {
            return "No changes to commit.".to_string();
        }
        let mut line = format!("Commit complete: {} kept, {} deleted.", self.kept, self.deleted);
        if !self.issues.is_empty() {
            line.push_str(&format!(" {} issue(s), see log.", self.issues.len()));
        }
        line
    }
}

impl fmt::Display for CommitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kept == 0 && self.deleted == 0 && self.issues.is_empty() {
            return write!(f, "No changes to commit.");
        }
        write!(
            f,
            "Commit Complete!\n- {} kept.\n- {} deleted.",
            self.kept, self.deleted
        )?;
        if !self.issues.is_empty() {
            write!(f, "\n\nIssues:\n- {}", self.issues.join("\n- "))?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct KeptLogEntry {
    tags: String,
}

/// Non-recursive scan for supported image files, sorted by path.
pub fn list_images(folder: &Path) -> Vec<ImageId> {
    let mut images: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    IMAGE_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect();

    images.sort();
    tracing::info!(folder = %folder.display(), count = images.len(), "Scanned for images");
    images.into_iter().map(ImageId::new).collect()
}

/// Materialize every keep/delete decision in the ledger to the filesystem.
pub fn commit_session(
    folder: &Path,
    ledger: &SessionLedger,
    rotations: &HashMap<ImageId, u32>,
    dirs: &DirConfig,
) -> Result<CommitSummary, CommitError> {
    let mut summary = CommitSummary::default();
    if ledger.is_empty() {
        tracing::warn!("Commit called with an empty session ledger");
        return Ok(summary);
    }

    let kept_dir = folder.join(&dirs.kept_dir_name);
    let deleted_dir = folder.join(&dirs.deleted_dir_name);
    fs::create_dir_all(&kept_dir)?;
    fs::create_dir_all(&deleted_dir)?;

    let mut kept_log: BTreeMap<String, KeptLogEntry> = BTreeMap::new();

    for (id, record) in ledger.iter() {
        let name = id.file_name();

        if !id.path().exists() {
            let msg = format!("Warning: Could not find {name}. It may have been moved.");
            tracing::warn!("{msg}");
            summary.issues.push(msg);
            continue;
        }

        match record.action {
            Decision::Keep => {
                let angle = rotations.get(id).copied().unwrap_or(0);
                match save_with_rotation_and_tags(id.path(), &kept_dir, angle, &record.tags) {
                    Ok(warnings) => {
                        summary.issues.extend(warnings);
                        kept_log.insert(
                            name,
                            KeptLogEntry {
                                tags: record.tags.clone(),
                            },
                        );
                        summary.kept += 1;
                    }
                    Err(msg) => {
                        tracing::error!("{msg}");
                        summary.issues.push(msg);
                    }
                }
            }
            Decision::Delete => {
                let dest = deleted_dir.join(&name);
                match fs::rename(id.path(), &dest) {
                    Ok(()) => summary.deleted += 1,
                    Err(e) => {
                        let msg = format!("Error processing {name}: {e}");
                        tracing::error!("{msg}");
                        summary.issues.push(msg);
                    }
                }
            }
            // No verdict yet; the image stays where it is.
            Decision::Unset => {}
        }
    }

    if !kept_log.is_empty() {
        let log_path = folder.join(&dirs.log_filename);
        tracing::info!(path = %log_path.display(), "Writing commit log");
        let json = serde_json::to_string_pretty(&kept_log).map_err(std::io::Error::other)?;
        fs::write(&log_path, json)?;
    }

    tracing::info!(kept = summary.kept, deleted = summary.deleted, issues = summary.issues.len(), "Commit finished");
    Ok(summary)
}

/// Decode, rotate, save into the destination directory, tag, and remove the
/// original. EXIF failures are returned as warnings; everything else fails
/// the file.
fn save_with_rotation_and_tags(
    src: &Path,
    dest_dir: &Path,
    angle: u32,
    tags: &str,
) -> Result<Vec<String>, String> {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| src.display().to_string());
    let dest = dest_dir.join(&name);

    let img = image::open(src).map_err(|e| format!("Failed to save/rotate/tag {name}: {e}"))?;
    let img = apply_rotation(img, angle);
    img.save(&dest)
        .map_err(|e| format!("Failed to save/rotate/tag {name}: {e}"))?;

    let mut warnings = Vec::new();
    if !tags.is_empty() {
        if let Err(e) = write_exif_tags(&dest, tags) {
            let msg = format!("Warning: Could not write EXIF data to {name}. Error: {e}");
            tracing::warn!("{msg}");
            warnings.push(msg);
        }
    }

    fs::remove_file(src).map_err(|e| format!("Failed to remove original {name}: {e}"))?;
    Ok(warnings)
}

/// Rotate clockwise in 90-degree steps.
pub fn apply_rotation(img: DynamicImage, angle: u32) -> DynamicImage {
    match angle % 360 {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

/// Write the merged tag text into the EXIF `UserComment` field, using the
/// ASCII charset prefix the EXIF spec requires.
fn write_exif_tags(path: &Path, tags: &str) -> Result<(), String> {
    let mut metadata = Metadata::new_from_path(path).unwrap_or_else(|_| {
        tracing::warn!(path = %path.display(), "No existing EXIF data, creating new");
        Metadata::new()
    });

    let mut comment = b"ASCII\0\0\0".to_vec();
    comment.extend_from_slice(tags.as_bytes());
    metadata.set_tag(ExifTag::UserComment(comment));

    metadata.write_to_file(path).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::new(width, height).save(&path).unwrap();
        path
    }

    fn ledger_with(entries: Vec<(PathBuf, Decision, &str)>) -> SessionLedger {
        let mut ledger = SessionLedger::default();
        for (path, action, tags) in entries {
            ledger.record_decision(&ImageId::new(path), action, tags.to_string(), Vec::new());
        }
        ledger
    }

    #[test]
    fn test_list_images_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write_test_image(dir.path(), "b.png", 2, 2);
        write_test_image(dir.path(), "a.jpg", 2, 2);
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_test_image(&dir.path().join("nested"), "c.jpg", 2, 2);

        let images = list_images(dir.path());
        let names: Vec<String> = images.iter().map(|i| i.file_name()).collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
    }

    #[test]
    fn test_commit_moves_kept_and_deleted() {
        let dir = TempDir::new().unwrap();
        let keep = write_test_image(dir.path(), "keep.jpg", 4, 4);
        let delete = write_test_image(dir.path(), "delete.jpg", 4, 4);
        let dirs = DirConfig::default();

        let ledger = ledger_with(vec![
            (keep.clone(), Decision::Keep, "dog, beach"),
            (delete.clone(), Decision::Delete, ""),
        ]);

        let summary =
            commit_session(dir.path(), &ledger, &HashMap::new(), &dirs).unwrap();

        assert_eq!(summary.kept, 1);
        assert_eq!(summary.deleted, 1);
        assert!(dir.path().join("sorted_kept/keep.jpg").exists());
        assert!(dir.path().join("sorted_deleted/delete.jpg").exists());
        assert!(!keep.exists());
        assert!(!delete.exists());

        let log = fs::read_to_string(dir.path().join("photo_log.json")).unwrap();
        assert!(log.contains("keep.jpg"));
        assert!(log.contains("dog, beach"));
    }

    #[test]
    fn test_commit_applies_rotation() {
        let dir = TempDir::new().unwrap();
        let src = write_test_image(dir.path(), "wide.png", 6, 4);
        let dirs = DirConfig::default();

        let ledger = ledger_with(vec![(src.clone(), Decision::Keep, "")]);
        let mut rotations = HashMap::new();
        rotations.insert(ImageId::new(&src), 90u32);

        let summary = commit_session(dir.path(), &ledger, &rotations, &dirs).unwrap();
        assert_eq!(summary.kept, 1);

        let rotated = image::open(dir.path().join("sorted_kept/wide.png")).unwrap();
        assert_eq!((rotated.width(), rotated.height()), (4, 6));
    }

    #[test]
    fn test_commit_missing_file_is_a_warning() {
        let dir = TempDir::new().unwrap();
        let dirs = DirConfig::default();
        let ledger = ledger_with(vec![(
            dir.path().join("gone.jpg"),
            Decision::Delete,
            "",
        )]);

        let summary =
            commit_session(dir.path(), &ledger, &HashMap::new(), &dirs).unwrap();

        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.issues.len(), 1);
        assert!(summary.issues[0].contains("gone.jpg"));
    }

    #[test]
    fn test_commit_undecided_images_untouched() {
        let dir = TempDir::new().unwrap();
        let src = write_test_image(dir.path(), "pending.jpg", 4, 4);
        let dirs = DirConfig::default();

        let mut ledger = SessionLedger::default();
        ledger.set_ai_tags(&ImageId::new(&src), vec!["dog".to_string()]);

        let summary =
            commit_session(dir.path(), &ledger, &HashMap::new(), &dirs).unwrap();

        assert_eq!(summary.kept, 0);
        assert_eq!(summary.deleted, 0);
        assert!(src.exists());
    }

    #[test]
    fn test_commit_empty_ledger_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let dirs = DirConfig::default();
        let ledger = SessionLedger::default();

        let summary =
            commit_session(dir.path(), &ledger, &HashMap::new(), &dirs).unwrap();

        assert_eq!(summary.status_line(), "No changes to commit.");
        assert!(!dir.path().join("sorted_kept").exists());
    }

    #[test]
    fn test_summary_display_lists_issues() {
        let summary = CommitSummary {
            kept: 2,
            deleted: 1,
            issues: vec!["Warning: something".to_string()],
        };
        let text = summary.to_string();
        assert!(text.contains("- 2 kept."));
        assert!(text.contains("- 1 deleted."));
        assert!(text.contains("Issues:\n- Warning: something"));
    }
}
