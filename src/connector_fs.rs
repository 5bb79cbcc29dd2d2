//! Notes-directory upstream source.
//!
//! Walks `[connectors.notes].root`, turning every file matched by the
//! include globs into an [`UpstreamNote`]:
//!
//! - `source_id`: path relative to the root, `/`-separated
//! - `title`: the first `# ` heading, else the file stem
//! - `tags`: the first directory component, if any
//! - `updated_at`: file mtime
//!
//! Files under `trash_dir` are reported with `trashed = true` and a
//! `source_id` relative to the trash directory, so `.trash/work/a.md`
//! maps back to `work/a.md`.
//!
//! A matched file that cannot be read (not UTF-8, permission denied) is
//! reported as skipped rather than dropped, so the sync keeps its indexed
//! copy and records why.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};
use walkdir::WalkDir;

use companion_recall_core::ingest::NoteSource;
use companion_recall_core::models::{ScanReport, SkippedNote, UpstreamNote};

use crate::config::{Config, NotesConnectorConfig};

pub struct NotesConnector {
    config: NotesConnectorConfig,
}

impl NotesConnector {
    pub fn new(config: NotesConnectorConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let notes = config
            .connectors
            .notes
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Notes connector not configured ([connectors.notes])"))?;
        Ok(Self::new(notes))
    }
}

#[async_trait]
impl NoteSource for NotesConnector {
    fn name(&self) -> &str {
        &self.config.source
    }

    async fn scan(&self) -> Result<ScanReport> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || scan_notes(&config))
            .await
            .context("notes scan task panicked")?
    }
}

/// Synchronously scan the notes directory.
pub fn scan_notes(config: &NotesConnectorConfig) -> Result<ScanReport> {
    let root = &config.root;
    if !root.exists() {
        bail!("Notes connector root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let trash_dir = config.trash_dir.trim_matches('/');
    let mut notes = Vec::new();
    let mut skipped = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = slash_path(relative);

        let (source_id, trashed) = match rel_str.strip_prefix(&format!("{trash_dir}/")) {
            Some(rest) if !trash_dir.is_empty() => (rest.to_string(), true),
            _ => (rel_str.clone(), false),
        };

        // Apply exclude patterns
        if exclude_set.is_match(&source_id) {
            continue;
        }

        // Apply include patterns
        if !include_set.is_match(&source_id) {
            continue;
        }

        match file_to_note(path, &config.source, &source_id, trashed) {
            Ok(note) => notes.push(note),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable note");
                skipped.push(SkippedNote {
                    source_id,
                    reason: format!("{e:#}"),
                });
            }
        }
    }

    // Sort for deterministic ordering
    notes.sort_by(|a, b| (a.trashed, &a.source_id).cmp(&(b.trashed, &b.source_id)));
    skipped.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    tracing::debug!(
        root = %root.display(),
        notes = notes.len(),
        skipped = skipped.len(),
        "scanned notes"
    );
    Ok(ScanReport { notes, skipped })
}

fn file_to_note(path: &Path, source: &str, source_id: &str, trashed: bool) -> Result<UpstreamNote> {
    let metadata = std::fs::metadata(path)?;
    let updated_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (title, body) = split_title(&raw, path);

    let tags = source_id
        .split_once('/')
        .map(|(dir, _)| vec![dir.to_string()])
        .unwrap_or_default();

    Ok(UpstreamNote {
        source: source.to_string(),
        source_id: source_id.to_string(),
        title,
        body,
        updated_at,
        trashed,
        tags,
    })
}

/// Take the first `# ` heading as the title and drop it from the body;
/// fall back to the file stem.
fn split_title(raw: &str, path: &Path) -> (String, String) {
    let heading = raw
        .lines()
        .enumerate()
        .find(|(_, line)| !line.trim().is_empty())
        .and_then(|(i, line)| line.trim().strip_prefix("# ").map(|t| (i, t.trim().to_string())));

    match heading {
        Some((index, title)) => {
            let body: Vec<&str> = raw
                .lines()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, line)| line)
                .collect();
            (title, body.join("\n").trim().to_string())
        }
        None => {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            (stem, raw.trim().to_string())
        }
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn connector_config(root: &Path) -> NotesConnectorConfig {
        NotesConnectorConfig {
            root: root.to_path_buf(),
            source: "notes".to_string(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec!["**/drafts/**".to_string()],
            trash_dir: ".trash".to_string(),
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_titles_tags_and_trash() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("work")).unwrap();
        fs::create_dir_all(root.join(".trash/home")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::write(root.join("work/invoice.md"), "# Invoice totals\n\nAmount due: 40").unwrap();
        fs::write(root.join("plain.txt"), "no heading here").unwrap();
        fs::write(root.join("image.png"), "binary-ish").unwrap();
        fs::write(root.join("drafts/skip.md"), "# Draft").unwrap();
        fs::write(root.join(".trash/home/old.md"), "gone").unwrap();

        let scan = scan_notes(&connector_config(root)).unwrap();
        assert!(scan.skipped.is_empty());
        let notes = scan.notes;
        let ids: Vec<(&str, bool)> = notes
            .iter()
            .map(|n| (n.source_id.as_str(), n.trashed))
            .collect();
        assert_eq!(
            ids,
            vec![("plain.txt", false), ("work/invoice.md", false), ("home/old.md", true)]
        );

        let invoice = &notes[1];
        assert_eq!(invoice.title, "Invoice totals");
        assert_eq!(invoice.body, "Amount due: 40");
        assert_eq!(invoice.tags, vec!["work".to_string()]);

        let plain = &notes[0];
        assert_eq!(plain.title, "plain");
        assert!(plain.tags.is_empty());
    }

    #[test]
    fn test_unreadable_file_is_reported_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("good.md"), "# Good\n\nreadable").unwrap();
        fs::write(root.join("bad.md"), b"# Bad\n\n\xff\xfe broken").unwrap();

        let scan = scan_notes(&connector_config(root)).unwrap();
        assert_eq!(scan.notes.len(), 1);
        assert_eq!(scan.notes[0].source_id, "good.md");
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].source_id, "bad.md");
        assert!(scan.skipped[0].reason.contains("bad.md"));
    }

    #[test]
    fn test_missing_root_fails() {
        let config = connector_config(Path::new("/definitely/not/here"));
        assert!(scan_notes(&config).is_err());
    }
}
