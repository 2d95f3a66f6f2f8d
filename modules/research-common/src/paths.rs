//! Persistence layout: every on-disk path other components use is
//! built here, under one configured root, so the layout only changes in
//! one place.

use std::path::{Path, PathBuf};

use crate::types::LinkKind;

pub fn batch_dir(root: &Path, batch_id: &str) -> PathBuf {
    root.join("batches").join(batch_id)
}

/// One file per `(link_id, kind)` pair, not per `link_id` alone: a single
/// link can carry more than one scraping task of different kinds (a video's
/// transcript and its comments are separate tasks against the same
/// link_id), and each must land at a distinct path.
pub fn artifact_path(root: &Path, batch_id: &str, link_id: &str, kind: LinkKind) -> PathBuf {
    batch_dir(root, batch_id).join("artifacts").join(format!("{link_id}_{kind}.json"))
}

pub fn summary_path(root: &Path, batch_id: &str, link_id: &str) -> PathBuf {
    batch_dir(root, batch_id).join("summaries").join(format!("{link_id}.json"))
}

pub fn session_path(root: &Path, session_id: &str) -> PathBuf {
    root.join("sessions").join(format!("{session_id}.json"))
}

pub fn report_path(root: &Path, session_id: &str) -> PathBuf {
    root.join("reports").join(format!("{session_id}.md"))
}
