//! Data preparation: raw review ingestion, activity filtering and encoding
//!
//! Consumes gzip-compressed line-delimited JSON review records, drops
//! non-positive ratings, applies a single-pass two-sided frequency filter and
//! encodes the surviving identifiers to dense indices. The output is the
//! normalized interaction table every other stage reads.

use crate::error::{PipelineError, Result};
use flate2::read::GzDecoder;
use reco_lab_core::{ExperimentTracker, PipelineConfig, RunRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Raw review record as found in the input feed. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawInteraction {
    #[serde(rename = "reviewerID")]
    pub user_id: String,
    #[serde(rename = "asin")]
    pub item_id: String,
    #[serde(rename = "overall")]
    pub rating: f32,
}

/// One row of the normalized interaction table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_idx: u32,
    pub item_idx: u32,
    pub rating: f32,
}

/// Read gzip NDJSON reviews. A line that fails to parse or lacks a required
/// field fails the whole run.
pub fn read_raw(path: &Path) -> Result<Vec<RawInteraction>> {
    let file = open_artifact(path)?;
    let reader = BufReader::new(GzDecoder::new(file));

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawInteraction =
            serde_json::from_str(&line).map_err(|e| PipelineError::MalformedRecord {
                line: i + 1,
                reason: e.to_string(),
            })?;
        records.push(record);
    }
    Ok(records)
}

/// Drop records with a non-positive rating.
pub fn clean(records: Vec<RawInteraction>) -> Vec<RawInteraction> {
    records.into_iter().filter(|r| r.rating > 0.0).collect()
}

/// Single-pass two-sided frequency filter.
///
/// Per-user and per-item counts are computed once over the cleaned set; a row
/// survives when its user has at least `min_user` rows AND its item at least
/// `min_item` rows in those pre-filter counts. The filter is intentionally
/// not re-applied after the item side removes rows, so a surviving user may
/// end up below the user threshold in the joint result. This matches the
/// documented behavior of the upstream data preparation job.
pub fn filter_active(
    mut records: Vec<RawInteraction>,
    min_user: usize,
    min_item: usize,
) -> Result<Vec<RawInteraction>> {
    let mut user_counts: HashMap<String, usize> = HashMap::new();
    let mut item_counts: HashMap<String, usize> = HashMap::new();
    for record in &records {
        *user_counts.entry(record.user_id.clone()).or_insert(0) += 1;
        *item_counts.entry(record.item_id.clone()).or_insert(0) += 1;
    }

    records.retain(|r| {
        user_counts[&r.user_id] >= min_user && item_counts[&r.item_id] >= min_item
    });

    if records.is_empty() {
        return Err(PipelineError::EmptyAfterFiltering {
            stage: "frequency filtering",
        });
    }
    Ok(records)
}

/// Assigns each distinct identifier a dense index in first-seen order.
/// Encoding the same input twice yields the same assignment.
#[derive(Debug, Default)]
pub struct IdEncoder {
    indices: HashMap<String, u32>,
}

impl IdEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, id: &str) -> u32 {
        if let Some(&idx) = self.indices.get(id) {
            idx
        } else {
            let idx = self.indices.len() as u32;
            self.indices.insert(id.to_string(), idx);
            idx
        }
    }

    pub fn get(&self, id: &str) -> Option<u32> {
        self.indices.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Encode filtered records to the normalized table, returning the table and
/// the user/item vocabularies.
pub fn encode_interactions(records: &[RawInteraction]) -> (Vec<Interaction>, IdEncoder, IdEncoder) {
    let mut users = IdEncoder::new();
    let mut items = IdEncoder::new();

    let rows = records
        .iter()
        .map(|r| Interaction {
            user_idx: users.encode(&r.user_id),
            item_idx: items.encode(&r.item_id),
            rating: r.rating,
        })
        .collect();

    (rows, users, items)
}

/// Write the interaction table as CSV with a `user_idx,item_idx,rating`
/// header. The file only appears once fully written.
pub fn write_interactions(path: &Path, rows: &[Interaction]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    write_atomic(path, &bytes)
}

/// Read an interaction table written by [`write_interactions`].
pub fn read_interactions(path: &Path) -> Result<Vec<Interaction>> {
    let file = open_artifact(path)?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Open an upstream artifact, mapping a missing file to `ArtifactNotFound`.
pub(crate) fn open_artifact(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::ArtifactNotFound(path.to_path_buf()),
        _ => PipelineError::Io(e),
    })
}

/// Write bytes to a temp file next to the target and rename into place, so a
/// crash mid-write never leaves a partial artifact under the final name.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Full data preparation stage: read, clean, filter, encode, persist.
pub fn prepare(config: &PipelineConfig, tracker: &dyn ExperimentTracker) -> Result<Vec<Interaction>> {
    let raw = read_raw(&config.paths.raw_input)?;
    info!(records = raw.len(), path = %config.paths.raw_input.display(), "loaded raw reviews");

    let cleaned = clean(raw);
    let filtered = filter_active(
        cleaned,
        config.min_user_interactions,
        config.min_item_interactions,
    )?;
    info!(interactions = filtered.len(), "filtered to active users and items");

    let (rows, users, items) = encode_interactions(&filtered);
    write_interactions(&config.paths.interactions, &rows)?;
    info!(
        users = users.len(),
        items = items.len(),
        path = %config.paths.interactions.display(),
        "saved normalized interactions"
    );

    let mut run = RunRecord::new("prepare_data");
    run.log_param("min_user_interactions", config.min_user_interactions);
    run.log_param("min_item_interactions", config.min_item_interactions);
    run.log_metric("num_interactions", rows.len() as f64);
    run.log_metric("num_users", users.len() as f64);
    run.log_metric("num_items", items.len() as f64);
    run.log_artifact(&config.paths.interactions);
    tracker.record(run)?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn raw(user: &str, item: &str, rating: f32) -> RawInteraction {
        RawInteraction {
            user_id: user.to_string(),
            item_id: item.to_string(),
            rating,
        }
    }

    fn write_gz_lines(path: &Path, lines: &[&str]) {
        let file = File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        for line in lines {
            writeln!(encoder, "{}", line).unwrap();
        }
        encoder.finish().unwrap();
    }

    #[test]
    fn test_read_raw_parses_reviews() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.json.gz");
        write_gz_lines(
            &path,
            &[
                r#"{"reviewerID": "u1", "asin": "i1", "overall": 5.0, "summary": "great"}"#,
                r#"{"reviewerID": "u2", "asin": "i2", "overall": 3.0}"#,
            ],
        );

        let records = read_raw(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, "u1");
        assert_eq!(records[1].rating, 3.0);
    }

    #[test]
    fn test_read_raw_malformed_record_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviews.json.gz");
        write_gz_lines(
            &path,
            &[
                r#"{"reviewerID": "u1", "asin": "i1", "overall": 5.0}"#,
                r#"{"reviewerID": "u2", "overall": 3.0}"#,
            ],
        );

        let err = read_raw(&path).unwrap_err();
        match err {
            PipelineError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_read_raw_missing_file() {
        let err = read_raw(Path::new("/nonexistent/reviews.json.gz")).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_clean_drops_non_positive_ratings() {
        let records = vec![raw("u1", "i1", 5.0), raw("u2", "i2", 0.0), raw("u3", "i3", -1.0)];
        let cleaned = clean(records);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].user_id, "u1");
    }

    #[test]
    fn test_filter_active_two_sided() {
        // u1 has 3 rows, u2 has 1; i1 has 2 rows, i2 has 2
        let records = vec![
            raw("u1", "i1", 4.0),
            raw("u1", "i2", 4.0),
            raw("u1", "i1", 4.0),
            raw("u2", "i2", 4.0),
        ];

        let filtered = filter_active(records, 2, 2).unwrap();
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|r| r.user_id == "u1"));
    }

    #[test]
    fn test_filter_active_counts_are_pre_filter() {
        // i2 survives on pre-filter counts even though one of its rows
        // belongs to a user that gets dropped.
        let records = vec![
            raw("u1", "i1", 4.0),
            raw("u1", "i2", 4.0),
            raw("u2", "i2", 4.0),
        ];

        let filtered = filter_active(records, 2, 2).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().any(|r| r.item_id == "i2"));
    }

    #[test]
    fn test_filter_active_empty_result() {
        let records = vec![raw("u1", "i1", 4.0)];
        let err = filter_active(records, 5, 10).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyAfterFiltering { .. }));
    }

    #[test]
    fn test_encoder_first_seen_order() {
        let mut encoder = IdEncoder::new();
        assert_eq!(encoder.encode("b"), 0);
        assert_eq!(encoder.encode("a"), 1);
        assert_eq!(encoder.encode("b"), 0);
        assert_eq!(encoder.len(), 2);
    }

    #[test]
    fn test_encoding_idempotent() {
        let records = vec![
            raw("u2", "i3", 4.0),
            raw("u1", "i1", 3.0),
            raw("u2", "i1", 5.0),
        ];

        let (first, _, _) = encode_interactions(&records);
        let (second, _, _) = encode_interactions(&records);
        assert_eq!(first, second);
        assert_eq!(first[0], Interaction { user_idx: 0, item_idx: 0, rating: 4.0 });
        assert_eq!(first[1], Interaction { user_idx: 1, item_idx: 1, rating: 3.0 });
        assert_eq!(first[2], Interaction { user_idx: 0, item_idx: 1, rating: 5.0 });
    }

    #[test]
    fn test_interactions_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("interactions.csv");
        let rows = vec![
            Interaction { user_idx: 0, item_idx: 2, rating: 4.5 },
            Interaction { user_idx: 1, item_idx: 0, rating: 1.0 },
        ];

        write_interactions(&path, &rows).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("user_idx,item_idx,rating"));

        let loaded = read_interactions(&path).unwrap();
        assert_eq!(loaded, rows);
    }

    #[test]
    fn test_read_interactions_missing_file() {
        let err = read_interactions(Path::new("/nonexistent/interactions.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactNotFound(_)));
    }
}
