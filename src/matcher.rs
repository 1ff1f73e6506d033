//! Gallery matching: stream enrolled identities, score every stored sample
//! against the query, and classify the result.

use eyedentify_vision::face::{similarity, similarity_batch};
use eyedentify_vision::{Embedding, EMBED_DIM};
use ndarray::Array2;
use serde::Serialize;

use crate::codec;
use crate::store::{IdentityAttributes, IdentityRecord, StoreError};

/// Decision thresholds for a scan.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    /// Minimum score for [`MatchStatus::Recognized`].
    pub recognition_threshold: f32,
    /// Reserved lower bound for a "possible match" tier. Carried here so
    /// deployments can tune it, but the decision below never consults it; a
    /// near-miss is reported as not recognized with its score.
    pub rejection_threshold: f32,
    /// Stop scanning once the running best reaches this score.
    pub high_confidence_early_exit: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.50,
            rejection_threshold: 0.30,
            high_confidence_early_exit: 0.90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Recognized,
    NotRecognized,
    EmptyGallery,
}

/// The winning identity and the stored sample that produced the best score.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedIdentity {
    pub name: String,
    pub image_ref: String,
    pub attributes: IdentityAttributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub status: MatchStatus,
    /// Highest similarity seen; -1.0 when nothing was scored.
    pub best_score: f32,
    /// Present only for [`MatchStatus::Recognized`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<MatchedIdentity>,
}

/// Scan the gallery for the stored sample most similar to `query`.
///
/// `gallery` is a stream of records (errors from the backing store abort the
/// scan); an abandoned caller can simply stop driving the iterator, which
/// halts the scan between records. Corrupt stored samples are logged and
/// skipped without failing the rest of the gallery. Ties keep the
/// first-seen sample, so the outcome is deterministic in scan order. Once
/// the running best reaches `policy.high_confidence_early_exit` the scan
/// stops without visiting the remaining records.
pub fn find_best_match<I>(
    query: &Embedding,
    gallery: I,
    policy: &MatchPolicy,
) -> Result<MatchReport, StoreError>
where
    I: IntoIterator<Item = Result<IdentityRecord, StoreError>>,
{
    let mut best_score = -1.0f32;
    let mut best: Option<MatchedIdentity> = None;
    let mut scanned = false;

    for record in gallery {
        let record = record?;
        scanned = true;

        if let Some((score, image_ref)) = best_sample(query, &record) {
            if score > best_score {
                best_score = score;
                best = Some(MatchedIdentity {
                    name: record.name.clone(),
                    image_ref,
                    attributes: record.attributes.clone(),
                });
            }
        }

        if best_score >= policy.high_confidence_early_exit {
            break;
        }
    }

    if !scanned {
        return Ok(MatchReport {
            status: MatchStatus::EmptyGallery,
            best_score: -1.0,
            identity: None,
        });
    }

    if best_score >= policy.recognition_threshold {
        Ok(MatchReport {
            status: MatchStatus::Recognized,
            best_score,
            identity: best,
        })
    } else {
        Ok(MatchReport {
            status: MatchStatus::NotRecognized,
            best_score,
            identity: None,
        })
    }
}

/// Best-scoring stored sample of one identity, with its image reference.
///
/// Identities with several samples are scored in one batched
/// matrix-vector product; a single sample takes the scalar path. Both pick
/// the earliest sample on ties (strict `>`). Returns `None` when every
/// sample failed to decode.
fn best_sample(query: &Embedding, record: &IdentityRecord) -> Option<(f32, String)> {
    let mut decoded: Vec<(usize, Embedding)> = Vec::with_capacity(record.embeddings.len());
    for (i, encoded) in record.embeddings.iter().enumerate() {
        match codec::decode(encoded) {
            Ok(embedding) => decoded.push((i, embedding)),
            Err(e) => log::warn!("skipping sample {} of '{}': {}", i, record.name, e),
        }
    }

    let (best_idx, best_score) = match decoded.as_slice() {
        [] => return None,
        [(i, embedding)] => (*i, similarity(query, embedding)),
        samples => {
            let mut flat = Vec::with_capacity(samples.len() * EMBED_DIM);
            for (_, embedding) in samples {
                flat.extend(embedding.vector.iter().copied());
            }
            let matrix = Array2::from_shape_vec((samples.len(), EMBED_DIM), flat).ok()?;
            let scores = similarity_batch(query, &matrix.view());

            let mut best_row = 0;
            for row in 1..samples.len() {
                if scores[row] > scores[best_row] {
                    best_row = row;
                }
            }
            (samples[best_row].0, scores[best_row])
        }
    };

    record
        .image_refs
        .get(best_idx)
        .map(|image_ref| (best_score, image_ref.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit vector whose dot product with `query()` is exactly `sim`.
    fn with_similarity(sim: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBED_DIM];
        v[0] = sim;
        v[1] = (1.0 - sim * sim).max(0.0).sqrt();
        Embedding::from_vec(v)
    }

    fn query() -> Embedding {
        let mut v = vec![0.0f32; EMBED_DIM];
        v[0] = 1.0;
        Embedding::from_vec(v)
    }

    fn record(name: &str, sims: &[f32]) -> IdentityRecord {
        IdentityRecord {
            name: name.to_string(),
            embeddings: sims
                .iter()
                .map(|&s| codec::encode(&with_similarity(s)))
                .collect(),
            image_refs: (0..sims.len()).map(|i| format!("{name}-{i}")).collect(),
            attributes: IdentityAttributes::default(),
        }
    }

    fn gallery(records: Vec<IdentityRecord>) -> Vec<Result<IdentityRecord, StoreError>> {
        records.into_iter().map(Ok).collect()
    }

    #[test]
    fn test_empty_gallery_is_its_own_status() {
        let report = find_best_match(&query(), gallery(vec![]), &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::EmptyGallery);
        assert!(report.identity.is_none());
    }

    #[test]
    fn test_recognizes_best_identity() {
        let g = gallery(vec![record("bob", &[0.55]), record("alice", &[0.92])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::Recognized);
        assert_eq!(report.identity.as_ref().unwrap().name, "alice");
        assert!((report.best_score - 0.92).abs() < 1e-5);
    }

    #[test]
    fn test_below_threshold_reports_score_without_identity() {
        let g = gallery(vec![record("alice", &[0.40])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::NotRecognized);
        assert!((report.best_score - 0.40).abs() < 1e-5);
        assert!(report.identity.is_none());
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        // 0.5 is exactly representable, so the decoded score is exact.
        let g = gallery(vec![record("alice", &[0.5])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::Recognized);

        let g = gallery(vec![record("alice", &[0.49])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::NotRecognized);
    }

    #[test]
    fn test_tie_break_keeps_first_seen() {
        let g = gallery(vec![record("first", &[0.6]), record("second", &[0.6])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.identity.as_ref().unwrap().name, "first");

        // Same within one identity: the earlier sample's image wins.
        let g = gallery(vec![record("alice", &[0.6, 0.6])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.identity.as_ref().unwrap().image_ref, "alice-0");
    }

    #[test]
    fn test_best_sample_picked_within_identity() {
        let g = gallery(vec![record("alice", &[0.2, 0.7, 0.4])]);
        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::Recognized);
        assert!((report.best_score - 0.7).abs() < 1e-5);
        assert_eq!(report.identity.as_ref().unwrap().image_ref, "alice-1");
    }

    #[test]
    fn test_early_exit_returns_same_match() {
        let g = vec![record("alice", &[0.92]), record("bob", &[0.55])];

        let exhaustive = MatchPolicy {
            high_confidence_early_exit: 1.01, // unreachable: full scan
            ..MatchPolicy::default()
        };
        let with_exit = MatchPolicy::default();

        let a = find_best_match(&query(), gallery(g.clone()), &exhaustive).unwrap();
        let b = find_best_match(&query(), gallery(g), &with_exit).unwrap();

        assert_eq!(a.identity.as_ref().unwrap().name, "alice");
        assert_eq!(b.identity.as_ref().unwrap().name, "alice");
        assert_eq!(a.best_score, b.best_score);
    }

    #[test]
    fn test_early_exit_stops_scanning() {
        let mut polled = 0usize;
        let records = vec![record("alice", &[0.95]), record("bob", &[0.55])];
        let counting = records.into_iter().map(|r| {
            polled += 1;
            Ok(r)
        });
        // The iterator is driven lazily, so the count reflects records pulled.
        let report = find_best_match(&query(), counting, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::Recognized);
        assert_eq!(polled, 1);
    }

    #[test]
    fn test_corrupt_sample_skipped_not_fatal() {
        let mut bad = record("mallory", &[0.9]);
        bad.embeddings[0] = "@@not-an-embedding@@".to_string();
        let g = gallery(vec![bad, record("alice", &[0.6])]);

        let report = find_best_match(&query(), g, &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::Recognized);
        assert_eq!(report.identity.as_ref().unwrap().name, "alice");
    }

    #[test]
    fn test_all_samples_corrupt_reports_not_recognized() {
        let mut bad = record("mallory", &[0.9]);
        bad.embeddings[0] = "@@not-an-embedding@@".to_string();
        let report =
            find_best_match(&query(), gallery(vec![bad]), &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::NotRecognized);
        assert_eq!(report.best_score, -1.0);
    }

    #[test]
    fn test_store_error_aborts_scan() {
        let g = vec![
            Ok(record("alice", &[0.6])),
            Err(StoreError::InvalidName),
        ];
        assert!(find_best_match(&query(), g, &MatchPolicy::default()).is_err());
    }

    #[test]
    fn test_corrupt_sample_beside_valid_one_in_same_record() {
        let mut rec = record("alice", &[0.9, 0.6]);
        rec.embeddings[0] = "short".to_string();
        let report =
            find_best_match(&query(), gallery(vec![rec]), &MatchPolicy::default()).unwrap();
        assert_eq!(report.status, MatchStatus::Recognized);
        assert!((report.best_score - 0.6).abs() < 1e-5);
        // The surviving sample's image reference, not the corrupt one's.
        assert_eq!(report.identity.as_ref().unwrap().image_ref, "alice-1");
    }
}
