//! Enrollment: the only write path into the identity store.

use eyedentify_vision::Embedding;

use crate::codec;
use crate::store::{IdentityAttributes, IdentityRecord, IdentityStore, StoreError};

/// Add one face sample under `name`.
///
/// A known name gets the embedding and image reference appended (keeping the
/// two sequences index-aligned) and its attributes replaced with the
/// supplied ones; an unknown name gets a fresh single-sample record. The
/// record is written in one atomic store update, so a failure leaves the
/// previous version intact rather than a partial append.
pub fn enroll(
    store: &IdentityStore,
    name: &str,
    embedding: &Embedding,
    image_ref: impl Into<String>,
    attributes: IdentityAttributes,
) -> Result<IdentityRecord, StoreError> {
    let mut record = store
        .get(name)?
        .unwrap_or_else(|| IdentityRecord::new(name));

    record.embeddings.push(codec::encode(embedding));
    record.image_refs.push(image_ref.into());
    record.attributes = attributes;

    store.put(&record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyedentify_vision::{face::l2_normalize, EMBED_DIM};
    use tempfile::TempDir;

    fn unit(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBED_DIM];
        v[axis] = 1.0;
        Embedding::from_vec(l2_normalize(v))
    }

    #[test]
    fn test_first_enrollment_creates_record() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        let rec = enroll(
            &store,
            "alice",
            &unit(0),
            "img-0",
            IdentityAttributes::default(),
        )
        .unwrap();
        assert_eq!(rec.embeddings.len(), 1);
        assert_eq!(rec.image_refs, vec!["img-0".to_string()]);
        assert_eq!(store.get("alice").unwrap().unwrap(), rec);
    }

    #[test]
    fn test_repeat_enrollment_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        enroll(&store, "alice", &unit(0), "img-0", IdentityAttributes::default()).unwrap();
        let rec = enroll(&store, "alice", &unit(1), "img-1", IdentityAttributes::default())
            .unwrap();

        assert_eq!(rec.embeddings.len(), 2);
        assert_eq!(rec.image_refs, vec!["img-0".to_string(), "img-1".to_string()]);
        // Index correspondence: sample i decodes to the embedding enrolled i-th.
        let first = codec::decode(&rec.embeddings[0]).unwrap();
        let second = codec::decode(&rec.embeddings[1]).unwrap();
        assert_eq!(first, unit(0));
        assert_eq!(second, unit(1));
    }

    #[test]
    fn test_attributes_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();

        let old = IdentityAttributes {
            age: Some("30".into()),
            description: Some("first note".into()),
        };
        let new = IdentityAttributes {
            age: Some("31".into()),
            description: None,
        };
        enroll(&store, "alice", &unit(0), "img-0", old).unwrap();
        let rec = enroll(&store, "alice", &unit(1), "img-1", new.clone()).unwrap();

        // Wholesale replacement, no merging of old fields.
        assert_eq!(rec.attributes, new);
    }
}
