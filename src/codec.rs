//! Storage encoding for embedding vectors.
//!
//! A vector is serialized as its f32 components in little-endian byte order
//! and base64-encoded with the standard alphabet: a single text-safe scalar
//! that survives document-store fields and JSON transport, and round-trips
//! every f32 bit pattern exactly.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use eyedentify_vision::{Embedding, EMBED_DIM};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("corrupt stored embedding: {0}")]
    CorruptEmbedding(String),
}

pub fn encode(embedding: &Embedding) -> String {
    let mut bytes = Vec::with_capacity(embedding.dim() * 4);
    for x in embedding.vector.iter() {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

pub fn decode(encoded: &str) -> Result<Embedding, CodecError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CodecError::CorruptEmbedding(e.to_string()))?;

    if bytes.len() % 4 != 0 {
        return Err(CodecError::CorruptEmbedding(format!(
            "byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let components: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if components.len() != EMBED_DIM {
        return Err(CodecError::CorruptEmbedding(format!(
            "expected {} components, got {}",
            EMBED_DIM,
            components.len()
        )));
    }

    Ok(Embedding::from_vec(components))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyedentify_vision::face::l2_normalize;
    use rand::Rng;

    fn random_unit() -> Embedding {
        let mut rng = rand::thread_rng();
        let raw: Vec<f32> = (0..EMBED_DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        Embedding::from_vec(l2_normalize(raw))
    }

    #[test]
    fn test_round_trip_exact() {
        for _ in 0..10 {
            let v = random_unit();
            let decoded = decode(&encode(&v)).unwrap();
            // Bit-exact, not approximate.
            for (a, b) in v.vector.iter().zip(decoded.vector.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_round_trip_awkward_values() {
        let mut raw = vec![0.0f32; EMBED_DIM];
        raw[0] = -0.0;
        raw[1] = f32::MIN_POSITIVE;
        raw[2] = 1e-40; // subnormal
        raw[3] = -1.0;
        raw[4] = 1.0;
        let v = Embedding::from_vec(raw);
        let decoded = decode(&encode(&v)).unwrap();
        for (a, b) in v.vector.iter().zip(decoded.vector.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_encoded_form_is_text_safe() {
        let s = encode(&random_unit());
        assert!(s.is_ascii());
        assert!(!s.contains(|c: char| c.is_control()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode("not base64 at all!!!"),
            Err(CodecError::CorruptEmbedding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let s = encode(&random_unit());
        // Chop off a chunk: still valid base64 after realignment, wrong size.
        let truncated = &s[..s.len() / 2 - (s.len() / 2) % 4];
        assert!(matches!(
            decode(truncated),
            Err(CodecError::CorruptEmbedding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_dimensionality() {
        let short = STANDARD.encode([0u8; 16]); // 4 floats, not EMBED_DIM
        assert!(matches!(
            decode(&short),
            Err(CodecError::CorruptEmbedding(_))
        ));
    }
}
