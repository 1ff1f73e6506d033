pub mod codec;
pub mod config;
pub mod enroll;
pub mod matcher;
pub mod store;

// Re-export vision types for convenience
pub use eyedentify_vision::{
    face, pipeline, Detection, EmbedOptions, Embedding, ModelPaths, Pipeline, VisionError,
    EMBED_DIM,
};

pub use enroll::enroll;
pub use matcher::{find_best_match, MatchPolicy, MatchReport, MatchStatus, MatchedIdentity};
pub use store::{IdentityAttributes, IdentityRecord, IdentityStore, StoreError};
