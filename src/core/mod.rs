//! Core compression engine for phrasebook.
//!
//! This module contains the hierarchical dictionary codec: repeated
//! sentences and repeated words are replaced by integer codes from two
//! dictionaries, and the encoded stream plus the dictionaries reproduce the
//! original bytes exactly.
//!
//! # Architecture
//!
//! The engine is organized leaf-first:
//!
//! - `tokenizer`: byte-class tokenization, sentence boundary detection,
//!   and segmentation of the token stream into parallel blocks
//! - `frequency`: two-pass word and sentence counting with a deterministic
//!   parallel merge
//! - `dictionary`: code assignment by frequency rank with byte-order
//!   tie-breaks, words finalized before sentences
//! - `substitute`: greedy longest-match, non-overlapping replacement of
//!   sentences, then words, with literal escapes for everything else
//! - `shard` / `varint`: bounded-size shard files, JSON manifests, SHA-256
//!   checksums, and atomic stage-then-rename publication
//! - `restore`: full-validation expansion back to the original bytes
//! - [`Codec`]: the caller-owned session value tying the passes together
//!
//! # Performance
//!
//! - **Rayon parallelism**: frequency counting, substitution, and shard
//!   expansion all run over independent blocks
//! - **FxHashMap**: frequency tables and dictionary indexes
//! - **LRU cache**: memoized sentence expansions during restore
//! - **Streamed SHA-256**: shards are hashed as they are written and read

mod config;
mod dictionary;
mod error;
mod frequency;
mod restore;
mod session;
mod shard;
mod substitute;
mod tokenizer;
mod varint;

pub use config::CodecConfig;
pub use dictionary::{
    SentenceDictionary, SentenceEntry, SentencePiece, WordDictionary, WordEntry,
};
pub use error::{CodecError, Result};
pub use restore::{RestorePhase, RestoreSummary, Restorer, VerifySummary};
pub use session::{encode, restore, verify, Codec, EncodeSummary};
pub use shard::{Manifest, ShardEntry, ShardKind};
pub use substitute::EncodedUnit;
pub use tokenizer::{tokenize, Token, TokenKind};
