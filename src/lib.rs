//! phrasebook - lossless dictionary compression for large text corpora.
//!
//! Repeated sentences and repeated words are replaced by integer codes
//! drawn from two dictionaries built over the whole corpus; the encoded
//! stream plus the dictionaries restore the input byte-for-byte. Features:
//!
//! - Byte-exact round trip over arbitrary input, text or not
//! - Deterministic dictionaries: the same corpus and configuration always
//!   produce byte-identical artifacts
//! - Sharded on-disk layout with JSON manifests and SHA-256 checksums,
//!   published atomically via stage directories
//! - Rayon parallelism over token blocks and shards, with memory bounded
//!   by the configured shard and block sizes rather than corpus size
//! - Restore refuses mismatched or corrupt dictionaries before expanding
//!   anything
//!
//! # Example
//!
//! ```no_run
//! use phrasebook::Codec;
//!
//! # fn main() -> phrasebook::Result<()> {
//! let codec = Codec::default();
//! codec.encode("corpus.txt", "out/words", "out/sentences", "out/encoded")?;
//! codec.restore("out/words", "out/encoded", "restored.txt")?;
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use core::{
    encode, restore, tokenize, verify, Codec, CodecConfig, CodecError, EncodeSummary,
    EncodedUnit, Manifest, RestorePhase, RestoreSummary, Restorer, Result, SentenceDictionary,
    SentenceEntry, SentencePiece, ShardEntry, ShardKind, Token, TokenKind, VerifySummary,
    WordDictionary, WordEntry,
};
