//! Parallel frequency counting over the corpus.
//!
//! The first encode pass streams the input once and tallies how often each
//! word token and each sentence candidate occurs. Blocks of segments are
//! counted independently on the Rayon pool into per-block partial tables,
//! then merged into the global tables by key-wise addition. Addition is
//! associative and commutative and blocks are merged in stream order, so
//! the resulting tables are identical for any worker count.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::path::Path;

use super::config::CodecConfig;
use super::error::{CodecError, Result};
use super::tokenizer::{Segment, SegmentStream};

/// Rough resident cost of one table entry beyond its key bytes: the key's
/// Vec header, the count, and hash-slot overhead.
const ENTRY_OVERHEAD: usize = 48;

/// Occurrence tables produced by the counting pass.
#[derive(Debug, Default)]
pub struct FrequencyTables {
    /// Word token payload to occurrence count.
    pub word_counts: FxHashMap<Vec<u8>, u64>,
    /// Sentence candidate bytes to occurrence count.
    pub sentence_counts: FxHashMap<Vec<u8>, u64>,
    /// Total input bytes seen.
    pub corpus_bytes: u64,
    /// Total tokens seen.
    pub token_count: u64,
    approx_table_bytes: usize,
}

impl FrequencyTables {
    /// Estimated resident size of both tables.
    pub fn approx_table_bytes(&self) -> usize {
        self.approx_table_bytes
    }

    fn merge(&mut self, partial: BlockCounts) {
        self.corpus_bytes += partial.bytes;
        self.token_count += partial.tokens;
        merge_counts(
            &mut self.word_counts,
            partial.words,
            &mut self.approx_table_bytes,
        );
        merge_counts(
            &mut self.sentence_counts,
            partial.sentences,
            &mut self.approx_table_bytes,
        );
    }
}

fn merge_counts(
    into: &mut FxHashMap<Vec<u8>, u64>,
    from: FxHashMap<Vec<u8>, u64>,
    approx_bytes: &mut usize,
) {
    for (key, count) in from {
        match into.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                *slot.get_mut() += count;
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                *approx_bytes += slot.key().len() + ENTRY_OVERHEAD;
                slot.insert(count);
            }
        }
    }
}

/// Per-block partial tallies.
struct BlockCounts {
    words: FxHashMap<Vec<u8>, u64>,
    sentences: FxHashMap<Vec<u8>, u64>,
    bytes: u64,
    tokens: u64,
}

fn count_block(block: &[Segment]) -> BlockCounts {
    let mut words: FxHashMap<Vec<u8>, u64> = FxHashMap::default();
    let mut sentences: FxHashMap<Vec<u8>, u64> = FxHashMap::default();
    let mut bytes = 0u64;
    let mut tokens = 0u64;

    for segment in block {
        for token in &segment.tokens {
            bytes += token.bytes.len() as u64;
            tokens += 1;
            // Whitespace and punctuation never earn codes.
            if token.is_word() {
                *words.entry(token.bytes.clone()).or_insert(0) += 1;
            }
        }
        if segment.candidate {
            *sentences.entry(segment.concat_bytes()).or_insert(0) += 1;
        }
    }

    BlockCounts {
        words,
        sentences,
        bytes,
        tokens,
    }
}

/// Streams `path` once and returns the full occurrence tables.
///
/// Fails with `ResourceExhausted` when the tables outgrow the configured
/// budget; the caller surfaces that instead of letting the process get
/// killed by the OS on a pathological corpus.
pub fn collect_from_path(path: &Path, config: &CodecConfig) -> Result<FrequencyTables> {
    let mut stream = SegmentStream::open(path, config)?;
    collect_from_stream(&mut stream, config)
}

/// Counting pass over an already-open segment stream.
pub fn collect_from_stream<R: std::io::Read>(
    stream: &mut SegmentStream<R>,
    config: &CodecConfig,
) -> Result<FrequencyTables> {
    let wave_size = config.effective_workers();
    let margin = config.max_sentence_tokens - 1;
    let mut tables = FrequencyTables::default();

    loop {
        let mut wave: Vec<Vec<Segment>> = Vec::with_capacity(wave_size);
        while wave.len() < wave_size {
            match stream.next_block(config.block_tokens, margin)? {
                Some(block) => wave.push(block),
                None => break,
            }
        }
        if wave.is_empty() {
            break;
        }

        let partials: Vec<BlockCounts> = wave.par_iter().map(|b| count_block(b)).collect();
        for partial in partials {
            tables.merge(partial);
        }

        if tables.approx_table_bytes() > config.table_budget_bytes {
            return Err(CodecError::ResourceExhausted(format!(
                "frequency tables passed {} bytes (budget {})",
                tables.approx_table_bytes(),
                config.table_budget_bytes
            )));
        }
    }

    tracing::debug!(
        corpus_bytes = tables.corpus_bytes,
        tokens = tables.token_count,
        distinct_words = tables.word_counts.len(),
        distinct_sentences = tables.sentence_counts.len(),
        table_bytes = tables.approx_table_bytes(),
        "frequency pass complete"
    );
    Ok(tables)
}
