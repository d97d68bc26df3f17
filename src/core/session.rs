//! Caller-owned codec sessions.
//!
//! A [`Codec`] is a plain value holding a validated [`CodecConfig`]; every
//! operation takes filesystem paths and runs to completion with no state
//! carried between invocations. The free functions at the bottom run one
//! operation under the default configuration.
//!
//! # Encode pipeline
//!
//! ```text
//! input --pass 1--> frequency tables --> word dict --> sentence dict
//!       --pass 2--> substitution --> encoded shards
//! ```
//!
//! All three output directories are written into stage directories and
//! published only after every shard and manifest is complete, so a failed
//! encode leaves no directory behind. The sentence dictionary is written
//! twice by construction: once as the standalone `sentence_dict_dir`
//! artifact and once embedded under `word_dict_dir/sentences/`, which is
//! the copy restore reads.

use rayon::prelude::*;
use std::fs;
use std::io;
use std::mem;
use std::path::Path;

use super::config::CodecConfig;
use super::dictionary::{SentenceDictionary, WordDictionary};
use super::error::{CodecError, Result};
use super::frequency;
use super::restore::{Restorer, RestoreSummary, VerifySummary};
use super::shard::{self, EncodedShardWriter, Manifest, ShardKind, StageDir, SENTENCE_SUBDIR};
use super::substitute::{EncodedUnit, SubstitutionEncoder};
use super::tokenizer::SegmentStream;

/// What one encode produced across its three output directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    pub corpus_bytes: u64,
    pub token_count: u64,
    pub word_entries: usize,
    pub sentence_entries: usize,
    pub encoded_units: u64,
    pub word_shards: usize,
    pub sentence_shards: usize,
    pub encoded_shards: usize,
}

/// One codec session: a validated configuration and nothing else.
#[derive(Debug, Clone)]
pub struct Codec {
    config: CodecConfig,
}

impl Codec {
    /// Creates a session, rejecting nonsensical configurations up front.
    pub fn new(config: CodecConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encodes `input` into a word dictionary, a sentence dictionary, and
    /// an encoded stream, each a sharded directory with a manifest.
    ///
    /// Runs two streaming passes over the input: one to count, one to
    /// substitute. No directory is published unless all three are complete.
    pub fn encode(
        &self,
        input: impl AsRef<Path>,
        word_dict_dir: impl AsRef<Path>,
        sentence_dict_dir: impl AsRef<Path>,
        encoded_dir: impl AsRef<Path>,
    ) -> Result<EncodeSummary> {
        self.encode_paths(
            input.as_ref(),
            word_dict_dir.as_ref(),
            sentence_dict_dir.as_ref(),
            encoded_dir.as_ref(),
        )
    }

    /// Restores the exact original bytes from a dictionary root and an
    /// encoded directory.
    pub fn restore(
        &self,
        word_dict_dir: impl AsRef<Path>,
        encoded_dir: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<RestoreSummary> {
        Restorer::new(&self.config).restore(
            word_dict_dir.as_ref(),
            encoded_dir.as_ref(),
            output_path.as_ref(),
        )
    }

    /// Runs every validation a restore would run, without expanding or
    /// writing anything.
    pub fn verify(
        &self,
        word_dict_dir: impl AsRef<Path>,
        encoded_dir: impl AsRef<Path>,
    ) -> Result<VerifySummary> {
        Restorer::new(&self.config).verify(word_dict_dir.as_ref(), encoded_dir.as_ref())
    }

    fn encode_paths(
        &self,
        input: &Path,
        word_dict_dir: &Path,
        sentence_dict_dir: &Path,
        encoded_dir: &Path,
    ) -> Result<EncodeSummary> {
        let metadata = match fs::metadata(input) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CodecError::InputNotFound(input.to_path_buf()));
            }
            Err(e) => return Err(CodecError::Io(e)),
        };
        if !metadata.is_file() {
            return Err(CodecError::InputNotFound(input.to_path_buf()));
        }

        // Pass 1: global frequency tables.
        let mut tables = frequency::collect_from_path(input, &self.config)?;
        let word_counts = mem::take(&mut tables.word_counts);
        let sentence_counts = mem::take(&mut tables.sentence_counts);

        // Word codes first; sentence payloads reference them.
        let words = WordDictionary::build(word_counts, self.config.min_word_count)?;
        let sentences =
            SentenceDictionary::build(sentence_counts, self.config.min_sentence_count, &words)?;
        tracing::debug!(
            word_entries = words.len(),
            sentence_entries = sentences.len(),
            "dictionaries built"
        );

        let word_stage = StageDir::create(word_dict_dir)?;
        let sentence_stage = StageDir::create(sentence_dict_dir)?;
        let encoded_stage = StageDir::create(encoded_dir)?;

        let (word_shards, word_records) = shard::write_word_dictionary(
            word_stage.path(),
            &words,
            self.config.dict_shard_bytes,
        )?;
        let word_manifest =
            Manifest::new(ShardKind::WordDict, tables.corpus_bytes, word_records, word_shards);

        let (sentence_shards, sentence_records) = shard::write_sentence_dictionary(
            sentence_stage.path(),
            &sentences,
            self.config.dict_shard_bytes,
        )?;
        let sentence_manifest = Manifest::new(
            ShardKind::SentenceDict,
            tables.corpus_bytes,
            sentence_records,
            sentence_shards,
        );
        shard::write_manifest(sentence_stage.path(), &sentence_manifest)?;

        // The dictionary root carries its own copy of the finished sentence
        // dictionary; restore reads that copy.
        shard::copy_dir_flat(
            sentence_stage.path(),
            &word_stage.path().join(SENTENCE_SUBDIR),
        )?;
        shard::write_manifest(word_stage.path(), &word_manifest)?;

        // Pass 2: substitute and write the encoded stream.
        let (encoded_shards, encoded_units) =
            self.write_encoded_stream(input, &words, &sentences, encoded_stage.path())?;
        let mut encoded_manifest = Manifest::new(
            ShardKind::Encoded,
            tables.corpus_bytes,
            encoded_units,
            encoded_shards,
        );
        encoded_manifest.word_dict_checksum = Some(word_manifest.checksum.clone());
        encoded_manifest.sentence_dict_checksum = Some(sentence_manifest.checksum.clone());
        shard::write_manifest(encoded_stage.path(), &encoded_manifest)?;

        word_stage.publish(word_dict_dir)?;
        sentence_stage.publish(sentence_dict_dir)?;
        encoded_stage.publish(encoded_dir)?;

        Ok(EncodeSummary {
            corpus_bytes: tables.corpus_bytes,
            token_count: tables.token_count,
            word_entries: words.len(),
            sentence_entries: sentences.len(),
            encoded_units: encoded_manifest.total_records,
            word_shards: word_manifest.shards.len(),
            sentence_shards: sentence_manifest.shards.len(),
            encoded_shards: encoded_manifest.shards.len(),
        })
    }

    /// Second streaming pass: parallel block substitution, shards written
    /// in stream order.
    fn write_encoded_stream(
        &self,
        input: &Path,
        words: &WordDictionary,
        sentences: &SentenceDictionary,
        stage_path: &Path,
    ) -> Result<(Vec<shard::ShardEntry>, u64)> {
        let encoder = SubstitutionEncoder::new(words, sentences);
        let mut stream = SegmentStream::open(input, &self.config)?;
        let mut writer = EncodedShardWriter::new(stage_path, self.config.encoded_shard_bytes);

        let workers = self.config.effective_workers();
        let margin = self.config.max_sentence_tokens - 1;
        loop {
            let mut blocks = Vec::with_capacity(workers);
            while blocks.len() < workers {
                match stream.next_block(self.config.block_tokens, margin)? {
                    Some(block) => blocks.push(block),
                    None => break,
                }
            }
            if blocks.is_empty() {
                break;
            }
            let encoded: Vec<Vec<EncodedUnit>> = blocks
                .par_iter()
                .map(|block| encoder.encode_block(block))
                .collect();
            for units in &encoded {
                writer.write_units(units)?;
            }
        }
        let (entries, total) = writer.finish()?;
        tracing::debug!(units = total, shards = entries.len(), "encoded stream written");
        Ok((entries, total))
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            config: CodecConfig::default(),
        }
    }
}

/// Encodes `input` under the default configuration.
pub fn encode(
    input: impl AsRef<Path>,
    word_dict_dir: impl AsRef<Path>,
    sentence_dict_dir: impl AsRef<Path>,
    encoded_dir: impl AsRef<Path>,
) -> Result<EncodeSummary> {
    Codec::default().encode(input, word_dict_dir, sentence_dict_dir, encoded_dir)
}

/// Restores `output_path` under the default configuration.
pub fn restore(
    word_dict_dir: impl AsRef<Path>,
    encoded_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<RestoreSummary> {
    Codec::default().restore(word_dict_dir, encoded_dir, output_path)
}

/// Verifies an encoded corpus under the default configuration.
pub fn verify(
    word_dict_dir: impl AsRef<Path>,
    encoded_dir: impl AsRef<Path>,
) -> Result<VerifySummary> {
    Codec::default().verify(word_dict_dir, encoded_dir)
}
