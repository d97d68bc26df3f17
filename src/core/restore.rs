//! Exact inverse reconstruction of an encoded corpus.
//!
//! A [`Restorer`] loads both dictionaries fully, validates every manifest
//! and shard checksum, and only then expands the encoded shards back into
//! the original byte stream. The phase order is strict:
//!
//! ```text
//! Idle -> LoadingDictionaries -> ValidatingManifest -> ExpandingShards
//!      -> Writing -> Done | Failed
//! ```
//!
//! No shard is expanded until the whole encoded directory has passed
//! checksum validation, and nothing is expanded against dictionaries the
//! encoded manifest was not paired with. Output goes to a staged sibling
//! file that is renamed over `output_path` on success.
//!
//! Shard digests are checked in parallel waves. Expansion then walks the
//! shards in order, streaming one unit at a time into the staged output,
//! so peak memory holds the dictionaries, one shard's records, and the
//! sentence cache, never any expanded span longer than a single sentence.
//! Sentence expansions are memoized in a bounded LRU cache; repeated
//! sentences are the common case in the corpora this crate targets.

use lru::LruCache;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::config::CodecConfig;
use super::dictionary::{SentenceDictionary, WordDictionary};
use super::error::{CodecError, Result};
use super::shard::{self, Manifest, ShardKind, StageFile, SENTENCE_SUBDIR};
use super::substitute::EncodedUnit;

/// Where a restore currently is; logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    LoadingDictionaries,
    ValidatingManifest,
    ExpandingShards,
    Writing,
    Done,
    Failed,
}

/// What a completed restore produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub bytes_written: u64,
    pub shards_expanded: usize,
    pub units_expanded: u64,
}

/// What a verification pass confirmed without expanding anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifySummary {
    pub corpus_bytes: u64,
    pub word_entries: usize,
    pub sentence_entries: usize,
    pub encoded_shards: usize,
}

/// Expands encoded units against loaded dictionaries.
struct SentenceExpander<'a> {
    words: &'a WordDictionary,
    sentences: &'a SentenceDictionary,
    cache: Mutex<LruCache<u32, Arc<Vec<u8>>>>,
}

impl<'a> SentenceExpander<'a> {
    fn new(
        words: &'a WordDictionary,
        sentences: &'a SentenceDictionary,
        cache_entries: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            words,
            sentences,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Bytes of one sentence code, memoized. A poisoned cache lock degrades
    /// to uncached expansion rather than failing the restore.
    fn sentence_bytes(&self, code: u32) -> Result<Arc<Vec<u8>>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&code) {
                return Ok(Arc::clone(hit));
            }
        }
        let entry = self.sentences.entry(code).ok_or_else(|| {
            CodecError::DictionaryCorrupt(format!(
                "encoded stream references unknown sentence code {code}"
            ))
        })?;
        let bytes = Arc::new(entry.expand(self.words)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(code, Arc::clone(&bytes));
        }
        Ok(bytes)
    }

    /// Writes one unit's expansion into `out`, returning its byte length.
    fn expand_unit<W: Write + ?Sized>(&self, unit: &EncodedUnit, out: &mut W) -> Result<u64> {
        let written = match unit {
            EncodedUnit::SentenceRef(code) => {
                let bytes = self.sentence_bytes(*code)?;
                out.write_all(&bytes).map_err(CodecError::DiskWriteFailure)?;
                bytes.len()
            }
            EncodedUnit::WordRef(code) => {
                let payload = self.words.payload(*code).ok_or_else(|| {
                    CodecError::DictionaryCorrupt(format!(
                        "encoded stream references unknown word code {code}"
                    ))
                })?;
                out.write_all(payload).map_err(CodecError::DiskWriteFailure)?;
                payload.len()
            }
            EncodedUnit::Literal(bytes) => {
                out.write_all(bytes).map_err(CodecError::DiskWriteFailure)?;
                bytes.len()
            }
        };
        Ok(written as u64)
    }
}

/// Everything loaded and validated ahead of expansion.
struct ValidatedInputs {
    words: WordDictionary,
    sentences: SentenceDictionary,
    encoded_manifest: Manifest,
}

/// Restores or verifies one encoded corpus; one value per operation.
pub struct Restorer {
    config: CodecConfig,
    phase: RestorePhase,
}

impl Restorer {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            config: config.clone(),
            phase: RestorePhase::Idle,
        }
    }

    pub fn phase(&self) -> RestorePhase {
        self.phase
    }

    fn set_phase(&mut self, phase: RestorePhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "restore phase");
        self.phase = phase;
    }

    /// Expands `encoded_dir` against the dictionaries rooted at
    /// `word_dict_dir` and writes the original bytes to `output_path`.
    pub fn restore(
        &mut self,
        word_dict_dir: &Path,
        encoded_dir: &Path,
        output_path: &Path,
    ) -> Result<RestoreSummary> {
        match self.run_restore(word_dict_dir, encoded_dir, output_path) {
            Ok(summary) => {
                self.set_phase(RestorePhase::Done);
                Ok(summary)
            }
            Err(e) => {
                self.set_phase(RestorePhase::Failed);
                Err(e)
            }
        }
    }

    /// Runs every load and validation step of a restore, then stops without
    /// expanding or writing anything.
    pub fn verify(&mut self, word_dict_dir: &Path, encoded_dir: &Path) -> Result<VerifySummary> {
        match self.load_and_validate(word_dict_dir, encoded_dir) {
            Ok(inputs) => {
                self.set_phase(RestorePhase::Done);
                Ok(VerifySummary {
                    corpus_bytes: inputs.encoded_manifest.corpus_bytes,
                    word_entries: inputs.words.len(),
                    sentence_entries: inputs.sentences.len(),
                    encoded_shards: inputs.encoded_manifest.shards.len(),
                })
            }
            Err(e) => {
                self.set_phase(RestorePhase::Failed);
                Err(e)
            }
        }
    }

    fn load_and_validate(
        &mut self,
        word_dict_dir: &Path,
        encoded_dir: &Path,
    ) -> Result<ValidatedInputs> {
        self.set_phase(RestorePhase::LoadingDictionaries);
        let (words, word_manifest) = shard::load_word_dictionary(word_dict_dir)?;
        let (sentences, sentence_manifest) =
            shard::load_sentence_dictionary(&word_dict_dir.join(SENTENCE_SUBDIR))?;
        tracing::debug!(
            word_entries = words.len(),
            sentence_entries = sentences.len(),
            "dictionaries loaded"
        );

        self.set_phase(RestorePhase::ValidatingManifest);
        let encoded_manifest = shard::read_manifest(encoded_dir, ShardKind::Encoded)?;
        check_pairing(
            "word",
            encoded_manifest.word_dict_checksum.as_deref(),
            &word_manifest.checksum,
        )?;
        check_pairing(
            "sentence",
            encoded_manifest.sentence_dict_checksum.as_deref(),
            &sentence_manifest.checksum,
        )?;
        // The whole stream must be intact before any of it is expanded.
        let io_buffer = self.config.io_buffer_bytes;
        for wave in encoded_manifest.shards.chunks(self.config.effective_workers()) {
            wave.par_iter().try_for_each(|entry| {
                shard::validate_shard_file(encoded_dir, entry, ShardKind::Encoded, io_buffer)
            })?;
        }
        tracing::debug!(
            shards = encoded_manifest.shards.len(),
            corpus_bytes = encoded_manifest.corpus_bytes,
            "encoded stream validated"
        );

        Ok(ValidatedInputs {
            words,
            sentences,
            encoded_manifest,
        })
    }

    fn run_restore(
        &mut self,
        word_dict_dir: &Path,
        encoded_dir: &Path,
        output_path: &Path,
    ) -> Result<RestoreSummary> {
        let inputs = self.load_and_validate(word_dict_dir, encoded_dir)?;
        let manifest = &inputs.encoded_manifest;

        self.set_phase(RestorePhase::ExpandingShards);
        let expander = SentenceExpander::new(
            &inputs.words,
            &inputs.sentences,
            self.config.expansion_cache_entries,
        );

        let stage = StageFile::create(output_path)?;
        let file = File::create(stage.path()).map_err(CodecError::DiskWriteFailure)?;
        let mut writer = BufWriter::with_capacity(self.config.io_buffer_bytes, file);

        let mut bytes_written = 0u64;
        let mut units_expanded = 0u64;
        for entry in &manifest.shards {
            // One shard's records are resident at a time; every expansion
            // goes straight to the writer.
            let data = shard::read_shard_bytes(encoded_dir, entry, ShardKind::Encoded)?;
            let units = shard::parse_encoded_shard(&data, &entry.file)?;
            let mut shard_bytes = 0u64;
            for unit in &units {
                shard_bytes += expander.expand_unit(unit, &mut writer)?;
            }
            bytes_written += shard_bytes;
            units_expanded += entry.records;
            tracing::debug!(shard = %entry.file, bytes = shard_bytes, "expanded shard");
        }

        self.set_phase(RestorePhase::Writing);
        let file = writer
            .into_inner()
            .map_err(|e| CodecError::DiskWriteFailure(e.into_error()))?;
        drop(file);
        if bytes_written != manifest.corpus_bytes {
            return Err(CodecError::EncodedStreamTruncated(format!(
                "restored {bytes_written} bytes where the manifest records {}",
                manifest.corpus_bytes
            )));
        }
        stage.publish(output_path)?;
        tracing::debug!(
            output = %output_path.display(),
            bytes = bytes_written,
            "restore complete"
        );

        Ok(RestoreSummary {
            bytes_written,
            shards_expanded: manifest.shards.len(),
            units_expanded,
        })
    }
}

fn check_pairing(which: &str, recorded: Option<&str>, actual: &str) -> Result<()> {
    match recorded {
        Some(recorded) if recorded == actual => Ok(()),
        Some(_) => Err(CodecError::DictionaryCorrupt(format!(
            "encoded stream was produced against a different {which} dictionary"
        ))),
        None => Err(CodecError::DictionaryCorrupt(format!(
            "encoded manifest records no {which} dictionary checksum"
        ))),
    }
}
