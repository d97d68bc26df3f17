//! Codec configuration.
//!
//! All tunables are plain fields with conservative defaults; the presets
//! cover the common "small corpus on a laptop" and "large corpus on a
//! many-core box" shapes. `validate` runs once at session construction so
//! the pipeline itself never has to re-check limits.

use crate::core::error::{CodecError, Result};

/// Tunable parameters for encode, restore, and verify sessions.
///
/// # Example
///
/// ```
/// use phrasebook::CodecConfig;
///
/// let config = CodecConfig::default()
///     .with_min_word_count(3)
///     .with_encoded_shard_bytes(8 * 1024 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Minimum number of occurrences before a word earns a dictionary code.
    pub min_word_count: u64,

    /// Minimum number of occurrences before a sentence earns a dictionary code.
    pub min_sentence_count: u64,

    /// Longest token run a sentence candidate may span.
    pub max_sentence_tokens: usize,

    /// Longest byte length a sentence candidate may span.
    pub max_sentence_bytes: usize,

    /// Target size for dictionary shard files.
    pub dict_shard_bytes: usize,

    /// Target size for encoded shard files.
    pub encoded_shard_bytes: usize,

    /// Tokens accumulated per parallel work block.
    pub block_tokens: usize,

    /// Read buffer for streaming tokenization, and write buffer for restore
    /// output.
    pub io_buffer_bytes: usize,

    /// Capacity of the sentence-expansion cache used during restore.
    pub expansion_cache_entries: usize,

    /// Upper bound on resident frequency-table memory during the counting
    /// pass. Exceeding it aborts the encode with `ResourceExhausted`.
    pub table_budget_bytes: usize,

    /// Worker cap for parallel phases. `0` means one worker per logical CPU.
    pub worker_threads: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            min_word_count: 2,
            min_sentence_count: 2,
            max_sentence_tokens: 64,
            max_sentence_bytes: 4096,
            dict_shard_bytes: 4 * 1024 * 1024,
            encoded_shard_bytes: 16 * 1024 * 1024,
            block_tokens: 64 * 1024,
            io_buffer_bytes: 1024 * 1024,
            expansion_cache_entries: 4096,
            table_budget_bytes: 1024 * 1024 * 1024,
            worker_threads: 0,
        }
    }
}

impl CodecConfig {
    /// Preset for small corpora and tests: tiny shards, tiny blocks, so that
    /// rotation and multi-shard paths are exercised without gigabytes of
    /// input.
    pub fn small() -> Self {
        Self {
            dict_shard_bytes: 64 * 1024,
            encoded_shard_bytes: 256 * 1024,
            block_tokens: 4 * 1024,
            io_buffer_bytes: 64 * 1024,
            expansion_cache_entries: 256,
            table_budget_bytes: 64 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Preset for multi-gigabyte corpora on a many-core machine.
    pub fn large() -> Self {
        Self {
            dict_shard_bytes: 16 * 1024 * 1024,
            encoded_shard_bytes: 64 * 1024 * 1024,
            block_tokens: 256 * 1024,
            io_buffer_bytes: 8 * 1024 * 1024,
            expansion_cache_entries: 16 * 1024,
            table_budget_bytes: 8 * 1024 * 1024 * 1024,
            ..Self::default()
        }
    }

    pub fn with_min_word_count(mut self, count: u64) -> Self {
        self.min_word_count = count;
        self
    }

    pub fn with_min_sentence_count(mut self, count: u64) -> Self {
        self.min_sentence_count = count;
        self
    }

    pub fn with_max_sentence_tokens(mut self, tokens: usize) -> Self {
        self.max_sentence_tokens = tokens;
        self
    }

    pub fn with_max_sentence_bytes(mut self, bytes: usize) -> Self {
        self.max_sentence_bytes = bytes;
        self
    }

    pub fn with_dict_shard_bytes(mut self, bytes: usize) -> Self {
        self.dict_shard_bytes = bytes;
        self
    }

    pub fn with_encoded_shard_bytes(mut self, bytes: usize) -> Self {
        self.encoded_shard_bytes = bytes;
        self
    }

    pub fn with_block_tokens(mut self, tokens: usize) -> Self {
        self.block_tokens = tokens;
        self
    }

    pub fn with_io_buffer_bytes(mut self, bytes: usize) -> Self {
        self.io_buffer_bytes = bytes;
        self
    }

    pub fn with_expansion_cache_entries(mut self, entries: usize) -> Self {
        self.expansion_cache_entries = entries;
        self
    }

    pub fn with_table_budget_bytes(mut self, bytes: usize) -> Self {
        self.table_budget_bytes = bytes;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Number of workers parallel phases should use.
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads == 0 {
            rayon::current_num_threads().max(1)
        } else {
            self.worker_threads
        }
    }

    /// Rejects configurations the pipeline cannot honor.
    ///
    /// Sentence candidates need at least two tokens, so a token cap below 2
    /// would make every candidate impossible; zero-sized buffers and shards
    /// would wedge the streaming loops.
    pub fn validate(&self) -> Result<()> {
        // A minimum of 1 admits every seen entry; only 0 is meaningless.
        if self.min_word_count == 0 {
            return Err(CodecError::InvalidConfig(
                "min_word_count must be non-zero".into(),
            ));
        }
        if self.min_sentence_count == 0 {
            return Err(CodecError::InvalidConfig(
                "min_sentence_count must be non-zero".into(),
            ));
        }
        if self.max_sentence_tokens < 2 {
            return Err(CodecError::InvalidConfig(
                "max_sentence_tokens must be at least 2".into(),
            ));
        }
        if self.max_sentence_bytes == 0 {
            return Err(CodecError::InvalidConfig(
                "max_sentence_bytes must be non-zero".into(),
            ));
        }
        if self.dict_shard_bytes == 0 || self.encoded_shard_bytes == 0 {
            return Err(CodecError::InvalidConfig(
                "shard byte targets must be non-zero".into(),
            ));
        }
        // Parallel blocks carry a tail of one sentence span across unsafe
        // cuts; the carry only stays behind the cut point when a block spans
        // at least two sentence caps.
        if self.block_tokens < self.max_sentence_tokens * 2 {
            return Err(CodecError::InvalidConfig(
                "block_tokens must be at least twice max_sentence_tokens".into(),
            ));
        }
        if self.io_buffer_bytes == 0 {
            return Err(CodecError::InvalidConfig(
                "io_buffer_bytes must be non-zero".into(),
            ));
        }
        if self.expansion_cache_entries == 0 {
            return Err(CodecError::InvalidConfig(
                "expansion_cache_entries must be non-zero".into(),
            ));
        }
        if self.table_budget_bytes == 0 {
            return Err(CodecError::InvalidConfig(
                "table_budget_bytes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
