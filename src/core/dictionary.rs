//! Dictionary construction and lookup.
//!
//! Both dictionaries rank their surviving entries by frequency descending,
//! breaking ties by payload byte order ascending, and assign dense `u32`
//! codes from zero in rank order. The ranking reads only the frequency
//! tables, so identical input bytes and configuration always produce
//! identical dictionaries regardless of thread count or platform.
//!
//! Construction is two-phase: [`SentenceDictionary::build`] borrows the
//! finished [`WordDictionary`], because sentence payloads are stored as
//! word-code references and must resolve against final code assignments.

use rustc_hash::FxHashMap;

use super::error::{CodecError, Result};
use super::tokenizer::tokenize;

/// Codes are `u32`, so either dictionary holds at most this many entries.
const MAX_CODES: usize = u32::MAX as usize;

/// One word-dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordEntry {
    /// Exact token bytes this code substitutes for.
    pub payload: Vec<u8>,
    /// Occurrence count at build time. Zero when loaded from disk; the
    /// persisted record format carries only code and payload.
    pub frequency: u64,
}

/// Maps recurring word tokens to dense integer codes, bijectively.
#[derive(Debug, Default)]
pub struct WordDictionary {
    entries: Vec<WordEntry>,
    index: FxHashMap<Vec<u8>, u32>,
}

impl WordDictionary {
    /// Ranks `counts` and assigns codes.
    ///
    /// Entries below `min_count` are pruned. Fails with `ResourceExhausted`
    /// if more entries survive than `u32` codes can address.
    pub fn build(counts: FxHashMap<Vec<u8>, u64>, min_count: u64) -> Result<Self> {
        let mut ranked: Vec<(Vec<u8>, u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if ranked.len() > MAX_CODES {
            return Err(CodecError::ResourceExhausted(format!(
                "word dictionary needs {} codes, the format addresses at most {}",
                ranked.len(),
                MAX_CODES
            )));
        }

        let mut entries = Vec::with_capacity(ranked.len());
        let mut index =
            FxHashMap::with_capacity_and_hasher(ranked.len(), Default::default());
        for (code, (payload, frequency)) in ranked.into_iter().enumerate() {
            index.insert(payload.clone(), code as u32);
            entries.push(WordEntry { payload, frequency });
        }
        Ok(Self { entries, index })
    }

    /// Rebuilds a dictionary from persisted payloads, in code order.
    ///
    /// A duplicate payload would break the code/payload bijection and is
    /// reported as corruption.
    pub fn from_payloads(payloads: Vec<Vec<u8>>) -> Result<Self> {
        if payloads.len() > MAX_CODES {
            return Err(CodecError::DictionaryCorrupt(format!(
                "word dictionary lists {} entries, more than u32 codes can address",
                payloads.len()
            )));
        }
        let mut entries = Vec::with_capacity(payloads.len());
        let mut index =
            FxHashMap::with_capacity_and_hasher(payloads.len(), Default::default());
        for (code, payload) in payloads.into_iter().enumerate() {
            if index.insert(payload.clone(), code as u32).is_some() {
                return Err(CodecError::DictionaryCorrupt(format!(
                    "duplicate word payload at code {code}"
                )));
            }
            entries.push(WordEntry {
                payload,
                frequency: 0,
            });
        }
        Ok(Self { entries, index })
    }

    /// Code assigned to `payload`, if present.
    #[inline]
    pub fn code_of(&self, payload: &[u8]) -> Option<u32> {
        self.index.get(payload).copied()
    }

    /// Payload behind `code`, if in range.
    #[inline]
    pub fn payload(&self, code: u32) -> Option<&[u8]> {
        self.entries.get(code as usize).map(|e| e.payload.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in code order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &WordEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i as u32, e))
    }
}

/// One resolved element of a sentence payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SentencePiece {
    /// Reference into the word dictionary.
    Word(u32),
    /// Raw bytes kept verbatim: whitespace, punctuation, and word tokens
    /// that did not earn a code of their own.
    Literal(Vec<u8>),
}

/// One sentence-dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceEntry {
    pub pieces: Vec<SentencePiece>,
    /// Occurrence count at build time; zero when loaded from disk.
    pub frequency: u64,
}

impl SentenceEntry {
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Reassembles the exact bytes this entry stands for.
    pub fn expand(&self, words: &WordDictionary) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for piece in &self.pieces {
            match piece {
                SentencePiece::Word(code) => {
                    let payload = words.payload(*code).ok_or_else(|| {
                        CodecError::DictionaryCorrupt(format!(
                            "sentence piece references unknown word code {code}"
                        ))
                    })?;
                    out.extend_from_slice(payload);
                }
                SentencePiece::Literal(bytes) => out.extend_from_slice(bytes),
            }
        }
        Ok(out)
    }
}

/// Maps recurring sentences to dense integer codes.
///
/// Payloads are piece lists rather than raw bytes, so every stored
/// sentence leans on the word dictionary for its recurring words.
#[derive(Debug, Default)]
pub struct SentenceDictionary {
    entries: Vec<SentenceEntry>,
}

impl SentenceDictionary {
    /// Ranks sentence candidates and resolves their payloads against the
    /// finished word dictionary.
    pub fn build(
        counts: FxHashMap<Vec<u8>, u64>,
        min_count: u64,
        words: &WordDictionary,
    ) -> Result<Self> {
        let mut ranked: Vec<(Vec<u8>, u64)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if ranked.len() > MAX_CODES {
            return Err(CodecError::ResourceExhausted(format!(
                "sentence dictionary needs {} codes, the format addresses at most {}",
                ranked.len(),
                MAX_CODES
            )));
        }

        let entries = ranked
            .into_iter()
            .map(|(bytes, frequency)| SentenceEntry {
                pieces: resolve_pieces(&bytes, words),
                frequency,
            })
            .collect();
        Ok(Self { entries })
    }

    /// Rebuilds a dictionary from persisted entries, in code order.
    pub fn from_entries(entries: Vec<SentenceEntry>) -> Self {
        Self { entries }
    }

    #[inline]
    pub fn entry(&self, code: u32) -> Option<&SentenceEntry> {
        self.entries.get(code as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in code order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SentenceEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i as u32, e))
    }
}

/// Re-tokenizes sentence bytes and swaps word tokens for their codes.
///
/// Token splits depend only on the bytes themselves, so the pieces line up
/// one-to-one with the tokens the encoder will see in the stream.
fn resolve_pieces(bytes: &[u8], words: &WordDictionary) -> Vec<SentencePiece> {
    tokenize(bytes)
        .into_iter()
        .map(|token| {
            if token.is_word() {
                if let Some(code) = words.code_of(&token.bytes) {
                    return SentencePiece::Word(code);
                }
            }
            SentencePiece::Literal(token.bytes)
        })
        .collect()
}
