//! Greedy two-level substitution.
//!
//! The second encode pass walks the token stream and, at each position,
//! first tries the sentence dictionary, then the word dictionary, then
//! falls back to a literal. Sentence matching is greedy and leftmost:
//! the longest entry matching at the current position wins, the scan jumps
//! past it, and emitted references never overlap. Tokens never match
//! partially; an entry matches only when its pieces equal a whole token
//! run element for element.

use rustc_hash::FxHashMap;

use super::dictionary::{SentenceDictionary, SentencePiece, WordDictionary};
use super::tokenizer::{Segment, Token};

/// One element of the encoded stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedUnit {
    /// Reference into the sentence dictionary.
    SentenceRef(u32),
    /// Reference into the word dictionary.
    WordRef(u32),
    /// Verbatim bytes for everything without a code.
    Literal(Vec<u8>),
}

#[inline]
fn piece_bytes<'a>(piece: &'a SentencePiece, words: &'a WordDictionary) -> Option<&'a [u8]> {
    match piece {
        SentencePiece::Word(code) => words.payload(*code),
        SentencePiece::Literal(bytes) => Some(bytes.as_slice()),
    }
}

/// Read-only matcher state shared by all workers of one encode run.
///
/// Lookup is keyed on the bytes of an entry's first piece; the candidate
/// lists are ordered longest entry first, then by code, so the winning
/// match at a position is well-defined no matter how the dictionary was
/// produced.
pub struct SubstitutionEncoder<'a> {
    words: &'a WordDictionary,
    sentences: &'a SentenceDictionary,
    by_first: FxHashMap<&'a [u8], Vec<u32>>,
}

impl<'a> SubstitutionEncoder<'a> {
    pub fn new(words: &'a WordDictionary, sentences: &'a SentenceDictionary) -> Self {
        let mut by_first: FxHashMap<&'a [u8], Vec<u32>> = FxHashMap::default();
        for (code, entry) in sentences.iter() {
            let Some(first) = entry.pieces.first() else {
                continue;
            };
            let Some(key) = piece_bytes(first, words) else {
                continue;
            };
            by_first.entry(key).or_default().push(code);
        }
        for codes in by_first.values_mut() {
            codes.sort_unstable_by_key(|&code| {
                let len = sentences.entry(code).map(|e| e.piece_count()).unwrap_or(0);
                (std::cmp::Reverse(len), code)
            });
        }
        Self {
            words,
            sentences,
            by_first,
        }
    }

    /// Encodes one block of segments into units.
    ///
    /// Blocks are cut so that no dictionary match spans two blocks, which
    /// makes per-block encoding bit-identical to a sequential scan.
    pub fn encode_block(&self, segments: &[Segment]) -> Vec<EncodedUnit> {
        let tokens: Vec<&Token> = segments.iter().flat_map(|s| s.tokens.iter()).collect();
        let mut units = Vec::with_capacity(tokens.len() / 2 + 1);

        let mut i = 0;
        while i < tokens.len() {
            if let Some((code, consumed)) = self.match_at(&tokens, i) {
                units.push(EncodedUnit::SentenceRef(code));
                i += consumed;
                continue;
            }
            let token = tokens[i];
            if token.is_word() {
                if let Some(code) = self.words.code_of(&token.bytes) {
                    units.push(EncodedUnit::WordRef(code));
                    i += 1;
                    continue;
                }
            }
            units.push(EncodedUnit::Literal(token.bytes.clone()));
            i += 1;
        }
        units
    }

    /// Longest sentence entry whose pieces equal the token run at `at`.
    fn match_at(&self, tokens: &[&Token], at: usize) -> Option<(u32, usize)> {
        let candidates = self.by_first.get(tokens[at].bytes.as_slice())?;
        for &code in candidates {
            let Some(entry) = self.sentences.entry(code) else {
                continue;
            };
            let pieces = &entry.pieces;
            if at + pieces.len() > tokens.len() {
                continue;
            }
            let all_equal = pieces
                .iter()
                .zip(&tokens[at..at + pieces.len()])
                .all(|(piece, token)| {
                    piece_bytes(piece, self.words)
                        .is_some_and(|bytes| bytes == token.bytes.as_slice())
                });
            if all_equal {
                return Some((code, pieces.len()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CodecConfig;
    use crate::core::dictionary::SentenceEntry;
    use crate::core::frequency::collect_from_stream;
    use crate::core::tokenizer::SegmentStream;
    use std::io::Cursor;

    /// Builds both dictionaries from `input` and encodes it in one block.
    fn encode_corpus(input: &[u8]) -> (WordDictionary, SentenceDictionary, Vec<EncodedUnit>) {
        let config = CodecConfig::small();
        let mut stream = SegmentStream::new(Cursor::new(input.to_vec()), &config);
        let mut tables = collect_from_stream(&mut stream, &config).unwrap();

        let words = WordDictionary::build(
            std::mem::take(&mut tables.word_counts),
            config.min_word_count,
        )
        .unwrap();
        let sentences = SentenceDictionary::build(
            std::mem::take(&mut tables.sentence_counts),
            config.min_sentence_count,
            &words,
        )
        .unwrap();

        let mut stream = SegmentStream::new(Cursor::new(input.to_vec()), &config);
        let mut segments = Vec::new();
        while let Some(segment) = stream.next_segment().unwrap() {
            segments.push(segment);
        }
        let encoder = SubstitutionEncoder::new(&words, &sentences);
        let units = encoder.encode_block(&segments);
        (words, sentences, units)
    }

    fn expand_units(
        units: &[EncodedUnit],
        words: &WordDictionary,
        sentences: &SentenceDictionary,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            match unit {
                EncodedUnit::SentenceRef(code) => {
                    out.extend(sentences.entry(*code).unwrap().expand(words).unwrap());
                }
                EncodedUnit::WordRef(code) => out.extend_from_slice(words.payload(*code).unwrap()),
                EncodedUnit::Literal(bytes) => out.extend_from_slice(bytes),
            }
        }
        out
    }

    #[test]
    fn test_repeated_sentence_becomes_two_refs() {
        let input = b"the cat sat on the mat. the cat sat on the mat.";
        let (words, sentences, units) = encode_corpus(input);

        assert_eq!(sentences.len(), 1);
        assert_eq!(
            units,
            vec![
                EncodedUnit::SentenceRef(0),
                EncodedUnit::Literal(b" ".to_vec()),
                EncodedUnit::SentenceRef(0),
            ]
        );
        assert_eq!(expand_units(&units, &words, &sentences), input);
    }

    #[test]
    fn test_word_pass_covers_unmatched_positions() {
        // "the" recurs but the sentences differ, so only words get codes.
        let input = b"the red fox. the blue fox.";
        let (words, sentences, units) = encode_corpus(input);

        assert_eq!(sentences.len(), 0);
        let the = words.code_of(b"the").unwrap();
        let fox = words.code_of(b"fox").unwrap();
        assert!(units.contains(&EncodedUnit::WordRef(the)));
        assert!(units.contains(&EncodedUnit::WordRef(fox)));
        // "red" and "blue" occur once each and stay literal.
        assert!(units.contains(&EncodedUnit::Literal(b"red".to_vec())));
        assert!(units.contains(&EncodedUnit::Literal(b"blue".to_vec())));
        assert_eq!(expand_units(&units, &words, &sentences), input);
    }

    #[test]
    fn test_longest_match_wins() {
        // Hand-built entries where one is a strict prefix of the other.
        let words = WordDictionary::build(Default::default(), 2).unwrap();
        let sentences = SentenceDictionary::from_entries(vec![
            SentenceEntry {
                pieces: vec![
                    SentencePiece::Literal(b"ab".to_vec()),
                    SentencePiece::Literal(b".".to_vec()),
                ],
                frequency: 0,
            },
            SentenceEntry {
                pieces: vec![
                    SentencePiece::Literal(b"ab".to_vec()),
                    SentencePiece::Literal(b".".to_vec()),
                    SentencePiece::Literal(b" ".to_vec()),
                    SentencePiece::Literal(b"cd".to_vec()),
                ],
                frequency: 0,
            },
        ]);

        let config = CodecConfig::small();
        let mut stream = SegmentStream::new(Cursor::new(b"ab. cd".to_vec()), &config);
        let mut segments = Vec::new();
        while let Some(segment) = stream.next_segment().unwrap() {
            segments.push(segment);
        }

        let encoder = SubstitutionEncoder::new(&words, &sentences);
        let units = encoder.encode_block(&segments);
        assert_eq!(units, vec![EncodedUnit::SentenceRef(1)]);
    }

    #[test]
    fn test_matches_never_overlap() {
        let input = b"go on. go on. go on.";
        let (_, sentences, units) = encode_corpus(input);
        assert_eq!(sentences.len(), 1);

        let refs = units
            .iter()
            .filter(|u| matches!(u, EncodedUnit::SentenceRef(_)))
            .count();
        assert_eq!(refs, 3);
        let literals = units
            .iter()
            .filter(|u| matches!(u, EncodedUnit::Literal(_)))
            .count();
        assert_eq!(literals, 2, "only the two separators remain literal");
    }

    #[test]
    fn test_block_cuts_do_not_change_units() {
        let input = b"one two three. four five six. one two three. seven! one two three. "
            .repeat(12);
        let config = CodecConfig::small();

        let mut stream = SegmentStream::new(Cursor::new(input.clone()), &config);
        let mut tables = collect_from_stream(&mut stream, &config).unwrap();
        let words = WordDictionary::build(
            std::mem::take(&mut tables.word_counts),
            config.min_word_count,
        )
        .unwrap();
        let sentences = SentenceDictionary::build(
            std::mem::take(&mut tables.sentence_counts),
            config.min_sentence_count,
            &words,
        )
        .unwrap();
        let encoder = SubstitutionEncoder::new(&words, &sentences);

        let margin = config.max_sentence_tokens - 1;
        let mut one_block = SegmentStream::new(Cursor::new(input.clone()), &config);
        let mut whole = Vec::new();
        while let Some(block) = one_block.next_block(usize::MAX / 4, margin).unwrap() {
            whole.extend(encoder.encode_block(&block));
        }

        let mut fine = SegmentStream::new(Cursor::new(input.clone()), &config);
        let mut pieces = Vec::new();
        while let Some(block) = fine
            .next_block(config.max_sentence_tokens * 2, margin)
            .unwrap()
        {
            pieces.extend(encoder.encode_block(&block));
        }

        assert_eq!(whole, pieces);
    }
}
