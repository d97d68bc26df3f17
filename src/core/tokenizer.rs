//! Byte-class tokenization and sentence segmentation.
//!
//! The tokenizer is total over arbitrary bytes: any input, including binary
//! garbage, splits into a lossless sequence of tokens whose concatenation
//! reproduces the input exactly. There is no character decoding step and no
//! failure path.
//!
//! # Byte classes
//!
//! Each byte belongs to exactly one class, so a maximal run of same-class
//! bytes forms one token:
//!
//! - **Word**: ASCII alphanumerics, `_`, and every byte >= 0x80 (UTF-8
//!   continuation and lead bytes land here, which keeps multi-byte
//!   characters glued to their word)
//! - **Whitespace**: space, tab, CR, LF, vertical tab, form feed
//! - **Punctuation**: everything else
//!
//! A punctuation run whose last byte is `.`, `!` or `?` and which is
//! followed by whitespace or end of input is re-labelled a sentence
//! boundary. Only the label changes; the bytes stay with the token.
//!
//! # Segments and blocks
//!
//! The [`Segmenter`] groups tokens into segments: a run of tokens ending at
//! a boundary token (inclusive) is a *candidate* when it spans at least
//! [`MIN_SENTENCE_TOKENS`] tokens and stays under the configured caps.
//! Runs cut by the caps, the trailing run at end of input, and the
//! whitespace run that separates two sentences are non-candidate segments.
//!
//! [`SegmentStream`] additionally groups segments into blocks for the
//! parallel phases. Blocks prefer to end right after a boundary token;
//! no dictionary match can cross such a point, so workers can process
//! blocks independently and still agree byte-for-byte with a sequential
//! scan. When a degenerate input goes too long without a boundary, the
//! block is cut anyway and a tail of segments is carried into the next
//! block so that any match straddling the cut is seen whole by one worker.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::LazyLock;

use super::config::CodecConfig;

/// Minimum token count for a sentence candidate.
pub const MIN_SENTENCE_TOKENS: usize = 2;

/// Ceiling on the bytes a single block may hold, independent of its token
/// count. Guards peak memory against inputs made of very long tokens.
const MAX_BLOCK_BYTES: usize = 64 * 1024 * 1024;

/// Classification attached to each token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Alphanumeric run; the only kind eligible for word-dictionary codes.
    Word,
    /// Punctuation run that does not close a sentence.
    Punctuation,
    /// Whitespace run.
    Whitespace,
    /// Punctuation run that closes a sentence.
    SentenceBoundary,
}

/// One maximal same-class byte run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub bytes: Vec<u8>,
    /// Byte offset of the run's first byte from the start of the input.
    pub offset: u64,
}

impl Token {
    pub fn new(kind: TokenKind, bytes: Vec<u8>, offset: u64) -> Self {
        Self { kind, bytes, offset }
    }

    #[inline]
    pub fn is_word(&self) -> bool {
        self.kind == TokenKind::Word
    }

    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.kind == TokenKind::SentenceBoundary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteClass {
    Word,
    Space,
    Punct,
}

/// Byte to class mapping (256 entries).
static BYTE_CLASSES: LazyLock<[ByteClass; 256]> = LazyLock::new(|| {
    let mut classes = [ByteClass::Punct; 256];
    for b in 0u16..=255 {
        let b = b as u8;
        let class = if b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80 {
            ByteClass::Word
        } else if matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c) {
            ByteClass::Space
        } else {
            ByteClass::Punct
        };
        classes[b as usize] = class;
    }
    classes
});

#[inline]
fn class_of(byte: u8) -> ByteClass {
    BYTE_CLASSES[byte as usize]
}

#[inline]
fn is_terminal(byte: u8) -> bool {
    matches!(byte, b'.' | b'!' | b'?')
}

/// Scans one maximal run starting at `start`.
///
/// Returns the token kind and the exclusive end of the run, or `None` when
/// the run reaches the end of `buf` and more bytes may still arrive. The
/// `None` case also covers boundary lookahead: a punctuation run touching
/// the buffer end cannot be labelled until the following byte (or EOF) is
/// known.
fn scan_run(buf: &[u8], start: usize, at_eof: bool) -> Option<(TokenKind, usize)> {
    let class = class_of(buf[start]);
    let mut end = start + 1;
    while end < buf.len() && class_of(buf[end]) == class {
        end += 1;
    }
    if end == buf.len() && !at_eof {
        return None;
    }

    let kind = match class {
        ByteClass::Word => TokenKind::Word,
        ByteClass::Space => TokenKind::Whitespace,
        ByteClass::Punct => {
            let followed_by_space = end < buf.len() && class_of(buf[end]) == ByteClass::Space;
            if is_terminal(buf[end - 1]) && (followed_by_space || end == buf.len()) {
                TokenKind::SentenceBoundary
            } else {
                TokenKind::Punctuation
            }
        }
    };
    Some((kind, end))
}

/// Splits an in-memory slice into its full token sequence.
///
/// # Example
///
/// ```
/// use phrasebook::{tokenize, TokenKind};
///
/// let tokens = tokenize(b"the mat.");
/// let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
/// assert_eq!(
///     kinds,
///     [
///         TokenKind::Word,
///         TokenKind::Whitespace,
///         TokenKind::Word,
///         TokenKind::SentenceBoundary,
///     ]
/// );
/// ```
pub fn tokenize(bytes: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        // At EOF the scan always completes.
        let Some((kind, end)) = scan_run(bytes, pos, true) else {
            break;
        };
        tokens.push(Token::new(kind, bytes[pos..end].to_vec(), pos as u64));
        pos = end;
    }
    tokens
}

/// Streaming tokenizer over any reader.
///
/// Reads in `chunk_bytes` slabs and never holds more than one slab plus one
/// partially scanned run, so peak memory is proportional to the buffer size
/// plus the longest single token in the input.
pub struct TokenStream<R: Read> {
    reader: R,
    buf: Vec<u8>,
    start: usize,
    /// Absolute offset of `buf[start]` within the full input.
    offset: u64,
    chunk_bytes: usize,
    eof: bool,
}

impl<R: Read> TokenStream<R> {
    pub fn new(reader: R, chunk_bytes: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            start: 0,
            offset: 0,
            chunk_bytes: chunk_bytes.max(1),
            eof: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk_bytes, 0);
        let read = loop {
            match self.reader.read(&mut self.buf[old_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.buf.truncate(old_len + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }

    /// Produces the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> io::Result<Option<Token>> {
        loop {
            if self.start < self.buf.len() {
                if let Some((kind, end)) = scan_run(&self.buf, self.start, self.eof) {
                    let token = Token::new(kind, self.buf[self.start..end].to_vec(), self.offset);
                    self.offset += (end - self.start) as u64;
                    self.start = end;
                    return Ok(Some(token));
                }
            } else if self.eof {
                return Ok(None);
            }
            self.refill()?;
        }
    }
}

/// A run of tokens delimited by sentence boundaries or caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tokens: Vec<Token>,
    /// True when this segment is a sentence candidate: it ends with a
    /// boundary token and fits the token and byte caps.
    pub candidate: bool,
}

impl Segment {
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn byte_len(&self) -> usize {
        self.tokens.iter().map(|t| t.bytes.len()).sum()
    }

    /// Concatenated bytes of all tokens, in order.
    pub fn concat_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for token in &self.tokens {
            out.extend_from_slice(&token.bytes);
        }
        out
    }

    pub fn ends_with_boundary(&self) -> bool {
        self.tokens.last().is_some_and(Token::is_boundary)
    }
}

/// Groups tokens into [`Segment`]s.
///
/// The whitespace run immediately after a boundary is emitted as its own
/// non-candidate segment. This keeps the separator out of the following
/// sentence, so repeated sentences produce byte-identical candidates no
/// matter what separated them.
pub struct Segmenter {
    max_tokens: usize,
    max_bytes: usize,
    current: Vec<Token>,
    current_bytes: usize,
    after_boundary: bool,
}

impl Segmenter {
    pub fn new(max_tokens: usize, max_bytes: usize) -> Self {
        Self {
            max_tokens,
            max_bytes,
            current: Vec::new(),
            current_bytes: 0,
            after_boundary: false,
        }
    }

    /// Feeds one token; returns a segment when one closes.
    pub fn push(&mut self, token: Token) -> Option<Segment> {
        if self.after_boundary && self.current.is_empty() && token.kind == TokenKind::Whitespace {
            self.after_boundary = false;
            return Some(Segment {
                tokens: vec![token],
                candidate: false,
            });
        }
        self.after_boundary = false;

        self.current_bytes += token.bytes.len();
        let closes = token.is_boundary();
        self.current.push(token);

        if closes {
            let candidate = self.current.len() >= MIN_SENTENCE_TOKENS
                && self.current.len() <= self.max_tokens
                && self.current_bytes <= self.max_bytes;
            self.after_boundary = true;
            return Some(self.take_current(candidate));
        }
        // Cap closure keeps segments bounded; such segments are never
        // candidates because they lack a closing boundary.
        if self.current.len() >= self.max_tokens || self.current_bytes >= self.max_bytes {
            return Some(self.take_current(false));
        }
        None
    }

    /// Flushes the trailing run at end of input.
    pub fn finish(&mut self) -> Option<Segment> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.take_current(false))
        }
    }

    fn take_current(&mut self, candidate: bool) -> Segment {
        self.current_bytes = 0;
        Segment {
            tokens: std::mem::take(&mut self.current),
            candidate,
        }
    }
}

/// Streams a file (or any reader) as segments grouped into blocks.
///
/// Blocks are the unit of parallelism. A block normally closes at the first
/// boundary-terminated segment at or past `target_tokens` tokens, which is a
/// safe cut: dictionary entries contain exactly one boundary token, at their
/// end, so no match can span the cut. If the input runs past twice the
/// target (or past a byte ceiling) without a boundary, the block is cut
/// unsafely and its tail segments are withheld and replayed at the front of
/// the next block, keeping every possible match inside a single block.
pub struct SegmentStream<R: Read> {
    tokens: TokenStream<R>,
    segmenter: Segmenter,
    pending: VecDeque<Segment>,
    exhausted: bool,
}

impl SegmentStream<File> {
    pub fn open(path: &Path, config: &CodecConfig) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file, config))
    }
}

impl<R: Read> SegmentStream<R> {
    pub fn new(reader: R, config: &CodecConfig) -> Self {
        Self {
            tokens: TokenStream::new(reader, config.io_buffer_bytes),
            segmenter: Segmenter::new(config.max_sentence_tokens, config.max_sentence_bytes),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Produces the next segment, or `None` at end of input.
    pub fn next_segment(&mut self) -> io::Result<Option<Segment>> {
        if let Some(segment) = self.pending.pop_front() {
            return Ok(Some(segment));
        }
        if self.exhausted {
            return Ok(None);
        }
        loop {
            match self.tokens.next_token()? {
                Some(token) => {
                    if let Some(segment) = self.segmenter.push(token) {
                        return Ok(Some(segment));
                    }
                }
                None => {
                    self.exhausted = true;
                    return Ok(self.segmenter.finish());
                }
            }
        }
    }

    /// Accumulates whole segments into the next block.
    ///
    /// `margin_tokens` is the carry span for unsafe cuts; callers pass one
    /// less than the sentence token cap so that any entry overlapping the
    /// cut point starts inside the carried tail.
    pub fn next_block(
        &mut self,
        target_tokens: usize,
        margin_tokens: usize,
    ) -> io::Result<Option<Vec<Segment>>> {
        let hard_cap = target_tokens.saturating_mul(2);
        let mut block: Vec<Segment> = Vec::new();
        let mut tokens = 0usize;
        let mut bytes = 0usize;

        loop {
            match self.next_segment()? {
                Some(segment) => {
                    tokens += segment.token_count();
                    bytes += segment.byte_len();
                    let safe = segment.ends_with_boundary();
                    block.push(segment);

                    if safe && tokens >= target_tokens {
                        return Ok(Some(block));
                    }
                    if tokens >= hard_cap || bytes >= MAX_BLOCK_BYTES {
                        self.withhold_tail(&mut block, margin_tokens);
                        return Ok(Some(block));
                    }
                }
                None => {
                    return Ok(if block.is_empty() { None } else { Some(block) });
                }
            }
        }
    }

    /// Moves trailing segments totalling at least `margin_tokens` tokens
    /// back into the pending queue, always leaving the block non-empty.
    fn withhold_tail(&mut self, block: &mut Vec<Segment>, margin_tokens: usize) {
        let mut withheld = 0usize;
        let mut cut = block.len();
        while cut > 1 && withheld < margin_tokens {
            withheld += block[cut - 1].token_count();
            cut -= 1;
        }
        for segment in block.split_off(cut) {
            self.pending.push_back(segment);
        }
    }
}
