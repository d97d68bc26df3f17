//! Sharded, checksummed persistence.
//!
//! Each artifact directory holds a run of bounded-size shard files plus a
//! `manifest.json` describing them. Readers trust nothing: magic bytes,
//! format versions, per-shard SHA-256 digests, the combined directory
//! checksum, record counts, and code density are all checked before any
//! content is used.
//!
//! # Shard layouts
//!
//! Dictionary shards (`shard_NNNNN.dict`, `shard_NNNNN.sdict`):
//!
//! ```text
//! magic[4] version[1] record*
//! record = code:varint payload_len:varint payload[payload_len]
//! ```
//!
//! Word payloads are the raw token bytes. Sentence payloads are piece
//! lists: `piece_count:varint` followed by tagged pieces, `0x02 code` for a
//! word reference and `0x03 len bytes` for a literal. Codes are dense and
//! ascending, continuing across shard files.
//!
//! Encoded shards (`shard_NNNNN.enc`):
//!
//! ```text
//! magic[4] version[1] unit* 0x00
//! unit = 0x01 code | 0x02 code | 0x03 len bytes
//! ```
//!
//! # Atomicity
//!
//! Writers fill a hidden stage directory next to the target and rename it
//! into place once the manifest is on disk, so a crash leaves either the
//! old state or the complete new state, never a half-written directory.
//! Unpublished stages are removed on drop.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::dictionary::{SentenceDictionary, SentenceEntry, SentencePiece, WordDictionary};
use super::error::{CodecError, Result};
use super::substitute::EncodedUnit;
use super::varint::{push_varint, read_varint, write_varint};

/// Manifest and shard format revision.
pub const FORMAT_VERSION: u32 = 1;
/// Version byte carried by every shard file.
const SHARD_VERSION: u8 = 1;

const WORD_DICT_MAGIC: [u8; 4] = *b"PBW1";
const SENTENCE_DICT_MAGIC: [u8; 4] = *b"PBS1";
const ENCODED_MAGIC: [u8; 4] = *b"PBE1";

const TAG_END: u8 = 0x00;
const TAG_SENTENCE_REF: u8 = 0x01;
const TAG_WORD_REF: u8 = 0x02;
const TAG_LITERAL: u8 = 0x03;

/// Manifest file name within every artifact directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Subdirectory of the word-dictionary directory holding the embedded
/// sentence dictionary.
pub const SENTENCE_SUBDIR: &str = "sentences";

// ============================================================================
// Manifest
// ============================================================================

/// What a shard directory contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardKind {
    WordDict,
    SentenceDict,
    Encoded,
}

impl ShardKind {
    fn magic(self) -> [u8; 4] {
        match self {
            ShardKind::WordDict => WORD_DICT_MAGIC,
            ShardKind::SentenceDict => SENTENCE_DICT_MAGIC,
            ShardKind::Encoded => ENCODED_MAGIC,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ShardKind::WordDict => "dict",
            ShardKind::SentenceDict => "sdict",
            ShardKind::Encoded => "enc",
        }
    }

    /// Canonical file name of the shard at `index`.
    pub fn file_name(self, index: usize) -> String {
        format!("shard_{index:05}.{}", self.extension())
    }
}

/// Per-shard bookkeeping inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub file: String,
    pub records: u64,
    pub bytes: u64,
    pub sha256: String,
}

/// Directory metadata written as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub kind: ShardKind,
    pub shard_count: u32,
    /// Total input bytes of the corpus this directory belongs to.
    pub corpus_bytes: u64,
    /// Records across all shards: dictionary entries or encoded units.
    pub total_records: u64,
    /// SHA-256 over the concatenated per-shard digests, hex encoded.
    pub checksum: String,
    /// Checksum of the word dictionary this stream was encoded against.
    /// Present only on encoded manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_dict_checksum: Option<String>,
    /// Checksum of the sentence dictionary this stream was encoded against.
    /// Present only on encoded manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_dict_checksum: Option<String>,
    pub shards: Vec<ShardEntry>,
}

impl Manifest {
    pub fn new(
        kind: ShardKind,
        corpus_bytes: u64,
        total_records: u64,
        shards: Vec<ShardEntry>,
    ) -> Self {
        let checksum = combined_checksum(&shards);
        Self {
            format_version: FORMAT_VERSION,
            kind,
            shard_count: shards.len() as u32,
            corpus_bytes,
            total_records,
            checksum,
            word_dict_checksum: None,
            sentence_dict_checksum: None,
            shards,
        }
    }
}

/// Directory checksum: SHA-256 over the per-shard hex digests in order.
pub fn combined_checksum(shards: &[ShardEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in shards {
        hasher.update(entry.sha256.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Writes `manifest` into `dir` as pretty JSON.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest).map_err(|e| {
        CodecError::DiskWriteFailure(io::Error::new(io::ErrorKind::InvalidData, e))
    })?;
    fs::write(dir.join(MANIFEST_FILE), json).map_err(CodecError::DiskWriteFailure)
}

/// Reads and validates a manifest: format version, kind, shard count, file
/// names, and the combined checksum. Per-shard digests are checked when the
/// shards themselves are read.
pub fn read_manifest(dir: &Path, expected_kind: ShardKind) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CodecError::InputNotFound(path));
        }
        Err(e) => return Err(CodecError::Io(e)),
    };
    let manifest: Manifest = serde_json::from_slice(&data).map_err(|e| {
        CodecError::DictionaryCorrupt(format!("{}: unreadable manifest: {e}", path.display()))
    })?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(CodecError::VersionMismatch {
            found: manifest.format_version,
            supported: FORMAT_VERSION,
        });
    }
    if manifest.kind != expected_kind {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: manifest kind {:?} where {:?} was expected",
            path.display(),
            manifest.kind,
            expected_kind
        )));
    }
    if manifest.shard_count as usize != manifest.shards.len() {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: shard_count {} disagrees with {} listed shards",
            path.display(),
            manifest.shard_count,
            manifest.shards.len()
        )));
    }
    for (index, entry) in manifest.shards.iter().enumerate() {
        let expected = manifest.kind.file_name(index);
        if entry.file != expected {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{}: shard {index} is named {:?}, expected {:?}",
                path.display(),
                entry.file,
                expected
            )));
        }
    }
    if manifest.checksum != combined_checksum(&manifest.shards) {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: combined checksum mismatch",
            path.display()
        )));
    }
    Ok(manifest)
}

// ============================================================================
// Staging
// ============================================================================

/// A hidden scratch directory that becomes `target` on publish.
///
/// Dropping an unpublished stage removes it, so failed operations leave no
/// partial directories behind.
pub struct StageDir {
    path: PathBuf,
    published: bool,
}

impl StageDir {
    pub fn create(target: &Path) -> Result<Self> {
        let name = target.file_name().ok_or_else(|| {
            CodecError::InvalidConfig(format!(
                "{} is not usable as an output directory",
                target.display()
            ))
        })?;
        let stage_name = format!(".{}.stage-{}", name.to_string_lossy(), std::process::id());
        let path = target.with_file_name(stage_name);
        // A stage left by a crashed run with the same pid is stale.
        if path.exists() {
            fs::remove_dir_all(&path).map_err(CodecError::DiskWriteFailure)?;
        }
        fs::create_dir_all(&path).map_err(CodecError::DiskWriteFailure)?;
        Ok(Self {
            path,
            published: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the stage onto `target`, replacing any previous directory.
    pub fn publish(mut self, target: &Path) -> Result<()> {
        if target.exists() {
            fs::remove_dir_all(target).map_err(CodecError::DiskWriteFailure)?;
        }
        fs::rename(&self.path, target).map_err(CodecError::DiskWriteFailure)?;
        self.published = true;
        tracing::debug!(target = %target.display(), "published directory");
        Ok(())
    }
}

impl Drop for StageDir {
    fn drop(&mut self) {
        if !self.published {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Staged single file, used for the restore output.
pub struct StageFile {
    path: PathBuf,
    published: bool,
}

impl StageFile {
    pub fn create(target: &Path) -> Result<Self> {
        let name = target.file_name().ok_or_else(|| {
            CodecError::InvalidConfig(format!(
                "{} is not usable as an output file",
                target.display()
            ))
        })?;
        let stage_name = format!(".{}.stage-{}", name.to_string_lossy(), std::process::id());
        let path = target.with_file_name(stage_name);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(CodecError::DiskWriteFailure)?;
            }
        }
        Ok(Self {
            path,
            published: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn publish(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target).map_err(CodecError::DiskWriteFailure)?;
        self.published = true;
        Ok(())
    }
}

impl Drop for StageFile {
    fn drop(&mut self) {
        if !self.published {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Copies every regular file of a flat directory into `to`.
///
/// Used to embed the sentence dictionary inside the word-dictionary
/// directory; copying the finished files keeps both byte-identical.
pub fn copy_dir_flat(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(CodecError::DiskWriteFailure)?;
    let entries = fs::read_dir(from).map_err(CodecError::Io)?;
    for entry in entries {
        let entry = entry.map_err(CodecError::Io)?;
        let path = entry.path();
        if path.is_file() {
            let Some(name) = path.file_name() else {
                continue;
            };
            fs::copy(&path, to.join(name)).map_err(CodecError::DiskWriteFailure)?;
        }
    }
    Ok(())
}

// ============================================================================
// Writers
// ============================================================================

/// Write adapter that hashes and counts everything passing through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Flushes and returns the hex digest and byte count.
    fn finish(mut self) -> io::Result<(String, u64)> {
        self.inner.flush()?;
        Ok((hex::encode(self.hasher.finalize()), self.bytes))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct OpenShard {
    writer: HashingWriter<BufWriter<File>>,
    file: String,
    records: u64,
}

/// Rotating shard writer; dictionary records and encoded units share it.
///
/// Every shard, rotated or final, ends with the writer's trailer.
struct ShardWriter {
    dir: PathBuf,
    kind: ShardKind,
    target_bytes: usize,
    trailer: &'static [u8],
    current: Option<OpenShard>,
    entries: Vec<ShardEntry>,
    total_records: u64,
}

impl ShardWriter {
    fn new(dir: &Path, kind: ShardKind, target_bytes: usize, trailer: &'static [u8]) -> Self {
        Self {
            dir: dir.to_path_buf(),
            kind,
            target_bytes: target_bytes.max(1),
            trailer,
            current: None,
            entries: Vec::new(),
            total_records: 0,
        }
    }

    fn open_shard(&mut self) -> Result<&mut OpenShard> {
        if self.current.is_none() {
            let file = self.kind.file_name(self.entries.len());
            let handle =
                File::create(self.dir.join(&file)).map_err(CodecError::DiskWriteFailure)?;
            let mut writer = HashingWriter::new(BufWriter::new(handle));
            writer
                .write_all(&self.kind.magic())
                .and_then(|()| writer.write_all(&[SHARD_VERSION]))
                .map_err(CodecError::DiskWriteFailure)?;
            self.current = Some(OpenShard {
                writer,
                file,
                records: 0,
            });
        }
        // Just set above when it was None.
        self.current
            .as_mut()
            .ok_or_else(|| CodecError::DiskWriteFailure(io::Error::other("shard not open")))
    }

    /// Appends one record and rotates when the shard passed its target size.
    fn write_record(&mut self, write: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> Result<()> {
        let target = self.target_bytes;
        let shard = self.open_shard()?;
        write(&mut shard.writer).map_err(CodecError::DiskWriteFailure)?;
        shard.records += 1;
        let full = shard.writer.bytes() as usize >= target;
        self.total_records += 1;
        if full {
            self.close_current()?;
        }
        Ok(())
    }

    fn close_current(&mut self) -> Result<()> {
        let Some(mut shard) = self.current.take() else {
            return Ok(());
        };
        if !self.trailer.is_empty() {
            shard
                .writer
                .write_all(self.trailer)
                .map_err(CodecError::DiskWriteFailure)?;
        }
        let (sha256, bytes) = shard.writer.finish().map_err(CodecError::DiskWriteFailure)?;
        tracing::debug!(
            file = %shard.file,
            records = shard.records,
            bytes,
            "closed shard"
        );
        self.entries.push(ShardEntry {
            file: shard.file,
            records: shard.records,
            bytes,
            sha256,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<(Vec<ShardEntry>, u64)> {
        self.close_current()?;
        Ok((self.entries, self.total_records))
    }
}

/// Serialized form of a sentence payload: piece count, then tagged pieces.
fn sentence_payload(entry: &SentenceEntry) -> Vec<u8> {
    let mut blob = Vec::new();
    push_varint(&mut blob, entry.piece_count() as u64);
    for piece in &entry.pieces {
        match piece {
            SentencePiece::Word(code) => {
                blob.push(TAG_WORD_REF);
                push_varint(&mut blob, u64::from(*code));
            }
            SentencePiece::Literal(bytes) => {
                blob.push(TAG_LITERAL);
                push_varint(&mut blob, bytes.len() as u64);
                blob.extend_from_slice(bytes);
            }
        }
    }
    blob
}

fn write_dict_record(writer: &mut dyn Write, code: u64, payload: &[u8]) -> io::Result<()> {
    write_varint(writer, code)?;
    write_varint(writer, payload.len() as u64)?;
    writer.write_all(payload)
}

/// Writes the word dictionary into `dir` as rotating shards.
pub fn write_word_dictionary(
    dir: &Path,
    words: &WordDictionary,
    target_bytes: usize,
) -> Result<(Vec<ShardEntry>, u64)> {
    let mut writer = ShardWriter::new(dir, ShardKind::WordDict, target_bytes, &[]);
    for (code, entry) in words.iter() {
        writer.write_record(|w| write_dict_record(w, u64::from(code), &entry.payload))?;
    }
    writer.finish()
}

/// Writes the sentence dictionary into `dir` as rotating shards.
pub fn write_sentence_dictionary(
    dir: &Path,
    sentences: &SentenceDictionary,
    target_bytes: usize,
) -> Result<(Vec<ShardEntry>, u64)> {
    let mut writer = ShardWriter::new(dir, ShardKind::SentenceDict, target_bytes, &[]);
    for (code, entry) in sentences.iter() {
        let payload = sentence_payload(entry);
        writer.write_record(|w| write_dict_record(w, u64::from(code), &payload))?;
    }
    writer.finish()
}

/// Streaming writer for encoded shards.
///
/// Units are appended in stream order; a shard closes with its end marker
/// once it passes the target size, and the next unit opens the next shard.
/// Units are never split across files.
pub struct EncodedShardWriter {
    inner: ShardWriter,
}

impl EncodedShardWriter {
    pub fn new(dir: &Path, target_bytes: usize) -> Self {
        Self {
            inner: ShardWriter::new(dir, ShardKind::Encoded, target_bytes, &[TAG_END]),
        }
    }

    pub fn write_units(&mut self, units: &[EncodedUnit]) -> Result<()> {
        for unit in units {
            self.inner.write_record(|w| write_unit(w, unit))?;
        }
        Ok(())
    }

    /// Closes the trailing shard and returns the entries and unit total.
    pub fn finish(self) -> Result<(Vec<ShardEntry>, u64)> {
        self.inner.finish()
    }
}

fn write_unit(writer: &mut dyn Write, unit: &EncodedUnit) -> io::Result<()> {
    match unit {
        EncodedUnit::SentenceRef(code) => {
            writer.write_all(&[TAG_SENTENCE_REF])?;
            write_varint(writer, u64::from(*code))?;
        }
        EncodedUnit::WordRef(code) => {
            writer.write_all(&[TAG_WORD_REF])?;
            write_varint(writer, u64::from(*code))?;
        }
        EncodedUnit::Literal(bytes) => {
            writer.write_all(&[TAG_LITERAL])?;
            write_varint(writer, bytes.len() as u64)?;
            writer.write_all(bytes)?;
        }
    }
    Ok(())
}

// ============================================================================
// Readers
// ============================================================================

fn missing_shard_error(kind: ShardKind, path: &Path) -> CodecError {
    let detail = format!("{}: shard file missing", path.display());
    match kind {
        ShardKind::Encoded => CodecError::EncodedStreamTruncated(detail),
        _ => CodecError::DictionaryCorrupt(detail),
    }
}

fn shard_size_error(kind: ShardKind, path: &Path, on_disk: u64, expected: u64) -> CodecError {
    let detail = format!(
        "{}: {on_disk} bytes on disk, manifest records {expected}",
        path.display()
    );
    if kind == ShardKind::Encoded && on_disk < expected {
        CodecError::EncodedStreamTruncated(detail)
    } else {
        CodecError::DictionaryCorrupt(detail)
    }
}

/// Reads one shard file and verifies its size and digest against the
/// manifest entry.
pub fn read_shard_bytes(dir: &Path, entry: &ShardEntry, kind: ShardKind) -> Result<Vec<u8>> {
    let path = dir.join(&entry.file);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(missing_shard_error(kind, &path));
        }
        Err(e) => return Err(CodecError::Io(e)),
    };
    if data.len() as u64 != entry.bytes {
        return Err(shard_size_error(kind, &path, data.len() as u64, entry.bytes));
    }
    let digest = hex::encode(Sha256::digest(&data));
    if digest != entry.sha256 {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: shard checksum mismatch",
            path.display()
        )));
    }
    Ok(data)
}

/// Streams one shard file through SHA-256 and verifies its size and digest
/// without retaining the contents. Memory stays bounded by `buffer_bytes`,
/// so an entire directory can be validated up front before expansion.
pub fn validate_shard_file(
    dir: &Path,
    entry: &ShardEntry,
    kind: ShardKind,
    buffer_bytes: usize,
) -> Result<()> {
    use std::io::Read;

    let path = dir.join(&entry.file);
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(missing_shard_error(kind, &path));
        }
        Err(e) => return Err(CodecError::Io(e)),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buffer_bytes.max(1)];
    let mut total = 0u64;
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buf[..n]);
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    if total != entry.bytes {
        return Err(shard_size_error(kind, &path, total, entry.bytes));
    }
    let digest = hex::encode(hasher.finalize());
    if digest != entry.sha256 {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: shard checksum mismatch",
            path.display()
        )));
    }
    Ok(())
}

fn check_header(data: &[u8], kind: ShardKind, file: &str) -> Result<usize> {
    if data.len() < 5 {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{file}: too short for a shard header"
        )));
    }
    if data[0..4] != kind.magic() {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{file}: bad magic {:02x?}",
            &data[0..4]
        )));
    }
    if data[4] != SHARD_VERSION {
        return Err(CodecError::VersionMismatch {
            found: u32::from(data[4]),
            supported: u32::from(SHARD_VERSION),
        });
    }
    Ok(5)
}

fn dict_varint(data: &[u8], pos: &mut usize, file: &str) -> Result<u64> {
    read_varint(data, pos)
        .map_err(|e| CodecError::DictionaryCorrupt(format!("{file}: {e}")))
}

fn take_bytes<'a>(data: &'a [u8], pos: &mut usize, len: usize, file: &str) -> Result<&'a [u8]> {
    let end = pos.checked_add(len).filter(|&end| end <= data.len());
    match end {
        Some(end) => {
            let slice = &data[*pos..end];
            *pos = end;
            Ok(slice)
        }
        None => Err(CodecError::DictionaryCorrupt(format!(
            "{file}: record runs past the shard"
        ))),
    }
}

fn code_as_u32(code: u64, file: &str) -> Result<u32> {
    u32::try_from(code).map_err(|_| {
        CodecError::DictionaryCorrupt(format!("{file}: code {code} exceeds the u32 code space"))
    })
}

/// Parses a word shard, checking codes continue densely from `next_code`.
pub fn parse_word_shard(data: &[u8], file: &str, next_code: u64) -> Result<Vec<Vec<u8>>> {
    let mut pos = check_header(data, ShardKind::WordDict, file)?;
    let mut payloads = Vec::new();
    let mut expected = next_code;
    while pos < data.len() {
        let code = dict_varint(data, &mut pos, file)?;
        if code != expected {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{file}: code {code} where {expected} was expected"
            )));
        }
        let len = dict_varint(data, &mut pos, file)? as usize;
        let payload = take_bytes(data, &mut pos, len, file)?;
        payloads.push(payload.to_vec());
        expected += 1;
    }
    Ok(payloads)
}

/// Parses a sentence shard into piece lists, checking code density and that
/// every payload is internally consistent.
pub fn parse_sentence_shard(
    data: &[u8],
    file: &str,
    next_code: u64,
) -> Result<Vec<Vec<SentencePiece>>> {
    let mut pos = check_header(data, ShardKind::SentenceDict, file)?;
    let mut records = Vec::new();
    let mut expected = next_code;
    while pos < data.len() {
        let code = dict_varint(data, &mut pos, file)?;
        if code != expected {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{file}: code {code} where {expected} was expected"
            )));
        }
        let payload_len = dict_varint(data, &mut pos, file)? as usize;
        let payload_end = pos
            .checked_add(payload_len)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                CodecError::DictionaryCorrupt(format!("{file}: record runs past the shard"))
            })?;

        let piece_count = dict_varint(data, &mut pos, file)?;
        let mut pieces = Vec::with_capacity(piece_count.min(1024) as usize);
        for _ in 0..piece_count {
            if pos >= payload_end {
                return Err(CodecError::DictionaryCorrupt(format!(
                    "{file}: pieces run past their payload"
                )));
            }
            let tag = data[pos];
            pos += 1;
            match tag {
                TAG_WORD_REF => {
                    let code = dict_varint(data, &mut pos, file)?;
                    pieces.push(SentencePiece::Word(code_as_u32(code, file)?));
                }
                TAG_LITERAL => {
                    let len = dict_varint(data, &mut pos, file)? as usize;
                    let bytes = take_bytes(data, &mut pos, len, file)?;
                    pieces.push(SentencePiece::Literal(bytes.to_vec()));
                }
                other => {
                    return Err(CodecError::DictionaryCorrupt(format!(
                        "{file}: invalid piece tag {other:#04x}"
                    )));
                }
            }
        }
        if pos != payload_end {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{file}: payload length disagrees with its pieces"
            )));
        }
        records.push(pieces);
        expected += 1;
    }
    Ok(records)
}

/// Parses an encoded shard up to and including its end marker.
pub fn parse_encoded_shard(data: &[u8], file: &str) -> Result<Vec<EncodedUnit>> {
    let mut pos = check_header(data, ShardKind::Encoded, file)?;
    let mut units = Vec::new();
    loop {
        let Some(&tag) = data.get(pos) else {
            return Err(CodecError::EncodedStreamTruncated(format!(
                "{file}: shard ends before its end marker"
            )));
        };
        pos += 1;
        match tag {
            TAG_END => {
                if pos != data.len() {
                    return Err(CodecError::DictionaryCorrupt(format!(
                        "{file}: {} trailing bytes after the end marker",
                        data.len() - pos
                    )));
                }
                return Ok(units);
            }
            TAG_SENTENCE_REF => {
                let code = encoded_varint(data, &mut pos, file)?;
                units.push(EncodedUnit::SentenceRef(code_as_u32(code, file)?));
            }
            TAG_WORD_REF => {
                let code = encoded_varint(data, &mut pos, file)?;
                units.push(EncodedUnit::WordRef(code_as_u32(code, file)?));
            }
            TAG_LITERAL => {
                let len = encoded_varint(data, &mut pos, file)? as usize;
                let end = pos.checked_add(len).filter(|&end| end <= data.len());
                let Some(end) = end else {
                    return Err(CodecError::EncodedStreamTruncated(format!(
                        "{file}: literal runs past the shard"
                    )));
                };
                units.push(EncodedUnit::Literal(data[pos..end].to_vec()));
                pos = end;
            }
            other => {
                return Err(CodecError::DictionaryCorrupt(format!(
                    "{file}: invalid unit tag {other:#04x}"
                )));
            }
        }
    }
}

fn encoded_varint(data: &[u8], pos: &mut usize, file: &str) -> Result<u64> {
    read_varint(data, pos).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            CodecError::EncodedStreamTruncated(format!("{file}: {e}"))
        }
        _ => CodecError::DictionaryCorrupt(format!("{file}: {e}")),
    })
}

// ============================================================================
// Directory-level loads
// ============================================================================

/// Loads and fully validates a word-dictionary directory.
pub fn load_word_dictionary(dir: &Path) -> Result<(WordDictionary, Manifest)> {
    let manifest = read_manifest(dir, ShardKind::WordDict)?;
    let mut payloads = Vec::new();
    let mut next_code = 0u64;
    for entry in &manifest.shards {
        let data = read_shard_bytes(dir, entry, ShardKind::WordDict)?;
        let records = parse_word_shard(&data, &entry.file, next_code)?;
        if records.len() as u64 != entry.records {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{}: {} records where the manifest lists {}",
                entry.file,
                records.len(),
                entry.records
            )));
        }
        next_code += records.len() as u64;
        payloads.extend(records);
    }
    if next_code != manifest.total_records {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: {next_code} records where the manifest lists {}",
            dir.display(),
            manifest.total_records
        )));
    }
    let dict = WordDictionary::from_payloads(payloads)?;
    Ok((dict, manifest))
}

/// Loads and fully validates a sentence-dictionary directory.
pub fn load_sentence_dictionary(dir: &Path) -> Result<(SentenceDictionary, Manifest)> {
    let manifest = read_manifest(dir, ShardKind::SentenceDict)?;
    let mut entries = Vec::new();
    let mut next_code = 0u64;
    for entry in &manifest.shards {
        let data = read_shard_bytes(dir, entry, ShardKind::SentenceDict)?;
        let records = parse_sentence_shard(&data, &entry.file, next_code)?;
        if records.len() as u64 != entry.records {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{}: {} records where the manifest lists {}",
                entry.file,
                records.len(),
                entry.records
            )));
        }
        next_code += records.len() as u64;
        entries.extend(records.into_iter().map(|pieces| SentenceEntry {
            pieces,
            frequency: 0,
        }));
    }
    if next_code != manifest.total_records {
        return Err(CodecError::DictionaryCorrupt(format!(
            "{}: {next_code} records where the manifest lists {}",
            dir.display(),
            manifest.total_records
        )));
    }

    // Two identical payloads would make expansion ambiguous in reverse.
    let dict = SentenceDictionary::from_entries(entries);
    let mut seen: rustc_hash::FxHashSet<&[SentencePiece]> = rustc_hash::FxHashSet::default();
    for (code, entry) in dict.iter() {
        if !seen.insert(entry.pieces.as_slice()) {
            return Err(CodecError::DictionaryCorrupt(format!(
                "{}: sentence code {code} duplicates an earlier payload",
                dir.display()
            )));
        }
    }
    Ok((dict, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;
    use tempfile::tempdir;

    fn word_dict(pairs: &[(&[u8], u64)]) -> WordDictionary {
        let counts: FxHashMap<Vec<u8>, u64> =
            pairs.iter().map(|(k, v)| (k.to_vec(), *v)).collect();
        WordDictionary::build(counts, 2).unwrap()
    }

    fn write_word_dir(dir: &Path, words: &WordDictionary, target_bytes: usize) -> Manifest {
        let (shards, total) = write_word_dictionary(dir, words, target_bytes).unwrap();
        let manifest = Manifest::new(ShardKind::WordDict, 0, total, shards);
        write_manifest(dir, &manifest).unwrap();
        manifest
    }

    #[test]
    fn test_word_dictionary_roundtrip() {
        let tmp = tempdir().unwrap();
        let words = word_dict(&[(b"the", 10), (b"cat", 4), (b"mat", 2)]);
        let manifest = write_word_dir(tmp.path(), &words, 1 << 20);

        assert_eq!(manifest.shard_count, 1);
        assert_eq!(manifest.total_records, 3);

        let (loaded, loaded_manifest) = load_word_dictionary(tmp.path()).unwrap();
        assert_eq!(loaded_manifest, manifest);
        assert_eq!(loaded.len(), words.len());
        for (code, entry) in words.iter() {
            assert_eq!(loaded.payload(code), Some(entry.payload.as_slice()));
            assert_eq!(loaded.code_of(&entry.payload), Some(code));
        }
    }

    #[test]
    fn test_tiny_target_rotates_shards() {
        let tmp = tempdir().unwrap();
        let counts: FxHashMap<Vec<u8>, u64> = (0..100u32)
            .map(|i| (format!("word{i:03}").into_bytes(), 2 + u64::from(i)))
            .collect();
        let words = WordDictionary::build(counts, 2).unwrap();

        let manifest = write_word_dir(tmp.path(), &words, 64);
        assert!(manifest.shard_count > 1, "64-byte target must rotate");
        assert_eq!(manifest.shards[0].file, "shard_00000.dict");
        assert_eq!(manifest.shards[1].file, "shard_00001.dict");

        let (loaded, _) = load_word_dictionary(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 100);
        // Codes stay dense across the file split.
        for code in 0..100u32 {
            assert!(loaded.payload(code).is_some());
        }
    }

    #[test]
    fn test_sentence_dictionary_roundtrip() {
        let tmp = tempdir().unwrap();
        let words = word_dict(&[(b"the", 4), (b"cat", 2)]);
        let counts: FxHashMap<Vec<u8>, u64> =
            [(b"the cat sat.".to_vec(), 3)].into_iter().collect();
        let sentences = SentenceDictionary::build(counts, 2, &words).unwrap();

        let (shards, total) =
            write_sentence_dictionary(tmp.path(), &sentences, 1 << 20).unwrap();
        let manifest = Manifest::new(ShardKind::SentenceDict, 0, total, shards);
        write_manifest(tmp.path(), &manifest).unwrap();

        let (loaded, _) = load_sentence_dictionary(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.entry(0).unwrap().pieces,
            sentences.entry(0).unwrap().pieces
        );
        assert_eq!(
            loaded.entry(0).unwrap().expand(&words).unwrap(),
            b"the cat sat."
        );
    }

    #[test]
    fn test_encoded_shard_roundtrip() {
        let tmp = tempdir().unwrap();
        let units = vec![
            EncodedUnit::SentenceRef(0),
            EncodedUnit::Literal(b" ".to_vec()),
            EncodedUnit::WordRef(5),
            EncodedUnit::Literal(vec![0x00, 0xff, 0x80]),
        ];
        let mut writer = EncodedShardWriter::new(tmp.path(), 1 << 20);
        writer.write_units(&units).unwrap();
        let (shards, total) = writer.finish().unwrap();
        assert_eq!(total, 4);
        assert_eq!(shards.len(), 1);

        let manifest = Manifest::new(ShardKind::Encoded, 0, total, shards);
        let data = read_shard_bytes(tmp.path(), &manifest.shards[0], ShardKind::Encoded).unwrap();
        let parsed = parse_encoded_shard(&data, &manifest.shards[0].file).unwrap();
        assert_eq!(parsed, units);
    }

    #[test]
    fn test_flipped_byte_is_dictionary_corrupt() {
        let tmp = tempdir().unwrap();
        let words = word_dict(&[(b"alpha", 5), (b"beta", 3)]);
        let manifest = write_word_dir(tmp.path(), &words, 1 << 20);

        let shard_path = tmp.path().join(&manifest.shards[0].file);
        let mut data = fs::read(&shard_path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;
        fs::write(&shard_path, data).unwrap();

        let err = load_word_dictionary(tmp.path()).unwrap_err();
        assert!(matches!(err, CodecError::DictionaryCorrupt(_)), "{err}");
    }

    #[test]
    fn test_truncated_encoded_shard_is_reported_as_truncation() {
        let tmp = tempdir().unwrap();
        let mut writer = EncodedShardWriter::new(tmp.path(), 1 << 20);
        writer
            .write_units(&[EncodedUnit::Literal(b"some literal bytes".to_vec())])
            .unwrap();
        let (shards, _) = writer.finish().unwrap();

        let shard_path = tmp.path().join(&shards[0].file);
        let data = fs::read(&shard_path).unwrap();
        fs::write(&shard_path, &data[..data.len() - 4]).unwrap();

        let err = read_shard_bytes(tmp.path(), &shards[0], ShardKind::Encoded).unwrap_err();
        assert!(matches!(err, CodecError::EncodedStreamTruncated(_)), "{err}");
    }

    #[test]
    fn test_missing_end_marker_is_truncation() {
        // Hand-build a shard whose digest is valid but whose body lacks the
        // end marker, so the failure comes from the parser itself.
        let mut data = Vec::new();
        data.extend_from_slice(&ENCODED_MAGIC);
        data.push(SHARD_VERSION);
        data.push(TAG_WORD_REF);
        push_varint(&mut data, 9);

        let err = parse_encoded_shard(&data, "shard_00000.enc").unwrap_err();
        assert!(matches!(err, CodecError::EncodedStreamTruncated(_)), "{err}");
    }

    #[test]
    fn test_unknown_shard_version_is_version_mismatch() {
        let mut data = Vec::new();
        data.extend_from_slice(&WORD_DICT_MAGIC);
        data.push(9);
        let err = parse_word_shard(&data, "shard_00000.dict", 0).unwrap_err();
        assert!(matches!(
            err,
            CodecError::VersionMismatch {
                found: 9,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_manifest_version_gate() {
        let tmp = tempdir().unwrap();
        let words = word_dict(&[(b"x", 2)]);
        let mut manifest = write_word_dir(tmp.path(), &words, 1 << 20);
        manifest.format_version = FORMAT_VERSION + 1;
        write_manifest(tmp.path(), &manifest).unwrap();

        let err = read_manifest(tmp.path(), ShardKind::WordDict).unwrap_err();
        assert!(matches!(err, CodecError::VersionMismatch { .. }));
    }

    #[test]
    fn test_manifest_kind_and_codes_are_checked() {
        let tmp = tempdir().unwrap();
        let words = word_dict(&[(b"x", 2)]);
        write_word_dir(tmp.path(), &words, 1 << 20);

        let err = read_manifest(tmp.path(), ShardKind::SentenceDict).unwrap_err();
        assert!(matches!(err, CodecError::DictionaryCorrupt(_)));

        // Non-dense codes are rejected at parse time.
        let mut data = Vec::new();
        data.extend_from_slice(&WORD_DICT_MAGIC);
        data.push(SHARD_VERSION);
        push_varint(&mut data, 7);
        push_varint(&mut data, 1);
        data.push(b'a');
        let err = parse_word_shard(&data, "shard_00000.dict", 0).unwrap_err();
        assert!(matches!(err, CodecError::DictionaryCorrupt(_)));
    }

    #[test]
    fn test_missing_manifest_is_input_not_found() {
        let tmp = tempdir().unwrap();
        let err = read_manifest(&tmp.path().join("nowhere"), ShardKind::WordDict).unwrap_err();
        assert!(matches!(err, CodecError::InputNotFound(_)));
    }

    #[test]
    fn test_stage_dir_cleans_up_unless_published() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("out");

        let stage_path;
        {
            let stage = StageDir::create(&target).unwrap();
            stage_path = stage.path().to_path_buf();
            fs::write(stage.path().join("f"), b"x").unwrap();
        }
        assert!(!stage_path.exists(), "dropped stage must vanish");
        assert!(!target.exists());

        let stage = StageDir::create(&target).unwrap();
        fs::write(stage.path().join("f"), b"x").unwrap();
        let staged_at = stage.path().to_path_buf();
        stage.publish(&target).unwrap();
        assert!(target.join("f").exists());
        assert!(!staged_at.exists());
    }

    #[test]
    fn test_publish_replaces_previous_directory() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("out");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale"), b"old").unwrap();

        let stage = StageDir::create(&target).unwrap();
        fs::write(stage.path().join("fresh"), b"new").unwrap();
        stage.publish(&target).unwrap();

        assert!(target.join("fresh").exists());
        assert!(!target.join("stale").exists());
    }

    #[test]
    fn test_combined_checksum_tracks_every_shard() {
        let entry = |sha: &str| ShardEntry {
            file: "shard_00000.dict".to_string(),
            records: 1,
            bytes: 10,
            sha256: sha.to_string(),
        };
        let a = combined_checksum(&[entry("aa"), entry("bb")]);
        let b = combined_checksum(&[entry("aa"), entry("bc")]);
        let c = combined_checksum(&[entry("aa")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, combined_checksum(&[entry("aa"), entry("bb")]));
    }
}
