//! Round-trip integration tests for the phrasebook codec.
//!
//! These tests verify that restore(encode(x)) reproduces x byte-for-byte
//! across text, binary, unicode, and multi-shard inputs.

use phrasebook::{Codec, CodecConfig, EncodeSummary, RestoreSummary};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Encodes `text` under `config` and restores it, returning both summaries
/// and the restored bytes.
fn encode_restore(text: &[u8], config: CodecConfig) -> (EncodeSummary, RestoreSummary, Vec<u8>) {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input.bin");
    fs::write(&input, text).unwrap();

    let codec = Codec::new(config).unwrap();
    let encoded = codec
        .encode(
            &input,
            tmp.path().join("words"),
            tmp.path().join("sentences"),
            tmp.path().join("encoded"),
        )
        .unwrap();
    let restored = codec
        .restore(
            tmp.path().join("words"),
            tmp.path().join("encoded"),
            tmp.path().join("restored.bin"),
        )
        .unwrap();
    let bytes = fs::read(tmp.path().join("restored.bin")).unwrap();
    (encoded, restored, bytes)
}

/// Test the doubled-sentence scenario: one sentence entry, referenced twice,
/// restored exactly including the trailing period and separating space.
#[test]
fn test_doubled_sentence_scenario() {
    let text = b"the cat sat on the mat. the cat sat on the mat.";
    let (encoded, restored, bytes) = encode_restore(text, CodecConfig::small());

    assert_eq!(
        encoded.sentence_entries, 1,
        "the repeated sentence must yield exactly one dictionary entry"
    );
    assert_eq!(
        encoded.word_entries, 5,
        "the, cat, sat, on, mat all recur; expected 5 word entries"
    );
    assert_eq!(
        encoded.encoded_units, 3,
        "expected sentence-ref, separator literal, sentence-ref"
    );
    assert_eq!(restored.bytes_written, text.len() as u64);
    assert_eq!(bytes, text, "restored bytes must match the input exactly");
}

/// Test that minimum counts of 1 admit entries seen only once.
#[test]
fn test_minimum_count_of_one_admits_singletons() {
    let text = b"one two. three four.";
    let config = CodecConfig::small()
        .with_min_word_count(1)
        .with_min_sentence_count(1);
    let (encoded, _, bytes) = encode_restore(text, config);

    assert_eq!(bytes, text);
    assert_eq!(
        encoded.word_entries, 4,
        "every word occurs once and must still earn a code"
    );
    assert_eq!(
        encoded.sentence_entries, 2,
        "both single-occurrence sentences must earn codes"
    );
    assert_eq!(
        encoded.encoded_units, 3,
        "expected sentence-ref, separator literal, sentence-ref"
    );
}

/// Test that an empty input produces empty artifacts and an empty restore.
#[test]
fn test_empty_input_round_trips() {
    let (encoded, restored, bytes) = encode_restore(b"", CodecConfig::small());

    assert_eq!(encoded.corpus_bytes, 0);
    assert_eq!(encoded.word_entries, 0);
    assert_eq!(encoded.sentence_entries, 0);
    assert_eq!(restored.bytes_written, 0);
    assert!(bytes.is_empty());
}

/// Test a single-byte input.
#[test]
fn test_single_byte_round_trips() {
    for text in [b"x".as_slice(), b".", b" ", &[0xff]] {
        let (_, _, bytes) = encode_restore(text, CodecConfig::small());
        assert_eq!(bytes, text, "roundtrip failed for {text:?}");
    }
}

/// Test that arbitrary binary bytes survive even though nothing in them
/// looks like text.
#[test]
fn test_binary_blob_round_trips() {
    let mut blob = Vec::new();
    for round in 0u8..8 {
        for b in 0u8..=255 {
            blob.push(b.wrapping_add(round));
        }
        blob.extend_from_slice(&[0x00, 0x00, 0xff, 0xfe, b'.', b' ']);
    }
    let (_, _, bytes) = encode_restore(&blob, CodecConfig::small());
    assert_eq!(bytes, blob);
}

/// Test multi-byte UTF-8 text; non-ASCII bytes ride inside word runs.
#[test]
fn test_unicode_text_round_trips() {
    let text = "héllo wörld. héllo wörld. こんにちは 世界. naïve café! 🦀🦀.".as_bytes();
    let (encoded, _, bytes) = encode_restore(text, CodecConfig::small());
    assert_eq!(bytes, text);
    assert!(
        encoded.sentence_entries >= 1,
        "the repeated accented sentence should earn an entry"
    );
}

/// Test text with no sentence boundaries at all.
#[test]
fn test_text_without_boundaries_round_trips() {
    let text = "alpha beta gamma delta ".repeat(200);
    let (encoded, _, bytes) = encode_restore(text.as_bytes(), CodecConfig::small());
    assert_eq!(bytes, text.as_bytes());
    assert_eq!(
        encoded.sentence_entries, 0,
        "no boundary means no sentence candidates"
    );
    assert!(encoded.word_entries >= 4, "repeated words still earn codes");
}

/// Test that mixed whitespace (tabs, CRLF, doubled spaces) is preserved.
#[test]
fn test_whitespace_fidelity() {
    let text = b"one two.  one two.\r\n\r\nthree\tfour!\tthree\tfour!\n";
    let (_, _, bytes) = encode_restore(text, CodecConfig::small());
    assert_eq!(bytes, text);
}

/// Test a corpus large enough to rotate both dictionary and encoded shards.
#[test]
fn test_multi_shard_corpus_round_trips() {
    let mut text = String::new();
    for i in 0..4000 {
        // 100 distinct sentences, each repeated 40 times across the corpus.
        text.push_str(&format!("sentence number {} keeps coming back. ", i % 100));
    }
    let config = CodecConfig::small()
        .with_dict_shard_bytes(128)
        .with_encoded_shard_bytes(2048);
    let (encoded, restored, bytes) = encode_restore(text.as_bytes(), config);

    assert!(
        encoded.encoded_shards > 1,
        "2 KiB shard target must rotate, got {} shard(s)",
        encoded.encoded_shards
    );
    assert!(
        encoded.word_shards > 1,
        "128 B dict shard target must rotate, got {} shard(s)",
        encoded.word_shards
    );
    assert_eq!(restored.shards_expanded, encoded.encoded_shards);
    assert_eq!(bytes, text.as_bytes());
}

/// Test that restore works through the free functions and default config.
#[test]
fn test_default_config_free_functions() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input.txt");
    let text = b"plain default run. plain default run.";
    fs::write(&input, text).unwrap();

    phrasebook::encode(
        &input,
        tmp.path().join("words"),
        tmp.path().join("sentences"),
        tmp.path().join("encoded"),
    )
    .unwrap();
    phrasebook::restore(
        tmp.path().join("words"),
        tmp.path().join("encoded"),
        tmp.path().join("out.txt"),
    )
    .unwrap();
    assert_eq!(fs::read(tmp.path().join("out.txt")).unwrap(), text);

    let verified = phrasebook::verify(tmp.path().join("words"), tmp.path().join("encoded"));
    assert!(verified.is_ok(), "verify after encode failed: {verified:?}");
}

/// Test that restoring twice over the same output path replaces it cleanly.
#[test]
fn test_restore_overwrites_previous_output() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input.txt");
    let text = b"repeat me twice. repeat me twice.";
    fs::write(&input, text).unwrap();

    let codec = Codec::new(CodecConfig::small()).unwrap();
    codec
        .encode(
            &input,
            tmp.path().join("words"),
            tmp.path().join("sentences"),
            tmp.path().join("encoded"),
        )
        .unwrap();

    let out = tmp.path().join("out.txt");
    fs::write(&out, b"stale contents that are longer than the restore").unwrap();
    codec
        .restore(tmp.path().join("words"), tmp.path().join("encoded"), &out)
        .unwrap();
    assert_eq!(fs::read(&out).unwrap(), text);
}

/// Sanity-check that the inspectable tokenizer surface agrees with the
/// codec's lossless-partition contract.
#[test]
fn test_tokenize_partitions_input() {
    let text = b"word one, word two. and a tail";
    let tokens = phrasebook::tokenize(text);
    let rebuilt: Vec<u8> = tokens.iter().flat_map(|t| t.bytes.clone()).collect();
    assert_eq!(rebuilt, text);
    assert!(tokens.iter().any(|t| t.kind == phrasebook::TokenKind::Word));
}

/// Test that encode and restore create missing parent directories.
#[test]
fn test_output_parent_directories_are_created() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("input.txt");
    let text = b"nested output. nested output.";
    fs::write(&input, text).unwrap();

    let codec = Codec::new(CodecConfig::small()).unwrap();
    codec
        .encode(
            &input,
            tmp.path().join("artifacts/words"),
            tmp.path().join("artifacts/sentences"),
            tmp.path().join("artifacts/encoded"),
        )
        .unwrap();
    let out = tmp.path().join("deep/nested/out.txt");
    codec
        .restore(
            tmp.path().join("artifacts/words"),
            tmp.path().join("artifacts/encoded"),
            &out,
        )
        .unwrap();
    assert_eq!(fs::read(&out).unwrap(), text);
    assert!(Path::new(&tmp.path().join("artifacts/words/manifest.json")).exists());
}
