//! Files written by one run and read back by another.

use tempfile::tempdir;

use wordspace::*;

fn sample_store() -> VectorStore {
    let words = ["the", "of", "naïve", "x"].map(String::from).to_vec();
    let vecs = vec![
        0.1, -0.2, 0.3, //
        1e-7, 12345.678, -0.0, //
        f32::MIN_POSITIVE, 3.0e20, -1.5, //
        0.0, 0.0, 0.0,
    ];
    VectorStore::new(words, 3, vecs).unwrap()
}

#[test]
fn binary_round_trip_is_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vectors.bin");
    let store = sample_store();
    store.save(&path, StoreFormat::Binary).unwrap();

    let loaded = VectorStore::load(&path, StoreFormat::Binary).unwrap();
    assert_eq!(loaded.words(), store.words());
    assert_eq!(loaded.size(), 3);
    let bits = |s: &VectorStore| s.embeddings().iter().map(|x| x.to_bits()).collect::<Vec<u32>>();
    assert_eq!(bits(&loaded), bits(&store));
}

#[test]
fn text_round_trip_is_close() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vectors.txt");
    let store = sample_store();
    store.save(&path, StoreFormat::Text).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("4 3\nthe "));

    let loaded = VectorStore::load(&path, StoreFormat::Text).unwrap();
    assert_eq!(loaded.words(), store.words());
    for (a, b) in loaded.embeddings().iter().zip(store.embeddings()) {
        assert!((a - b).abs() <= 1e-6 * b.abs().max(1.0), "{a} != {b}");
    }
}

#[test]
fn reading_the_wrong_format_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vectors.bin");
    sample_store().save(&path, StoreFormat::Binary).unwrap();
    assert!(VectorStore::load(&path, StoreFormat::Text).is_err());
}

#[test]
fn missing_file() {
    let dir = tempdir().unwrap();
    let err = VectorStore::load(&dir.path().join("nope"), StoreFormat::Binary).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn vocabulary_file_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vocab.txt");
    let vocab = Vocabulary::from_tokens("b a b c b a d".split(' '), 1).unwrap();
    vocab.save(&path).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "b 3\na 2\nc 1\nd 1\n");

    let read = Vocabulary::read(&path, 2).unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(read.word(0), "b");
    assert_eq!(read.word(1), "a");
    assert_eq!(read.total_tokens(), 5);
}

#[test]
fn checkpoint_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.bin");

    let tokens = "a b c a b a d a b c".split(' ').collect::<Vec<_>>();
    let vocab = Vocabulary::from_tokens(&tokens, 1).unwrap();
    let corpus = Corpus::from_tokens(&vocab, &tokens, 1000);
    let config = TrainingConfig {
        embedding_dimension: 4,
        min_count: 1,
        threads: 1,
        epochs: 2,
        use_hierarchical_softmax: true,
        seed: Some(3),
        ..TrainingConfig::default()
    };
    let mut trainer = Trainer::new(config, vocab).unwrap();
    trainer.train(&corpus).unwrap();
    let model = trainer.to_model();
    model.save(&path).unwrap();

    let loaded = Model::load(&path).unwrap();
    assert_eq!(loaded.vocab, model.vocab);
    assert_eq!(loaded.embeddings, model.embeddings);
    assert_eq!(loaded.weights, model.weights);
    assert_eq!(loaded.syn1neg, model.syn1neg);
    assert_eq!(loaded.weights.len(), 3 * 4);
    assert_eq!(loaded.syn1neg.len(), 4 * 4);
    assert_eq!(loaded.config.seed, Some(3));

    let store = loaded.vectors().unwrap();
    assert_eq!(store.words(), trainer.vectors().unwrap().words());
}

#[test]
fn corrupt_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.bin");
    std::fs::write(&path, b"not a model").unwrap();
    assert!(matches!(Model::load(&path), Err(Error::Checkpoint(_))));
}
