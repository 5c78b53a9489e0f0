//! End-to-end training runs on a small synthetic corpus.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use wordspace::*;

const ANIMALS: [&str; 6] = ["cat", "dog", "mouse", "horse", "sheep", "goat"];
const FRUIT: [&str; 6] = ["apple", "pear", "plum", "banana", "cherry", "grape"];

/// Sentences that each draw all their tokens from one of two topics.
fn two_topic_corpus(sentences: usize) -> Vec<Vec<&'static str>> {
    let mut rng = StdRng::seed_from_u64(2024);
    (0..sentences)
        .map(|i| {
            let topic = if i % 2 == 0 { &ANIMALS } else { &FRUIT };
            (0..10).map(|_| *topic.choose(&mut rng).unwrap()).collect()
        })
        .collect()
}

fn config() -> TrainingConfig {
    TrainingConfig {
        embedding_dimension: 16,
        window: 3,
        min_count: 1,
        negative_samples: 5,
        epochs: 5,
        threads: 1,
        subsample_threshold: 0.0,
        seed: Some(7),
        ..TrainingConfig::default()
    }
}

fn train(config: TrainingConfig, sentences: &[Vec<&str>]) -> (VectorStore, TrainingReport) {
    let vocab = Vocabulary::from_tokens(sentences.iter().flatten(), config.min_count).unwrap();
    let corpus = Corpus::from_sentences(&vocab, sentences, config.max_sentence_length);
    let mut trainer = Trainer::new(config, vocab).unwrap();
    let report = trainer.train(&corpus).unwrap();
    (trainer.vectors().unwrap(), report)
}

/// Mean similarity within topics minus mean similarity across them.
fn topic_margin(store: &VectorStore) -> f32 {
    let q = QueryEngine::new(store);
    let (mut within, mut across) = (vec![], vec![]);
    for a in ANIMALS.iter().chain(&FRUIT) {
        for b in ANIMALS.iter().chain(&FRUIT) {
            if a == b {
                continue;
            }
            let s = q.similarity(a, b).unwrap();
            if ANIMALS.contains(a) == ANIMALS.contains(b) {
                within.push(s);
            } else {
                across.push(s);
            }
        }
    }
    let mean = |v: &[f32]| v.iter().sum::<f32>() / v.len() as f32;
    mean(&within) - mean(&across)
}

#[test]
fn output_shape_and_values() {
    let sentences = two_topic_corpus(200);
    let (store, report) = train(config(), &sentences);
    assert_eq!(store.num_words(), 12);
    assert_eq!(store.size(), 16);
    assert_eq!(store.embeddings().len(), 12 * 16);
    assert!(store.embeddings().iter().all(|x| x.is_finite()));
    assert_eq!(report.epochs, 5);
    assert_eq!(report.words_processed, 5 * 200 * 10);
    assert_eq!(report.words_trained, report.words_processed);
    assert!(report.warnings.is_empty());
}

#[test]
fn seeded_single_thread_runs_match() {
    let sentences = two_topic_corpus(100);
    let (a, _) = train(config(), &sentences);
    let (b, _) = train(config(), &sentences);
    assert_eq!(a.words(), b.words());
    assert_eq!(a.embeddings(), b.embeddings());

    let (c, _) = train(
        TrainingConfig {
            seed: Some(8),
            ..config()
        },
        &sentences,
    );
    assert_ne!(a.embeddings(), c.embeddings());
}

#[test]
fn skip_gram_groups_topics() {
    let sentences = two_topic_corpus(1000);
    let (store, _) = train(config(), &sentences);
    assert!(topic_margin(&store) > 0.2);
}

#[test]
fn cbow_with_hierarchical_softmax_groups_topics() {
    let sentences = two_topic_corpus(1000);
    let config = TrainingConfig {
        architecture: Architecture::Cbow,
        use_hierarchical_softmax: true,
        negative_samples: 0,
        ..config()
    };
    let (store, _) = train(config, &sentences);
    assert!(store.embeddings().iter().all(|x| x.is_finite()));
    assert!(topic_margin(&store) > 0.2);
}

#[test]
fn multithreaded_training_finishes() {
    let sentences = two_topic_corpus(400);
    let config = TrainingConfig {
        threads: 4,
        use_hierarchical_softmax: true,
        ..config()
    };
    let (store, report) = train(config, &sentences);
    assert_eq!(report.words_processed, 5 * 400 * 10);
    assert!(store.embeddings().iter().all(|x| x.is_finite()));
}

#[test]
fn subsampling_skips_a_dominant_token() {
    // Nine "the" per sentence, then one topic word.
    let topics: Vec<&str> = ANIMALS.iter().chain(&FRUIT).copied().collect();
    let sentences: Vec<Vec<&str>> = (0..300)
        .map(|i| {
            let mut sentence = vec!["the"; 9];
            sentence.insert(i % 10, topics[i % topics.len()]);
            sentence
        })
        .collect();

    let (full, report) = train(config(), &sentences);
    assert_eq!(report.words_processed, 5 * 300 * 10);
    assert_eq!(report.words_trained, report.words_processed);

    let (sampled, report) = train(
        TrainingConfig {
            subsample_threshold: 1e-3,
            ..config()
        },
        &sentences,
    );
    assert_eq!(report.words_processed, 5 * 300 * 10);
    assert!(report.words_trained > 0);
    assert!(
        report.words_trained < report.words_processed / 2,
        "{} of {} trained",
        report.words_trained,
        report.words_processed
    );
    assert_eq!(sampled.words(), full.words());
    assert_ne!(sampled.embeddings(), full.embeddings());
}

#[test]
fn rare_tokens_are_dropped() {
    let mut sentences = two_topic_corpus(50);
    sentences.push(vec!["cat", "unicorn", "dog"]);
    let config = TrainingConfig {
        min_count: 2,
        ..config()
    };
    let (store, _) = train(config, &sentences);
    assert_eq!(store.lookup_word("unicorn"), None);
    assert!(matches!(
        QueryEngine::new(&store).vector_of("unicorn"),
        Err(Error::UnknownToken(_))
    ));
}

#[test]
fn empty_vocabulary_is_an_error() {
    let err = Vocabulary::from_tokens(["a", "b", "c"], 5).unwrap_err();
    assert!(matches!(err, Error::EmptyCorpus { min_count: 5, distinct: 3 }));
}

#[test]
fn invalid_configs_are_rejected() {
    let vocab = Vocabulary::from_tokens(["a", "a"], 1).unwrap();
    for bad in [
        TrainingConfig {
            embedding_dimension: 0,
            ..config()
        },
        TrainingConfig {
            threads: 0,
            ..config()
        },
        TrainingConfig {
            negative_samples: 0,
            use_hierarchical_softmax: false,
            ..config()
        },
        TrainingConfig {
            initial_learning_rate: Some(-1.0),
            ..config()
        },
    ] {
        assert!(matches!(
            Trainer::new(bad, vocab.clone()),
            Err(Error::InvalidConfig(_))
        ));
    }
}

#[test]
fn resume_continues_from_checkpoint() {
    let sentences = two_topic_corpus(200);
    let vocab = Vocabulary::from_tokens(sentences.iter().flatten(), 1).unwrap();
    let corpus = Corpus::from_sentences(&vocab, &sentences, 1000);

    let mut first = Trainer::new(config(), vocab.clone()).unwrap();
    first.train(&corpus).unwrap();
    let model = first.to_model();

    let second = Trainer::new(config(), vocab.clone()).unwrap().with_model(&model).unwrap();
    assert_eq!(
        second.vectors().unwrap().embeddings(),
        first.vectors().unwrap().embeddings()
    );

    let other = Vocabulary::from_tokens(["x", "y", "y"], 1).unwrap();
    let err = Trainer::new(config(), other).unwrap().with_model(&model).err().unwrap();
    assert!(matches!(err, Error::VocabularyMismatch { expected: 2, found: 12, .. }));

    let wide = TrainingConfig {
        embedding_dimension: 32,
        ..config()
    };
    let err = Trainer::new(wide, vocab).unwrap().with_model(&model).err().unwrap();
    assert!(matches!(err, Error::DimensionMismatch { expected: 32, found: 16 }));
}
