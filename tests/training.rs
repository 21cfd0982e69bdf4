//! End-to-end runs over small corpora: count, train, write.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use wordvec::matrix::{Matrix, Updates};
use wordvec::output::{save_output, Model};
use wordvec::{Architecture, OutputFormat, Rng, TrainConfig, Trainer, Vectors, Vocabulary};

fn corpus(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("corpus.txt");
    fs::write(&path, text).unwrap();
    path
}

fn config() -> TrainConfig {
    TrainConfig {
        size: 8,
        window: 3,
        num_threads: 1,
        iter: 2,
        min_count: 1,
        hash_size: 10_000,
        table_size: 10_000,
        ..TrainConfig::default()
    }
}

fn train(path: &Path, config: TrainConfig) -> Trainer {
    let vocab = Vocabulary::learn_from_file(path, config.hash_size, config.min_count).unwrap();
    let mut trainer = Trainer::new(config, vocab, path).unwrap();
    trainer.train().unwrap();
    trainer
}

/// A few thousand words with some structure to learn.
fn sample_text() -> String {
    let mut rng = Rng::new(42);
    let animals = ["cat", "dog", "cow", "pig", "hen"];
    let verbs = ["eats", "sees", "likes", "chases"];
    let foods = ["grass", "corn", "bread", "apples"];
    let mut text = String::new();
    for _ in 0..400 {
        let a = animals[rng.rand_u64() as usize % animals.len()];
        let v = verbs[rng.rand_u64() as usize % verbs.len()];
        let f = foods[rng.rand_u64() as usize % foods.len()];
        let b = animals[rng.rand_u64() as usize % animals.len()];
        text.push_str(&format!("the {a} {v} {f} and the {b} {v} the {a}\n"));
    }
    text
}

#[test]
fn tiny_cbow_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, "a b a b a b c\n");
    let config = TrainConfig {
        size: 2,
        window: 1,
        negative: 1,
        iter: 1,
        architecture: Architecture::Cbow,
        ..config()
    };
    let trainer = train(&path, config);

    let mut counts: Vec<(String, u64)> = trainer
        .vocab()
        .words()
        .iter()
        .map(|w| (w.word.clone(), w.count))
        .collect();
    counts.sort();
    assert_eq!(
        counts,
        [
            ("</s>".to_string(), 1),
            ("a".to_string(), 3),
            ("b".to_string(), 3),
            ("c".to_string(), 1)
        ]
    );

    let out = dir.path().join("vectors.txt");
    save_output(&trainer, &out, OutputFormat::Text, None).unwrap();
    let text = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "4 2");
    assert_eq!(lines.len(), 1 + 4);
    for line in &lines[1..] {
        assert_eq!(line.split_whitespace().count(), 3);
    }
}

#[test]
fn empty_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, "");
    let trainer = train(&path, config());
    assert_eq!(trainer.vocab().len(), 1);
    assert_eq!(trainer.vocab()[0].word, "</s>");
    assert_eq!(trainer.vocab()[0].count, 0);

    let out = dir.path().join("vectors.txt");
    save_output(&trainer, &out, OutputFormat::Text, None).unwrap();
    let text = fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().next(), Some("1 8"));
    assert_eq!(text.lines().count(), 2);
}

#[test]
fn no_output_layer_means_no_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    for architecture in [Architecture::Cbow, Architecture::SkipGram] {
        let config = TrainConfig {
            hs: false,
            negative: 0,
            architecture,
            ..config()
        };
        let cols = config.size;
        let trainer = train(&path, config);
        let initial = Matrix::random(trainer.vocab().len(), cols, &mut Rng::new(1)).unwrap();
        assert_eq!(trainer.embeddings().to_vec(), initial.to_vec(), "{architecture:?}");
    }
}

#[test]
fn single_thread_runs_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    for architecture in [Architecture::Cbow, Architecture::SkipGram] {
        let config = TrainConfig {
            hs: true,
            negative: 3,
            sample: 1e-2,
            architecture,
            ..config()
        };
        let mut files = vec![];
        for run in 0..2 {
            let trainer = train(&path, config.clone());
            let out = dir.path().join(format!("run{run}.bin"));
            save_output(&trainer, &out, OutputFormat::Binary, None).unwrap();
            files.push(fs::read(&out).unwrap());
        }
        assert_eq!(files[0], files[1], "{architecture:?}");
    }
}

#[test]
fn similar_contexts_give_similar_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    let config = TrainConfig {
        size: 16,
        iter: 10,
        sample: 0.0,
        architecture: Architecture::SkipGram,
        ..config()
    };
    let trainer = train(&path, config);
    let out = dir.path().join("vectors.bin");
    save_output(&trainer, &out, OutputFormat::Binary, None).unwrap();

    let vectors = Vectors::load(&out).unwrap();
    let cat = vectors.lookup_word("cat").unwrap();
    let best = vectors.nearest(&vectors[cat], &[cat], 3);
    assert_eq!(best.len(), 3);
    for (word, sim) in &best {
        assert!(sim.is_finite(), "{word}");
    }
    // Animals share contexts with animals far more than with "and".
    let sim_to = |w: &str| {
        vectors
            .nearest(&vectors[cat], &[cat], vectors.num_words())
            .into_iter()
            .find(|(x, _)| *x == w)
            .unwrap()
            .1
    };
    let animals = ["dog", "cow", "pig", "hen"];
    let animal_sim = animals.iter().map(|w| sim_to(w)).sum::<f32>() / animals.len() as f32;
    assert!(animal_sim > sim_to("and"), "{animal_sim} vs {}", sim_to("and"));
}

#[test]
fn both_output_layers_together() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    let config = TrainConfig {
        hs: true,
        negative: 2,
        ..config()
    };
    let trainer = train(&path, config);
    assert!(trainer.hs_weights().unwrap().to_vec().iter().any(|&w| w != 0.0));
    assert!(trainer.negative_weights().unwrap().to_vec().iter().any(|&w| w != 0.0));
}

#[test]
fn many_threads_finish() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    for updates in [Updates::Racy, Updates::Exact] {
        let config = TrainConfig {
            num_threads: 4,
            hs: true,
            updates,
            ..config()
        };
        let trainer = train(&path, config);
        assert!(trainer.embeddings().to_vec().iter().all(|w| w.is_finite()));
        assert!(trainer.words_processed() > 0);
    }
}

#[test]
fn saved_vocabulary_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, "x x x y y z\nx y w\nq\n");
    let vocab_file = dir.path().join("vocab.txt");

    let full = Vocabulary::learn_from_file(&path, 100, 1).unwrap();
    full.save(&vocab_file).unwrap();

    let fresh = Vocabulary::learn_from_file(&path, 100, 2).unwrap();
    let read = Vocabulary::read(&vocab_file, 100, 2).unwrap();
    let pairs = |v: &Vocabulary| -> Vec<(String, u64)> {
        v.words().iter().map(|w| (w.word.clone(), w.count)).collect()
    };
    assert_eq!(pairs(&read), pairs(&fresh));
    assert_eq!(read.train_words(), fresh.train_words());
    for w in ["z", "w", "q"] {
        assert_eq!(read.lookup(w), None);
    }
}

#[test]
fn bincode_model_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    let config = TrainConfig {
        hs: true,
        ..config()
    };
    let trainer = train(&path, config);
    let out = dir.path().join("model.bin");
    save_output(&trainer, &out, OutputFormat::Bincode, None).unwrap();

    let model = Model::load(&out).unwrap();
    assert_eq!(model.size, 8);
    assert_eq!(model.vocab.len(), trainer.vocab().len());
    assert_eq!(model.embeddings, trainer.embeddings().to_vec());
    assert_eq!(model.weights, trainer.hs_weights().unwrap().to_vec());
    for vw in &model.vocab[1..] {
        assert!(!vw.code.is_empty());
        assert_eq!(vw.code.len(), vw.point.len());
    }
}

#[test]
fn classes_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    let trainer = train(&path, config());
    let out = dir.path().join("classes.txt");
    save_output(&trainer, &out, OutputFormat::Text, Some(3)).unwrap();

    let text = fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), trainer.vocab().len());
    for (line, vw) in text.lines().zip(trainer.vocab().words()) {
        let (word, class) = line.split_once(' ').unwrap();
        assert_eq!(word, vw.word);
        assert!(class.parse::<usize>().unwrap() < 3);
    }
}

#[test]
fn zero_classes_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    let trainer = train(&path, config());
    let out = dir.path().join("classes.txt");
    let err = save_output(&trainer, &out, OutputFormat::Text, Some(0)).err().unwrap();
    assert!(format!("{err:#}").contains("number of classes"));
    assert!(!out.exists());
}

#[test]
fn text_output_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = corpus(&dir, &sample_text());
    let trainer = train(&path, config());
    let out = dir.path().join("vectors.txt");
    save_output(&trainer, &out, OutputFormat::Text, None).unwrap();

    let vectors = Vectors::load_text(&out).unwrap();
    assert_eq!(vectors.num_words(), trainer.vocab().len());
    for i in 0..vectors.num_words() {
        assert_eq!(&vectors[i], trainer.embeddings().row_values(i).as_slice());
    }
}

#[test]
fn missing_corpus_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    let err = Vocabulary::learn_from_file(&missing, 100, 1).err().unwrap();
    assert!(format!("{err:#}").contains("error opening training data file"));
}
