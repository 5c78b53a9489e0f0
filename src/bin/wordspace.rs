use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wordspace::corpus::open_sentences;
use wordspace::{
    real, Architecture, Corpus, KMeans, Model, StoreFormat, Trainer, TrainingConfig, VocabBuilder,
    Vocabulary,
};

#[derive(Parser)]
#[command(about = "Train word vectors with skip-gram or CBOW", long_about = None)]
struct Options {
    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Use FILE to save the resulting word vectors / word clusters
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Also write the output after each epoch. The --output filename gets
    /// `-1`, `-2`, etc. appended.
    #[arg(long)]
    dump_epochs: bool,

    /// Set size of word vectors
    #[arg(long = "size", default_value_t = 100)]
    embedding_dimension: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; default
    /// is 1e-3, useful range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Use Hierarchical Softmax
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; common values are 3 - 10 (0 = not used)
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads (default: one per CPU)
    #[arg(long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Number of training epochs
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Prune rare words while counting whenever more than N distinct words have been seen
    #[arg(long = "max-vocab", value_name = "N")]
    max_vocab_size: Option<usize>,

    /// Set the starting learning rate; default is 0.025 for skip-gram and 0.05 for CBOW
    #[arg(long)]
    alpha: Option<real>,

    /// Seed all random draws; with --threads 1 the output is reproducible
    #[arg(long)]
    seed: Option<u64>,

    /// Output word classes rather than word vectors; if unspecified, vectors are written instead
    #[arg(long, value_name = "K")]
    classes: Option<usize>,

    /// Save the resulting vectors in binary mode
    #[arg(long)]
    binary: bool,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,

    /// Save a checkpoint (all parameters, for --resume) to FILE after training
    #[arg(long, value_name = "FILE")]
    checkpoint: Option<PathBuf>,

    /// Continue training from a checkpoint made with --checkpoint
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Use the continuous bag of words model (otherwise, use skip-gram model)
    #[arg(long)]
    cbow: bool,
}

impl Options {
    fn training_config(&self) -> TrainingConfig {
        let defaults = TrainingConfig::default();
        TrainingConfig {
            embedding_dimension: self.embedding_dimension,
            window: self.window,
            min_count: self.min_count,
            negative_samples: self.negative,
            use_hierarchical_softmax: self.hs,
            architecture: if self.cbow {
                Architecture::Cbow
            } else {
                Architecture::SkipGram
            },
            epochs: self.iter,
            initial_learning_rate: self.alpha,
            threads: self.threads.unwrap_or(defaults.threads),
            subsample_threshold: self.sample,
            seed: self.seed,
            max_vocab_size: self.max_vocab_size,
            ..defaults
        }
    }

    fn format(&self) -> StoreFormat {
        if self.binary {
            StoreFormat::Binary
        } else {
            StoreFormat::Text
        }
    }
}

fn learn_vocab(options: &Options, config: &TrainingConfig) -> Result<Vocabulary> {
    if let Some(path) = &options.read_vocab_file {
        return Vocabulary::read(path, config.min_count)
            .with_context(|| format!("reading vocabulary from {}", path.display()));
    }
    let mut builder = VocabBuilder::new().with_max_size(config.max_vocab_size);
    for sentence in open_sentences(&options.train_file)? {
        builder.extend(sentence?);
    }
    Ok(builder.build(config.min_count)?)
}

/// `out.txt` becomes `out.txt-3` for epoch 3.
fn epoch_path(path: &Path, epoch: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!("-{epoch}"));
    PathBuf::from(name)
}

fn write_output(options: &Options, trainer: &Trainer, path: &Path) -> wordspace::Result<()> {
    let store = trainer.vectors()?;
    match options.classes {
        None => store.save(path, options.format()),
        Some(k) => KMeans::new(k).seed(options.seed).fit(&store)?.save(path),
    }
}

fn train(options: &Options) -> Result<()> {
    let config = options.training_config();
    let vocab = learn_vocab(options, &config)?;
    if let Some(path) = &options.save_vocab_file {
        vocab.save(path)?;
    }

    let corpus = Corpus::read(&options.train_file, &vocab, config.max_sentence_length)?;
    let epochs = config.epochs;

    let bar = ProgressBar::new(0).with_style(ProgressStyle::with_template(
        "{elapsed_precise} [{wide_bar}] {percent}% {per_sec} words/s, {msg}",
    )?);
    let mut trainer = Trainer::new(config, vocab)?.with_progress(bar.clone());
    if let Some(path) = &options.resume {
        let model = Model::load(path)?;
        trainer = trainer
            .with_model(&model)
            .with_context(|| format!("cannot resume from {}", path.display()))?;
    }

    let report = trainer.train_with(&corpus, |epoch, trainer| {
        if options.dump_epochs && epoch < epochs {
            write_output(options, trainer, &epoch_path(&options.output_file, epoch))?;
        }
        Ok(())
    })?;
    bar.finish_and_clear();
    info!(
        words = report.words_processed,
        trained = report.words_trained,
        seconds = report.elapsed.as_secs_f64(),
        warnings = report.warnings.len(),
        "training complete"
    );

    write_output(options, &trainer, &options.output_file)?;
    if let Some(path) = &options.checkpoint {
        trainer.to_model().save(path)?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    if let Err(err) = train(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
