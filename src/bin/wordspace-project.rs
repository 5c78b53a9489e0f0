use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wordspace::{StoreFormat, Tsne, VectorStore};

/// Project word vectors to 2-D with t-SNE and print `token x y` lines.
#[derive(Parser)]
struct Options {
    /// Word vectors, as written by `wordspace --output`
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// The file is in the text format (default: binary)
    #[arg(long)]
    text: bool,

    /// Project only the N most frequent words
    #[arg(long, value_name = "N", default_value_t = 1000)]
    limit: usize,

    /// Project only these words (overrides --limit)
    #[arg(long, value_delimiter = ',')]
    words: Vec<String>,

    #[arg(long, default_value_t = 50.0)]
    perplexity: f64,

    #[arg(long, default_value_t = 1000)]
    iterations: usize,

    #[arg(long = "learning-rate", default_value_t = 200.0)]
    learning_rate: f64,

    #[arg(long)]
    seed: Option<u64>,

    /// Write the coordinates to FILE instead of stdout
    #[arg(long = "output", value_name = "FILE")]
    output_file: Option<PathBuf>,
}

fn run(options: &Options) -> Result<()> {
    let format = if options.text {
        StoreFormat::Text
    } else {
        StoreFormat::Binary
    };
    let store = VectorStore::load(&options.file_name, format)?;

    let rows: Vec<usize> = if options.words.is_empty() {
        (0..store.num_words().min(options.limit)).collect()
    } else {
        let mut rows = Vec::with_capacity(options.words.len());
        for word in &options.words {
            match store.lookup_word(word) {
                Some(i) => rows.push(i),
                None => bail!("{word:?} is not in the vocabulary"),
            }
        }
        rows
    };

    let projection = Tsne::new()
        .perplexity(options.perplexity)
        .iterations(options.iterations)
        .learning_rate(options.learning_rate)
        .seed(options.seed)
        .fit_rows(&store, &rows)?;

    match &options.output_file {
        Some(path) => projection.save(path)?,
        None => {
            let mut out = BufWriter::new(io::stdout().lock());
            projection.write_to(&mut out)?;
            out.flush().context("error writing to stdout")?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
