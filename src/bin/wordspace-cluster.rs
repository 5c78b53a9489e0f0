use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wordspace::{KMeans, StoreFormat, VectorStore};

/// Group word vectors into K clusters and print `token cluster` lines.
#[derive(Parser)]
struct Options {
    /// Word vectors, as written by `wordspace --output`
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// The file is in the text format (default: binary)
    #[arg(long)]
    text: bool,

    /// Number of clusters
    #[arg(short = 'k', long, default_value_t = 100)]
    classes: usize,

    #[arg(long = "max-iter", default_value_t = 100)]
    max_iterations: usize,

    #[arg(long)]
    seed: Option<u64>,

    /// Write the classes to FILE instead of stdout
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
    let classes = KMeans::new(options.classes)
        .max_iterations(options.max_iterations)
        .seed(options.seed)
        .fit(&store)?;

    match &options.output_file {
        Some(path) => classes.save(path)?,
        None => {
            let mut out = BufWriter::new(io::stdout().lock());
            classes.write_to(&mut out)?;
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
