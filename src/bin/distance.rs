use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wordspace::{Error, QueryEngine, StoreFormat, VectorStore};

/// Show the nearest neighbours of a word, or of the sum of several words.
#[derive(Parser)]
struct Options {
    /// Word vectors, as written by `wordspace --output`
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// The file is in the text format (default: binary)
    #[arg(long)]
    text: bool,

    /// Number of closest words that will be shown
    #[arg(short = 'n', long, default_value_t = 40)]
    top: usize,
}

fn run(options: &Options) -> Result<()> {
    let format = if options.text {
        StoreFormat::Text
    } else {
        StoreFormat::Binary
    };
    let store = VectorStore::load(&options.file_name, format)?;
    let engine = QueryEngine::new(&store);

    let mut line = String::new();
    loop {
        print!("Enter word or sentence (EXIT to break): ");
        let _ = std::io::stdout().flush();

        line.clear();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line == "EXIT" {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        for word in &words {
            println!();
            print!("Word: {word}  Position in vocabulary: ");
            match store.lookup_word(word) {
                Some(i) => println!("{i}"),
                None => println!("None"),
            }
        }

        match engine.nearest_to_tokens(&words, options.top) {
            Ok(hits) => {
                println!();
                println!("                                              Word       Cosine distance");
                println!("------------------------------------------------------------------------");
                for hit in hits {
                    println!("{:>50}\t\t{:8.6}", hit.token, hit.score);
                }
            }
            Err(Error::UnknownToken(_)) => println!("Out of dictionary word!"),
            Err(err) => println!("{err}"),
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
