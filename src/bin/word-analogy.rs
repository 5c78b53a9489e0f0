use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wordspace::{Error, QueryEngine, StoreFormat, VectorStore};

/// Answer "A is to B as C is to ?" by searching near B - A + C.
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
        print!("Enter three words (EXIT to break): ");
        let _ = std::io::stdout().flush();

        line.clear();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        if line.trim() == "EXIT" {
            break;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let [a, b, c] = words[..] else {
            println!(
                "{} words were entered.. three words are needed at the input to perform the calculation",
                words.len()
            );
            continue;
        };

        match engine.analogy(a, b, c, options.top) {
            Ok(hits) => {
                println!();
                println!("                                              Word       Cosine distance");
                println!("------------------------------------------------------------------------");
                for hit in hits {
                    println!("{:>50}\t\t{:8.6}", hit.token, hit.score);
                }
            }
            Err(Error::UnknownToken(word)) => {
                println!("Word: {word}  Position in vocabulary: None");
                println!("Out of dictionary word!");
            }
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
