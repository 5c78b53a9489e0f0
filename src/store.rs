//! The trained word vectors, and the word2vec file formats for them.
//!
//! Both formats start with a header line `V D`. Each of the `V` records that
//! follow is the token, a space, then either `D` native-endian `f32`s and a
//! newline (binary) or `D` space-separated decimals and a newline (text).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::ops::Index;
use std::path::Path;

use tracing::info;

use crate::error::IoContext;
use crate::vocab::Vocabulary;
use crate::{norm, real, Error, Result};

/// Upper bound on what the header alone may reserve; past this, buffers grow
/// as records are actually read.
const MAX_PREALLOCATED: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Binary,
    Text,
}

/// An immutable table of token vectors.
#[derive(Debug, Clone)]
pub struct VectorStore {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary, in id order.
    vocab: Vec<String>,

    index: HashMap<String, usize>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`.
    embeddings: Vec<real>,

    /// Euclidean length of each row.
    norms: Vec<real>,
}

impl Index<usize> for VectorStore {
    type Output = [real];

    fn index(&self, i: usize) -> &[real] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

impl VectorStore {
    pub fn new(vocab: Vec<String>, size: usize, embeddings: Vec<real>) -> Result<Self> {
        if embeddings.len() != vocab.len() * size {
            return Err(Error::DimensionMismatch {
                expected: vocab.len() * size,
                found: embeddings.len(),
            });
        }
        let mut index = HashMap::with_capacity(vocab.len());
        for (i, word) in vocab.iter().enumerate() {
            index.entry(word.clone()).or_insert(i);
        }
        let norms = if size == 0 {
            vec![0.0; vocab.len()]
        } else {
            embeddings.chunks_exact(size).map(norm).collect()
        };
        Ok(VectorStore {
            size,
            vocab,
            index,
            embeddings,
            norms,
        })
    }

    pub fn from_vocabulary(vocab: &Vocabulary, size: usize, embeddings: Vec<real>) -> Result<Self> {
        let words = vocab.words().iter().map(|vw| vw.word.clone()).collect();
        Self::new(words, size, embeddings)
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    pub fn words(&self) -> &[String] {
        &self.vocab
    }

    pub fn norm(&self, word: usize) -> real {
        self.norms[word]
    }

    pub fn embeddings(&self) -> &[real] {
        &self.embeddings
    }

    /// A new store holding only `tokens`, in the order given.
    pub fn subset<S: AsRef<str>>(&self, tokens: &[S]) -> Result<VectorStore> {
        let mut vocab = Vec::with_capacity(tokens.len());
        let mut embeddings = Vec::with_capacity(tokens.len() * self.size);
        for token in tokens {
            let token = token.as_ref();
            let i = self
                .lookup_word(token)
                .ok_or_else(|| Error::UnknownToken(token.to_string()))?;
            vocab.push(token.to_string());
            embeddings.extend_from_slice(&self[i]);
        }
        VectorStore::new(vocab, self.size, embeddings)
    }

    pub fn save(&self, path: &Path, format: StoreFormat) -> Result<()> {
        let mut fo = BufWriter::new(File::create(path).io_context("error creating output file")?);
        self.write_to(&mut fo, format)?;
        fo.flush().io_context("error writing output file")?;
        info!(path = %path.display(), words = self.num_words(), ?format, "saved vectors");
        Ok(())
    }

    pub fn write_to<W: Write>(&self, fo: &mut W, format: StoreFormat) -> Result<()> {
        writeln!(fo, "{} {}", self.num_words(), self.size).io_context("error writing output file")?;
        for (a, word) in self.vocab.iter().enumerate() {
            if word.is_empty() || word.contains(char::is_whitespace) {
                return Err(Error::Format {
                    line: a + 2,
                    message: format!("token {word:?} cannot be stored: empty or contains whitespace"),
                });
            }
            write!(fo, "{word} ").io_context("error writing output file")?;
            let word_vec = &self[a];
            match format {
                StoreFormat::Binary => {
                    fo.write_all(bytemuck::cast_slice::<real, u8>(word_vec))
                        .io_context("error writing output file")?;
                }
                StoreFormat::Text => {
                    for f in word_vec {
                        write!(fo, "{f} ").io_context("error writing output file")?;
                    }
                }
            }
            writeln!(fo).io_context("error writing output file")?;
        }
        Ok(())
    }

    pub fn load(path: &Path, format: StoreFormat) -> Result<Self> {
        let f = BufReader::new(File::open(path).io_context("error opening input file")?);
        let store = Self::read_from(f, format)?;
        info!(path = %path.display(), words = store.num_words(), size = store.size(), "loaded vectors");
        Ok(store)
    }

    pub fn read_from<R: BufRead>(mut f: R, format: StoreFormat) -> Result<Self> {
        let mut line = String::new();
        f.read_line(&mut line).io_context("error reading input file")?;
        let mut fields = line.split_whitespace();
        let mut header_field = |name: &str| -> Result<usize> {
            fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Format {
                    line: 1,
                    message: format!("header is missing the {name}"),
                })
        };
        let num_words = header_field("number of words")?;
        let size = header_field("vector size")?;
        let row_bytes = size.checked_mul(std::mem::size_of::<real>());
        if num_words.checked_mul(size).is_none() || row_bytes.is_none() {
            return Err(Error::Format {
                line: 1,
                message: format!("{num_words} vectors of size {size} is too large"),
            });
        }

        match format {
            StoreFormat::Binary => Self::read_binary_records(f, num_words, size),
            StoreFormat::Text => Self::read_text_records(f, num_words, size),
        }
    }

    fn read_binary_records<R: BufRead>(mut f: R, num_words: usize, size: usize) -> Result<Self> {
        let row_bytes = size * std::mem::size_of::<real>();
        let mut vocab: Vec<String> = Vec::with_capacity(num_words.min(MAX_PREALLOCATED));
        let mut m: Vec<real> = Vec::with_capacity(num_words.saturating_mul(size).min(MAX_PREALLOCATED));
        let mut row = Vec::<u8>::new();
        for b in 0..num_words {
            let mut vocab_word = Vec::<u8>::new();
            let count = f
                .read_until(b' ', &mut vocab_word)
                .io_context("error reading input file")?;
            if count == 0 {
                return Err(Error::Format {
                    line: b + 2,
                    message: format!("expected {num_words} records, found {b}"),
                });
            }
            if vocab_word.last() == Some(&b' ') {
                vocab_word.pop();
            }
            vocab_word.retain(|c| *c != b'\n');
            let word = String::from_utf8(vocab_word).map_err(|_| Error::Format {
                line: b + 2,
                message: "invalid UTF-8 in token".to_string(),
            })?;

            // Never reserve more than the file actually holds.
            row.clear();
            (&mut f)
                .take(row_bytes as u64)
                .read_to_end(&mut row)
                .io_context("error reading input file")?;
            if row.len() != row_bytes {
                return Err(Error::Format {
                    line: b + 2,
                    message: format!("truncated vector for {word:?}"),
                });
            }
            m.extend(
                row.chunks_exact(std::mem::size_of::<real>())
                    .map(bytemuck::pod_read_unaligned::<real>),
            );
            vocab.push(word);
        }
        VectorStore::new(vocab, size, m)
    }

    fn read_text_records<R: BufRead>(f: R, num_words: usize, size: usize) -> Result<Self> {
        let mut vocab: Vec<String> = Vec::with_capacity(num_words.min(MAX_PREALLOCATED));
        let mut m = Vec::with_capacity(num_words.saturating_mul(size).min(MAX_PREALLOCATED));
        for (i, line) in f.lines().enumerate() {
            let line_num = i + 2;
            let line = line.io_context("error reading input file")?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            if vocab.len() == num_words {
                return Err(Error::Format {
                    line: line_num,
                    message: format!("more than {num_words} records"),
                });
            }
            vocab.push(word.to_string());
            let before = m.len();
            for field in fields {
                let x: real = field.parse().map_err(|_| Error::Format {
                    line: line_num,
                    message: format!("invalid number {field:?}"),
                })?;
                m.push(x);
            }
            if m.len() - before != size {
                return Err(Error::Format {
                    line: line_num,
                    message: format!("expected {size} values, found {}", m.len() - before),
                });
            }
        }
        if vocab.len() != num_words {
            return Err(Error::Format {
                line: vocab.len() + 2,
                message: format!("expected {num_words} records, found {}", vocab.len()),
            });
        }
        VectorStore::new(vocab, size, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VectorStore {
        VectorStore::new(
            vec!["one".into(), "two".into(), "three".into()],
            2,
            vec![3.0, 4.0, 0.0, 0.0, -1.5, 0.25],
        )
        .unwrap()
    }

    #[test]
    fn norms_and_lookup() {
        let s = store();
        assert_eq!(s.num_words(), 3);
        assert_eq!(s.lookup_word("two"), Some(1));
        assert_eq!(s.lookup_word("four"), None);
        assert_eq!(s.norm(0), 5.0);
        assert_eq!(s.norm(1), 0.0);
        assert_eq!(&s[2], &[-1.5, 0.25]);
    }

    #[test]
    fn shape_is_checked() {
        let err = VectorStore::new(vec!["a".into()], 3, vec![1.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, found: 1 }));
    }

    #[test]
    fn binary_in_memory() {
        let s = store();
        let mut buf = Vec::new();
        s.write_to(&mut buf, StoreFormat::Binary).unwrap();
        let t = VectorStore::read_from(&buf[..], StoreFormat::Binary).unwrap();
        assert_eq!(t.words(), s.words());
        assert_eq!(t.embeddings(), s.embeddings());
    }

    #[test]
    fn truncated_binary_file() {
        let s = store();
        let mut buf = Vec::new();
        s.write_to(&mut buf, StoreFormat::Binary).unwrap();
        buf.truncate(buf.len() - 5);
        let err = VectorStore::read_from(&buf[..], StoreFormat::Binary).unwrap_err();
        assert!(matches!(err, Error::Format { line: 4, .. }));
    }

    #[test]
    fn oversized_headers_are_format_errors() {
        for format in [StoreFormat::Binary, StoreFormat::Text] {
            for header in ["4294967296 4294967296\n", "99999999999 99999999999\n"] {
                let err = VectorStore::read_from(header.as_bytes(), format).unwrap_err();
                assert!(matches!(err, Error::Format { line: 1, .. }), "{header:?}: {err}");
            }
            // Plausible product, but the records are not there.
            let err = VectorStore::read_from(&b"3000000000 3\n"[..], format).unwrap_err();
            assert!(matches!(err, Error::Format { line: 2, .. }), "{err}");
        }
        let err = VectorStore::read_from(&b"1 4000000000\na "[..], StoreFormat::Binary).unwrap_err();
        assert!(matches!(err, Error::Format { line: 2, .. }), "{err}");
    }

    #[test]
    fn text_with_wrong_width() {
        let text = "2 2\na 1 2\nb 1\n";
        let err = VectorStore::read_from(text.as_bytes(), StoreFormat::Text).unwrap_err();
        assert!(matches!(err, Error::Format { line: 3, .. }));
    }

    #[test]
    fn whitespace_token_rejected() {
        let s = VectorStore::new(vec!["a b".into()], 1, vec![1.0]).unwrap();
        let mut buf = Vec::new();
        assert!(s.write_to(&mut buf, StoreFormat::Text).is_err());
    }

    #[test]
    fn subset_keeps_order() {
        let s = store();
        let t = s.subset(&["three", "one"]).unwrap();
        assert_eq!(t.words(), &["three".to_string(), "one".to_string()]);
        assert_eq!(&t[0], &s[2]);
        assert!(matches!(s.subset(&["nope"]), Err(Error::UnknownToken(_))));
    }
}
