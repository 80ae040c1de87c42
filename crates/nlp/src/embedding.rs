//! # Word Embeddings
//!
//! A `V × D` table of word vectors plus the vocabulary naming its rows.
//!
//! ## Text format
//!
//! ```text
//! 3 2
//! <OOV> 0.01 -0.02
//! cat 0.5 0.25
//! sat -1 0.75
//! ```
//!
//! The header gives the number of words and the vector width; every
//! following non-blank line is a word and exactly `dim` floats.
//!
//! ## Example
//!
//! ```rust
//! use rootalign_nlp::EmbeddingTable;
//!
//! let text = "2 2\n<OOV> 0 0\ncat 0.5 0.25\n";
//! let table = EmbeddingTable::from_reader(text.as_bytes()).unwrap();
//! let cat = table.vocab().get_index("cat").unwrap();
//! assert_eq!(table.lookup(cat).unwrap().data, vec![0.5, 0.25]);
//! ```

use crate::vocab::{Counts, Vocabulary, OOV_SYM};
use crate::NlpError;
use rootalign_diff::RTensor;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Fresh rows (the OOV sentinel, words added by extension) are drawn from
/// `[-INIT_RANGE, INIT_RANGE)`.
pub const INIT_RANGE: f32 = 0.05;

/// Word vectors indexed by vocabulary position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableData")]
pub struct EmbeddingTable {
    vocab: Vocabulary,
    weights: RTensor,
}

#[derive(Deserialize)]
struct TableData {
    vocab: Vocabulary,
    weights: RTensor,
}

impl TryFrom<TableData> for EmbeddingTable {
    type Error = NlpError;

    fn try_from(raw: TableData) -> Result<Self, Self::Error> {
        Self::new(raw.vocab, raw.weights)
    }
}

impl EmbeddingTable {
    /// Pair a vocabulary with a `V × D` matrix.
    pub fn new(vocab: Vocabulary, weights: RTensor) -> Result<Self, NlpError> {
        let rows = check_matrix(&weights)?;
        if rows != vocab.len() {
            return Err(NlpError::RowCountMismatch {
                rows,
                words: vocab.len(),
            });
        }
        Ok(Self { vocab, weights })
    }

    /// Build from `(word, vector)` pairs; every vector must have the same width.
    pub fn from_rows<S: AsRef<str>>(rows: &[(S, Vec<f32>)]) -> Result<Self, NlpError> {
        let dim = rows.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut vocab = Vocabulary::new();
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, (word, vec)) in rows.iter().enumerate() {
            if vec.len() != dim {
                return Err(NlpError::Format {
                    line: i + 1,
                    message: format!("expected {} values, got {}", dim, vec.len()),
                });
            }
            if vocab.contains(word.as_ref()) {
                return Err(NlpError::Format {
                    line: i + 1,
                    message: format!("duplicate word '{}'", word.as_ref()),
                });
            }
            vocab.push(word.as_ref());
            data.extend_from_slice(vec);
        }
        Self::new(vocab, RTensor::from_data(vec![rows.len(), dim], data))
    }

    /// Uniformly initialised table over `vocab`.
    pub fn random(vocab: Vocabulary, dim: usize, seed: u64) -> Self {
        let weights =
            RTensor::uniform_seeded(vec![vocab.len(), dim], -INIT_RANGE, INIT_RANGE, seed);
        Self { vocab, weights }
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// The whole `V × D` matrix.
    pub fn weights(&self) -> &RTensor {
        &self.weights
    }

    /// Replace the matrix; it must still have one row per word.
    pub fn set_weights(&mut self, weights: RTensor) -> Result<(), NlpError> {
        let rows = check_matrix(&weights)?;
        if rows != self.vocab.len() {
            return Err(NlpError::RowCountMismatch {
                rows,
                words: self.vocab.len(),
            });
        }
        self.weights = weights;
        Ok(())
    }

    /// Number of rows (V).
    pub fn vocab_size(&self) -> usize {
        self.weights.shape[0]
    }

    /// Vector width (D).
    pub fn dim(&self) -> usize {
        self.weights.shape[1]
    }

    pub fn check_index(&self, index: usize) -> Result<(), NlpError> {
        if index < self.vocab_size() {
            Ok(())
        } else {
            Err(NlpError::IndexOutOfRange {
                index,
                vocab_size: self.vocab_size(),
            })
        }
    }

    /// Row `index` as a `1 × D` tensor.
    pub fn lookup(&self, index: usize) -> Result<RTensor, NlpError> {
        self.check_index(index)?;
        Ok(self.weights.get_row(index))
    }

    /// Rows `indices` stacked into an `N × D` tensor.
    pub fn lookup_many(&self, indices: &[usize]) -> Result<RTensor, NlpError> {
        let dim = self.dim();
        let mut data = Vec::with_capacity(indices.len() * dim);
        for &i in indices {
            self.check_index(i)?;
            data.extend_from_slice(&self.weights.data[i * dim..(i + 1) * dim]);
        }
        Ok(RTensor::matrix(indices.len(), dim, data))
    }

    /// Mutable view of one row, for sparse parameter updates.
    pub fn row_mut(&mut self, index: usize) -> Result<&mut [f32], NlpError> {
        self.check_index(index)?;
        Ok(self.weights.row_slice_mut(index))
    }

    /// Map words to row indices with `<OOV>` fallback.
    pub fn convert<S: AsRef<str>>(&self, words: &[S]) -> Result<Vec<usize>, NlpError> {
        self.vocab.convert(words)
    }

    // ------------------------------------------------------------------
    // Text I/O
    // ------------------------------------------------------------------

    pub fn load(path: impl AsRef<Path>) -> Result<Self, NlpError> {
        let path = path.as_ref();
        let table = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!(
            path = %path.display(),
            words = table.vocab_size(),
            dim = table.dim(),
            "loaded word embeddings"
        );
        Ok(table)
    }

    /// Parse the text format from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, NlpError> {
        let mut lines = reader.lines().enumerate();

        let (num_words, dim) = match lines.next() {
            Some((_, header)) => parse_header(&header?)?,
            None => {
                return Err(NlpError::Format {
                    line: 1,
                    message: "missing header".to_string(),
                })
            }
        };

        let mut vocab = Vocabulary::new();
        let mut data = Vec::new();
        let mut last_line = 1;

        for (i, line) in lines {
            let line_no = i + 1;
            let line = line?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            last_line = line_no;

            let values = fields
                .map(|f| {
                    f.parse::<f32>().map_err(|e| NlpError::Format {
                        line: line_no,
                        message: format!("bad value '{}': {}", f, e),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if values.len() != dim {
                return Err(NlpError::Format {
                    line: line_no,
                    message: format!("expected {} values for '{}', got {}", dim, word, values.len()),
                });
            }
            if vocab.contains(word) {
                return Err(NlpError::Format {
                    line: line_no,
                    message: format!("duplicate word '{}'", word),
                });
            }
            vocab.push(word);
            data.extend(values);
        }

        if vocab.len() != num_words {
            return Err(NlpError::Format {
                line: last_line,
                message: format!("header promises {} words, found {}", num_words, vocab.len()),
            });
        }

        Self::new(vocab, RTensor::from_data(vec![num_words, dim], data))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), NlpError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!(path = %path.display(), words = self.vocab_size(), "saved word embeddings");
        Ok(())
    }

    /// Write the text format. Floats use the shortest representation that
    /// parses back to the same value.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), NlpError> {
        writeln!(writer, "{} {}", self.vocab_size(), self.dim())?;
        for (i, word) in self.vocab.iter().enumerate() {
            let row = self.weights.get_row(i);
            let values = row
                .data
                .iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(writer, "{} {}", word, values)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vocabulary maintenance
    // ------------------------------------------------------------------

    /// Keep only words that occur in a corpus.
    ///
    /// The new vocabulary is `<OOV>`, then the table's words found in
    /// `word_counts`, then those found in `phrase_counts`, each group in
    /// table order. The `<OOV>` row is freshly initialised.
    pub fn trim_by_counts(&self, word_counts: &Counts, phrase_counts: &Counts, seed: u64) -> Self {
        let mut vocab = Vocabulary::new();
        vocab.push(OOV_SYM);
        for counts in [word_counts, phrase_counts] {
            for w in self.vocab.iter() {
                if counts.contains_key(w) {
                    vocab.push(w);
                }
            }
        }

        let trimmed = self.rebuild(vocab, seed);
        info!(
            before = self.vocab_size(),
            after = trimmed.vocab_size(),
            "trimmed embeddings by corpus counts"
        );
        trimmed
    }

    /// Add every word of `word_counts` the table lacks.
    ///
    /// Existing rows keep their position and values; new words are
    /// appended in sorted order. New rows and the `<OOV>` row are freshly
    /// initialised.
    pub fn extend_by_counts(&self, word_counts: &Counts, seed: u64) -> Self {
        let mut unseen: Vec<&str> = word_counts
            .keys()
            .map(String::as_str)
            .filter(|w| !self.vocab.contains(w))
            .collect();
        unseen.sort_unstable();

        let mut vocab = self.vocab.clone();
        for w in &unseen {
            vocab.push(w);
        }

        let extended = self.rebuild(vocab, seed);
        info!(
            added = unseen.len(),
            total = extended.vocab_size(),
            "extended embeddings by corpus counts"
        );
        extended
    }

    /// Copy known rows into a table over `vocab`; `<OOV>` and unknown words
    /// get fresh uniform rows.
    fn rebuild(&self, vocab: Vocabulary, seed: u64) -> Self {
        let dim = self.dim();
        let fresh_rows = vocab
            .iter()
            .filter(|w| *w == OOV_SYM || !self.vocab.contains(w))
            .count();
        let fresh = RTensor::uniform_seeded(vec![fresh_rows, dim], -INIT_RANGE, INIT_RANGE, seed);
        let mut fresh = fresh.data.chunks(dim.max(1));

        let mut data = Vec::with_capacity(vocab.len() * dim);
        for w in vocab.iter() {
            match self.vocab.get_index(w) {
                Some(i) if w != OOV_SYM => {
                    data.extend_from_slice(&self.weights.data[i * dim..(i + 1) * dim])
                }
                _ => {
                    if let Some(row) = fresh.next() {
                        data.extend_from_slice(row);
                    }
                }
            }
        }
        debug!(rows = vocab.len(), fresh = fresh_rows, "rebuilt embedding table");

        let weights = RTensor::from_data(vec![vocab.len(), dim], data);
        Self { vocab, weights }
    }
}

fn parse_header(header: &str) -> Result<(usize, usize), NlpError> {
    let bad = |message: String| NlpError::Format { line: 1, message };
    let mut fields = header.split_whitespace();
    let (Some(n), Some(d), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(bad(format!(
            "header must be '<words> <dim>', got '{}'",
            header.trim()
        )));
    };
    let n = n
        .parse::<usize>()
        .map_err(|e| bad(format!("bad word count '{}': {}", n, e)))?;
    let d = d
        .parse::<usize>()
        .map_err(|e| bad(format!("bad dimension '{}': {}", d, e)))?;
    if n.checked_mul(d).is_none() {
        return Err(bad(format!("{} x {} table is too large", n, d)));
    }
    Ok((n, d))
}

/// Row count of a well-formed `V × D` matrix.
fn check_matrix(weights: &RTensor) -> Result<usize, NlpError> {
    if weights.shape.len() != 2 || !weights.is_consistent() {
        return Err(NlpError::Format {
            line: 0,
            message: format!(
                "embedding matrix must be 2D with matching data, got {:?} with {} values",
                weights.shape,
                weights.data.len()
            ),
        });
    }
    Ok(weights.shape[0])
}
