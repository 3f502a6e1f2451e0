use anyhow::{bail, Context, Result};
use ordered_float::OrderedFloat;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use crate::table_io::open_input;

/// One row of the pairwise similarity table produced by the external aligner
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseRecord {
    pub query: String,
    pub target: String,
    pub identity: f64,
    pub query_coverage: f64,
    pub target_coverage: f64,
}

/// Similarity between two sequences, oriented as asked for in the lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub identity: f64,
    /// Coverage of the first sequence of the lookup
    pub first_coverage: f64,
    /// Coverage of the second sequence of the lookup
    pub second_coverage: f64,
}

/// Streaming reader for `query, target, identity, qcov, tcov` rows
pub struct AlignmentReader<R: BufRead> {
    reader: R,
    line_no: usize,
    seen_row: bool,
    source: String,
}

impl<R: BufRead> AlignmentReader<R> {
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        AlignmentReader {
            reader,
            line_no: 0,
            seen_row: false,
            source: source.into(),
        }
    }

    pub fn read_record(&mut self) -> Result<Option<PairwiseRecord>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = trimmed.split('\t').map(|f| f.trim()).collect();
            if fields.len() < 5 {
                bail!(
                    "{}:{}: alignment row has fewer than 5 required fields",
                    self.source,
                    self.line_no
                );
            }

            // Header: the identity column of the first row is not a number
            let first_row = !self.seen_row;
            self.seen_row = true;
            if first_row && fields[2].parse::<f64>().is_err() {
                continue;
            }

            return self.parse_fields(&fields).map(Some);
        }
    }

    fn parse_fields(&self, fields: &[&str]) -> Result<PairwiseRecord> {
        let number = |idx: usize, name: &str| -> Result<f64> {
            fields[idx].parse::<f64>().with_context(|| {
                format!("{}:{}: unparseable {name} '{}'", self.source, self.line_no, fields[idx])
            })
        };

        Ok(PairwiseRecord {
            query: fields[0].to_string(),
            target: fields[1].to_string(),
            identity: number(2, "identity")?,
            query_coverage: number(3, "query coverage")?,
            target_coverage: number(4, "target coverage")?,
        })
    }

    pub fn read_all(&mut self) -> Result<Vec<PairwiseRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Pairwise similarities keyed by ordered (query, target) pair
#[derive(Debug, Clone, Default)]
pub struct SimilarityTable {
    pairs: HashMap<(String, String), PairwiseRecord>,
}

impl SimilarityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows; self hits are dropped and, for a repeated pair, the row with
    /// the highest identity is kept
    pub fn from_records<I: IntoIterator<Item = PairwiseRecord>>(records: I) -> Self {
        let mut table = SimilarityTable::new();
        for record in records {
            table.insert(record);
        }
        table
    }

    pub fn insert(&mut self, record: PairwiseRecord) {
        if record.query == record.target {
            return;
        }
        let key = (record.query.clone(), record.target.clone());
        match self.pairs.get(&key) {
            Some(existing) if OrderedFloat(existing.identity) >= OrderedFloat(record.identity) => {}
            _ => {
                self.pairs.insert(key, record);
            }
        }
    }

    /// Similarity of `a` against `b`, using a `b → a` row (coverages swapped) when no
    /// `a → b` row exists
    pub fn lookup(&self, a: &str, b: &str) -> Option<Similarity> {
        if let Some(r) = self.pairs.get(&(a.to_string(), b.to_string())) {
            return Some(Similarity {
                identity: r.identity,
                first_coverage: r.query_coverage,
                second_coverage: r.target_coverage,
            });
        }
        self.pairs
            .get(&(b.to_string(), a.to_string()))
            .map(|r| Similarity {
                identity: r.identity,
                first_coverage: r.target_coverage,
                second_coverage: r.query_coverage,
            })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Read an alignment table from file (auto-detects compression)
pub fn read_alignment_table<P: AsRef<Path>>(path: P) -> Result<SimilarityTable> {
    let path = path.as_ref();
    let input = open_input(path)?;
    let mut reader = AlignmentReader::new(input, path.display().to_string());
    let records = reader.read_all()?;
    let table = SimilarityTable::from_records(records);
    log::info!("Loaded {} sequence pairs from {}", table.len(), path.display());
    Ok(table)
}
