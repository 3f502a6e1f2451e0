/// Shared plumbing for the tab-separated tables and side artifacts this crate reads and writes
use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use noodles::bgzf;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Open a file and auto-detect compression, returning a boxed BufRead
///
/// `.bgz` goes through the BGZF reader, `.gz` through a multi-member gzip decoder
/// (which also accepts BGZF), anything else is read as plain text.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

    match extension {
        "bgz" => Ok(Box::new(BufReader::new(bgzf::io::reader::Reader::new(file)))),
        "gz" => Ok(Box::new(BufReader::new(MultiGzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Create (truncating) an output file behind a buffered writer
pub fn create_output<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Write a single-integer count file
pub fn write_count_file<P: AsRef<Path>>(path: P, count: usize) -> Result<()> {
    let mut out = create_output(&path)?;
    writeln!(out, "{count}")?;
    out.flush()?;
    Ok(())
}

/// Read every non-blank, non-comment line together with its 1-based line number
pub fn read_data_lines<R: BufRead>(reader: R) -> Result<Vec<(usize, String)>> {
    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() || trimmed.starts_with('#') {
            continue;
        }
        lines.push((idx + 1, trimmed.to_string()));
    }
    Ok(lines)
}

/// Split a data line into trimmed tab-separated fields
pub fn split_fields(line: &str) -> Vec<&str> {
    line.split('\t').map(|f| f.trim()).collect()
}

/// Column lookup over a header line
///
/// Names are compared case-insensitively with `_` and `-` treated as spaces, so
/// `contig_length`, `Contig Length` and `contig-length` are the same column.
#[derive(Debug, Clone)]
pub struct Header {
    columns: Vec<String>,
}

impl Header {
    pub fn parse(line: &str) -> Self {
        Header {
            columns: split_fields(line).into_iter().map(normalize_column).collect(),
        }
    }

    /// Index of the first column matching any of the given names
    pub fn find(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            let wanted = normalize_column(name);
            self.columns.iter().position(|c| *c == wanted)
        })
    }

    /// Like `find`, but a missing column is an error naming the table
    pub fn require(&self, names: &[&str], table: &str) -> Result<usize> {
        match self.find(names) {
            Some(idx) => Ok(idx),
            None => bail!(
                "{table}: missing required column '{}' (found: {})",
                names[0],
                self.columns.join(", ")
            ),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub fn normalize_column(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
