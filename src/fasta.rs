//! FASTA reading and writing
//!
//! Genomes, extracted prophage regions and cluster representatives all travel as FASTA.
//! Input may be plain, gzip or BGZF compressed (see [`crate::table_io::open_input`]).

use anyhow::{bail, Result};
use std::io::{BufRead, Write};
use std::path::Path;

use crate::table_io::{create_output, open_input};

/// Residues per line when writing
pub const LINE_WIDTH: usize = 60;

/// A FASTA record: identifier (header text up to the first whitespace) and residues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    pub name: String,
    pub seq: Vec<u8>,
}

impl FastaRecord {
    pub fn new(name: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        FastaRecord {
            name: name.into(),
            seq: seq.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// Sequential FASTA reader over any buffered source
pub struct FastaReader<R: BufRead> {
    reader: R,
    line_buf: String,
    current_name: Option<String>,
    started: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        FastaReader {
            reader,
            line_buf: String::with_capacity(256),
            current_name: None,
            started: false,
        }
    }

    /// Reads the next record, `Ok(None)` at end of input
    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        if !self.started {
            self.started = true;
            // Skip anything before the first header
            loop {
                self.line_buf.clear();
                if self.reader.read_line(&mut self.line_buf)? == 0 {
                    return Ok(None);
                }
                let line = self.line_buf.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(header) = line.strip_prefix('>') {
                    self.current_name = Some(parse_header(header));
                    break;
                }
                bail!("FASTA input does not start with a '>' header line");
            }
        }

        let name = match self.current_name.take() {
            Some(n) => n,
            None => return Ok(None),
        };

        let mut seq = Vec::with_capacity(10_000);
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }
            let line = self.line_buf.trim();
            if let Some(header) = line.strip_prefix('>') {
                self.current_name = Some(parse_header(header));
                break;
            }
            seq.extend(line.bytes().filter(|b| !b.is_ascii_whitespace()));
        }

        Ok(Some(FastaRecord { name, seq }))
    }

    pub fn read_all(&mut self) -> Result<Vec<FastaRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_next()? {
            records.push(record);
        }
        Ok(records)
    }
}

fn parse_header(header: &str) -> String {
    header.split_whitespace().next().unwrap_or("").to_string()
}

/// Read every record of a FASTA file
pub fn read_fasta<P: AsRef<Path>>(path: P) -> Result<Vec<FastaRecord>> {
    let input = open_input(&path)?;
    FastaReader::new(input).read_all()
}

/// Write records with fixed-width residue lines
pub fn write_records<'a, W, I>(out: &mut W, records: I) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut written = 0;
    for (name, seq) in records {
        writeln!(out, ">{name}")?;
        for chunk in seq.chunks(LINE_WIDTH) {
            out.write_all(chunk)?;
            out.write_all(b"\n")?;
        }
        written += 1;
    }
    Ok(written)
}

/// Write a FASTA file; an empty record list still creates an (empty) file
pub fn write_fasta<'a, P, I>(path: P, records: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut out = create_output(&path)?;
    let written = write_records(&mut out, records)?;
    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_multiline_records() {
        let input = ">contig_1 some description\nACGT\nACGT\n>contig_2\nTTTT\n";
        let records = FastaReader::new(Cursor::new(input)).read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "contig_1");
        assert_eq!(records[0].seq, b"ACGTACGT");
        assert_eq!(records[1].name, "contig_2");
        assert_eq!(records[1].seq, b"TTTT");
    }

    #[test]
    fn test_empty_input_has_no_records() {
        let records = FastaReader::new(Cursor::new("")).read_all().unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_header_is_rejected() {
        assert!(FastaReader::new(Cursor::new("ACGT\n")).read_all().is_err());
    }

    #[test]
    fn test_write_wraps_lines() {
        let seq = vec![b'A'; LINE_WIDTH + 5];
        let mut out = Vec::new();
        let n = write_records(&mut out, [("x", seq.as_slice())]).unwrap();
        assert_eq!(n, 1);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].len(), LINE_WIDTH);
        assert_eq!(lines[2].len(), 5);
    }
}
