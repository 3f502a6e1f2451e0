/// Per-sequence quality and structural-gene metrics from the external assessment tools
///
/// The quality table is CheckV-shaped (`contig_id`, `contig_length`, `checkv_quality`).
/// Annotation tables carry one count column per gene category, one row per sequence.
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use crate::table_io::{normalize_column, open_input, read_data_lines, split_fields, Header};

/// CheckV quality tier, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityTier {
    NotDetermined,
    LowQuality,
    MediumQuality,
    HighQuality,
    Complete,
}

impl QualityTier {
    /// Every tier, best first (the order CheckV documents them in)
    pub const ALL: [QualityTier; 5] = [
        QualityTier::Complete,
        QualityTier::HighQuality,
        QualityTier::MediumQuality,
        QualityTier::LowQuality,
        QualityTier::NotDetermined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Complete => "Complete",
            QualityTier::HighQuality => "High-quality",
            QualityTier::MediumQuality => "Medium-quality",
            QualityTier::LowQuality => "Low-quality",
            QualityTier::NotDetermined => "Not-determined",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    /// Tier names are matched literally, as CheckV writes them
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QualityTier::ALL
            .iter()
            .copied()
            .find(|tier| tier.as_str() == s.trim())
            .ok_or_else(|| {
                let valid: Vec<&str> = QualityTier::ALL.iter().map(|t| t.as_str()).collect();
                format!(
                    "Invalid quality level '{}'. Valid levels are: {}",
                    s.trim(),
                    valid.join(", ")
                )
            })
    }
}

/// Quality assessment of one sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityRecord {
    pub sequence_id: String,
    pub length: u64,
    pub quality_tier: QualityTier,
}

impl QualityRecord {
    pub fn new(sequence_id: impl Into<String>, length: u64, quality_tier: QualityTier) -> Self {
        QualityRecord {
            sequence_id: sequence_id.into(),
            length,
            quality_tier,
        }
    }
}

pub fn read_quality_table<P: AsRef<Path>>(path: P) -> Result<Vec<QualityRecord>> {
    let path = path.as_ref();
    let input = open_input(path)?;
    parse_quality_table(input, &path.display().to_string())
}

/// Parse a CheckV-style quality summary; the header line is required
pub fn parse_quality_table<R: BufRead>(reader: R, source: &str) -> Result<Vec<QualityRecord>> {
    let lines = read_data_lines(reader)?;
    let Some(((_, header_line), rows)) = lines.split_first() else {
        return Ok(Vec::new());
    };

    let header = Header::parse(header_line);
    let id_col = header.require(&["contig_id", "sequence_id", "seq_id"], source)?;
    let len_col = header.require(&["contig_length", "length"], source)?;
    let tier_col = header.require(&["checkv_quality", "quality"], source)?;

    let mut records = Vec::with_capacity(rows.len());
    for (line_no, line) in rows {
        let fields = split_fields(line);

        let sequence_id = column(&fields, id_col, source, *line_no)?;
        let length: u64 = column(&fields, len_col, source, *line_no)?
            .parse()
            .with_context(|| format!("{source}:{line_no}: unparseable length"))?;
        let quality_tier: QualityTier = match column(&fields, tier_col, source, *line_no)?.parse() {
            Ok(tier) => tier,
            Err(e) => bail!("{source}:{line_no}: {e}"),
        };

        records.push(QualityRecord::new(sequence_id, length, quality_tier));
    }

    Ok(records)
}

fn column<'a>(fields: &[&'a str], col: usize, source: &str, line_no: usize) -> Result<&'a str> {
    fields
        .get(col)
        .copied()
        .with_context(|| format!("{source}:{line_no}: missing column {}", col + 1))
}

/// The two annotation tools whose gene categories feed the structural filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationSource {
    Pharokka,
    Phold,
}

impl AnnotationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationSource::Pharokka => "Pharokka",
            AnnotationSource::Phold => "PHOLD",
        }
    }
}

impl fmt::Display for AnnotationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PHROG categories counted as virion-structural
pub const STRUCTURAL_CATEGORIES: [&str; 3] = ["head and packaging", "connector", "tail"];

/// Structural-gene content of one sequence according to one annotation source
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralRecord {
    pub sequence_id: String,
    pub structural_gene_count: u32,
    pub total_gene_count: u32,
    pub structural_gene_percent: f64,
}

impl StructuralRecord {
    pub fn new(sequence_id: impl Into<String>, structural_gene_count: u32, total_gene_count: u32) -> Self {
        let structural_gene_percent = if total_gene_count == 0 {
            0.0
        } else {
            structural_gene_count as f64 * 100.0 / total_gene_count as f64
        };
        StructuralRecord {
            sequence_id: sequence_id.into(),
            structural_gene_count,
            total_gene_count,
            structural_gene_percent,
        }
    }
}

/// Structural records of one source keyed by sequence id
pub type StructuralTable = HashMap<String, StructuralRecord>;

pub fn read_annotation_table<P: AsRef<Path>>(path: P) -> Result<StructuralTable> {
    let path = path.as_ref();
    let input = open_input(path)?;
    parse_annotation_table(input, &path.display().to_string())
}

/// Parse a per-sequence gene category table
///
/// The total gene count is taken from a `CDS` column when present, otherwise it is
/// the sum of all category columns.
pub fn parse_annotation_table<R: BufRead>(reader: R, source: &str) -> Result<StructuralTable> {
    let lines = read_data_lines(reader)?;
    let Some(((_, header_line), rows)) = lines.split_first() else {
        return Ok(StructuralTable::new());
    };

    let header = Header::parse(header_line);
    let id_col = header.require(&["contig_id", "sequence_id", "contig"], source)?;
    let cds_col = header.find(&["cds", "total_genes"]);
    let category_cols: Vec<usize> = (0..header.len())
        .filter(|&c| c != id_col && Some(c) != cds_col)
        .collect();
    let structural_cols: Vec<usize> = category_cols
        .iter()
        .copied()
        .filter(|&c| {
            STRUCTURAL_CATEGORIES
                .iter()
                .any(|cat| header.columns()[c] == normalize_column(cat))
        })
        .collect();
    if structural_cols.is_empty() {
        log::warn!("{source}: no structural category columns found; all counts will be 0");
    }

    let mut table = StructuralTable::with_capacity(rows.len());
    for (line_no, line) in rows {
        let fields = split_fields(line);
        let count = |col: usize| -> Result<u32> {
            let raw = fields.get(col).copied().unwrap_or("0");
            if raw.is_empty() {
                return Ok(0);
            }
            raw.parse::<u32>()
                .with_context(|| format!("{source}:{line_no}: unparseable gene count '{raw}'"))
        };

        let Some(sequence_id) = fields.get(id_col).copied().filter(|s| !s.is_empty()) else {
            bail!("{source}:{line_no}: missing sequence id");
        };

        let sum = |cols: &[usize]| -> Result<u32> {
            let mut total = 0u32;
            for &c in cols {
                total = total.checked_add(count(c)?).with_context(|| {
                    format!("{source}:{line_no}: gene counts for '{sequence_id}' overflow")
                })?;
            }
            Ok(total)
        };

        let structural = sum(&structural_cols)?;
        let total = match cds_col {
            Some(c) => count(c)?,
            None => sum(&category_cols)?,
        };

        if table
            .insert(
                sequence_id.to_string(),
                StructuralRecord::new(sequence_id, structural, total),
            )
            .is_some()
        {
            log::warn!("{source}:{line_no}: duplicate sequence '{sequence_id}', keeping the last row");
        }
    }

    Ok(table)
}
