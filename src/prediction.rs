/// Detector predictions and the coordinate tables they arrive in
///
/// Each detector emits rows of `genome_id, contig_id, start, end, source_tool`.
/// Coordinates are 1-based and inclusive; `NA`, an empty field or `undetermined`
/// marks a prediction whose extent inside the contig is unknown.
use anyhow::Result;
use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::table_io::{open_input, read_data_lines, split_fields};

/// The fixed set of prophage detectors whose outputs are consolidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DetectorTool {
    GeNomad,
    Vibrant,
}

impl DetectorTool {
    pub const ALL: [DetectorTool; 2] = [DetectorTool::GeNomad, DetectorTool::Vibrant];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorTool::GeNomad => "genomad",
            DetectorTool::Vibrant => "vibrant",
        }
    }
}

impl fmt::Display for DetectorTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "genomad" => Ok(DetectorTool::GeNomad),
            "vibrant" => Ok(DetectorTool::Vibrant),
            other => Err(format!(
                "Unknown detector '{other}' (expected genomad or vibrant)"
            )),
        }
    }
}

/// One end of a predicted region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coordinate {
    Position(u64),
    Undetermined,
}

impl Coordinate {
    /// Parse a coordinate field; sentinels become `Undetermined`, anything else
    /// that is not a positive integer is rejected
    pub fn parse(field: &str) -> Result<Self, String> {
        let field = field.trim();
        if field.is_empty()
            || field.eq_ignore_ascii_case("na")
            || field.eq_ignore_ascii_case("undetermined")
        {
            return Ok(Coordinate::Undetermined);
        }
        match field.parse::<u64>() {
            Ok(0) => Err("coordinate 0 is invalid for 1-based positions".to_string()),
            Ok(pos) => Ok(Coordinate::Position(pos)),
            Err(_) => Err(format!("'{field}' is not a coordinate")),
        }
    }

    pub fn position(&self) -> Option<u64> {
        match self {
            Coordinate::Position(pos) => Some(*pos),
            Coordinate::Undetermined => None,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coordinate::Position(pos) => write!(f, "{pos}"),
            Coordinate::Undetermined => f.write_str("NA"),
        }
    }
}

/// A single detector call on one contig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub genome_id: String,
    pub contig_id: String,
    pub start: Coordinate,
    pub end: Coordinate,
    pub source_tool: DetectorTool,
}

impl Prediction {
    /// True when either end is unknown; such a prediction stands for the whole contig
    pub fn is_undetermined(&self) -> bool {
        matches!(self.start, Coordinate::Undetermined) || matches!(self.end, Coordinate::Undetermined)
    }

    /// Concrete `(start, end)` when both ends are known
    pub fn span(&self) -> Option<(u64, u64)> {
        Some((self.start.position()?, self.end.position()?))
    }
}

/// A row that could not become a prediction; reported and excluded from merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateError {
    pub source: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for CoordinateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.source, self.line, self.message)
    }
}

/// Parsed contents of one detector table
#[derive(Debug, Default, Clone)]
pub struct PredictionTable {
    pub predictions: Vec<Prediction>,
    pub errors: Vec<CoordinateError>,
}

impl PredictionTable {
    pub fn extend(&mut self, other: PredictionTable) {
        self.predictions.extend(other.predictions);
        self.errors.extend(other.errors);
    }
}

/// The detector tables supplied for a run: one optional slot per detector
#[derive(Debug, Default, Clone)]
pub struct DetectorInputs {
    pub genomad: Option<PathBuf>,
    pub vibrant: Option<PathBuf>,
}

impl DetectorInputs {
    pub fn get(&self, tool: DetectorTool) -> Option<&Path> {
        match tool {
            DetectorTool::GeNomad => self.genomad.as_deref(),
            DetectorTool::Vibrant => self.vibrant.as_deref(),
        }
    }

    /// Supplied tables in fixed detector order
    pub fn tables(&self) -> Vec<(DetectorTool, &Path)> {
        DetectorTool::ALL
            .iter()
            .filter_map(|&tool| self.get(tool).map(|path| (tool, path)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.genomad.is_none() && self.vibrant.is_none()
    }

    /// Read and concatenate every supplied table
    pub fn read_all(&self) -> Result<PredictionTable> {
        let mut combined = PredictionTable::default();
        for (tool, path) in self.tables() {
            combined.extend(read_prediction_table(path, tool)?);
        }
        Ok(combined)
    }
}

/// Read a detector table from disk
pub fn read_prediction_table<P: AsRef<Path>>(path: P, tool: DetectorTool) -> Result<PredictionTable> {
    let path = path.as_ref();
    let input = open_input(path)?;
    parse_prediction_table(input, &path.display().to_string(), tool)
}

/// Parse a detector table supplied for `tool`
///
/// Only an unreadable input fails the call. Short rows, bad coordinates and a tool
/// column naming a different detector are recorded as [`CoordinateError`]s and skipped.
pub fn parse_prediction_table<R: BufRead>(
    reader: R,
    source: &str,
    tool: DetectorTool,
) -> Result<PredictionTable> {
    let mut table = PredictionTable::default();

    for (idx, (line_no, line)) in read_data_lines(reader)?.into_iter().enumerate() {
        let fields = split_fields(&line);
        if idx == 0 && fields.get(2).is_some_and(|f| f.eq_ignore_ascii_case("start")) {
            continue;
        }

        match parse_prediction_fields(&fields, tool) {
            Ok(prediction) => table.predictions.push(prediction),
            Err(message) => {
                log::warn!("{source}:{line_no}: {message}; row excluded from merging");
                table.errors.push(CoordinateError {
                    source: source.to_string(),
                    line: line_no,
                    message,
                });
            }
        }
    }

    Ok(table)
}

fn parse_prediction_fields(fields: &[&str], tool: DetectorTool) -> Result<Prediction, String> {
    if fields.len() < 4 {
        return Err(format!(
            "expected at least 4 tab-separated columns (genome_id, contig_id, start, end), found {}",
            fields.len()
        ));
    }
    let genome_id = fields[0];
    let contig_id = fields[1];
    if genome_id.is_empty() || contig_id.is_empty() {
        return Err("empty genome or contig id".to_string());
    }

    let start = Coordinate::parse(fields[2]).map_err(|e| format!("bad start: {e}"))?;
    let end = Coordinate::parse(fields[3]).map_err(|e| format!("bad end: {e}"))?;
    if let (Some(s), Some(e)) = (start.position(), end.position()) {
        if s > e {
            return Err(format!("start {s} is greater than end {e}"));
        }
    }

    if let Some(field) = fields.get(4).filter(|f| !f.is_empty()) {
        let named: DetectorTool = field.parse()?;
        if named != tool {
            return Err(format!(
                "row names detector '{named}' but was supplied as the {tool} table"
            ));
        }
    }

    Ok(Prediction {
        genome_id: genome_id.to_string(),
        contig_id: contig_id.to_string(),
        start,
        end,
        source_tool: tool,
    })
}
