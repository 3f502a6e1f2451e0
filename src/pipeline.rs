//! Pipeline driver
//!
//! Detection runs once per genome in parallel: each unit consolidates its own
//! predictions and cuts its own sequences, returning an owned result. Units are joined
//! before anything is aggregated. Annotation then runs the filter cascade, clusters the
//! survivors and writes every artifact, empty or not.

use anyhow::{bail, Context, Result};
use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::alignment::{read_alignment_table, SimilarityTable};
use crate::cascade::{run_cascade, CascadeReport, StructuralSources, StructuralStageResult};
use crate::cluster::{
    cluster_stats, greedy_cluster, read_cluster_table, select_representatives, write_cluster_file,
    ClusterAssignment, ClusterCandidate, ClusterStats,
};
use crate::config::AnnotationConfig;
use crate::contig_index::ContigIndex;
use crate::extract::{extract_regions, ExtractedSequence, SkippedRegion};
use crate::fasta::{read_fasta, write_fasta, FastaRecord};
use crate::interval_merge::{consolidate, write_consolidated_file, ConsolidatedRegion};
use crate::prediction::{CoordinateError, DetectorInputs, DetectorTool, Prediction};
use crate::quality::{read_annotation_table, read_quality_table, AnnotationSource, QualityRecord};
use crate::summary::{render_detection_summary, render_report, DetectionCounts, ReportContext};
use crate::table_io::{create_output, write_count_file};

pub const CONSOLIDATED_COORDINATES: &str = "consolidated_coordinates.tsv";
pub const ALL_PROPHAGE_SEQUENCES: &str = "All_prophage_sequences.fasta";
pub const DETECTION_SUMMARY: &str = "detection_summary.txt";
pub const QUALITY_SUMMARY: &str = "quality_filter_summary.tsv";
pub const QUALITY_COUNT: &str = "quality_filter_count.txt";
pub const QUALITY_FASTA: &str = "quality_filtered.fasta";
pub const STRUCTURAL_SUMMARY: &str = "structural_filter_summary.tsv";
pub const STRUCTURAL_COUNT: &str = "structural_filter_count.txt";
pub const STRUCTURAL_FASTA: &str = "structural_filtered.fasta";
pub const CLUSTER_TABLE: &str = "clusters.tsv";
pub const REPRESENTATIVES_FASTA: &str = "representatives.fasta";
pub const CLUSTER_COUNT: &str = "cluster_count.txt";
pub const SUMMARY_REPORT: &str = "summary_report.txt";

const COMPRESSION_EXTENSIONS: [&str; 2] = [".gz", ".bgz"];
const FASTA_EXTENSIONS: [&str; 6] = [".fasta", ".fa", ".fna", ".fas", ".fsa", ".ffn"];

/// Genome id of a FASTA file: its file name without compression and FASTA extensions
pub fn genome_id_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut stem = name.as_str();
    for ext in COMPRESSION_EXTENSIONS {
        if let Some(s) = stem.strip_suffix(ext) {
            stem = s;
            break;
        }
    }
    for ext in FASTA_EXTENSIONS {
        if let Some(s) = stem.strip_suffix(ext) {
            stem = s;
            break;
        }
    }
    stem.to_string()
}

/// Inputs of the detection half
#[derive(Debug, Clone, Default)]
pub struct DetectionConfig {
    pub detectors: DetectorInputs,
    pub genome_fastas: Vec<PathBuf>,
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.detectors.is_empty() {
            bail!("At least one detector table is required (--genomad and/or --vibrant)");
        }
        Ok(())
    }
}

/// Owned result of one genome unit
#[derive(Debug, Clone)]
pub struct GenomeOutcome {
    pub genome_id: String,
    pub regions: Vec<ConsolidatedRegion>,
    pub sequences: Vec<ExtractedSequence>,
    pub skipped: Vec<SkippedRegion>,
    pub clamped: usize,
    /// Set when the genome's sequences could not be read
    pub failure: Option<String>,
}

fn process_genome(genome_id: &str, predictions: &[Prediction], fasta: Option<&Path>) -> GenomeOutcome {
    let regions = consolidate(predictions);
    let mut outcome = GenomeOutcome {
        genome_id: genome_id.to_string(),
        regions,
        sequences: Vec::new(),
        skipped: Vec::new(),
        clamped: 0,
        failure: None,
    };

    let contigs = match fasta {
        None => Err(anyhow::anyhow!("no FASTA file supplied for genome '{genome_id}'")),
        Some(path) => read_fasta(path).map(ContigIndex::from_records),
    };
    match contigs {
        Ok(contigs) => {
            let extraction = extract_regions(&outcome.regions, &contigs);
            outcome.sequences = extraction.sequences;
            outcome.skipped = extraction.skipped;
            outcome.clamped = extraction.clamped;
        }
        Err(e) => {
            log::error!("Genome {genome_id} failed: {e:#}");
            outcome.failure = Some(format!("{e:#}"));
        }
    }
    outcome
}

/// Joined result of every genome unit
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub genomes: Vec<GenomeOutcome>,
    /// Sequence ids prefixed with their genome id because another genome produced the same id
    pub qualified_ids: usize,
    pub prediction_counts: Vec<(DetectorTool, usize)>,
    pub coordinate_errors: Vec<CoordinateError>,
}

impl DetectionResult {
    pub fn regions(&self) -> impl Iterator<Item = &ConsolidatedRegion> {
        self.genomes.iter().flat_map(|g| g.regions.iter())
    }

    pub fn sequences(&self) -> impl Iterator<Item = &ExtractedSequence> {
        self.genomes.iter().flat_map(|g| g.sequences.iter())
    }

    pub fn sequence_records(&self) -> Vec<FastaRecord> {
        self.sequences()
            .map(|s| FastaRecord::new(s.id.clone(), s.residues.clone()))
            .collect()
    }

    pub fn counts(&self) -> DetectionCounts {
        DetectionCounts {
            genomes: self.genomes.len(),
            failed_genomes: self
                .genomes
                .iter()
                .filter(|g| g.failure.is_some())
                .map(|g| g.genome_id.clone())
                .collect(),
            predictions: self.prediction_counts.clone(),
            coordinate_errors: self.coordinate_errors.len(),
            consolidated_regions: self.regions().count(),
            whole_contig_regions: self.regions().filter(|r| r.is_whole_contig()).count(),
            extracted: self.sequences().count(),
            skipped: self.genomes.iter().map(|g| g.skipped.len()).sum(),
            clamped: self.genomes.iter().map(|g| g.clamped).sum(),
            qualified_ids: self.qualified_ids,
        }
    }
}

/// Prefix the genome id onto every sequence id that more than one genome produced
///
/// Assemblers reuse contig names across genomes, so `contig_1_1_6000` from two genomes
/// becomes `g1_contig_1_1_6000` and `g2_contig_1_1_6000`. Returns how many ids changed.
fn qualify_shared_ids(genomes: &mut [GenomeOutcome]) -> usize {
    let mut owners: HashMap<String, HashSet<String>> = HashMap::new();
    for genome in genomes.iter() {
        for seq in &genome.sequences {
            owners
                .entry(seq.id.clone())
                .or_default()
                .insert(seq.genome_id.clone());
        }
    }

    let mut qualified = 0;
    for genome in genomes.iter_mut() {
        for seq in genome.sequences.iter_mut() {
            if owners.get(&seq.id).is_some_and(|g| g.len() > 1) {
                seq.id = format!("{}_{}", seq.genome_id, seq.id);
                qualified += 1;
            }
        }
    }
    if qualified > 0 {
        log::warn!("{qualified} sequence ids were shared between genomes and are now prefixed with their genome id");
    }
    qualified
}

/// Consolidate and extract every genome that has predictions
pub fn run_detection(config: &DetectionConfig) -> Result<DetectionResult> {
    config.validate()?;
    let start = Instant::now();

    let table = config.detectors.read_all()?;
    let prediction_counts: Vec<(DetectorTool, usize)> = config
        .detectors
        .tables()
        .into_iter()
        .map(|(tool, _)| {
            let n = table.predictions.iter().filter(|p| p.source_tool == tool).count();
            (tool, n)
        })
        .collect();

    let mut fastas: HashMap<String, &Path> = HashMap::new();
    for path in &config.genome_fastas {
        let genome_id = genome_id_from_path(path);
        if let Some(previous) = fastas.insert(genome_id.clone(), path) {
            bail!(
                "Genome id '{genome_id}' is shared by {} and {}",
                previous.display(),
                path.display()
            );
        }
    }

    let mut by_genome: IndexMap<&str, Vec<Prediction>> = IndexMap::new();
    for prediction in &table.predictions {
        by_genome
            .entry(prediction.genome_id.as_str())
            .or_default()
            .push(prediction.clone());
    }
    log::info!(
        "Consolidating {} predictions across {} genomes",
        table.predictions.len(),
        by_genome.len()
    );

    let units: Vec<(&str, Vec<Prediction>)> = by_genome.into_iter().collect();
    let genomes: Vec<GenomeOutcome> = units
        .par_iter()
        .map(|(genome_id, predictions)| {
            process_genome(genome_id, predictions, fastas.get(*genome_id).copied())
        })
        .collect();

    let mut genomes = genomes;
    let qualified_ids = qualify_shared_ids(&mut genomes);
    let result = DetectionResult {
        genomes,
        qualified_ids,
        prediction_counts,
        coordinate_errors: table.errors,
    };
    let counts = result.counts();
    log::info!(
        "Detection finished in {:.2}s: {} predictions, {} regions, {} sequences, {} failed genomes",
        start.elapsed().as_secs_f64(),
        counts.total_predictions(),
        counts.consolidated_regions,
        counts.extracted,
        counts.failed_genomes.len()
    );
    Ok(result)
}

/// Write the consolidated table, the extracted sequences and the detection summary
pub fn write_detection_outputs(result: &DetectionResult, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let regions: Vec<ConsolidatedRegion> = result.regions().cloned().collect();
    write_consolidated_file(out_dir.join(CONSOLIDATED_COORDINATES), &regions)?;
    write_fasta(
        out_dir.join(ALL_PROPHAGE_SEQUENCES),
        result.sequences().map(|s| (s.id.as_str(), s.residues.as_slice())),
    )?;
    write_text(
        &out_dir.join(DETECTION_SUMMARY),
        &render_detection_summary(&result.counts()),
    )
}

/// External-tool tables consumed by the annotation half
#[derive(Debug, Clone, Default)]
pub struct AnnotationInputs {
    pub quality_table: Option<PathBuf>,
    pub pharokka_table: Option<PathBuf>,
    pub phold_table: Option<PathBuf>,
    pub alignment_table: Option<PathBuf>,
}

impl AnnotationInputs {
    fn annotation_table(&self, source: AnnotationSource) -> Option<&Path> {
        match source {
            AnnotationSource::Pharokka => self.pharokka_table.as_deref(),
            AnnotationSource::Phold => self.phold_table.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotationResult {
    pub cascade: CascadeReport,
    pub clusters: Vec<ClusterAssignment>,
    pub stats: ClusterStats,
    pub report: String,
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    let mut out = create_output(path)?;
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn write_subset(path: &Path, sequences: &[FastaRecord], keep: &IndexSet<String>) -> Result<usize> {
    write_fasta(
        path,
        sequences
            .iter()
            .filter(|r| keep.contains(&r.name))
            .map(|r| (r.name.as_str(), r.seq.as_slice())),
    )
}

/// `sequences` without repeated ids (first record kept), plus the repeated ids
fn unique_sequences(sequences: &[FastaRecord]) -> (Cow<'_, [FastaRecord]>, Vec<String>) {
    let mut seen = HashSet::new();
    let duplicates: Vec<String> = sequences
        .iter()
        .filter(|r| !seen.insert(r.name.as_str()))
        .map(|r| r.name.clone())
        .collect();
    if duplicates.is_empty() {
        return (Cow::Borrowed(sequences), duplicates);
    }

    for id in &duplicates {
        log::warn!("Duplicate sequence id '{id}'; keeping the first record");
    }
    let mut seen = HashSet::new();
    let unique = sequences
        .iter()
        .filter(|r| seen.insert(r.name.as_str()))
        .cloned()
        .collect();
    (Cow::Owned(unique), duplicates)
}

/// Quality records for `sequences`, in sequence order, plus the ids with no record
fn align_quality_records(
    sequences: &[FastaRecord],
    records: Vec<QualityRecord>,
) -> (Vec<QualityRecord>, Vec<String>) {
    let mut by_id: HashMap<String, QualityRecord> = records
        .into_iter()
        .map(|r| (r.sequence_id.clone(), r))
        .collect();

    let mut aligned = Vec::with_capacity(sequences.len());
    let mut missing = Vec::new();
    for record in sequences {
        match by_id.remove(&record.name) {
            Some(q) => aligned.push(q),
            None => {
                log::warn!("No quality record for '{}'; treated as failing", record.name);
                missing.push(record.name.clone());
            }
        }
    }
    (aligned, missing)
}

fn write_quality_summary(path: &Path, passed: &[QualityRecord]) -> Result<()> {
    let mut out = create_output(path)?;
    writeln!(out, "contig_id\tcontig_length\tcheckv_quality")?;
    for record in passed {
        writeln!(
            out,
            "{}\t{}\t{}",
            record.sequence_id, record.length, record.quality_tier
        )?;
    }
    out.flush()?;
    Ok(())
}

fn write_structural_summary(path: &Path, stage: &StructuralStageResult) -> Result<()> {
    let mut out = create_output(path)?;
    writeln!(
        out,
        "contig_id\tpharokka_structural\tpharokka_total\tpharokka_percent\tpharokka_pass\t\
         phold_structural\tphold_total\tphold_percent\tphold_pass\tpassed"
    )?;
    for eval in &stage.evaluations {
        let mut row = vec![eval.sequence_id.clone()];
        for verdict in [&eval.pharokka, &eval.phold] {
            match verdict {
                Some(v) => {
                    match &v.record {
                        Some(r) => row.extend([
                            r.structural_gene_count.to_string(),
                            r.total_gene_count.to_string(),
                            format!("{:.2}", r.structural_gene_percent),
                        ]),
                        None => row.extend(["NA".to_string(), "NA".to_string(), "NA".to_string()]),
                    }
                    row.push(if v.passed { "yes" } else { "no" }.to_string());
                }
                None => row.extend(std::iter::repeat("NA".to_string()).take(4)),
            }
        }
        row.push(if eval.passed { "yes" } else { "no" }.to_string());
        writeln!(out, "{}", row.join("\t"))?;
    }
    out.flush()?;
    Ok(())
}

fn load_structural_sources(
    inputs: &AnnotationInputs,
    config: &AnnotationConfig,
) -> Result<StructuralSources> {
    let mut sources = StructuralSources::default();
    let Some(structural) = &config.structural else {
        return Ok(sources);
    };
    for source in [AnnotationSource::Pharokka, AnnotationSource::Phold] {
        if !structural.mode.uses(source) {
            continue;
        }
        let Some(path) = inputs.annotation_table(source) else {
            bail!(
                "Structural filter mode '{}' needs the {source} annotation table",
                structural.mode
            );
        };
        let table = read_annotation_table(path)?;
        match source {
            AnnotationSource::Pharokka => sources.pharokka = Some(table),
            AnnotationSource::Phold => sources.phold = Some(table),
        }
    }
    Ok(sources)
}

/// Filter, cluster and report on `sequences`, writing every artifact into `out_dir`
///
/// Tables are only required when there is something to read them for: the quality
/// table when there are sequences, annotation tables when the quality filter passed
/// something, the alignment table when more than one sequence reaches clustering.
pub fn run_annotation(
    sequences: &[FastaRecord],
    inputs: &AnnotationInputs,
    config: &AnnotationConfig,
    detection: Option<&DetectionCounts>,
    out_dir: &Path,
) -> Result<AnnotationResult> {
    config.validate()?;
    let (unique, duplicates) = unique_sequences(sequences);
    let sequences: &[FastaRecord] = &unique;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let quality_records = if sequences.is_empty() {
        Vec::new()
    } else {
        let Some(path) = &inputs.quality_table else {
            bail!("A quality table (--quality-table) is required when there are sequences to filter");
        };
        read_quality_table(path)?
    };
    let (records, missing) = align_quality_records(sequences, quality_records);

    let any_quality_pass = records.iter().any(|r| config.quality.accepts(r));
    let sources = if any_quality_pass {
        load_structural_sources(inputs, config)?
    } else {
        StructuralSources::default()
    };
    let cascade = run_cascade(
        &records,
        &config.quality,
        config.structural.as_ref().map(|s| (&sources, s)),
    );

    write_quality_summary(&out_dir.join(QUALITY_SUMMARY), &cascade.quality.passed)?;
    write_count_file(out_dir.join(QUALITY_COUNT), cascade.quality.outcome.pass_count)?;
    write_subset(
        &out_dir.join(QUALITY_FASTA),
        sequences,
        &cascade.quality.outcome.passed_ids,
    )?;
    if let Some(stage) = &cascade.structural {
        write_structural_summary(&out_dir.join(STRUCTURAL_SUMMARY), stage)?;
        write_count_file(out_dir.join(STRUCTURAL_COUNT), stage.outcome.pass_count)?;
        write_subset(
            &out_dir.join(STRUCTURAL_FASTA),
            sequences,
            &stage.outcome.passed_ids,
        )?;
    }

    let survivors = cascade.survivors();
    let candidates: Vec<ClusterCandidate> = sequences
        .iter()
        .filter(|r| survivors.contains(&r.name))
        .map(|r| ClusterCandidate::new(r.name.clone(), r.len()))
        .collect();
    let similarities = if candidates.len() > 1 {
        let Some(path) = &inputs.alignment_table else {
            bail!("An alignment table (--alignments) is required to cluster {} sequences", candidates.len());
        };
        read_alignment_table(path)?
    } else {
        SimilarityTable::new()
    };
    let clusters = greedy_cluster(&candidates, &similarities, &config.clustering);

    let cluster_path = out_dir.join(CLUSTER_TABLE);
    write_cluster_file(&cluster_path, &clusters)?;
    let rows = read_cluster_table(&cluster_path)?;
    let representatives = select_representatives(&rows, sequences)?;
    write_fasta(
        out_dir.join(REPRESENTATIVES_FASTA),
        representatives
            .iter()
            .map(|r| (r.name.as_str(), r.seq.as_slice())),
    )?;
    write_count_file(out_dir.join(CLUSTER_COUNT), clusters.len())?;

    let stats = cluster_stats(&clusters);
    let report = render_report(&ReportContext {
        detection,
        sequence_count: sequences.len(),
        missing_quality: missing.len(),
        duplicate_ids: duplicates.len(),
        cascade: &cascade,
        config,
        clusters: stats,
    });
    write_text(&out_dir.join(SUMMARY_REPORT), &report)?;
    log::info!(
        "Annotation finished: {} sequences, {} after filtering, {} clusters",
        sequences.len(),
        candidates.len(),
        clusters.len()
    );

    Ok(AnnotationResult {
        cascade,
        clusters,
        stats,
        report,
    })
}

/// Detection followed by annotation on the extracted sequences
pub fn run(
    detection: &DetectionConfig,
    inputs: &AnnotationInputs,
    config: &AnnotationConfig,
    out_dir: &Path,
) -> Result<(DetectionResult, AnnotationResult)> {
    config.validate()?;
    let detected = run_detection(detection)?;
    write_detection_outputs(&detected, out_dir)?;

    let sequences = detected.sequence_records();
    let counts = detected.counts();
    let annotated = run_annotation(&sequences, inputs, config, Some(&counts), out_dir)?;
    Ok((detected, annotated))
}
