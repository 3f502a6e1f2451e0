//! Human-readable summaries of a run
//!
//! Everything here is a pure function of counts and outcomes; the pipeline decides
//! where the text goes.

use crate::cascade::{CascadeReport, CascadeState};
use crate::cluster::ClusterStats;
use crate::config::AnnotationConfig;
use crate::prediction::DetectorTool;

/// Counts from the detection half of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionCounts {
    pub genomes: usize,
    pub failed_genomes: Vec<String>,
    /// Predictions read per detector, in detector order
    pub predictions: Vec<(DetectorTool, usize)>,
    pub coordinate_errors: usize,
    pub consolidated_regions: usize,
    pub whole_contig_regions: usize,
    pub extracted: usize,
    pub skipped: usize,
    pub clamped: usize,
    /// Sequence ids prefixed with their genome id to keep them unique
    pub qualified_ids: usize,
}

impl DetectionCounts {
    pub fn total_predictions(&self) -> usize {
        self.predictions.iter().map(|(_, n)| n).sum()
    }

    /// Regions were found but not one of them could be cut from its genome
    pub fn nothing_extracted(&self) -> bool {
        self.consolidated_regions > 0 && self.extracted == 0
    }
}

pub fn render_detection_summary(counts: &DetectionCounts) -> String {
    let mut lines = vec!["Prophage detection summary".to_string(), String::new()];

    lines.push(format!("Genomes processed: {}", counts.genomes));
    if !counts.failed_genomes.is_empty() {
        lines.push(format!(
            "Failed genomes: {} ({})",
            counts.failed_genomes.len(),
            counts.failed_genomes.join(", ")
        ));
    }
    for (tool, n) in &counts.predictions {
        lines.push(format!("{tool} predictions: {n}"));
    }
    if counts.coordinate_errors > 0 {
        lines.push(format!(
            "Rejected prediction rows: {}",
            counts.coordinate_errors
        ));
    }
    lines.push(format!(
        "Consolidated regions: {} ({} whole-contig)",
        counts.consolidated_regions, counts.whole_contig_regions
    ));
    lines.push(format!("Extracted sequences: {}", counts.extracted));
    if counts.skipped > 0 {
        lines.push(format!("Skipped regions: {}", counts.skipped));
    }
    if counts.clamped > 0 {
        lines.push(format!("Regions clamped to contig end: {}", counts.clamped));
    }
    if counts.qualified_ids > 0 {
        lines.push(format!(
            "Sequence ids prefixed with genome id: {}",
            counts.qualified_ids
        ));
    }
    if counts.consolidated_regions == 0 {
        lines.push(String::new());
        lines.push("Result: no regions detected".to_string());
    } else if counts.nothing_extracted() {
        lines.push(String::new());
        lines.push(NOTHING_EXTRACTED.to_string());
    }

    lines.push(String::new());
    lines.join("\n")
}

const NOTHING_EXTRACTED: &str = "Result: regions detected but none could be extracted";

/// Which branch of the report applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    NoRegionsDetected,
    /// Regions were consolidated but every one was skipped or sat in a failed genome
    NothingExtracted,
    EmptyAfterQuality,
    EmptyAfterStructural,
    Clustered,
}

impl Scenario {
    pub fn classify(
        detection: Option<&DetectionCounts>,
        sequence_count: usize,
        state: CascadeState,
    ) -> Scenario {
        if sequence_count == 0 {
            return match detection {
                Some(d) if d.consolidated_regions > 0 => Scenario::NothingExtracted,
                _ => Scenario::NoRegionsDetected,
            };
        }
        match state {
            CascadeState::EmptyAfterQuality => Scenario::EmptyAfterQuality,
            CascadeState::EmptyAfterStructural => Scenario::EmptyAfterStructural,
            CascadeState::AwaitingQuality
            | CascadeState::AwaitingStructural
            | CascadeState::ClusteringReady => Scenario::Clustered,
        }
    }
}

/// Everything the final report is built from
pub struct ReportContext<'a> {
    /// Absent when annotation ran on a sequence file directly
    pub detection: Option<&'a DetectionCounts>,
    pub sequence_count: usize,
    /// Sequences with no row in the quality table
    pub missing_quality: usize,
    /// Repeated sequence ids dropped from the input
    pub duplicate_ids: usize,
    pub cascade: &'a CascadeReport,
    pub config: &'a AnnotationConfig,
    pub clusters: ClusterStats,
}

impl ReportContext<'_> {
    pub fn scenario(&self) -> Scenario {
        Scenario::classify(self.detection, self.sequence_count, self.cascade.state)
    }
}

fn quality_hints(config: &AnnotationConfig) -> Vec<String> {
    vec![
        "Suggestions:".to_string(),
        format!(
            "  - lower --min-prophage-length (currently {} bp)",
            config.quality.min_length
        ),
        format!(
            "  - widen --checkv-quality-levels (currently {})",
            config.quality.tiers_label()
        ),
    ]
}

pub fn render_report(ctx: &ReportContext) -> String {
    let mut lines = vec!["Prophage analysis summary report".to_string(), String::new()];

    if let Some(detection) = ctx.detection {
        lines.push("Detection".to_string());
        lines.push(format!("  Genomes processed: {}", detection.genomes));
        lines.push(format!("  Failed genomes: {}", detection.failed_genomes.len()));
        for (tool, n) in &detection.predictions {
            lines.push(format!("  {tool} predictions: {n}"));
        }
        lines.push(format!("  Rejected prediction rows: {}", detection.coordinate_errors));
        lines.push(format!(
            "  Consolidated regions: {} ({} whole-contig)",
            detection.consolidated_regions, detection.whole_contig_regions
        ));
        lines.push(format!("  Extracted sequences: {}", detection.extracted));
        lines.push(format!("  Skipped regions: {}", detection.skipped));
        if detection.qualified_ids > 0 {
            lines.push(format!(
                "  Sequence ids prefixed with genome id: {}",
                detection.qualified_ids
            ));
        }
        lines.push(String::new());
    }

    let quality = &ctx.cascade.quality.outcome;
    lines.push("Filtering".to_string());
    lines.push(format!("  Input sequences: {}", ctx.sequence_count));
    if ctx.missing_quality > 0 {
        lines.push(format!(
            "  Sequences without a quality record: {}",
            ctx.missing_quality
        ));
    }
    if ctx.duplicate_ids > 0 {
        lines.push(format!(
            "  Duplicate sequence ids dropped: {}",
            ctx.duplicate_ids
        ));
    }
    lines.push(format!(
        "  Primary quality filter (length >= {} bp, quality in {}): {}/{} passed",
        ctx.config.quality.min_length,
        ctx.config.quality.tiers_label(),
        quality.pass_count,
        quality.input_count
    ));
    match (&ctx.cascade.structural, &ctx.config.structural) {
        (Some(stage), Some(structural)) => {
            lines.push(format!(
                "  Structural filter ({}): {}/{} passed",
                structural.mode.describe(),
                stage.outcome.pass_count,
                stage.outcome.input_count
            ));
            lines.push(format!("    Pharokka passes: {}", stage.pharokka_pass_count));
            lines.push(format!("    PHOLD passes: {}", stage.phold_pass_count));
        }
        _ => lines.push("  Structural filter: skipped".to_string()),
    }
    lines.push(String::new());

    match ctx.scenario() {
        Scenario::NoRegionsDetected => {
            lines.push("Result: no regions detected".to_string());
            lines.push(
                "No prophage sequences were available for filtering or clustering.".to_string(),
            );
        }
        Scenario::NothingExtracted => {
            lines.push(NOTHING_EXTRACTED.to_string());
            if let Some(detection) = ctx.detection {
                lines.push(format!(
                    "{} regions were consolidated; {} were skipped and {} genomes failed.",
                    detection.consolidated_regions,
                    detection.skipped,
                    detection.failed_genomes.len()
                ));
            }
            lines.push(
                "Check that the genome FASTA files match the genome and contig ids in the detector tables."
                    .to_string(),
            );
        }
        Scenario::EmptyAfterQuality => {
            lines.push("Result: no sequences passed the primary quality filter".to_string());
            lines.extend(quality_hints(ctx.config));
        }
        Scenario::EmptyAfterStructural => {
            lines.push(format!(
                "Result: {} sequences passed primary quality but all failed structural filter",
                quality.pass_count
            ));
            lines.push("Suggestions:".to_string());
            lines.push(
                "  - lower --pharokka-structural-perc / --phold-structural-perc".to_string(),
            );
            lines.push(
                "  - lower --pharokka-structural-total / --phold-structural-total".to_string(),
            );
            lines.push("  - use --annotation-filter-mode combined".to_string());
        }
        Scenario::Clustered => {
            let stats = &ctx.clusters;
            let reduction = if stats.sequence_count == 0 {
                0.0
            } else {
                (1.0 - stats.cluster_count as f64 / stats.sequence_count as f64) * 100.0
            };
            lines.push("Clustering".to_string());
            lines.push(format!(
                "  Thresholds: ANI >= {}%, coverage >= {}%",
                ctx.config.clustering.min_ani, ctx.config.clustering.min_coverage
            ));
            lines.push(format!("  Sequences clustered: {}", stats.sequence_count));
            lines.push(format!("  Clusters: {}", stats.cluster_count));
            lines.push(format!("  Mean cluster size: {:.2}", stats.mean_size));
            lines.push(format!("  Largest cluster: {}", stats.max_size));
            lines.push(format!("  Singleton clusters: {}", stats.singleton_count));
            lines.push(format!("  Redundancy reduction: {reduction:.1}%"));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}
