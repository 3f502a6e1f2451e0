use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

use phorager::config::{
    parse_quality_levels, validate_threads, AnnotationConfig, ClusteringParams, QualityThresholds,
    StructuralFilterMode, StructuralOverrides, DEFAULT_MIN_ANI, DEFAULT_MIN_COVERAGE,
    DEFAULT_QUALITY_LEVELS,
};
use phorager::fasta::read_fasta;
use phorager::pipeline::{
    run, run_annotation, run_detection, write_detection_outputs, AnnotationInputs,
    DetectionConfig,
};
use phorager::prediction::DetectorInputs;
use phorager::quality::QualityTier;

/// Parse a number that may have metric suffix (k/K=1000, m/M=1e6)
fn parse_metric_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let Some(last_char) = s.chars().last() else {
        return Err("Empty string".to_string());
    };

    let (num_part, suffix) = if last_char.is_ascii_alphabetic() {
        (&s[..s.len() - last_char.len_utf8()], Some(last_char))
    } else {
        (s, None)
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some(c) => return Err(format!("Unknown suffix '{c}'. Use k/K (1000) or m/M (1e6)")),
        None => 1.0,
    };

    let result = base * multiplier;
    if result < 0.0 {
        return Err(format!("Value {result} must not be negative"));
    }
    Ok(result.round() as u64)
}

fn parse_levels(s: &str) -> Result<BTreeSet<QualityTier>, String> {
    parse_quality_levels(s).map_err(|e| e.to_string())
}

/// phorager - consolidate prophage predictions, filter them by quality and cluster the survivors
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Quiet mode (warnings and errors only)
    #[clap(long = "quiet", global = true)]
    quiet: bool,

    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "8", global = true)]
    threads: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge detector predictions and extract the consolidated prophage sequences
    Consolidate {
        #[clap(flatten)]
        detection: DetectionArgs,

        /// Output directory
        #[clap(short = 'o', long = "outdir", default_value = "phorager_out")]
        outdir: PathBuf,
    },
    /// Filter and cluster prophage sequences using external quality, annotation and alignment tables
    Annotate {
        /// Prophage sequences (FASTA)
        #[clap(short = 's', long = "sequences")]
        sequences: PathBuf,

        #[clap(flatten)]
        annotation: AnnotationArgs,

        /// Output directory
        #[clap(short = 'o', long = "outdir", default_value = "phorager_out")]
        outdir: PathBuf,
    },
    /// Consolidate, then filter and cluster the extracted sequences
    Run {
        #[clap(flatten)]
        detection: DetectionArgs,

        #[clap(flatten)]
        annotation: AnnotationArgs,

        /// Output directory
        #[clap(short = 'o', long = "outdir", default_value = "phorager_out")]
        outdir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DetectionArgs {
    /// geNomad coordinate table
    #[clap(long = "genomad")]
    genomad: Option<PathBuf>,

    /// VIBRANT coordinate table
    #[clap(long = "vibrant")]
    vibrant: Option<PathBuf>,

    /// Genome FASTA files; the genome id is the file name without extension
    #[clap(short = 'g', long = "genomes", num_args = 1.., value_name = "FASTA")]
    genomes: Vec<PathBuf>,
}

impl DetectionArgs {
    fn resolve(&self) -> DetectionConfig {
        DetectionConfig {
            detectors: DetectorInputs {
                genomad: self.genomad.clone(),
                vibrant: self.vibrant.clone(),
            },
            genome_fastas: self.genomes.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct AnnotationArgs {
    /// CheckV quality summary
    #[clap(long = "quality-table")]
    quality_table: Option<PathBuf>,

    /// Pharokka per-sequence category table
    #[clap(long = "pharokka-table")]
    pharokka_table: Option<PathBuf>,

    /// PHOLD per-sequence category table
    #[clap(long = "phold-table")]
    phold_table: Option<PathBuf>,

    /// Pairwise alignment table (query, target, identity, qcov, tcov)
    #[clap(long = "alignments")]
    alignments: Option<PathBuf>,

    /// Minimum prophage length in bp
    #[clap(long = "min-prophage-length", default_value = "5k", value_parser = parse_metric_number)]
    min_prophage_length: u64,

    /// Comma-separated CheckV quality levels to keep
    #[clap(long = "checkv-quality-levels", default_value = DEFAULT_QUALITY_LEVELS, value_parser = parse_levels)]
    checkv_quality_levels: BTreeSet<QualityTier>,

    /// Skip Pharokka/PHOLD annotation and with it the structural filter
    #[clap(long = "skip-detailed-annotation")]
    skip_detailed_annotation: bool,

    /// Structural filter mode: pharokka, phold or combined [default: combined]
    #[clap(long = "annotation-filter-mode")]
    annotation_filter_mode: Option<StructuralFilterMode>,

    /// Minimum percentage of structural genes by Pharokka [default: 10]
    #[clap(long = "pharokka-structural-perc")]
    pharokka_structural_perc: Option<f64>,

    /// Minimum number of structural genes by Pharokka [default: 3]
    #[clap(long = "pharokka-structural-total")]
    pharokka_structural_total: Option<u32>,

    /// Minimum percentage of structural genes by PHOLD [default: 10]
    #[clap(long = "phold-structural-perc")]
    phold_structural_perc: Option<f64>,

    /// Minimum number of structural genes by PHOLD [default: 3]
    #[clap(long = "phold-structural-total")]
    phold_structural_total: Option<u32>,

    /// Minimum average nucleotide identity (%) to join a cluster
    #[clap(long = "clustering-min-ani", default_value_t = DEFAULT_MIN_ANI)]
    clustering_min_ani: f64,

    /// Minimum coverage (%) of both sequences to join a cluster
    #[clap(long = "clustering-min-coverage", default_value_t = DEFAULT_MIN_COVERAGE)]
    clustering_min_coverage: f64,
}

impl AnnotationArgs {
    fn resolve(&self) -> Result<(AnnotationInputs, AnnotationConfig)> {
        let overrides = StructuralOverrides {
            mode: self.annotation_filter_mode,
            pharokka_percent: self.pharokka_structural_perc,
            pharokka_total: self.pharokka_structural_total,
            phold_percent: self.phold_structural_perc,
            phold_total: self.phold_structural_total,
        };
        let config = AnnotationConfig {
            quality: QualityThresholds {
                min_length: self.min_prophage_length,
                allowed_tiers: self.checkv_quality_levels.clone(),
            },
            structural: overrides.resolve(self.skip_detailed_annotation)?,
            clustering: ClusteringParams {
                min_ani: self.clustering_min_ani,
                min_coverage: self.clustering_min_coverage,
            },
        };
        config.validate()?;

        let inputs = AnnotationInputs {
            quality_table: self.quality_table.clone(),
            pharokka_table: self.pharokka_table.clone(),
            phold_table: self.phold_table.clone(),
            alignment_table: self.alignments.clone(),
        };
        Ok((inputs, config))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    // Set up rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(validate_threads(cli.threads)?)
        .build_global()?;

    match cli.command {
        Command::Consolidate { detection, outdir } => {
            let result = run_detection(&detection.resolve())?;
            write_detection_outputs(&result, &outdir)?;
        }
        Command::Annotate {
            sequences,
            annotation,
            outdir,
        } => {
            let (inputs, config) = annotation.resolve()?;
            let records = read_fasta(&sequences)?;
            log::info!("Loaded {} sequences from {}", records.len(), sequences.display());
            run_annotation(&records, &inputs, &config, None, &outdir)?;
        }
        Command::Run {
            detection,
            annotation,
            outdir,
        } => {
            let (inputs, config) = annotation.resolve()?;
            run(&detection.resolve(), &inputs, &config, &outdir)?;
        }
    }

    log::info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric_number() {
        assert_eq!(parse_metric_number("5000"), Ok(5000));
        assert_eq!(parse_metric_number("5k"), Ok(5000));
        assert_eq!(parse_metric_number("2.5K"), Ok(2500));
        assert_eq!(parse_metric_number("1m"), Ok(1_000_000));
        assert!(parse_metric_number("").is_err());
        assert!(parse_metric_number("5x").is_err());
        assert!(parse_metric_number("-5").is_err());
    }

    #[test]
    fn test_cli_conflicting_structural_flags() {
        let cli = Cli::try_parse_from([
            "phorager",
            "annotate",
            "-s",
            "seqs.fasta",
            "--skip-detailed-annotation",
            "--pharokka-structural-total",
            "4",
        ])
        .unwrap();
        let Command::Annotate { annotation, .. } = cli.command else {
            panic!("expected annotate");
        };
        assert!(annotation.resolve().is_err());
    }

    #[test]
    fn test_cli_defaults_resolve() {
        let cli = Cli::try_parse_from(["phorager", "annotate", "-s", "seqs.fasta"]).unwrap();
        let Command::Annotate { annotation, .. } = cli.command else {
            panic!("expected annotate");
        };
        let (_, config) = annotation.resolve().unwrap();
        assert_eq!(config.quality.min_length, 5000);
        assert!(config.structural.is_some());
        assert_eq!(config.clustering.min_ani, 95.0);
    }

    #[test]
    fn test_cli_rejects_out_of_range_length() {
        let cli = Cli::try_parse_from([
            "phorager",
            "annotate",
            "-s",
            "seqs.fasta",
            "--min-prophage-length",
            "100",
        ])
        .unwrap();
        let Command::Annotate { annotation, .. } = cli.command else {
            panic!("expected annotate");
        };
        assert!(annotation.resolve().is_err());
    }
}
