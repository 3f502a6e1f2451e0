/// Validated, fully resolved thresholds for the filtering and clustering stages
///
/// Nothing here reads the environment: the CLI (or a test) builds these values and
/// `validate()` checks them before any stage runs.
use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::quality::{AnnotationSource, QualityRecord, QualityTier};

pub const MIN_PROPHAGE_LENGTH_FLOOR: u64 = 500;
pub const MIN_PROPHAGE_LENGTH_CEILING: u64 = 50_000;
pub const DEFAULT_MIN_PROPHAGE_LENGTH: u64 = 5_000;
pub const DEFAULT_QUALITY_LEVELS: &str = "Complete,High-quality,Medium-quality";

pub const DEFAULT_STRUCTURAL_PERCENT: f64 = 10.0;
pub const DEFAULT_STRUCTURAL_TOTAL: u32 = 3;
pub const MAX_STRUCTURAL_TOTAL: u32 = 20;

pub const DEFAULT_MIN_ANI: f64 = 95.0;
pub const DEFAULT_MIN_COVERAGE: f64 = 85.0;

/// Parse a comma-separated list of CheckV quality levels
pub fn parse_quality_levels(levels: &str) -> Result<BTreeSet<QualityTier>> {
    if levels.trim().is_empty() {
        bail!("CheckV quality levels cannot be empty");
    }

    let mut tiers = BTreeSet::new();
    let mut invalid = Vec::new();
    for level in levels.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        match level.parse::<QualityTier>() {
            Ok(tier) => {
                tiers.insert(tier);
            }
            Err(_) => invalid.push(level),
        }
    }

    if !invalid.is_empty() {
        let valid: Vec<&str> = QualityTier::ALL.iter().map(|t| t.as_str()).collect();
        bail!(
            "Invalid CheckV quality level(s): {}. Valid levels are: {}",
            invalid.join(", "),
            valid.join(", ")
        );
    }
    if tiers.is_empty() {
        bail!("No valid quality levels found in input");
    }
    Ok(tiers)
}

/// Stage A thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityThresholds {
    pub min_length: u64,
    /// Literal whitelist of accepted tiers
    pub allowed_tiers: BTreeSet<QualityTier>,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            min_length: DEFAULT_MIN_PROPHAGE_LENGTH,
            allowed_tiers: BTreeSet::from([
                QualityTier::Complete,
                QualityTier::HighQuality,
                QualityTier::MediumQuality,
            ]),
        }
    }
}

impl QualityThresholds {
    pub fn validate(&self) -> Result<()> {
        if self.min_length < MIN_PROPHAGE_LENGTH_FLOOR {
            bail!(
                "Minimum prophage length must be at least {MIN_PROPHAGE_LENGTH_FLOOR} bp (got: {})",
                self.min_length
            );
        }
        if self.min_length > MIN_PROPHAGE_LENGTH_CEILING {
            bail!(
                "Minimum prophage length cannot exceed {MIN_PROPHAGE_LENGTH_CEILING} bp (got: {})",
                self.min_length
            );
        }
        if self.allowed_tiers.is_empty() {
            bail!("At least one CheckV quality level must be allowed");
        }
        Ok(())
    }

    pub fn accepts(&self, record: &QualityRecord) -> bool {
        record.length >= self.min_length && self.allowed_tiers.contains(&record.quality_tier)
    }

    /// Allowed tiers, best first, comma-joined
    pub fn tiers_label(&self) -> String {
        self.allowed_tiers
            .iter()
            .rev()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Which annotation sources decide the structural filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralFilterMode {
    Pharokka,
    Phold,
    Combined,
}

impl StructuralFilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructuralFilterMode::Pharokka => "pharokka",
            StructuralFilterMode::Phold => "phold",
            StructuralFilterMode::Combined => "combined",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            StructuralFilterMode::Pharokka => "Pharokka criteria only",
            StructuralFilterMode::Phold => "PHOLD criteria only",
            StructuralFilterMode::Combined => "pass if Pharokka OR PHOLD criteria met",
        }
    }

    /// Whether a source's verdict counts under this mode
    pub fn uses(&self, source: AnnotationSource) -> bool {
        matches!(
            (self, source),
            (StructuralFilterMode::Combined, _)
                | (StructuralFilterMode::Pharokka, AnnotationSource::Pharokka)
                | (StructuralFilterMode::Phold, AnnotationSource::Phold)
        )
    }
}

impl fmt::Display for StructuralFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StructuralFilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pharokka" => Ok(StructuralFilterMode::Pharokka),
            "phold" => Ok(StructuralFilterMode::Phold),
            "combined" => Ok(StructuralFilterMode::Combined),
            other => Err(format!(
                "Invalid filter mode: '{other}'. Valid modes are: pharokka, phold, combined"
            )),
        }
    }
}

/// Stage B thresholds for one annotation source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructuralThresholds {
    pub min_percent: f64,
    pub min_total: u32,
}

impl Default for StructuralThresholds {
    fn default() -> Self {
        StructuralThresholds {
            min_percent: DEFAULT_STRUCTURAL_PERCENT,
            min_total: DEFAULT_STRUCTURAL_TOTAL,
        }
    }
}

impl StructuralThresholds {
    pub fn validate(&self, source: AnnotationSource) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_percent) {
            bail!(
                "{source} structural percentage must be between 0 and 100 (got: {})",
                self.min_percent
            );
        }
        if self.min_total < 1 {
            bail!("{source} structural total must be at least 1 (got: {})", self.min_total);
        }
        if self.min_total > MAX_STRUCTURAL_TOTAL {
            bail!(
                "{source} structural total cannot exceed {MAX_STRUCTURAL_TOTAL} (got: {})",
                self.min_total
            );
        }
        Ok(())
    }
}

/// Stage B configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructuralConfig {
    pub mode: StructuralFilterMode,
    pub pharokka: StructuralThresholds,
    pub phold: StructuralThresholds,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        StructuralConfig {
            mode: StructuralFilterMode::Combined,
            pharokka: StructuralThresholds::default(),
            phold: StructuralThresholds::default(),
        }
    }
}

impl StructuralConfig {
    pub fn thresholds(&self, source: AnnotationSource) -> StructuralThresholds {
        match source {
            AnnotationSource::Pharokka => self.pharokka,
            AnnotationSource::Phold => self.phold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.pharokka.validate(AnnotationSource::Pharokka)?;
        self.phold.validate(AnnotationSource::Phold)
    }
}

/// Structural settings as the user supplied them; `None` means "not given"
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StructuralOverrides {
    pub mode: Option<StructuralFilterMode>,
    pub pharokka_percent: Option<f64>,
    pub pharokka_total: Option<u32>,
    pub phold_percent: Option<f64>,
    pub phold_total: Option<u32>,
}

impl StructuralOverrides {
    fn given_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.mode.is_some() {
            flags.push("--annotation-filter-mode");
        }
        flags.extend(self.pharokka_flags());
        flags.extend(self.phold_flags());
        flags
    }

    fn pharokka_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.pharokka_percent.is_some() {
            flags.push("--pharokka-structural-perc");
        }
        if self.pharokka_total.is_some() {
            flags.push("--pharokka-structural-total");
        }
        flags
    }

    fn phold_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.phold_percent.is_some() {
            flags.push("--phold-structural-perc");
        }
        if self.phold_total.is_some() {
            flags.push("--phold-structural-total");
        }
        flags
    }

    /// Resolve into a Stage B configuration, or `None` when detailed annotation is skipped
    ///
    /// Structural flags are rejected together with `skip_detailed_annotation`, and a
    /// source's thresholds are rejected under a mode that ignores that source.
    pub fn resolve(&self, skip_detailed_annotation: bool) -> Result<Option<StructuralConfig>> {
        if skip_detailed_annotation {
            let given = self.given_flags();
            if !given.is_empty() {
                bail!(
                    "Cannot specify structural filtering parameters when using \
                     --skip-detailed-annotation: {}. Remove --skip-detailed-annotation \
                     or remove structural parameters.",
                    given.join(", ")
                );
            }
            return Ok(None);
        }

        let mode = self.mode.unwrap_or(StructuralFilterMode::Combined);
        match mode {
            StructuralFilterMode::Pharokka if !self.phold_flags().is_empty() => bail!(
                "Cannot specify PHOLD structural parameters when filter mode is 'pharokka'. \
                 Change filter mode to 'phold' or 'combined', or remove PHOLD parameters."
            ),
            StructuralFilterMode::Phold if !self.pharokka_flags().is_empty() => bail!(
                "Cannot specify Pharokka structural parameters when filter mode is 'phold'. \
                 Change filter mode to 'pharokka' or 'combined', or remove Pharokka parameters."
            ),
            _ => {}
        }

        let config = StructuralConfig {
            mode,
            pharokka: StructuralThresholds {
                min_percent: self.pharokka_percent.unwrap_or(DEFAULT_STRUCTURAL_PERCENT),
                min_total: self.pharokka_total.unwrap_or(DEFAULT_STRUCTURAL_TOTAL),
            },
            phold: StructuralThresholds {
                min_percent: self.phold_percent.unwrap_or(DEFAULT_STRUCTURAL_PERCENT),
                min_total: self.phold_total.unwrap_or(DEFAULT_STRUCTURAL_TOTAL),
            },
        };
        config.validate()?;
        Ok(Some(config))
    }
}

/// Clustering thresholds, both percentages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteringParams {
    pub min_ani: f64,
    pub min_coverage: f64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        ClusteringParams {
            min_ani: DEFAULT_MIN_ANI,
            min_coverage: DEFAULT_MIN_COVERAGE,
        }
    }
}

impl ClusteringParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_ani) {
            bail!("Clustering ANI must be between 0 and 100 (got: {})", self.min_ani);
        }
        if !(0.0..=100.0).contains(&self.min_coverage) {
            bail!(
                "Clustering coverage must be between 0 and 100 (got: {})",
                self.min_coverage
            );
        }
        Ok(())
    }
}

/// Everything the annotation half of the pipeline needs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnnotationConfig {
    pub quality: QualityThresholds,
    /// `None` when detailed annotation (and with it Stage B) is skipped
    pub structural: Option<StructuralConfig>,
    pub clustering: ClusteringParams,
}

impl AnnotationConfig {
    pub fn validate(&self) -> Result<()> {
        self.quality.validate()?;
        if let Some(structural) = &self.structural {
            structural.validate()?;
        }
        self.clustering.validate()
    }
}

pub fn validate_threads(threads: usize) -> Result<usize> {
    if threads < 1 {
        bail!("--threads must be at least 1");
    }
    Ok(threads)
}
