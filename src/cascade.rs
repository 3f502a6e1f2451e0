/// Quality-gated filter cascade
///
/// Stage A (length + quality tier) always runs. Stage B (structural gene content) runs
/// when configured, on whatever Stage A let through, including nothing. A stage that
/// passes nothing is a terminal state, not an error: later stages still run on the empty
/// set and report zero.
use indexmap::IndexSet;
use std::fmt;

use crate::config::{QualityThresholds, StructuralConfig, StructuralThresholds};
use crate::quality::{AnnotationSource, QualityRecord, StructuralRecord, StructuralTable};

pub const QUALITY_STAGE: &str = "quality";
pub const STRUCTURAL_STAGE: &str = "structural";

/// Why a stage produced no sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The stage received no sequences at all
    NoInput,
    /// Sequences were offered but none met the stage's thresholds
    NonePassed,
}

/// Branch signal of a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    Proceed(&'a IndexSet<String>),
    Empty(EmptyReason),
}

/// Result of one cascade stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub stage_name: &'static str,
    pub input_count: usize,
    pub pass_count: usize,
    pub passed_ids: IndexSet<String>,
    pub summary_text: String,
}

impl FilterOutcome {
    fn new(stage_name: &'static str, input_count: usize, passed_ids: IndexSet<String>) -> Self {
        let pass_count = passed_ids.len();
        let summary_text = if input_count == 0 {
            format!("{stage_name} filter: no input sequences")
        } else {
            format!("{stage_name} filter: {pass_count}/{input_count} sequences passed")
        };
        FilterOutcome {
            stage_name,
            input_count,
            pass_count,
            passed_ids,
            summary_text,
        }
    }

    pub fn outcome(&self) -> Outcome<'_> {
        if self.pass_count > 0 {
            Outcome::Proceed(&self.passed_ids)
        } else if self.input_count == 0 {
            Outcome::Empty(EmptyReason::NoInput)
        } else {
            Outcome::Empty(EmptyReason::NonePassed)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pass_count == 0
    }
}

/// Stage A outcome together with the records that passed (for the summary table)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityStageResult {
    pub outcome: FilterOutcome,
    pub passed: Vec<QualityRecord>,
}

/// Stage A: keep sequences with `length >= min_length` whose tier is whitelisted
pub fn quality_stage(records: &[QualityRecord], thresholds: &QualityThresholds) -> QualityStageResult {
    let passed: Vec<QualityRecord> = records
        .iter()
        .filter(|r| thresholds.accepts(r))
        .cloned()
        .collect();

    let ids: IndexSet<String> = passed.iter().map(|r| r.sequence_id.clone()).collect();
    let outcome = FilterOutcome::new(QUALITY_STAGE, records.len(), ids);
    log::info!("{}", outcome.summary_text);

    QualityStageResult { outcome, passed }
}

/// The annotation tables available to Stage B
#[derive(Debug, Clone, Default)]
pub struct StructuralSources {
    pub pharokka: Option<StructuralTable>,
    pub phold: Option<StructuralTable>,
}

impl StructuralSources {
    pub fn table(&self, source: AnnotationSource) -> Option<&StructuralTable> {
        match source {
            AnnotationSource::Pharokka => self.pharokka.as_ref(),
            AnnotationSource::Phold => self.phold.as_ref(),
        }
    }
}

/// One source's view of one sequence
#[derive(Debug, Clone, PartialEq)]
pub struct SourceVerdict {
    pub record: Option<StructuralRecord>,
    pub passed: bool,
}

/// Stage B evaluation of one sequence
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralEvaluation {
    pub sequence_id: String,
    pub pharokka: Option<SourceVerdict>,
    pub phold: Option<SourceVerdict>,
    pub passed: bool,
}

/// Stage B outcome with per-sequence and per-source detail
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralStageResult {
    pub outcome: FilterOutcome,
    pub evaluations: Vec<StructuralEvaluation>,
    pub pharokka_pass_count: usize,
    pub phold_pass_count: usize,
}

fn source_verdict(
    sequence_id: &str,
    table: Option<&StructuralTable>,
    thresholds: StructuralThresholds,
    source: AnnotationSource,
) -> SourceVerdict {
    let record = table.and_then(|t| t.get(sequence_id)).cloned();
    let passed = match &record {
        Some(r) => {
            r.structural_gene_count >= thresholds.min_total
                && r.structural_gene_percent >= thresholds.min_percent
        }
        None => {
            log::warn!("{source}: no annotation for '{sequence_id}'; treated as failing");
            false
        }
    };
    SourceVerdict { record, passed }
}

/// Stage B: structural gene content, evaluated per source and combined by mode
///
/// Candidates are the ids Stage A passed, in Stage A order. The union in combined mode
/// therefore keeps that order and cannot contain duplicates.
pub fn structural_stage(
    candidates: &IndexSet<String>,
    sources: &StructuralSources,
    config: &StructuralConfig,
) -> StructuralStageResult {
    let mut evaluations = Vec::with_capacity(candidates.len());
    let mut passed_ids = IndexSet::new();
    let mut pharokka_pass_count = 0;
    let mut phold_pass_count = 0;

    for id in candidates {
        let pharokka = config.mode.uses(AnnotationSource::Pharokka).then(|| {
            source_verdict(
                id,
                sources.table(AnnotationSource::Pharokka),
                config.pharokka,
                AnnotationSource::Pharokka,
            )
        });
        let phold = config.mode.uses(AnnotationSource::Phold).then(|| {
            source_verdict(
                id,
                sources.table(AnnotationSource::Phold),
                config.phold,
                AnnotationSource::Phold,
            )
        });

        let pharokka_ok = pharokka.as_ref().is_some_and(|v| v.passed);
        let phold_ok = phold.as_ref().is_some_and(|v| v.passed);
        pharokka_pass_count += usize::from(pharokka_ok);
        phold_pass_count += usize::from(phold_ok);

        let passed = pharokka_ok || phold_ok;
        if passed {
            passed_ids.insert(id.clone());
        }
        evaluations.push(StructuralEvaluation {
            sequence_id: id.clone(),
            pharokka,
            phold,
            passed,
        });
    }

    let outcome = FilterOutcome::new(STRUCTURAL_STAGE, candidates.len(), passed_ids);
    log::info!(
        "{} (mode {}, Pharokka {}, PHOLD {})",
        outcome.summary_text,
        config.mode,
        pharokka_pass_count,
        phold_pass_count
    );

    StructuralStageResult {
        outcome,
        evaluations,
        pharokka_pass_count,
        phold_pass_count,
    }
}

/// Where the cascade stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    AwaitingQuality,
    AwaitingStructural,
    ClusteringReady,
    EmptyAfterQuality,
    EmptyAfterStructural,
}

impl CascadeState {
    /// Transition on Stage A's pass count
    pub fn after_quality(self, pass_count: usize, structural_configured: bool) -> CascadeState {
        debug_assert_eq!(self, CascadeState::AwaitingQuality);
        match (pass_count, structural_configured) {
            (0, _) => CascadeState::EmptyAfterQuality,
            (_, true) => CascadeState::AwaitingStructural,
            (_, false) => CascadeState::ClusteringReady,
        }
    }

    /// Transition on Stage B's pass count; terminal states are absorbing
    pub fn after_structural(self, pass_count: usize) -> CascadeState {
        match self {
            CascadeState::AwaitingStructural if pass_count == 0 => CascadeState::EmptyAfterStructural,
            CascadeState::AwaitingStructural => CascadeState::ClusteringReady,
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CascadeState::AwaitingQuality | CascadeState::AwaitingStructural)
    }
}

impl fmt::Display for CascadeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CascadeState::AwaitingQuality => "awaiting quality filter",
            CascadeState::AwaitingStructural => "awaiting structural filter",
            CascadeState::ClusteringReady => "clustering-ready",
            CascadeState::EmptyAfterQuality => "empty after quality filter",
            CascadeState::EmptyAfterStructural => "empty after structural filter",
        };
        f.write_str(label)
    }
}

/// Everything the cascade produced
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeReport {
    pub quality: QualityStageResult,
    pub structural: Option<StructuralStageResult>,
    pub state: CascadeState,
}

impl CascadeReport {
    /// Sequences handed to clustering (empty in either empty terminal state)
    pub fn survivors(&self) -> &IndexSet<String> {
        match &self.structural {
            Some(stage) => &stage.outcome.passed_ids,
            None => &self.quality.outcome.passed_ids,
        }
    }
}

/// Run Stage A, then Stage B when configured
pub fn run_cascade(
    records: &[QualityRecord],
    quality: &QualityThresholds,
    structural: Option<(&StructuralSources, &StructuralConfig)>,
) -> CascadeReport {
    let state = CascadeState::AwaitingQuality;
    let quality_result = quality_stage(records, quality);
    let mut state = state.after_quality(quality_result.outcome.pass_count, structural.is_some());

    let structural_result = structural.map(|(sources, config)| {
        let result = structural_stage(&quality_result.outcome.passed_ids, sources, config);
        state = state.after_structural(result.outcome.pass_count);
        result
    });

    debug_assert!(state.is_terminal());
    log::info!("Filter cascade finished: {state}");

    CascadeReport {
        quality: quality_result,
        structural: structural_result,
        state,
    }
}
