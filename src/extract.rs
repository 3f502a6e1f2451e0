/// Extraction of consolidated regions from genome sequences
use crate::contig_index::{normalize_contig_name, ContigIndex, MatchKind};
use crate::interval_merge::{ConsolidatedRegion, Extent};

/// One prophage sequence cut from its host contig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSequence {
    pub id: String,
    pub genome_id: String,
    pub length: usize,
    pub residues: Vec<u8>,
}

/// Why a region produced no sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingContig,
    StartBeyondContig { contig_length: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRegion {
    pub region: ConsolidatedRegion,
    pub reason: SkipReason,
}

/// Result of extracting one genome's regions
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub sequences: Vec<ExtractedSequence>,
    pub skipped: Vec<SkippedRegion>,
    /// Regions whose end ran past the contig and was clamped
    pub clamped: usize,
}

/// Identifier of the sequence a region produces
pub fn sequence_id(contig_id: &str, extent: Extent) -> String {
    let contig = normalize_contig_name(contig_id);
    match extent {
        Extent::WholeContig => format!("{contig}_complete"),
        Extent::Span { start, end } => format!("{contig}_{start}_{end}"),
    }
}

/// Cut every region out of the genome's contigs
///
/// Missing contigs and out-of-range starts are skipped with a warning; they never
/// abort extraction of the remaining regions.
pub fn extract_regions(regions: &[ConsolidatedRegion], contigs: &ContigIndex) -> Extraction {
    let mut extraction = Extraction::default();

    for region in regions {
        let Some((contig, kind)) = contigs.lookup(&region.contig_id) else {
            log::warn!(
                "{}: contig '{}' not found in genome sequences; region skipped",
                region.genome_id,
                region.contig_id
            );
            extraction.skipped.push(SkippedRegion {
                region: region.clone(),
                reason: SkipReason::MissingContig,
            });
            continue;
        };
        if kind == MatchKind::Prefix {
            log::debug!(
                "{}: '{}' matched contig '{}' by prefix",
                region.genome_id,
                region.contig_id,
                contigs.name(contig)
            );
        }

        let residues = contigs.residues(contig);
        let (id, slice) = match region.extent {
            Extent::WholeContig => (sequence_id(&region.contig_id, region.extent), residues),
            Extent::Span { start, end } => {
                let contig_length = residues.len();
                let start_idx = (start - 1) as usize;
                if start_idx >= contig_length {
                    log::warn!(
                        "{}: region {}..{} starts beyond contig '{}' ({} bp); region skipped",
                        region.genome_id,
                        start,
                        end,
                        region.contig_id,
                        contig_length
                    );
                    extraction.skipped.push(SkippedRegion {
                        region: region.clone(),
                        reason: SkipReason::StartBeyondContig { contig_length },
                    });
                    continue;
                }
                let end_idx = if end as usize > contig_length {
                    log::warn!(
                        "{}: region {}..{} runs past contig '{}' ({} bp); clamped",
                        region.genome_id,
                        start,
                        end,
                        region.contig_id,
                        contig_length
                    );
                    extraction.clamped += 1;
                    contig_length
                } else {
                    end as usize
                };
                (
                    sequence_id(&region.contig_id, region.extent),
                    &residues[start_idx..end_idx],
                )
            }
        };

        extraction.sequences.push(ExtractedSequence {
            id,
            genome_id: region.genome_id.clone(),
            length: slice.len(),
            residues: slice.to_vec(),
        });
    }

    extraction
}
