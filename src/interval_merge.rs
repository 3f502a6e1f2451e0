/// Consolidation of detector predictions into non-redundant regions per contig
///
/// Every detector's calls for a contig go through the same sweep: sort by start,
/// extend the running region while the next call starts inside it, flush otherwise.
/// A contig carrying any call without coordinates collapses to one whole-contig region.
use anyhow::Result;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use crate::contig_index::normalize_contig_name;
use crate::prediction::{DetectorTool, Prediction};
use crate::table_io::create_output;

/// Extent of a consolidated region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    WholeContig,
    Span { start: u64, end: u64 },
}

/// A merged, non-redundant prophage region on one contig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedRegion {
    pub genome_id: String,
    pub contig_id: String,
    pub extent: Extent,
    pub contributing_tools: BTreeSet<DetectorTool>,
}

impl ConsolidatedRegion {
    pub fn is_whole_contig(&self) -> bool {
        matches!(self.extent, Extent::WholeContig)
    }

    pub fn span(&self) -> Option<(u64, u64)> {
        match self.extent {
            Extent::Span { start, end } => Some((start, end)),
            Extent::WholeContig => None,
        }
    }

    /// Inclusive length of a coordinate region
    pub fn length(&self) -> Option<u64> {
        self.span().map(|(start, end)| end - start + 1)
    }

    pub fn tools_label(&self) -> String {
        self.contributing_tools
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A closed interval and the tools that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub begin: u64,
    pub end: u64,
    pub tools: BTreeSet<DetectorTool>,
}

impl Interval {
    pub fn new(begin: u64, end: u64, tool: DetectorTool) -> Self {
        Interval {
            begin,
            end,
            tools: BTreeSet::from([tool]),
        }
    }

    pub fn length(&self) -> u64 {
        self.end - self.begin + 1
    }
}

/// Sweep-merge closed intervals
///
/// Sorting is stable, so equal starts keep their input order. An interval joins the
/// running region when `begin <= running end`.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    if intervals.len() <= 1 {
        return intervals;
    }

    intervals.sort_by_key(|iv| iv.begin);

    let mut merged = Vec::with_capacity(intervals.len());
    let mut iter = intervals.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for next in iter {
        if next.begin <= current.end {
            current.end = current.end.max(next.end);
            current.tools.extend(next.tools);
        } else {
            merged.push(std::mem::replace(&mut current, next));
        }
    }
    merged.push(current);

    merged
}

/// Consolidate all predictions of one contig
pub fn merge_contig(genome_id: &str, contig_id: &str, predictions: &[&Prediction]) -> Vec<ConsolidatedRegion> {
    if predictions.is_empty() {
        return Vec::new();
    }

    if predictions.iter().any(|p| p.is_undetermined()) {
        let tools = predictions.iter().map(|p| p.source_tool).collect();
        return vec![ConsolidatedRegion {
            genome_id: genome_id.to_string(),
            contig_id: contig_id.to_string(),
            extent: Extent::WholeContig,
            contributing_tools: tools,
        }];
    }

    let intervals = predictions
        .iter()
        .filter_map(|p| p.span().map(|(s, e)| Interval::new(s, e, p.source_tool)))
        .collect();

    merge_intervals(intervals)
        .into_iter()
        .map(|iv| ConsolidatedRegion {
            genome_id: genome_id.to_string(),
            contig_id: contig_id.to_string(),
            extent: Extent::Span {
                start: iv.begin,
                end: iv.end,
            },
            contributing_tools: iv.tools,
        })
        .collect()
}

/// Consolidate predictions from every detector, grouped by genome and contig
///
/// Contigs are matched by normalized name, so `contig_7|provirus_10_900` and
/// `contig_7_fragment_1` are the same contig; regions carry the first name seen.
/// Output keeps the first-appearance order of (genome, contig) pairs and, within a
/// contig, ascending start order.
pub fn consolidate(predictions: &[Prediction]) -> Vec<ConsolidatedRegion> {
    let mut by_contig: IndexMap<(&str, &str), (&str, Vec<&Prediction>)> = IndexMap::new();
    for p in predictions {
        let key = (p.genome_id.as_str(), normalize_contig_name(&p.contig_id));
        by_contig
            .entry(key)
            .or_insert_with(|| (p.contig_id.as_str(), Vec::new()))
            .1
            .push(p);
    }

    by_contig
        .into_iter()
        .flat_map(|((genome, _), (contig, group))| merge_contig(genome, contig, &group))
        .collect()
}

/// Merge an already consolidated region set again
///
/// Used to check and enforce that consolidation is a fixed point.
pub fn remerge(regions: &[ConsolidatedRegion]) -> Vec<ConsolidatedRegion> {
    let mut by_contig: IndexMap<(&str, &str), (&str, Vec<&ConsolidatedRegion>)> =
        IndexMap::new();
    for r in regions {
        let key = (r.genome_id.as_str(), normalize_contig_name(&r.contig_id));
        by_contig
            .entry(key)
            .or_insert_with(|| (r.contig_id.as_str(), Vec::new()))
            .1
            .push(r);
    }

    let mut out = Vec::with_capacity(regions.len());
    for ((genome, _), (contig, group)) in by_contig {
        let tools: BTreeSet<DetectorTool> = group
            .iter()
            .flat_map(|r| r.contributing_tools.iter().copied())
            .collect();

        if group.iter().any(|r| r.is_whole_contig()) {
            out.push(ConsolidatedRegion {
                genome_id: genome.to_string(),
                contig_id: contig.to_string(),
                extent: Extent::WholeContig,
                contributing_tools: tools,
            });
            continue;
        }

        let intervals = group
            .iter()
            .filter_map(|r| {
                r.span().map(|(begin, end)| Interval {
                    begin,
                    end,
                    tools: r.contributing_tools.clone(),
                })
            })
            .collect();

        out.extend(merge_intervals(intervals).into_iter().map(|iv| ConsolidatedRegion {
            genome_id: genome.to_string(),
            contig_id: contig.to_string(),
            extent: Extent::Span {
                start: iv.begin,
                end: iv.end,
            },
            contributing_tools: iv.tools,
        }));
    }
    out
}

pub const CONSOLIDATED_HEADER: &str = "genome_id\tcontig_id\tstart\tend\tsource_tool";

/// Write the consolidated coordinate table (same columns as the detector tables;
/// whole-contig regions carry `NA` coordinates)
pub fn write_consolidated_table<W: Write>(out: &mut W, regions: &[ConsolidatedRegion]) -> Result<()> {
    writeln!(out, "{CONSOLIDATED_HEADER}")?;
    for r in regions {
        let (start, end) = match r.extent {
            Extent::Span { start, end } => (start.to_string(), end.to_string()),
            Extent::WholeContig => ("NA".to_string(), "NA".to_string()),
        };
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            r.genome_id,
            r.contig_id,
            start,
            end,
            r.tools_label()
        )?;
    }
    Ok(())
}

pub fn write_consolidated_file<P: AsRef<Path>>(path: P, regions: &[ConsolidatedRegion]) -> Result<()> {
    let mut out = create_output(&path)?;
    write_consolidated_table(&mut out, regions)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::Coordinate;

    fn pred(contig: &str, start: Option<u64>, end: Option<u64>, tool: DetectorTool) -> Prediction {
        let coord = |v: Option<u64>| v.map(Coordinate::Position).unwrap_or(Coordinate::Undetermined);
        Prediction {
            genome_id: "g1".to_string(),
            contig_id: contig.to_string(),
            start: coord(start),
            end: coord(end),
            source_tool: tool,
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(consolidate(&[]).is_empty());
        assert!(merge_intervals(Vec::new()).is_empty());
    }

    #[test]
    fn test_overlapping_calls_from_two_tools_merge() {
        let preds = vec![
            pred("c1", Some(100), Some(500), DetectorTool::GeNomad),
            pred("c1", Some(400), Some(900), DetectorTool::Vibrant),
            pred("c1", Some(2000), Some(3000), DetectorTool::Vibrant),
        ];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].span(), Some((100, 900)));
        assert_eq!(
            regions[0].contributing_tools,
            BTreeSet::from([DetectorTool::GeNomad, DetectorTool::Vibrant])
        );
        assert_eq!(regions[1].span(), Some((2000, 3000)));
        assert_eq!(regions[1].tools_label(), "vibrant");
    }

    #[test]
    fn test_contained_interval_does_not_shrink_region() {
        let preds = vec![
            pred("c1", Some(100), Some(1000), DetectorTool::GeNomad),
            pred("c1", Some(200), Some(300), DetectorTool::Vibrant),
            pred("c1", Some(900), Some(1200), DetectorTool::Vibrant),
        ];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].span(), Some((100, 1200)));
    }

    #[test]
    fn test_touching_endpoint_merges() {
        let preds = vec![
            pred("c1", Some(1), Some(10), DetectorTool::GeNomad),
            pred("c1", Some(10), Some(20), DetectorTool::GeNomad),
        ];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].span(), Some((1, 20)));
    }

    #[test]
    fn test_adjacent_regions_stay_separate() {
        // 1..10 and 11..20 share no base
        let preds = vec![
            pred("c1", Some(1), Some(10), DetectorTool::GeNomad),
            pred("c1", Some(11), Some(20), DetectorTool::Vibrant),
        ];
        let regions = consolidate(&preds);
        let spans: Vec<_> = regions.iter().map(|r| r.span().unwrap()).collect();
        assert_eq!(spans, vec![(1, 10), (11, 20)]);
        assert_eq!(remerge(&regions), regions);
    }

    #[test]
    fn test_renamed_contigs_merge_together() {
        let preds = vec![
            pred("contig_7|provirus_100_500", Some(100), Some(500), DetectorTool::GeNomad),
            pred("contig_7_fragment_1", Some(300), Some(900), DetectorTool::Vibrant),
        ];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].span(), Some((100, 900)));
        assert_eq!(regions[0].contig_id, "contig_7|provirus_100_500");
        assert_eq!(regions[0].tools_label(), "genomad,vibrant");
        assert_eq!(remerge(&regions), regions);
    }

    #[test]
    fn test_undetermined_call_collapses_renamed_contig() {
        let preds = vec![
            pred("contig_7|provirus_100_500", Some(100), Some(500), DetectorTool::GeNomad),
            pred("contig_7 flag=1", None, None, DetectorTool::Vibrant),
        ];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].is_whole_contig());
        assert_eq!(regions[0].tools_label(), "genomad,vibrant");
    }

    #[test]
    fn test_same_contig_name_in_two_genomes_stays_apart() {
        let mut other = pred("c1", Some(100), Some(500), DetectorTool::GeNomad);
        other.genome_id = "g2".to_string();
        let preds = vec![pred("c1", Some(100), Some(500), DetectorTool::GeNomad), other];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].genome_id, "g2");
    }

    #[test]
    fn test_non_overlapping_calls_pass_through() {
        let preds = vec![
            pred("c1", Some(5000), Some(6000), DetectorTool::GeNomad),
            pred("c1", Some(100), Some(200), DetectorTool::GeNomad),
        ];
        let regions = consolidate(&preds);
        let spans: Vec<_> = regions.iter().map(|r| r.span().unwrap()).collect();
        assert_eq!(spans, vec![(100, 200), (5000, 6000)]);
    }

    #[test]
    fn test_undetermined_collapses_contig() {
        let preds = vec![
            pred("c1", Some(100), Some(500), DetectorTool::GeNomad),
            pred("c1", None, None, DetectorTool::Vibrant),
            pred("c2", Some(10), Some(50), DetectorTool::GeNomad),
        ];
        let regions = consolidate(&preds);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].is_whole_contig());
        assert_eq!(regions[0].contig_id, "c1");
        assert_eq!(regions[0].tools_label(), "genomad,vibrant");
        assert_eq!(regions[1].span(), Some((10, 50)));
    }

    #[test]
    fn test_contigs_keep_first_appearance_order() {
        let preds = vec![
            pred("c9", Some(1), Some(5), DetectorTool::GeNomad),
            pred("c1", Some(1), Some(5), DetectorTool::GeNomad),
        ];
        let contigs: Vec<_> = consolidate(&preds).into_iter().map(|r| r.contig_id).collect();
        assert_eq!(contigs, vec!["c9", "c1"]);
    }

    #[test]
    fn test_remerge_is_fixed_point() {
        let preds = vec![
            pred("c1", Some(100), Some(500), DetectorTool::GeNomad),
            pred("c1", Some(450), Some(700), DetectorTool::Vibrant),
            pred("c2", None, Some(70), DetectorTool::Vibrant),
        ];
        let once = consolidate(&preds);
        assert_eq!(remerge(&once), once);
    }

    #[test]
    fn test_consolidated_table_format() {
        let preds = vec![
            pred("c1", Some(100), Some(500), DetectorTool::GeNomad),
            pred("c2", None, None, DetectorTool::Vibrant),
        ];
        let mut out = Vec::new();
        write_consolidated_table(&mut out, &consolidate(&preds)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            format!("{CONSOLIDATED_HEADER}\ng1\tc1\t100\t500\tgenomad\ng1\tc2\tNA\tNA\tvibrant\n")
        );
    }
}
