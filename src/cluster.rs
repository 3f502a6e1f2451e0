/// Greedy, length-biased clustering of prophage sequences
///
/// Sequences are visited longest first; each joins the first open cluster whose
/// representative it matches on identity and on coverage in both directions, or
/// founds a new cluster. Ties in length keep input order, so the partition depends only
/// on input order and thresholds.
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::alignment::SimilarityTable;
use crate::config::ClusteringParams;
use crate::fasta::FastaRecord;
use crate::table_io::{create_output, open_input, read_data_lines};

/// A sequence offered for clustering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCandidate {
    pub id: String,
    pub length: usize,
}

impl ClusterCandidate {
    pub fn new(id: impl Into<String>, length: usize) -> Self {
        ClusterCandidate {
            id: id.into(),
            length,
        }
    }
}

/// One cluster; the representative is always the first member
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub representative_id: String,
    pub member_ids: Vec<String>,
    /// Lowest identity of any member against the representative
    pub ani: f64,
    /// Lowest coverage (either direction) of any member against the representative
    pub coverage: f64,
}

impl ClusterAssignment {
    fn singleton(id: &str) -> Self {
        ClusterAssignment {
            representative_id: id.to_string(),
            member_ids: vec![id.to_string()],
            ani: 100.0,
            coverage: 100.0,
        }
    }

    pub fn size(&self) -> usize {
        self.member_ids.len()
    }
}

/// Partition `candidates` into clusters
pub fn greedy_cluster(
    candidates: &[ClusterCandidate],
    table: &SimilarityTable,
    params: &ClusteringParams,
) -> Vec<ClusterAssignment> {
    let mut order: Vec<&ClusterCandidate> = candidates.iter().collect();
    // Stable sort: equal lengths stay in input order
    order.sort_by(|a, b| b.length.cmp(&a.length));

    let mut clusters: Vec<ClusterAssignment> = Vec::new();
    for candidate in order {
        let joined = clusters.iter_mut().find_map(|cluster| {
            let sim = table.lookup(&candidate.id, &cluster.representative_id)?;
            let passes = sim.identity >= params.min_ani
                && sim.first_coverage >= params.min_coverage
                && sim.second_coverage >= params.min_coverage;
            passes.then_some((cluster, sim))
        });

        match joined {
            Some((cluster, sim)) => {
                cluster.member_ids.push(candidate.id.clone());
                cluster.ani = cluster.ani.min(sim.identity);
                cluster.coverage = cluster
                    .coverage
                    .min(sim.first_coverage.min(sim.second_coverage));
            }
            None => clusters.push(ClusterAssignment::singleton(&candidate.id)),
        }
    }

    log::info!(
        "Clustered {} sequences into {} clusters (ANI >= {}%, coverage >= {}%)",
        candidates.len(),
        clusters.len(),
        params.min_ani,
        params.min_coverage
    );
    clusters
}

/// A cluster as stored in the cluster table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRow {
    pub representative_id: String,
    pub member_ids: Vec<String>,
}

impl From<&ClusterAssignment> for ClusterRow {
    fn from(cluster: &ClusterAssignment) -> Self {
        ClusterRow {
            representative_id: cluster.representative_id.clone(),
            member_ids: cluster.member_ids.clone(),
        }
    }
}

/// Write `representative<TAB>member,member,...`, one cluster per line
pub fn write_cluster_table<W: Write>(out: &mut W, clusters: &[ClusterAssignment]) -> Result<()> {
    for cluster in clusters {
        writeln!(
            out,
            "{}\t{}",
            cluster.representative_id,
            cluster.member_ids.join(",")
        )?;
    }
    Ok(())
}

pub fn write_cluster_file<P: AsRef<Path>>(path: P, clusters: &[ClusterAssignment]) -> Result<()> {
    let mut out = create_output(&path)?;
    write_cluster_table(&mut out, clusters)?;
    out.flush()?;
    Ok(())
}

pub fn parse_cluster_table<R: BufRead>(reader: R, source: &str) -> Result<Vec<ClusterRow>> {
    let mut rows = Vec::new();
    for (line_no, line) in read_data_lines(reader)? {
        let mut fields = line.splitn(2, '\t');
        let representative_id = fields.next().unwrap_or("").trim();
        if representative_id.is_empty() {
            bail!("{source}:{line_no}: missing representative id");
        }
        let member_ids: Vec<String> = fields
            .next()
            .unwrap_or("")
            .split([',', '\t'])
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        if !member_ids.iter().any(|m| m == representative_id) {
            bail!("{source}:{line_no}: representative '{representative_id}' is not among its members");
        }
        rows.push(ClusterRow {
            representative_id: representative_id.to_string(),
            member_ids,
        });
    }
    Ok(rows)
}

pub fn read_cluster_table<P: AsRef<Path>>(path: P) -> Result<Vec<ClusterRow>> {
    let path = path.as_ref();
    let input = open_input(path)?;
    parse_cluster_table(input, &path.display().to_string())
        .with_context(|| format!("Failed to read cluster table {}", path.display()))
}

/// Pick each cluster's representative record out of the full sequence set
///
/// Exactly one record per cluster, in cluster order. A representative missing from
/// `sequences` is an error.
pub fn select_representatives<'a>(
    rows: &[ClusterRow],
    sequences: &'a [FastaRecord],
) -> Result<Vec<&'a FastaRecord>> {
    let by_id: HashMap<&str, &FastaRecord> =
        sequences.iter().map(|r| (r.name.as_str(), r)).collect();

    rows.iter()
        .map(|row| {
            by_id
                .get(row.representative_id.as_str())
                .copied()
                .with_context(|| {
                    format!(
                        "Representative '{}' not found in the sequence set",
                        row.representative_id
                    )
                })
        })
        .collect()
}

/// Cluster size statistics for reporting
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClusterStats {
    pub cluster_count: usize,
    pub sequence_count: usize,
    pub mean_size: f64,
    pub max_size: usize,
    pub singleton_count: usize,
}

pub fn cluster_stats(clusters: &[ClusterAssignment]) -> ClusterStats {
    if clusters.is_empty() {
        return ClusterStats::default();
    }
    let sequence_count: usize = clusters.iter().map(|c| c.size()).sum();
    ClusterStats {
        cluster_count: clusters.len(),
        sequence_count,
        mean_size: sequence_count as f64 / clusters.len() as f64,
        max_size: clusters.iter().map(|c| c.size()).max().unwrap_or(0),
        singleton_count: clusters.iter().filter(|c| c.size() == 1).count(),
    }
}
