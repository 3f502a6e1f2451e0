/// Contig lookup by normalized name
///
/// Detectors rename contigs slightly (`contig_7|provirus_10_900`, `contig_7_fragment_2`,
/// header descriptions), so every name is reduced to a stable key before lookup.
use std::collections::HashMap;

use crate::fasta::FastaRecord;

/// Reduce a contig name to its stable key: first whitespace token, then the part
/// before the first `|`, then the part before a `_fragment_` marker
pub fn normalize_contig_name(name: &str) -> &str {
    let token = name.split_whitespace().next().unwrap_or("");
    let token = token.split('|').next().unwrap_or(token);
    match token.find("_fragment_") {
        Some(pos) if pos > 0 => &token[..pos],
        _ => token,
    }
}

/// How a lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
}

/// Contigs of one genome, addressable by normalized name
#[derive(Debug, Clone, Default)]
pub struct ContigIndex {
    /// Normalized names in file order (ID is the index)
    names: Vec<String>,
    residues: Vec<Vec<u8>>,
    name_to_id: HashMap<String, usize>,
}

impl ContigIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<FastaRecord>) -> Self {
        let mut index = ContigIndex::new();
        for record in records {
            index.insert(&record.name, record.seq);
        }
        index
    }

    /// Add a contig; a second contig with the same normalized name is ignored
    pub fn insert(&mut self, name: &str, seq: Vec<u8>) -> Option<usize> {
        let key = normalize_contig_name(name);
        if self.name_to_id.contains_key(key) {
            log::warn!("Duplicate contig name '{key}' after normalization; keeping the first");
            return None;
        }
        let id = self.names.len();
        self.names.push(key.to_string());
        self.residues.push(seq);
        self.name_to_id.insert(key.to_string(), id);
        Some(id)
    }

    /// Find the contig a region refers to
    ///
    /// An exact normalized match wins. Otherwise a prefix match in either direction is
    /// accepted only when exactly one contig qualifies.
    pub fn lookup(&self, name: &str) -> Option<(usize, MatchKind)> {
        let key = normalize_contig_name(name);
        if key.is_empty() {
            return None;
        }
        if let Some(&id) = self.name_to_id.get(key) {
            return Some((id, MatchKind::Exact));
        }

        let mut candidates = self
            .names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.starts_with(key) || key.starts_with(n.as_str()));
        match (candidates.next(), candidates.next()) {
            (Some((id, _)), None) => Some((id, MatchKind::Prefix)),
            (Some(_), Some(_)) => {
                log::warn!("Contig name '{key}' matches several contigs by prefix; not resolved");
                None
            }
            _ => None,
        }
    }

    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub fn residues(&self, id: usize) -> &[u8] {
        &self.residues[id]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_contig_name() {
        assert_eq!(normalize_contig_name("contig_1 len=5000"), "contig_1");
        assert_eq!(normalize_contig_name("contig_1|provirus_10_900"), "contig_1");
        assert_eq!(normalize_contig_name("contig_1_fragment_3"), "contig_1");
        assert_eq!(normalize_contig_name("NZ_CP0001.1"), "NZ_CP0001.1");
        assert_eq!(normalize_contig_name(""), "");
    }

    #[test]
    fn test_lookup_exact_and_prefix() {
        let index = ContigIndex::from_records(vec![
            FastaRecord::new("NC_000913.3 Escherichia coli", b"ACGT".to_vec()),
            FastaRecord::new("plasmid_A", b"GG".to_vec()),
        ]);
        assert_eq!(index.len(), 2);

        assert_eq!(index.lookup("NC_000913.3"), Some((0, MatchKind::Exact)));
        assert_eq!(index.lookup("NC_000913.3|provirus_1_100"), Some((0, MatchKind::Exact)));
        assert_eq!(index.lookup("plasmid"), Some((1, MatchKind::Prefix)));
        assert_eq!(index.lookup("chromosome"), None);
        assert_eq!(index.residues(1), b"GG");
    }

    #[test]
    fn test_ambiguous_prefix_is_not_resolved() {
        let index = ContigIndex::from_records(vec![
            FastaRecord::new("contig_10", b"A".to_vec()),
            FastaRecord::new("contig_11", b"C".to_vec()),
        ]);
        assert_eq!(index.lookup("contig_1"), None);
        assert_eq!(index.lookup("contig_11"), Some((1, MatchKind::Exact)));
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let mut index = ContigIndex::new();
        assert_eq!(index.insert("c1 first", b"AAA".to_vec()), Some(0));
        assert_eq!(index.insert("c1 second", b"CCC".to_vec()), None);
        assert_eq!(index.residues(0), b"AAA");
    }
}
