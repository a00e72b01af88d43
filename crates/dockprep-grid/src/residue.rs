//! Binding-site prediction tables and residue selection.
//!
//! The predictor writes one CSV row per target residue with the columns
//! `(row index, chain, residue index, residue type, p(bind))` after a header
//! row. Only the residue index and p(bind) drive selection; chain and type
//! are kept for reporting.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use dockprep_common::{PrepError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const RESI_COLUMN: usize = 2;
const PROBABILITY_COLUMN: usize = 4;

/// One predicted residue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Residue {
    pub chain: String,
    pub index: i64,
    /// Residue type as written by the predictor ("X" when unknown)
    pub residue_type: String,
    pub probability: f64,
}

/// Predictor output for one structure, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSiteTable {
    pub residues: Vec<Residue>,
}

impl BindingSiteTable {
    pub fn new(residues: Vec<Residue>) -> Self {
        Self { residues }
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Highest p(bind) in the table, if any.
    pub fn max_probability(&self) -> Option<f64> {
        self.residues.iter().map(|r| r.probability).reduce(f64::max)
    }
}

/// Unique residue sequence numbers chosen as the pocket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidueSet(BTreeSet<i64>);

impl ResidueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: i64) -> bool {
        self.0.insert(index)
    }

    pub fn contains(&self, index: i64) -> bool {
        self.0.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Residue numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    /// Engine-style selection expression, e.g. `resi 104+108+112`.
    /// `None` for the empty set, which has no valid expression.
    pub fn to_selection(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let joined = self.0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("+");
        Some(format!("resi {joined}"))
    }
}

impl FromIterator<i64> for ResidueSet {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Read a prediction table from a CSV file.
pub fn read_binding_site_table(path: &Path) -> Result<BindingSiteTable> {
    let file = File::open(path)?;
    let table = parse_binding_site_table(file)?;
    debug!("Read {} residues from {:?}", table.len(), path);
    Ok(table)
}

/// Parse a prediction table. The first line is a header and is skipped.
///
/// Any row without a numeric residue index or a probability in [0, 1] fails
/// the whole table; rows are numbered from 1 after the header.
pub fn parse_binding_site_table<R: Read>(reader: R) -> Result<BindingSiteTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut residues = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let row = i + 1;
        let record = record.map_err(|e| PrepError::parse(row, e.to_string()))?;

        if record.len() <= PROBABILITY_COLUMN {
            return Err(PrepError::parse(
                row,
                format!("expected at least {} columns, found {}", PROBABILITY_COLUMN + 1, record.len()),
            ));
        }

        let resi = &record[RESI_COLUMN];
        let index: i64 = resi
            .parse()
            .map_err(|_| PrepError::parse(row, format!("residue index is not an integer: '{resi}'")))?;

        let p = &record[PROBABILITY_COLUMN];
        let probability: f64 = p
            .parse()
            .map_err(|_| PrepError::parse(row, format!("probability is not a number: '{p}'")))?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(PrepError::parse(row, format!("probability outside [0, 1]: {probability}")));
        }

        residues.push(Residue {
            chain: record[1].to_string(),
            index,
            residue_type: record[3].to_string(),
            probability,
        });
    }

    Ok(BindingSiteTable { residues })
}

/// Residues whose p(bind) is strictly greater than `cutoff`.
///
/// Repeated residue indices collapse to one entry. The result may be empty.
pub fn select_residues(table: &BindingSiteTable, cutoff: f64) -> Result<ResidueSet> {
    if !(0.0..=1.0).contains(&cutoff) {
        return Err(PrepError::InvalidInput(format!("cutoff must be in [0, 1], got {cutoff}")));
    }

    let set: ResidueSet = table
        .residues
        .iter()
        .filter(|r| r.probability > cutoff)
        .map(|r| r.index)
        .collect();

    debug!("{} of {} residues above p(bind) > {}", set.len(), table.len(), cutoff);
    Ok(set)
}

/// The `n` most probable residues, ties broken by lower residue index.
pub fn select_top_residues(table: &BindingSiteTable, n: usize) -> ResidueSet {
    let mut ranked: Vec<&Residue> = table.residues.iter().collect();
    ranked.sort_by(|a, b| {
        b.probability
            .total_cmp(&a.probability)
            .then_with(|| a.index.cmp(&b.index))
    });

    let mut set = ResidueSet::new();
    for residue in ranked {
        if set.len() == n {
            break;
        }
        set.insert(residue.index);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = ",chain,resi,resn,p(bind)\n";

    fn table(rows: &str) -> BindingSiteTable {
        parse_binding_site_table(format!("{HEADER}{rows}").as_bytes()).unwrap()
    }

    fn residue(index: i64, probability: f64) -> Residue {
        Residue { chain: "A".to_string(), index, residue_type: "X".to_string(), probability }
    }

    #[test]
    fn test_parse_rows() {
        let t = table("0,A,104,L,0.12\n1,A,108,K,0.91\n");
        assert_eq!(t.len(), 2);
        assert_eq!(t.residues[1], Residue {
            chain: "A".to_string(),
            index: 108,
            residue_type: "K".to_string(),
            probability: 0.91,
        });
    }

    #[test]
    fn test_row_with_empty_chain() {
        let t = table("A,,112,LYS,0.92\n");
        assert_eq!(t.residues[0].index, 112);
        assert_eq!(t.residues[0].chain, "");

        assert!(select_residues(&t, 0.8).unwrap().contains(112));
        assert!(!select_residues(&t, 0.95).unwrap().contains(112));
    }

    #[test]
    fn test_malformed_index_names_row() {
        let err = parse_binding_site_table(format!("{HEADER}0,A,104,L,0.1\n1,A,abc,K,0.9\n").as_bytes())
            .unwrap_err();
        match err {
            PrepError::Parse { row, message } => {
                assert_eq!(row, 2);
                assert!(message.contains("abc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_probability_column() {
        let err = parse_binding_site_table(format!("{HEADER}0,A,104,L\n").as_bytes()).unwrap_err();
        assert!(matches!(err, PrepError::Parse { row: 1, .. }));
    }

    #[test]
    fn test_probability_out_of_range() {
        let err = parse_binding_site_table(format!("{HEADER}0,A,104,L,1.7\n").as_bytes()).unwrap_err();
        assert!(matches!(err, PrepError::Parse { row: 1, .. }));
    }

    #[test]
    fn test_strictly_greater_than_cutoff() {
        let t = BindingSiteTable::new(vec![residue(1, 0.8), residue(2, 0.80001), residue(3, 0.5)]);
        let set = select_residues(&t, 0.8).unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let t = BindingSiteTable::new(vec![residue(7, 0.9), residue(7, 0.95), residue(3, 0.99)]);
        let set = select_residues(&t, 0.8).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_selection().as_deref(), Some("resi 3+7"));
    }

    #[test]
    fn test_nothing_clears_threshold() {
        let t = BindingSiteTable::new(vec![residue(1, 0.5), residue(2, 0.3)]);
        let set = select_residues(&t, 0.8).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.to_selection(), None);
    }

    #[test]
    fn test_cutoff_out_of_range() {
        let t = BindingSiteTable::default();
        assert!(matches!(select_residues(&t, -0.1), Err(PrepError::InvalidInput(_))));
        assert!(matches!(select_residues(&t, f64::NAN), Err(PrepError::InvalidInput(_))));
    }

    #[test]
    fn test_selection_monotonic_in_cutoff() {
        let probabilities = [0.0, 0.05, 0.2, 0.2, 0.41, 0.5, 0.79, 0.8, 0.81, 0.93, 1.0];
        let t = BindingSiteTable::new(
            probabilities.iter().enumerate().map(|(i, p)| residue(i as i64, *p)).collect(),
        );

        let mut previous = usize::MAX;
        for step in 0..=100 {
            let cutoff = step as f64 / 100.0;
            let set = select_residues(&t, cutoff).unwrap();
            for r in &t.residues {
                assert_eq!(set.contains(r.index), r.probability > cutoff);
            }
            assert!(set.len() <= previous);
            previous = set.len();
        }
    }

    #[test]
    fn test_top_residues() {
        let t = BindingSiteTable::new(vec![
            residue(10, 0.4),
            residue(11, 0.9),
            residue(12, 0.7),
            residue(13, 0.9),
            residue(14, 0.1),
        ]);
        let set = select_top_residues(&t, 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![11, 12, 13]);

        let set = select_top_residues(&t, 1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![11]);

        assert_eq!(select_top_residues(&t, 50).len(), 5);
    }

    #[test]
    fn test_max_probability() {
        let t = BindingSiteTable::new(vec![residue(1, 0.2), residue(2, 0.5)]);
        assert_eq!(t.max_probability(), Some(0.5));
        assert_eq!(BindingSiteTable::default().max_probability(), None);
    }
}
