//! Typed atom selections.
//!
//! A `Selection` is evaluated per atom by a geometry session. Engine-style
//! expressions parse into the same type:
//!
//! ```text
//! organic                         hetatm and not solvent
//! resn LBM                        chain A and resi 104-112
//! resi 112+137+149                resi 112 + resi 137 + resi 149
//! polymer.protein                 not polymer.protein
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use dockprep_common::PrepError;
use dockprep_grid::ResidueSet;

use crate::session::AtomRecord;

/// Residue names treated as protein, including common protonation variants.
const AMINO_ACIDS: &[&str] = &[
    "ALA", "ARG", "ASN", "ASP", "CYS", "GLN", "GLU", "GLY", "HIS", "ILE",
    "LEU", "LYS", "MET", "PHE", "PRO", "SER", "THR", "TRP", "TYR", "VAL",
    "HID", "HIE", "HIP", "HSD", "HSE", "HSP", "CYX", "ASH", "GLH", "LYN",
    "MSE", "SEC", "PYL",
];

const WATERS: &[&str] = &["HOH", "WAT", "H2O", "DOD", "TIP", "TIP3", "SOL"];

pub fn is_amino_acid(resn: &str) -> bool {
    AMINO_ACIDS.contains(&resn.trim().to_ascii_uppercase().as_str())
}

pub fn is_water(resn: &str) -> bool {
    WATERS.contains(&resn.trim().to_ascii_uppercase().as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Residue sequence numbers, optionally restricted to one chain
    Residues { chain: Option<String>, indices: BTreeSet<i64> },
    ResidueName(String),
    Chain(String),
    /// HETATM records
    Hetero,
    /// Non-polymer, non-solvent hetero groups containing carbon
    Organic,
    /// Amino-acid residues
    Protein,
    Water,
    /// A selection previously stored in the session under this name
    Named(String),
    Not(Box<Selection>),
    And(Box<Selection>, Box<Selection>),
    Or(Box<Selection>, Box<Selection>),
}

impl Selection {
    pub fn residues(indices: impl IntoIterator<Item = i64>) -> Self {
        Selection::Residues { chain: None, indices: indices.into_iter().collect() }
    }

    pub fn resn(name: &str) -> Self {
        Selection::ResidueName(name.trim().to_ascii_uppercase())
    }

    pub fn named(name: &str) -> Self {
        Selection::Named(name.to_string())
    }

    pub fn not(self) -> Self {
        Selection::Not(Box::new(self))
    }

    pub fn and(self, other: Selection) -> Self {
        Selection::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Selection) -> Self {
        Selection::Or(Box::new(self), Box::new(other))
    }

    /// Whether an atom matches. `Named` is resolved by the caller through
    /// `resolve`, which returns `None` for unknown names.
    pub fn matches<F>(&self, atom: &AtomRecord, resolve: &F) -> Result<bool, PrepError>
    where
        F: Fn(&str, &AtomRecord) -> Option<bool>,
    {
        Ok(match self {
            Selection::All => true,
            Selection::Residues { chain, indices } => {
                chain.as_ref().map_or(true, |c| *c == atom.chain) && indices.contains(&atom.resi)
            }
            Selection::ResidueName(name) => atom.resn.eq_ignore_ascii_case(name),
            Selection::Chain(chain) => atom.chain == *chain,
            Selection::Hetero => atom.hetero,
            Selection::Organic => {
                atom.hetero && atom.residue_has_carbon && !is_water(&atom.resn) && !is_amino_acid(&atom.resn)
            }
            Selection::Protein => is_amino_acid(&atom.resn),
            Selection::Water => is_water(&atom.resn),
            Selection::Named(name) => resolve(name, atom)
                .ok_or_else(|| PrepError::Selection(format!("no selection named '{name}'")))?,
            Selection::Not(inner) => !inner.matches(atom, resolve)?,
            Selection::And(a, b) => a.matches(atom, resolve)? && b.matches(atom, resolve)?,
            Selection::Or(a, b) => a.matches(atom, resolve)? || b.matches(atom, resolve)?,
        })
    }
}

/// Predicted binding residues. Only polymer residues match, so a ligand or
/// water sharing a residue number stays out of the pocket.
impl From<&ResidueSet> for Selection {
    fn from(set: &ResidueSet) -> Self {
        Selection::Protein.and(Selection::residues(set.iter()))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "all"),
            Selection::Residues { chain, indices } => {
                let joined = indices.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("+");
                match chain {
                    Some(c) => write!(f, "(chain {c} and resi {joined})"),
                    None => write!(f, "resi {joined}"),
                }
            }
            Selection::ResidueName(name) => write!(f, "resn {name}"),
            Selection::Chain(chain) => write!(f, "chain {chain}"),
            Selection::Hetero => write!(f, "hetatm"),
            Selection::Organic => write!(f, "organic"),
            Selection::Protein => write!(f, "polymer.protein"),
            Selection::Water => write!(f, "solvent"),
            Selection::Named(name) => write!(f, "{name}"),
            Selection::Not(inner) => write!(f, "not {inner}"),
            Selection::And(a, b) => write!(f, "({a} and {b})"),
            Selection::Or(a, b) => write!(f, "({a} or {b})"),
        }
    }
}

impl FromStr for Selection {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s);
        if tokens.is_empty() {
            return Err(PrepError::Selection("empty selection expression".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let selection = parser.or_expr()?;
        if let Some(extra) = parser.peek() {
            return Err(PrepError::Selection(format!("unexpected '{extra}' in '{s}'")));
        }
        Ok(selection)
    }
}

fn tokenize(s: &str) -> Vec<String> {
    let spaced = s.replace('+', " + ").replace('(', " ( ").replace(')', " ) ");
    spaced.split_whitespace().map(str::to_string).collect()
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_value(&mut self, after: &str) -> Result<String, PrepError> {
        self.next()
            .ok_or_else(|| PrepError::Selection(format!("'{after}' needs a value")))
    }

    fn peek_keyword(&self, words: &[&str]) -> bool {
        self.peek().is_some_and(|t| words.iter().any(|w| t.eq_ignore_ascii_case(w)))
    }

    fn or_expr(&mut self) -> Result<Selection, PrepError> {
        let mut left = self.and_expr()?;
        while self.peek_keyword(&["or", "|", "+"]) {
            self.next();
            left = left.or(self.and_expr()?);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Selection, PrepError> {
        let mut left = self.unary()?;
        while self.peek_keyword(&["and", "&"]) {
            self.next();
            left = left.and(self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Selection, PrepError> {
        if self.peek_keyword(&["not", "!"]) {
            self.next();
            return Ok(self.unary()?.not());
        }
        if self.peek() == Some("(") {
            self.next();
            let inner = self.or_expr()?;
            if self.next().as_deref() != Some(")") {
                return Err(PrepError::Selection("unbalanced parenthesis".to_string()));
            }
            return Ok(inner);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Selection, PrepError> {
        let token = self
            .next()
            .ok_or_else(|| PrepError::Selection("expression ends unexpectedly".to_string()))?;

        match token.to_ascii_lowercase().as_str() {
            "all" | "*" => Ok(Selection::All),
            "organic" | "org." => Ok(Selection::Organic),
            "hetatm" | "het" => Ok(Selection::Hetero),
            "polymer.protein" | "protein" | "polymer" => Ok(Selection::Protein),
            "solvent" | "sol." | "water" => Ok(Selection::Water),
            "chain" | "c." => Ok(Selection::Chain(self.expect_value("chain")?)),
            "resn" | "resname" | "r." => {
                let mut sel = Selection::resn(&self.expect_value("resn")?);
                while self.continues_list(&["resn", "resname", "r."]) {
                    sel = sel.or(Selection::resn(&self.expect_value("resn")?));
                }
                Ok(sel)
            }
            "resi" | "resid" | "i." => {
                let mut indices = BTreeSet::new();
                parse_resi_item(&self.expect_value("resi")?, &mut indices)?;
                while self.continues_list(&["resi", "resid", "i."]) {
                    parse_resi_item(&self.expect_value("resi")?, &mut indices)?;
                }
                Ok(Selection::Residues { chain: None, indices })
            }
            ")" => Err(PrepError::Selection("unbalanced parenthesis".to_string())),
            _ => Ok(Selection::Named(token)),
        }
    }

    /// After a list item: consume `+` and an optional repeated keyword, so
    /// both `resi 1+2` and `resi 1 + resi 2` continue the same list.
    fn continues_list(&mut self, keywords: &[&str]) -> bool {
        if self.peek() != Some("+") {
            return false;
        }
        let after = self.tokens.get(self.pos + 1).map(String::as_str);
        match after {
            Some(t) if keywords.iter().any(|k| t.eq_ignore_ascii_case(k)) => {
                self.pos += 2;
                true
            }
            Some(t) if is_list_value(t) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }
}

fn is_list_value(token: &str) -> bool {
    !matches!(token, "(" | ")" | "+")
        && !["and", "or", "not", "&", "|", "!"].iter().any(|k| token.eq_ignore_ascii_case(k))
        && !is_selector_keyword(token)
}

fn is_selector_keyword(token: &str) -> bool {
    [
        "all", "organic", "hetatm", "het", "polymer.protein", "protein", "polymer", "solvent",
        "water", "chain", "resn", "resname", "resi", "resid",
    ]
    .iter()
    .any(|k| token.eq_ignore_ascii_case(k))
}

fn parse_resi_item(item: &str, into: &mut BTreeSet<i64>) -> Result<(), PrepError> {
    if let Ok(single) = item.parse::<i64>() {
        into.insert(single);
        return Ok(());
    }
    // Range `a-b`; a leading '-' belongs to the first number
    let split_at = item
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '-')
        .map(|(i, _)| i);
    if let Some(i) = split_at {
        let (start, end) = (&item[..i], &item[i + 1..]);
        if let (Ok(start), Ok(end)) = (start.parse::<i64>(), end.parse::<i64>()) {
            if start <= end {
                into.extend(start..=end);
                return Ok(());
            }
        }
    }
    Err(PrepError::Selection(format!("invalid residue number or range: '{item}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockprep_grid::Point3D;

    fn parse(s: &str) -> Selection {
        s.parse().unwrap()
    }

    #[test]
    fn test_keywords() {
        assert_eq!(parse("all"), Selection::All);
        assert_eq!(parse("organic"), Selection::Organic);
        assert_eq!(parse("hetatm"), Selection::Hetero);
        assert_eq!(parse("polymer.protein"), Selection::Protein);
        assert_eq!(parse("resn lbm"), Selection::resn("LBM"));
        assert_eq!(parse("chain B"), Selection::Chain("B".to_string()));
    }

    #[test]
    fn test_resi_list_forms() {
        let compact = parse("resi 112+137+149");
        let verbose = parse("resi 112 + resi 137 + resi 149");
        assert_eq!(compact, Selection::residues([112, 137, 149]));
        assert_eq!(compact, verbose);
    }

    #[test]
    fn test_resi_range() {
        assert_eq!(parse("resi 104-107"), Selection::residues([104, 105, 106, 107]));
        assert_eq!(parse("resi -3"), Selection::residues([-3]));
        assert!("resi 10-2".parse::<Selection>().is_err());
    }

    #[test]
    fn test_plus_between_selectors_is_or() {
        assert_eq!(parse("resn LBM + organic"), Selection::resn("LBM").or(Selection::Organic));
    }

    #[test]
    fn test_boolean_precedence() {
        assert_eq!(
            parse("chain A and resi 5 or hetatm"),
            Selection::Chain("A".to_string())
                .and(Selection::residues([5]))
                .or(Selection::Hetero)
        );
        assert_eq!(
            parse("not (solvent or polymer.protein)"),
            Selection::Water.or(Selection::Protein).not()
        );
    }

    #[test]
    fn test_named_reference() {
        assert_eq!(parse("binding_res"), Selection::named("binding_res"));
    }

    #[test]
    fn test_errors() {
        assert!("".parse::<Selection>().is_err());
        assert!("resi".parse::<Selection>().is_err());
        assert!("resi abc".parse::<Selection>().is_err());
        assert!("(organic".parse::<Selection>().is_err());
        assert!("organic )".parse::<Selection>().is_err());
    }

    #[test]
    fn test_display_reparses() {
        let sel = Selection::residues([3, 1, 2]).and(Selection::Organic.not());
        assert_eq!(sel.to_string(), "(resi 1+2+3 and not organic)");
        assert_eq!(parse(&sel.to_string()), sel);
    }

    #[test]
    fn test_from_residue_set() {
        let set: ResidueSet = [112, 108].into_iter().collect();
        let sel = Selection::from(&set);
        assert_eq!(sel, Selection::Protein.and(Selection::residues([108, 112])));
        assert_eq!(parse(&sel.to_string()), sel);

        let no_names = |_: &str, _: &AtomRecord| None;
        let lys = AtomRecord::new(1, "CA", "C", ("A", 112, "LYS"), false, Point3D::default());
        let ligand = AtomRecord::new(2, "C1", "C", ("A", 112, "LBM"), true, Point3D::default());
        assert!(sel.matches(&lys, &no_names).unwrap());
        assert!(!sel.matches(&ligand, &no_names).unwrap());
    }

    #[test]
    fn test_residue_classes() {
        assert!(is_amino_acid("lys"));
        assert!(is_amino_acid("HID"));
        assert!(!is_amino_acid("LBM"));
        assert!(is_water("HOH"));
        assert!(!is_water("ATP"));
    }
}
