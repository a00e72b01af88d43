//! Scoped geometry sessions over a loaded structure.
//!
//! A `StructureSession` owns one parsed structure. Selections are evaluated
//! against a flat atom table, named selections live only as long as the
//! session, and the session is released when it is dropped.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use dockprep_common::{PrepError, Result};
use dockprep_grid::{AtomCloud, Point3D};
use pdbtbx::{Element, ReadOptions, StrictnessLevel, PDB};
use tracing::{debug, info, warn};

use crate::selection::Selection;

/// Standard atomic weight for an element symbol. Unknown symbols weigh as carbon.
pub fn element_mass(symbol: &str) -> f64 {
    Element::from_symbol(symbol.trim())
        .or(Some(Element::C))
        .and_then(|e| e.weight())
        .unwrap_or(12.0106)
}

/// Geometry queries a preparation pipeline needs from a loaded structure.
pub trait GeometryProvider {
    /// Identifier of the loaded structure (file stem).
    fn structure_id(&self) -> &str;

    /// Evaluate `selection` and store the result under `name`. Returns the
    /// number of atoms selected.
    fn select(&mut self, name: &str, selection: &Selection) -> Result<usize>;

    fn count(&self, selection: &Selection) -> Result<usize>;

    /// Mass-weighted center of the selected atoms.
    fn center_of_mass(&self, selection: &Selection) -> Result<Point3D>;

    fn coords(&self, selection: &Selection) -> Result<AtomCloud>;

    /// Delete the selected atoms from the structure. Returns how many were removed.
    fn remove(&mut self, selection: &Selection) -> Result<usize>;

    /// Write the selected atoms as a PDB file. Returns how many were written.
    fn save(&self, path: &Path, selection: &Selection) -> Result<usize>;
}

/// One atom of the loaded structure.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomRecord {
    pub serial: usize,
    pub name: String,
    pub element: String,
    /// Atomic weight used for center-of-mass weighting
    pub mass: f64,
    pub chain: String,
    pub resi: i64,
    pub resn: String,
    pub hetero: bool,
    pub pos: Point3D,
    /// Set by `AtomTable::new` for every atom whose residue contains carbon
    pub residue_has_carbon: bool,
}

impl AtomRecord {
    pub fn new(
        serial: usize,
        name: &str,
        element: &str,
        (chain, resi, resn): (&str, i64, &str),
        hetero: bool,
        pos: Point3D,
    ) -> Self {
        Self {
            serial,
            name: name.trim().to_string(),
            element: element.trim().to_ascii_uppercase(),
            mass: element_mass(element),
            chain: chain.trim().to_string(),
            resi,
            resn: resn.trim().to_ascii_uppercase(),
            hetero,
            pos,
            residue_has_carbon: false,
        }
    }

    fn residue_key(&self) -> (String, i64, String) {
        (self.chain.clone(), self.resi, self.resn.clone())
    }
}

/// Flat atom table with named selections, shared by every provider.
#[derive(Debug, Clone, Default)]
pub struct AtomTable {
    atoms: Vec<AtomRecord>,
    /// Stored selections, as sets of atom slots. Slots are stable across removals.
    named: HashMap<String, HashSet<usize>>,
    removed: HashSet<usize>,
}

impl AtomTable {
    pub fn new(mut atoms: Vec<AtomRecord>) -> Self {
        let carbon_residues: HashSet<_> = atoms
            .iter()
            .filter(|a| a.element == "C")
            .map(AtomRecord::residue_key)
            .collect();
        for atom in &mut atoms {
            atom.residue_has_carbon = carbon_residues.contains(&atom.residue_key());
        }
        Self { atoms, named: HashMap::new(), removed: HashSet::new() }
    }

    pub fn len(&self) -> usize {
        self.atoms.len() - self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_selection(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Live atoms matching `selection`, with their slots.
    pub fn matching(&self, selection: &Selection) -> Result<Vec<(usize, &AtomRecord)>> {
        let mut hits = Vec::new();
        for (slot, atom) in self.atoms.iter().enumerate() {
            if self.removed.contains(&slot) {
                continue;
            }
            let resolve = |name: &str, _: &AtomRecord| self.named.get(name).map(|set| set.contains(&slot));
            if selection.matches(atom, &resolve)? {
                hits.push((slot, atom));
            }
        }
        Ok(hits)
    }

    pub fn select(&mut self, name: &str, selection: &Selection) -> Result<usize> {
        if name.trim().is_empty() {
            return Err(PrepError::Selection("selection name is empty".to_string()));
        }
        let slots: HashSet<usize> = self.matching(selection)?.into_iter().map(|(slot, _)| slot).collect();
        let count = slots.len();
        self.named.insert(name.to_string(), slots);
        Ok(count)
    }

    pub fn count(&self, selection: &Selection) -> Result<usize> {
        Ok(self.matching(selection)?.len())
    }

    pub fn center_of_mass(&self, selection: &Selection) -> Result<Point3D> {
        let hits = self.matching(selection)?;
        if hits.is_empty() {
            return Err(PrepError::Selection(format!(
                "center of mass of '{selection}': no atoms selected"
            )));
        }
        let (mut sum, mut total) = (Point3D::default(), 0.0);
        for (_, atom) in hits {
            let mass = atom.mass;
            sum.x += atom.pos.x * mass;
            sum.y += atom.pos.y * mass;
            sum.z += atom.pos.z * mass;
            total += mass;
        }
        Ok(Point3D::new(sum.x / total, sum.y / total, sum.z / total))
    }

    pub fn coords(&self, selection: &Selection) -> Result<AtomCloud> {
        Ok(self.matching(selection)?.into_iter().map(|(_, a)| a.pos).collect())
    }

    /// Mark matching atoms removed and return their records.
    pub fn remove(&mut self, selection: &Selection) -> Result<Vec<AtomRecord>> {
        let hits: Vec<(usize, AtomRecord)> = self
            .matching(selection)?
            .into_iter()
            .map(|(slot, atom)| (slot, atom.clone()))
            .collect();
        for (slot, _) in &hits {
            self.removed.insert(*slot);
            for set in self.named.values_mut() {
                set.remove(slot);
            }
        }
        Ok(hits.into_iter().map(|(_, atom)| atom).collect())
    }
}

/// A structure loaded for selection and measurement.
pub struct StructureSession {
    id: String,
    pdb: PDB,
    table: AtomTable,
}

impl StructureSession {
    /// Parse a PDB/mmCIF file. Parsing is lenient; warnings are logged.
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| PrepError::InvalidInput(format!("non UTF-8 path: {}", path.display())))?;
        if !path.is_file() {
            return Err(PrepError::NotFound(format!("structure file {}", path.display())));
        }

        let (pdb, warnings) = ReadOptions::default()
            .set_level(StrictnessLevel::Loose)
            .read(path_str)
            .map_err(|errors| {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                PrepError::InvalidInput(format!("cannot parse {}: {}", path.display(), messages.join("; ")))
            })?;
        if !warnings.is_empty() {
            debug!("{} parse warnings for {}", warnings.len(), path.display());
        }

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "structure".to_string());
        let table = AtomTable::new(atom_records(&pdb));
        info!("Loaded {} ({} atoms)", id, table.len());
        if table.is_empty() {
            warn!("{} contains no atoms", id);
        }

        Ok(Self { id, pdb, table })
    }

    pub fn atom_count(&self) -> usize {
        self.table.len()
    }

    /// Reference to a selection stored earlier with `select`.
    pub fn named(&self, name: &str) -> Result<Selection> {
        if self.table.has_selection(name) {
            Ok(Selection::named(name))
        } else {
            Err(PrepError::Selection(format!("no selection named '{name}'")))
        }
    }

    /// End the session explicitly.
    pub fn quit(self) {}
}

impl GeometryProvider for StructureSession {
    fn structure_id(&self) -> &str {
        &self.id
    }

    fn select(&mut self, name: &str, selection: &Selection) -> Result<usize> {
        let count = self.table.select(name, selection)?;
        debug!("{}: '{}' = {} ({} atoms)", self.id, name, selection, count);
        Ok(count)
    }

    fn count(&self, selection: &Selection) -> Result<usize> {
        self.table.count(selection)
    }

    fn center_of_mass(&self, selection: &Selection) -> Result<Point3D> {
        self.table.center_of_mass(selection)
    }

    fn coords(&self, selection: &Selection) -> Result<AtomCloud> {
        self.table.coords(selection)
    }

    fn remove(&mut self, selection: &Selection) -> Result<usize> {
        let removed = self.table.remove(selection)?;
        if removed.is_empty() {
            return Ok(0);
        }
        let keys: HashSet<(usize, String)> = removed.iter().map(|a| (a.serial, a.name.clone())).collect();
        self.pdb
            .remove_atoms_by(|atom| keys.contains(&(atom.serial_number(), atom.name().trim().to_string())));
        self.pdb.remove_empty();
        debug!("{}: removed {} atoms ({})", self.id, removed.len(), selection);
        Ok(removed.len())
    }

    fn save(&self, path: &Path, selection: &Selection) -> Result<usize> {
        let path_str = path
            .to_str()
            .ok_or_else(|| PrepError::InvalidInput(format!("non UTF-8 path: {}", path.display())))?;
        let keep: HashSet<(usize, String)> = self
            .table
            .matching(selection)?
            .into_iter()
            .map(|(_, a)| (a.serial, a.name.clone()))
            .collect();
        if keep.is_empty() {
            return Err(PrepError::Selection(format!("nothing to save: '{selection}' selects no atoms")));
        }

        let mut subset = self.pdb.clone();
        subset.remove_atoms_by(|atom| !keep.contains(&(atom.serial_number(), atom.name().trim().to_string())));
        subset.remove_empty();

        pdbtbx::save(&subset, path_str, StrictnessLevel::Loose).map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PrepError::InvalidInput(format!("cannot save {}: {}", path.display(), messages.join("; ")))
        })?;
        debug!("{}: saved {} atoms to {}", self.id, keep.len(), path.display());
        Ok(keep.len())
    }
}

impl Drop for StructureSession {
    fn drop(&mut self) {
        debug!("Released session for {}", self.id);
    }
}

fn atom_records(pdb: &PDB) -> Vec<AtomRecord> {
    pdb.chains()
        .flat_map(|chain| {
            let chain_id = chain.id().to_string();
            chain.residues().flat_map(move |residue| {
                let resi = residue.serial_number() as i64;
                let resn = residue.name().unwrap_or_default().to_string();
                let chain_id = chain_id.clone();
                residue.atoms().map(move |atom| {
                    let mut record = AtomRecord::new(
                        atom.serial_number(),
                        atom.name(),
                        atom.element().map(Element::symbol).unwrap_or("C"),
                        (&chain_id, resi, &resn),
                        atom.hetero(),
                        Point3D::from(atom.pos()),
                    );
                    if let Some(mass) = atom.element().and_then(Element::weight) {
                        record.mass = mass;
                    }
                    record
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn atom(serial: usize, element: &str, resi: i64, resn: &str, hetero: bool, pos: (f64, f64, f64)) -> AtomRecord {
        AtomRecord::new(serial, element, element, ("A", resi, resn), hetero, Point3D::from(pos))
    }

    fn table() -> AtomTable {
        AtomTable::new(vec![
            atom(1, "N", 10, "LYS", false, (0.0, 0.0, 0.0)),
            atom(2, "C", 10, "LYS", false, (1.0, 0.0, 0.0)),
            atom(3, "C", 11, "GLY", false, (2.0, 0.0, 0.0)),
            atom(4, "O", 201, "HOH", true, (9.0, 9.0, 9.0)),
            atom(5, "C", 301, "LBM", true, (4.0, 0.0, 0.0)),
            atom(6, "O", 301, "LBM", true, (4.0, 2.0, 0.0)),
            atom(7, "ZN", 401, "ZN", true, (7.0, 7.0, 7.0)),
        ])
    }

    #[test]
    fn test_organic_excludes_water_and_ions() {
        let t = table();
        let hits: Vec<usize> = t.matching(&Selection::Organic).unwrap().iter().map(|(_, a)| a.serial).collect();
        assert_eq!(hits, vec![5, 6]);
        assert_eq!(t.count(&Selection::Protein).unwrap(), 3);
        assert_eq!(t.count(&Selection::Water).unwrap(), 1);
    }

    #[test]
    fn test_center_of_mass_is_mass_weighted() {
        let t = table();
        let com = t.center_of_mass(&Selection::resn("LBM")).unwrap();
        let (c, o) = (element_mass("C"), element_mass("O"));
        let expected_y = 2.0 * o / (c + o);
        assert!((com.x - 4.0).abs() < 1e-12);
        assert!((com.y - expected_y).abs() < 1e-12);
    }

    #[test]
    fn test_center_of_mass_of_nothing_is_an_error() {
        let t = table();
        let err = t.center_of_mass(&Selection::resn("XXX")).unwrap_err();
        assert!(matches!(err, PrepError::Selection(_)));
    }

    #[test]
    fn test_element_masses() {
        assert!((element_mass("C") - 12.0106).abs() < 1e-9);
        assert!((element_mass("o") - 15.9994).abs() < 1e-9);
        assert!(element_mass("ZN") > 65.0);
        assert_eq!(element_mass("Xx"), element_mass("C"));
        assert_eq!(table().atoms[6].mass, element_mass("Zn"));
    }

    #[test]
    fn test_named_selection_tracks_removals() {
        let mut t = table();
        assert_eq!(t.select("pocket", &Selection::residues([10, 11])).unwrap(), 3);
        assert_eq!(t.count(&Selection::named("pocket")).unwrap(), 3);

        let removed = t.remove(&Selection::residues([11])).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(t.count(&Selection::named("pocket")).unwrap(), 2);
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn test_unknown_named_selection() {
        let t = table();
        assert!(matches!(t.count(&Selection::named("ligand")), Err(PrepError::Selection(_))));
    }

    #[test]
    fn test_strip_non_protein() {
        let mut t = table();
        let removed = t.remove(&Selection::Protein.not()).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(t.coords(&Selection::All).unwrap().len(), 3);
    }
}
