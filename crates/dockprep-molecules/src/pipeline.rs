//! Orchestrator for structure preparation.
//!
//! Every per-structure step runs in the same order: selection, geometry
//! queries, box derivation, then serialization. A session is opened per
//! structure and released before any external tool runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dockprep_common::{PrepConfig, PrepError, Result, SelectionConfig, SelectionMode};
use dockprep_grid::{
    derive_box, max_pairwise_distance, read_binding_site_table, select_residues, select_top_residues,
    write_config, GridBox, MarginMode, ResidueSet,
};
use tokio::fs;
use tracing::{debug, error, info};

use crate::ligand::LigandLookup;
use crate::openbabel::OpenBabelRunner;
use crate::pdb::StructureTarget;
use crate::selection::Selection;
use crate::session::{GeometryProvider, StructureSession};

const LIGAND: &str = "ligand";
const BINDING_RESIDUES: &str = "binding_res";

/// How binding-site residues are picked from a prediction table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PocketRule {
    /// Residues with probability strictly above the cutoff
    Cutoff(f64),
    /// The n most probable residues
    TopN(usize),
}

impl From<&SelectionConfig> for PocketRule {
    fn from(config: &SelectionConfig) -> Self {
        match config.mode {
            SelectionMode::Cutoff => PocketRule::Cutoff(config.cutoff),
            SelectionMode::TopN => PocketRule::TopN(config.top_n),
        }
    }
}

impl PocketRule {
    pub fn pick(&self, table: &dockprep_grid::BindingSiteTable) -> Result<ResidueSet> {
        match *self {
            PocketRule::Cutoff(cutoff) => select_residues(table, cutoff),
            PocketRule::TopN(n) => Ok(select_top_residues(table, n)),
        }
    }
}

/// Files produced for one structure.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStructure {
    pub structure_id: String,
    pub grid: Option<GridBox>,
    /// Main output: the docking config, or the processed structure
    pub output: PathBuf,
    pub receptor: Option<PathBuf>,
    pub ligand: Option<PathBuf>,
    /// Canonical SMILES of the boxed ligand, when one was prepared
    pub smiles: Option<String>,
}

impl PreparedStructure {
    fn file(structure_id: &str, output: PathBuf) -> Self {
        Self {
            structure_id: structure_id.to_string(),
            grid: None,
            output,
            receptor: None,
            ligand: None,
            smiles: None,
        }
    }
}

/// Per-structure operation applied by `run_batch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    /// Full ligand-defined preparation
    Crystal,
    /// Ligand-defined box and config only
    CrystalGrid,
    Strip,
    Protonate,
    Minimize,
}

/// Outcome of a batch run. Failures do not stop the batch.
#[derive(Debug)]
pub struct BatchReport {
    pub operation: BatchOperation,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<PreparedStructure>,
    pub failed: Vec<(PathBuf, PrepError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Box around a ligand selection using the ligand-diameter policy.
pub fn ligand_grid<G: GeometryProvider>(geom: &mut G, ligand: &Selection, mode: MarginMode) -> Result<GridBox> {
    let count = geom.select(LIGAND, ligand)?;
    if count == 0 {
        return Err(PrepError::Selection(format!(
            "no ligand atoms ({ligand}) in {}",
            geom.structure_id()
        )));
    }
    let named = Selection::named(LIGAND);
    let center = geom.center_of_mass(&named)?;
    let diameter = max_pairwise_distance(&geom.coords(&named)?);
    debug!("{}: ligand of {} atoms, diameter {:.3}", geom.structure_id(), count, diameter);
    derive_box(center, diameter, None, mode)
}

/// Box around predicted binding residues using the binding-residue-distance
/// policy. An empty residue set fails before the structure is queried.
pub fn binding_site_grid<G: GeometryProvider>(geom: &mut G, residues: &ResidueSet) -> Result<GridBox> {
    if residues.is_empty() {
        return Err(PrepError::DegenerateBox(format!(
            "no binding residues selected for {}",
            geom.structure_id()
        )));
    }
    let count = geom.select(BINDING_RESIDUES, &Selection::from(residues))?;
    if count == 0 {
        return Err(PrepError::DegenerateBox(format!(
            "binding residues {} have no atoms in {}",
            residues.to_selection().unwrap_or_default(),
            geom.structure_id()
        )));
    }
    let named = Selection::named(BINDING_RESIDUES);
    let pocket_center = geom.center_of_mass(&named)?;
    let diameter = max_pairwise_distance(&geom.coords(&named)?);
    let protein_center = geom.center_of_mass(&Selection::All)?;
    debug!(
        "{}: {} pocket atoms, diameter {:.3}, {:.3} A from structure center",
        geom.structure_id(),
        count,
        diameter,
        pocket_center.distance(&protein_center)
    );
    derive_box(pocket_center, diameter, Some(protein_center), MarginMode::BindingResidueDistance)
}

pub struct PrepPipeline {
    config: PrepConfig,
    obabel: OpenBabelRunner,
    output_dir: PathBuf,
    pocket: PocketRule,
    ligand_resn: Option<String>,
    lookup: Option<LigandLookup>,
}

impl PrepPipeline {
    pub fn new(config: PrepConfig) -> Self {
        Self {
            obabel: OpenBabelRunner::from_config(&config.preparation),
            output_dir: config.output.directory.clone(),
            pocket: PocketRule::from(&config.selection),
            ligand_resn: None,
            lookup: None,
            config,
        }
    }

    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_pocket_rule(mut self, rule: PocketRule) -> Self {
        self.pocket = rule;
        self
    }

    /// Use this residue name as the ligand in every structure.
    pub fn with_ligand(mut self, resn: &str) -> Self {
        self.ligand_resn = Some(resn.trim().to_ascii_uppercase());
        self
    }

    /// Ask RCSB for the annotated ligand when the file stem is a PDB id.
    pub fn with_ligand_lookup(mut self, lookup: LigandLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    fn ligand_mode(&self) -> MarginMode {
        MarginMode::LigandDiameter {
            base_margin: self.config.grid.base_margin,
            scale: self.config.grid.scale,
        }
    }

    fn output_path(&self, stem: &str, suffix: &str) -> PathBuf {
        self.output_dir.join(format!("{stem}{suffix}"))
    }

    async fn ensure_output_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    /// Ligand residue name for `stem`: explicit, then the RCSB annotation.
    /// A failed lookup fails the structure.
    async fn ligand_candidate(&self, stem: &str) -> Result<Option<String>> {
        if let Some(resn) = &self.ligand_resn {
            return Ok(Some(resn.clone()));
        }
        let Some(lookup) = self.lookup.as_ref() else {
            return Ok(None);
        };
        if !matches!(StructureTarget::classify(stem), Ok(StructureTarget::Pdb(_))) {
            debug!("{} is not a PDB id, skipping ligand lookup", stem);
            return Ok(None);
        }
        lookup.binding_ligand(stem).await
    }

    /// A named ligand must be present. Any organic group is used only when no
    /// ligand name is known.
    fn ligand_selection<G: GeometryProvider>(&self, geom: &G, candidate: Option<String>) -> Result<Selection> {
        let Some(resn) = candidate else {
            debug!("{}: no ligand name known, using organic", geom.structure_id());
            return Ok(Selection::Organic);
        };
        let selection = Selection::resn(&resn);
        if geom.count(&selection)? == 0 {
            return Err(PrepError::Selection(format!(
                "no residue named {} in {}",
                resn,
                geom.structure_id()
            )));
        }
        Ok(selection)
    }

    /// Box from the bound ligand, written as `<stem>_config.txt`.
    pub async fn crystal_grid(&self, pdb_path: &Path) -> Result<PreparedStructure> {
        let stem = file_stem(pdb_path);
        let candidate = self.ligand_candidate(&stem).await?;

        let mut session = StructureSession::load(pdb_path)?;
        let ligand = self.ligand_selection(&session, candidate)?;
        let grid = ligand_grid(&mut session, &ligand, self.ligand_mode())?;
        session.quit();

        self.ensure_output_dir().await?;
        let config_path = self.output_path(&stem, "_config.txt");
        write_config(&config_path, &stem, &self.config.grid.ligand_id, &grid)?;
        info!("{}: grid center {:?}, size {}", stem, grid.center(), grid.size());

        Ok(PreparedStructure { grid: Some(grid), ..PreparedStructure::file(&stem, config_path) })
    }

    /// Holo-structure preparation: ligand box, ligand PDBQT and SMILES,
    /// protein-only receptor PDBQT and the docking config.
    pub async fn prepare_crystal(&self, pdb_path: &Path) -> Result<PreparedStructure> {
        let stem = file_stem(pdb_path);
        let candidate = self.ligand_candidate(&stem).await?;
        self.ensure_output_dir().await?;

        let ligand_pdb = self.output_path(&stem, "_ligand.pdb");
        let stripped = self.output_path(&stem, "_rmnpm.pdb");

        let mut session = StructureSession::load(pdb_path)?;
        let ligand = self.ligand_selection(&session, candidate)?;
        let grid = ligand_grid(&mut session, &ligand, self.ligand_mode())?;
        session.save(&ligand_pdb, &Selection::named(LIGAND))?;
        session.remove(&Selection::Protein.not())?;
        session.save(&stripped, &Selection::All)?;
        session.quit();

        let ph = self.config.preparation.ph;
        let ligand_pdbqt = self
            .obabel
            .ligand_to_pdbqt(&ligand_pdb, &self.output_path(&stem, "_ligand.pdbqt"), ph)
            .await?;
        let smiles = self.obabel.to_smiles(&ligand_pdb).await?;
        let smi_path = self.output_path(&stem, "_ligand.smi");
        fs::write(&smi_path, format!("{smiles}\t{stem}_ligand\n")).await?;
        debug!("{}: ligand SMILES {}", stem, smiles);
        let receptor = self.prepare_receptor(&stripped, &stem).await?;

        let config_path = self.output_path(&stem, "_config.txt");
        write_config(&config_path, &stem, &format!("{stem}_ligand"), &grid)?;
        info!("{}: prepared (grid size {})", stem, grid.size());

        Ok(PreparedStructure {
            structure_id: stem,
            grid: Some(grid),
            output: config_path,
            receptor: Some(receptor),
            ligand: Some(ligand_pdbqt),
            smiles: Some(smiles),
        })
    }

    /// Box from predicted binding residues, written as `<stem>_config.txt`.
    pub async fn predicted_site_grid(&self, pdb_path: &Path, table_path: &Path) -> Result<PreparedStructure> {
        let stem = file_stem(pdb_path);
        let table = read_binding_site_table(table_path)?;
        let residues = self.pocket.pick(&table)?;
        info!("{}: {} binding residues from {} rows", stem, residues.len(), table.len());

        let mut session = StructureSession::load(pdb_path)?;
        let grid = binding_site_grid(&mut session, &residues)?;
        session.quit();

        self.ensure_output_dir().await?;
        let config_path = self.output_path(&stem, "_config.txt");
        write_config(&config_path, &stem, &self.config.grid.ligand_id, &grid)?;
        info!("{}: grid center {:?}, size {}", stem, grid.center(), grid.size());

        Ok(PreparedStructure { grid: Some(grid), ..PreparedStructure::file(&stem, config_path) })
    }

    /// Apo/predicted-structure preparation: binding-site box plus receptor PDBQT.
    pub async fn prepare_predicted_site(&self, pdb_path: &Path, table_path: &Path) -> Result<PreparedStructure> {
        let prepared = self.predicted_site_grid(pdb_path, table_path).await?;
        let receptor = self.prepare_receptor(pdb_path, &prepared.structure_id).await?;
        Ok(PreparedStructure { receptor: Some(receptor), ..prepared })
    }

    /// Protonated receptor converted to `<stem>.pdbqt`.
    async fn prepare_receptor(&self, pdb_path: &Path, stem: &str) -> Result<PathBuf> {
        let protonated = self
            .obabel
            .protonate(pdb_path, &self.output_path(stem, "_protonated.pdb"), self.config.preparation.ph)
            .await?;
        self.obabel.receptor_to_pdbqt(&protonated, &self.output_path(stem, ".pdbqt")).await
    }

    /// Drop every non-protein atom, writing `<stem>_rmnpm.pdb`.
    pub async fn strip_nonprotein(&self, pdb_path: &Path) -> Result<PreparedStructure> {
        let stem = file_stem(pdb_path);
        self.ensure_output_dir().await?;
        let output = self.output_path(&stem, "_rmnpm.pdb");

        let mut session = StructureSession::load(pdb_path)?;
        let removed = session.remove(&Selection::Protein.not())?;
        session.save(&output, &Selection::All)?;
        info!("{}: removed {} non-protein atoms", stem, removed);

        Ok(PreparedStructure::file(&stem, output))
    }

    pub async fn protonate_structure(&self, pdb_path: &Path) -> Result<PreparedStructure> {
        let stem = file_stem(pdb_path);
        self.ensure_output_dir().await?;
        let output = self
            .obabel
            .protonate(pdb_path, &self.output_path(&stem, "_protonated.pdb"), self.config.preparation.ph)
            .await?;
        Ok(PreparedStructure::file(&stem, output))
    }

    /// Minimized `<stem>_minimized.pdb` plus its rigid receptor `<stem>_protein.pdbqt`.
    pub async fn minimize_structure(&self, pdb_path: &Path) -> Result<PreparedStructure> {
        let stem = file_stem(pdb_path);
        self.ensure_output_dir().await?;
        let output = self.obabel.minimize(pdb_path, &self.output_path(&stem, "_minimized.pdb")).await?;
        let receptor = self.obabel.receptor_to_pdbqt(&output, &self.output_path(&stem, "_protein.pdbqt")).await?;
        Ok(PreparedStructure { receptor: Some(receptor), ..PreparedStructure::file(&stem, output) })
    }

    /// Apply `operation` to every `*.pdb` in `input_dir`, in name order.
    pub async fn run_batch(&self, input_dir: &Path, operation: BatchOperation) -> Result<BatchReport> {
        let started_at = Utc::now();
        let inputs = list_structures(input_dir).await?;
        info!("Running {:?} on {} structures from {:?}", operation, inputs.len(), input_dir);

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for path in inputs {
            let result = match operation {
                BatchOperation::Crystal => self.prepare_crystal(&path).await,
                BatchOperation::CrystalGrid => self.crystal_grid(&path).await,
                BatchOperation::Strip => self.strip_nonprotein(&path).await,
                BatchOperation::Protonate => self.protonate_structure(&path).await,
                BatchOperation::Minimize => self.minimize_structure(&path).await,
            };
            match result {
                Ok(prepared) => {
                    debug!("Processed {:?}. Output saved to {:?}", path, prepared.output);
                    succeeded.push(prepared);
                }
                Err(e) => {
                    error!("Error processing {:?}: {}", path, e);
                    failed.push((path, e));
                }
            }
        }

        let report = BatchReport { operation, started_at, finished_at: Utc::now(), succeeded, failed };
        info!(
            "{:?} finished: {} succeeded, {} failed in {} ms",
            operation,
            report.succeeded.len(),
            report.failed.len(),
            (report.finished_at - report.started_at).num_milliseconds()
        );
        Ok(report)
    }
}

/// `*.pdb` files directly inside `dir`, sorted by file name.
pub async fn list_structures(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PrepError::NotFound(format!("input directory {}", dir.display())));
    }
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_pdb = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdb"));
        if is_pdb && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "structure".to_string())
}
