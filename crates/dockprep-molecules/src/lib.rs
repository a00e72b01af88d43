//! dockprep-molecules — Structure handling around the grid-box core.
//!
//! 1. Fetching protein structures (PDB / AlphaFold)
//! 2. Looking up the annotated ligand of a PDB entry
//! 3. Loading structures into a scoped geometry session (select, measure, save)
//! 4. Protonation, minimization and PDBQT conversion via Open Babel
//! 5. Per-structure and batch preparation pipelines

pub mod pdb;
pub mod ligand;
pub mod selection;
pub mod session;
pub mod openbabel;
pub mod pipeline;

pub use dockprep_common::{PrepError, Result};
