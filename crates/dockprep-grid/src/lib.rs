//! dockprep-grid — Binding site to docking search box.
//!
//! 1. Residue selection from a binding-site prediction table
//! 2. Atom-cloud diameter (maximum pairwise distance)
//! 3. Grid box derivation under an explicit margin policy
//! 4. Docking config emission (and parsing back)
//!
//! Nothing in this crate talks to a structure engine; centers of mass and
//! atom coordinates are handed in by the caller.

pub mod geometry;
pub mod residue;
pub mod grid_box;
pub mod vina_config;

pub use geometry::{max_pairwise_distance, AtomCloud, Point3D};
pub use grid_box::{derive_box, GridBox, MarginMode};
pub use residue::{parse_binding_site_table, read_binding_site_table, select_residues, select_top_residues, BindingSiteTable, Residue, ResidueSet};
pub use vina_config::{parse_config, render_config, write_config, VinaConfig};
