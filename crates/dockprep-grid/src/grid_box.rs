//! Grid box derivation.
//!
//! Two sizing policies exist and neither is a default: callers pick one.
//!
//! | Policy | size |
//! |--------|------|
//! | `LigandDiameter` | `round(base_margin + scale * ligand_diameter)` |
//! | `BindingResidueDistance` | `round(pocket_diameter + |pocket_com - protein_com|)` |
//!
//! Rounding happens once, here, to the nearest whole Angstrom with ties away
//! from zero.

use dockprep_common::{PrepError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::Point3D;

/// Padding of the ligand-diameter policy in Angstrom.
pub const DEFAULT_BASE_MARGIN: f64 = 16.0;

/// Diameter multiplier of the ligand-diameter policy.
pub const DEFAULT_SCALE: f64 = 0.8;

/// A rounded size may fall below the diameter by at most half a step.
const ROUNDING_SLACK: f64 = 0.5;

/// How the box edge is derived from the selection geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MarginMode {
    /// Pocket defined by a co-crystallized ligand.
    LigandDiameter { base_margin: f64, scale: f64 },
    /// Pocket defined by predicted binding residues; needs the structure's
    /// center of mass as reference.
    BindingResidueDistance,
}

impl MarginMode {
    /// Ligand-diameter policy with the 16 Å / 0.8 constants.
    pub const fn ligand_default() -> Self {
        MarginMode::LigandDiameter {
            base_margin: DEFAULT_BASE_MARGIN,
            scale: DEFAULT_SCALE,
        }
    }
}

/// Cubic docking search box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBox {
    center: Point3D,
    size: f64,
}

impl GridBox {
    /// Build a box from already-derived values, e.g. when reading a config back.
    pub fn new(center: Point3D, size: f64) -> Result<Self> {
        if !center.is_finite() {
            return Err(PrepError::DegenerateBox(format!("non-finite center {center:?}")));
        }
        if !size.is_finite() || size <= 0.0 {
            return Err(PrepError::DegenerateBox(format!("size must be positive, got {size}")));
        }
        Ok(Self { center, size })
    }

    pub fn center(&self) -> Point3D {
        self.center
    }

    /// Edge length applied to all three axes.
    pub fn size(&self) -> f64 {
        self.size
    }
}

/// Derive the search box for one binding selection.
///
/// `center` is the binding selection's center of mass and is used as the box
/// center as-is. `reference` is only read by `BindingResidueDistance`.
pub fn derive_box(
    center: Point3D,
    diameter: f64,
    reference: Option<Point3D>,
    mode: MarginMode,
) -> Result<GridBox> {
    if !center.is_finite() {
        return Err(PrepError::DegenerateBox(format!("non-finite center {center:?}")));
    }
    if !diameter.is_finite() || diameter < 0.0 {
        return Err(PrepError::DegenerateBox(format!("invalid diameter {diameter}")));
    }

    let raw = match mode {
        MarginMode::LigandDiameter { base_margin, scale } => base_margin + scale * diameter,
        MarginMode::BindingResidueDistance => {
            let reference = reference.ok_or_else(|| {
                PrepError::InvalidInput("binding-residue policy requires a reference point".to_string())
            })?;
            if !reference.is_finite() {
                return Err(PrepError::DegenerateBox(format!("non-finite reference {reference:?}")));
            }
            let offset = center.distance(&reference);
            debug!("pocket diameter {:.3} Å, offset from reference {:.3} Å", diameter, offset);
            diameter + offset
        }
    };

    let size = raw.round();
    if !size.is_finite() || size <= 0.0 {
        return Err(PrepError::DegenerateBox(format!(
            "derived size {size} from diameter {diameter} under {mode:?}"
        )));
    }
    if size + ROUNDING_SLACK < diameter {
        return Err(PrepError::DegenerateBox(format!(
            "derived size {size} cannot enclose a selection of diameter {diameter:.3}"
        )));
    }

    Ok(GridBox { center, size })
}
