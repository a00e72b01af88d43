//! Docking engine configuration file.
//!
//! ```text
//! receptor = 6o0k.pdbqt
//! ligand = ligand.pdbqt
//! center_x = 10.250
//! center_y = -3.100
//! center_z = 22.004
//!
//! size_x = 24.000
//! size_y = 24.000
//! size_z = 24.000
//! ```

use std::io::Write;
use std::path::Path;

use dockprep_common::{PrepError, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::geometry::Point3D;
use crate::grid_box::GridBox;

/// Render the config text for one receptor/ligand pair.
pub fn render_config(receptor_id: &str, ligand_id: &str, grid: &GridBox) -> Result<String> {
    check_id("receptor", receptor_id)?;
    check_id("ligand", ligand_id)?;

    let c = grid.center();
    let s = grid.size();
    Ok(format!(
        "receptor = {receptor_id}.pdbqt\n\
         ligand = {ligand_id}.pdbqt\n\
         center_x = {:.3}\n\
         center_y = {:.3}\n\
         center_z = {:.3}\n\
         \n\
         size_x = {s:.3}\n\
         size_y = {s:.3}\n\
         size_z = {s:.3}\n",
        unsigned_zero(c.x), unsigned_zero(c.y), unsigned_zero(c.z),
    ))
}

/// Coordinates that round to zero print as `0.000`, never `-0.000`.
fn unsigned_zero(v: f64) -> f64 {
    if v.abs() < 0.0005 {
        0.0
    } else {
        v
    }
}

/// Write the config next to its final location and rename it into place, so
/// readers never observe a partial file.
pub fn write_config(path: &Path, receptor_id: &str, ligand_id: &str, grid: &GridBox) -> Result<()> {
    let text = render_config(receptor_id, ligand_id, grid)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PrepError::Io(e.error))?;

    info!("Grid config written to {:?}", path);
    Ok(())
}

fn check_id(what: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(PrepError::InvalidInput(format!("{what} id must not be empty")));
    }
    if id.contains(['\n', '\r', '=']) {
        return Err(PrepError::InvalidInput(format!("{what} id contains a reserved character: {id:?}")));
    }
    Ok(())
}

/// Contents of a parsed config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VinaConfig {
    pub receptor: String,
    pub ligand: String,
    pub center: Point3D,
    pub size: [f64; 3],
    /// Keys this crate does not emit (exhaustiveness, out, ...), in file order
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl VinaConfig {
    pub fn is_cubic(&self) -> bool {
        self.size[0] == self.size[1] && self.size[1] == self.size[2]
    }

    /// The box described by a cubic config.
    pub fn grid_box(&self) -> Result<GridBox> {
        if !self.is_cubic() {
            return Err(PrepError::InvalidInput(format!("box is not cubic: {:?}", self.size)));
        }
        GridBox::new(self.center, self.size[0])
    }
}

/// Parse `key = value` lines. Blank lines are skipped; `row` in errors is the
/// 1-based line number, or 0 for a key missing from the whole file.
pub fn parse_config(text: &str) -> Result<VinaConfig> {
    let mut receptor = None;
    let mut ligand = None;
    let mut center = [None; 3];
    let mut size = [None; 3];
    let mut extra = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let row = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| PrepError::parse(row, format!("expected 'key = value', got '{line}'")))?;
        let key = key.trim();
        let value = value.trim();

        let number = || -> Result<f64> {
            value
                .parse::<f64>()
                .map_err(|_| PrepError::parse(row, format!("{key} is not a number: '{value}'")))
        };

        match key {
            "receptor" => receptor = Some(value.to_string()),
            "ligand" => ligand = Some(value.to_string()),
            "center_x" => center[0] = Some(number()?),
            "center_y" => center[1] = Some(number()?),
            "center_z" => center[2] = Some(number()?),
            "size_x" => size[0] = Some(number()?),
            "size_y" => size[1] = Some(number()?),
            "size_z" => size[2] = Some(number()?),
            _ => extra.push((key.to_string(), value.to_string())),
        }
    }

    let missing = |key: &str| PrepError::parse(0, format!("missing key '{key}'"));
    let [cx, cy, cz] = center;
    let [sx, sy, sz] = size;

    Ok(VinaConfig {
        receptor: receptor.ok_or_else(|| missing("receptor"))?,
        ligand: ligand.ok_or_else(|| missing("ligand"))?,
        center: Point3D::new(
            cx.ok_or_else(|| missing("center_x"))?,
            cy.ok_or_else(|| missing("center_y"))?,
            cz.ok_or_else(|| missing("center_z"))?,
        ),
        size: [
            sx.ok_or_else(|| missing("size_x"))?,
            sy.ok_or_else(|| missing("size_y"))?,
            sz.ok_or_else(|| missing("size_z"))?,
        ],
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn grid(x: f64, y: f64, z: f64, size: f64) -> GridBox {
        GridBox::new(Point3D::new(x, y, z), size).unwrap()
    }

    #[test]
    fn test_render_layout() {
        let text = render_config("6o0k", "ligand", &grid(10.25, -3.1, 22.00449, 24.0)).unwrap();
        assert_eq!(
            text,
            "receptor = 6o0k.pdbqt\n\
             ligand = ligand.pdbqt\n\
             center_x = 10.250\n\
             center_y = -3.100\n\
             center_z = 22.004\n\
             \n\
             size_x = 24.000\n\
             size_y = 24.000\n\
             size_z = 24.000\n"
        );
    }

    #[test]
    fn test_no_negative_zero() {
        let text = render_config("6o0k", "ligand", &grid(-0.0001, -0.0, -0.0006, 20.0)).unwrap();
        assert!(text.contains("center_x = 0.000\n"));
        assert!(text.contains("center_y = 0.000\n"));
        assert!(text.contains("center_z = -0.001\n"));
    }

    #[test]
    fn test_rejects_bad_ids() {
        let g = grid(0.0, 0.0, 0.0, 20.0);
        assert!(matches!(render_config("", "ligand", &g), Err(PrepError::InvalidInput(_))));
        assert!(matches!(render_config("6o0k\nsize_x = 1", "ligand", &g), Err(PrepError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_back() {
        let text = render_config("1sqt", "ligand", &grid(1.23456, 2.0, -3.5, 27.0)).unwrap();
        let parsed = parse_config(&text).unwrap();
        assert_eq!(parsed.receptor, "1sqt.pdbqt");
        assert_eq!(parsed.ligand, "ligand.pdbqt");
        assert_eq!(parsed.center, Point3D::new(1.235, 2.0, -3.5));
        assert!(parsed.is_cubic());
        assert_eq!(parsed.grid_box().unwrap().size(), 27.0);
    }

    #[test]
    fn test_parse_keeps_extra_keys() {
        let text = "receptor = r.pdbqt\nligand = l.pdbqt\ncenter_x = 0\ncenter_y = 0\ncenter_z = 0\n\
                    size_x = 20\nsize_y = 20\nsize_z = 20\nexhaustiveness = 8\n";
        let parsed = parse_config(text).unwrap();
        assert_eq!(parsed.extra, vec![("exhaustiveness".to_string(), "8".to_string())]);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_config("receptor = r.pdbqt\ncenter_x = abc\n").unwrap_err();
        assert!(matches!(err, PrepError::Parse { row: 2, .. }));

        let err = parse_config("receptor r.pdbqt\n").unwrap_err();
        assert!(matches!(err, PrepError::Parse { row: 1, .. }));

        let err = parse_config("receptor = r.pdbqt\n").unwrap_err();
        assert!(matches!(err, PrepError::Parse { row: 0, .. }));
    }

    #[test]
    fn test_non_cubic_box() {
        let text = "receptor = r.pdbqt\nligand = l.pdbqt\ncenter_x = 0\ncenter_y = 0\ncenter_z = 0\n\
                    size_x = 20\nsize_y = 22\nsize_z = 20\n";
        let parsed = parse_config(text).unwrap();
        assert!(!parsed.is_cubic());
        assert!(parsed.grid_box().is_err());
    }
}
