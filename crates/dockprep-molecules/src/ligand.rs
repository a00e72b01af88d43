//! Ligand identification for holo structures.

use dockprep_common::sandbox::SandboxClient as Client;
use dockprep_common::{PrepError, Result};
use serde::Deserialize;
use tracing::{info, debug};

const RCSB_ENTRY_URL: &str = "https://data.rcsb.org/rest/v1/core/entry";

#[derive(Debug, Deserialize)]
struct RcsbEntryResponse {
    #[serde(default)]
    rcsb_binding_affinity: Vec<RcsbBindingAffinity>,
}

#[derive(Debug, Deserialize)]
struct RcsbBindingAffinity {
    comp_id: Option<String>,
}

/// Looks up the ligand a PDB entry's binding-affinity annotations refer to.
pub struct LigandLookup {
    client: Client,
}

impl LigandLookup {
    pub fn new() -> Result<Self> {
        Ok(Self { client: Client::new()? })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Chemical component id (residue name) of the first binding-affinity
    /// annotation, or `None` for entries without one (apo structures).
    pub async fn binding_ligand(&self, pdb_id: &str) -> Result<Option<String>> {
        if pdb_id.len() != 4 || !pdb_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PrepError::InvalidInput(format!("not a PDB id: '{pdb_id}'")));
        }
        let url = format!("{}/{}", RCSB_ENTRY_URL, pdb_id.to_uppercase());
        info!("Looking up binding ligand of {}", pdb_id);

        let response = self.client.get(&url)?.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PrepError::NotFound(format!("PDB entry {pdb_id}")));
        }
        let body = response.error_for_status()?.text().await?;
        let ligand = parse_binding_ligand(&body)?;
        debug!("Binding ligand of {}: {:?}", pdb_id, ligand);
        Ok(ligand)
    }
}

fn parse_binding_ligand(body: &str) -> Result<Option<String>> {
    let entry: RcsbEntryResponse = serde_json::from_str(body)
        .map_err(|e| PrepError::external("RCSB entry API", format!("unexpected response: {e}")))?;
    Ok(entry
        .rcsb_binding_affinity
        .into_iter()
        .find_map(|a| a.comp_id)
        .map(|id| id.trim().to_uppercase())
        .filter(|id| !id.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_annotation_wins() {
        let body = r#"{
            "rcsb_id": "6O0K",
            "rcsb_binding_affinity": [
                {"comp_id": "LBM", "type": "IC50", "value": 4.0},
                {"comp_id": "XYZ", "type": "Kd", "value": 9.0}
            ]
        }"#;
        assert_eq!(parse_binding_ligand(body).unwrap(), Some("LBM".to_string()));
    }

    #[test]
    fn test_apo_entry() {
        assert_eq!(parse_binding_ligand(r#"{"rcsb_id": "1CRN"}"#).unwrap(), None);
        assert_eq!(parse_binding_ligand(r#"{"rcsb_binding_affinity": []}"#).unwrap(), None);
    }

    #[test]
    fn test_garbage_response() {
        assert!(matches!(parse_binding_ligand("<html>"), Err(PrepError::ExternalTool { .. })));
    }

    #[tokio::test]
    async fn test_rejects_non_pdb_id() {
        let lookup = LigandLookup::new().unwrap();
        assert!(matches!(lookup.binding_ligand("Q16611").await, Err(PrepError::InvalidInput(_))));
    }
}
