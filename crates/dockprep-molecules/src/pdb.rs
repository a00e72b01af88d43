//! PDB and AlphaFold structure fetching.

use dockprep_common::sandbox::SandboxClient as Client;
use dockprep_common::{PrepError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{info, debug};

/// What a user-supplied target string refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureTarget {
    /// An existing local structure file
    File(PathBuf),
    /// A 4-character RCSB PDB code
    Pdb(String),
    /// A UniProt accession served by AlphaFold DB
    AlphaFold(String),
}

impl StructureTarget {
    /// Classify a target: an existing path wins, then a 4-character code,
    /// anything else is taken as a UniProt accession.
    pub fn classify(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(PrepError::InvalidInput("empty structure target".to_string()));
        }
        let path = Path::new(target);
        if path.is_file() {
            return Ok(StructureTarget::File(path.to_path_buf()));
        }
        if !target.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(PrepError::InvalidInput(format!(
                "'{target}' is neither an existing file nor a structure identifier"
            )));
        }
        if target.len() == 4 {
            Ok(StructureTarget::Pdb(target.to_string()))
        } else {
            Ok(StructureTarget::AlphaFold(target.to_string()))
        }
    }
}

/// Client for fetching protein structures from PDB and AlphaFold.
pub struct StructureFetcher {
    client: Client,
    cache_dir: PathBuf,
}

impl StructureFetcher {
    /// Create a new StructureFetcher with the given cache directory.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        Ok(Self {
            client: Client::new()?,
            cache_dir: cache_dir.as_ref().to_path_buf(),
        })
    }

    /// Same as `new` with an explicit HTTP timeout.
    pub fn with_timeout<P: AsRef<Path>>(cache_dir: P, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::with_timeout(timeout)?,
            cache_dir: cache_dir.as_ref().to_path_buf(),
        })
    }

    /// Local path for any target, downloading when needed.
    pub async fn resolve(&self, target: &str) -> Result<PathBuf> {
        match StructureTarget::classify(target)? {
            StructureTarget::File(path) => Ok(path),
            StructureTarget::Pdb(id) => self.fetch_pdb(&id).await,
            StructureTarget::AlphaFold(id) => self.fetch_alphafold(&id).await,
        }
    }

    /// Fetch a PDB file by its ID.
    pub async fn fetch_pdb(&self, pdb_id: &str) -> Result<PathBuf> {
        let file_name = format!("{}.pdb", pdb_id.to_lowercase());
        let url = format!("https://files.rcsb.org/download/{}", file_name);
        self.download(&url, &file_name, &format!("PDB {}", pdb_id)).await
    }

    /// Fetch an AlphaFold structure by UniProt ID.
    pub async fn fetch_alphafold(&self, uniprot_id: &str) -> Result<PathBuf> {
        let file_name = format!("AF-{}-F1-model_v4.pdb", uniprot_id.to_uppercase());
        let url = format!("https://alphafold.ebi.ac.uk/files/{}", file_name);
        self.download(&url, &file_name, &format!("AlphaFold model of {}", uniprot_id)).await
    }

    async fn download(&self, url: &str, file_name: &str, label: &str) -> Result<PathBuf> {
        let file_path = self.cache_dir.join(file_name);

        if file_path.exists() {
            debug!("{} found in cache", label);
            return Ok(file_path);
        }

        info!("Fetching {} from {}", label, url);
        let response = self.client.get(url)?.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PrepError::NotFound(format!("{} ({})", label, url)));
        }
        let content = response.error_for_status()?.bytes().await?;
        if content.is_empty() {
            return Err(PrepError::NotFound(format!("{} ({}): empty response", label, url)));
        }

        fs::create_dir_all(&self.cache_dir).await?;
        store(&file_path, &content)?;

        Ok(file_path)
    }
}

/// Write `content` to `path` through a temporary file in the same directory,
/// so an interrupted write never leaves a partial file at `path`.
fn store(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PrepError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_classify_targets() {
        assert_eq!(StructureTarget::classify("6o0k").unwrap(), StructureTarget::Pdb("6o0k".to_string()));
        assert_eq!(
            StructureTarget::classify(" Q16611 ").unwrap(),
            StructureTarget::AlphaFold("Q16611".to_string())
        );
        assert!(StructureTarget::classify("").is_err());
        assert!(StructureTarget::classify("../../etc/passwd").is_err());
    }

    #[test]
    fn test_classify_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1abc.pdb");
        std::fs::write(&path, "END\n").unwrap();
        assert_eq!(
            StructureTarget::classify(path.to_str().unwrap()).unwrap(),
            StructureTarget::File(path)
        );
    }

    #[tokio::test]
    async fn test_cached_file_is_reused() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("1crn.pdb"), "END\n").unwrap();
        let fetcher = StructureFetcher::new(dir.path()).unwrap();

        let path = fetcher.fetch_pdb("1CRN").await.unwrap();
        assert_eq!(path, dir.path().join("1crn.pdb"));
    }

    #[test]
    fn test_store_leaves_only_the_final_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1crn.pdb");
        store(&path, b"ATOM\nEND\n").unwrap();
        store(&path, b"END\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "END\n");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_store_into_missing_dir_fails_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent").join("1crn.pdb");
        assert!(matches!(store(&path, b"END\n"), Err(PrepError::Io(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_pdb() {
        let dir = tempdir().unwrap();
        let fetcher = StructureFetcher::new(dir.path()).unwrap();

        // Fetch a small, known PDB (1CRN - Crambin)
        let path = fetcher.fetch_pdb("1CRN").await.unwrap();
        assert!(path.exists());
    }
}
