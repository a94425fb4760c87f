//! Manifests and state files
//!
//! A manifest is the YAML declaration a user edits:
//!
//! ```yaml
//! kind: autonomous-data-warehouse
//! attributes:
//!   compartment_id: ocid1.compartment.oc1..example
//!   db_name: adwdb1
//!   cpu_core_count: 1
//! ```
//!
//! After a successful create the tool records the remote identity and the
//! materialized attributes in `<manifest>.state.json`. No state file means
//! the resource has not been created.

use super::autonomous_dw::AdwDeclared;
use crate::engine::ResourceId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Declared resource, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "attributes", rename_all = "kebab-case")]
pub enum ResourceManifest {
    AutonomousDataWarehouse(AdwDeclared),
}

impl ResourceManifest {
    /// Registry key of the declared kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AutonomousDataWarehouse(_) => super::autonomous_dw::RESOURCE_KEY,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ManifestError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What the tool remembers about a created resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub id: ResourceId,
    pub resource: ResourceManifest,
}

impl StateFile {
    /// Load a state file; `Ok(None)` when it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, ManifestError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ManifestError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let content = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Delete a state file; a missing file is fine
    pub fn remove(path: &Path) -> Result<(), ManifestError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ManifestError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// `adw.yaml` -> `adw.yaml.state.json`
pub fn state_path_for(manifest: &Path) -> PathBuf {
    let mut name = manifest.as_os_str().to_os_string();
    name.push(".state.json");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::autonomous_dw::LicenseModel;

    const MANIFEST: &str = r#"
kind: autonomous-data-warehouse
attributes:
  admin_password: "Welcome1#Welcome1"
  compartment_id: ocid1.compartment.1
  cpu_core_count: 1
  data_storage_size_in_tbs: 1
  db_name: adwdb1
  license_model: BRING_YOUR_OWN_LICENSE
  freeform_tags:
    team: data
"#;

    #[test]
    fn test_manifest_parses_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adw.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let manifest = ResourceManifest::load(&path).unwrap();
        assert_eq!(manifest.kind(), "autonomous-data-warehouse");

        let ResourceManifest::AutonomousDataWarehouse(declared) = manifest;
        assert_eq!(declared.db_name.as_deref(), Some("adwdb1"));
        assert_eq!(declared.license_model, Some(LicenseModel::BringYourOwnLicense));
        assert_eq!(declared.display_name, None);
        assert!(declared.id.is_none());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.yaml");
        std::fs::write(&path, "kind: bucket\nattributes: {}\n").unwrap();

        assert!(matches!(ResourceManifest::load(&path), Err(ManifestError::Yaml { .. })));
    }

    #[test]
    fn test_state_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path_for(&dir.path().join("adw.yaml"));
        assert!(path.to_string_lossy().ends_with("adw.yaml.state.json"));

        assert!(StateFile::load(&path).unwrap().is_none());

        let state = StateFile {
            id: ResourceId::new("ocid1.adw.1").unwrap(),
            resource: ResourceManifest::AutonomousDataWarehouse(AdwDeclared {
                db_name: Some("adwdb1".to_string()),
                ..AdwDeclared::default()
            }),
        };
        state.save(&path).unwrap();
        assert_eq!(StateFile::load(&path).unwrap(), Some(state));

        StateFile::remove(&path).unwrap();
        StateFile::remove(&path).unwrap();
        assert!(StateFile::load(&path).unwrap().is_none());
    }
}
