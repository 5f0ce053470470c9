//! Loading resource manifests from disk.
//!
//! A manifest source is a YAML file or a directory of `*.yaml` / `*.yml`
//! files, each holding one or more `---` separated documents. Documents of
//! kind `RabbitVhost`, `RabbitUser` and `RabbitQueue` become objects;
//! `Secret` documents supply the passwords connection blocks refer to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rabbit_converge::{Manifest, ObjectMeta};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{path}: unsupported kind {kind:?}")]
    UnknownKind { path: PathBuf, kind: String },
}

/// A secret given inline as plain strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretManifest {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestSet {
    pub objects: Vec<Manifest>,
    pub secrets: Vec<SecretManifest>,
}

impl ManifestSet {
    fn extend(&mut self, other: ManifestSet) {
        self.objects.extend(other.objects);
        self.secrets.extend(other.secrets);
    }
}

/// Load every manifest under `path`.
pub fn load_path(path: &Path) -> Result<ManifestSet, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_dir() {
        let text = std::fs::read_to_string(path).map_err(io_err)?;
        return parse_documents(&text, path);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();

    let mut set = ManifestSet::default();
    for file in files {
        let text = std::fs::read_to_string(&file).map_err(|source| ManifestError::Io {
            path: file.clone(),
            source,
        })?;
        set.extend(parse_documents(&text, &file)?);
    }
    debug!(
        path = %path.display(),
        objects = set.objects.len(),
        secrets = set.secrets.len(),
        "loaded manifests"
    );
    Ok(set)
}

/// Parse a multi-document YAML stream.
pub fn parse_documents(text: &str, source: &Path) -> Result<ManifestSet, ManifestError> {
    let parse_err = |source_err| ManifestError::Parse {
        path: source.to_path_buf(),
        source: source_err,
    };

    let mut set = ManifestSet::default();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_err)?;
        if value.is_null() {
            continue;
        }

        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or_default()
            .to_string();
        match kind.as_str() {
            "Secret" => {
                let mut secret: SecretManifest =
                    serde_yaml::from_value(value).map_err(parse_err)?;
                default_namespace(&mut secret.metadata);
                set.secrets.push(secret);
            }
            "RabbitVhost" | "RabbitUser" | "RabbitQueue" => {
                let mut manifest: Manifest = serde_yaml::from_value(value).map_err(parse_err)?;
                match &mut manifest {
                    Manifest::RabbitVhost(r) => default_namespace(&mut r.metadata),
                    Manifest::RabbitUser(r) => default_namespace(&mut r.metadata),
                    Manifest::RabbitQueue(r) => default_namespace(&mut r.metadata),
                }
                set.objects.push(manifest);
            }
            _ => {
                return Err(ManifestError::UnknownKind {
                    path: source.to_path_buf(),
                    kind,
                })
            }
        }
    }
    Ok(set)
}

fn default_namespace(meta: &mut ObjectMeta) {
    if meta.namespace.is_empty() {
        meta.namespace = DEFAULT_NAMESPACE.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rabbit_converge::ResourceKind;

    const BUNDLE: &str = r#"
kind: RabbitVhost
metadata:
  name: testing
spec:
  policies:
    ha:
      pattern: ".*"
      definition:
        ha-mode: all
---
kind: RabbitUser
metadata:
  name: app
  namespace: apps
spec:
  tags: management
  permissions:
    - vhost: testing
      configure: ".*"
      write: ".*"
      read: ".*"
  connection:
    passwordSecretRef:
      name: rabbit-admin
---
kind: Secret
metadata:
  name: rabbit-admin
  namespace: apps
stringData:
  password: hunter2
"#;

    #[test]
    fn test_parse_bundle() {
        let set = parse_documents(BUNDLE, Path::new("bundle.yaml")).unwrap();
        assert_eq!(set.objects.len(), 2);
        assert_eq!(set.secrets.len(), 1);

        assert_eq!(set.objects[0].kind(), ResourceKind::Vhost);
        assert_eq!(set.objects[0].metadata().namespace, "default");
        match &set.objects[1] {
            Manifest::RabbitUser(user) => {
                assert_eq!(user.metadata.namespace, "apps");
                assert_eq!(user.spec.permissions[0].vhost, "testing");
                let secret_ref = user.spec.connection.password_secret_ref.as_ref().unwrap();
                assert_eq!(secret_ref.name, "rabbit-admin");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(set.secrets[0].string_data["password"], "hunter2");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = parse_documents("kind: Deployment\nmetadata:\n  name: x\n", Path::new("x.yaml"))
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownKind { kind, .. } if kind == "Deployment"));
    }

    #[test]
    fn test_load_directory_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), BUNDLE).unwrap();
        std::fs::write(
            dir.path().join("b.yml"),
            "kind: RabbitQueue\nmetadata:\n  name: orders\nspec:\n  vhost: testing\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not yaml").unwrap();

        let set = load_path(dir.path()).unwrap();
        assert_eq!(set.objects.len(), 3);
        assert_eq!(set.objects[2].kind(), ResourceKind::Queue);
    }
}
