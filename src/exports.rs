//! NFS export table regeneration.
//!
//! The export table lists one line per boot client, pointing at the client's
//! root location. It is rewritten wholesale from the current client list; only
//! one regeneration runs at a time.
//!
//! Regeneration does not reload the NFS server. Callers that want the new
//! table live run [`reload_exports`] afterwards.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process;

/// Access options applied to every exported root.
pub const EXPORT_OPTIONS: &str = "*(rw,sync,no_subtree_check,no_root_squash)";

/// A network-booted machine.
pub trait BootClient {
    /// Directory exported as this client's root filesystem.
    fn root_location(&self) -> String;
}

/// Registry of boot clients.
pub trait BootClientSource {
    type Client: BootClient;

    /// All clients currently in the oven.
    fn list_oven(&self) -> Result<Vec<Self::Client>>;
}

/// A boot client record as stored by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PiRecord {
    /// Client identifier (usually its serial or MAC).
    #[serde(default)]
    pub name: String,
    /// Exported root directory.
    pub root_location: String,
}

impl BootClient for PiRecord {
    fn root_location(&self) -> String {
        self.root_location.clone()
    }
}

/// Client registry read from a JSON array of [`PiRecord`]s.
#[derive(Debug, Clone)]
pub struct JsonClientFile {
    path: PathBuf,
}

impl JsonClientFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BootClientSource for JsonClientFile {
    type Client = PiRecord;

    fn list_oven(&self) -> Result<Vec<PiRecord>> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::storage(format!("read {}", self.path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::storage(format!("parse {}", self.path.display()), e))
    }
}

/// Render the export table for a set of clients.
pub fn render<C: BootClient>(clients: &[C]) -> String {
    clients
        .iter()
        .map(|c| format!("{} {}\n", c.root_location(), EXPORT_OPTIONS))
        .collect()
}

/// Rewrites the export table; one writer at a time.
#[derive(Debug)]
pub struct ExportRegenerator {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ExportRegenerator {
    /// Regenerator for the export table at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List the clients and overwrite the export table.
    ///
    /// Concurrent callers queue on an internal lock; the list and the write
    /// happen inside it so tables never interleave.
    pub fn regenerate<S: BootClientSource + ?Sized>(&self, source: &S) -> Result<()> {
        let _guard = self.lock.lock();

        let clients = source.list_oven()?;
        let content = render(&clients);
        tracing::info!(path = %self.path.display(), clients = clients.len(), "regenerating exports");
        tracing::debug!(content = %content, "generated exports table");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&self.path)
            .map_err(|e| Error::storage(format!("open {}", self.path.display()), e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| Error::storage(format!("write {}", self.path.display()), e))?;

        Ok(())
    }
}

/// Ask the NFS server to re-read the export table (`exportfs -ra`).
pub fn reload_exports(timeout: Duration) -> Result<()> {
    let mut cmd = Command::new("exportfs");
    cmd.arg("-ra");
    let output = process::run(&mut cmd, timeout)?;

    if !output.status.success() {
        return Err(Error::storage("exportfs -ra", process::failure_message(&output)));
    }
    tracing::info!("nfs exports reloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Oven(Vec<&'static str>);

    impl BootClientSource for Oven {
        type Client = PiRecord;

        fn list_oven(&self) -> Result<Vec<PiRecord>> {
            Ok(self
                .0
                .iter()
                .map(|root| PiRecord {
                    name: String::new(),
                    root_location: root.to_string(),
                })
                .collect())
        }
    }

    struct BrokenOven;

    impl BootClientSource for BrokenOven {
        type Client = PiRecord;

        fn list_oven(&self) -> Result<Vec<PiRecord>> {
            Err(Error::storage("list oven", "registry offline"))
        }
    }

    #[test]
    fn test_regenerate_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let regen = ExportRegenerator::new(dir.path().join("exports"));

        regen.regenerate(&Oven(vec!["/srv/pi1", "/srv/pi2"])).unwrap();
        assert_eq!(
            std::fs::read_to_string(regen.path()).unwrap(),
            "/srv/pi1 *(rw,sync,no_subtree_check,no_root_squash)\n\
             /srv/pi2 *(rw,sync,no_subtree_check,no_root_squash)\n"
        );

        regen.regenerate(&Oven(vec!["/srv/pi1"])).unwrap();
        assert_eq!(
            std::fs::read_to_string(regen.path()).unwrap(),
            "/srv/pi1 *(rw,sync,no_subtree_check,no_root_squash)\n"
        );

        regen.regenerate(&Oven(vec![])).unwrap();
        assert_eq!(std::fs::read_to_string(regen.path()).unwrap(), "");
    }

    #[test]
    fn test_source_error_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let regen = ExportRegenerator::new(dir.path().join("exports"));
        regen.regenerate(&Oven(vec!["/srv/pi1"])).unwrap();

        assert!(regen.regenerate(&BrokenOven).is_err());
        assert_eq!(
            std::fs::read_to_string(regen.path()).unwrap(),
            "/srv/pi1 *(rw,sync,no_subtree_check,no_root_squash)\n"
        );
    }

    #[test]
    fn test_concurrent_regenerations_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let regen = Arc::new(ExportRegenerator::new(dir.path().join("exports")));
        let one = render(&Oven(vec!["/srv/a"; 200]).list_oven().unwrap());
        let two = render(&Oven(vec!["/srv/bb"; 150]).list_oven().unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let regen = regen.clone();
                std::thread::spawn(move || {
                    let oven = if i % 2 == 0 {
                        Oven(vec!["/srv/a"; 200])
                    } else {
                        Oven(vec!["/srv/bb"; 150])
                    };
                    regen.regenerate(&oven).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = std::fs::read_to_string(regen.path()).unwrap();
        assert!(content == one || content == two);
    }

    #[test]
    fn test_json_client_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.json");
        std::fs::write(
            &path,
            r#"[{"name": "pi1", "root_location": "/srv/pi1"}, {"root_location": "/srv/pi2"}]"#,
        )
        .unwrap();

        let clients = JsonClientFile::new(&path).list_oven().unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].name, "pi1");
        assert_eq!(clients[1].root_location(), "/srv/pi2");

        std::fs::write(&path, "not json").unwrap();
        assert!(JsonClientFile::new(&path).list_oven().is_err());
    }
}
