// Arnold path-mapping side channel
//
// Arnold resolves cross-host paths through a JSON file of its own, located
// via the ARNOLD_PATHMAP environment variable, keyed by the running OS name
// and with backslashes normalized to forward slashes. The file must exist
// before the worker spawns.

use std::fs::OpenOptions;
use std::io;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use tempfile::TempDir;

use crate::models::PathMappingRule;

/// Environment variable arnold reads the mapping file location from.
pub const ARNOLD_PATHMAP_ENV: &str = "ARNOLD_PATHMAP";

/// The arnold mapping file and the owner-only directory holding it.
#[derive(Debug)]
pub struct ArnoldPathmap {
    dir: TempDir,
    file: Utf8PathBuf,
}

impl ArnoldPathmap {
    /// Write the mapping file for the currently running OS.
    pub fn write(rules: &[PathMappingRule]) -> io::Result<Self> {
        Self::write_for_os(rules, running_os_name())
    }

    fn write_for_os(rules: &[PathMappingRule], os_name: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("arnold").tempdir()?;
        let path = dir.path().join("arnold_pathmapping.json");

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path)?;
        serde_json::to_writer(file, &pathmap_document(rules, os_name))?;

        let file = Utf8PathBuf::try_from(path)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        tracing::debug!("wrote arnold path-mapping file at {}", file);
        Ok(Self { dir, file })
    }

    /// The environment entry pointing the worker at the mapping file.
    pub fn env_entry(&self) -> (String, String) {
        (ARNOLD_PATHMAP_ENV.to_string(), self.file.to_string())
    }

    pub fn file(&self) -> &Utf8PathBuf {
        &self.file
    }

    /// Remove the mapping file and its directory. Failure is logged, never
    /// fatal: cleanup must always make progress.
    pub fn remove(self) {
        if let Err(err) = self.dir.close() {
            tracing::warn!("could not remove arnold path-mapping directory: {}", err);
        }
    }
}

/// Build the OS-keyed mapping document arnold expects, with backslashes
/// normalized to forward slashes the way arnold itself does.
fn pathmap_document(
    rules: &[PathMappingRule],
    os_name: &str,
) -> IndexMap<String, IndexMap<String, String>> {
    let mappings = rules
        .iter()
        .map(|rule| {
            (
                rule.source_path.replace('\\', "/"),
                rule.destination_path.replace('\\', "/"),
            )
        })
        .collect();

    let mut document = IndexMap::new();
    document.insert(os_name.to_string(), mappings);
    document
}

fn running_os_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "mac"
    } else {
        "linux"
    }
}
