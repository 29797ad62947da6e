//! Mount identity

use std::path::PathBuf;

use crate::manifest::MountDef;

/// A local mount point backed by a remote filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Unique name from the manifest
    pub name: String,
    /// Local directory the remote is mounted on
    pub local_path: PathBuf,
    /// Remote endpoint as `host:port`
    pub remote: String,
}

impl Mount {
    pub fn new(
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
            remote: remote.into(),
        }
    }
}

impl From<&MountDef> for Mount {
    fn from(def: &MountDef) -> Self {
        Self::new(&def.name, &def.local_path, &def.remote)
    }
}

impl std::fmt::Display for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} <- {})", self.name, self.local_path.display(), self.remote)
    }
}
