//! The persisted settings of a database.

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{ConsistencyError, HashKind, Options, Result, Revisioning};

/// The on-disk format version written by this build.
pub const CURRENT_VERSION: Version = Version {
    major: 1,
    minor: 0,
    fix: 0,
};

/// The oldest on-disk format version this build can open.
pub const MIN_SUPPORTED_VERSION: Version = Version {
    major: 1,
    minor: 0,
    fix: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub fix: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.fix)
    }
}

/// Settings fixed when the database is created.
///
/// Stored as TOML. The `checksum` entry covers every other entry, so that a file edited by hand or
/// written by another version is detected on open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub revisioning: Revisioning,
    pub milestone: u32,
    pub hash_kind: HashKind,
    #[serde(default)]
    checksum: String,
    pub version: Version,
}

impl DatabaseSettings {
    pub(crate) fn from_options(o: &Options) -> Self {
        Self {
            revisioning: o.revisioning,
            milestone: o.milestone,
            hash_kind: o.hash_kind,
            checksum: String::new(),
            version: CURRENT_VERSION,
        }
    }

    fn compute_checksum(&self) -> Result<u64> {
        let mut unsealed = self.clone();
        unsealed.checksum = String::new();
        let rendered = toml::to_string(&unsealed)
            .map_err(|e| ConsistencyError::CorruptSettings(e.to_string()))?;
        Ok(twox_hash::XxHash64::oneshot(0, rendered.as_bytes()))
    }

    /// Seal the settings with their checksum and write them to `path`.
    pub(crate) fn store(&self, path: &Path) -> Result<()> {
        let mut sealed = self.clone();
        sealed.checksum = format!("{:016x}", self.compute_checksum()?);
        let rendered = toml::to_string(&sealed)
            .map_err(|e| ConsistencyError::CorruptSettings(e.to_string()))?;
        std::fs::write(path, rendered)?;
        std::fs::File::open(path)?.sync_all()?;
        Ok(())
    }

    /// Read the settings at `path` and check their checksum and version.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: DatabaseSettings =
            toml::from_str(&raw).map_err(|e| ConsistencyError::CorruptSettings(e.to_string()))?;

        let stored = u64::from_str_radix(&settings.checksum, 16).map_err(|_| {
            ConsistencyError::CorruptSettings(format!("malformed checksum {:?}", settings.checksum))
        })?;
        let computed = settings.compute_checksum()?;
        if stored != computed {
            tracing::error!(path = %path.display(), "settings checksum mismatch");
            return Err(ConsistencyError::SettingsChecksum { stored, computed }.into());
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.version < MIN_SUPPORTED_VERSION {
            return Err(ConsistencyError::VersionTooOld {
                stored: self.version.to_string(),
                required: MIN_SUPPORTED_VERSION.to_string(),
            }
            .into());
        }
        if self.milestone == 0 {
            return Err(ConsistencyError::CorruptSettings("milestone is zero".into()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn settings() -> DatabaseSettings {
        let mut o = Options::new();
        o.revisioning(Revisioning::SlidingSnapshot);
        o.milestone(3);
        DatabaseSettings::from_options(&o)
    }

    #[test]
    fn stored_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        settings().store(&path).unwrap();

        let loaded = DatabaseSettings::load(&path).unwrap();
        assert_eq!(loaded.revisioning, Revisioning::SlidingSnapshot);
        assert_eq!(loaded.milestone, 3);
        assert_eq!(loaded.version, CURRENT_VERSION);
    }

    #[test]
    fn edited_settings_fail_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        settings().store(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("milestone = 3", "milestone = 4")).unwrap();

        assert!(matches!(
            DatabaseSettings::load(&path),
            Err(Error::Consistency(ConsistencyError::SettingsChecksum { .. }))
        ));
    }

    #[test]
    fn old_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut old = settings();
        old.version = Version {
            major: 0,
            minor: 9,
            fix: 7,
        };
        old.store(&path).unwrap();

        assert!(matches!(
            DatabaseSettings::load(&path),
            Err(Error::Consistency(ConsistencyError::VersionTooOld { .. }))
        ));
    }
}
