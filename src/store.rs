use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::NameId;
use crate::error::EcosystemError;
use crate::fs_util::{replace_dir_atomic, staging_dir};
use crate::member::{Member, MemberRecord};

pub const MEMBERS_DIR: &str = "members";

/// One TOML file per member under `<root>/members`.
#[derive(Debug, Clone)]
pub struct TomlStore {
    members_dir: Utf8PathBuf,
}

impl TomlStore {
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        Self {
            members_dir: root.as_ref().join(MEMBERS_DIR),
        }
    }

    pub fn members_dir(&self) -> &Utf8Path {
        &self.members_dir
    }

    pub fn member_path(&self, name_id: &NameId) -> Utf8PathBuf {
        self.members_dir.join(format!("{name_id}.toml"))
    }

    /// Loads every member keyed by its derived `name_id`.
    ///
    /// A missing directory is an empty store. Empty or malformed files, and
    /// two files holding the same member, are errors carrying the offending
    /// path. A file whose stem no longer matches its member is renamed on the
    /// next write.
    pub fn read(&self) -> Result<BTreeMap<NameId, Member>, EcosystemError> {
        let mut members = BTreeMap::new();
        if !self.members_dir.as_std_path().exists() {
            return Ok(members);
        }
        let entries = fs::read_dir(self.members_dir.as_std_path()).map_err(EcosystemError::fs)?;
        for entry in entries {
            let path = entry.map_err(EcosystemError::fs)?.path();
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            let corrupt = |message: String| EcosystemError::StoreCorrupt {
                path: path.clone(),
                message,
            };
            let content = fs::read_to_string(&path).map_err(|err| corrupt(err.to_string()))?;
            if content.trim().is_empty() {
                return Err(corrupt("file is empty".to_string()));
            }
            let record: MemberRecord =
                toml::from_str(&content).map_err(|err| corrupt(err.to_string()))?;
            let member = Member::from_record(record).map_err(|err| corrupt(err.to_string()))?;
            let name_id = member.name_id();
            if path.file_stem().and_then(|stem| stem.to_str()) != Some(name_id.as_str()) {
                debug!(path = %path.display(), %name_id, "member file name is stale");
            }
            if members.insert(name_id.clone(), member).is_some() {
                return Err(corrupt(format!("duplicate member {name_id}")));
            }
        }
        debug!(dir = %self.members_dir, count = members.len(), "read members");
        Ok(members)
    }

    /// Replaces the whole collection.
    ///
    /// Files are written to a staging directory that is then swapped in, so a
    /// failed write leaves the previous collection untouched. Each member is
    /// written under its own `name_id`, whatever key it was stored with.
    pub fn write(&self, members: &BTreeMap<NameId, Member>) -> Result<(), EcosystemError> {
        let (guard, staged) = staging_dir(&self.members_dir)?;
        for member in members.values() {
            let record = member.to_record()?;
            let content = toml::to_string(&record).map_err(EcosystemError::serde)?;
            let path = staged.join(format!("{}.toml", member.name_id()));
            fs::write(path.as_std_path(), content)
                .map_err(|err| EcosystemError::fs(format!("write {path}: {err}")))?;
        }
        replace_dir_atomic(&staged, &self.members_dir)?;
        drop(guard);
        debug!(dir = %self.members_dir, count = members.len(), "wrote members");
        Ok(())
    }

    /// Loads the collection, hands it to `mutate`, and saves it if `mutate` succeeds.
    pub fn transaction<T>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<NameId, Member>) -> Result<T, EcosystemError>,
    ) -> Result<T, EcosystemError> {
        let mut members = self.read()?;
        let result = mutate(&mut members)?;
        self.write(&members)?;
        Ok(result)
    }
}
