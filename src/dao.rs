use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::{NameId, normalize_url};
use crate::error::EcosystemError;
use crate::fs_util::write_bytes_atomic;
use crate::labels::{Label, LabelRegistry};
use crate::member::{Member, MemberRecord};
use crate::store::TomlStore;

/// Reconciliation layer over the member files and the label registry.
///
/// Lookups return `None` for unknown members; mutations return
/// [`EcosystemError::MemberNotFound`].
#[derive(Debug, Clone)]
pub struct Dao {
    root: Utf8PathBuf,
    store: TomlStore,
    labels: LabelRegistry,
}

#[derive(Debug, Serialize)]
struct CompiledFeed {
    members: Vec<MemberRecord>,
    labels: Vec<Label>,
}

impl Dao {
    pub fn new(root: impl AsRef<Utf8Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            store: TomlStore::new(&root),
            labels: LabelRegistry::new(&root),
            root,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn store(&self) -> &TomlStore {
        &self.store
    }

    /// Inserts or replaces the member stored under its `name_id`.
    ///
    /// Labels reach the registry only once the member is saved.
    pub fn write(&self, member: Member) -> Result<NameId, EcosystemError> {
        let name_id = member.name_id();
        let labels = member.labels.clone();
        self.store.transaction(|members| {
            if members.insert(name_id.clone(), member).is_some() {
                debug!(%name_id, "replacing member");
            } else {
                info!(%name_id, "adding member");
            }
            Ok(())
        })?;
        self.labels.merge(labels.iter().map(String::as_str))?;
        Ok(name_id)
    }

    /// Stores `member` in place of the one under `previous`, in one transaction.
    ///
    /// The new `name_id` may differ from `previous` when the name changed; the
    /// old file does not survive the save.
    pub fn replace(&self, previous: &NameId, member: Member) -> Result<NameId, EcosystemError> {
        let name_id = member.name_id();
        let labels = member.labels.clone();
        self.store.transaction(|members| {
            members
                .remove(previous)
                .ok_or_else(|| EcosystemError::MemberNotFound(previous.to_string()))?;
            if *previous != name_id {
                info!(from = %previous, to = %name_id, "renaming member");
            }
            members.insert(name_id.clone(), member);
            Ok(())
        })?;
        self.labels.merge(labels.iter().map(String::as_str))?;
        Ok(name_id)
    }

    /// Applies `mutate` to a stored member and logs every field it changed.
    pub fn update<T>(
        &self,
        name_id: &NameId,
        mutate: impl FnOnce(&mut Member) -> Result<T, EcosystemError>,
    ) -> Result<T, EcosystemError> {
        let (result, labels) = self.store.transaction(|members| {
            let member = members
                .get_mut(name_id)
                .ok_or_else(|| EcosystemError::MemberNotFound(name_id.to_string()))?;
            let before = record_fields(member)?;
            let result = mutate(member)?;
            let after = record_fields(member)?;
            log_changes(name_id, &before, &after);
            Ok((result, member.labels.clone()))
        })?;
        self.labels.merge(labels.iter().map(String::as_str))?;
        Ok(result)
    }

    pub fn delete(&self, name_id: &NameId) -> Result<Member, EcosystemError> {
        self.store.transaction(|members| {
            let member = members
                .remove(name_id)
                .ok_or_else(|| EcosystemError::MemberNotFound(name_id.to_string()))?;
            info!(%name_id, "deleted member");
            Ok(member)
        })
    }

    /// First member whose url matches `url` after normalization.
    pub fn get_by_url(&self, url: &str) -> Result<Option<Member>, EcosystemError> {
        let wanted = normalize_url(url)?;
        Ok(self
            .store
            .read()?
            .into_values()
            .find(|member| member.url.as_deref() == Some(wanted.as_str())))
    }

    pub fn get_by_name_id(&self, name_id: &NameId) -> Result<Option<Member>, EcosystemError> {
        Ok(self.store.read()?.remove(name_id))
    }

    pub fn get_all(&self) -> Result<Vec<Member>, EcosystemError> {
        Ok(self.store.read()?.into_values().collect())
    }

    pub fn labels(&self) -> Result<Vec<Label>, EcosystemError> {
        self.labels.read()
    }

    /// Writes the aggregate feed `{ "members": [...], "labels": [...] }` to `path`.
    pub fn compile_json(&self, path: &Utf8Path) -> Result<usize, EcosystemError> {
        let members = self
            .get_all()?
            .iter()
            .map(Member::to_record)
            .collect::<Result<Vec<_>, _>>()?;
        let count = members.len();
        let feed = CompiledFeed {
            members,
            labels: self.labels()?,
        };
        let mut content = serde_json::to_vec_pretty(&feed).map_err(EcosystemError::serde)?;
        content.push(b'\n');
        write_bytes_atomic(path, &content)?;
        info!(%path, members = count, "compiled feed");
        Ok(count)
    }

    /// Every label in use by some member.
    pub fn used_labels(&self) -> Result<BTreeSet<String>, EcosystemError> {
        Ok(self
            .get_all()?
            .into_iter()
            .flat_map(|member| member.labels)
            .collect())
    }
}

fn record_fields(member: &Member) -> Result<Map<String, Value>, EcosystemError> {
    match serde_json::to_value(member.to_record()?).map_err(EcosystemError::serde)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn log_changes(name_id: &NameId, before: &Map<String, Value>, after: &Map<String, Value>) {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for key in keys {
        let old = before.get(key).unwrap_or(&Value::Null);
        let new = after.get(key).unwrap_or(&Value::Null);
        if old != new {
            info!(%name_id, field = %key, "updating {key}: {old} -> {new}");
        }
    }
}
