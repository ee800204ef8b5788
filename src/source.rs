//! Attribute resolution shared by the external metadata sources.
//!
//! Every source declares its attributes as a field enum. A field names a
//! dotted path into the cached upstream JSON, an optional transform applied to
//! each match, and an optional reducer for paths that can match more than once.
//! Without a reducer several matches are an error, never a guess.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::EcosystemError;

pub type Reducer = fn(Value, Value) -> Value;

pub trait SourceField: Copy + fmt::Debug + 'static {
    /// Every declared field, in serialization order.
    const ALL: &'static [Self];

    fn name(self) -> &'static str;

    fn path(self) -> &'static str;

    fn transform(self, value: Value) -> Value {
        value
    }

    fn reducer(self) -> Option<Reducer> {
        None
    }
}

/// A lazily fetched upstream resource.
///
/// Implementors never fetch on their own: the cache is filled only by an
/// explicit `update_json` taking a client.
pub trait MetadataSource {
    type Field: SourceField;

    const KIND: &'static str;

    fn cached_json(&self) -> Option<&Value>;

    fn fallbacks(&self) -> &Map<String, Value>;

    fn field_by_name(name: &str) -> Result<Self::Field, EcosystemError> {
        Self::Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == name)
            .ok_or_else(|| EcosystemError::UnknownAttribute {
                source_kind: Self::KIND,
                attribute: name.to_string(),
            })
    }

    fn fallback(&self, key: &str) -> Option<&Value> {
        self.fallbacks().get(key).filter(|value| !value.is_null())
    }
}

pub fn resolve<S: MetadataSource>(source: &S, field: S::Field) -> Result<Value, EcosystemError> {
    let missing = || EcosystemError::AttributeMissing {
        source_kind: S::KIND,
        attribute: field.name().to_string(),
    };

    let Some(json) = source.cached_json() else {
        return source.fallback(field.name()).cloned().ok_or_else(missing);
    };

    let mut matches = find_all(json, field.path())
        .into_iter()
        .map(|value| field.transform(value.clone()));
    let Some(first) = matches.next() else {
        return Err(missing());
    };
    let rest: Vec<Value> = matches.collect();
    if rest.is_empty() {
        return Ok(first);
    }
    match field.reducer() {
        Some(reduce) => Ok(rest.into_iter().fold(first, reduce)),
        None => Err(EcosystemError::AmbiguousAttribute {
            source_kind: S::KIND,
            attribute: field.name().to_string(),
            matches: rest.len() + 1,
        }),
    }
}

/// Like [`resolve`], but an unavailable or null attribute is `None`.
pub fn resolve_opt<S: MetadataSource>(
    source: &S,
    field: S::Field,
) -> Result<Option<Value>, EcosystemError> {
    match resolve(source, field) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(EcosystemError::AttributeMissing { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn resolve_as<S: MetadataSource, T: DeserializeOwned>(
    source: &S,
    field: S::Field,
) -> Result<Option<T>, EcosystemError> {
    resolve_opt(source, field)?
        .map(|value| serde_json::from_value(value).map_err(EcosystemError::serde))
        .transpose()
}

/// Resolves an attribute by its public name.
pub fn attribute<S: MetadataSource>(source: &S, name: &str) -> Result<Value, EcosystemError> {
    let field = S::field_by_name(name)?;
    resolve(source, field)
}

/// Inserts every resolvable field of `source` into `out`, skipping absent ones.
pub fn collect_fields<S: MetadataSource>(
    source: &S,
    out: &mut Map<String, Value>,
) -> Result<(), EcosystemError> {
    for field in S::Field::ALL {
        if let Some(value) = resolve_opt(source, *field)? {
            out.insert(field.name().to_string(), value);
        }
    }
    Ok(())
}

/// All values reachable through a dotted path.
///
/// `*` selects every child. A named segment applied to an array fans out over
/// its elements.
pub fn find_all<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![root];
    for segment in path.split('.').filter(|segment| !segment.is_empty()) {
        let mut next = Vec::new();
        for value in current {
            step(value, segment, &mut next);
        }
        current = next;
    }
    current
}

fn step<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) if segment == "*" => out.extend(map.values()),
        Value::Object(map) => out.extend(map.get(segment)),
        Value::Array(items) if segment == "*" => out.extend(items.iter()),
        Value::Array(items) => {
            if let Ok(index) = usize::from_str(segment) {
                out.extend(items.get(index));
            } else {
                for item in items {
                    step(item, segment, out);
                }
            }
        }
        _ => {}
    }
}

/// Falsy JSON values (empty string, `false`, zero, empty containers) become null.
pub fn null_if_falsy(value: Value) -> Value {
    let falsy = match &value {
        Value::Bool(flag) => !flag,
        Value::String(text) => text.is_empty(),
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
    };
    if falsy { Value::Null } else { value }
}

/// Keeps the greater of two values, comparing strings lexically and numbers numerically.
pub fn max_value(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => {
            if b.as_f64() > a.as_f64() {
                right
            } else {
                left
            }
        }
        (Value::String(a), Value::String(b)) => {
            if b > a {
                right
            } else {
                left
            }
        }
        (Value::Null, _) => right,
        _ => left,
    }
}

pub fn sum_values(left: Value, right: Value) -> Value {
    match (left.as_u64(), right.as_u64()) {
        (Some(a), Some(b)) => Value::from(a + b),
        _ => max_value(left, right),
    }
}

/// Converts a serializable record into fallback values, dropping nulls and identity keys.
pub fn fallbacks_from<T: serde::Serialize>(
    record: &T,
    identity: &[&str],
) -> Result<Map<String, Value>, EcosystemError> {
    let value = serde_json::to_value(record).map_err(EcosystemError::serde)?;
    let Value::Object(mut map) = value else {
        return Ok(Map::new());
    };
    map.retain(|key, value| !value.is_null() && !identity.contains(&key.as_str()));
    Ok(map)
}
