//! Domain types for property reconciliation.
//!
//! Entity and property identifiers are newtypes over `String`; property
//! values are plain `Option<String>` where `None` means "unset".

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identifier of a managed entity (a repository name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a reconciled metadata property, e.g. `customer_tier`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyName(pub String);

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PropertyName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PropertyName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The external system of record an adapter reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Billing,
    ManagedPlatformTeams,
    Ldap,
    Cmdb,
}

impl SourceKind {
    /// Every source kind in default invocation order.
    pub fn all() -> &'static [SourceKind] {
        &[
            SourceKind::Billing,
            SourceKind::ManagedPlatformTeams,
            SourceKind::Ldap,
            SourceKind::Cmdb,
        ]
    }

    /// Identifier accepted by `--source` and used as the `sources:` config key.
    pub fn adapter_id(self) -> &'static str {
        match self {
            SourceKind::Billing => "billing-api",
            SourceKind::ManagedPlatformTeams => "github-teams",
            SourceKind::Ldap => "ldap",
            SourceKind::Cmdb => "cmdb",
        }
    }

    /// Properties an adapter of this kind is known to provide. Feed-backed
    /// adapters reconcile exactly the properties configured for them; the
    /// `github-teams` adapter always provides these.
    pub fn default_properties(self) -> &'static [&'static str] {
        match self {
            SourceKind::Billing => &["customer_tier"],
            SourceKind::ManagedPlatformTeams | SourceKind::Ldap => &["team_owner"],
            SourceKind::Cmdb => &["security_contact", "billing_account"],
        }
    }

    /// Comma-separated list of every adapter id, for error messages.
    pub fn expected_ids() -> String {
        SourceKind::all()
            .iter()
            .map(|k| k.adapter_id())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Billing => write!(f, "billing"),
            SourceKind::ManagedPlatformTeams => write!(f, "managed-platform-teams"),
            SourceKind::Ldap => write!(f, "ldap"),
            SourceKind::Cmdb => write!(f, "cmdb"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = String;

    /// Accepts either the adapter id (`billing-api`) or the kind name (`billing`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "billing-api" | "billing" => Ok(SourceKind::Billing),
            "github-teams" | "managed-platform-teams" => Ok(SourceKind::ManagedPlatformTeams),
            "ldap" => Ok(SourceKind::Ldap),
            "cmdb" => Ok(SourceKind::Cmdb),
            other => Err(format!(
                "unknown source '{other}'; expected: {}",
                SourceKind::expected_ids()
            )),
        }
    }
}

/// Classification of a single (entity, property) comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Noop,
    Update,
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One reconciliation unit: a property fed by one kind of source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: PropertyName,
    pub source: SourceKind,
}

impl PropertySpec {
    /// The units a source of `kind` reconciles out of the box.
    pub fn defaults_for(kind: SourceKind) -> Vec<PropertySpec> {
        kind.default_properties()
            .iter()
            .map(|name| PropertySpec {
                name: PropertyName::from(*name),
                source: kind,
            })
            .collect()
    }
}

/// The outcome of comparing current and desired value for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub entity_id: EntityId,
    pub property: PropertyName,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub action: Action,
}

impl Diff {
    pub fn is_update(&self) -> bool {
        self.action == Action::Update
    }
}

/// A read or write failure isolated to one (entity, property) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    pub entity_id: EntityId,
    pub property: PropertyName,
    pub message: String,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.entity_id, self.property, self.message)
    }
}

// ---------------------------------------------------------------------------
// DesiredState
// ---------------------------------------------------------------------------

/// Insertion-ordered mapping `entity → desired value` for one property.
///
/// An entry with `None` means "clear the property"; an entity with no entry
/// means "no opinion" and is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    order: Vec<EntityId>,
    values: HashMap<EntityId, Option<String>>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the desired value for `entity`.
    ///
    /// Replacing keeps the entity's original position. Returns the previous
    /// desired value if the entity already had one.
    pub fn insert(&mut self, entity: EntityId, value: Option<String>) -> Option<Option<String>> {
        match self.values.insert(entity.clone(), value) {
            Some(previous) => Some(previous),
            None => {
                self.order.push(entity);
                None
            }
        }
    }

    /// Desired value for `entity`; the outer `None` means "no opinion".
    pub fn get(&self, entity: &EntityId) -> Option<Option<&str>> {
        self.values.get(entity).map(|v| v.as_deref())
    }

    pub fn contains(&self, entity: &EntityId) -> bool {
        self.values.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entity ids in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &EntityId> {
        self.order.iter()
    }

    /// `(entity, desired value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, Option<&str>)> {
        self.order
            .iter()
            .map(move |id| (id, self.values.get(id).and_then(|v| v.as_deref())))
    }

    /// Overlay `later` onto `self`: every entity `later` has an opinion about
    /// takes `later`'s value.
    pub fn merge(&mut self, later: DesiredState) {
        let DesiredState { order, mut values } = later;
        for id in order {
            if let Some(value) = values.remove(&id) {
                self.insert(id, value);
            }
        }
    }
}

impl FromIterator<(EntityId, Option<String>)> for DesiredState {
    fn from_iter<I: IntoIterator<Item = (EntityId, Option<String>)>>(iter: I) -> Self {
        let mut state = DesiredState::new();
        for (id, value) in iter {
            state.insert(id, value);
        }
        state
    }
}

impl Serialize for DesiredState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (id, value) in self.iter() {
            map.serialize_entry(id, &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DesiredState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DesiredStateVisitor;

        impl<'de> Visitor<'de> for DesiredStateVisitor {
            type Value = DesiredState;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of entity id to string or null")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut state = DesiredState::new();
                while let Some((id, value)) = access.next_entry::<EntityId, Option<String>>()? {
                    state.insert(id, value);
                }
                Ok(state)
            }
        }

        deserializer.deserialize_map(DesiredStateVisitor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
