//! Source adapters and the registry that selects them.
//!
//! Every system of record implements [`SourceAdapter`]. The
//! [`AdapterRegistry`] keeps adapters in registration order; that order is the
//! invocation order, and therefore the merge order, when several adapters feed
//! the same property. Later adapters win.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use propsync_core::{
    ConfigError, ConfigFile, DesiredState, FeedSpec, PropertyName, PropertySpec, Selector,
    SourceKind,
};

use crate::error::AdapterError;
use crate::remote::TeamDirectory;
use crate::teams::PlatformTeamsAdapter;

/// One external system of record.
///
/// Adapters know nothing about current remote state.
pub trait SourceAdapter: Send + Sync {
    /// Identifier matched by `--source`.
    fn id(&self) -> &str;

    /// Properties this adapter has an opinion about.
    fn properties(&self) -> Vec<PropertyName>;

    /// Desired state for `property`. Entities missing from the result are
    /// left untouched; `None` values clear the property.
    fn fetch(&self, property: &PropertyName) -> Result<DesiredState, AdapterError>;
}

// ---------------------------------------------------------------------------
// Feed-backed adapters (billing, ldap, cmdb)
// ---------------------------------------------------------------------------

/// Adapter that reads `{entity: value}` documents from configured feeds.
pub struct FeedAdapter {
    kind: SourceKind,
    feeds: Vec<(PropertySpec, FeedSpec)>,
    agent: ureq::Agent,
}

impl FeedAdapter {
    pub fn new(kind: SourceKind, feeds: Vec<(PropertyName, FeedSpec)>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let feeds = feeds
            .into_iter()
            .map(|(name, feed)| (PropertySpec { name, source: kind }, feed))
            .collect();
        Self { kind, feeds, agent }
    }

    /// The reconciliation units this adapter feeds.
    pub fn specs(&self) -> impl Iterator<Item = &PropertySpec> {
        self.feeds.iter().map(|(spec, _)| spec)
    }

    fn unavailable(&self, reason: impl Into<String>) -> AdapterError {
        AdapterError::Unavailable {
            source_id: self.id().to_string(),
            reason: reason.into(),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> AdapterError {
        AdapterError::Malformed {
            source_id: self.id().to_string(),
            reason: reason.into(),
        }
    }

    fn load_document(&self, url_or_file: DocumentRef<'_>) -> Result<Value, AdapterError> {
        match url_or_file {
            DocumentRef::Url(url) => self
                .agent
                .get(url)
                .set("Accept", "application/json")
                .call()
                .map_err(|e| self.unavailable(format!("GET {url}: {e}")))?
                .into_json::<Value>()
                .map_err(|e| self.malformed(format!("GET {url}: {e}"))),
            DocumentRef::File(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| self.unavailable(format!("{}: {e}", path.display())))?;
                serde_json::from_str(&contents)
                    .map_err(|e| self.malformed(format!("{}: {e}", path.display())))
            }
        }
    }

    fn select(&self, document: Value, pointer: Option<&str>) -> Result<DesiredState, AdapterError> {
        let section = match pointer {
            Some(pointer) => document
                .pointer(pointer)
                .cloned()
                .ok_or_else(|| self.malformed(format!("pointer '{pointer}' not found")))?,
            None => document,
        };
        serde_json::from_value(section).map_err(|e| self.malformed(e.to_string()))
    }
}

enum DocumentRef<'a> {
    Url(&'a str),
    File(&'a Path),
}

impl SourceAdapter for FeedAdapter {
    fn id(&self) -> &str {
        self.kind.adapter_id()
    }

    fn properties(&self) -> Vec<PropertyName> {
        self.specs().map(|spec| spec.name.clone()).collect()
    }

    fn fetch(&self, property: &PropertyName) -> Result<DesiredState, AdapterError> {
        let Some((spec, feed)) = self.feeds.iter().find(|(spec, _)| &spec.name == property) else {
            return Err(self.unavailable(format!("no feed configured for {property}")));
        };
        let state = match feed {
            FeedSpec::Inline { values } => values.clone(),
            FeedSpec::Url { url, pointer } => {
                let doc = self.load_document(DocumentRef::Url(url))?;
                self.select(doc, pointer.as_deref())?
            }
            FeedSpec::File { file, pointer } => {
                let doc = self.load_document(DocumentRef::File(file))?;
                self.select(doc, pointer.as_deref())?
            }
        };
        tracing::info!(
            source = self.id(),
            kind = %spec.source,
            %property,
            records = state.len(),
            "fetched desired state"
        );
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The adapters feeding one property, in invocation order.
#[derive(Clone)]
pub struct PropertyPlan {
    pub property: PropertyName,
    pub adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl PropertyPlan {
    pub fn source_ids(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.id().to_string()).collect()
    }
}

impl std::fmt::Debug for PropertyPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyPlan")
            .field("property", &self.property)
            .field("adapters", &self.source_ids())
            .finish()
    }
}

/// Adapters keyed by id, kept in registration order.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard registry: configured feed adapters plus the
    /// `github-teams` adapter backed by `directory`, in [`SourceKind::all`]
    /// order.
    pub fn from_config(
        file: &ConfigFile,
        directory: Arc<dyn TeamDirectory>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        file.validate()?;
        let mut registry = Self::new();
        for kind in SourceKind::all() {
            match kind {
                SourceKind::ManagedPlatformTeams => {
                    registry.register(Arc::new(PlatformTeamsAdapter::new(directory.clone())));
                }
                _ => {
                    let Some(feeds) = file.feeds_for(*kind) else {
                        continue;
                    };
                    let feeds = feeds
                        .iter()
                        .map(|(p, f)| (PropertyName::from(p.as_str()), f.clone()))
                        .collect::<Vec<_>>();
                    if !feeds.is_empty() {
                        registry.register(Arc::new(FeedAdapter::new(*kind, feeds, timeout)));
                    }
                }
            }
        }
        Ok(registry)
    }

    /// Add `adapter`. An adapter with the same id is replaced in place.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        match self.adapters.iter().position(|a| a.id() == adapter.id()) {
            Some(idx) => self.adapters[idx] = adapter,
            None => self.adapters.push(adapter),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    /// Group the selected adapters by property.
    ///
    /// Properties appear in order of first mention; adapters within a property
    /// keep registration order.
    pub fn plan(
        &self,
        source: &Selector,
        property: &Selector,
    ) -> Result<Vec<PropertyPlan>, ConfigError> {
        if let Selector::Named(name) = source {
            if self.get(name).is_none() {
                return Err(match name.parse::<SourceKind>() {
                    Ok(_) => ConfigError::SourceNotConfigured { name: name.clone() },
                    Err(_) => ConfigError::UnknownSource {
                        name: name.clone(),
                        expected: self.ids().join(", "),
                    },
                });
            }
        }

        let mut plans: Vec<PropertyPlan> = Vec::new();
        for adapter in self.adapters.iter().filter(|a| source.matches(a.id())) {
            for prop in adapter.properties() {
                if !property.matches(&prop.0) {
                    continue;
                }
                match plans.iter_mut().find(|p| p.property == prop) {
                    Some(plan) => plan.adapters.push(adapter.clone()),
                    None => plans.push(PropertyPlan {
                        property: prop,
                        adapters: vec![adapter.clone()],
                    }),
                }
            }
        }

        if plans.is_empty() {
            return Err(ConfigError::NothingToSync {
                source_filter: source.to_string(),
                property_filter: property.to_string(),
            });
        }
        Ok(plans)
    }
}

/// Fetch every adapter of `plan` in order and merge the results, last wins.
pub fn fetch_merged(plan: &PropertyPlan) -> Result<DesiredState, AdapterError> {
    let mut merged = DesiredState::new();
    for adapter in &plan.adapters {
        let state = adapter.fetch(&plan.property)?;
        merged.merge(state);
    }
    Ok(merged)
}
