//! `github-teams` adapter: team ownership as observed on the managed system.

use std::sync::Arc;

use propsync_core::{DesiredState, PropertyName, PropertySpec, SourceKind};

use crate::adapter::SourceAdapter;
use crate::error::AdapterError;
use crate::remote::TeamDirectory;

/// Derives `team_owner` from the first team with access to each repository.
///
/// Repositories without teams are left out, so the adapter has no opinion on
/// them. A failed team lookup only drops that repository.
pub struct PlatformTeamsAdapter {
    directory: Arc<dyn TeamDirectory>,
}

impl PlatformTeamsAdapter {
    pub fn new(directory: Arc<dyn TeamDirectory>) -> Self {
        Self { directory }
    }
}

impl SourceAdapter for PlatformTeamsAdapter {
    fn id(&self) -> &str {
        SourceKind::ManagedPlatformTeams.adapter_id()
    }

    fn properties(&self) -> Vec<PropertyName> {
        PropertySpec::defaults_for(SourceKind::ManagedPlatformTeams)
            .into_iter()
            .map(|spec| spec.name)
            .collect()
    }

    fn fetch(&self, property: &PropertyName) -> Result<DesiredState, AdapterError> {
        if !self.properties().contains(property) {
            return Err(AdapterError::Unavailable {
                source_id: self.id().to_string(),
                reason: format!("{property} is not provided by this source"),
            });
        }

        let repos = self
            .directory
            .repositories()
            .map_err(|e| AdapterError::Unavailable {
                source_id: self.id().to_string(),
                reason: e.to_string(),
            })?;

        let mut state = DesiredState::new();
        for repo in repos {
            match self.directory.first_team(&repo) {
                Ok(Some(team)) => {
                    state.insert(repo, Some(team));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(entity = %repo, error = %err, "could not fetch teams");
                }
            }
        }
        tracing::info!(source = self.id(), records = state.len(), "fetched team assignments");
        Ok(state)
    }
}
