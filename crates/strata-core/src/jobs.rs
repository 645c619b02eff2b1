//! Job payloads
//!
//! Every unit of background work is one variant of [`Job`]. Payloads are
//! plain JSON so any transport can carry them; the `job` tag selects the
//! variant.

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_composite::ImpactedSubject;
use strata_graph::ChangedPredicates;
use strata_spec::CompositeKind;

/// A unit of background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Resolve the subjects impacted by a committed change and enqueue
    /// apply jobs for them
    DiscoverImpactedSubjects {
        /// Store name
        store: String,
        /// Pod the change was written to
        pod: String,
        /// Context of the change
        context: String,
        /// Subject to changed predicates
        changes: ChangedPredicates,
        /// Composite kinds to resolve for
        operations: Vec<CompositeKind>,
        /// Queue override for the resulting apply jobs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },

    /// Regenerate the documents named by `subjects`
    ApplyOperation {
        /// Store name
        store: String,
        /// Work items
        subjects: Vec<ImpactedSubject>,
        /// Job group to decrement on completion
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },

    /// Backfill every document of a spec
    GenerateForSpec {
        /// Store name
        store: String,
        /// Spec id
        spec: String,
        /// Context to backfill; the configured default when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        /// Queue override for the apply jobs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },

    /// Regenerate documents built against an older spec revision
    RefreshStale {
        /// Store name
        store: String,
        /// Spec id
        spec: String,
        /// Queue override for the apply jobs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue: Option<String>,
    },
}

impl Job {
    /// Decode a transport payload
    ///
    /// # Errors
    /// [`StrataError::JobArgument`] for unknown job kinds, missing
    /// arguments or an empty store name
    pub fn from_payload(payload: Value) -> StrataResult<Self> {
        let job: Self = serde_json::from_value(payload).map_err(|e| StrataError::JobArgument(e.to_string()))?;
        job.validate()?;
        Ok(job)
    }

    /// Encode for a transport
    ///
    /// # Errors
    /// [`StrataError::JobArgument`] if the job cannot be represented as JSON
    pub fn to_payload(&self) -> StrataResult<Value> {
        serde_json::to_value(self).map_err(|e| StrataError::JobArgument(e.to_string()))
    }

    /// Check required arguments
    ///
    /// # Errors
    /// [`StrataError::JobArgument`] naming the missing argument
    pub fn validate(&self) -> StrataResult<()> {
        if self.store().is_empty() {
            return Err(StrataError::JobArgument(format!("{} requires a store", self.name())));
        }
        match self {
            Self::DiscoverImpactedSubjects { pod, context, .. } => {
                if pod.is_empty() {
                    return Err(StrataError::JobArgument(format!("{} requires a pod", self.name())));
                }
                if context.is_empty() {
                    return Err(StrataError::JobArgument(format!("{} requires a context", self.name())));
                }
            }
            Self::GenerateForSpec { spec, .. } | Self::RefreshStale { spec, .. } if spec.is_empty() => {
                return Err(StrataError::JobArgument(format!("{} requires a spec", self.name())));
            }
            _ => {}
        }
        Ok(())
    }

    /// Store the job runs against
    #[must_use]
    pub fn store(&self) -> &str {
        match self {
            Self::DiscoverImpactedSubjects { store, .. }
            | Self::ApplyOperation { store, .. }
            | Self::GenerateForSpec { store, .. }
            | Self::RefreshStale { store, .. } => store,
        }
    }

    /// Job kind, as used in payloads and logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DiscoverImpactedSubjects { .. } => "discover_impacted_subjects",
            Self::ApplyOperation { .. } => "apply_operation",
            Self::GenerateForSpec { .. } => "generate_for_spec",
            Self::RefreshStale { .. } => "refresh_stale",
        }
    }
}
