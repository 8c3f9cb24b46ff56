use kube::Resource;

use crate::pagerduty::{Service, ServiceSettings};
use crate::resources::pagerdutyintegrations::{
    PagerDutyIntegration, PAGERDUTY_INTEGRATION_FINALIZER,
};
use crate::utils::finalizers::has_finalizer;

/// Where an integration stands, derived afresh from observed facts on every reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// The resource no longer exists
    Absent,
    /// No PagerDuty service exists yet
    PendingCreate,
    /// The PagerDuty service exists and carries the desired settings
    Active,
    /// The PagerDuty service exists but its settings have drifted
    PendingUpdate,
    /// Deletion requested; the finalizer still guards the external resources
    PendingDelete,
    /// Deletion requested and nothing left to clean up
    Deleted,
}

impl Lifecycle {
    /// `record` is the PagerDuty service found for the integration, if it was looked up.
    /// `desired` is only needed to tell `Active` from `PendingUpdate`.
    pub fn observe(
        pdi: Option<&PagerDutyIntegration>,
        record: Option<&Service>,
        desired: Option<&ServiceSettings>,
    ) -> Self {
        let Some(pdi) = pdi else {
            return Lifecycle::Absent;
        };

        if pdi.meta().deletion_timestamp.is_some() {
            return if has_finalizer(pdi, PAGERDUTY_INTEGRATION_FINALIZER) {
                Lifecycle::PendingDelete
            } else {
                Lifecycle::Deleted
            };
        }

        // a record without our finalizer is one created by an attempt that failed before the
        // finalizer was persisted; it is adopted rather than created again
        match (record, desired) {
            (None, _) => Lifecycle::PendingCreate,
            (Some(record), Some(desired)) if !record.matches(desired) => Lifecycle::PendingUpdate,
            (Some(_), _) => Lifecycle::Active,
        }
    }
}
