use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use derivative::Derivative;
use futures::future::join_all;
use log::warn;

use crate::device::Device;
use crate::protocol::color::Hsbk;
use crate::protocol::payload::StateGroup;

/// Devices sharing a protocol-level group UUID.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct DeviceGroup {
    id: String,
    details: Mutex<GroupDetails>,
    #[derivative(Debug = "ignore")]
    members: Mutex<Vec<Arc<Device>>>,
}

#[derive(Debug, Clone)]
struct GroupDetails {
    label: String,
    updated_at: DateTime<Utc>,
}

impl DeviceGroup {
    pub(crate) fn new(state: &StateGroup) -> Self {
        DeviceGroup {
            id: state.group_id(),
            details: Mutex::new(GroupDetails {
                label: state.label.clone(),
                updated_at: state.updated_at,
            }),
            members: Mutex::new(Vec::new()),
        }
    }

    fn details(&self) -> MutexGuard<'_, GroupDetails> {
        self.details.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn members_lock(&self) -> MutexGuard<'_, Vec<Arc<Device>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The group UUID, lower-case hyphenated.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> String {
        self.details().label.clone()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.details().updated_at
    }

    pub fn members(&self) -> Vec<Arc<Device>> {
        self.members_lock().clone()
    }

    /// Takes the label from `state` if it is newer than what we have.
    pub(crate) fn update(&self, state: &StateGroup) -> bool {
        let mut details = self.details();
        if state.updated_at > details.updated_at {
            details.label = state.label.clone();
            details.updated_at = state.updated_at;
            true
        } else {
            false
        }
    }

    pub(crate) fn add_member(&self, device: &Arc<Device>) -> bool {
        let mut members = self.members_lock();
        if members.iter().any(|member| Arc::ptr_eq(member, device)) {
            return false;
        }
        members.push(device.clone());
        true
    }

    pub(crate) fn remove_member(&self, device: &Arc<Device>) {
        self.members_lock()
            .retain(|member| !Arc::ptr_eq(member, device));
    }

    pub async fn set_power(&self, on: bool) -> anyhow::Result<()> {
        let members = self.members();
        let results = join_all(members.iter().map(|device| device.set_power(on))).await;
        self.collect_failures("set power", &members, results)
    }

    pub async fn set_color(&self, color: Hsbk, duration: Duration) -> anyhow::Result<()> {
        let members = self.members();
        let results =
            join_all(members.iter().map(|device| device.set_color(color, duration))).await;
        self.collect_failures("set color", &members, results)
    }

    fn collect_failures(
        &self,
        action: &str,
        members: &[Arc<Device>],
        results: Vec<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let mut failed = 0;
        for (device, result) in members.iter().zip(results) {
            if let Err(err) = result {
                warn!("Group {}: {} failed on {}: {:#}", self.id, action, device.address(), err);
                failed += 1;
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(anyhow!(
                "Group {}: {} failed on {} of {} devices",
                self.id,
                action,
                failed,
                members.len()
            ))
        }
    }
}
