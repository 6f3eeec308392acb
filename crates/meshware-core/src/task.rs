//! Task addressing and lifecycle enums shared by the task pipeline

use serde::{Deserialize, Serialize};

use crate::device::DhType;

/// Addressing tuple for any lifecycle action
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskParam {
    pub network_id: String,
    pub uuid: String,
    pub dh_id: String,
    pub dh_type: DhType,
}

impl TaskParam {
    /// Parameters addressing a whole device rather than one capability
    pub fn for_device(network_id: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            uuid: uuid.into(),
            dh_id: String::new(),
            dh_type: DhType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Unknown,
    Enable,
    Disable,
    OnLine,
    OffLine,
}

impl TaskType {
    pub fn label(self) -> &'static str {
        match self {
            TaskType::Unknown => "UNKNOWN",
            TaskType::Enable => "ENABLE",
            TaskType::Disable => "DISABLE",
            TaskType::OnLine => "ON_LINE",
            TaskType::OffLine => "OFF_LINE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStep {
    DoEnable,
    DoDisable,
    SyncOnlineInfo,
    RegisterOnlineDistributedHardware,
    UnregisterOfflineDistributedHardware,
    ClearOfflineInfo,
    WaitUnregistgerComplete,
}

impl TaskStep {
    /// Label used by the dump surface; spellings are scraped by tooling
    pub fn label(self) -> &'static str {
        match self {
            TaskStep::DoEnable => "DO_ENABLE",
            TaskStep::DoDisable => "DO_DISABLE",
            TaskStep::SyncOnlineInfo => "SYNC_ONLINE_INFO",
            TaskStep::RegisterOnlineDistributedHardware => "REGISTER_ONLINE_DISTRIBUTED_HARDWARE",
            TaskStep::UnregisterOfflineDistributedHardware => "UNREGISTER_OFFLINE_DISTRIBUTED_HARDWARE",
            TaskStep::ClearOfflineInfo => "CLEAR_OFFLINE_INFO",
            TaskStep::WaitUnregistgerComplete => "WAIT_UNREGISTGER_COMPLETE",
        }
    }
}

/// Task lifecycle; only moves forward Init -> Running -> Success | Fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Init,
    Running,
    Success,
    Fail,
}

impl TaskState {
    pub fn label(self) -> &'static str {
        match self {
            TaskState::Init => "INIT",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Fail => "FAIL",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Fail)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic
    pub fn can_transition_to(self, next: TaskState) -> bool {
        match self {
            TaskState::Init => next != TaskState::Init,
            TaskState::Running => next.is_terminal(),
            TaskState::Success | TaskState::Fail => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_forward_only() {
        assert!(TaskState::Init.can_transition_to(TaskState::Running));
        assert!(TaskState::Init.can_transition_to(TaskState::Fail));
        assert!(TaskState::Running.can_transition_to(TaskState::Success));
        assert!(!TaskState::Running.can_transition_to(TaskState::Init));
        assert!(!TaskState::Success.can_transition_to(TaskState::Fail));
        assert!(!TaskState::Fail.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_labels() {
        assert_eq!(TaskType::OffLine.label(), "OFF_LINE");
        assert_eq!(TaskStep::WaitUnregistgerComplete.label(), "WAIT_UNREGISTGER_COMPLETE");
        assert_eq!(TaskState::Running.label(), "RUNNING");
    }
}
