//! Human-readable diagnostics for the `dump` command

use meshware_core::{anonymize, CapabilityInfo, DhType, TaskParam};

use crate::error::{FwkError, Result};
use crate::manager::DistributedHardwareManager;
use crate::task_board::TaskDump;

pub const HELP: &str = "Usage:dump  <command> [options]\n\
Description:\n\
-h           : show help\n\
-l           : show all loaded components\n\
-e           : show all enabled components\n\
-t           : show all tasks\n\
-c           : show all Capability info of online components\n\n";

/// Render the section selected by `args`; a stopped framework dumps empty sections
pub fn dump(args: &[String], manager: Option<&DistributedHardwareManager>) -> Result<String> {
    let arg = match args {
        [] => return Ok(HELP.to_string()),
        [arg] => arg.as_str(),
        _ => return Err(FwkError::InvalidDumpArgs),
    };
    match arg {
        "-h" => Ok(HELP.to_string()),
        "-l" => {
            let (sources, sinks) = manager.map(|m| m.loaded_components()).unwrap_or_default();
            Ok(format_loaded_components(&sources, &sinks))
        }
        "-e" => {
            let mut enabled: Vec<(String, TaskParam)> = manager
                .map(|m| m.board.get_enabled_devices().into_iter().collect())
                .unwrap_or_default();
            enabled.sort_by(|a, b| a.0.cmp(&b.0));
            let params: Vec<TaskParam> = enabled.into_iter().map(|(_, p)| p).collect();
            Ok(format_enabled_components(&params))
        }
        "-t" => {
            let tasks = manager.map(|m| m.board.dump_all_tasks()).unwrap_or_default();
            Ok(format_tasks(&tasks))
        }
        "-c" => {
            let caps = manager
                .map(|m| m.capabilities.dump_capability_infos())
                .unwrap_or_default();
            Ok(format_capabilities(&caps))
        }
        _ => Err(FwkError::InvalidDumpArgs),
    }
}

fn format_versions(out: &mut String, items: &[(DhType, String)]) {
    for (dh_type, version) in items {
        out.push_str(&format!(" {}_{},", dh_type, version));
    }
    if !items.is_empty() {
        out.pop();
        out.push(' ');
    }
}

pub fn format_loaded_components(sources: &[(DhType, String)], sinks: &[(DhType, String)]) -> String {
    let mut out = String::from("Local loaded components:\n{");
    out.push_str("\n    Source     : [");
    format_versions(&mut out, sources);
    out.push(']');
    out.push_str("\n    Sink       : [");
    format_versions(&mut out, sinks);
    out.push(']');
    out.push_str("\n}\n");
    out
}

/// Swap the trailing separator of a non-empty list for a newline
fn close_list(out: &mut String, non_empty: bool) {
    if non_empty {
        out.pop();
        out.push('\n');
    }
}

pub fn format_enabled_components(items: &[TaskParam]) -> String {
    let mut out = String::from("All enabled components:");
    for item in items {
        out.push_str(&format!(
            "\n{{\n    NetworkId  : {}\n    DHType     : {}\n    DHId       : {}\n}},",
            anonymize(&item.network_id),
            item.dh_type,
            anonymize(&item.dh_id)
        ));
    }
    close_list(&mut out, !items.is_empty());
    out
}

pub fn format_tasks(tasks: &[TaskDump]) -> String {
    let mut out = String::from("All execute task list:");
    for task in tasks {
        let mut steps = String::from("[ ");
        for step in &task.steps {
            steps.push_str(step.label());
            steps.push(' ');
        }
        steps.push(']');
        out.push_str(&format!(
            "\n{{\n    TaskId     : {}\n    TaskType   : {}\n    DHType     : {}\n    DHId       : {}\n    TaskState  : {}\n    TaskStep   : {}\n}},",
            task.id,
            task.task_type.label(),
            task.dh_type,
            anonymize(&task.dh_id),
            task.state.label(),
            steps
        ));
    }
    close_list(&mut out, !tasks.is_empty());
    out
}

pub fn format_capabilities(caps: &[CapabilityInfo]) -> String {
    let mut out = String::from("All capability info of online components :");
    for cap in caps {
        out.push_str(&format!(
            "\n{{\n    DeviceName : {}\n    DeviceId   : {}\n    DeviceType : {}\n    DHType     : {}\n    DHId       : {}\n    DHAttrs    :\n{}\n}},",
            anonymize(&cap.device_name),
            anonymize(&cap.device_id),
            cap.device_type,
            cap.dh_type,
            anonymize(&cap.dh_id),
            cap.dh_attrs
        ));
    }
    close_list(&mut out, !caps.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshware_core::{TaskState, TaskStep, TaskType};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_help_and_invalid_args() {
        assert_eq!(dump(&[], None).unwrap(), HELP);
        assert_eq!(dump(&args(&["-h"]), None).unwrap(), HELP);
        assert!(matches!(dump(&args(&["-z"]), None), Err(FwkError::InvalidDumpArgs)));
        assert!(matches!(
            dump(&args(&["-l", "-t"]), None),
            Err(FwkError::InvalidDumpArgs)
        ));
        assert_eq!(
            FwkError::InvalidDumpArgs.to_string(),
            "Unrecognized option, -h for help."
        );
    }

    #[test]
    fn test_empty_sections_without_framework() {
        assert_eq!(
            dump(&args(&["-l"]), None).unwrap(),
            "Local loaded components:\n{\n    Source     : []\n    Sink       : []\n}\n"
        );
        assert_eq!(dump(&args(&["-e"]), None).unwrap(), "All enabled components:");
        assert_eq!(
            dump(&args(&["-c"]), None).unwrap(),
            "All capability info of online components :"
        );
    }

    #[test]
    fn test_loaded_components_layout() {
        let sources = vec![(DhType::Camera, "1.0".to_string()), (DhType::Input, "2.0".to_string())];
        let sinks = vec![(DhType::Camera, "1.1".to_string())];
        assert_eq!(
            format_loaded_components(&sources, &sinks),
            "Local loaded components:\n{\n    Source     : [ CAMERA_1.0, INPUT_2.0 ]\n    Sink       : [ CAMERA_1.1 ]\n}\n"
        );
    }

    #[test]
    fn test_task_layout() {
        let tasks = vec![TaskDump {
            id: "Task_1".to_string(),
            task_type: TaskType::Enable,
            dh_type: DhType::Camera,
            dh_id: String::new(),
            state: TaskState::Running,
            steps: vec![TaskStep::DoEnable],
        }];
        let out = format_tasks(&tasks);
        assert!(out.starts_with("All execute task list:\n{\n    TaskId     : Task_1\n"));
        assert!(out.contains(&format!("    TaskType   : {}\n", TaskType::Enable.label())));
        assert!(out.contains(&format!("    TaskStep   : [ {} ]\n", TaskStep::DoEnable.label())));
        assert!(out.ends_with("\n}\n"));
    }

    #[test]
    fn test_enabled_layout_masks_ids() {
        let items = vec![TaskParam {
            network_id: "network-abcdef".to_string(),
            uuid: "uuid".to_string(),
            dh_id: "camera_0123456".to_string(),
            dh_type: DhType::Camera,
        }];
        let out = format_enabled_components(&items);
        assert!(out.contains("    DHType     : CAMERA\n"));
        assert!(!out.contains("network-abcdef"));
        assert!(out.ends_with("}\n"));
    }
}
