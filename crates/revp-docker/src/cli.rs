//! Docker CLI argv builders and JSON output parsing
//!
//! The observers only depend on field availability in the CLI's JSON
//! output, not on the transport: `docker ps -q` + `docker inspect` for
//! snapshots, `docker events` for the lifecycle stream.

use crate::error::{DockerError, Result};
use revp_types::{ContainerRecord, ContainerStatus};
use serde::Deserialize;
use std::collections::HashMap;

/// Container lifecycle actions the observer subscribes to
pub const EVENT_ACTIONS: &[&str] = &[
    "start", "die", "kill", "stop", "pause", "unpause", "destroy", "rename", "update",
];

/// `docker ps` listing every container id, running or not
pub fn list_ids_argv() -> Vec<String> {
    ["docker", "ps", "--all", "--quiet", "--no-trunc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// `docker inspect` printing one JSON object per line per container
pub fn inspect_argv(ids: &[String]) -> Vec<String> {
    let mut argv: Vec<String> = ["docker", "inspect", "--format", "{{json .}}"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    argv.extend(ids.iter().cloned());
    argv
}

/// `docker events` filtered to the container actions of interest
pub fn events_argv() -> Vec<String> {
    let mut argv: Vec<String> = ["docker", "events", "--format", "{{json .}}"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    argv.push("--filter".to_string());
    argv.push("type=container".to_string());
    for action in EVENT_ACTIONS {
        argv.push("--filter".to_string());
        argv.push(format!("event={}", action));
    }
    argv
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    id: String,
    name: String,
    state: InspectState,
    config: InspectConfig,
    #[serde(default)]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_ip: String,
    host_port: String,
}

/// Parse one line of `docker inspect --format '{{json .}}'` output
pub fn parse_inspect_line(host: &str, line: &str) -> Result<ContainerRecord> {
    let response: InspectResponse = serde_json::from_str(line)
        .map_err(|e| DockerError::Parse(format!("inspect JSON: {}", e)))?;

    let mut ports: HashMap<u16, Option<u16>> = HashMap::new();
    if let Some(port_map) = response.network_settings.ports {
        for (key, bindings) in port_map {
            // Keys look like "80/tcp"; the proxy only dials TCP
            let Some(container_port) = key
                .strip_suffix("/tcp")
                .and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };

            let host_port = bindings.as_deref().and_then(pick_host_port);
            ports.insert(container_port, host_port);
        }
    }

    Ok(ContainerRecord {
        id: response.id,
        host: host.to_string(),
        // Inspect reports names with a leading slash
        name: response.name.trim_start_matches('/').to_string(),
        image: response.config.image,
        status: ContainerStatus::from(response.state.status.as_str()),
        labels: response.config.labels.unwrap_or_default(),
        ports,
    })
}

/// Prefer the wildcard bind; fall back to the first parseable binding
fn pick_host_port(bindings: &[PortBinding]) -> Option<u16> {
    bindings
        .iter()
        .filter(|b| b.host_ip.is_empty() || b.host_ip == "0.0.0.0" || b.host_ip == "::")
        .chain(bindings.iter())
        .find_map(|b| b.host_port.parse::<u16>().ok())
}

/// One message from `docker events --format '{{json .}}'`
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub id: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Actor")]
    actor: EventActor,
}

#[derive(Debug, Deserialize)]
struct EventActor {
    #[serde(rename = "ID")]
    id: String,
}

/// Parse one event line; `None` for event types we do not subscribe to.
///
/// Health-check ticks arrive as `exec_die` style actions even under the
/// action filters on older engines, so the action set is re-checked.
pub fn parse_event_line(line: &str) -> Result<Option<ContainerEvent>> {
    let message: EventMessage = serde_json::from_str(line)
        .map_err(|e| DockerError::Parse(format!("event JSON: {}", e)))?;

    if message.kind != "container" {
        return Ok(None);
    }

    // Compound actions like "health_status: healthy" carry a suffix
    let action = message
        .action
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if !EVENT_ACTIONS.contains(&action.as_str()) {
        return Ok(None);
    }

    Ok(Some(ContainerEvent {
        id: message.actor.id,
        action,
    }))
}

/// Actions after which the container is expected to be gone
pub fn is_removal_action(action: &str) -> bool {
    action == "destroy"
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT_LINE: &str = r#"{"Id":"abc123","Name":"/web","State":{"Status":"running"},"Config":{"Image":"nginx:latest","Labels":{"snadboy.revp.80.domain":"app.example.com"}},"NetworkSettings":{"Ports":{"80/tcp":[{"HostIp":"0.0.0.0","HostPort":"8080"}],"443/tcp":null,"53/udp":[{"HostIp":"0.0.0.0","HostPort":"53"}]}}}"#;

    #[test]
    fn test_parse_inspect_line() {
        let record = parse_inspect_line("h1", INSPECT_LINE).unwrap();
        assert_eq!(record.id, "abc123");
        assert_eq!(record.host, "h1");
        assert_eq!(record.name, "web");
        assert_eq!(record.image, "nginx:latest");
        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(record.published_port(80), Some(8080));
        // Exposed but unpublished
        assert_eq!(record.ports.get(&443), Some(&None));
        // UDP bindings are not routable
        assert!(!record.ports.contains_key(&53));
        assert_eq!(
            record.labels.get("snadboy.revp.80.domain").unwrap(),
            "app.example.com"
        );
    }

    #[test]
    fn test_parse_inspect_rejects_garbage() {
        assert!(parse_inspect_line("h1", "not json").is_err());
    }

    #[test]
    fn test_pick_host_port_prefers_wildcard() {
        let bindings = vec![
            PortBinding {
                host_ip: "127.0.0.1".to_string(),
                host_port: "9999".to_string(),
            },
            PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: "8080".to_string(),
            },
        ];
        assert_eq!(pick_host_port(&bindings), Some(8080));
    }

    #[test]
    fn test_parse_event_line() {
        let line = r#"{"status":"start","id":"abc","Type":"container","Action":"start","Actor":{"ID":"abc","Attributes":{"name":"web"}},"time":1700000000}"#;
        let event = parse_event_line(line).unwrap().unwrap();
        assert_eq!(event.id, "abc");
        assert_eq!(event.action, "start");
    }

    #[test]
    fn test_parse_event_ignores_other_types() {
        let line = r#"{"Type":"network","Action":"connect","Actor":{"ID":"net1"}}"#;
        assert!(parse_event_line(line).unwrap().is_none());

        let line = r#"{"Type":"container","Action":"exec_start: sh","Actor":{"ID":"abc"}}"#;
        assert!(parse_event_line(line).unwrap().is_none());
    }

    #[test]
    fn test_events_argv_filters() {
        let argv = events_argv();
        assert!(argv.contains(&"type=container".to_string()));
        assert!(argv.contains(&"event=start".to_string()));
        assert!(argv.contains(&"event=destroy".to_string()));
        assert!(argv.contains(&"{{json .}}".to_string()));
    }

    #[test]
    fn test_inspect_argv_appends_ids() {
        let argv = inspect_argv(&["a".to_string(), "b".to_string()]);
        assert_eq!(argv[argv.len() - 2..], ["a".to_string(), "b".to_string()]);
    }
}
