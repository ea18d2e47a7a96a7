//! `snadboy.revp.<port>.<property>` label compilation

use crate::warning::CompileWarning;
use once_cell::sync::Lazy;
use regex::Regex;
use revp_types::{
    Backend, BackendPathValidator, BackendProtocol, ContainerRecord, DomainValidator, Service,
    ServiceOptions, ServiceOrigin,
};
use std::collections::BTreeMap;

static LABEL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^snadboy\.revp\.(\d{1,5})\.(domain|backend-proto|backend-path|force-ssl|support-websocket|cloudflare-tunnel|tunnel-domain)$",
    )
    .unwrap()
});

/// Compile one container's labels into services.
///
/// Labels are partitioned by container port; each partition carrying a
/// `domain` yields at most one service (plus an auxiliary tunnel
/// service when `tunnel-domain` is set). Containers that are not
/// running yield nothing: their routes are withdrawn, not degraded.
pub fn compile_container(
    container: &ContainerRecord,
    host_address: &str,
) -> (Vec<Service>, Vec<CompileWarning>) {
    let mut services = Vec::new();
    let mut warnings = Vec::new();

    if !container.status.is_running() {
        return (services, warnings);
    }

    let source = format!("{}/{}", container.host, container.name);

    // Partition matching labels by port; BTreeMap keeps output order
    // deterministic for identical inputs
    let mut partitions: BTreeMap<u16, BTreeMap<String, String>> = BTreeMap::new();
    for (key, value) in &container.labels {
        let Some(captures) = LABEL_KEY.captures(key) else {
            continue;
        };
        let Ok(port) = captures[1].parse::<u16>() else {
            warnings.push(CompileWarning::InvalidValue {
                source: source.clone(),
                field: key.clone(),
                value: value.clone(),
                detail: "port out of range 1-65535".to_string(),
            });
            continue;
        };
        if port == 0 {
            warnings.push(CompileWarning::InvalidValue {
                source: source.clone(),
                field: key.clone(),
                value: value.clone(),
                detail: "port out of range 1-65535".to_string(),
            });
            continue;
        }
        partitions
            .entry(port)
            .or_default()
            .insert(captures[2].to_string(), value.clone());
    }

    for (container_port, properties) in partitions {
        match compile_partition(container, host_address, &source, container_port, &properties) {
            PartitionResult::Services(mut compiled) => services.append(&mut compiled),
            PartitionResult::Dropped(mut partition_warnings) => {
                warnings.append(&mut partition_warnings)
            }
            PartitionResult::ServicesWithWarnings(mut compiled, mut partition_warnings) => {
                services.append(&mut compiled);
                warnings.append(&mut partition_warnings);
            }
        }
    }

    (services, warnings)
}

enum PartitionResult {
    Services(Vec<Service>),
    ServicesWithWarnings(Vec<Service>, Vec<CompileWarning>),
    Dropped(Vec<CompileWarning>),
}

fn compile_partition(
    container: &ContainerRecord,
    host_address: &str,
    source: &str,
    container_port: u16,
    properties: &BTreeMap<String, String>,
) -> PartitionResult {
    let mut warnings = Vec::new();

    let Some(domain) = properties.get("domain") else {
        return PartitionResult::Dropped(vec![CompileWarning::MissingDomain {
            source: source.to_string(),
            port: container_port,
        }]);
    };
    if let Err(e) = DomainValidator::validate(domain) {
        return PartitionResult::Dropped(vec![CompileWarning::InvalidValue {
            source: source.to_string(),
            field: "domain".to_string(),
            value: domain.clone(),
            detail: e.to_string(),
        }]);
    }

    let Some(host_port) = container.published_port(container_port) else {
        return PartitionResult::Dropped(vec![CompileWarning::UnpublishedPort {
            source: source.to_string(),
            port: container_port,
            domain: domain.clone(),
        }]);
    };

    let protocol = match properties.get("backend-proto") {
        Some(value) => match value.parse::<BackendProtocol>() {
            Ok(protocol) => protocol,
            Err(detail) => {
                warnings.push(CompileWarning::InvalidValue {
                    source: source.to_string(),
                    field: "backend-proto".to_string(),
                    value: value.clone(),
                    detail,
                });
                BackendProtocol::Http
            }
        },
        None => BackendProtocol::Http,
    };

    let path = match properties.get("backend-path") {
        Some(value) => match BackendPathValidator::validate(value) {
            Ok(()) => value.clone(),
            Err(e) => {
                warnings.push(CompileWarning::InvalidValue {
                    source: source.to_string(),
                    field: "backend-path".to_string(),
                    value: value.clone(),
                    detail: e.to_string(),
                });
                "/".to_string()
            }
        },
        None => "/".to_string(),
    };

    let mut options = ServiceOptions {
        force_ssl: parse_bool(properties.get("force-ssl"), true, source, "force-ssl", &mut warnings),
        support_websocket: parse_bool(
            properties.get("support-websocket"),
            false,
            source,
            "support-websocket",
            &mut warnings,
        ),
        tls_insecure_skip_verify: false,
        cloudflare_tunnel: parse_bool(
            properties.get("cloudflare-tunnel"),
            false,
            source,
            "cloudflare-tunnel",
            &mut warnings,
        ),
        tunnel_domain: None,
    };

    if let Some(tunnel_domain) = properties.get("tunnel-domain") {
        match DomainValidator::validate(tunnel_domain) {
            Ok(()) => options.tunnel_domain = Some(tunnel_domain.clone()),
            Err(e) => warnings.push(CompileWarning::InvalidValue {
                source: source.to_string(),
                field: "tunnel-domain".to_string(),
                value: tunnel_domain.clone(),
                detail: e.to_string(),
            }),
        }
    }

    let origin = ServiceOrigin::Container {
        host: container.host.clone(),
        container_id: container.id.clone(),
        container_port,
    };
    let backend = Backend {
        host: host_address.to_string(),
        port: host_port,
        protocol,
        path,
    };

    let mut services = vec![Service {
        domain: domain.clone(),
        origin: origin.clone(),
        backend: backend.clone(),
        options: options.clone(),
    }];

    // The auxiliary tunnel domain rides the same backend but always
    // tunnels and never redirects
    if let Some(tunnel_domain) = &options.tunnel_domain {
        services.push(Service {
            domain: tunnel_domain.clone(),
            origin,
            backend,
            options: ServiceOptions {
                force_ssl: false,
                cloudflare_tunnel: true,
                tunnel_domain: None,
                ..options.clone()
            },
        });
    }

    if warnings.is_empty() {
        PartitionResult::Services(services)
    } else {
        PartitionResult::ServicesWithWarnings(services, warnings)
    }
}

fn parse_bool(
    value: Option<&String>,
    default: bool,
    source: &str,
    field: &str,
    warnings: &mut Vec<CompileWarning>,
) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            warnings.push(CompileWarning::InvalidValue {
                source: source.to_string(),
                field: field.to_string(),
                value: value.clone(),
                detail: "not a boolean".to_string(),
            });
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revp_types::ContainerStatus;
    use std::collections::HashMap;

    fn container(labels: &[(&str, &str)], ports: &[(u16, Option<u16>)]) -> ContainerRecord {
        ContainerRecord {
            id: "abc123".to_string(),
            host: "h1".to_string(),
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            status: ContainerStatus::Running,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ports: ports.iter().copied().collect(),
        }
    }

    #[test]
    fn test_single_domain_label() {
        let c = container(
            &[("snadboy.revp.80.domain", "app.example.com")],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");

        assert!(warnings.is_empty());
        assert_eq!(services.len(), 1);
        let service = &services[0];
        assert_eq!(service.domain, "app.example.com");
        assert_eq!(service.backend.host, "10.0.0.1");
        assert_eq!(service.backend.port, 8080);
        assert_eq!(service.backend.protocol, BackendProtocol::Http);
        assert_eq!(service.backend.path, "/");
        assert!(service.options.force_ssl);
        assert!(!service.options.support_websocket);
    }

    #[test]
    fn test_multi_port_partitions() {
        let c = container(
            &[
                ("snadboy.revp.80.domain", "a.example.com"),
                ("snadboy.revp.8000.domain", "b.example.com"),
                ("snadboy.revp.8000.support-websocket", "true"),
            ],
            &[(80, Some(8080)), (8000, Some(8000))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");

        assert!(warnings.is_empty());
        assert_eq!(services.len(), 2);
        let a = services.iter().find(|s| s.domain == "a.example.com").unwrap();
        let b = services.iter().find(|s| s.domain == "b.example.com").unwrap();
        assert!(!a.options.support_websocket);
        assert!(b.options.support_websocket);
        assert_eq!(b.backend.port, 8000);
    }

    #[test]
    fn test_partition_without_domain_warns() {
        let c = container(
            &[("snadboy.revp.80.force-ssl", "false")],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");

        assert!(services.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            CompileWarning::MissingDomain { port: 80, .. }
        ));
    }

    #[test]
    fn test_unpublished_port_drops_service() {
        let c = container(&[("snadboy.revp.80.domain", "app.example.com")], &[(80, None)]);
        let (services, warnings) = compile_container(&c, "10.0.0.1");

        assert!(services.is_empty());
        assert!(matches!(
            warnings[0],
            CompileWarning::UnpublishedPort { port: 80, .. }
        ));
    }

    #[test]
    fn test_tunnel_domain_emits_auxiliary_service() {
        let c = container(
            &[
                ("snadboy.revp.80.domain", "app.example.com"),
                ("snadboy.revp.80.tunnel-domain", "tunnel.example.com"),
            ],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");

        assert!(warnings.is_empty());
        assert_eq!(services.len(), 2);
        let aux = services
            .iter()
            .find(|s| s.domain == "tunnel.example.com")
            .unwrap();
        assert!(aux.options.cloudflare_tunnel);
        assert!(!aux.options.force_ssl);
        assert!(aux.options.tunnel_domain.is_none());
        assert_eq!(aux.backend, services[0].backend);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let c = container(
            &[
                ("snadboy.revp.80.domain", "app.example.com"),
                ("snadboy.revp.80.backend-proto", "gopher"),
                ("snadboy.revp.80.force-ssl", "maybe"),
                ("snadboy.revp.80.backend-path", "no-slash"),
            ],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");

        assert_eq!(services.len(), 1);
        assert_eq!(services[0].backend.protocol, BackendProtocol::Http);
        assert!(services[0].options.force_ssl);
        assert_eq!(services[0].backend.path, "/");
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_invalid_domain_drops_partition() {
        let c = container(
            &[("snadboy.revp.80.domain", "not a domain")],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");
        assert!(services.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_stopped_container_yields_nothing() {
        let mut c = container(
            &[("snadboy.revp.80.domain", "app.example.com")],
            &[(80, Some(8080))],
        );
        c.status = ContainerStatus::Exited;
        let (services, warnings) = compile_container(&c, "10.0.0.1");
        assert!(services.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unrelated_labels_ignored() {
        let c = container(
            &[
                ("snadboy.revp.80.domain", "app.example.com"),
                ("com.docker.compose.project", "demo"),
                ("snadboy.revp.80.unknown-property", "x"),
                ("snadboy.revp.notaport.domain", "y"),
            ],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");
        assert_eq!(services.len(), 1);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_out_of_range_port_warns() {
        let c = container(
            &[("snadboy.revp.70000.domain", "app.example.com")],
            &[(80, Some(8080))],
        );
        let (services, warnings) = compile_container(&c, "10.0.0.1");
        assert!(services.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], CompileWarning::InvalidValue { .. }));
    }
}
