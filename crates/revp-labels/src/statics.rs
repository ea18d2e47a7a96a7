//! Static route record compilation

use crate::warning::CompileWarning;
use revp_types::{
    Backend, BackendPathValidator, BackendProtocol, DomainValidator, Service, ServiceOptions,
    ServiceOrigin, StaticRecord,
};
use std::collections::HashSet;
use url::Url;

/// Compile one static record; `None` when the record is rejected
pub fn compile_static_record(record: &StaticRecord) -> (Option<Service>, Vec<CompileWarning>) {
    let source = record.record_id();
    let mut warnings = Vec::new();

    if let Err(e) = DomainValidator::validate(&record.domain) {
        warnings.push(CompileWarning::InvalidRecord {
            source,
            detail: e.to_string(),
        });
        return (None, warnings);
    }

    let backend = match parse_backend(record) {
        Ok(backend) => backend,
        Err(detail) => {
            warnings.push(CompileWarning::InvalidRecord { source, detail });
            return (None, warnings);
        }
    };

    let options = ServiceOptions {
        force_ssl: record.force_ssl.unwrap_or(true),
        support_websocket: record.support_websocket.unwrap_or(false),
        tls_insecure_skip_verify: record.tls_insecure_skip_verify.unwrap_or(false),
        cloudflare_tunnel: record.cloudflare_tunnel.unwrap_or(false),
        tunnel_domain: None,
    };

    let service = Service {
        domain: record.domain.clone(),
        origin: ServiceOrigin::Static {
            record_id: record.record_id(),
        },
        backend,
        options,
    };
    (Some(service), warnings)
}

/// Compile a record list; duplicate domains are rejected with the first
/// record winning
pub fn compile_static_records(records: &[StaticRecord]) -> (Vec<Service>, Vec<CompileWarning>) {
    let mut services = Vec::new();
    let mut warnings = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for record in records {
        if !seen.insert(record.domain.as_str()) {
            warnings.push(CompileWarning::DomainConflict {
                domain: record.domain.clone(),
                winner: format!("static:{}", record.domain),
                loser: record.record_id(),
            });
            continue;
        }
        let (service, mut record_warnings) = compile_static_record(record);
        warnings.append(&mut record_warnings);
        services.extend(service);
    }

    (services, warnings)
}

fn parse_backend(record: &StaticRecord) -> Result<Backend, String> {
    let url = Url::parse(&record.backend_url)
        .map_err(|e| format!("unparseable backend_url: {}", e))?;

    let protocol = match url.scheme() {
        "http" => BackendProtocol::Http,
        "https" => BackendProtocol::Https,
        other => return Err(format!("invalid backend scheme: {}", other)),
    };

    let host = url
        .host_str()
        .ok_or_else(|| "backend_url has no host".to_string())?
        .to_string();

    let port = url.port().unwrap_or_else(|| protocol.default_port());

    let path = match &record.backend_path {
        Some(path) => {
            BackendPathValidator::validate(path).map_err(|e| e.to_string())?;
            path.clone()
        }
        None => "/".to_string(),
    };

    Ok(Backend {
        host,
        port,
        protocol,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_record() {
        let record = StaticRecord::new("app.example.com", "http://10.0.0.5:3000");
        let (service, warnings) = compile_static_record(&record);

        assert!(warnings.is_empty());
        let service = service.unwrap();
        assert_eq!(service.domain, "app.example.com");
        assert_eq!(service.backend.host, "10.0.0.5");
        assert_eq!(service.backend.port, 3000);
        assert_eq!(service.backend.protocol, BackendProtocol::Http);
        assert!(service.options.force_ssl);
        assert!(service.origin.is_static());
    }

    #[test]
    fn test_port_defaults_by_scheme() {
        let record = StaticRecord::new("a.example.com", "http://backend.lan");
        let (service, _) = compile_static_record(&record);
        assert_eq!(service.unwrap().backend.port, 80);

        let record = StaticRecord::new("a.example.com", "https://backend.lan");
        let (service, _) = compile_static_record(&record);
        let service = service.unwrap();
        assert_eq!(service.backend.port, 443);
        assert_eq!(service.backend.protocol, BackendProtocol::Https);
    }

    #[test]
    fn test_invalid_records_rejected() {
        for (domain, url) in [
            ("not a domain", "http://10.0.0.5"),
            ("a.example.com", "ftp://10.0.0.5"),
            ("a.example.com", "nonsense"),
        ] {
            let record = StaticRecord::new(domain, url);
            let (service, warnings) = compile_static_record(&record);
            assert!(service.is_none(), "{} {} should be rejected", domain, url);
            assert_eq!(warnings.len(), 1);
        }
    }

    #[test]
    fn test_invalid_backend_path_rejects_record() {
        let mut record = StaticRecord::new("a.example.com", "http://10.0.0.5");
        record.backend_path = Some("relative".to_string());
        let (service, warnings) = compile_static_record(&record);
        assert!(service.is_none());
        assert!(matches!(warnings[0], CompileWarning::InvalidRecord { .. }));
    }

    #[test]
    fn test_duplicate_domains_first_wins() {
        let records = vec![
            StaticRecord::new("dup.example.com", "http://10.0.0.5:3000"),
            StaticRecord::new("dup.example.com", "http://10.0.0.6:3000"),
            StaticRecord::new("other.example.com", "http://10.0.0.7:3000"),
        ];
        let (services, warnings) = compile_static_records(&records);

        assert_eq!(services.len(), 2);
        let dup = services.iter().find(|s| s.domain == "dup.example.com").unwrap();
        assert_eq!(dup.backend.host, "10.0.0.5");
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], CompileWarning::DomainConflict { .. }));
    }

    #[test]
    fn test_options_carry_through() {
        let mut record = StaticRecord::new("a.example.com", "https://10.0.0.5:8443");
        record.force_ssl = Some(false);
        record.support_websocket = Some(true);
        record.tls_insecure_skip_verify = Some(true);
        record.cloudflare_tunnel = Some(true);

        let (service, warnings) = compile_static_record(&record);
        assert!(warnings.is_empty());
        let options = service.unwrap().options;
        assert!(!options.force_ssl);
        assert!(options.support_websocket);
        assert!(options.tls_insecure_skip_verify);
        assert!(options.cloudflare_tunnel);
    }
}
