//! Service → proxy route materialization

use revp_types::{BackendProtocol, Service};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Only ids under this prefix are ever touched by orphan collection;
/// operator-created routes outside it are preserved
pub const ROUTE_ID_PREFIX: &str = "revp_route_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listener {
    Http,
    Https,
}

impl Listener {
    fn as_str(&self) -> &'static str {
        match self {
            Listener::Http => "http",
            Listener::Https => "https",
        }
    }
}

/// Deterministic route id for a domain on a listener
pub fn route_id(domain: &str, listener: Listener) -> String {
    let digest = Sha256::digest(format!("{}:{}", domain, listener.as_str()).as_bytes());
    format!("{}{}", ROUTE_ID_PREFIX, &hex::encode(digest)[..16])
}

/// One materialized route ready to PUT at its id
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub id: String,
    pub listener: Listener,
    pub payload: Value,
}

impl RouteSpec {
    pub fn payload_hash(&self) -> String {
        payload_hash(&self.payload)
    }
}

/// All proxy routes for a service.
///
/// The HTTPS listener always carries the reverse-proxy route. The HTTP
/// listener carries a redirect when `force_ssl` is set, except for
/// tunneled services, which serve the same reverse-proxy route on both
/// listeners and never redirect.
pub fn materialize(service: &Service) -> Vec<RouteSpec> {
    let https_id = route_id(&service.domain, Listener::Https);
    let http_id = route_id(&service.domain, Listener::Http);

    let mut routes = vec![RouteSpec {
        id: https_id.clone(),
        listener: Listener::Https,
        payload: proxy_payload(service, &https_id),
    }];

    if service.options.cloudflare_tunnel || !service.options.force_ssl {
        routes.push(RouteSpec {
            id: http_id.clone(),
            listener: Listener::Http,
            payload: proxy_payload(service, &http_id),
        });
    } else {
        routes.push(RouteSpec {
            id: http_id.clone(),
            listener: Listener::Http,
            payload: redirect_payload(service, &http_id),
        });
    }

    routes
}

fn proxy_payload(service: &Service, id: &str) -> Value {
    let mut subroutes = Vec::new();

    // Tunneled traffic arrives with the real client in CF-Connecting-IP
    if service.options.cloudflare_tunnel {
        subroutes.push(json!({
            "handle": [{
                "handler": "headers",
                "request": {
                    "set": {
                        "X-Real-IP": ["{http.request.header.CF-Connecting-IP}"],
                        "X-Forwarded-For": ["{http.request.header.CF-Connecting-IP}"]
                    }
                }
            }]
        }));
    }

    if service.backend.path != "/" {
        let prefix = service.backend.path.trim_end_matches('/');
        subroutes.push(json!({
            "handle": [{
                "handler": "rewrite",
                "uri": format!("{}{}", prefix, "{http.request.uri}")
            }]
        }));
    }

    let mut header_up = Map::new();
    header_up.insert("Host".to_string(), json!(["{http.request.host}"]));
    header_up.insert(
        "X-Forwarded-Proto".to_string(),
        json!(["{http.request.scheme}"]),
    );
    if !service.options.cloudflare_tunnel {
        header_up.insert(
            "X-Real-IP".to_string(),
            json!(["{http.request.remote.host}"]),
        );
    }
    if service.options.support_websocket {
        header_up.insert(
            "Upgrade".to_string(),
            json!(["{http.request.header.Upgrade}"]),
        );
        header_up.insert(
            "Connection".to_string(),
            json!(["{http.request.header.Connection}"]),
        );
    }

    let mut reverse_proxy = Map::new();
    reverse_proxy.insert("handler".to_string(), json!("reverse_proxy"));
    reverse_proxy.insert(
        "upstreams".to_string(),
        json!([{ "dial": service.backend.dial() }]),
    );
    reverse_proxy.insert(
        "headers".to_string(),
        json!({ "request": { "set": Value::Object(header_up) } }),
    );

    let mut transport = Map::new();
    transport.insert(
        "protocol".to_string(),
        json!(service.backend.protocol.to_string()),
    );
    if service.backend.protocol == BackendProtocol::Https {
        transport.insert("tls".to_string(), json!({}));
        if service.options.tls_insecure_skip_verify {
            transport.insert("tls_insecure_skip_verify".to_string(), json!(true));
        }
    }
    reverse_proxy.insert("transport".to_string(), Value::Object(transport));

    subroutes.push(json!({ "handle": [Value::Object(reverse_proxy)] }));

    json!({
        "@id": id,
        "match": [{ "host": [service.domain] }],
        "handle": [{
            "handler": "subroute",
            "routes": subroutes
        }]
    })
}

fn redirect_payload(service: &Service, id: &str) -> Value {
    json!({
        "@id": id,
        "match": [{ "host": [service.domain] }],
        "handle": [{
            "handler": "static_response",
            "status_code": 308,
            "headers": {
                "Location": ["https://{http.request.host}{http.request.uri}"]
            }
        }]
    })
}

/// Order-independent content hash of a route payload
pub fn payload_hash(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hash_value(payload, &mut hasher);
    hex::encode(&hasher.finalize()[..16])
}

fn hash_value(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Object(map) => {
            hasher.update(b"{");
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hash_value(&map[key], hasher);
                hasher.update(b";");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_value(item, hasher);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        other => hasher.update(other.to_string().as_bytes()),
    }
}
