//! Vendor B: AWS Secrets Manager, JSON 1.1 protocol with SigV4 signing.
//!
//! Each key id is a secret whose `SecretString` is the base64 of the 32-byte
//! key. `PutSecretValue` issues a new version; superseded versions remain
//! listable through `ListSecretVersionIds` with `IncludeDeprecated`.

use crate::config::AwsSettings;
use crate::error::KeyVaultError;
use crate::http::{self, Reply};
use crate::provider::{readable_versions, KeyProvider};
use crate::sigv4::{self, Credentials, SignableRequest};
use crate::types::{DataKey, KeyMetadata, KEY_SIZE};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const SERVICE: &str = "secretsmanager";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const MAX_PAGES: usize = 1000;

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueResponse {
    secret_string: Option<String>,
    secret_binary: Option<String>,
    version_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WriteSecretResponse {
    version_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecretListEntry {
    name: String,
    #[serde(rename = "ARN")]
    arn: Option<String>,
    created_date: Option<f64>,
    last_changed_date: Option<f64>,
    description: Option<String>,
    deleted_date: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListSecretsResponse {
    #[serde(default)]
    secret_list: Vec<SecretListEntry>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionEntry {
    version_id: String,
    created_date: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListVersionsResponse {
    #[serde(default)]
    versions: Vec<VersionEntry>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

fn epoch(secs: Option<f64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp_millis((s * 1000.0) as i64))
}

pub struct AwsSecretsProvider {
    client: Client,
    endpoint: Url,
    host: String,
    region: String,
    credentials: Credentials,
}

impl AwsSecretsProvider {
    pub fn new(settings: AwsSettings, timeout: Duration) -> Result<Self, KeyVaultError> {
        let endpoint_url = settings.endpoint_url();
        let endpoint = Url::parse(&endpoint_url).map_err(|e| {
            KeyVaultError::Misconfigured(format!("invalid AWS endpoint {:?}: {}", endpoint_url, e))
        })?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(KeyVaultError::Misconfigured(format!(
                    "AWS endpoint {:?} has no host",
                    endpoint_url
                )))
            }
        };
        Ok(Self {
            client: http::build_client(timeout)?,
            endpoint,
            host,
            region: settings.region,
            credentials: Credentials {
                access_key_id: settings.access_key_id,
                secret_access_key: settings.secret_access_key,
                session_token: settings.session_token,
            },
        })
    }

    /// Signed JSON 1.1 call. Service errors are mapped, with `ResourceNotFound`
    /// attributed to `key_id` when given.
    fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &Value,
        key_id: Option<&str>,
    ) -> Result<T, KeyVaultError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| KeyVaultError::InvalidResponse(format!("request encoding: {}", e)))?;
        let target = format!("secretsmanager.{}", operation);
        let headers = [
            ("content-type", CONTENT_TYPE),
            ("host", self.host.as_str()),
            ("x-amz-target", target.as_str()),
        ];
        let signed = sigv4::sign(
            &self.credentials,
            &self.region,
            SERVICE,
            Utc::now(),
            &SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                headers: &headers,
                payload: &payload,
            },
        );

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", &target);
        for (name, value) in signed {
            request = request.header(name, value);
        }
        let reply = http::send(request.body(payload))?;
        if !reply.status.is_success() {
            return Err(service_error(&reply, key_id));
        }
        reply.json()
    }

    fn get_secret(&self, key_id: &str, version_id: Option<&str>) -> Result<DataKey, KeyVaultError> {
        let mut body = json!({ "SecretId": key_id });
        if let Some(v) = version_id {
            body["VersionId"] = json!(v);
        }
        let resp: GetSecretValueResponse = self.call("GetSecretValue", &body, Some(key_id))?;
        let key = match (resp.secret_string, resp.secret_binary) {
            (Some(s), _) => DataKey::from_base64(key_id, &s)?,
            (None, Some(b)) => DataKey::from_base64(key_id, &b)?,
            (None, None) => {
                return Err(KeyVaultError::InvalidResponse(format!(
                    "secret {} has no value",
                    key_id
                )))
            }
        };
        Ok(match resp.version_id {
            Some(v) => key.with_version(v),
            None => key,
        })
    }

    fn put_secret(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError> {
        let key = DataKey::generate();
        let body = json!({ "SecretId": key_id, "SecretString": key.to_base64() });
        let resp: WriteSecretResponse = self.call("PutSecretValue", &body, Some(key_id))?;
        let version = resp.version_id.ok_or_else(|| {
            KeyVaultError::InvalidResponse("PutSecretValue returned no VersionId".into())
        })?;
        Ok((key.with_version(version.clone()), version))
    }
}

fn service_error(reply: &Reply, key_id: Option<&str>) -> KeyVaultError {
    let body: ErrorBody = serde_json::from_str(&reply.body).unwrap_or(ErrorBody {
        kind: None,
        message: None,
    });
    // `__type` may be namespaced: "com.amazonaws.secretsmanager#ResourceNotFoundException".
    let kind = body
        .kind
        .as_deref()
        .map(|k| k.rsplit('#').next().unwrap_or(k))
        .unwrap_or("");
    let message = body.message.unwrap_or_default();
    match kind {
        "ResourceNotFoundException" => match key_id {
            Some(id) => KeyVaultError::not_found(id),
            None => KeyVaultError::InvalidResponse(message),
        },
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "ExpiredTokenException"
        | "IncompleteSignature" => KeyVaultError::Unauthorized(format!("{}: {}", kind, message)),
        "" => {
            if let Err(e) = http::check_status(reply, key_id) {
                e
            } else {
                KeyVaultError::InvalidResponse(format!("HTTP {}", reply.status.as_u16()))
            }
        }
        other
            if reply.status == StatusCode::UNAUTHORIZED
                || reply.status == StatusCode::FORBIDDEN =>
        {
            KeyVaultError::Unauthorized(format!("{}: {}", other, message))
        }
        other => KeyVaultError::InvalidResponse(format!("{}: {}", other, message)),
    }
}

fn is_resource_exists(err: &KeyVaultError) -> bool {
    matches!(err, KeyVaultError::InvalidResponse(msg) if msg.starts_with("ResourceExistsException"))
}

impl KeyProvider for AwsSecretsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn get_key(&self, key_id: &str) -> Result<DataKey, KeyVaultError> {
        self.get_secret(key_id, None)
    }

    fn create_key(&self, key_id: &str, size: usize) -> Result<DataKey, KeyVaultError> {
        if size != KEY_SIZE {
            return Err(KeyVaultError::InvalidKeySize {
                key_id: key_id.to_string(),
                actual: size,
                expected: KEY_SIZE,
            });
        }
        let key = DataKey::generate();
        let body = json!({
            "Name": key_id,
            "SecretString": key.to_base64(),
            "Description": format!("Data encryption key for {}", key_id),
        });
        match self.call::<WriteSecretResponse>("CreateSecret", &body, None) {
            Ok(resp) => {
                tracing::info!(key_id, "created key in AWS Secrets Manager");
                Ok(match resp.version_id {
                    Some(v) => key.with_version(v),
                    None => key,
                })
            }
            Err(e) if is_resource_exists(&e) => {
                tracing::info!(key_id, "secret already exists; storing a new version");
                self.put_secret(key_id).map(|(key, _)| key)
            }
            Err(e) => Err(e),
        }
    }

    fn rotate_key(&self, key_id: &str) -> Result<(DataKey, String), KeyVaultError> {
        self.put_secret(key_id)
    }

    fn list_keys(&self) -> Result<BTreeMap<String, KeyMetadata>, KeyVaultError> {
        let mut keys = BTreeMap::new();
        let mut next_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut body = json!({ "MaxResults": 100 });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }
            let page: ListSecretsResponse = self.call("ListSecrets", &body, None)?;
            for entry in page.secret_list {
                let mut extra = BTreeMap::new();
                if let Some(arn) = entry.arn {
                    extra.insert("arn".to_string(), arn);
                }
                if let Some(description) = entry.description {
                    extra.insert("description".to_string(), description);
                }
                keys.insert(
                    entry.name,
                    KeyMetadata {
                        created: epoch(entry.created_date),
                        updated: epoch(entry.last_changed_date),
                        version: None,
                        status: if entry.deleted_date.is_some() {
                            "pending-deletion".into()
                        } else {
                            "enabled".into()
                        },
                        extra,
                    },
                );
            }
            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => return Ok(keys),
            }
        }
        Err(KeyVaultError::InvalidResponse(
            "secret listing did not terminate".into(),
        ))
    }

    fn key_versions(&self, key_id: &str) -> Result<Vec<DataKey>, KeyVaultError> {
        let mut versions: Vec<VersionEntry> = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0;
        loop {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(KeyVaultError::InvalidResponse(
                    "version listing did not terminate".into(),
                ));
            }
            let mut body = json!({ "SecretId": key_id, "IncludeDeprecated": true });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }
            let page: ListVersionsResponse =
                self.call("ListSecretVersionIds", &body, Some(key_id))?;
            versions.extend(page.versions);
            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        if versions.is_empty() {
            return Err(KeyVaultError::not_found(key_id));
        }
        versions.sort_by(|a, b| {
            b.created_date
                .partial_cmp(&a.created_date)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        readable_versions(
            self.name(),
            key_id,
            versions.iter().map(|v| {
                let version = v.version_id.as_str();
                (version, self.get_secret(key_id, Some(version)))
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn provider(server: &Server) -> AwsSecretsProvider {
        AwsSecretsProvider::new(
            AwsSettings {
                region: "us-east-1".into(),
                endpoint: Some(server.url()),
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn b64(bytes: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    fn target(op: &str) -> (&'static str, String) {
        ("x-amz-target", format!("secretsmanager.{}", op))
    }

    #[test]
    fn default_endpoint_uses_region() {
        let p = AwsSecretsProvider::new(
            AwsSettings {
                region: "eu-central-1".into(),
                endpoint: None,
                access_key_id: "a".into(),
                secret_access_key: "b".into(),
                session_token: None,
            },
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(p.host, "secretsmanager.eu-central-1.amazonaws.com");
    }

    #[test]
    fn get_key_signs_and_decodes() {
        let mut server = Server::new();
        let (h, op) = target("GetSecretValue");
        let mock = server
            .mock("POST", "/")
            .match_header(h, op.as_str())
            .match_header("content-type", CONTENT_TYPE)
            .match_header(
                "authorization",
                Matcher::Regex(
                    r"^AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/\d{8}/us-east-1/secretsmanager/aws4_request, SignedHeaders=content-type;host;x-amz-date;x-amz-target, Signature=[0-9a-f]{64}$".into(),
                ),
            )
            .match_body(Matcher::Json(json!({"SecretId": "default"})))
            .with_body(
                json!({
                    "Name": "default",
                    "SecretString": b64(&[9u8; 32]),
                    "VersionId": "v-1",
                })
                .to_string(),
            )
            .create();

        let key = provider(&server).get_key("default").unwrap();
        mock.assert();
        assert_eq!(key.expose_secret(), &[9u8; 32]);
        assert_eq!(key.version(), Some("v-1"));
    }

    #[test]
    fn resource_not_found_maps_to_key_not_found() {
        let mut server = Server::new();
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                r#"{"__type":"ResourceNotFoundException","message":"Secrets Manager can't find the specified secret."}"#,
            )
            .create();

        let err = provider(&server).get_key("nope").unwrap_err();
        assert!(matches!(err, KeyVaultError::KeyNotFound { key_id } if key_id == "nope"));
    }

    #[test]
    fn bad_signature_maps_to_unauthorized() {
        let mut server = Server::new();
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"__type":"com.amazonaws.secretsmanager#InvalidSignatureException","Message":"bad"}"#)
            .create();

        let err = provider(&server).get_key("default").unwrap_err();
        assert!(matches!(err, KeyVaultError::Unauthorized(_)));
    }

    #[test]
    fn create_falls_back_to_put_when_secret_exists() {
        let mut server = Server::new();
        let (h, create) = target("CreateSecret");
        let create_mock = server
            .mock("POST", "/")
            .match_header(h, create.as_str())
            .with_status(400)
            .with_body(r#"{"__type":"ResourceExistsException","message":"exists"}"#)
            .create();
        let (h, put) = target("PutSecretValue");
        let put_mock = server
            .mock("POST", "/")
            .match_header(h, put.as_str())
            .with_body(r#"{"Name":"default","VersionId":"v-2","VersionStages":["AWSCURRENT"]}"#)
            .create();

        let key = provider(&server).create_key("default", 32).unwrap();
        create_mock.assert();
        put_mock.assert();
        assert_eq!(key.version(), Some("v-2"));
    }

    #[test]
    fn rotate_returns_version_id() {
        let mut server = Server::new();
        let (h, put) = target("PutSecretValue");
        server
            .mock("POST", "/")
            .match_header(h, put.as_str())
            .match_body(Matcher::Regex(r#""SecretString":"[A-Za-z0-9+/]{43}=""#.into()))
            .with_body(r#"{"VersionId":"v-3"}"#)
            .create();

        let (key, version) = provider(&server).rotate_key("default").unwrap();
        assert_eq!(version, "v-3");
        assert_eq!(key.version(), Some("v-3"));
    }

    #[test]
    fn list_keys_paginates() {
        let mut server = Server::new();
        let (h, list) = target("ListSecrets");
        server
            .mock("POST", "/")
            .match_header(h, list.as_str())
            .match_body(Matcher::Json(json!({"MaxResults": 100})))
            .with_body(
                json!({
                    "SecretList": [{"Name": "default", "ARN": "arn:aws:secretsmanager:us-east-1:1:secret:default", "CreatedDate": 1.7e9}],
                    "NextToken": "page2",
                })
                .to_string(),
            )
            .create();
        server
            .mock("POST", "/")
            .match_header(h, list.as_str())
            .match_body(Matcher::Json(json!({"MaxResults": 100, "NextToken": "page2"})))
            .with_body(json!({"SecretList": [{"Name": "patients"}]}).to_string())
            .create();

        let keys = provider(&server).list_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys["default"].extra["arn"].ends_with(":default"));
        assert!(keys["default"].created.is_some());
        assert_eq!(keys["patients"].status, "enabled");
    }

    #[test]
    fn key_versions_newest_first() {
        let mut server = Server::new();
        let (h, list) = target("ListSecretVersionIds");
        server
            .mock("POST", "/")
            .match_header(h, list.as_str())
            .with_body(
                json!({
                    "Versions": [
                        {"VersionId": "old", "CreatedDate": 100.0},
                        {"VersionId": "new", "CreatedDate": 200.0},
                    ]
                })
                .to_string(),
            )
            .create();
        let (h, get) = target("GetSecretValue");
        for (version, byte) in [("old", 1u8), ("new", 2u8)] {
            server
                .mock("POST", "/")
                .match_header(h, get.as_str())
                .match_body(Matcher::Json(json!({"SecretId": "default", "VersionId": version})))
                .with_body(
                    json!({"SecretString": b64(&[byte; 32]), "VersionId": version}).to_string(),
                )
                .create();
        }

        let versions = provider(&server).key_versions("default").unwrap();
        let labels: Vec<_> = versions.iter().map(|k| k.version().unwrap()).collect();
        assert_eq!(labels, vec!["new", "old"]);
    }

    #[test]
    fn key_versions_skip_deleted_version() {
        let mut server = Server::new();
        let (h, list) = target("ListSecretVersionIds");
        server
            .mock("POST", "/")
            .match_header(h, list.as_str())
            .with_body(
                json!({
                    "Versions": [
                        {"VersionId": "gone", "CreatedDate": 100.0},
                        {"VersionId": "current", "CreatedDate": 200.0},
                    ]
                })
                .to_string(),
            )
            .create();
        let (h, get) = target("GetSecretValue");
        server
            .mock("POST", "/")
            .match_header(h, get.as_str())
            .match_body(Matcher::Json(json!({"SecretId": "default", "VersionId": "current"})))
            .with_body(json!({"SecretString": b64(&[4u8; 32]), "VersionId": "current"}).to_string())
            .create();
        server
            .mock("POST", "/")
            .match_header(h, get.as_str())
            .match_body(Matcher::Json(json!({"SecretId": "default", "VersionId": "gone"})))
            .with_status(400)
            .with_body(r#"{"__type":"ResourceNotFoundException","message":"version not found"}"#)
            .create();

        let versions = provider(&server).key_versions("default").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version(), Some("current"));
        assert_eq!(versions[0].expose_secret(), &[4u8; 32]);
    }
}
