//! AWS Signature Version 4 signing for managed OpenSearch domains.
//!
//! Credentials come from the ambient AWS chain (environment, profile, web
//! identity, container or instance role) via `aws-config`, resolved lazily on
//! the first signed request and refreshed by the provider as they expire.

use crate::error::{SearchError, SearchResult};
use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Signs requests for one region and service (`es` or `aoss`)
pub(crate) struct SigV4Signer {
    region: String,
    service: String,
    provider: OnceCell<SharedCredentialsProvider>,
}

/// Credentials used for a single signature
pub(crate) struct SigningCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl SigV4Signer {
    pub(crate) fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
            provider: OnceCell::new(),
        }
    }

    async fn credentials(&self) -> SearchResult<SigningCredentials> {
        let provider = self
            .provider
            .get_or_try_init(|| async {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(self.region.clone()))
                    .load()
                    .await;
                sdk_config.credentials_provider().ok_or_else(|| {
                    SearchError::Auth("no AWS credentials provider available".to_string())
                })
            })
            .await?;

        let creds = provider
            .provide_credentials()
            .await
            .map_err(|e| SearchError::Auth(format!("failed to resolve AWS credentials: {e}")))?;

        Ok(SigningCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
        })
    }

    /// Headers to attach to the request
    pub(crate) async fn sign(
        &self,
        method: &str,
        url: &Url,
        body: &[u8],
    ) -> SearchResult<Vec<(&'static str, String)>> {
        let creds = self.credentials().await?;
        sign_request(
            &creds,
            &self.region,
            &self.service,
            method,
            url,
            body,
            Utc::now(),
        )
    }
}

/// Compute SigV4 headers for a request at `now`
pub(crate) fn sign_request(
    creds: &SigningCredentials,
    region: &str,
    service: &str,
    method: &str,
    url: &Url,
    body: &[u8],
    now: DateTime<Utc>,
) -> SearchResult<Vec<(&'static str, String)>> {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(SearchError::Config(format!("endpoint has no host: {url}"))),
    };

    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(body);

    let canonical_uri = canonical_uri(url);
    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    query.sort();
    let canonical_query = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut headers = vec![
        ("host", host),
        ("x-amz-content-sha256", payload_hash.clone()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );

    let credential_scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, service)?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    );

    let mut out = vec![
        ("authorization", authorization),
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash),
    ];
    if let Some(token) = &creds.session_token {
        out.push(("x-amz-security-token", token.clone()));
    }
    Ok(out)
}

/// Path segments encoded once more on top of the URL's own encoding, as
/// required for every service except S3
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    path.split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/")
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> SearchResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SearchError::Auth(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> SearchResult<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char)
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}
