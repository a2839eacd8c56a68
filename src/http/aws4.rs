//! AWS Signature Version 4 for outbound requests.
//!
//! The region and service are recovered from the `Host` header, which must
//! split into at least five dot-separated labels: the second label is the
//! region and the third the service (`bucket.us-west-2.s3.amazonaws.com`).
//! Only `host` and `x-amz-date` are signed.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::http::message::HttpMessage;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-date";
const TERMINATOR: &str = "aws4_request";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("request has no host header")]
    MissingHost,

    #[error("host {0:?} does not carry region and service labels")]
    MalformedHost(String),

    #[error("invalid signing key")]
    InvalidKey,
}

/// `date/region/service/aws4_request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub date: String,
    pub region: String,
    pub service: String,
}

impl CredentialScope {
    pub fn from_host(host: &str, now: DateTime<Utc>) -> Result<Self, SigningError> {
        let name = host.split(':').next().unwrap_or(host);
        let labels: Vec<&str> = name.split('.').collect();
        if labels.len() < 5 {
            return Err(SigningError::MalformedHost(host.to_string()));
        }
        Ok(Self {
            date: now.format("%Y%m%d").to_string(),
            region: labels[1].to_string(),
            service: labels[2].to_string(),
        })
    }
}

impl std::fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.date, self.region, self.service, TERMINATOR)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], SigningError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::InvalidKey)?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn canonical_query(query: &str) -> String {
    let mut params: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| if p.contains('=') { p.to_string() } else { format!("{}=", p) })
        .collect();
    params.sort();
    params.join("&")
}

/// The canonical request string for `msg` as signed at `full_date`.
pub fn canonical_request(msg: &HttpMessage, host: &str, full_date: &str) -> String {
    let (uri, query) = match msg.path().split_once('?') {
        Some((uri, query)) => (uri, canonical_query(query)),
        None => (msg.path(), String::new()),
    };
    let uri = if uri.is_empty() { "/" } else { uri };

    format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-date:{}\n\n{}\n{}",
        msg.method().as_str(),
        uri,
        query,
        host,
        full_date,
        SIGNED_HEADERS,
        sha256_hex(msg.body())
    )
}

pub fn string_to_sign(full_date: &str, scope: &CredentialScope, canonical: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        full_date,
        scope,
        sha256_hex(canonical.as_bytes())
    )
}

pub fn signing_key(secret_key: &str, scope: &CredentialScope) -> Result<[u8; 32], SigningError> {
    let date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), scope.date.as_bytes())?;
    let region = hmac_sha256(&date, scope.region.as_bytes())?;
    let service = hmac_sha256(&region, scope.service.as_bytes())?;
    hmac_sha256(&service, TERMINATOR.as_bytes())
}

impl HttpMessage {
    /// Signs the request with the current time and adds `Authorization`,
    /// `x-amz-date` and, when given, `x-amz-security-token`.
    pub fn generate_aws4_auth(
        &mut self,
        access_key: &str,
        secret_key: &str,
        session_token: Option<&str>,
    ) -> Result<(), SigningError> {
        self.sign_aws4_at(access_key, secret_key, session_token, Utc::now())
    }

    /// Like [`HttpMessage::generate_aws4_auth`] with an explicit clock.
    pub fn sign_aws4_at(
        &mut self,
        access_key: &str,
        secret_key: &str,
        session_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        let host = self.header("host").ok_or(SigningError::MissingHost)?.to_string();
        let scope = CredentialScope::from_host(&host, now)?;
        let full_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical = canonical_request(self, &host, &full_date);
        let to_sign = string_to_sign(&full_date, &scope, &canonical);
        let key = signing_key(secret_key, &scope)?;
        let signature = hex::encode(hmac_sha256(&key, to_sign.as_bytes())?);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, access_key, scope, SIGNED_HEADERS, signature
        );

        tracing::trace!(region = %scope.region, service = %scope.service, "signed request");

        self.push_header("x-amz-date", &full_date);
        self.push_header("Authorization", &authorization);
        if let Some(token) = session_token {
            self.push_header("x-amz-security-token", token);
        }
        Ok(())
    }
}
