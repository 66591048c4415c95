//! Signature Version 4 request signing.
//!
//! The hosted platform authenticates every REST call with an HMAC-SHA256
//! signature over a canonical form of the request. Paths handed to the
//! signer are the wire paths (segments already percent-encoded once); the
//! canonical URI encodes them a second time as the scheme requires for
//! non-storage services.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::util::hash::hash_bytes;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Static access credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
  pub access_key_id: String,
  pub secret_access_key: String,
  pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("access_key_id", &self.access_key_id)
      .field("secret_access_key", &"<redacted>")
      .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
      .finish()
  }
}

impl Credentials {
  pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
    Self {
      access_key_id: access_key_id.into(),
      secret_access_key: secret_access_key.into(),
      session_token: None,
    }
  }

  /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`.
  pub fn from_env() -> Option<Self> {
    let access_key_id = non_empty_env("AWS_ACCESS_KEY_ID")?;
    let secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY")?;
    Some(Self {
      access_key_id,
      secret_access_key,
      session_token: non_empty_env("AWS_SESSION_TOKEN"),
    })
  }
}

fn non_empty_env(key: &str) -> Option<String> {
  std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// The parts of a request covered by the signature.
#[derive(Debug)]
pub struct SigningRequest<'a> {
  pub method: &'a str,
  /// Wire path, segments percent-encoded once.
  pub path: &'a str,
  pub query: &'a [(String, String)],
  /// Lowercase header names to sign. Must include `host` and `x-amz-date`.
  pub headers: &'a BTreeMap<String, String>,
  /// Hex SHA-256 of the body.
  pub payload_hash: &'a str,
}

/// Percent-encode everything outside the unreserved set.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
  let mut out = String::with_capacity(input.len());
  for byte in input.bytes() {
    match byte {
      b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
      b'/' if !encode_slash => out.push('/'),
      _ => out.push_str(&format!("%{:02X}", byte)),
    }
  }
  out
}

/// Encoded query string in canonical (sorted) order.
pub fn canonical_query(query: &[(String, String)]) -> String {
  let mut pairs: Vec<(String, String)> = query
    .iter()
    .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
    .collect();
  pairs.sort();
  pairs
    .into_iter()
    .map(|(k, v)| format!("{}={}", k, v))
    .collect::<Vec<_>>()
    .join("&")
}

fn canonical_uri(path: &str) -> String {
  if path.is_empty() {
    return "/".to_string();
  }
  path.split('/').map(|seg| uri_encode(seg, true)).collect::<Vec<_>>().join("/")
}

pub fn canonical_request(req: &SigningRequest<'_>) -> String {
  let canonical_headers: String = req
    .headers
    .iter()
    .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
    .collect();
  let signed_headers = signed_headers(req.headers);

  format!(
    "{}\n{}\n{}\n{}\n{}\n{}",
    req.method,
    canonical_uri(req.path),
    canonical_query(req.query),
    canonical_headers,
    signed_headers,
    req.payload_hash
  )
}

fn signed_headers(headers: &BTreeMap<String, String>) -> String {
  headers.keys().cloned().collect::<Vec<_>>().join(";")
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
  let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
  mac.update(data.as_bytes());
  mac.finalize().into_bytes().to_vec()
}

pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
  let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date);
  let k_region = hmac(&k_date, region);
  let k_service = hmac(&k_region, service);
  hmac(&k_service, "aws4_request")
}

/// Compute the `Authorization` header value.
///
/// `amz_date` is the `x-amz-date` timestamp (`YYYYMMDD'T'HHMMSS'Z'`).
pub fn authorization(
  credentials: &Credentials,
  region: &str,
  service: &str,
  amz_date: &str,
  req: &SigningRequest<'_>,
) -> String {
  let date = &amz_date[..8.min(amz_date.len())];
  let scope = format!("{}/{}/{}/aws4_request", date, region, service);

  let canonical = canonical_request(req);
  let string_to_sign = format!(
    "{}\n{}\n{}\n{}",
    ALGORITHM,
    amz_date,
    scope,
    hash_bytes(canonical.as_bytes())
  );

  let key = signing_key(&credentials.secret_access_key, date, region, service);
  let signature = hex::encode(hmac(&key, &string_to_sign));

  format!(
    "{} Credential={}/{}, SignedHeaders={}, Signature={}",
    ALGORITHM,
    credentials.access_key_id,
    scope,
    signed_headers(req.headers),
    signature
  )
}
