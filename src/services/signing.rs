//! TC3-HMAC-SHA256 request signing for Tencent Cloud APIs.

use chrono::DateTime;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::services::providers::ProviderError;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "TC3-HMAC-SHA256";
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host";

#[derive(Debug, Clone)]
pub struct SigningInput<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
    pub service: &'a str,
    pub host: &'a str,
    pub payload: &'a str,
    /// Unix seconds; also sent as `X-TC-Timestamp`.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub authorization: String,
    pub date: String,
    pub signature: String,
}

pub fn sign(input: &SigningInput<'_>) -> Result<Signature, ProviderError> {
    let date = DateTime::from_timestamp(input.timestamp, 0)
        .ok_or_else(|| ProviderError::Signing(format!("timestamp {} out of range", input.timestamp)))?
        .format("%Y-%m-%d")
        .to_string();

    let canonical_request = canonical_request(input.host, input.payload);
    let scope = format!("{date}/{}/tc3_request", input.service);
    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        input.timestamp,
        sha256_hex(canonical_request.as_bytes())
    );

    let secret_date = hmac_sha256(format!("TC3{}", input.secret_key).as_bytes(), date.as_bytes())?;
    let secret_service = hmac_sha256(&secret_date, input.service.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        input.secret_id
    );

    Ok(Signature {
        authorization,
        date,
        signature,
    })
}

fn canonical_request(host: &str, payload: &str) -> String {
    let canonical_headers = format!("content-type:{CONTENT_TYPE}\nhost:{host}\n");
    format!(
        "POST\n/\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{}",
        sha256_hex(payload.as_bytes())
    )
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ProviderError::Signing(e.to_string()))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}
