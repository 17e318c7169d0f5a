use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature method identifier carried in the authorization header.
pub const SIGNATURE_METHOD_ID: &str = "CTN1-HMAC-SHA256";
/// Prefix prepended to the API access secret when deriving the date key.
pub const SIGNATURE_KEY_PREFIX: &str = "CTN1";
/// Scope terminating the credential and scoping the derived signing key.
pub const REQUEST_SCOPE: &str = "ctn1_request";

/// Compact ISO-8601 basic format of the x-bcot-timestamp header (UTC).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
/// Format of the sign date embedded in the credential.
pub const SIGN_DATE_FORMAT: &str = "%Y%m%d";

/// Maximum allowed difference between the request timestamp and the wall
/// clock, in seconds.
pub const ALLOWED_TIMESTAMP_SKEW_SECS: i64 = 300;
/// Number of days, starting at the sign date, during which a signature is
/// accepted.
pub const SIGN_DATE_VALID_DAYS: i64 = 7;

const DEVICE_ID_LENGTH: usize = 20;
const SIGN_DATE_LENGTH: usize = 8;
const SIGNATURE_LENGTH: usize = 64;

/// Ways the authentication headers of a request can fail to parse. Every
/// kind maps to a 401 response carrying its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthParseError {
    #[error("Authorization failed; missing required HTTP headers")]
    MissingHeaders,
    #[error("Authorization failed; timestamp not well formed")]
    MalformedTimestamp,
    #[error("Authorization failed; timestamp not within acceptable time variation")]
    TimestampOutOfBounds,
    #[error("Authorization failed; authorization value not well formed")]
    MalformedAuthHeader,
    #[error("Authorization failed; authorization sign date not well formed")]
    MalformedSignDate,
    #[error("Authorization failed; authorization sign date out of bounds")]
    SignDateOutOfBounds,
}

/// Values extracted from a request's authentication headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    /// Device the request claims to originate from
    pub device_id: String,
    /// Sign date exactly as it appears in the credential (YYYYMMDD)
    pub sign_date: String,
    /// Timestamp header value, verbatim
    pub timestamp: String,
    /// Lowercase hex signature claimed by the client
    pub signature: String,
}

/// Parse and validate the authentication header values of a request.
///
/// `timestamp` and `authorization` are the raw header values (absent
/// headers are `None`); `host` is the value of the host header. `now` is
/// injected so the time windows can be pinned in tests.
pub fn parse_auth_data(
    timestamp: Option<&str>,
    authorization: Option<&str>,
    host: &str,
    now: DateTime<Utc>,
) -> Result<AuthData, AuthParseError> {
    let timestamp = timestamp.ok_or(AuthParseError::MissingHeaders)?;
    let authorization = authorization.ok_or(AuthParseError::MissingHeaders)?;
    if host.is_empty() {
        return Err(AuthParseError::MissingHeaders);
    }

    let parsed_timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|_| AuthParseError::MalformedTimestamp)?
        .and_utc();
    if (now - parsed_timestamp).num_seconds().abs() > ALLOWED_TIMESTAMP_SKEW_SECS {
        return Err(AuthParseError::TimestampOutOfBounds);
    }

    let (device_id, sign_date, signature) =
        split_authorization(authorization).ok_or(AuthParseError::MalformedAuthHeader)?;

    let parsed_sign_date = NaiveDate::parse_from_str(&sign_date, SIGN_DATE_FORMAT)
        .map_err(|_| AuthParseError::MalformedSignDate)?;
    let today = now.date_naive();
    if today < parsed_sign_date
        || today >= parsed_sign_date + Duration::days(SIGN_DATE_VALID_DAYS)
    {
        return Err(AuthParseError::SignDateOutOfBounds);
    }

    Ok(AuthData {
        device_id,
        sign_date,
        timestamp: timestamp.to_string(),
        signature,
    })
}

/// Split an authorization header of the form
/// `CTN1-HMAC-SHA256 Credential=<deviceId>/<signDate>/ctn1_request, Signature=<hex64>`
/// into its device ID, sign date and signature. The `Credential` and
/// `Signature` keywords are matched case-insensitively.
fn split_authorization(value: &str) -> Option<(String, String, String)> {
    let rest = value.strip_prefix(SIGNATURE_METHOD_ID)?.strip_prefix(' ')?;
    let (credential_part, signature_part) = rest.split_once(',')?;

    let (credential_key, credential) = credential_part.split_once('=')?;
    if !credential_key.eq_ignore_ascii_case("credential") {
        return None;
    }

    let (signature_key, signature) = signature_part.trim_start().split_once('=')?;
    if !signature_key.eq_ignore_ascii_case("signature") {
        return None;
    }

    let mut fields = credential.split('/');
    let device_id = fields.next()?;
    let sign_date = fields.next()?;
    let scope = fields.next()?;
    if fields.next().is_some() || scope != REQUEST_SCOPE {
        return None;
    }

    if device_id.len() != DEVICE_ID_LENGTH
        || !device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    if sign_date.len() != SIGN_DATE_LENGTH || !sign_date.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if signature.len() != SIGNATURE_LENGTH
        || !signature.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }

    Some((
        device_id.to_string(),
        sign_date.to_string(),
        signature.to_string(),
    ))
}

/// Recompute the signature of a request.
///
/// The canonicalization runs in four steps: the conformed request (method,
/// raw URL, essential headers and body digest), the string to sign, the
/// derived signing key (date key, then request-scoped key) and the final
/// HMAC, returned as lowercase hex.
pub fn sign_request(
    api_access_secret: &str,
    sign_date: &str,
    timestamp: &str,
    method: &str,
    raw_url: &str,
    host: &str,
    body: &[u8],
) -> String {
    let conformed_request = format!(
        "{}\n{}\nhost:{}\nx-bcot-timestamp:{}\n{}\n",
        method,
        raw_url,
        host,
        timestamp,
        hex::encode(Sha256::digest(body)),
    );

    let string_to_sign = format!(
        "{}\n{}\n{}/{}\n{}\n",
        SIGNATURE_METHOD_ID,
        timestamp,
        sign_date,
        REQUEST_SCOPE,
        hex::encode(Sha256::digest(conformed_request.as_bytes())),
    );

    let date_key = hmac_sha256(
        format!("{}{}", SIGNATURE_KEY_PREFIX, api_access_secret).as_bytes(),
        sign_date.as_bytes(),
    );
    let sign_key = hmac_sha256(&date_key, REQUEST_SCOPE.as_bytes());

    hex::encode(hmac_sha256(&sign_key, string_to_sign.as_bytes()))
}

/// Format a timestamp the way the x-bcot-timestamp header carries it.
pub fn format_timestamp(moment: DateTime<Utc>) -> String {
    moment.format(TIMESTAMP_FORMAT).to_string()
}

/// Format a date the way the credential's sign date carries it.
pub fn format_sign_date(moment: DateTime<Utc>) -> String {
    moment.format(SIGN_DATE_FORMAT).to_string()
}

/// Assemble the authorization header value for the given credential parts.
pub fn format_authorization(device_id: &str, sign_date: &str, signature: &str) -> String {
    format!(
        "{} Credential={}/{}/{}, Signature={}",
        SIGNATURE_METHOD_ID, device_id, sign_date, REQUEST_SCOPE, signature
    )
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}
