//! Expiry extraction for SigV4 presigned URLs.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use url::Url;

/// Validity information carried in a presigned URL's query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrlInfo {
    /// When the URL was signed (X-Amz-Date)
    pub signed_at: DateTime<Utc>,
    /// Validity duration in seconds (X-Amz-Expires)
    pub expires_in_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

impl PresignedUrlInfo {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Returns `None` when the URL is unparsable or carries no SigV4 validity parameters.
pub fn parse_presigned_url(raw: &str) -> Option<PresignedUrlInfo> {
    let url = Url::parse(raw).ok()?;

    let mut amz_date = None;
    let mut amz_expires = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "X-Amz-Date" => amz_date = Some(value.into_owned()),
            "X-Amz-Expires" => amz_expires = Some(value.into_owned()),
            _ => {}
        }
    }

    let signed_at = parse_amz_date(&amz_date?)?;
    let expires_in_seconds: i64 = amz_expires?.parse().ok()?;
    let expires_at = signed_at + chrono::Duration::seconds(expires_in_seconds);

    Some(PresignedUrlInfo {
        signed_at,
        expires_in_seconds,
        expires_at,
    })
}

/// Parse the ISO 8601 basic format used by X-Amz-Date ("20240115T120000Z").
fn parse_amz_date(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}
