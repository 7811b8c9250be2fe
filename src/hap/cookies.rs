//! Cookie-packing middleware.
//!
//! The platform passes at most one `Set-Cookie` header back to the client.
//! [`CookieMiddleware`] keeps every cookie the application sets in a
//! [`CookieJar`] that travels as a single packed cookie named
//! [`PACKED_COOKIE_NAME`]:
//!
//! - On request, the packed cookie is unpacked, expired entries are dropped
//!   and the rest are presented to the application as ordinary cookies.
//! - On response, every `Set-Cookie` the application emitted is merged into
//!   the jar (last writer wins) and the jar goes back out as the only
//!   `Set-Cookie`. It expires with its earliest-expiring entry, or at the
//!   end of the session if any entry is a session cookie.
//!
//! The packed value is URL-safe base64 of a JSON object
//! `{"name": {"value": "...", "expires": <epoch seconds>}}`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::middleware::{HapContext, HapMiddleware};
use super::{HapRequest, HapResponse};
use crate::error::{Error, Result};

/// Reserved name of the packed cookie.
pub const PACKED_COOKIE_NAME: &str = "__hap";

/// HTTP date format used in `Expires` attributes.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Legacy `Expires` spellings still seen in the wild.
const LEGACY_DATES: [&str; 3] = [
    "%a, %d-%b-%Y %H:%M:%S GMT",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<i64>,
}

/// Cookies carried inside the packed cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: BTreeMap<String, Entry>,
}

impl CookieJar {
    /// Creates an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `name`, replacing any previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        expires: Option<DateTime<Utc>>,
    ) {
        self.entries.insert(
            name.into(),
            Entry {
                value: value.into(),
                expires: expires.map(|at| at.timestamp()),
            },
        );
    }

    /// Value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.value.as_str())
    }

    /// Expiry of `name`, `None` for session cookies and unknown names.
    pub fn expires(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(name)
            .and_then(|e| e.expires)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// Removes `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Number of cookies held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the jar holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.value.as_str()))
    }

    /// Drops every entry whose expiry is at or before `now`.
    pub fn filter_expired(&mut self, now: DateTime<Utc>) {
        let now = now.timestamp();
        self.entries
            .retain(|_, entry| entry.expires.map_or(true, |at| at > now));
    }

    /// Expiry of the packed cookie: the earliest entry expiry, or `None`
    /// (session only) when any entry has none or the jar is empty.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        let mut earliest: Option<i64> = None;
        for entry in self.entries.values() {
            let at = entry.expires?;
            earliest = Some(earliest.map_or(at, |e| e.min(at)));
        }
        earliest.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// Merges one `Set-Cookie` header value.
    ///
    /// A cookie whose computed expiry is not after `now` deletes the entry.
    /// `Max-Age` takes precedence over `Expires`. Path and domain
    /// attributes are not tracked.
    pub fn merge_set_cookie(&mut self, header: &str, now: DateTime<Utc>) {
        let Some(cookie) = parse_set_cookie(header, now) else {
            tracing::warn!(header, "ignoring unparseable Set-Cookie");
            return;
        };
        if cookie.expires.is_some_and(|at| at <= now) {
            self.entries.remove(&cookie.name);
        } else {
            self.insert(cookie.name, cookie.value, cookie.expires);
        }
    }

    /// Encodes the jar as the packed cookie value.
    pub fn pack(&self) -> Result<String> {
        let json = serde_json::to_vec(&self.entries)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodes a packed cookie value.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEvent`] when the value is not a packed jar.
    pub fn unpack(packed: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(packed.trim_end_matches('='))
            .map_err(|e| Error::InvalidEvent(format!("packed cookie is not base64: {e}")))?;
        let entries = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidEvent(format!("packed cookie is not a jar: {e}")))?;
        Ok(Self { entries })
    }
}

/// One parsed `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Absolute expiry computed from `Max-Age` or `Expires`.
    pub expires: Option<DateTime<Utc>>,
}

/// Parses a `Set-Cookie` value, resolving `Max-Age` against `now`.
pub fn parse_set_cookie(header: &str, now: DateTime<Utc>) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut max_age = None;
    let mut expires = None;
    for attribute in parts {
        let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
        match key.trim().to_ascii_lowercase().as_str() {
            "max-age" => {
                max_age = val
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .map(|secs| now + chrono::Duration::seconds(secs));
            },
            "expires" => expires = parse_http_date(val.trim()),
            _ => {},
        }
    }

    Some(SetCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        expires: max_age.or(expires),
    })
}

/// Parses an `Expires` attribute.
pub fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(text) {
        return Some(at.with_timezone(&Utc));
    }
    LEGACY_DATES.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|naive| naive.and_utc())
    })
}

/// Formats `at` for an `Expires` attribute.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE).to_string()
}

/// Splits a `Cookie` request header into `(name, value)` pairs.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Jar unpacked from the request, kept for the response pass.
#[derive(Debug, Clone)]
struct InboundJar {
    jar: CookieJar,
    was_present: bool,
}

/// Packs all application cookies into one.
#[derive(Debug, Clone, Default)]
pub struct CookieMiddleware;

impl CookieMiddleware {
    /// Creates the middleware.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HapMiddleware for CookieMiddleware {
    async fn on_request(&self, request: &mut HapRequest, context: &mut HapContext) -> Result<()> {
        let mut plain = Vec::new();
        let mut inbound = InboundJar {
            jar: CookieJar::new(),
            was_present: false,
        };
        if let Some(header) = request.headers.get("Cookie") {
            for (name, value) in parse_cookie_header(header) {
                if name != PACKED_COOKIE_NAME {
                    plain.push((name, value));
                    continue;
                }
                inbound.was_present = true;
                match CookieJar::unpack(&value) {
                    Ok(jar) => inbound.jar = jar,
                    Err(e) => tracing::warn!(error = %e, "discarding unreadable packed cookie"),
                }
            }
        }
        inbound.jar.filter_expired(Utc::now());

        plain.retain(|(name, _)| inbound.jar.get(name).is_none());
        let cookies: Vec<String> = plain
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .chain(inbound.jar.iter())
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if cookies.is_empty() {
            request.headers.remove("Cookie");
        } else {
            request.headers.insert("Cookie", cookies.join("; "));
        }

        context.extensions.insert(inbound);
        Ok(())
    }

    async fn on_response(&self, response: &mut HapResponse, context: &mut HapContext) -> Result<()> {
        let set_cookies = response.headers.remove("Set-Cookie");
        if set_cookies.is_empty() {
            return Ok(());
        }

        let inbound = context.extensions.remove::<InboundJar>();
        let was_present = inbound.as_ref().is_some_and(|i| i.was_present);
        let mut jar = inbound.map(|i| i.jar).unwrap_or_default();
        let now = Utc::now();
        for header in &set_cookies {
            jar.merge_set_cookie(header, now);
        }
        jar.filter_expired(now);

        if jar.is_empty() {
            if was_present {
                response.headers.insert(
                    "Set-Cookie",
                    format!("{PACKED_COOKIE_NAME}=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0"),
                );
            }
            return Ok(());
        }

        let mut cookie = format!("{PACKED_COOKIE_NAME}={}; Path=/", jar.pack()?);
        if let Some(expiry) = jar.expiry() {
            cookie.push_str("; Expires=");
            cookie.push_str(&format_http_date(expiry));
        }
        response.headers.insert("Set-Cookie", cookie);
        Ok(())
    }

    fn priority(&self) -> i32 {
        90
    }
}
