//! Cookie jar backend with browser-like attribute handling.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConsentConfig;
use crate::error::{Error, Result};

use super::StorageBackend;

const BACKEND_NAME: &str = "cookie";

/// Attributes attached to every cookie the jar writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieOptions {
    /// `Max-Age` in seconds, `None` for a session cookie
    pub max_age_secs: Option<u64>,
    /// Add the `Secure` flag (page served over https)
    pub secure: bool,
}

impl CookieOptions {
    #[must_use]
    pub const fn from_config(config: &ConsentConfig, secure_origin: bool) -> Self {
        Self {
            max_age_secs: Some(config.cookie_max_age_secs()),
            secure: secure_origin,
        }
    }
}

/// Build the `document.cookie` assignment for a value.
///
/// `<name>=<url-encoded value>; path=/; SameSite=Lax[; Secure][; Max-Age=N]`
pub fn encode_set_cookie(name: &str, value: &str, options: CookieOptions) -> String {
    let mut parts = vec![
        format!("{name}={}", urlencoding::encode(value)),
        "path=/".to_string(),
        "SameSite=Lax".to_string(),
    ];
    if options.secure {
        parts.push("Secure".to_string());
    }
    if let Some(max_age) = options.max_age_secs.filter(|secs| *secs > 0) {
        parts.push(format!("Max-Age={max_age}"));
    }
    parts.join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCookie {
    /// Raw (still url-encoded) value
    value: String,
    path: String,
    #[serde(default)]
    same_site: Option<String>,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Cookie storage for a single origin.
///
/// Values go in through `Set-Cookie` style lines and come out through the
/// `name=value; name=value` string a page sees in `document.cookie`.
#[derive(Debug)]
pub struct CookieJar {
    cookies: RefCell<BTreeMap<String, StoredCookie>>,
    path: Option<PathBuf>,
    options: CookieOptions,
    enabled: Cell<bool>,
}

impl CookieJar {
    pub fn in_memory(options: CookieOptions) -> Self {
        Self {
            cookies: RefCell::new(BTreeMap::new()),
            path: None,
            options,
            enabled: Cell::new(true),
        }
    }

    /// Jar mirrored to a JSON file, loading existing cookies when present
    pub fn open(path: impl Into<PathBuf>, options: CookieOptions) -> Result<Self> {
        let path = path.into();
        let cookies = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            cookies: RefCell::new(cookies),
            path: Some(path),
            options,
            enabled: Cell::new(true),
        })
    }

    /// Block or allow cookies for this origin
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub const fn options(&self) -> CookieOptions {
        self.options
    }

    /// Apply a `Set-Cookie` style line as of `now`.
    ///
    /// `Max-Age` of zero or less deletes the cookie. A `Secure` cookie is
    /// refused when the jar belongs to an insecure origin.
    pub fn apply_set_cookie(&self, line: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_enabled()?;

        let mut segments = line.split(';').map(str::trim);
        let (name, value) = segments
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(name, value)| (name.trim(), value.trim()))
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| Error::Storage(format!("malformed cookie line: {line}")))?;

        let mut cookie = StoredCookie {
            value: value.to_string(),
            path: "/".to_string(),
            same_site: None,
            secure: false,
            expires_at: None,
        };
        let mut delete = false;

        for segment in segments.filter(|segment| !segment.is_empty()) {
            let (attribute, argument) = segment.split_once('=').unwrap_or((segment, ""));
            match attribute.trim().to_ascii_lowercase().as_str() {
                "path" => cookie.path = argument.trim().to_string(),
                "samesite" => cookie.same_site = Some(argument.trim().to_string()),
                "secure" => cookie.secure = true,
                "max-age" => {
                    let seconds: i64 = argument.trim().parse().map_err(|_| {
                        Error::Storage(format!("invalid Max-Age in cookie line: {line}"))
                    })?;
                    if seconds <= 0 {
                        delete = true;
                    } else {
                        let expires_at = Duration::try_seconds(seconds)
                            .and_then(|lifetime| now.checked_add_signed(lifetime))
                            .ok_or_else(|| {
                                Error::Storage(format!("Max-Age out of range in cookie line: {line}"))
                            })?;
                        cookie.expires_at = Some(expires_at);
                    }
                }
                "expires" if cookie.expires_at.is_none() => {
                    if let Ok(expires) = DateTime::parse_from_rfc2822(argument.trim()) {
                        let expires = expires.with_timezone(&Utc);
                        if expires <= now {
                            delete = true;
                        } else {
                            cookie.expires_at = Some(expires);
                        }
                    }
                }
                _ => {}
            }
        }

        if cookie.secure && !self.options.secure {
            return Err(Error::Storage(format!(
                "secure cookie '{name}' refused on an insecure origin"
            )));
        }

        {
            let mut cookies = self.cookies.borrow_mut();
            if delete {
                cookies.remove(name);
            } else {
                cookies.insert(name.to_string(), cookie);
            }
        }
        self.flush()
    }

    /// The `document.cookie` string as of `now`, expired cookies left out.
    pub fn cookie_header(&self, now: DateTime<Utc>) -> String {
        self.cookies
            .borrow()
            .iter()
            .filter(|(_, cookie)| cookie.is_live(now))
            .map(|(name, cookie)| format!("{name}={}", cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Read and url-decode a cookie as of `now`.
    pub fn read_at(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        self.ensure_enabled()?;

        let header = self.cookie_header(now);
        let pattern = Regex::new(&format!("(?:^|; ){}=([^;]*)", regex::escape(name)))
            .map_err(|error| Error::Storage(format!("invalid cookie name pattern: {error}")))?;
        let Some(captures) = pattern.captures(&header) else {
            return Ok(None);
        };

        urlencoding::decode(&captures[1])
            .map(|decoded| Some(decoded.into_owned()))
            .map_err(|error| Error::Storage(format!("cookie '{name}' is not valid UTF-8: {error}")))
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.enabled.get() {
            Ok(())
        } else {
            Err(Error::StorageDisabled(BACKEND_NAME))
        }
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&*self.cookies.borrow())?;
        std::fs::write(path, serialized)?;
        Ok(())
    }
}

impl StorageBackend for CookieJar {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        self.read_at(key, Utc::now())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.apply_set_cookie(&encode_set_cookie(key, value, self.options), Utc::now())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.apply_set_cookie(&format!("{key}=; path=/; Max-Age=0"), Utc::now())
    }
}
