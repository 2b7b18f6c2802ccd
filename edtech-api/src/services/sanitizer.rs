//! Device sanitization: pseudonymous IDs and hostname redaction
//!
//! Every device crosses this module before the grouping engine, the
//! ledger, or the audit log see it. MAC addresses are replaced by a keyed
//! one-way hash, so stored records cannot be traced back to hardware
//! without the key; rotating the key unlinks devices recorded before and
//! after the rotation.
//!
//! Hostname redaction is a best-effort heuristic filter (emails, personal
//! names in front of device words, operator-supplied denylist). It is not
//! a guarantee; callers should treat hostnames as advisory text.

use crate::models::{RawDevice, SanitizedDevice};
use chrono::Utc;
use edtech_common::{Error, Result};
use sha2::{Digest, Sha256};

/// Device-type words that commonly follow a personal name in hostnames
/// ("toms-ipad", "alice-macbook")
const DEVICE_WORDS: &[&str] = &[
    "ipad", "iphone", "ipod", "macbook", "imac", "mac", "android", "phone",
    "tablet", "laptop", "chromebook", "notebook", "pixel", "galaxy",
    "surface", "pc", "desktop", "watch", "kindle",
];

/// Role and place words that may precede a device word without naming a
/// person ("lab-chromebook", "loaner-ipad")
const BENIGN_WORDS: &[&str] = &[
    "lab", "class", "classroom", "school", "student", "staff", "teacher",
    "loaner", "cart", "library", "office", "spare", "room", "admin",
    "guest", "test", "shared", "front", "back",
];

const REDACTED: &str = "[redacted]";

/// Stateless sanitizer; cheap to share behind an `Arc`
pub struct Sanitizer {
    key: String,
    extra_denylist: Vec<String>,
}

impl Sanitizer {
    pub fn new(key: impl Into<String>) -> Self {
        Sanitizer {
            key: key.into(),
            extra_denylist: Vec::new(),
        }
    }

    /// Add operator-configured hostname words to redact
    pub fn with_denylist(mut self, words: &[String]) -> Self {
        self.extra_denylist = words.iter().map(|w| w.to_ascii_lowercase()).collect();
        self
    }

    /// Sanitize one device. Deterministic and side-effect free apart from
    /// timestamping `observed_at`.
    pub fn sanitize(&self, raw: &RawDevice) -> Result<SanitizedDevice> {
        let normalized_mac = normalize_mac(&raw.mac)?;
        if raw.ssid.trim().is_empty() {
            return Err(Error::Validation("Device has an empty SSID".to_string()));
        }
        Ok(SanitizedDevice {
            device_id: self.pseudonym(&normalized_mac),
            ssid: raw.ssid.trim().to_string(),
            signal: raw.signal,
            hostname: raw
                .hostname
                .as_deref()
                .and_then(|h| self.redact_hostname(h)),
            observed_at: Utc::now(),
        })
    }

    /// Sanitize a batch, rejecting the whole batch on the first invalid
    /// device. The error names the device by position, never by content.
    pub fn sanitize_all(&self, raw: &[RawDevice]) -> Result<Vec<SanitizedDevice>> {
        raw.iter()
            .enumerate()
            .map(|(index, device)| {
                self.sanitize(device)
                    .map_err(|e| Error::Validation(format!("Device {}: {}", index + 1, e)))
            })
            .collect()
    }

    /// `device-` + first 8 hex chars of SHA-256(key:mac)
    fn pseudonym(&self, normalized_mac: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hasher.update(b":");
        hasher.update(normalized_mac.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("device-{}", &digest[..8])
    }

    /// Best-effort hostname redaction; returns `None` for blank input
    fn redact_hostname(&self, hostname: &str) -> Option<String> {
        let trimmed = hostname.trim();
        if trimmed.is_empty() {
            return None;
        }

        // Email heuristic: redact the whole non-whitespace run around '@'
        let after_email: String = if trimmed.contains('@') {
            trimmed
                .split_whitespace()
                .map(|word| if word.contains('@') { REDACTED } else { word })
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            trimmed.to_string()
        };

        // Token pass: operator denylist, and name-before-device-word
        let tokens = tokenize(&after_email);
        let mut out = String::with_capacity(after_email.len());
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::Separator(s) => out.push_str(s),
                Token::Word(w) => {
                    if self.should_redact(w, next_word(&tokens, i)) {
                        out.push_str(REDACTED);
                    } else {
                        out.push_str(w);
                    }
                }
            }
        }
        Some(out)
    }

    fn should_redact(&self, word: &str, next: Option<&str>) -> bool {
        let lower = word.to_ascii_lowercase();
        if self.extra_denylist.contains(&lower) {
            return true;
        }
        // A non-benign alphabetic word directly in front of a device word
        // is likely a personal name ("toms-ipad", "bob's iPad")
        if let Some(next) = next {
            if DEVICE_WORDS.contains(&next.to_ascii_lowercase().as_str())
                && word.chars().all(|c| c.is_ascii_alphabetic() || c == '\'')
                && !DEVICE_WORDS.contains(&lower.as_str())
            {
                let base = lower
                    .strip_suffix("'s")
                    .or_else(|| lower.strip_suffix('s'))
                    .unwrap_or(&lower);
                if !BENIGN_WORDS.contains(&lower.as_str()) && !BENIGN_WORDS.contains(&base) {
                    return true;
                }
            }
        }
        false
    }
}

enum Token<'a> {
    Word(&'a str),
    Separator(&'a str),
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_word = false;
    for (i, c) in input.char_indices() {
        let word_char = c.is_alphanumeric() || c == '\'';
        if word_char != in_word {
            if i > start {
                tokens.push(if in_word {
                    Token::Word(&input[start..i])
                } else {
                    Token::Separator(&input[start..i])
                });
            }
            start = i;
            in_word = word_char;
        }
    }
    if input.len() > start {
        tokens.push(if in_word {
            Token::Word(&input[start..])
        } else {
            Token::Separator(&input[start..])
        });
    }
    tokens
}

fn next_word<'a>(tokens: &'a [Token<'a>], after: usize) -> Option<&'a str> {
    tokens[after + 1..].iter().find_map(|t| match t {
        Token::Word(w) => Some(*w),
        Token::Separator(_) => None,
    })
}

/// Normalize a MAC address to lowercase colon-separated form
///
/// Accepts `aa:bb:cc:dd:ee:ff`, `AA-BB-CC-DD-EE-FF`, and bare
/// `aabbccddeeff`. The separator must be uniform; mixing `:` and `-`
/// is rejected. Error messages never echo the input.
fn normalize_mac(raw: &str) -> Result<String> {
    let cleaned = raw.trim();
    let hex: String = match (cleaned.contains(':'), cleaned.contains('-')) {
        (true, true) => {
            return Err(Error::Validation("Invalid MAC address format".to_string()));
        }
        (false, false) => cleaned.to_string(),
        (has_colon, _) => {
            let separator = if has_colon { ':' } else { '-' };
            let octets: Vec<&str> = cleaned.split(separator).collect();
            if octets.len() != 6 || octets.iter().any(|o| o.len() != 2) {
                return Err(Error::Validation("Invalid MAC address format".to_string()));
            }
            octets.concat()
        }
    };
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation("Invalid MAC address format".to_string()));
    }
    let lower = hex.to_ascii_lowercase();
    let octets: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
    Ok(octets.join(":"))
}
