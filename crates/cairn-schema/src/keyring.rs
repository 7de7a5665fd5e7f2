//! Text keyring format.
//!
//! A keyring holds one or more sections:
//!
//! ```text
//! [client.admin]
//!     key = AQBy3tRZAAAAABAA0Lk0y1n2v1QwzzD4LQ+7yA==
//!     caps mon = "allow *"
//! ```
//!
//! Leading whitespace is insignificant and values may be quoted. Comparison of
//! two keyrings only looks at the first `key` value, so files that differ in
//! indentation or quoting are equivalent.

use crate::types::EntityName;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("keyring line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("keyring contains no 'key = ...' entry")]
    NoKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringEntity {
    pub name: EntityName,
    pub key: Option<String>,
    pub caps: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyring {
    pub entities: Vec<KeyringEntity>,
}

impl Keyring {
    pub fn entity(&self, name: &str) -> Option<&KeyringEntity> {
        self.entities.iter().find(|e| e.name == name)
    }
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if let Some(inner) = v.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    v
}

pub fn parse_keyring_str(input: &str) -> Result<Keyring, KeyringError> {
    let mut keyring = Keyring::default();

    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| KeyringError::Malformed {
                line: line_no,
                reason: "unterminated section header".to_owned(),
            })?;
            if name.trim().is_empty() {
                return Err(KeyringError::Malformed {
                    line: line_no,
                    reason: "empty section name".to_owned(),
                });
            }
            keyring.entities.push(KeyringEntity {
                name: EntityName::new(name.trim()),
                key: None,
                caps: BTreeMap::new(),
            });
            continue;
        }

        let Some((lhs, rhs)) = line.split_once('=') else {
            return Err(KeyringError::Malformed {
                line: line_no,
                reason: format!("expected '<name> = <value>', got '{line}'"),
            });
        };
        let Some(entity) = keyring.entities.last_mut() else {
            return Err(KeyringError::Malformed {
                line: line_no,
                reason: "entry outside of a section".to_owned(),
            });
        };

        let lhs = lhs.trim();
        let value = unquote(rhs).to_owned();
        if lhs == "key" {
            entity.key = Some(value);
        } else if let Some(role) = lhs.strip_prefix("caps") {
            let role = role.trim();
            if role.is_empty() {
                return Err(KeyringError::Malformed {
                    line: line_no,
                    reason: "caps entry without a role".to_owned(),
                });
            }
            entity.caps.insert(role.to_owned(), value);
        }
        // Other attributes (auid, ...) are carried by the file but not modelled.
    }

    Ok(keyring)
}

/// Pull the first `key = ...` value out of keyring text.
///
/// This is deliberately more forgiving than [`parse_keyring_str`]: it never
/// fails on unrelated lines, so a partially mangled file can still be compared.
pub fn extract_key(input: &str) -> Option<String> {
    input.lines().find_map(|raw| {
        let (lhs, rhs) = raw.trim().split_once('=')?;
        if lhs.trim() == "key" {
            let v = unquote(rhs);
            (!v.is_empty()).then(|| v.to_owned())
        } else {
            None
        }
    })
}

/// Whether two keyring texts carry the same secret.
pub fn keys_equivalent(a: &str, b: &str) -> Result<bool, KeyringError> {
    let ka = extract_key(a).ok_or(KeyringError::NoKey)?;
    let kb = extract_key(b).ok_or(KeyringError::NoKey)?;
    Ok(ka == kb)
}

/// Short, non-reversible fingerprint of a secret, safe to log.
pub fn key_fingerprint(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex()[..12].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: &str = "[client.admin]\n\tkey = AQAAdminSecret==\n\tcaps mds = \"allow *\"\n\tcaps mon = \"allow *\"\n\tcaps osd = \"allow *\"\n";

    #[test]
    fn parse_admin_keyring() {
        let kr = parse_keyring_str(ADMIN).unwrap();
        assert_eq!(kr.entities.len(), 1);
        let admin = kr.entity("client.admin").unwrap();
        assert_eq!(admin.key.as_deref(), Some("AQAAdminSecret=="));
        assert_eq!(admin.caps.get("mon").map(String::as_str), Some("allow *"));
        assert_eq!(admin.caps.len(), 3);
    }

    #[test]
    fn parse_multiple_sections() {
        let input = "[mon.]\nkey = AQMon==\ncaps mon = allow *\n[client.admin]\nkey = AQAdm==\n";
        let kr = parse_keyring_str(input).unwrap();
        assert_eq!(kr.entities.len(), 2);
        assert_eq!(kr.entity("mon.").unwrap().key.as_deref(), Some("AQMon=="));
        assert_eq!(kr.entity("client.admin").unwrap().key.as_deref(), Some("AQAdm=="));
    }

    #[test]
    fn key_with_padding_is_kept_whole() {
        let kr = parse_keyring_str("[x]\nkey = abc==\n").unwrap();
        assert_eq!(kr.entities[0].key.as_deref(), Some("abc=="));
    }

    #[test]
    fn entry_outside_section_rejected() {
        let err = parse_keyring_str("key = abc\n").unwrap_err();
        assert!(matches!(err, KeyringError::Malformed { line: 1, .. }));
    }

    #[test]
    fn unterminated_header_rejected() {
        assert!(parse_keyring_str("[client.admin\nkey = a\n").is_err());
    }

    #[test]
    fn extract_key_tolerates_whitespace_and_quotes() {
        let plain = "[client.admin]\nkey = AQSecret==\n";
        let tabbed = "[client.admin]\n\t\tkey\t=\tAQSecret==\n";
        let quoted = "  [client.admin]\n    key = \"AQSecret==\"\n";
        let single = "[client.admin]\nkey='AQSecret=='\n";
        for text in [plain, tabbed, quoted, single] {
            assert_eq!(extract_key(text).as_deref(), Some("AQSecret=="), "{text:?}");
        }
        assert!(keys_equivalent(plain, tabbed).unwrap());
        assert!(keys_equivalent(quoted, single).unwrap());
    }

    #[test]
    fn different_secrets_are_not_equivalent() {
        let a = "[client.admin]\nkey = AAAA\n";
        let b = "[client.admin]\nkey = BBBB\n";
        assert!(!keys_equivalent(a, b).unwrap());
    }

    #[test]
    fn keys_equivalent_requires_a_key() {
        let err = keys_equivalent("[client.admin]\n", "[client.admin]\nkey = A\n").unwrap_err();
        assert!(matches!(err, KeyringError::NoKey));
    }

    #[test]
    fn extract_key_ignores_caps_lines() {
        let text = "[client.admin]\ncaps mon = \"allow *\"\nkey = K1\n";
        assert_eq!(extract_key(text).as_deref(), Some("K1"));
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let fp = key_fingerprint("AQSecret==");
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, key_fingerprint("AQSecret=="));
        assert_ne!(fp, key_fingerprint("AQOther=="));
    }
}
