//! Cache redaction
//!
//! Projects the full item listing onto what the search cache may keep.
//! Secret values are swapped for a fixed placeholder so the launcher can
//! still tell "has a password" from "has none".

use std::collections::HashSet;

use crate::model::{Card, CipherRecord, CipherType, Field, FieldKind, Login};

/// Stand-in for any non-empty secret value
pub const PLACEHOLDER: &str = "✳︎✳︎✳︎✳︎✳︎";

/// Item types left out of the cache entirely
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSet(HashSet<CipherType>);

impl SkipSet {
    /// Build from setting names (`login`, `note`, `card`, `identity`).
    /// Unknown names are ignored.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .filter_map(|name| CipherType::from_name(name.as_ref()))
                .collect(),
        )
    }

    pub fn contains(&self, kind: CipherType) -> bool {
        self.0.contains(&kind)
    }
}

/// Redact a whole listing. Items of a skipped type are dropped; every other
/// item is kept.
pub fn redact(items: &[CipherRecord], skip: &SkipSet) -> Vec<CipherRecord> {
    items
        .iter()
        .filter(|item| !skip.contains(item.kind))
        .map(redact_item)
        .collect()
}

/// Redact a single item
pub fn redact_item(item: &CipherRecord) -> CipherRecord {
    let notes = if item.kind == CipherType::SecureNote {
        mask(&item.notes)
    } else {
        item.notes.clone()
    };

    CipherRecord {
        notes,
        login: item.login.as_ref().map(|login| Login {
            password: mask(&login.password),
            totp: mask(&login.totp),
            ..login.clone()
        }),
        card: item.card.as_ref().map(|card| Card {
            number: mask_card_number(&card.number),
            code: mask(&card.code),
            ..card.clone()
        }),
        fields: item
            .fields
            .iter()
            .map(|field| Field {
                value: match field.kind {
                    FieldKind::Hidden => mask(&field.value),
                    _ => field.value.clone(),
                },
                ..field.clone()
            })
            .collect(),
        ..item.clone()
    }
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        PLACEHOLDER.to_string()
    }
}

/// `*` plus the last four characters. Already-masked numbers are left alone
/// so redaction is idempotent.
fn mask_card_number(number: &str) -> String {
    if number.is_empty() || number.starts_with('*') {
        return number.to_string();
    }
    let chars: Vec<char> = number.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("*{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attachment, Identity, LoginUri};

    fn record(id: &str, kind: CipherType) -> CipherRecord {
        CipherRecord {
            object: "item".into(),
            id: id.into(),
            organization_id: String::new(),
            folder_id: String::new(),
            kind,
            name: format!("item {id}"),
            notes: String::new(),
            favorite: false,
            login: None,
            card: None,
            identity: None,
            secure_note: None,
            fields: Vec::new(),
            attachments: Vec::new(),
            collection_ids: vec!["c1".into(), "c2".into()],
            revision_date: "2024-05-01T10:00:00.000Z".into(),
        }
    }

    fn login_item() -> CipherRecord {
        CipherRecord {
            notes: "visible note".into(),
            login: Some(Login {
                uris: vec![LoginUri {
                    match_kind: None,
                    uri: "https://example.com".into(),
                }],
                username: "alice".into(),
                password: "hunter2".into(),
                totp: "otpauth://totp/x?secret=ABC".into(),
                password_revision_date: "2024-01-01".into(),
            }),
            fields: vec![
                Field {
                    name: "pin".into(),
                    value: "1234".into(),
                    kind: FieldKind::Hidden,
                },
                Field {
                    name: "hint".into(),
                    value: "blue".into(),
                    kind: FieldKind::Text,
                },
                Field {
                    name: "empty".into(),
                    value: String::new(),
                    kind: FieldKind::Hidden,
                },
            ],
            attachments: vec![Attachment {
                id: "att1".into(),
                file_name: "scan.pdf".into(),
                size: "2048".into(),
                size_name: "2 KB".into(),
                url: "https://files/att1".into(),
            }],
            ..record("l1", CipherType::Login)
        }
    }

    fn card_item(number: &str, code: &str) -> CipherRecord {
        CipherRecord {
            card: Some(Card {
                cardholder_name: "Alice".into(),
                brand: "Visa".into(),
                number: number.into(),
                exp_month: "12".into(),
                exp_year: "2030".into(),
                code: code.into(),
            }),
            ..record("c1", CipherType::Card)
        }
    }

    #[test]
    fn test_login_rules() {
        let redacted = redact_item(&login_item());
        let login = redacted.login.as_ref().unwrap();
        assert_eq!(login.password, PLACEHOLDER);
        assert_eq!(login.totp, PLACEHOLDER);
        assert_eq!(login.username, "alice");
        assert_eq!(login.uris[0].uri, "https://example.com");
        assert_eq!(login.password_revision_date, "2024-01-01");
        assert_eq!(redacted.notes, "visible note");

        assert_eq!(redacted.fields[0].value, PLACEHOLDER);
        assert_eq!(redacted.fields[1].value, "blue");
        assert_eq!(redacted.fields[2].value, "");

        assert_eq!(redacted.attachments, login_item().attachments);
        assert_eq!(redacted.collection_ids, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn test_empty_secrets_stay_empty() {
        let mut item = login_item();
        if let Some(login) = item.login.as_mut() {
            login.password.clear();
            login.totp.clear();
        }
        let login = redact_item(&item).login.unwrap();
        assert_eq!(login.password, "");
        assert_eq!(login.totp, "");
    }

    #[test]
    fn test_secure_note_rules() {
        let mut note = record("n1", CipherType::SecureNote);
        note.notes = "the launch codes".into();
        assert_eq!(redact_item(&note).notes, PLACEHOLDER);

        note.notes.clear();
        assert_eq!(redact_item(&note).notes, "");
    }

    #[test]
    fn test_card_rules() {
        let redacted = redact_item(&card_item("4111111111111111", "123"));
        let card = redacted.card.unwrap();
        assert_eq!(card.number, "*1111");
        assert_eq!(card.code, PLACEHOLDER);
        assert_eq!(card.brand, "Visa");
        assert_eq!(card.exp_year, "2030");

        let empty = redact_item(&card_item("", "")).card.unwrap();
        assert_eq!(empty.number, "");
        assert_eq!(empty.code, "");

        let short = redact_item(&card_item("42", "1")).card.unwrap();
        assert_eq!(short.number, "*42");
    }

    #[test]
    fn test_identity_passes_through() {
        let mut item = record("i1", CipherType::Identity);
        item.identity = Some(Identity {
            first_name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: "+44 20 0000".into(),
            ..Identity::default()
        });
        let identity = redact_item(&item).identity.unwrap();
        assert_eq!(identity.email, "ada@example.com");
        assert_eq!(identity.phone, "+44 20 0000");
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let mut note = record("n1", CipherType::SecureNote);
        note.notes = "secret".into();
        let items = vec![login_item(), card_item("5500000000000004", "999"), note];

        let once = redact(&items, &SkipSet::default());
        let twice = redact(&once, &SkipSet::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_skip_set_drops_only_matching_items() {
        let items = vec![
            login_item(),
            card_item("4111111111111111", "123"),
            record("n1", CipherType::SecureNote),
            record("i1", CipherType::Identity),
        ];
        let skip = SkipSet::from_names(["card", "bogus"]);

        let redacted = redact(&items, &skip);
        let ids: Vec<&str> = redacted.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "n1", "i1"]);
    }
}
