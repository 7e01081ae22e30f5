//! Vault records as listed by the CLI
//!
//! Field names follow the CLI's JSON. Most string fields are nullable there;
//! they decode to empty strings so redaction and search never deal with
//! `Option<String>`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum CipherType {
    Login,
    SecureNote,
    Card,
    Identity,
    Unknown(u8),
}

impl From<u8> for CipherType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Login,
            2 => Self::SecureNote,
            3 => Self::Card,
            4 => Self::Identity,
            other => Self::Unknown(other),
        }
    }
}

impl From<CipherType> for u8 {
    fn from(value: CipherType) -> Self {
        match value {
            CipherType::Login => 1,
            CipherType::SecureNote => 2,
            CipherType::Card => 3,
            CipherType::Identity => 4,
            CipherType::Unknown(other) => other,
        }
    }
}

impl CipherType {
    /// Parse the names used by the `skip_types` setting
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "login" => Some(Self::Login),
            "note" => Some(Self::SecureNote),
            "card" => Some(Self::Card),
            "identity" => Some(Self::Identity),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::SecureNote => "note",
            Self::Card => "card",
            Self::Identity => "identity",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for CipherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Custom field kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum FieldKind {
    #[default]
    Text,
    Hidden,
    Boolean,
    Linked,
    Unknown(u8),
}

impl From<u8> for FieldKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Text,
            1 => Self::Hidden,
            2 => Self::Boolean,
            3 => Self::Linked,
            other => Self::Unknown(other),
        }
    }
}

impl From<FieldKind> for u8 {
    fn from(value: FieldKind) -> Self {
        match value {
            FieldKind::Text => 0,
            FieldKind::Hidden => 1,
            FieldKind::Boolean => 2,
            FieldKind::Linked => 3,
            FieldKind::Unknown(other) => other,
        }
    }
}

/// One vault item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherRecord {
    #[serde(default, deserialize_with = "null_default")]
    pub object: String,
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub organization_id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub folder_id: String,
    #[serde(rename = "type")]
    pub kind: CipherType,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub notes: String,
    #[serde(default, deserialize_with = "null_default")]
    pub favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<Login>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_note: Option<SecureNote>,
    #[serde(default, deserialize_with = "null_default")]
    pub fields: Vec<Field>,
    #[serde(default, deserialize_with = "null_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_default")]
    pub collection_ids: Vec<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub revision_date: String,
}

impl CipherRecord {
    pub fn username(&self) -> &str {
        self.login.as_ref().map(|l| l.username.as_str()).unwrap_or_default()
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.login
            .iter()
            .flat_map(|l| l.uris.iter())
            .map(|u| u.uri.as_str())
            .filter(|u| !u.is_empty())
    }

    pub fn first_uri(&self) -> Option<&str> {
        self.uris().next()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    #[serde(default, deserialize_with = "null_default")]
    pub uris: Vec<LoginUri>,
    #[serde(default, deserialize_with = "null_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_default")]
    pub password: String,
    #[serde(default, deserialize_with = "null_default")]
    pub totp: String,
    #[serde(default, deserialize_with = "null_default")]
    pub password_revision_date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginUri {
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_kind: Option<u8>,
    #[serde(default, deserialize_with = "null_default")]
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(default, deserialize_with = "null_default")]
    pub cardholder_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub brand: String,
    #[serde(default, deserialize_with = "null_default")]
    pub number: String,
    #[serde(default, deserialize_with = "null_default")]
    pub exp_month: String,
    #[serde(default, deserialize_with = "null_default")]
    pub exp_year: String,
    #[serde(default, deserialize_with = "null_default")]
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default, deserialize_with = "null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_default")]
    pub first_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub middle_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub last_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub address1: String,
    #[serde(default, deserialize_with = "null_default")]
    pub address2: String,
    #[serde(default, deserialize_with = "null_default")]
    pub address3: String,
    #[serde(default, deserialize_with = "null_default")]
    pub city: String,
    #[serde(default, deserialize_with = "null_default")]
    pub state: String,
    #[serde(default, deserialize_with = "null_default")]
    pub postal_code: String,
    #[serde(default, deserialize_with = "null_default")]
    pub country: String,
    #[serde(default, deserialize_with = "null_default")]
    pub company: String,
    #[serde(default, deserialize_with = "null_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_default")]
    pub ssn: String,
    #[serde(default, deserialize_with = "null_default")]
    pub username: String,
    #[serde(default, deserialize_with = "null_default")]
    pub passport_number: String,
    #[serde(default, deserialize_with = "null_default")]
    pub license_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecureNote {
    #[serde(default, rename = "type")]
    pub kind: u8,
}

/// Custom field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub value: String,
    #[serde(default, rename = "type")]
    pub kind: FieldKind,
}

/// Attachment metadata; the bytes only ever come from the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, deserialize_with = "null_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_default")]
    pub file_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub size: String,
    #[serde(default, deserialize_with = "null_default")]
    pub size_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub url: String,
}

/// Folder; `id` is absent for the implicit "No Folder" entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    pub name: String,
}

fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTED: &str = r#"[
        {"object":"item","id":"a1","organizationId":null,"folderId":null,"type":1,"reprompt":0,
         "name":"GitHub","notes":null,"favorite":true,
         "login":{"uris":[{"match":null,"uri":"https://github.com/login"}],"username":"octo","password":"pw","totp":null,"passwordRevisionDate":null},
         "collectionIds":[],"revisionDate":"2023-01-01T00:00:00.000Z"},
        {"object":"item","id":"c1","folderId":"f1","type":3,"name":"Visa","notes":"",
         "card":{"cardholderName":"A B","brand":"Visa","number":"4111111111111111","expMonth":"1","expYear":"2030","code":"123"},
         "fields":[{"name":"pin","value":"9999","type":1,"linkedId":null}],
         "attachments":[{"id":"att1","fileName":"scan.pdf","size":"2048","sizeName":"2 KB","url":"https://x"}]}
    ]"#;

    #[test]
    fn test_decode_cli_listing() {
        let items: Vec<CipherRecord> = serde_json::from_str(LISTED).unwrap();
        assert_eq!(items.len(), 2);

        let login = &items[0];
        assert_eq!(login.kind, CipherType::Login);
        assert_eq!(login.notes, "");
        assert_eq!(login.folder_id, "");
        assert!(login.favorite);
        assert_eq!(login.username(), "octo");
        assert_eq!(login.first_uri(), Some("https://github.com/login"));
        assert_eq!(login.login.as_ref().unwrap().totp, "");

        let card = &items[1];
        assert_eq!(card.kind, CipherType::Card);
        assert_eq!(card.card.as_ref().unwrap().number, "4111111111111111");
        assert_eq!(card.fields[0].kind, FieldKind::Hidden);
        assert_eq!(card.attachments[0].file_name, "scan.pdf");
        assert!(card.login.is_none());
    }

    #[test]
    fn test_type_numbers_roundtrip_through_serde() {
        let json = serde_json::to_value(CipherType::Identity).unwrap();
        assert_eq!(json, serde_json::json!(4));
        let odd: CipherType = serde_json::from_value(serde_json::json!(9)).unwrap();
        assert_eq!(odd, CipherType::Unknown(9));
    }

    #[test]
    fn test_field_without_type_is_text() {
        let field: Field = serde_json::from_str(r#"{"name": "hint", "value": "blue"}"#).unwrap();
        assert_eq!(field.kind, FieldKind::Text);
        assert_eq!(FieldKind::default(), FieldKind::Text);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(CipherType::from_name(" Note "), Some(CipherType::SecureNote));
        assert_eq!(CipherType::from_name("passkey"), None);
        assert_eq!(CipherType::Card.to_string(), "card");
    }
}
