//! Search over the redacted cache
//!
//! Matching never touches the vault: it runs on the cached listing and
//! produces launcher rows whose actions resolve the real values later.

use std::path::Path;

use crate::feedback::{Action, Item};
use crate::icons;
use crate::model::{CipherRecord, CipherType, FieldKind, FolderRecord};
use crate::path::FieldPath;
use crate::redact::PLACEHOLDER;
use crate::state::AuthState;

/// Folder argument standing for items without a folder
pub const NO_FOLDER: &str = "null";

/// Case-insensitive match on name, username and URIs. An empty query
/// matches everything.
pub fn matches(item: &CipherRecord, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    let hit = |text: &str| text.to_lowercase().contains(&query);
    hit(&item.name) || hit(item.username()) || item.uris().any(hit)
}

/// Matching items, favorites first, at most `max`
pub fn filter<'a>(
    items: &'a [CipherRecord],
    query: &str,
    favorites_only: bool,
    max: usize,
) -> Vec<&'a CipherRecord> {
    let mut found: Vec<&CipherRecord> = items
        .iter()
        .filter(|item| !favorites_only || item.favorite)
        .filter(|item| matches(item, query))
        .collect();
    // stable, so cache order is kept within each group
    found.sort_by_key(|item| !item.favorite);
    found.truncate(max);
    found
}

/// Field a row resolves by default
pub fn default_path(kind: CipherType) -> &'static str {
    match kind {
        CipherType::Login => "login.password",
        CipherType::SecureNote => "notes",
        CipherType::Card => "card.number",
        CipherType::Identity => "identity.email",
        CipherType::Unknown(_) => "",
    }
}

fn subtitle(item: &CipherRecord) -> String {
    match item.kind {
        CipherType::Login => {
            let user = item.username();
            match item.first_uri() {
                Some(uri) if !user.is_empty() => format!("{user} | {uri}"),
                Some(uri) => uri.to_string(),
                None => user.to_string(),
            }
        }
        CipherType::Card => item
            .card
            .as_ref()
            .map(|card| format!("{} {}", card.brand, card.number).trim().to_string())
            .unwrap_or_default(),
        CipherType::Identity => item
            .identity
            .as_ref()
            .map(|id| format!("{} {}", id.first_name, id.last_name).trim().to_string())
            .unwrap_or_default(),
        CipherType::SecureNote => "Secure note".to_string(),
        CipherType::Unknown(code) => format!("Item type {code}"),
    }
}

/// Launcher row for one cached item
pub fn item_row(item: &CipherRecord, icons_dir: &Path) -> Item {
    let mut row = Item::new(&item.name, subtitle(item))
        .uid(&item.id)
        .action(Action::Get, &item.id)
        .var("path", default_path(item.kind))
        .icon_file(&icons::icon_path(icons_dir, &item.id));

    let has_totp = item.login.as_ref().is_some_and(|l| !l.totp.is_empty());
    if has_totp {
        row = row.var("totp", "true");
    }
    if !item.attachments.is_empty() {
        row = row.var("attachments", &item.attachments.len().to_string());
    }
    row
}

fn plain_row(label: &str, value: &str) -> Item {
    Item::new(format!("{label}: {value}"), format!("Copy {}", label.to_lowercase()))
        .action(Action::Output, value)
}

/// Row whose value is redacted in the cache and resolved through `get`
fn secret_row(item_id: &str, label: &str, shown: &str, path: &str) -> Item {
    Item::new(format!("{label}: {shown}"), format!("Copy {}", label.to_lowercase()))
        .action(Action::Get, item_id)
        .var("path", path)
}

fn info_row(label: &str, value: &str) -> Item {
    Item::new(format!("{label}: {value}"), "").action(Action::None, "")
}

/// Drill-down rows for one cached item, one per value worth copying.
/// Values the cache keeps in clear are output directly; redacted ones
/// resolve through `get` like search rows do.
pub fn detail_rows(item: &CipherRecord, output_folder: &Path) -> Vec<Item> {
    let mut rows = Vec::new();

    if let Some(login) = &item.login {
        if !login.username.is_empty() {
            rows.push(plain_row("Username", &login.username));
        }
        if !login.password.is_empty() {
            rows.push(secret_row(&item.id, "Password", PLACEHOLDER, "login.password"));
        }
        if !login.totp.is_empty() {
            rows.push(Item::new("TOTP code", "Copy the current code").action(Action::Totp, &item.id));
        }
        rows.extend(item.uris().map(|uri| Item::new(uri, "Open in browser").action(Action::Open, uri)));
        if !login.password_revision_date.is_empty() {
            rows.push(info_row("Password revised", &login.password_revision_date));
        }
    }

    if let Some(card) = &item.card {
        if !card.number.is_empty() {
            rows.push(secret_row(&item.id, "Card number", &card.number, "card.number"));
        }
        if !card.code.is_empty() {
            rows.push(secret_row(&item.id, "Security code", PLACEHOLDER, "card.code"));
        }
        if !card.exp_month.is_empty() || !card.exp_year.is_empty() {
            rows.push(plain_row("Expiry", &format!("{}/{}", card.exp_month, card.exp_year)));
        }
        for (label, value) in [("Cardholder", &card.cardholder_name), ("Brand", &card.brand)] {
            if !value.is_empty() {
                rows.push(plain_row(label, value));
            }
        }
    }

    if let Some(identity) = &item.identity {
        let fields = [
            ("Title", &identity.title),
            ("First name", &identity.first_name),
            ("Middle name", &identity.middle_name),
            ("Last name", &identity.last_name),
            ("Username", &identity.username),
            ("Company", &identity.company),
            ("Email", &identity.email),
            ("Phone", &identity.phone),
            ("Address", &identity.address1),
            ("Address 2", &identity.address2),
            ("Address 3", &identity.address3),
            ("City", &identity.city),
            ("State", &identity.state),
            ("Postal code", &identity.postal_code),
            ("Country", &identity.country),
            ("SSN", &identity.ssn),
            ("Passport number", &identity.passport_number),
            ("License number", &identity.license_number),
        ];
        rows.extend(
            fields
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(label, value)| plain_row(label, value)),
        );
    }

    if !item.notes.is_empty() {
        rows.push(match item.kind {
            CipherType::SecureNote => secret_row(&item.id, "Secure note", PLACEHOLDER, "notes"),
            _ => plain_row("Note", &item.notes),
        });
    }

    for (k, field) in item.fields.iter().enumerate() {
        let path = FieldPath::new().key("fields").index(k).key("value").to_string();
        let label = if field.name.is_empty() { format!("Field {k}") } else { field.name.clone() };
        rows.push(match field.kind {
            FieldKind::Hidden => secret_row(&item.id, &label, PLACEHOLDER, &path),
            _ => plain_row(&label, &field.value),
        });
    }

    for attachment in &item.attachments {
        rows.push(
            Item::new(
                format!("Attachment: {} ({})", attachment.file_name, attachment.size_name),
                format!("Save to {}", output_folder.display()),
            )
            .uid(&attachment.id)
            .action(Action::Attachment, &item.id)
            .var("attachment", &attachment.id),
        );
    }

    if item.favorite {
        rows.push(info_row("Favorite", "yes"));
    }
    if !item.collection_ids.is_empty() {
        rows.push(info_row("Collections", &item.collection_ids.join(", ")));
    }
    if !item.revision_date.is_empty() {
        rows.push(info_row("Revised", &item.revision_date));
    }
    rows
}

fn in_folder(item: &CipherRecord, folder_id: &str) -> bool {
    if folder_id == NO_FOLDER {
        item.folder_id.is_empty()
    } else {
        item.folder_id == folder_id
    }
}

/// One row per folder with its item count
pub fn folder_rows(folders: &[FolderRecord], items: &[CipherRecord]) -> Vec<Item> {
    folders
        .iter()
        .map(|folder| {
            let id = folder.id.as_deref().unwrap_or(NO_FOLDER);
            let count = items.iter().filter(|item| in_folder(item, id)).count();
            let name = if folder.name.is_empty() { "No Folder" } else { folder.name.as_str() };
            Item::new(name, format!("{count} items"))
                .uid(id)
                .action(Action::Folder, id)
        })
        .collect()
}

/// Items of one folder; `null` selects items without a folder
pub fn folder_items<'a>(items: &'a [CipherRecord], folder_id: &str) -> Vec<&'a CipherRecord> {
    items.iter().filter(|item| in_folder(item, folder_id)).collect()
}

/// Rows replacing results when the vault cannot be searched yet.
/// `None` means search can proceed.
pub fn status_rows(auth: AuthState, has_cache: bool, syncing: bool) -> Option<Vec<Item>> {
    match auth {
        AuthState::NotLoggedIn => Some(vec![
            Item::new("Login to Bitwarden", "Not logged in").action(Action::Login, "")
        ]),
        AuthState::Locked => Some(vec![
            Item::new("Unlock Bitwarden", "Vault is locked").action(Action::Unlock, "")
        ]),
        AuthState::Unlocked if has_cache => None,
        AuthState::Unlocked if syncing => Some(vec![Item::new(
            "Refreshing Bitwarden cache",
            "Sync is running, try again in a moment",
        )
        .action(Action::None, "")]),
        AuthState::Unlocked => Some(vec![
            Item::new("Sync Bitwarden now", "No cached items").action(Action::Sync, "")
        ]),
    }
}
