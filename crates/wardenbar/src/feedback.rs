//! Launcher result items
//!
//! Every command that feeds the launcher prints one JSON document:
//! `{"items": [...]}`. Each item carries an opaque `action` the launcher
//! hands back to wardenbar together with `arg`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// What the launcher should do when an item is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Login,
    Unlock,
    Sync,
    /// Resolve a field of the item in `arg`
    Get,
    Totp,
    Attachment,
    /// Open the folder in `arg`
    Folder,
    /// Print `arg` as it is
    Output,
    /// Open the URL in `arg`
    Open,
    None,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Unlock => "unlock",
            Self::Sync => "sync",
            Self::Get => "get",
            Self::Totp => "totp",
            Self::Attachment => "attachment",
            Self::Folder => "folder",
            Self::Output => "output",
            Self::Open => "open",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Icon {
    pub path: String,
}

/// A single launcher row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub title: String,
    pub subtitle: String,
    pub arg: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    pub variables: BTreeMap<String, String>,
}

impl Item {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            uid: None,
            title: title.into(),
            subtitle: subtitle.into(),
            arg: String::new(),
            valid: false,
            icon: None,
            variables: BTreeMap::new(),
        }
    }

    pub fn uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }

    /// Make the row actionable
    pub fn action(mut self, action: Action, arg: &str) -> Self {
        self.arg = arg.to_string();
        self.valid = action != Action::None;
        self.variables.insert("action".to_string(), action.as_str().to_string());
        self
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.variables.insert(key.to_string(), value.to_string());
        self
    }

    /// Use `path` as icon when it exists
    pub fn icon_file(mut self, path: &Path) -> Self {
        if path.exists() {
            self.icon = Some(Icon {
                path: path.display().to_string(),
            });
        }
        self
    }

    pub fn action_name(&self) -> Option<&str> {
        self.variables.get("action").map(String::as_str)
    }
}

/// The printed document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Feedback {
    pub items: Vec<Item>,
}

impl Feedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Extend<Item> for Feedback {
    fn extend<T: IntoIterator<Item = Item>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_makes_item_valid() {
        let item = Item::new("GitHub", "alice").uid("x1").action(Action::Get, "x1");
        assert!(item.valid);
        assert_eq!(item.arg, "x1");
        assert_eq!(item.action_name(), Some("get"));

        let info = Item::new("Refreshing", "").action(Action::None, "");
        assert!(!info.valid);
    }

    #[test]
    fn test_missing_icon_is_omitted() {
        let item = Item::new("a", "b").icon_file(Path::new("/nonexistent/icon.png"));
        assert!(item.icon.is_none());
    }

    #[test]
    fn test_json_shape() {
        let mut feedback = Feedback::new();
        feedback.push(
            Item::new("Unlock Bitwarden", "Vault is locked")
                .action(Action::Unlock, "")
                .var("path", "login.password"),
        );

        let json: serde_json::Value = serde_json::from_str(&feedback.to_json().unwrap()).unwrap();
        let item = &json["items"][0];
        assert_eq!(item["title"], "Unlock Bitwarden");
        assert_eq!(item["valid"], true);
        assert_eq!(item["variables"]["action"], "unlock");
        assert_eq!(item["variables"]["path"], "login.password");
        assert!(item.get("uid").is_none());
        assert!(item.get("icon").is_none());
    }
}
