//! Authentication and sync flows
//!
//! Wraps the CLI commands that change the session: login, unlock, lock,
//! logout and sync. Anything that yields a fresh session token also
//! rebuilds the search cache.

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

use crate::cache::Marker;
use crate::cli::{CliRequest, CliRunner, SyncMode, TwoFactorMethod};
use crate::context::Context;
use crate::error::{preview, WardenError};
use crate::jobs;
use crate::model::{CipherRecord, FolderRecord};
use crate::redact;
use crate::token::TokenStore;

/// Job names used with the background coordinator
pub const SYNC_JOB: &str = "sync";
pub const ICONS_JOB: &str = "icons";

/// Interactive input
pub trait Prompt {
    /// Read a value without echoing it
    fn secret(&self, label: &str) -> Result<String>;
    /// Read a visible value
    fn text(&self, label: &str) -> Result<String>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn secret(&self, label: &str) -> Result<String> {
        let value = rpassword::prompt_password(format!("{label}: "))
            .with_context(|| format!("Failed to read {label}"))?;
        if value.is_empty() {
            bail!(WardenError::UserCancelled);
        }
        Ok(value)
    }

    fn text(&self, label: &str) -> Result<String> {
        eprint!("{label}: ");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        let value = line.trim().to_string();
        if value.is_empty() {
            bail!(WardenError::UserCancelled);
        }
        Ok(value)
    }
}

/// Session management against the CLI
pub struct Auth<'a> {
    ctx: &'a Context,
    cli: &'a dyn CliRunner,
    tokens: &'a dyn TokenStore,
    prompt: &'a dyn Prompt,
}

impl<'a> Auth<'a> {
    pub fn new(
        ctx: &'a Context,
        cli: &'a dyn CliRunner,
        tokens: &'a dyn TokenStore,
        prompt: &'a dyn Prompt,
    ) -> Self {
        Self {
            ctx,
            cli,
            tokens,
            prompt,
        }
    }

    // Checks

    pub fn check_logged_in(&self) -> Result<()> {
        self.cli
            .run(&CliRequest::login_check())
            .map(|_| ())
            .map_err(|e| -> anyhow::Error {
                match e {
                    WardenError::CliRequestFailed { .. } => WardenError::NotLoggedIn.into(),
                    other => other.into(),
                }
            })
    }

    /// With a stored token its validity is checked; without one the CLI
    /// decides from its own state
    pub fn check_unlocked(&self) -> Result<()> {
        let request = match self.tokens.get() {
            Ok(token) => CliRequest::session_check(&token),
            Err(_) => CliRequest::unlock_check(),
        };
        self.cli.run(&request).map(|_| ()).map_err(|e| -> anyhow::Error {
            match e {
                WardenError::CliRequestFailed { .. } => WardenError::Locked.into(),
                other => other.into(),
            }
        })
    }

    fn require_email(&self) -> Result<&str> {
        let email = self.ctx.config.email.as_str();
        if email.is_empty() {
            bail!("No email configured. Set `email` in the config file or BW_EMAIL.");
        }
        Ok(email)
    }

    // Flows

    pub fn login(&self) -> Result<String> {
        let email = self.require_email()?;
        if self.check_logged_in().is_ok() {
            return Ok("Already logged in.".to_string());
        }

        if self.ctx.config.use_apikey {
            let client_id = self.prompt.text("API client_id")?;
            let client_secret = self.prompt.secret("API client_secret")?;
            self.cli.run(&CliRequest::login_apikey(&client_id, &client_secret))?;
            info!("logged in with API key");
            return Ok("Logged in. Unlock the vault next.".to_string());
        }

        let password = self.prompt.secret("Master password")?;
        let two_factor = if self.ctx.config.sfa_enabled {
            let method = TwoFactorMethod::from_mode(self.ctx.config.sfa_mode).ok_or_else(|| {
                anyhow::anyhow!("Unsupported two-step mode {}", self.ctx.config.sfa_mode)
            })?;
            if method == TwoFactorMethod::Email {
                self.request_email_code(email, &password)?;
            }
            let code = self.prompt.text(method.label())?;
            Some((method, code))
        } else {
            None
        };

        let request = CliRequest::login(
            email,
            &password,
            two_factor.as_ref().map(|(method, code)| (*method, code.as_str())),
        );
        let token = session_token(self.cli.run(&request)?)?;
        self.tokens.set(&token)?;
        info!("logged in as {}", email);

        self.rebuild_cache(&token)?;
        Ok("Logged In.".to_string())
    }

    /// The CLI blocks on the code prompt after mailing the code, so the
    /// request runs until the deadline and succeeds on the prompt line
    fn request_email_code(&self, email: &str, password: &str) -> Result<()> {
        let request = CliRequest::request_email_code(email, password, self.ctx.config.email_timeout());
        let lines = self.cli.run(&request)?;
        debug!("email code requested: {:?}", lines);
        Ok(())
    }

    pub fn unlock(&self) -> Result<String> {
        self.check_logged_in()?;

        let password = self.prompt.secret("Master password")?;
        let token = session_token(self.cli.run(&CliRequest::unlock(&password))?)?;
        self.tokens.set(&token)?;
        info!("unlocked vault");

        if self.ctx.cache().exists(Marker::Sync) {
            self.rebuild_cache(&token)?;
        }
        Ok("Unlocked".to_string())
    }

    pub fn lock(&self) -> Result<String> {
        self.forget_session()?;
        self.cli.run(&CliRequest::lock())?;
        Ok("Locked".to_string())
    }

    pub fn logout(&self) -> Result<String> {
        self.forget_session()?;
        self.cli.run(&CliRequest::logout())?;
        Ok("Logged Out".to_string())
    }

    fn forget_session(&self) -> Result<()> {
        self.tokens.remove()?;
        self.ctx.cache().clear()
    }

    /// Sync now, or hand the sync to a background job
    pub fn sync(&self, mode: SyncMode, background: bool) -> Result<String> {
        self.require_email()?;
        self.check_logged_in()?;
        self.check_unlocked()?;

        if background && mode != SyncMode::Last {
            let registry = self.ctx.jobs();
            let log = registry.log_path(SYNC_JOB);
            let started = registry.ensure_running(SYNC_JOB, || {
                jobs::spawn_detached(&["sync", "--force"], &log)
            })?;
            return Ok(if started {
                "Syncing in the background".to_string()
            } else {
                "Sync already running".to_string()
            });
        }

        let token = self.tokens.get()?;
        let lines = self.cli.run(&CliRequest::sync(mode, &token))?;
        if mode == SyncMode::Last {
            return Ok(format_last_sync(&lines));
        }

        self.ctx.cache().touch(Marker::Sync)?;
        self.rebuild_cache(&token)?;
        Ok("Synced".to_string())
    }

    /// Replace the search cache with a fresh, redacted listing
    pub fn rebuild_cache(&self, token: &str) -> Result<()> {
        debug!("rebuilding cache with session {}", preview(token));
        let cache = self.ctx.cache();
        cache.reset_listing()?;

        let items: Vec<CipherRecord> = parse_listing(self.cli.run(&CliRequest::list_items(token))?)
            .context("Failed to parse item listing")?;
        let folders: Vec<FolderRecord> =
            parse_listing(self.cli.run(&CliRequest::list_folders(token))?)
                .context("Failed to parse folder listing")?;

        let redacted = redact::redact(&items, &self.ctx.skip_set());
        cache.store_items(&redacted)?;
        cache.store_folders(&folders)?;
        info!("cached {} of {} items, {} folders", redacted.len(), items.len(), folders.len());

        let config = &self.ctx.config;
        if config.icon_cache_enabled && cache.is_stale(Marker::Icons, config.icon_max_age()) {
            if let Err(e) = start_icon_job(self.ctx) {
                warn!("could not start icon job: {:#}", e);
            }
        }
        Ok(())
    }
}

/// Start the favicon prefetch unless one is already running
pub fn start_icon_job(ctx: &Context) -> Result<bool> {
    let registry = ctx.jobs();
    let log = registry.log_path(ICONS_JOB);
    registry.ensure_running(ICONS_JOB, || jobs::spawn_detached(&["icons"], &log))
}

fn session_token(lines: Vec<String>) -> Result<String> {
    match lines.into_iter().rev().find(|line| !line.trim().is_empty()) {
        Some(token) => Ok(token.trim().to_string()),
        None => bail!(WardenError::TokenUnavailable("the CLI returned no session token".to_string())),
    }
}

fn parse_listing<T: serde::de::DeserializeOwned>(lines: Vec<String>) -> Result<Vec<T>> {
    let output = lines.join("\n");
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&output)?)
}

/// Text printed by `sync --last`
pub fn format_last_sync(lines: &[String]) -> String {
    let raw = lines.join("").trim().to_string();
    if raw.is_empty() {
        return "Last sync date:\nNo received date".to_string();
    }
    let date = match DateTime::parse_from_rfc3339(&raw) {
        Ok(date) => date.with_timezone(&Utc).format("%d %b %y %H:%M UTC").to_string(),
        Err(_) => raw,
    };
    format!("Last sync date:\n{date}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as WardenResult;
    use crate::redact::PLACEHOLDER;
    use crate::token::MemoryTokenStore;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use wardenbar_core::{Config, Paths};

    /// Answers requests by their first two arguments
    #[derive(Default)]
    struct ScriptedCli {
        answers: RefCell<Vec<(String, WardenResult<Vec<String>>)>>,
        seen: RefCell<Vec<String>>,
    }

    impl ScriptedCli {
        fn on(self, command: &str, answer: WardenResult<Vec<String>>) -> Self {
            self.answers.borrow_mut().push((command.to_string(), answer));
            self
        }

        fn ok(self, command: &str, lines: &[&str]) -> Self {
            self.on(command, Ok(lines.iter().map(|l| l.to_string()).collect()))
        }

        fn ran(&self, command: &str) -> bool {
            self.seen.borrow().iter().any(|c| c == command)
        }
    }

    fn failed() -> WardenResult<Vec<String>> {
        Err(WardenError::CliRequestFailed {
            message: "failed".to_string(),
            stderr: String::new(),
        })
    }

    impl CliRunner for ScriptedCli {
        fn run(&self, request: &CliRequest) -> WardenResult<Vec<String>> {
            let key = request.args().iter().take(2).cloned().collect::<Vec<_>>().join(" ");
            self.seen.borrow_mut().push(key.clone());
            let answers = self.answers.borrow();
            let answer = answers
                .iter()
                .find(|(command, _)| key == *command || key.starts_with(&format!("{command} ")));
            match answer {
                Some((_, Ok(lines))) => Ok(lines.clone()),
                Some((_, Err(_))) => failed(),
                None => Ok(Vec::new()),
            }
        }
    }

    struct FixedPrompt(RefCell<VecDeque<String>>);

    impl FixedPrompt {
        fn new(answers: &[&str]) -> Self {
            Self(RefCell::new(answers.iter().map(|a| a.to_string()).collect()))
        }
    }

    impl Prompt for FixedPrompt {
        fn secret(&self, label: &str) -> Result<String> {
            self.text(label)
        }

        fn text(&self, label: &str) -> Result<String> {
            self.0
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("unexpected prompt {label}"))
        }
    }

    fn context(root: &std::path::Path) -> Context {
        let config = Config {
            email: "alice@example.com".to_string(),
            icon_cache_enabled: false,
            sfa_enabled: false,
            ..Config::default()
        };
        Context::new(config, Paths::with_root(root), Default::default())
    }

    const ITEMS: &str = r#"[{"id":"1","type":1,"name":"GitHub","login":{"username":"alice","password":"hunter2"}},{"id":"2","type":3,"name":"Visa","card":{"number":"4111111111111111","code":"123"}}]"#;
    const FOLDERS: &str = r#"[{"id":"f1","name":"Work"},{"id":null,"name":"No Folder"}]"#;

    #[test]
    fn test_rebuild_cache_redacts_and_stores() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(temp.path());
        ctx.config.skip_types = vec!["card".to_string()];
        let cli = ScriptedCli::default()
            .ok("list items", &[ITEMS])
            .ok("list folders", &[FOLDERS]);
        let tokens = MemoryTokenStore::default();
        let prompt = FixedPrompt::new(&[]);

        Auth::new(&ctx, &cli, &tokens, &prompt).rebuild_cache("token").unwrap();

        let items = ctx.cache().load_items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].login.as_ref().unwrap().password, PLACEHOLDER);
        assert_eq!(ctx.cache().load_folders().unwrap().len(), 2);
    }

    #[test]
    fn test_rebuild_skips_icon_job_when_one_runs() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(temp.path());
        ctx.config.icon_cache_enabled = true;
        fs::create_dir_all(ctx.paths.jobs()).unwrap();
        fs::write(ctx.paths.jobs().join("icons.pid"), std::process::id().to_string()).unwrap();

        let cli = ScriptedCli::default().ok("list items", &["[]"]).ok("list folders", &["[]"]);
        let tokens = MemoryTokenStore::default();
        let prompt = FixedPrompt::new(&[]);
        Auth::new(&ctx, &cli, &tokens, &prompt).rebuild_cache("token").unwrap();

        assert!(ctx.jobs().is_running(ICONS_JOB));
        let pid = fs::read_to_string(ctx.paths.jobs().join("icons.pid")).unwrap();
        assert_eq!(pid, std::process::id().to_string());
    }

    #[test]
    fn test_password_login_stores_token_and_builds_cache() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let cli = ScriptedCli::default()
            .on("login --check", failed())
            .ok("login alice@example.com", &["", "sessiontoken=="])
            .ok("list items", &[ITEMS])
            .ok("list folders", &[FOLDERS]);
        let tokens = MemoryTokenStore::default();
        let prompt = FixedPrompt::new(&["master"]);

        let message = Auth::new(&ctx, &cli, &tokens, &prompt).login().unwrap();
        assert_eq!(message, "Logged In.");
        assert_eq!(tokens.get().unwrap(), "sessiontoken==");
        assert!(ctx.cache().has_items());
    }

    #[test]
    fn test_email_two_step_requests_code_first() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(temp.path());
        ctx.config.sfa_enabled = true;
        ctx.config.sfa_mode = 1;
        let cli = ScriptedCli::default()
            .on("login --check", failed())
            .ok("login alice@example.com", &["tok"]);
        let tokens = MemoryTokenStore::default();
        let prompt = FixedPrompt::new(&["master", "123456"]);

        Auth::new(&ctx, &cli, &tokens, &prompt).login().unwrap();
        let logins = cli.seen.borrow().iter().filter(|c| c.starts_with("login alice")).count();
        assert_eq!(logins, 2);
    }

    #[test]
    fn test_unsupported_two_step_mode() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(temp.path());
        ctx.config.sfa_enabled = true;
        ctx.config.sfa_mode = 7;
        let cli = ScriptedCli::default().on("login --check", failed());
        let tokens = MemoryTokenStore::default();
        let prompt = FixedPrompt::new(&["master"]);

        assert!(Auth::new(&ctx, &cli, &tokens, &prompt).login().is_err());
        assert!(tokens.get().is_err());
    }

    #[test]
    fn test_login_requires_email() {
        let temp = tempfile::tempdir().unwrap();
        let mut ctx = context(temp.path());
        ctx.config.email.clear();
        let cli = ScriptedCli::default();
        let tokens = MemoryTokenStore::default();
        let prompt = FixedPrompt::new(&[]);

        assert!(Auth::new(&ctx, &cli, &tokens, &prompt).login().is_err());
        assert!(cli.seen.borrow().is_empty());
    }

    #[test]
    fn test_unlock_rebuilds_only_after_a_sync() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let cli = ScriptedCli::default()
            .ok("unlock --raw", &["tok"])
            .ok("list items", &[ITEMS]);
        let tokens = MemoryTokenStore::default();

        let prompt = FixedPrompt::new(&["master"]);
        Auth::new(&ctx, &cli, &tokens, &prompt).unlock().unwrap();
        assert_eq!(tokens.get().unwrap(), "tok");
        assert!(!cli.ran("list items"));

        ctx.cache().touch(Marker::Sync).unwrap();
        let prompt = FixedPrompt::new(&["master"]);
        Auth::new(&ctx, &cli, &tokens, &prompt).unlock().unwrap();
        assert!(cli.ran("list items"));
    }

    #[test]
    fn test_lock_forgets_token_and_cache() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        ctx.cache().store_items(&[]).unwrap();
        ctx.cache().touch(Marker::Sync).unwrap();
        let cli = ScriptedCli::default();
        let tokens = MemoryTokenStore::with_token("tok");
        let prompt = FixedPrompt::new(&[]);

        let message = Auth::new(&ctx, &cli, &tokens, &prompt).lock().unwrap();
        assert_eq!(message, "Locked");
        assert!(tokens.get().is_err());
        assert!(!ctx.cache().has_items());
        assert!(!ctx.cache().exists(Marker::Sync));
        assert!(cli.ran("lock"));
    }

    #[test]
    fn test_sync_touches_marker_and_rebuilds() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let cli = ScriptedCli::default()
            .ok("list items", &[ITEMS])
            .ok("list folders", &[FOLDERS]);
        let tokens = MemoryTokenStore::with_token("tok");
        let prompt = FixedPrompt::new(&[]);

        let message = Auth::new(&ctx, &cli, &tokens, &prompt).sync(SyncMode::Normal, false).unwrap();
        assert_eq!(message, "Synced");
        assert!(ctx.cache().exists(Marker::Sync));
        assert!(ctx.cache().has_items());
        assert!(cli.ran("list folders"));
    }

    #[test]
    fn test_sync_refused_when_locked() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let cli = ScriptedCli::default().on("list folders", failed());
        let tokens = MemoryTokenStore::with_token("tok");
        let prompt = FixedPrompt::new(&[]);

        let err = Auth::new(&ctx, &cli, &tokens, &prompt)
            .sync(SyncMode::Normal, false)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<WardenError>(), Some(WardenError::Locked)));
        assert!(!cli.ran("sync"));
    }

    #[test]
    fn test_format_last_sync() {
        assert_eq!(format_last_sync(&[]), "Last sync date:\nNo received date");
        assert_eq!(
            format_last_sync(&["2022-02-28T16:58:54.900Z".to_string()]),
            "Last sync date:\n28 Feb 22 16:58 UTC"
        );
    }
}
