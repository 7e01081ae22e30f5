//! External vault CLI runner
//!
//! Every remote operation goes through the `bw` executable. A request is
//! the argument list plus optional session token, secret environment and
//! deadline; the runner maps the exit status onto [`WardenError`].

use std::env;
use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{Result, WardenError};

/// Partial output line that marks a successful email code request
pub const TWO_STEP_SENTINEL: &str = "Two-step login code";

const CANCELLED_MARKER: &str = "User cancelled.";
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Environment variable the password is handed over in
const PASSWORD_ENV: &str = "BW_PASSWORD";

/// Two-step login methods supported by the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorMethod {
    Authenticator,
    Email,
    YubiKey,
}

impl TwoFactorMethod {
    pub fn from_mode(mode: u8) -> Option<Self> {
        match mode {
            0 => Some(Self::Authenticator),
            1 => Some(Self::Email),
            3 => Some(Self::YubiKey),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Authenticator => 0,
            Self::Email => 1,
            Self::YubiKey => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Authenticator => "Authenticator-app",
            Self::Email => "Email",
            Self::YubiKey => "YubiKey",
        }
    }
}

/// `sync` variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Normal,
    Force,
    Last,
}

/// One invocation of the external CLI
#[derive(Clone)]
pub struct CliRequest {
    args: Vec<String>,
    session: Option<Zeroizing<String>>,
    env: Vec<(String, Zeroizing<String>)>,
    timeout: Option<Duration>,
    message: String,
}

impl CliRequest {
    pub fn new<I, S>(message: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            session: None,
            env: Vec::new(),
            timeout: None,
            message: message.to_string(),
        }
    }

    /// Append `--session <token>` at spawn time
    pub fn session(mut self, token: &str) -> Self {
        self.session = Some(Zeroizing::new(token.to_string()));
        self
    }

    /// Pass a secret through the child's environment
    pub fn secret_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), Zeroizing::new(value.to_string())));
        self
    }

    /// Kill the child after `timeout` and inspect whatever it printed
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(k, _)| k.as_str())
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // Request builders, one per CLI operation

    pub fn list_items(session: &str) -> Self {
        Self::new("Failed to get Bitwarden items.", ["list", "items"]).session(session)
    }

    pub fn list_folders(session: &str) -> Self {
        Self::new("Failed to get Bitwarden folders.", ["list", "folders"]).session(session)
    }

    pub fn get_item(item_id: &str, session: &str) -> Self {
        Self::new("Failed to get Bitwarden item.", ["get", "item", item_id, "--pretty"])
            .session(session)
    }

    pub fn get_totp(item_id: &str, session: &str) -> Self {
        Self::new("Failed to get Bitwarden item.", ["get", "totp", item_id]).session(session)
    }

    pub fn get_attachment(attachment_id: &str, item_id: &str, output: &Path, session: &str) -> Self {
        // a trailing separator makes the CLI treat the output as a directory
        let mut output = output.display().to_string();
        if !output.ends_with('/') {
            output.push('/');
        }
        Self::new(
            "Failed to get Bitwarden item.",
            ["get", "attachment", attachment_id, "--itemid", item_id, "--output", output.as_str(), "--raw"],
        )
        .session(session)
    }

    pub fn sync(mode: SyncMode, session: &str) -> Self {
        let request = match mode {
            SyncMode::Normal => Self::new("Syncing Bitwarden failed.", ["sync"]),
            SyncMode::Force => Self::new("Syncing Bitwarden failed.", ["sync", "--force"]),
            SyncMode::Last => Self::new("Get last sync date failed.", ["sync", "--last"]),
        };
        request.session(session)
    }

    pub fn lock() -> Self {
        Self::new("Locking Bitwarden failed.", ["lock"])
    }

    pub fn logout() -> Self {
        Self::new("Logout of Bitwarden failed.", ["logout"])
    }

    pub fn unlock(password: &str) -> Self {
        Self::new(
            "Unlocking Bitwarden failed.",
            ["unlock", "--raw", "--passwordenv", PASSWORD_ENV],
        )
        .secret_env(PASSWORD_ENV, password)
    }

    /// Password login, optionally completing a two-step challenge
    pub fn login(email: &str, password: &str, two_factor: Option<(TwoFactorMethod, &str)>) -> Self {
        let method = two_factor.map(|(kind, _)| kind.code().to_string());
        let mut args = vec!["login", email, "--raw", "--passwordenv", PASSWORD_ENV];
        if let (Some(method), Some((_, code))) = (method.as_deref(), two_factor) {
            args.extend(["--method", method, "--code", code]);
        }
        Self::new("Login to Bitwarden failed.", args).secret_env(PASSWORD_ENV, password)
    }

    /// Ask the server to email a two-step code. The CLI then waits on a
    /// prompt, so the request runs under a deadline.
    pub fn request_email_code(email: &str, password: &str, timeout: Duration) -> Self {
        let method = TwoFactorMethod::Email.code().to_string();
        Self::new(
            "Failed to request Bitwarden email token.",
            ["login", email, "--raw", "--passwordenv", PASSWORD_ENV, "--method", method.as_str()],
        )
        .secret_env(PASSWORD_ENV, password)
        .timeout(timeout)
    }

    pub fn login_apikey(client_id: &str, client_secret: &str) -> Self {
        Self::new("Login to Bitwarden failed.", ["login", "--apikey"])
            .secret_env("BW_CLIENTID", client_id)
            .secret_env("BW_CLIENTSECRET", client_secret)
    }

    pub fn login_check() -> Self {
        Self::new("Not logged in. Need to login first.", ["login", "--check", "--quiet"])
    }

    pub fn unlock_check() -> Self {
        Self::new("Not unlocked. Need to unlock first.", ["unlock", "--check", "--quiet"])
    }

    /// `unlock --check` does not honour a session token, so a cheap
    /// authenticated listing stands in for it
    pub fn session_check(session: &str) -> Self {
        Self::new(
            "Not unlocked. Need to unlock first.",
            ["list", "folders", "--nointeraction"],
        )
        .session(session)
    }

    pub fn config_server(url: &str) -> Self {
        Self::new("Failed to set the Bitwarden server.", ["config", "server", url])
    }
}

impl fmt::Display for CliRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))?;
        if self.session.is_some() {
            write!(f, " --session <redacted>")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CliRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliRequest")
            .field("args", &self.args)
            .field("session", &self.session.is_some())
            .field("env", &self.env_keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Something that can answer CLI requests
pub trait CliRunner {
    /// Run the request and return its stdout lines
    fn run(&self, request: &CliRequest) -> Result<Vec<String>>;
}

/// The real `bw` executable
#[derive(Debug, Clone)]
pub struct BwCli {
    exec: String,
    search_path: String,
}

impl BwCli {
    pub fn new(exec: impl Into<String>) -> Self {
        Self {
            exec: exec.into(),
            search_path: env::var("PATH").unwrap_or_default(),
        }
    }

    fn not_found(&self) -> WardenError {
        WardenError::CliNotFound {
            exec: self.exec.clone(),
            path: self.search_path.clone(),
        }
    }
}

/// Captured result of one child process
#[derive(Debug, Default)]
struct Outcome {
    /// `None` when the child was killed or died on a signal
    code: Option<i32>,
    timed_out: bool,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl CliRunner for BwCli {
    fn run(&self, request: &CliRequest) -> Result<Vec<String>> {
        debug!("running {} {}", self.exec, request);

        let mut command = Command::new(&self.exec);
        command
            .args(&request.args)
            .env("NODE_NO_WARNINGS", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(token) = &request.session {
            command.arg("--session").arg(token.as_str());
        }
        for (key, value) in &request.env {
            command.env(key, value.as_str());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(WardenError::CliNotExecutable(self.exec.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let (stdout, stdout_reader) = collect_lines(child.stdout.take());
        let (stderr, stderr_reader) = collect_lines(child.stderr.take());

        let mut outcome = Outcome::default();
        match request.timeout {
            None => {
                outcome.code = child.wait()?.code();
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                loop {
                    if let Some(status) = child.try_wait()? {
                        outcome.code = status.code();
                        break;
                    }
                    if Instant::now() >= deadline {
                        debug!("deadline of {:?} reached, killing {}", limit, self.exec);
                        // the child may exit between try_wait and kill
                        let _ = child.kill();
                        child.wait()?;
                        outcome.timed_out = true;
                        break;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }

        drain(stdout_reader, outcome.timed_out);
        drain(stderr_reader, outcome.timed_out);
        outcome.stdout = take_lines(&stdout);
        outcome.stderr = take_lines(&stderr);

        self.check_outcome(request, outcome)
    }
}

impl BwCli {
    fn check_outcome(&self, request: &CliRequest, outcome: Outcome) -> Result<Vec<String>> {
        if outcome.timed_out {
            let saw_sentinel = outcome
                .stderr
                .iter()
                .chain(outcome.stdout.iter())
                .any(|line| line.contains(TWO_STEP_SENTINEL));
            if saw_sentinel {
                return Ok(vec![TWO_STEP_SENTINEL.to_string()]);
            }
            warn!("{} timed out without a recognised response", self.exec);
            return Err(WardenError::CliUnexpectedExit {
                code: -1,
                stderr: outcome.stderr.join(" "),
            });
        }

        match outcome.code {
            Some(0) => Ok(outcome.stdout),
            Some(127) => Err(self.not_found()),
            Some(126) => Err(WardenError::CliNotExecutable(self.exec.clone())),
            Some(1) => {
                if outcome.stderr.iter().any(|line| line.contains(CANCELLED_MARKER)) {
                    return Err(WardenError::UserCancelled);
                }
                let stderr = outcome.stderr.join("\n");
                debug!("exit code 1: {} {}", request.message(), stderr);
                Err(WardenError::CliRequestFailed {
                    message: request.message().to_string(),
                    stderr,
                })
            }
            code => {
                let code = code.unwrap_or(-1);
                debug!("unexpected exit code {} from {}", code, self.exec);
                Err(WardenError::CliUnexpectedExit {
                    code,
                    stderr: outcome.stderr.join(" "),
                })
            }
        }
    }
}

type Lines = Arc<Mutex<Vec<String>>>;

fn collect_lines<R: Read + Send + 'static>(source: Option<R>) -> (Lines, Option<JoinHandle<()>>) {
    let lines: Lines = Arc::default();
    let handle = source.map(|source| {
        let sink = Arc::clone(&lines);
        thread::spawn(move || {
            for line in BufReader::new(source).lines() {
                let Ok(line) = line else { break };
                if let Ok(mut sink) = sink.lock() {
                    sink.push(line);
                }
            }
        })
    });
    (lines, handle)
}

/// Wait for a reader thread. After a kill, a grandchild may still hold the
/// pipe open, so only wait a short grace period.
fn drain(handle: Option<JoinHandle<()>>, killed: bool) {
    let Some(handle) = handle else { return };
    if killed {
        let until = Instant::now() + DRAIN_GRACE;
        while !handle.is_finished() && Instant::now() < until {
            thread::sleep(POLL_INTERVAL);
        }
        if !handle.is_finished() {
            return;
        }
    }
    let _ = handle.join();
}

fn take_lines(lines: &Lines) -> Vec<String> {
    lines.lock().map(|mut l| std::mem::take(&mut *l)).unwrap_or_default()
}
