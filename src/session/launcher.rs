//! Launching the agent into the interactive session
//!
//! A service runs in session 0 with no access to the user's desktop or input,
//! so it cannot register hotkeys itself. Instead it starts a second copy of
//! this executable inside the active user session, as that user, attached to
//! the user's interactive desktop.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::env_block::encode_environment_block;
use super::LaunchError;
use crate::environment::EnvTable;
use crate::ipc::PIPE_ENV_VAR;
use crate::state::{AgentHandle, AgentLauncher};

/// Default interactive desktop of a session
pub const INTERACTIVE_DESKTOP: &str = r"winsta0\default";

/// OS operations the launch sequence is built from
pub trait SessionApi {
    /// Primary token usable to create a process as the session user
    type Token;
    /// Handles of a created process
    type Process;

    /// Identifier of the active interactive session, if there is one
    fn active_session(&self) -> Option<u32>;

    /// Path of the running executable
    fn current_exe(&self) -> io::Result<PathBuf>;

    /// Query the session's user token and turn it into a primary token. The
    /// intermediate token must be released whatever the outcome.
    fn primary_token(&self, session: u32) -> Result<Self::Token, LaunchError>;

    /// The user's own persisted environment, not the caller's
    fn user_environment(&self, token: &Self::Token) -> Result<EnvTable, LaunchError>;

    /// Create the process as the token's user
    fn spawn(&self, token: &Self::Token, request: &SpawnRequest) -> Result<Self::Process, LaunchError>;
}

/// What the agent should be started with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Passed as `--config`
    pub config_path: String,
    /// Passed as `--log` when non-empty
    pub log_path: String,
    /// Control channel endpoint path, exported as `HOTKEYS_IPC_PIPE`
    pub channel: Option<String>,
}

/// Fully prepared process creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Absolute executable path
    pub application: PathBuf,
    /// Escaped command line, starting with the executable
    pub command_line: String,
    /// Encoded environment block
    pub environment: Vec<u16>,
    /// Desktop to attach to
    pub desktop: &'static str,
}

/// Run the launch sequence against `api`.
///
/// Any failure aborts the sequence; resources acquired so far are released
/// when their owners go out of scope.
pub fn launch<S: SessionApi>(api: &S, request: &LaunchRequest) -> Result<S::Process, LaunchError> {
    let session = api
        .active_session()
        .ok_or(LaunchError::NoInteractiveSession)?;
    debug!(session, "active console session");

    let exe = api.current_exe().map_err(LaunchError::Executable)?;
    let exe = std::path::absolute(&exe).map_err(LaunchError::Executable)?;

    let token = api.primary_token(session)?;

    let mut env = api.user_environment(&token)?;
    if let Some(channel) = &request.channel {
        env.set(PIPE_ENV_VAR, channel.as_str());
    }
    env.sort();
    let environment = encode_environment_block(&env)?;

    let spawn = SpawnRequest {
        command_line: agent_command_line(&exe, &request.config_path, &request.log_path),
        application: exe,
        environment,
        desktop: INTERACTIVE_DESKTOP,
    };
    let process = api.spawn(&token, &spawn)?;
    info!(session, command_line = %spawn.command_line, "agent launched in active session");
    Ok(process)
}

/// [`AgentLauncher`] running [`launch`] with a fixed request
pub struct SessionLauncher<S> {
    api: S,
    request: LaunchRequest,
}

impl<S: SessionApi> SessionLauncher<S> {
    /// Launcher starting the agent described by `request` through `api`
    pub fn new(api: S, request: LaunchRequest) -> Self {
        Self { api, request }
    }
}

impl<S> AgentLauncher for SessionLauncher<S>
where
    S: SessionApi,
    S::Process: AgentHandle,
{
    type Agent = S::Process;

    fn launch(&mut self) -> Result<S::Process, LaunchError> {
        launch(&self.api, &self.request)
    }
}

/// `<exe> --config <path> [--log <path>]`, every part escaped
pub fn agent_command_line(exe: &Path, config_path: &str, log_path: &str) -> String {
    let mut args = vec![
        exe.to_string_lossy().into_owned(),
        "--config".to_string(),
        config_path.to_string(),
    ];
    if !log_path.is_empty() {
        args.push("--log".to_string());
        args.push(log_path.to_string());
    }
    args.iter()
        .map(|a| escape_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote one argument so `CommandLineToArgvW` reads it back unchanged.
///
/// Arguments without spaces, tabs, quotes or backslashes pass through as is.
/// Backslashes are only doubled where they precede a quote.
pub fn escape_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    let needs_backslash = arg.contains(['"', '\\']);
    let has_space = arg.contains([' ', '\t']);
    if !needs_backslash && !has_space {
        return arg.to_string();
    }
    if !needs_backslash {
        return format!("\"{arg}\"");
    }

    let mut out = String::with_capacity(arg.len() + 2);
    if has_space {
        out.push('"');
    }
    let mut slashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => slashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(slashes + 1));
                slashes = 0;
            }
            _ => slashes = 0,
        }
        out.push(c);
    }
    if has_space {
        out.extend(std::iter::repeat('\\').take(slashes));
        out.push('"');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Scriptable session API that records the order of calls
    #[derive(Default)]
    struct FakeSession {
        session: Option<u32>,
        token_fails: bool,
        env: Vec<(String, String)>,
        calls: RefCell<Vec<&'static str>>,
        spawned: RefCell<Option<SpawnRequest>>,
    }

    impl FakeSession {
        fn ready() -> Self {
            Self {
                session: Some(1),
                env: vec![
                    ("USERPROFILE".into(), r"C:\Users\me".into()),
                    ("Path".into(), r"C:\Windows".into()),
                ],
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.borrow().clone()
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    struct FakeProcess(u32);

    impl AgentHandle for FakeProcess {
        fn pid(&self) -> u32 {
            self.0
        }

        fn terminate(&self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SessionApi for FakeSession {
        type Token = u32;
        type Process = FakeProcess;

        fn active_session(&self) -> Option<u32> {
            self.calls.borrow_mut().push("session");
            self.session
        }

        fn current_exe(&self) -> io::Result<PathBuf> {
            self.calls.borrow_mut().push("exe");
            Ok(PathBuf::from("/opt/hotkeys/hotkeys.exe"))
        }

        fn primary_token(&self, session: u32) -> Result<u32, LaunchError> {
            self.calls.borrow_mut().push("token");
            if self.token_fails {
                return Err(LaunchError::SessionTokenUnavailable {
                    session,
                    source: io::Error::from_raw_os_error(1008),
                });
            }
            Ok(session + 100)
        }

        fn user_environment(&self, _token: &u32) -> Result<EnvTable, LaunchError> {
            self.calls.borrow_mut().push("environment");
            Ok(EnvTable::from_pairs(self.env.iter().cloned()))
        }

        fn spawn(&self, token: &u32, request: &SpawnRequest) -> Result<FakeProcess, LaunchError> {
            self.calls.borrow_mut().push("spawn");
            *self.spawned.borrow_mut() = Some(request.clone());
            Ok(FakeProcess(*token))
        }
    }

    fn request() -> LaunchRequest {
        LaunchRequest {
            config_path: r"C:\Users\me\.config\hotkeys.toml".into(),
            log_path: String::new(),
            channel: None,
        }
    }

    #[test]
    fn test_launch_sequence() {
        let api = FakeSession::ready();
        let process = launch(&api, &request()).unwrap();
        assert_eq!(process, FakeProcess(101));
        assert_eq!(api.calls(), vec!["session", "exe", "token", "environment", "spawn"]);

        let spawned = api.spawned.borrow().clone().unwrap();
        assert_eq!(spawned.desktop, INTERACTIVE_DESKTOP);
        assert!(spawned.command_line.ends_with(r"--config C:\Users\me\.config\hotkeys.toml"));
        assert!(!spawned.command_line.contains("--log"));
        assert_eq!(*spawned.environment.last().unwrap(), 0);
    }

    #[test]
    fn test_no_session_stops_before_token() {
        let api = FakeSession::default();
        let err = launch(&api, &request()).unwrap_err();
        assert!(matches!(err, LaunchError::NoInteractiveSession));
        assert_eq!(api.calls(), vec!["session"]);
    }

    #[test]
    fn test_token_failure_stops_before_spawn() {
        let api = FakeSession {
            token_fails: true,
            ..FakeSession::ready()
        };
        let err = launch(&api, &request()).unwrap_err();
        assert!(matches!(err, LaunchError::SessionTokenUnavailable { session: 1, .. }));
        assert!(!api.calls().contains(&"spawn"));
    }

    #[test]
    fn test_nul_in_environment_prevents_spawn() {
        let mut api = FakeSession::ready();
        api.env.push(("BROKEN".into(), "a\0b".into()));
        let err = launch(&api, &request()).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidEnvironment { .. }));
        assert!(!api.calls().contains(&"spawn"));
        assert!(api.spawned.borrow().is_none());
    }

    #[test]
    fn test_channel_is_exported_to_agent() {
        let api = FakeSession::ready();
        let req = LaunchRequest {
            channel: Some(r"\\.\pipe\hotkeys-1-2".into()),
            log_path: r"C:\logs\hot keys.log".into(),
            ..request()
        };
        launch(&api, &req).unwrap();

        let spawned = api.spawned.borrow().clone().unwrap();
        let env = super::super::env_block::decode_environment_block(&spawned.environment);
        assert_eq!(env.get(PIPE_ENV_VAR), Some(r"\\.\pipe\hotkeys-1-2"));
        assert_eq!(env.get("USERPROFILE"), Some(r"C:\Users\me"));
        assert!(spawned.command_line.ends_with(r#"--log "C:\logs\hot keys.log""#));

        // block is sorted by name
        let names: Vec<String> = env.iter().map(|(k, _)| k.to_uppercase()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_session_launcher_relaunches_with_same_request() {
        let mut launcher = SessionLauncher::new(FakeSession::ready(), request());
        assert_eq!(launcher.launch().unwrap().pid(), 101);
        assert_eq!(launcher.launch().unwrap().pid(), 101);
        assert_eq!(launcher.api.calls().iter().filter(|c| **c == "spawn").count(), 2);
    }

    #[test]
    fn test_command_line() {
        let line = agent_command_line(
            Path::new(r"C:\Program Files\Hotkeys\hotkeys.exe"),
            r"C:\cfg\hotkeys.toml",
            r"C:\log dir\out.log",
        );
        assert_eq!(
            line,
            r#""C:\Program Files\Hotkeys\hotkeys.exe" --config C:\cfg\hotkeys.toml --log "C:\log dir\out.log""#
        );
    }

    #[test]
    fn test_escape_arg() {
        assert_eq!(escape_arg(""), r#""""#);
        assert_eq!(escape_arg("plain"), "plain");
        assert_eq!(escape_arg("two words"), r#""two words""#);
        assert_eq!(escape_arg(r"C:\dir\file"), r"C:\dir\file");
        assert_eq!(escape_arg(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(escape_arg(r#"a\"b"#), r#"a\\\"b"#);
        assert_eq!(escape_arg(r"C:\my dir\"), r#""C:\my dir\\""#);
        assert_eq!(escape_arg("tab\there"), "\"tab\there\"");
    }
}
