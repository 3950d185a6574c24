//! Running configured actions
//!
//! Each action is started as an independent process that does not share the
//! daemon's console and is never waited on.

use std::process::{Command, Stdio};

use crate::environment::{self, EnvTable};

/// `DETACHED_PROCESS` creation flag
#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Errors starting an action
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("command array is empty")]
    Empty,

    #[error("failed to start command {command:?}: {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },
}

/// Starts actions on behalf of the dispatch loop
pub trait ActionRunner {
    /// Start `command` and return the new process id without waiting for it
    fn run(&mut self, command: &[String]) -> Result<u32, ActionError>;
}

/// Starts each action as a detached process with a freshly resolved
/// environment
#[derive(Debug, Default)]
pub struct DetachedSpawner;

impl ActionRunner for DetachedSpawner {
    fn run(&mut self, command: &[String]) -> Result<u32, ActionError> {
        spawn_detached(command, &environment::resolve())
    }
}

/// Start `command` with exactly the variables in `env`
pub fn spawn_detached(command: &[String], env: &EnvTable) -> Result<u32, ActionError> {
    let (program, args) = command.split_first().ok_or(ActionError::Empty)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(DETACHED_PROCESS);
    }

    let child = cmd.spawn().map_err(|source| ActionError::Spawn {
        command: command.to_vec(),
        source,
    })?;
    // the child handle is dropped without waiting; the process keeps running
    Ok(child.id())
}
