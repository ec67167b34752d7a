//! Backend process lifecycle.

use dashmap::DashMap;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::ScaleError;

/// Brings backend instances up and down as the pool scales.
///
/// Launch failures are typed and non-fatal to callers; the autoscaler logs
/// them and retries on its next cycle.
pub trait BackendLauncher: Send + Sync {
    /// Bring up a backend listening on `port`.
    fn launch(&self, port: u16) -> Result<(), ScaleError>;

    /// Tear down the backend on `port`, if this launcher owns one there.
    fn terminate(&self, port: u16);
}

/// Launches backends by spawning a configured command with the port as its
/// final argument.
///
/// Without a configured command the launcher runs unmanaged: backends are
/// assumed to be operated externally, launch succeeds without doing
/// anything, and terminate is a no-op.
#[derive(Debug, Default)]
pub struct CommandLauncher {
    command: Option<String>,
    children: DashMap<u16, Child>,
}

impl CommandLauncher {
    /// Launcher that spawns `command <port>` per backend.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            children: DashMap::new(),
        }
    }

    /// Launcher for externally-managed backends.
    pub fn unmanaged() -> Self {
        Self::default()
    }

    /// Build from the `BALLAST_BACKEND_CMD` environment variable, falling
    /// back to unmanaged mode when it is unset or empty.
    pub fn from_env() -> Self {
        match std::env::var("BALLAST_BACKEND_CMD") {
            Ok(command) if !command.trim().is_empty() => Self::new(command),
            _ => Self::unmanaged(),
        }
    }
}

impl BackendLauncher for CommandLauncher {
    fn launch(&self, port: u16) -> Result<(), ScaleError> {
        let Some(command) = &self.command else {
            debug!(port, "unmanaged launcher, backend assumed external");
            return Ok(());
        };

        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or(command.as_str());
        let child = Command::new(program)
            .args(parts)
            .arg(port.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScaleError::LaunchFailed { port, source })?;

        info!(port, command, "backend launched");
        self.children.insert(port, child);
        Ok(())
    }

    fn terminate(&self, port: u16) {
        if let Some((_, mut child)) = self.children.remove(&port) {
            if let Err(error) = child.start_kill() {
                warn!(port, %error, "failed to signal backend");
            } else {
                info!(port, "backend terminated");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmanaged_launch_always_succeeds() {
        let launcher = CommandLauncher::unmanaged();
        assert!(launcher.launch(42180).is_ok());
        launcher.terminate(42180);
    }

    #[tokio::test]
    async fn missing_command_is_a_typed_launch_failure() {
        let launcher = CommandLauncher::new("/nonexistent/ballast-backend");
        assert!(matches!(
            launcher.launch(42181),
            Err(ScaleError::LaunchFailed { port: 42181, .. })
        ));
    }
}
