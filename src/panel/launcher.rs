//! Panel process spawning.

use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};

/// How to start the panel when nobody listens on its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelLauncher {
    /// Executable path or name.
    pub program: String,
    /// Display the panel attaches to.
    pub display: String,
    /// Configuration module name passed to the panel.
    pub config_name: String,
}

impl PanelLauncher {
    /// Arguments passed to the panel.
    pub fn args(&self) -> Vec<String> {
        vec![
            "--no-stay".to_string(),
            "--display".to_string(),
            self.display.clone(),
            "--config".to_string(),
            self.config_name.clone(),
        ]
    }

    /// Start the panel detached from our stdio.
    ///
    /// The caller owns the child and reaps it once it exits.
    ///
    /// # Errors
    ///
    /// Fails if the program cannot be executed.
    pub fn spawn(&self) -> Result<Child> {
        let child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn panel '{}'", self.program))?;
        log::info!("[panel] spawned {} (pid {})", self.program, child.id());
        Ok(child)
    }
}
