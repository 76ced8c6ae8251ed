//! Program catalog and process launcher

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use hs_core::traits::{ProgramCatalog, ProgramHandle, ProgramLauncher};
use hs_core::{LaunchError, Program};

/// Catalog built from the `[[programs]]` entries of `host.toml`
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    programs: Vec<Program>,
}

impl StaticCatalog {
    pub fn new(programs: Vec<Program>) -> Self {
        Self { programs }
    }
}

impl ProgramCatalog for StaticCatalog {
    fn get(&self, id: &str) -> Option<Program> {
        self.programs.iter().find(|p| p.id == id).cloned()
    }

    fn list(&self) -> Vec<Program> {
        self.programs.clone()
    }
}

/// Launches programs as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl ProgramLauncher for ProcessLauncher {
    async fn launch(&self, program: &Program) -> Result<Box<dyn ProgramHandle>, LaunchError> {
        if program.path.trim().is_empty() {
            return Err(LaunchError::EmptyPath(program.id.clone()));
        }

        let child = Command::new(&program.path)
            .args(&program.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: program.path.clone(),
                source,
            })?;

        tracing::info!(
            "Launched {} ({}) pid {:?}",
            program.name,
            program.path,
            child.id()
        );
        Ok(Box::new(ProcessHandle { child }))
    }
}

struct ProcessHandle {
    child: Child,
}

#[async_trait]
impl ProgramHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await
    }
}
