//! Program catalog and launching

use async_trait::async_trait;

use crate::error::LaunchError;
use crate::types::Program;

/// Read-only lookup of the programs this host exposes
pub trait ProgramCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<Program>;

    fn list(&self) -> Vec<Program>;
}

/// Starts a program process
#[async_trait]
pub trait ProgramLauncher: Send + Sync {
    async fn launch(&self, program: &Program) -> Result<Box<dyn ProgramHandle>, LaunchError>;
}

/// A running program owned by a session
#[async_trait]
pub trait ProgramHandle: Send {
    /// OS process id, when known
    fn pid(&self) -> Option<u32>;

    /// Terminate the program and reap it
    async fn kill(&mut self) -> std::io::Result<()>;
}
