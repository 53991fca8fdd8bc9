//! Service types, ref-update commands, and capability constants for the
//! smart protocol.

use std::fmt;
use std::str::FromStr;

use crate::errors::GitError;

/// Git service types for the smart protocol.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ServiceType {
    UploadPack,
    ReceivePack,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceType::UploadPack => write!(f, "git-upload-pack"),
            ServiceType::ReceivePack => write!(f, "git-receive-pack"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(ServiceType::UploadPack),
            "git-receive-pack" => Ok(ServiceType::ReceivePack),
            _ => Err(GitError::InvalidArgument(format!("invalid service: {s}"))),
        }
    }
}

/// Outcome of applying one ref-update command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Success,
    Failed(String),
}

/// One `<old> <new> <ref>` line from a receive-pack request, plus the
/// status accumulated while applying it.
#[derive(Debug, Clone)]
pub struct RefCommand {
    pub old_hash: String,
    pub new_hash: String,
    pub ref_name: String,
    pub status: CommandStatus,
}

impl RefCommand {
    pub fn new(old_hash: String, new_hash: String, ref_name: String) -> Self {
        Self {
            old_hash,
            new_hash,
            ref_name,
            status: CommandStatus::Pending,
        }
    }

    pub fn failed(&mut self, error: String) {
        self.status = CommandStatus::Failed(error);
    }

    pub fn success(&mut self) {
        self.status = CommandStatus::Success;
    }

    /// Render the report-status line for this command.
    pub fn report_line(&self) -> String {
        match &self.status {
            CommandStatus::Success => format!("ok {}\n", self.ref_name),
            CommandStatus::Failed(error) => format!("ng {} {}\n", self.ref_name, error),
            // A pending command was never applied; report it as failed.
            CommandStatus::Pending => format!("ng {} not attempted\n", self.ref_name),
        }
    }
}

/// Protocol constants.
pub const LF: char = '\n';
pub const SP: char = ' ';
pub const NUL: char = '\0';

/// Capabilities advertised on the first ref line of every advertisement.
pub const CAP_LIST: &str = "report-status delete-refs ofs-delta";
