//! External command-line tools
//!
//! Archive packing (`nwn_erf`) and the optional JSON → TLK compiler
//! (`nwn_tlk`) run as blocking child processes. Both sit behind traits so a
//! build can be driven without the tools installed.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Packs a directory of resources into an archive
pub trait Packager {
    /// Pack every file in `source_dir` into `archive`
    fn pack(&self, source_dir: &Path, archive: &Path) -> Result<()>;
}

/// Compiles the JSON talk table form into a binary TLK
pub trait TlkCompiler {
    fn compile(&self, json: &Path, tlk: &Path) -> Result<()>;
}

/// `nwn_erf -e HAK -c <dir> -f <archive>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NwnErf {
    pub program: PathBuf,
}

impl NwnErf {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Packager for NwnErf {
    fn pack(&self, source_dir: &Path, archive: &Path) -> Result<()> {
        info!(source = %source_dir.display(), archive = %archive.display(), "packing HAK");
        run(
            "nwn_erf",
            &self.program,
            &[
                OsStr::new("-e"),
                OsStr::new("HAK"),
                OsStr::new("-c"),
                source_dir.as_os_str(),
                OsStr::new("-f"),
                archive.as_os_str(),
            ],
        )
    }
}

/// `nwn_tlk -i <json> -o <tlk>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NwnTlk {
    pub program: PathBuf,
}

impl NwnTlk {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TlkCompiler for NwnTlk {
    fn compile(&self, json: &Path, tlk: &Path) -> Result<()> {
        info!(input = %json.display(), output = %tlk.display(), "compiling TLK");
        run(
            "nwn_tlk",
            &self.program,
            &[OsStr::new("-i"), json.as_os_str(), OsStr::new("-o"), tlk.as_os_str()],
        )
    }
}

fn run(tool: &'static str, program: &Path, args: &[&OsStr]) -> Result<()> {
    debug!(tool, program = %program.display(), ?args, "spawning");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::ToolSpawn {
            tool,
            program: program.to_path_buf(),
            source: e,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Error::ToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }
}
