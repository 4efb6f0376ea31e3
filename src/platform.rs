//! Seams to the operating system. The proxy only calls these traits; the defaults here
//! are portable and do the least that is still useful: export the CA for manual import,
//! log proxy settings for the user to apply, guard with a lock file, probe the runtime.

use std::{fs, io::Write, path::{Path, PathBuf}, process::Stdio};
use log::{info, warn};

use crate::utils::MidnightError;

pub trait TrustBootstrap {
    /// Makes the OS trust `cert_pem`. Must be idempotent.
    fn ensure_ca_trusted(&self, cert_pem: &str) -> Result<(), MidnightError>;
}

pub trait SystemProxyConfig {
    fn set(&self, enabled: bool, proxy_address: &str, bypass_list: &str) -> Result<(), MidnightError>;
}

pub trait SingleInstanceGuard {
    /// `false` when another instance already holds `name`
    fn try_acquire(&mut self, name: &str) -> bool;
}

pub trait ScriptRuntime {
    fn ensure_available(&self) -> Result<(), MidnightError>;
}

// ---------------------------------------------------------------------------------------------- //

pub struct ExportingTrustBootstrap {
    dir: PathBuf
}

impl ExportingTrustBootstrap {
    pub const FILE_NAME: &'static str = "midnight-ca.pem";

    pub fn new(dir: &Path) -> Self {
        ExportingTrustBootstrap { dir: dir.to_path_buf() }
    }

    pub fn exported_path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }
}

impl TrustBootstrap for ExportingTrustBootstrap {
    fn ensure_ca_trusted(&self, cert_pem: &str) -> Result<(), MidnightError> {
        let path = self.exported_path();
        let up_to_date = fs::read_to_string(&path)
            .map(|existing| existing == cert_pem)
            .unwrap_or(false);

        if !up_to_date {
            fs::write(&path, cert_pem.as_bytes())?;
        }

        info!("CA certificate is at '{}', import it into the trusted root store once", path.display());
        Ok(())
    }
}

/// Leaves OS settings alone and tells the user what to configure
pub struct ManualSystemProxy;

impl SystemProxyConfig for ManualSystemProxy {
    fn set(&self, enabled: bool, proxy_address: &str, bypass_list: &str) -> Result<(), MidnightError> {
        if enabled {
            info!("Point the system proxy to {} (bypass: {})", proxy_address, bypass_list);
        }
        else {
            info!("The system proxy can be switched off now");
        }
        Ok(())
    }
}

/// Enables the system proxy on creation and disables it when dropped, so early returns
/// and panics unwinding through `main` restore the settings too.
pub struct SystemProxyGuard<'a> {
    config: &'a dyn SystemProxyConfig
}

impl<'a> SystemProxyGuard<'a> {
    pub fn enable(config: &'a dyn SystemProxyConfig, proxy_address: &str, bypass_list: &str) -> Self {
        if let Err(err) = config.set(true, proxy_address, bypass_list) {
            warn!("Could not enable system proxy: {}", err);
        }
        SystemProxyGuard { config }
    }
}

impl Drop for SystemProxyGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.config.set(false, "", "") {
            warn!("Could not disable system proxy: {}", err);
        }
    }
}

// ---------------------------------------------------------------------------------------------- //

pub struct LockFileGuard {
    dir: PathBuf,
    held: Option<PathBuf>
}

impl LockFileGuard {
    pub fn new(dir: &Path) -> Self {
        LockFileGuard {
            dir: dir.to_path_buf(),
            held: None
        }
    }

    pub fn release(&mut self) {
        if let Some(path) = self.held.take() {
            if let Err(err) = fs::remove_file(&path) {
                warn!("Could not remove lock file '{}': {}", path.display(), err);
            }
        }
    }
}

impl SingleInstanceGuard for LockFileGuard {
    fn try_acquire(&mut self, name: &str) -> bool {
        if self.held.is_some() {
            return true;
        }

        let path = self.dir.join(format!("{}.lock", name));
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                self.held = Some(path);
                true
            },
            Err(err) => {
                warn!("Lock '{}' is taken ({}); remove it if no other instance runs", path.display(), err);
                false
            }
        }
    }
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------------------------- //

pub struct CommandScriptRuntime {
    program: String
}

impl CommandScriptRuntime {
    pub fn new(program: &str) -> Self {
        CommandScriptRuntime { program: program.to_string() }
    }
}

impl ScriptRuntime for CommandScriptRuntime {
    fn ensure_available(&self) -> Result<(), MidnightError> {
        let status = std::process::Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| MidnightError::TransformError(format!("'{}' is not available: {}", &self.program, e)))?;

        if !status.success() {
            return Err(
                MidnightError::TransformError(format!("'{} --version' exited with {}", &self.program, status))
            );
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------------------------- //
