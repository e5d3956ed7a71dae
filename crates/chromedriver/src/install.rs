use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use chromedriver_core::InstallTarget;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::{Archive, ArchiveFetcher, EntryCopyError, InstallError};

#[cfg(unix)]
const EXEC_MODE: u32 = 0o777;

type Outcome = Result<PathBuf, InstallError>;

/// Lifecycle of the one install attempt a [`Provisioner`] makes.
#[derive(Debug, Clone)]
pub enum InstallState {
    Uninitialized,
    Installing,
    Installed(PathBuf),
    Failed(InstallError),
}

/// Makes sure the chromedriver binary for one [`InstallTarget`] is on disk.
///
/// The install runs at most once per provisioner, on its own task, so a
/// caller that gives up waiting neither aborts nor repeats it. Every caller,
/// concurrent or later, receives the recorded outcome.
pub struct Provisioner<F> {
    target: InstallTarget,
    fetcher: F,
    task: OnceLock<Shared<BoxFuture<'static, Outcome>>>,
    outcome: Arc<OnceLock<Outcome>>,
}

impl<F> Provisioner<F> {
    pub fn new(target: InstallTarget, fetcher: F) -> Self {
        Self {
            target,
            fetcher,
            task: OnceLock::new(),
            outcome: Arc::new(OnceLock::new()),
        }
    }

    pub fn target(&self) -> &InstallTarget {
        &self.target
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn state(&self) -> InstallState {
        match self.outcome.get() {
            Some(Ok(path)) => InstallState::Installed(path.clone()),
            Some(Err(err)) => InstallState::Failed(err.clone()),
            None if self.task.get().is_some() => InstallState::Installing,
            None => InstallState::Uninitialized,
        }
    }
}

impl<F: ArchiveFetcher + 'static> Provisioner<F> {
    /// Returns the installed binary path, starting the install on first call.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn ensure_installed(self: &Arc<Self>) -> Outcome {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        let task = self.task.get_or_init(|| self.spawn_install()).clone();
        task.await
    }

    fn spawn_install(self: &Arc<Self>) -> Shared<BoxFuture<'static, Outcome>> {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = this.install().await;
            let _ = this.outcome.set(outcome.clone());
            outcome
        });
        let recorded = Arc::clone(&self.outcome);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let err = InstallError::TaskFailed {
                        stage: "install",
                        reason: e.to_string(),
                    };
                    let _ = recorded.set(Err(err.clone()));
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn install(&self) -> Outcome {
        let path = self.target.binary_path();
        if exists(path) {
            tracing::debug!(path = %path.display(), "chromedriver already cached");
            return Ok(path.to_path_buf());
        }

        let url = self.target.archive_url();
        tracing::info!(url, version = self.target.version(), "downloading chromedriver");
        let mut archive = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| InstallError::FetchFailed {
                url: url.to_string(),
                cause: Arc::new(e),
            })?;

        let name = self.target.entry_name();
        if !archive.contains(&name) {
            return Err(InstallError::EntryNotFound {
                name,
                url: url.to_string(),
            });
        }

        let size = tokio::task::spawn_blocking({
            let url = url.to_string();
            let path = path.to_path_buf();
            move || write_binary(&mut archive, &name, &url, &path)
        })
        .await
        .map_err(|e| InstallError::TaskFailed {
            stage: "extract",
            reason: e.to_string(),
        })??;
        tracing::info!(path = %path.display(), bytes = size, "chromedriver installed");
        Ok(path.to_path_buf())
    }
}

// Only a path that cannot exist counts as missing. Any other stat failure
// leaves the file alone and lets the spawn report the real problem.
fn exists(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(_) => true,
        Err(e) => !matches!(
            e.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
        ),
    }
}

fn write_binary(
    archive: &mut Archive,
    name: &str,
    url: &str,
    path: &Path,
) -> Result<u64, InstallError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all(dir).map_err(|e| InstallError::DirectoryCreateFailed {
        path: dir.to_path_buf(),
        cause: Arc::new(e),
    })?;

    // Extract next to the target and rename into place, so a concurrent
    // process never observes a half-written binary.
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut out = create_executable(&tmp_path).map_err(|e| InstallError::FileCreateFailed {
        path: path.to_path_buf(),
        cause: Arc::new(e),
    })?;

    let copied = match archive.copy_entry(name, &mut out) {
        Ok(n) => n,
        Err(EntryCopyError::Write(e)) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(InstallError::WriteFailed {
                path: path.to_path_buf(),
                cause: Arc::new(e),
            });
        }
        Err(EntryCopyError::Read(e)) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(InstallError::EntryReadFailed {
                name: name.to_string(),
                url: url.to_string(),
                cause: Arc::new(e),
            });
        }
    };
    if let Err(e) = out.sync_all() {
        let _ = fs::remove_file(&tmp_path);
        return Err(InstallError::WriteFailed {
            path: path.to_path_buf(),
            cause: Arc::new(e),
        });
    }
    drop(out);

    if let Err(e) = set_executable(&tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(InstallError::PermissionSetFailed {
            path: path.to_path_buf(),
            cause: Arc::new(e),
        });
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        InstallError::FileCreateFailed {
            path: path.to_path_buf(),
            cause: Arc::new(e),
        }
    })?;
    Ok(copied)
}

#[cfg(unix)]
fn create_dir_all(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(EXEC_MODE)
        .create(dir)
}

#[cfg(not(unix))]
fn create_dir_all(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn create_executable(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(EXEC_MODE)
        .open(path)
}

#[cfg(not(unix))]
fn create_executable(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

// The create mode is filtered through the umask; set the bits explicitly.
#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(EXEC_MODE))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
