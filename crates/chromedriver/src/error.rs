use std::{io, path::PathBuf, process::ExitStatus, sync::Arc, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http request failed")]
    Request(#[from] reqwest::Error),

    #[error("invalid zip archive")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure while streaming one archive entry into a writer.
#[derive(Debug, thiserror::Error)]
pub enum EntryCopyError {
    #[error("read archive entry")]
    Read(#[source] FetchError),

    #[error("write archive entry")]
    Write(#[source] io::Error),
}

/// Terminal install outcome. Cloned out to every caller of
/// [`Provisioner::ensure_installed`](crate::Provisioner::ensure_installed).
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstallError {
    #[error("fetch chromedriver archive from {url}")]
    FetchFailed {
        url: String,
        #[source]
        cause: Arc<FetchError>,
    },

    #[error("could not find {name} in the zip archive at {url}")]
    EntryNotFound { name: String, url: String },

    #[error("read {name} from the zip archive at {url}")]
    EntryReadFailed {
        name: String,
        url: String,
        #[source]
        cause: Arc<FetchError>,
    },

    #[error("create cache directory {}", path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        cause: Arc<io::Error>,
    },

    #[error("create binary {}", path.display())]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        cause: Arc<io::Error>,
    },

    #[error("write binary {}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        cause: Arc<io::Error>,
    },

    #[error("set executable bit on {}", path.display())]
    PermissionSetFailed {
        path: PathBuf,
        #[source]
        cause: Arc<io::Error>,
    },

    /// The install or extraction task panicked or was cancelled by runtime
    /// shutdown.
    #[error("{stage} task did not complete: {reason}")]
    TaskFailed { stage: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("install chromedriver")]
    InstallFailed(#[from] InstallError),

    #[error("find a free port")]
    PortAllocationFailed(#[source] io::Error),

    #[error("start binary {}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },

    #[error("chromedriver exited during startup ({status})")]
    ExitedEarly { status: ExitStatus },

    #[error("chromedriver did not listen on port {port} within {timeout:?}")]
    NotReady { port: u16, timeout: Duration },

    #[error("poll chromedriver process")]
    Wait(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("kill chromedriver (pid {pid:?})")]
    KillFailed {
        pid: Option<u32>,
        #[source]
        cause: io::Error,
    },
}

/// Renders an error with its whole source chain, `a: b: c`.
pub fn chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        out.push_str(": ");
        out.push_str(&e.to_string());
        cur = e.source();
    }
    out
}
