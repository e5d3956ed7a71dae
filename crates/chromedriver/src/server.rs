use std::{
    io,
    path::Path,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use chromedriver_core::{Config, ConfigError};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, ChildStderr, ChildStdout, Command},
};

use crate::{
    ArchiveFetcher, EphemeralPorts, HttpZipFetcher, PortAllocator, Provisioner, StartError,
    StopError, error,
};

pub const LOOPBACK_HOST: &str = "127.0.0.1";
pub const PORT_FLAG: &str = "--port";

const DEFAULT_SETTLE: Duration = Duration::from_millis(500);
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// How `start` decides the freshly spawned server is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep for a fixed interval.
    Settle(Duration),
    /// Poll-connect to the port until it accepts or `timeout` elapses.
    Probe { timeout: Duration },
}

impl Default for Readiness {
    fn default() -> Self {
        Self::Settle(DEFAULT_SETTLE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Fixed port; 0 asks the port allocator.
    pub port: u16,
    /// Mirror the server's stdout/stderr onto ours.
    pub verbose: bool,
    pub readiness: Readiness,
}

impl LaunchOptions {
    pub fn from_config(config: &Config) -> Self {
        let readiness = match config.probe_timeout() {
            Some(timeout) => Readiness::Probe { timeout },
            None => Readiness::Settle(config.settle_interval()),
        };
        Self {
            port: config.port,
            verbose: config.verbose,
            readiness,
        }
    }
}

pub fn server_url(port: u16) -> String {
    format!("http://{LOOPBACK_HOST}:{port}")
}

fn port_arg(port: u16) -> String {
    format!("{PORT_FLAG}={port}")
}

/// Launches chromedriver servers, installing the binary on first use.
pub struct Supervisor<F = HttpZipFetcher, P = EphemeralPorts> {
    provisioner: Arc<Provisioner<F>>,
    ports: P,
    options: LaunchOptions,
}

impl Supervisor {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let target = config.install_target()?;
        Ok(Self::new(
            Arc::new(Provisioner::new(target, HttpZipFetcher)),
            EphemeralPorts,
            LaunchOptions::from_config(config),
        ))
    }
}

impl<F: ArchiveFetcher + 'static, P: PortAllocator> Supervisor<F, P> {
    pub fn new(provisioner: Arc<Provisioner<F>>, ports: P, options: LaunchOptions) -> Self {
        Self {
            provisioner,
            ports,
            options,
        }
    }

    pub fn provisioner(&self) -> &Arc<Provisioner<F>> {
        &self.provisioner
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    pub async fn start(&self) -> Result<ServerHandle, StartError> {
        let binary = self.provisioner.ensure_installed().await?;
        let port = self.select_port()?;
        let cwd = self.provisioner.target().cache_dir();

        let mut cmd = Command::new(&binary);
        cmd.arg(port_arg(port))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(
            exec = %binary.display(),
            cwd = %cwd.display(),
            port,
            "spawning chromedriver"
        );
        let mut child = cmd.spawn().map_err(|cause| StartError::SpawnFailed {
            path: binary.clone(),
            cause,
        })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        if self.options.verbose {
            if let Some(out) = stdout.take() {
                tokio::spawn(mirror(out, tokio::io::stdout(), "stdout"));
            }
            if let Some(err) = stderr.take() {
                tokio::spawn(mirror(err, tokio::io::stderr(), "stderr"));
            }
        }

        let mut handle = ServerHandle {
            port,
            child,
            stdout,
            stderr,
        };
        wait_ready(&mut handle, self.options.readiness, &binary).await?;

        tracing::info!(port, pid = handle.pid(), url = %handle.url(), "chromedriver started");
        Ok(handle)
    }

    fn select_port(&self) -> Result<u16, StartError> {
        if self.options.port != 0 {
            return Ok(self.options.port);
        }
        self.ports
            .allocate()
            .map_err(StartError::PortAllocationFailed)
    }
}

async fn mirror<R, W>(mut from: R, mut to: W, stream: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(e) = tokio::io::copy(&mut from, &mut to).await {
        tracing::debug!(stream, error = %e, "chromedriver log mirroring stopped");
    }
}

async fn wait_ready(
    handle: &mut ServerHandle,
    readiness: Readiness,
    binary: &Path,
) -> Result<(), StartError> {
    let result = match readiness {
        Readiness::Settle(interval) => {
            tokio::time::sleep(interval).await;
            check_alive(&mut handle.child)
        }
        Readiness::Probe { timeout } => {
            wait_for_local_tcp_port(&mut handle.child, handle.port, timeout).await
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(
                exec = %binary.display(),
                port = handle.port,
                error = %error::chain(&err),
                "chromedriver failed to come up"
            );
            if !matches!(err, StartError::ExitedEarly { .. }) {
                let _ = handle.child.kill().await;
            }
            Err(err)
        }
    }
}

fn check_alive(child: &mut Child) -> Result<(), StartError> {
    match child.try_wait().map_err(StartError::Wait)? {
        Some(status) => Err(StartError::ExitedEarly { status }),
        None => Ok(()),
    }
}

async fn wait_for_local_tcp_port(
    child: &mut Child,
    port: u16,
    timeout: Duration,
) -> Result<(), StartError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(s) = tokio::net::TcpStream::connect((LOOPBACK_HOST, port)).await {
            drop(s);
            return Ok(());
        }
        check_alive(child)?;

        if tokio::time::Instant::now() >= deadline {
            return Err(StartError::NotReady { port, timeout });
        }
        tokio::time::sleep(PROBE_INTERVAL).await;
    }
}

/// One running chromedriver server.
///
/// Dropping the handle does not stop the process; call [`ServerHandle::stop`].
#[derive(Debug)]
pub struct ServerHandle {
    port: u16,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn url(&self) -> String {
        server_url(self.port)
    }

    /// The server's stdout pipe, unless it is being mirrored (verbose mode).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    pub fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Kills the server with SIGKILL (TerminateProcess on Windows) and reaps it.
    ///
    /// Fails if the process has already exited, including after an earlier `stop`.
    pub async fn stop(&mut self) -> Result<(), StopError> {
        let pid = self.child.id();
        match self.child.try_wait() {
            Ok(Some(status)) => {
                return Err(StopError::KillFailed {
                    pid,
                    cause: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("process already exited ({status})"),
                    ),
                });
            }
            Ok(None) => {}
            Err(cause) => return Err(StopError::KillFailed { pid, cause }),
        }

        self.child
            .kill()
            .await
            .map_err(|cause| StopError::KillFailed { pid, cause })?;
        tracing::debug!(pid, port = self.port, "chromedriver stopped");
        Ok(())
    }

    /// [`stop`](Self::stop), terminating the whole program if that fails.
    ///
    /// Meant for test teardown.
    pub async fn stop_or_fatal(&mut self) {
        if let Err(err) = self.stop().await {
            tracing::error!(error = %error::chain(&err), "failed to kill chromedriver");
            std::process::exit(1);
        }
    }
}
