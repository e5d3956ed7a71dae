use std::{
    future::Future,
    io::{self, Cursor, Write},
    sync::OnceLock,
    time::{Duration, Instant},
};

use futures_util::StreamExt;

use crate::{EntryCopyError, FetchError};

/// Retrieves a zip archive by URL.
///
/// The provisioner only depends on this trait, so tests can hand it an
/// in-memory archive.
pub trait ArchiveFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Archive, FetchError>> + Send;
}

/// A fully buffered zip archive.
pub struct Archive {
    zip: zip::ZipArchive<Cursor<Vec<u8>>>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("entries", &self.zip.len())
            .finish()
    }
}

impl Archive {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FetchError> {
        let zip = zip::ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self { zip })
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_string).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.file_names().any(|n| n == name)
    }

    /// Streams the named entry into `out`, returning the number of bytes copied.
    pub fn copy_entry<W: Write>(
        &mut self,
        name: &str,
        out: &mut W,
    ) -> Result<u64, EntryCopyError> {
        let mut entry = self
            .zip
            .by_name(name)
            .map_err(|e| EntryCopyError::Read(e.into()))?;
        let mut sink = WriteSide {
            inner: out,
            failed: false,
        };
        std::io::copy(&mut entry, &mut sink).map_err(|e| {
            if sink.failed {
                EntryCopyError::Write(e)
            } else {
                EntryCopyError::Read(FetchError::Io(e))
            }
        })
    }
}

// Remembers whether an error came from the destination so `copy_entry` can
// tell it apart from a decompression failure.
struct WriteSide<'a, W> {
    inner: &'a mut W,
    failed: bool,
}

impl<W: Write> WriteSide<'_, W> {
    fn track<T>(&mut self, res: io::Result<T>) -> io::Result<T> {
        if let Err(e) = &res {
            if e.kind() != io::ErrorKind::Interrupted {
                self.failed = true;
            }
        }
        res
    }
}

impl<W: Write> Write for WriteSide<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf);
        self.track(res)
    }

    fn flush(&mut self) -> io::Result<()> {
        let res = self.inner.flush();
        self.track(res)
    }
}

fn progress_threshold(total_bytes: u64) -> u64 {
    if total_bytes >= 64 * 1024 * 1024 {
        4 * 1024 * 1024
    } else {
        1024 * 1024
    }
}

fn http_client() -> Result<&'static reqwest::Client, FetchError> {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    if let Some(c) = CLIENT.get() {
        return Ok(c);
    }
    let client = reqwest::Client::builder()
        .user_agent(concat!("chromedriver-rs/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(15 * 60))
        .build()?;
    Ok(CLIENT.get_or_init(|| client))
}

/// Downloads archives over HTTP(S) with `reqwest`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpZipFetcher;

impl ArchiveFetcher for HttpZipFetcher {
    async fn fetch(&self, url: &str) -> Result<Archive, FetchError> {
        let bytes = download(url).await?;
        Archive::from_bytes(bytes)
    }
}

async fn download(url: &str) -> Result<Vec<u8>, FetchError> {
    let resp = http_client()?.get(url).send().await?.error_for_status()?;

    let total_bytes = resp.content_length().unwrap_or(0);
    let threshold = progress_threshold(total_bytes);
    let mut out: Vec<u8> = Vec::with_capacity(total_bytes.min(256 * 1024 * 1024) as usize);
    let mut stream = resp.bytes_stream();

    let started_at = Instant::now();
    let mut last_emit_bytes = 0u64;
    let mut last_emit_at = started_at;
    let mut downloaded = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        downloaded = downloaded.saturating_add(chunk.len() as u64);
        out.extend_from_slice(&chunk);

        let now = Instant::now();
        if downloaded.saturating_sub(last_emit_bytes) >= threshold
            || now.duration_since(last_emit_at) >= Duration::from_millis(300)
        {
            tracing::debug!(
                url,
                downloaded,
                total = total_bytes.max(downloaded),
                "downloading chromedriver archive"
            );
            last_emit_bytes = downloaded;
            last_emit_at = now;
        }
    }

    let elapsed = started_at.elapsed().as_secs_f64();
    let speed = if elapsed > 0.0 {
        (downloaded as f64 / elapsed).round() as u64
    } else {
        0
    };
    tracing::debug!(url, downloaded, speed_bytes_per_sec = speed, "download complete");
    Ok(out)
}
