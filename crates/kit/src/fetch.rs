//! Retrieving the source artifact into the work area.

use std::fs::File;
use std::io::{Read, Write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use percent_encoding::percent_decode_str;
use tracing::{debug, info};
use url::Url;

use crate::error::{ProvisionError, Result, RetrievalError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Used when the URL path does not end in a usable file name.
const FALLBACK_FILE_NAME: &str = "download";

const CHUNK_SIZE: usize = 64 * 1024;

/// Something that can place the resource named by a URL into a directory.
pub trait Fetch {
    /// Store the resource at `url` inside `dest_dir` and return the file's path.
    fn fetch(&self, url: &str, dest_dir: &Utf8Path) -> Result<Utf8PathBuf>;
}

/// Downloads `http(s)://` URLs and copies `file://` URLs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    /// Upper bound on the whole transfer; `None` waits forever.
    pub timeout: Option<Duration>,
    pub show_progress: bool,
}

/// The decoded last path segment of `url`, safe to use as a file name.
pub fn download_file_name(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();
    let decoded = percent_decode_str(last).decode_utf8_lossy();
    let name = decoded.replace(['/', '\\'], "_");
    match name.trim() {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_owned(),
        name => name.to_owned(),
    }
}

/// Environment proxies are not used for the local machine.
fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        None => false,
    }
}

impl HttpFetcher {
    fn progress_bar(&self, total: Option<u64>, name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let (pb, template) = match total {
            Some(total) => (
                ProgressBar::new(total),
                "{msg} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            ),
            None => (
                ProgressBar::new_spinner(),
                "{spinner} {msg} {bytes} ({bytes_per_sec})",
            ),
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            pb.set_style(style.progress_chars("=> "));
        }
        pb.set_message(format!("Downloading {name}"));
        pb
    }

    fn download(&self, url: &Url, dest: &Utf8Path) -> std::result::Result<u64, RetrievalError> {
        let mut config = ureq::Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_global(self.timeout);
        if is_loopback(url) {
            config = config.proxy(None);
        }
        let agent: ureq::Agent = config.build().into();
        let response = agent.get(url.as_str()).call().map_err(|e| match e {
            ureq::Error::StatusCode(code) => RetrievalError::Status(code),
            e => RetrievalError::Transport(e.to_string()),
        })?;
        let total = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        debug!("Content-Length: {total:?}");

        let progress = self.progress_bar(total, dest.file_name().unwrap_or(dest.as_str()));
        let mut reader = response.into_body().into_reader();
        let mut file = File::create(dest).map_err(RetrievalError::Storage)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| RetrievalError::Transport(e.to_string()))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(RetrievalError::Storage)?;
            written += n as u64;
            progress.set_position(written);
        }
        file.flush().map_err(RetrievalError::Storage)?;
        progress.finish_and_clear();
        Ok(written)
    }
}

fn copy_local(url: &Url, dest: &Utf8Path) -> std::result::Result<u64, RetrievalError> {
    let path = url
        .to_file_path()
        .map_err(|()| RetrievalError::Transport(format!("{url} is not a local path")))?;
    let mut src = File::open(&path)
        .map_err(|e| RetrievalError::Transport(format!("{}: {e}", path.display())))?;
    let mut out = File::create(dest).map_err(RetrievalError::Storage)?;
    std::io::copy(&mut src, &mut out).map_err(RetrievalError::Storage)
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, dest_dir: &Utf8Path) -> Result<Utf8PathBuf> {
        let wrap = |source| ProvisionError::Retrieval {
            url: url.to_owned(),
            source,
        };
        let parsed = Url::parse(url).map_err(|e| wrap(e.into()))?;
        let dest = dest_dir.join(download_file_name(&parsed));
        info!("Retrieving {url}");
        let written = match parsed.scheme() {
            "http" | "https" => self.download(&parsed, &dest),
            "file" => copy_local(&parsed, &dest),
            other => Err(RetrievalError::UnsupportedScheme(other.to_owned())),
        }
        .map_err(wrap)?;
        info!("Retrieved {} to {dest}", HumanBytes(written));
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::utf8_tempdir;
    use std::io::BufRead;
    use std::net::TcpListener;

    fn fetcher() -> HttpFetcher {
        HttpFetcher {
            timeout: Some(Duration::from_secs(20)),
            show_progress: false,
        }
    }

    /// Serve a single canned HTTP response on a loopback port.
    fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 2 {
                line.clear();
            }
            let mut stream = stream;
            stream.write_all(response).unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_download_file_name() {
        let cases = [
            ("https://download.example.com/vm/Kioptrix%20Level%201.zip", "Kioptrix Level 1.zip"),
            ("https://example.com/a/b/vm.ova?token=abc#frag", "vm.ova"),
            ("https://example.com/", "download"),
            ("https://example.com/a/..%2Fetc%2Fpasswd", ".._etc_passwd"),
        ];
        for (url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(download_file_name(&url), expected, "{url}");
        }
    }

    #[test]
    fn test_fetch_file_url() {
        let (_td, root) = utf8_tempdir();
        let src = root.join("My Image.ova");
        std::fs::write(&src, b"payload").unwrap();
        let dest_dir = root.join("work");
        std::fs::create_dir(&dest_dir).unwrap();

        let url = Url::from_file_path(&src).unwrap();
        let got = fetcher().fetch(url.as_str(), &dest_dir).unwrap();
        assert_eq!(got, dest_dir.join("My Image.ova"));
        assert_eq!(std::fs::read(&got).unwrap(), b"payload");
    }

    #[test]
    fn test_fetch_missing_file_is_not_storage_error() {
        let (_td, root) = utf8_tempdir();
        let err = fetcher()
            .fetch("file:///nonexistent/vmprov/vm.ova", &root)
            .unwrap_err();
        assert!(
            matches!(
                err,
                ProvisionError::Retrieval {
                    source: RetrievalError::Transport(_),
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn test_fetch_rejects_bad_urls() {
        let (_td, root) = utf8_tempdir();
        let err = fetcher().fetch("ftp://example.com/vm.ova", &root).unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
        let err = fetcher().fetch("not a url", &root).unwrap_err();
        assert!(
            matches!(
                err,
                ProvisionError::Retrieval {
                    source: RetrievalError::InvalidUrl(_),
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn test_http_download() {
        let base = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello");
        let (_td, root) = utf8_tempdir();
        let got = fetcher().fetch(&format!("{base}/vm.ova"), &root).unwrap();
        assert_eq!(got, root.join("vm.ova"));
        assert_eq!(std::fs::read(got).unwrap(), b"hello");
    }

    #[test]
    fn test_http_status_error() {
        let base =
            serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let (_td, root) = utf8_tempdir();
        let err = fetcher().fetch(&format!("{base}/vm.ova"), &root).unwrap_err();
        assert!(
            matches!(
                err,
                ProvisionError::Retrieval {
                    source: RetrievalError::Status(404),
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn test_write_failure_is_storage_error() {
        let base = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nhi");
        let (_td, root) = utf8_tempdir();
        let err = fetcher()
            .fetch(&format!("{base}/vm.ova"), &root.join("missing-dir"))
            .unwrap_err();
        assert!(
            matches!(
                err,
                ProvisionError::Retrieval {
                    source: RetrievalError::Storage(_),
                    ..
                }
            ),
            "{err}"
        );
    }
}
