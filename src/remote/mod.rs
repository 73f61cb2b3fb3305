//! Remote sink: authenticated, encrypted eml upload over multipart POST.
//!
//! Every request carries an encrypted timestamp token. The server answers
//! with plain text whose lines may be tagged `INFO#`, `WARNING#`,
//! `ERROR#` or `VERBOSE{1,2,3}#`; tagged lines are routed into the local
//! log and an `ERROR#` line fails the operation. TLS certificate
//! verification is off unless `--tls-verify` is given, matching the
//! deployments this protocol was built for.

pub mod crypto;

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use thiserror::Error;

use crate::sink::EmlConsumer;
use crate::util;
use crypto::{request_token, AesKey};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("crypto failure: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("server fault: {0}")]
    ServerFault(String),

    #[error("cannot decode server response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub url: String,
    pub key: AesKey,
    /// Request timeout in seconds, 0 for none.
    pub timeout: u64,
    /// Upload throughput cap in bytes per second, 0 for unlimited.
    pub speed_limit: u64,
    pub tls_verify: bool,
}

/// Which set a `send_sync_list` call reconciles on the server.
#[derive(Debug, Clone, Copy)]
pub enum SyncKind {
    Files,
    Directories,
}

impl SyncKind {
    fn field(self) -> &'static str {
        match self {
            SyncKind::Files => "sync_filelist",
            SyncKind::Directories => "sync_dirlist",
        }
    }
}

pub struct RemoteClient {
    options: RemoteOptions,
    http: Client,
}

impl RemoteClient {
    pub fn connect(options: RemoteOptions) -> Result<Self, RemoteError> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(!options.tls_verify)
            .connect_timeout(Duration::from_secs(30));
        builder = if options.timeout > 0 {
            builder.timeout(Duration::from_secs(options.timeout))
        } else {
            builder.timeout(Option::<Duration>::None)
        };
        Ok(Self {
            http: builder.build()?,
            options,
        })
    }

    pub fn url(&self) -> &str {
        &self.options.url
    }

    fn base_form(&self) -> Result<Form, RemoteError> {
        let token = request_token(&self.options.key)?;
        Ok(Form::new()
            .text("token", token.token)
            .text("token_iv", token.iv))
    }

    /// Health check: `check=HELLO` must come back as HTTP 200 `READY`.
    pub fn is_available(&self) -> Result<bool, RemoteError> {
        let form = self.base_form()?.text("check", "HELLO");
        let response = self.http.post(&self.options.url).multipart(form).send()?;
        let status = response.status();
        let body = response.text()?;
        Ok(status.as_u16() == 200 && body == "READY")
    }

    /// Names already stored below `dir` on the server. The response body
    /// is a gzip-compressed JSON array.
    pub fn list_remote(&self, dir: &str) -> Result<HashSet<String>, RemoteError> {
        let form = self.base_form()?.text("get_filelist", dir.to_string());
        let response = self.http.post(&self.options.url).multipart(form).send()?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let body = response.bytes()?;
        let mut json = Vec::new();
        GzDecoder::new(&body[..])
            .read_to_end(&mut json)
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let names: Vec<String> =
            serde_json::from_slice(&json).map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(names.into_iter().collect())
    }

    /// Upload one rendered eml. `full_name` is `<outdir><filename>` and
    /// travels base64 encoded so the path separators survive.
    pub fn send_eml(&self, full_name: &str, eml: &[u8]) -> Result<(), RemoteError> {
        let (iv, ciphertext) = crypto::encrypt_aes(&self.options.key, eml)?;
        log::debug!(
            target: "verbose3",
            "uploading to {} ({})",
            full_name,
            util::human_bytes(eml.len() as f64)
        );

        let upload_len = ciphertext.len();
        let part = if self.options.speed_limit > 0 {
            Part::reader_with_length(
                ThrottledReader::new(ciphertext, self.options.speed_limit),
                upload_len as u64,
            )
        } else {
            Part::bytes(ciphertext)
        };
        let part = part.file_name(BASE64.encode(full_name.as_bytes()));
        let form = self
            .base_form()?
            .text("iv", BASE64.encode(iv))
            .part("fileToUpload", part);

        let started = Instant::now();
        let response = self.http.post(&self.options.url).multipart(form).send()?;
        let status = response.status();
        let body = response.text()?;
        route_server_log(&body)?;
        if status.as_u16() != 200 {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        log::debug!(
            target: "verbose3",
            "speed was {}/s during {:.2} seconds",
            util::human_bytes(upload_len as f64 / elapsed),
            elapsed
        );
        Ok(())
    }

    /// Tell the server which names below `dir` are still live. The list
    /// goes over the wire as base64(gzip(json array)).
    pub fn send_sync_list(
        &self,
        kind: SyncKind,
        dir: &str,
        names: &[String],
    ) -> Result<(), RemoteError> {
        let json =
            serde_json::to_vec(names).map_err(|e| RemoteError::Decode(e.to_string()))?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let gz = encoder
            .finish()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let form = self
            .base_form()?
            .text(kind.field(), BASE64.encode(gz))
            .text("sync_directory", dir.to_string());
        let response = self.http.post(&self.options.url).multipart(form).send()?;
        let status = response.status();
        let body = response.text()?;
        route_server_log(&body)?;
        if status.as_u16() != 200 {
            return Err(RemoteError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Route tagged server response lines into the local log. `ERROR#` wins
/// and fails the call.
fn route_server_log(body: &str) -> Result<(), RemoteError> {
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if let Some(msg) = line.strip_prefix("INFO#") {
            log::info!("{msg}");
        } else if let Some(msg) = line.strip_prefix("WARNING#") {
            log::warn!("{msg}");
        } else if let Some(msg) = line.strip_prefix("ERROR#") {
            return Err(RemoteError::ServerFault(msg.to_string()));
        } else if let Some(msg) = line.strip_prefix("VERBOSE1#") {
            log::debug!(target: "verbose1", "{msg}");
        } else if let Some(msg) = line.strip_prefix("VERBOSE2#") {
            log::debug!(target: "verbose2", "{msg}");
        } else if let Some(msg) = line.strip_prefix("VERBOSE3#") {
            log::debug!(target: "verbose3", "{msg}");
        }
    }
    Ok(())
}

/// Read adapter that paces an in-memory body to at most `limit` bytes
/// per second, for `--speed-limit`.
struct ThrottledReader {
    cursor: io::Cursor<Vec<u8>>,
    limit: u64,
    started: Option<Instant>,
    sent: u64,
}

impl ThrottledReader {
    fn new(data: Vec<u8>, limit: u64) -> Self {
        Self {
            cursor: io::Cursor::new(data),
            limit: limit.max(1),
            started: None,
            sent: 0,
        }
    }
}

impl Read for ThrottledReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let window = buf.len().min(16 * 1024);
        let n = self.cursor.read(&mut buf[..window])?;
        self.sent += n as u64;
        let due = self.sent as f64 / self.limit as f64;
        let elapsed = started.elapsed().as_secs_f64();
        if due > elapsed {
            std::thread::sleep(Duration::from_secs_f64(due - elapsed));
        }
        Ok(n)
    }
}

/// [`EmlConsumer`] adapter in front of a [`RemoteClient`]: skips names
/// the server already has and disables itself on the first failure.
pub struct UploadSink<'a> {
    client: &'a RemoteClient,
    remote_names: HashSet<String>,
    pub succeeded: usize,
    pub failed: usize,
    disabled: bool,
}

impl<'a> UploadSink<'a> {
    pub fn new(client: &'a RemoteClient, remote_names: HashSet<String>) -> Self {
        Self {
            client,
            remote_names,
            succeeded: 0,
            failed: 0,
            disabled: false,
        }
    }
}

impl EmlConsumer for UploadSink<'_> {
    fn wants(&mut self, _dir: &str, name: &str) -> bool {
        !self.disabled && !self.remote_names.contains(name)
    }

    fn consume(&mut self, dir: &str, name: &str, payload: &[u8]) {
        let full_name = format!("{dir}{name}");
        match self.client.send_eml(&full_name, payload) {
            Ok(()) => self.succeeded += 1,
            Err(err) => {
                self.failed += 1;
                self.disabled = true;
                log::error!("upload of \"{full_name}\" failed, uploads disabled: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_server_log_passes_info() {
        assert!(route_server_log("INFO#stored\nVERBOSE3#detail\n").is_ok());
        assert!(route_server_log("untagged noise").is_ok());
        assert!(route_server_log("").is_ok());
    }

    #[test]
    fn test_route_server_log_fails_on_error_tag() {
        let err = route_server_log("INFO#ok\nERROR#bad token\n").unwrap_err();
        match err {
            RemoteError::ServerFault(msg) => assert_eq!(msg, "bad token"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sync_kind_field_names() {
        assert_eq!(SyncKind::Files.field(), "sync_filelist");
        assert_eq!(SyncKind::Directories.field(), "sync_dirlist");
    }

    #[test]
    fn test_throttled_reader_drains_fully() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = ThrottledReader::new(data.clone(), u64::MAX);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_throttled_reader_paces() {
        let mut reader = ThrottledReader::new(vec![0u8; 64], 32);
        let started = Instant::now();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 64);
        // 64 bytes at 32 B/s needs about two seconds.
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
