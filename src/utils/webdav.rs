//! WebDAVサーバーとのPUT/GET/MKCOL。
//! 認証はBasic固定で、HTTPクライアントはプロセス全体で使い回す。

use base64::Engine;
use futures_util::StreamExt;
use reqwest::{header, Body, Client, Method, Response, StatusCode};
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::error::{BackupError, BackupResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const USER_AGENT: &str = concat!("flowbackup/", env!("CARGO_PKG_VERSION"));
const ARCHIVE_CONTENT_TYPE: &str = "application/zip";
const DOWNLOAD_PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(500);
const DOWNLOAD_PROGRESS_MIN_BYTES_DELTA: u64 = 4 * 1024 * 1024;

static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

/// 接続プールを共有するため、クライアントは初回呼び出し時に一度だけ作る。
pub fn shared_client() -> Result<Client, String> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

    Ok(SHARED_CLIENT.get_or_init(|| client).clone())
}

/// `username:password` をUTF-8のままbase64化したBasic認証ヘッダー値。
pub fn basic_credential(username: &str, password: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {encoded}")
}

/// ファイル名は素の名前だけを受け付け、パス区切りを含む値は拒否する。
pub fn bare_file_name(file_name: &str) -> Result<&str, String> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err("Remote file name is empty".to_string());
    }
    if trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
        return Err(format!(
            "Remote file name must not contain path components: {trimmed}"
        ));
    }
    Ok(trimmed)
}

fn base_with_trailing_slash(base_url: &str) -> Result<Url, String> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };

    let url = Url::parse(&with_slash).map_err(|e| format!("Invalid server URL '{trimmed}': {e}"))?;
    if url.cannot_be_a_base() {
        return Err(format!("Server URL cannot be used as a base: {trimmed}"));
    }
    Ok(url)
}

/// `<base>/<folder>/`。区切り文字自体はエンコードせず、セグメントごとに符号化する。
pub fn folder_url(base_url: &str, folder: &str) -> Result<Url, String> {
    let base = base_with_trailing_slash(base_url)?;
    let segment = urlencoding::encode(folder.trim_matches('/'));
    base.join(&format!("{segment}/"))
        .map_err(|e| format!("Failed to build remote folder URL: {e}"))
}

/// `<base>/<folder>/<file>`。
pub fn file_url(base_url: &str, folder: &str, file_name: &str) -> Result<Url, String> {
    let file_name = bare_file_name(file_name)?;
    let folder = folder_url(base_url, folder)?;
    folder
        .join(&urlencoding::encode(file_name))
        .map_err(|e| format!("Failed to build remote file URL: {e}"))
}

async fn response_body_text(response: Response) -> String {
    match response.text().await {
        Ok(text) => text,
        Err(error) => format!("<failed to read response body: {error}>"),
    }
}

fn transport_error(operation: &str, url: &Url, error: reqwest::Error) -> BackupError {
    BackupError::Transport(format!("{operation} request to {url} failed: {error}"))
}

/// 認証情報と接続先を束ねた薄いWebDAVクライアント。
pub struct WebDavClient {
    client: Client,
    base_url: String,
    authorization: String,
}

impl std::fmt::Debug for WebDavClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl WebDavClient {
    pub fn new(client: Client, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim().to_string(),
            authorization: basic_credential(username, password),
        }
    }

    pub fn file_url(&self, folder: &str, file_name: &str) -> BackupResult<Url> {
        file_url(&self.base_url, folder, file_name).map_err(BackupError::Validation)
    }

    /// MKCOLでフォルダを作る。405(既に存在)も成功とみなす。
    pub async fn ensure_remote_folder(&self, folder: &str) -> BackupResult<()> {
        let url = folder_url(&self.base_url, folder).map_err(BackupError::Validation)?;
        let method = Method::from_bytes(b"MKCOL")
            .map_err(|e| BackupError::Unexpected(format!("Invalid MKCOL method: {e}")))?;

        log::debug!("MKCOL {url}");
        let response = self
            .client
            .request(method, url.clone())
            .header(header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transport_error("MKCOL", &url, e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }

        Err(BackupError::remote(
            "Create remote folder",
            status,
            response_body_text(response).await,
        ))
    }

    /// ローカルのアーカイブをストリーミングでPUTし、アップロード先URLを返す。
    pub async fn upload(&self, folder: &str, file_name: &str, local_path: &Path) -> BackupResult<Url> {
        let url = self.file_url(folder, file_name)?;
        let file = tokio::fs::File::open(local_path).await.map_err(|e| {
            BackupError::Unexpected(format!(
                "Failed to open archive for upload '{}': {e}",
                local_path.display()
            ))
        })?;
        let length = file
            .metadata()
            .await
            .map_err(|e| BackupError::Unexpected(format!("Failed to inspect archive: {e}")))?
            .len();

        log::info!("Uploading {length} bytes to {url}");
        let response = self
            .client
            .put(url.clone())
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| transport_error("PUT", &url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackupError::remote(
                "Upload",
                status,
                response_body_text(response).await,
            ));
        }

        Ok(url)
    }

    /// GETでアーカイブを取得し、`destination` へ書き出す。
    pub async fn download<F>(
        &self,
        folder: &str,
        file_name: &str,
        destination: &Path,
        mut on_progress: F,
    ) -> BackupResult<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let url = self.file_url(folder, file_name)?;
        log::debug!("GET {url}");
        let response = self
            .client
            .get(url.clone())
            .header(header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transport_error("GET", &url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackupError::remote(
                "Download",
                status,
                response_body_text(response).await,
            ));
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BackupError::Unexpected(format!("Failed to create download directory: {e}"))
            })?;
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(destination).await.map_err(|e| {
            BackupError::Unexpected(format!(
                "Failed to create download file '{}': {e}",
                destination.display()
            ))
        })?;
        let mut stream = response.bytes_stream();

        let mut downloaded = 0_u64;
        let mut last_emitted_downloaded = 0_u64;
        let mut last_emitted_at = Instant::now();
        on_progress(downloaded, total_size);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error("GET", &url, e))?;
            file.write_all(&chunk).await.map_err(|e| {
                BackupError::Unexpected(format!("Failed to write download chunk: {e}"))
            })?;
            downloaded += chunk.len() as u64;

            // バイト差分と経過時間のどちらかで進捗を通知し、ログの洪水を避ける。
            let progressed_bytes = downloaded.saturating_sub(last_emitted_downloaded)
                >= DOWNLOAD_PROGRESS_MIN_BYTES_DELTA;
            let interval_elapsed = last_emitted_at.elapsed() >= DOWNLOAD_PROGRESS_MIN_INTERVAL;
            if progressed_bytes || interval_elapsed {
                on_progress(downloaded, total_size);
                last_emitted_downloaded = downloaded;
                last_emitted_at = Instant::now();
            }
        }

        file.flush()
            .await
            .map_err(|e| BackupError::Unexpected(format!("Failed to flush download file: {e}")))?;

        if downloaded != last_emitted_downloaded {
            on_progress(downloaded, total_size);
        }

        Ok(downloaded)
    }
}
