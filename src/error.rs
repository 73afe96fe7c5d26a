//! バックアップ操作の失敗分類。
//! Display文字列はそのままユーザー向けステータスとして表示される。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    /// 設定不足・不正。I/Oを始める前に中断する。
    #[error("{0}")]
    Validation(String),

    /// データルートや対象ディレクトリが見つからない。
    #[error("{0}")]
    NotFound(String),

    /// WebDAVサーバーが成功以外のステータスを返した。
    #[error("{operation} failed with status {status}: {body}")]
    RemoteProtocol {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// リクエスト自体が送れなかった(接続失敗・タイムアウトなど)。
    #[error("{0}")]
    Transport(String),

    #[error("Failed to start restore script: {0}")]
    ProcessLaunch(String),

    #[error("Another backup operation is already running")]
    Busy,

    #[error("{0}")]
    Unexpected(String),
}

impl BackupError {
    pub fn remote(operation: &'static str, status: reqwest::StatusCode, body: String) -> Self {
        Self::RemoteProtocol {
            operation,
            status: status.as_u16(),
            body,
        }
    }
}

impl From<String> for BackupError {
    fn from(message: String) -> Self {
        Self::Unexpected(message)
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
