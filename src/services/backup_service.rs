//! Push/Pullの2つのワークフローを組み立てるサービス層。
//! 一時ディレクトリの寿命管理と、失敗時のユーザー向け報告もここで行う。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{BackupError, BackupResult};
use crate::services::host::BackupHost;
use crate::utils::restore_script::{self, RestoreScriptRequest, ScriptDialect};
use crate::utils::settings::{self, Settings, REMOTE_FOLDER_NAME};
use crate::utils::webdav::{self, WebDavClient};
use crate::utils::workspace::{remove_path_best_effort, TempWorkspace};
use crate::utils::{directories, zip};

const MESSAGE_TITLE: &str = "WebDAV Backup";
// 「復元開始」の表示が読めるよう、ホスト終了まで少し待つ。
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(1500);
// 取得したアーカイブのローカル名。リモート名に関係なく固定し、スクリプトや展開先と衝突させない。
const PULLED_ARCHIVE_NAME: &str = "backup.zip";

#[derive(Debug, Clone)]
pub struct PushReport {
    pub remote_url: Url,
    pub directories: Vec<String>,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub enum PullOutcome {
    /// スクリプトへ引き継ぎ済み。この後ホストは自分で終了する。
    RestoreStarted { script_path: PathBuf, pid: u32 },
}

pub struct BackupService<H: BackupHost> {
    host: H,
    // Push/Pullが同じ一時パス・リモートファイルを奪い合わないよう、同時に1操作だけ許す。
    operation_lock: Mutex<()>,
    dialect: ScriptDialect,
    temp_base: PathBuf,
    remote_folder: String,
    host_release_delay: Duration,
    shutdown_grace: Duration,
}

impl<H: BackupHost> BackupService<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            operation_lock: Mutex::new(()),
            dialect: ScriptDialect::native(),
            temp_base: std::env::temp_dir(),
            remote_folder: REMOTE_FOLDER_NAME.to_string(),
            host_release_delay: restore_script::DEFAULT_HOST_RELEASE_DELAY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    #[cfg(test)]
    pub fn with_temp_base(mut self, temp_base: impl Into<PathBuf>) -> Self {
        self.temp_base = temp_base.into();
        self
    }

    #[cfg(test)]
    pub fn with_dialect(mut self, dialect: ScriptDialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[cfg(test)]
    pub fn with_timings(mut self, host_release_delay: Duration, shutdown_grace: Duration) -> Self {
        self.host_release_delay = host_release_delay;
        self.shutdown_grace = shutdown_grace;
        self
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// 設定を読み込み、正規化して必要なら書き戻し、接続情報を検証する。
    fn prepare_settings(&self) -> BackupResult<Settings> {
        let snapshot = self.host.load_settings()?;
        let normalized = settings::normalize_settings(snapshot.clone());
        if normalized != snapshot {
            if let Err(error) = self.host.save_settings(&normalized) {
                log::warn!("Failed to save normalized settings: {error}");
            }
        }

        settings::validate_connection_settings(&normalized).map_err(BackupError::Validation)?;
        Ok(normalized)
    }

    fn webdav_client(&self, settings: &Settings) -> BackupResult<WebDavClient> {
        let client = webdav::shared_client()?;
        Ok(WebDavClient::new(
            client,
            &settings.server_url,
            &settings.username,
            &settings.password,
        ))
    }

    /// 実際にバックアップするディレクトリ集合を返す。データルートが無ければ失敗。
    pub fn effective_directories(
        &self,
        settings: &Settings,
        data_root: &Path,
    ) -> BackupResult<Vec<String>> {
        if !data_root.is_dir() {
            return Err(BackupError::NotFound(format!(
                "Data directory not found: {}",
                data_root.display()
            )));
        }

        let available = self.host.available_directories()?;
        let effective = directories::resolve(&settings.selected_directory_names, &available);
        if effective.is_empty() {
            return Err(BackupError::NotFound(format!(
                "No directories to back up were found in {}",
                data_root.display()
            )));
        }
        Ok(effective)
    }

    pub async fn push(&self) -> BackupResult<PushReport> {
        let _guard = self
            .operation_lock
            .try_lock()
            .map_err(|_| BackupError::Busy)?;

        let settings = self.prepare_settings()?;
        let data_root = self.host.data_root();
        let effective = self.effective_directories(&settings, &data_root)?;
        log::info!("Backing up directories: {}", effective.join(", "));

        // workspaceはスコープ終了時に成功・失敗を問わず削除される。
        let workspace = TempWorkspace::create_in(&self.temp_base, "push")?;
        let archive_path = workspace.path().join(&settings.archive_filename);
        let summary = zip::pack_directories(&data_root, &effective, &archive_path)?;
        if summary.directories == 0 {
            return Err(BackupError::NotFound(
                "Selected subfolders were not found".to_string(),
            ));
        }
        log::info!(
            "Packed {} files from {} directories into {}",
            summary.files,
            summary.directories,
            archive_path.display()
        );

        let client = self.webdav_client(&settings)?;
        client.ensure_remote_folder(&self.remote_folder).await?;
        let remote_url = client
            .upload(&self.remote_folder, &settings.archive_filename, &archive_path)
            .await?;

        Ok(PushReport {
            remote_url,
            directories: effective,
            files: summary.files,
        })
    }

    pub async fn pull(&self) -> BackupResult<PullOutcome> {
        let _guard = self
            .operation_lock
            .try_lock()
            .map_err(|_| BackupError::Busy)?;

        let settings = self.prepare_settings()?;
        // 再起動先が分からなければ復元できないので、通信前に確認する。
        let host_executable = self
            .host
            .host_executable()
            .map_err(BackupError::Validation)?;
        let data_root = self.host.data_root();

        let workspace = TempWorkspace::create_in(&self.temp_base, "pull")?;
        let archive_path = workspace.path().join(PULLED_ARCHIVE_NAME);

        let client = self.webdav_client(&settings)?;
        let size = client
            .download(
                &self.remote_folder,
                &settings.archive_filename,
                &archive_path,
                |downloaded, total| match total {
                    Some(total) if total > 0 => {
                        log::debug!("Downloaded {downloaded}/{total} bytes")
                    }
                    _ => log::debug!("Downloaded {downloaded} bytes"),
                },
            )
            .await?;
        log::info!("Downloaded backup archive ({size} bytes)");

        let script_path = workspace.path().join(self.dialect.script_file_name());
        let mut request = RestoreScriptRequest::new(
            &archive_path,
            data_root,
            host_executable,
            self.host.installation_folder_name(),
        );
        request.host_release_delay = self.host_release_delay;
        match self.write_and_launch_restore(&request, &script_path, workspace.path()) {
            Ok(pid) => {
                // ここから先の後片付けは復元スクリプトが行う。
                let _ = workspace.persist();
                log::info!("Restore script started (pid {pid}): {}", script_path.display());
                Ok(PullOutcome::RestoreStarted { script_path, pid })
            }
            Err(error) => {
                remove_path_best_effort(&script_path);
                Err(error)
            }
        }
    }

    fn write_and_launch_restore(
        &self,
        request: &RestoreScriptRequest,
        script_path: &Path,
        working_dir: &Path,
    ) -> BackupResult<u32> {
        let script = restore_script::generate(self.dialect, request)?;
        fs::write(script_path, script).map_err(|e| {
            format!(
                "Failed to write restore script '{}': {e}",
                script_path.display()
            )
        })?;

        self.host
            .launch_restore(self.dialect, script_path, working_dir)
            .map_err(BackupError::ProcessLaunch)
    }

    fn report_failure(&self, context: &str, error: &BackupError) {
        log::error!("{context}: {error:?}");
        self.host
            .show_message(MESSAGE_TITLE, &format!("{context}: {error}"));
    }

    /// Pushを実行し、結果をホストへ表示する。
    pub async fn run_push(&self) -> BackupResult<PushReport> {
        match self.push().await {
            Ok(report) => {
                self.host.show_message(
                    MESSAGE_TITLE,
                    &format!("Backup uploaded to {}", report.remote_url),
                );
                Ok(report)
            }
            Err(error) => {
                self.report_failure("Backup failed", &error);
                Err(error)
            }
        }
    }

    /// Pullを実行する。成功時はスクリプトへ引き継いだ後、ホストを終了させる。
    pub async fn run_pull(&self) -> BackupResult<PullOutcome> {
        match self.pull().await {
            Ok(outcome) => {
                self.host.show_message(
                    MESSAGE_TITLE,
                    "Restore started. The application will close and restart when the restore completes.",
                );
                tokio::time::sleep(self.shutdown_grace).await;
                self.host.shutdown();
                Ok(outcome)
            }
            Err(error) => {
                self.report_failure("Restore failed", &error);
                Err(error)
            }
        }
    }
}
