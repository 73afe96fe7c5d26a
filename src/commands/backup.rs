// Push/Pullを実行するコマンド群。結果の表示はホスト(LocalHost)側で行う。
use std::path::PathBuf;

use crate::commands::host::LocalHost;
use crate::services::backup_service::{BackupService, PullOutcome};

/// ローカルの対象ディレクトリをアーカイブしてWebDAVへアップロードする。
pub async fn backup_push(settings_path: PathBuf) -> Result<(), String> {
    let service = BackupService::new(LocalHost::new(settings_path));
    let report = service.run_push().await.map_err(|e| e.to_string())?;
    log::info!(
        "Uploaded {} files from [{}]",
        report.files,
        report.directories.join(", ")
    );
    Ok(())
}

/// WebDAVからアーカイブを取得し、復元スクリプトへ引き継ぐ。
/// 成功時はホストの終了処理でプロセスが終わるため、通常は戻らない。
pub async fn backup_pull(settings_path: PathBuf) -> Result<(), String> {
    let service = BackupService::new(LocalHost::new(settings_path));
    let PullOutcome::RestoreStarted { script_path, pid } =
        service.run_pull().await.map_err(|e| e.to_string())?;
    log::info!("Restore script {} is running as pid {pid}", script_path.display());
    Ok(())
}
