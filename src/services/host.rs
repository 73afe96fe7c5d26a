// バックアップエンジンが外部(ホストアプリ)へ要求する操作の境界。
use std::path::{Path, PathBuf};

use crate::utils::directories;
use crate::utils::restore_script::{self, ScriptDialect};
use crate::utils::settings::Settings;

pub trait BackupHost: Send + Sync {
    /// 操作開始時点の設定スナップショット。
    fn load_settings(&self) -> Result<Settings, String>;

    /// 正規化で値が変わったときだけ呼ばれる。
    fn save_settings(&self, settings: &Settings) -> Result<(), String>;

    /// バックアップ対象ディレクトリ群の親であり、復元先でもある。
    fn data_root(&self) -> PathBuf;

    fn available_directories(&self) -> Result<Vec<String>, String> {
        directories::list_available_directories(&self.data_root())
    }

    /// 復元後に再起動するホスト実行ファイル。
    fn host_executable(&self) -> Result<PathBuf, String>;

    /// 自分自身のインストールフォルダ名。分からなければ空文字。
    fn installation_folder_name(&self) -> String;

    fn show_message(&self, title: &str, message: &str);

    fn launch_restore(
        &self,
        dialect: ScriptDialect,
        script_path: &Path,
        working_dir: &Path,
    ) -> Result<u32, String> {
        restore_script::launch_detached(dialect, script_path, working_dir)
    }

    /// 復元スクリプト起動後にホストを終了させる。
    fn shutdown(&self);
}
