//! バックアップ設定の正規化と永続化を担当するユーティリティ。
//! エンジンへ渡す `Settings` と、ディスク上の表現(camelCase)をここで吸収する。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::utils::directories;

const SETTINGS_DIR_NAME: &str = "flowbackup";
const SETTINGS_FILE_NAME: &str = "settings.json";
const DEFAULT_DATA_ROOT_DIR_NAME: &str = "FlowLauncher";
pub const DEFAULT_ARCHIVE_FILENAME: &str = "FlowBackup.zip";
pub const REMOTE_FOLDER_NAME: &str = "flowlauncher_backup";

/// 1回の操作で使う設定のスナップショット。
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub archive_filename: String,
    pub selected_directory_names: Vec<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("archive_filename", &self.archive_filename)
            .field("selected_directory_names", &self.selected_directory_names)
            .finish()
    }
}

/// パス成分を取り除いた素のファイル名にする。空や `..` は既定名へ戻す。
pub fn normalize_archive_filename(raw: &str) -> String {
    let candidate = raw
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if candidate.is_empty() || candidate == "." || candidate == ".." {
        DEFAULT_ARCHIVE_FILENAME.to_string()
    } else {
        candidate.to_string()
    }
}

pub fn normalize_settings(mut settings: Settings) -> Settings {
    settings.server_url = settings.server_url.trim().to_string();
    settings.username = settings.username.trim().to_string();
    settings.archive_filename = normalize_archive_filename(&settings.archive_filename);
    settings.selected_directory_names =
        directories::normalize_selection(&settings.selected_directory_names);
    settings
}

/// 接続に必要な値が揃っているかを確認し、解析済みのサーバーURLを返す。
pub fn validate_connection_settings(settings: &Settings) -> Result<Url, String> {
    let server_url = settings.server_url.trim();
    if server_url.is_empty() {
        return Err("WebDAV server URL is not configured".to_string());
    }
    if settings.username.trim().is_empty() {
        return Err("WebDAV username is not configured".to_string());
    }
    if settings.password.is_empty() {
        return Err("WebDAV password is not configured".to_string());
    }

    let url = Url::parse(server_url)
        .map_err(|e| format!("WebDAV server URL must be an absolute URL ({server_url}): {e}"))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(format!(
            "WebDAV server URL must use http or https: {server_url}"
        ));
    }

    Ok(url)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    pub server_url: String,
    pub username: String,
    pub archive_filename: String,
    pub selected_directory_names: Vec<String>,
    pub data_root: String,
    pub host_executable: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StoredSettingsOnDisk {
    server_url: Option<String>,
    username: Option<String>,
    archive_filename: Option<String>,
    selected_directory_names: Option<Vec<String>>,
    data_root: Option<String>,
    host_executable: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsInput {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub archive_filename: Option<String>,
    pub selected_directory_names: Option<Vec<String>>,
    pub data_root: Option<String>,
    pub host_executable: Option<String>,
}

impl StoredSettings {
    pub fn to_settings(&self, password: String) -> Settings {
        Settings {
            server_url: self.server_url.clone(),
            username: self.username.clone(),
            password,
            archive_filename: self.archive_filename.clone(),
            selected_directory_names: self.selected_directory_names.clone(),
        }
    }

    /// エンジン側で正規化された値を書き戻す。パスワードはここでは扱わない。
    pub fn absorb(&mut self, settings: &Settings) {
        self.server_url = settings.server_url.clone();
        self.username = settings.username.clone();
        self.archive_filename = settings.archive_filename.clone();
        self.selected_directory_names = settings.selected_directory_names.clone();
    }
}

/// 設定ファイルの既定パス(OSの設定ディレクトリ配下)。
pub fn default_settings_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
        .ok_or_else(|| "Failed to resolve the user configuration directory".to_string())
}

/// ホストアプリのデータルートの既定値。
pub fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_DATA_ROOT_DIR_NAME)
}

fn make_default_settings() -> StoredSettings {
    StoredSettings {
        server_url: String::new(),
        username: String::new(),
        archive_filename: DEFAULT_ARCHIVE_FILENAME.to_string(),
        selected_directory_names: Vec::new(),
        data_root: default_data_root().to_string_lossy().to_string(),
        host_executable: String::new(),
    }
}

fn normalize_stored(mut stored: StoredSettings) -> StoredSettings {
    let normalized = normalize_settings(stored.to_settings(String::new()));
    stored.absorb(&normalized);
    stored.data_root = stored.data_root.trim().to_string();
    stored.host_executable = stored.host_executable.trim().to_string();
    if stored.data_root.is_empty() {
        stored.data_root = default_data_root().to_string_lossy().to_string();
    }
    stored
}

pub fn save_settings(path: &Path, settings: &StoredSettings) -> Result<(), String> {
    let settings = normalize_stored(settings.clone());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create settings directory: {e}"))?;
    }

    let json = serde_json::to_string_pretty(&settings).map_err(|e| e.to_string())?;
    fs::write(path, json).map_err(|e| format!("Failed to write settings file: {e}"))?;
    Ok(())
}

pub fn load_or_init_settings(path: &Path) -> Result<StoredSettings, String> {
    let mut settings = make_default_settings();

    // 初回は既定値をそのまま保存し、以降の読み込みを同じ経路にそろえる。
    if !path.exists() {
        save_settings(path, &settings)?;
        return Ok(settings);
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read settings file: {e}"))?;
    // 壊れたJSONでも操作不能にしないため、読取失敗時は既定値へフォールバックする。
    let on_disk: StoredSettingsOnDisk = serde_json::from_str(&content).unwrap_or_else(|error| {
        log::warn!("Ignoring unreadable settings file '{}': {error}", path.display());
        StoredSettingsOnDisk::default()
    });

    if let Some(server_url) = on_disk.server_url {
        settings.server_url = server_url;
    }
    if let Some(username) = on_disk.username {
        settings.username = username;
    }
    if let Some(archive_filename) = on_disk.archive_filename {
        settings.archive_filename = archive_filename;
    }
    if let Some(selected) = on_disk.selected_directory_names {
        settings.selected_directory_names = selected;
    }
    if let Some(data_root) = on_disk.data_root {
        settings.data_root = data_root;
    }
    if let Some(host_executable) = on_disk.host_executable {
        settings.host_executable = host_executable;
    }

    settings = normalize_stored(settings);
    save_settings(path, &settings)?;
    Ok(settings)
}

pub fn apply_settings_input(path: &Path, input: SettingsInput) -> Result<StoredSettings, String> {
    let mut settings = load_or_init_settings(path)?;

    if let Some(server_url) = input.server_url {
        settings.server_url = server_url;
    }
    if let Some(username) = input.username {
        settings.username = username;
    }
    if let Some(archive_filename) = input.archive_filename {
        settings.archive_filename = archive_filename;
    }
    if let Some(selected) = input.selected_directory_names {
        settings.selected_directory_names = selected;
    }
    if let Some(data_root) = input.data_root {
        settings.data_root = data_root;
    }
    if let Some(host_executable) = input.host_executable {
        settings.host_executable = host_executable;
    }

    settings = normalize_stored(settings);
    save_settings(path, &settings)?;
    Ok(settings)
}
