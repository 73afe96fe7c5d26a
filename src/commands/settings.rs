// 設定の表示と更新を公開するコマンド群。
use serde::Serialize;
use std::path::Path;

use crate::utils::settings::{self, SettingsInput, StoredSettings};
use crate::utils::storage::CredentialStore;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView<'a> {
    #[serde(flatten)]
    settings: &'a StoredSettings,
    password_stored: bool,
}

/// 保存済み設定をJSONで出力する。パスワードは有無だけ示す。
pub fn settings_show(settings_path: &Path) -> Result<(), String> {
    let stored = settings::load_or_init_settings(settings_path)?;
    let password_stored = CredentialStore::default()
        .load(&stored.server_url, &stored.username)
        .is_some();

    let view = SettingsView {
        settings: &stored,
        password_stored,
    };
    let json = serde_json::to_string_pretty(&view).map_err(|e| e.to_string())?;
    println!("{json}");
    println!("settings file: {}", settings_path.display());
    Ok(())
}

/// 設定を部分更新する。パスワードは設定ファイルではなくキーリングへ保存する。
pub fn settings_set(
    settings_path: &Path,
    input: SettingsInput,
    password: Option<String>,
) -> Result<StoredSettings, String> {
    let stored = settings::apply_settings_input(settings_path, input)?;

    if let Some(password) = password {
        let store = CredentialStore::default();
        if password.is_empty() {
            store.clear(&stored.server_url, &stored.username)?;
            log::info!("Cleared stored WebDAV password");
        } else {
            store.save(&stored.server_url, &stored.username, &password)?;
            log::info!("Stored WebDAV password in the system keyring");
        }
    }

    Ok(stored)
}
