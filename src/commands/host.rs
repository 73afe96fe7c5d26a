// CLIプロセスをバックアップエンジンのホストとして振る舞わせる実装。
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::services::host::BackupHost;
use crate::utils::settings::{self, Settings, StoredSettings};
use crate::utils::storage::CredentialStore;

/// 設定したパスワードより優先される環境変数。
pub const PASSWORD_ENV_VAR: &str = "FLOWBACKUP_PASSWORD";

pub struct LocalHost {
    settings_path: PathBuf,
    credentials: CredentialStore,
    // 操作開始時(load_settings)に読んだ設定。操作中はファイルを読み直さない。
    snapshot: Mutex<Option<StoredSettings>>,
}

impl LocalHost {
    pub fn new(settings_path: PathBuf) -> Self {
        Self {
            settings_path,
            credentials: CredentialStore::default(),
            snapshot: Mutex::new(None),
        }
    }

    fn replace_snapshot(&self, stored: &StoredSettings) -> Result<(), String> {
        let mut guard = self
            .snapshot
            .lock()
            .map_err(|_| "Settings snapshot lock is poisoned".to_string())?;
        *guard = Some(stored.clone());
        Ok(())
    }

    fn reload(&self) -> Result<StoredSettings, String> {
        let stored = settings::load_or_init_settings(&self.settings_path)?;
        self.replace_snapshot(&stored)?;
        Ok(stored)
    }

    fn stored(&self) -> Result<StoredSettings, String> {
        let cached = self
            .snapshot
            .lock()
            .map_err(|_| "Settings snapshot lock is poisoned".to_string())?
            .clone();
        match cached {
            Some(stored) => Ok(stored),
            None => self.reload(),
        }
    }
}

fn resolve_password(
    from_env: Option<String>,
    from_keyring: impl FnOnce() -> Option<String>,
) -> String {
    match from_env {
        Some(password) if !password.is_empty() => password,
        _ => from_keyring().unwrap_or_default(),
    }
}

/// 実行ファイルが `Plugins/<folder>/` 直下にあるときだけ、そのフォルダ名を返す。
fn plugin_folder_name_of(executable: &Path) -> String {
    let Some(folder) = executable.parent() else {
        return String::new();
    };
    let in_plugins = folder
        .parent()
        .and_then(Path::file_name)
        .map(|name| {
            name.to_string_lossy()
                .eq_ignore_ascii_case(crate::utils::restore_script::PLUGINS_DIRECTORY_NAME)
        })
        .unwrap_or(false);
    if !in_plugins {
        return String::new();
    }

    folder
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl BackupHost for LocalHost {
    fn load_settings(&self) -> Result<Settings, String> {
        let stored = self.reload()?;
        let password = resolve_password(std::env::var(PASSWORD_ENV_VAR).ok(), || {
            self.credentials.load(&stored.server_url, &stored.username)
        });
        Ok(stored.to_settings(password))
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), String> {
        let mut stored = self.stored()?;
        stored.absorb(settings);
        settings::save_settings(&self.settings_path, &stored)?;
        self.replace_snapshot(&stored)
    }

    fn data_root(&self) -> PathBuf {
        match self.stored() {
            Ok(stored) => PathBuf::from(stored.data_root),
            Err(error) => {
                log::warn!("Falling back to the default data directory: {error}");
                settings::default_data_root()
            }
        }
    }

    fn host_executable(&self) -> Result<PathBuf, String> {
        let stored = self.stored()?;
        if stored.host_executable.is_empty() {
            return Err(
                "Host executable is not configured. Run `flowbackup settings set --host-executable <path>`."
                    .to_string(),
            );
        }
        Ok(PathBuf::from(stored.host_executable))
    }

    fn installation_folder_name(&self) -> String {
        std::env::current_exe()
            .map(|exe| plugin_folder_name_of(&exe))
            .unwrap_or_default()
    }

    fn show_message(&self, title: &str, message: &str) {
        println!("[{title}] {message}");
    }

    fn shutdown(&self) {
        log::info!("Exiting so the restore script can replace the data directory");
        std::process::exit(0);
    }
}
