use keyring::{Entry, Error};

const KEYRING_SERVICE: &str = "flowbackup";

/// WebDAVパスワードをOSのキーリングへ保存する。設定ファイルには平文で残さない。
pub struct CredentialStore {
    service: &'static str,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl CredentialStore {
    pub const fn new(service: &'static str) -> Self {
        Self { service }
    }

    // サーバーとユーザーの組ごとに別エントリにする。
    fn entry(&self, server_url: &str, username: &str) -> Result<Entry, String> {
        let account = format!("{}|{}", server_url.trim(), username.trim());
        Entry::new(self.service, &account)
            .map_err(|e| format!("Failed to open keyring entry: {e}"))
    }

    pub fn save(&self, server_url: &str, username: &str, password: &str) -> Result<(), String> {
        self.entry(server_url, username)?
            .set_password(password)
            .map_err(|e| format!("Failed to store WebDAV password in keyring: {e}"))
    }

    pub fn load(&self, server_url: &str, username: &str) -> Option<String> {
        let entry = self.entry(server_url, username).ok()?;
        match entry.get_password() {
            Ok(password) => Some(password),
            Err(Error::NoEntry) => None,
            Err(error) => {
                log::warn!("Failed to read WebDAV password from keyring: {error}");
                None
            }
        }
    }

    pub fn clear(&self, server_url: &str, username: &str) -> Result<(), String> {
        match self.entry(server_url, username)?.delete_credential() {
            Ok(()) | Err(Error::NoEntry) => Ok(()),
            Err(error) => Err(format!("Failed to clear keyring entry: {error}")),
        }
    }
}
