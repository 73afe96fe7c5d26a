// 操作ごとに一意な一時ディレクトリを払い出し、スコープ終了時に片付ける。
use std::fs;
use std::path::{Path, PathBuf};

const WORKSPACE_PREFIX: &str = "flowbackup";

#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    keep: bool,
}

fn new_workspace_dir_name(label: &str) -> String {
    format!(
        "{WORKSPACE_PREFIX}-{label}-{}-{:016x}",
        std::process::id(),
        rand::random::<u64>()
    )
}

impl TempWorkspace {
    pub fn create_in(base: &Path, label: &str) -> Result<Self, String> {
        let path = base.join(new_workspace_dir_name(label));
        fs::create_dir_all(&path).map_err(|e| {
            format!(
                "Failed to create temporary directory '{}': {e}",
                path.display()
            )
        })?;

        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 復元スクリプトへ引き渡した後は、削除責任をスクリプト側へ移す。
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

/// 失敗しても呼び出し元の結果報告を妨げないよう、警告ログだけ残す。
pub fn remove_path_best_effort(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    if let Err(error) = result {
        if error.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove temporary path '{}': {error}", path.display());
        }
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if !self.keep {
            remove_path_best_effort(&self.path);
        }
    }
}
