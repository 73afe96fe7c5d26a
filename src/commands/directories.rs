// データルート直下の候補ディレクトリと、実際にバックアップされる集合を表示する。
use std::path::Path;

use crate::commands::host::LocalHost;
use crate::services::host::BackupHost;
use crate::utils::directories;

pub fn directories_list(settings_path: &Path) -> Result<(), String> {
    let host = LocalHost::new(settings_path.to_path_buf());
    let settings = host.load_settings()?;
    let data_root = host.data_root();
    let available = host.available_directories()?;
    let effective = directories::resolve(&settings.selected_directory_names, &available);

    println!("data root: {}", data_root.display());
    if available.is_empty() {
        println!("(no directories found)");
        return Ok(());
    }
    for name in &available {
        let marker = if effective.contains(name) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}
