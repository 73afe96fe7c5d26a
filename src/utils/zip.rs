// 選択ディレクトリをzipへまとめる。展開は復元スクリプト側で行う。
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ZIP_COPY_BUFFER_SIZE: usize = 256 * 1024;
const MAX_DEFLATE_LEVEL: i64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackSummary {
    pub directories: usize,
    pub files: usize,
}

fn copy_with_reused_buffer<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
) -> std::io::Result<u64> {
    let mut written = 0_u64;

    loop {
        let read = reader.read(buffer)?;
        if read == 0 {
            break;
        }

        writer.write_all(&buffer[..read])?;
        written += read as u64;
    }

    Ok(written)
}

/// アーカイブ内パスはOSに関係なく `/` 区切りにする。
pub fn normalize_path_for_archive(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn collect_files_recursive(current: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
    for entry in fs::read_dir(current)
        .map_err(|e| format!("Failed to read directory '{}': {e}", current.display()))?
    {
        let entry = entry.map_err(|e| {
            format!(
                "Failed to read a directory entry under '{}': {e}",
                current.display()
            )
        })?;
        let path = entry.path();
        // シンボリックリンク先のディレクトリは辿らない。
        let file_type = entry
            .file_type()
            .map_err(|e| format!("Failed to inspect '{}': {e}", path.display()))?;

        if file_type.is_dir() {
            collect_files_recursive(&path, out)?;
            continue;
        }

        if path.is_file() {
            out.push(path);
        }
    }

    Ok(())
}

const DEFAULT_FILE_MODE: u32 = 0o644;

// 実行ビットを復元後も保つため、Unixでは元ファイルの権限をそのまま記録する。
#[cfg(unix)]
fn source_file_mode(source: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(source)
        .map(|metadata| metadata.permissions().mode() & 0o777)
        .unwrap_or(DEFAULT_FILE_MODE)
}

#[cfg(not(unix))]
fn source_file_mode(_source: &Path) -> u32 {
    DEFAULT_FILE_MODE
}

fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(MAX_DEFLATE_LEVEL))
        .unix_permissions(mode)
}

fn directory_options() -> SimpleFileOptions {
    SimpleFileOptions::default().unix_permissions(0o755)
}

fn write_file_to_zip(
    zip: &mut ZipWriter<BufWriter<File>>,
    source: &Path,
    archive_path: &str,
    buffer: &mut [u8],
) -> Result<(), String> {
    let mut input = File::open(source)
        .map_err(|e| format!("Failed to open backup source file '{}': {e}", source.display()))?;

    zip.start_file(archive_path, entry_options(source_file_mode(source)))
        .map_err(|e| format!("Failed to start zip entry '{archive_path}': {e}"))?;

    copy_with_reused_buffer(&mut input, zip, buffer)
        .map_err(|e| format!("Failed to write zip entry '{archive_path}': {e}"))?;

    Ok(())
}

/// `root` 配下の指定ディレクトリを `<name>/<relative>` 形式でアーカイブへ書き出す。
///
/// 存在しないディレクトリは黙ってスキップし、実際に含めた数を返す。
/// 出力先に既存ファイルがあれば削除してから作り直す。
pub fn pack_directories(
    root: &Path,
    directory_names: &[String],
    archive_path: &Path,
) -> Result<PackSummary, String> {
    if archive_path.exists() {
        fs::remove_file(archive_path).map_err(|e| {
            format!(
                "Failed to remove existing archive '{}': {e}",
                archive_path.display()
            )
        })?;
    }

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create archive output directory '{}': {e}",
                parent.display()
            )
        })?;
    }

    let output_file = File::create(archive_path).map_err(|e| {
        format!(
            "Failed to create backup archive '{}': {e}",
            archive_path.display()
        )
    })?;
    let mut zip = ZipWriter::new(BufWriter::with_capacity(ZIP_COPY_BUFFER_SIZE, output_file));
    let mut copy_buffer = vec![0_u8; ZIP_COPY_BUFFER_SIZE];
    let mut summary = PackSummary::default();

    for name in directory_names {
        let directory = root.join(name);
        if !directory.is_dir() {
            log::debug!("Skipping missing backup directory: {}", directory.display());
            continue;
        }

        // 空ディレクトリでも復元側で作られるよう、トップレベルのエントリを明示的に追加する。
        zip.add_directory(format!("{name}/"), directory_options())
            .map_err(|e| format!("Failed to add directory entry '{name}': {e}"))?;

        let mut files = Vec::new();
        collect_files_recursive(&directory, &mut files)?;
        for file_path in &files {
            let relative = file_path.strip_prefix(&directory).map_err(|_| {
                format!(
                    "Internal path error while packing: '{}' is not under '{}'.",
                    file_path.display(),
                    directory.display()
                )
            })?;
            let entry_path = format!("{name}/{}", normalize_path_for_archive(relative));
            write_file_to_zip(&mut zip, file_path, &entry_path, &mut copy_buffer)?;
        }

        summary.directories += 1;
        summary.files += files.len();
    }

    let mut writer = zip
        .finish()
        .map_err(|e| format!("Failed to finalize backup archive: {e}"))?;
    writer
        .flush()
        .map_err(|e| format!("Failed to flush backup archive: {e}"))?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::ZipArchive;

    fn entry_names(archive_path: &Path) -> Vec<String> {
        let file = File::open(archive_path).expect("failed to open archive");
        let mut archive = ZipArchive::new(file).expect("invalid archive");
        (0..archive.len())
            .map(|index| {
                archive
                    .by_index(index)
                    .expect("failed to read entry")
                    .name()
                    .to_string()
            })
            .collect()
    }

    fn write(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent");
        }
        fs::write(path, content).expect("failed to write file");
    }

    #[test]
    fn packs_existing_directories_with_forward_slash_entries() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        write(&root.path().join("Settings").join("Settings.json"), b"{}");
        write(
            &root.path().join("Plugins").join("ThemeX").join("lib").join("a.dll"),
            b"dll",
        );
        let archive_path = root.path().join("out").join("FlowBackup.zip");

        let summary = pack_directories(
            root.path(),
            &["Settings".to_string(), "Plugins".to_string(), "Themes".to_string()],
            &archive_path,
        )
        .expect("packing should succeed");

        assert_eq!(summary, PackSummary { directories: 2, files: 2 });

        let names = entry_names(&archive_path);
        assert!(names.contains(&"Settings/Settings.json".to_string()));
        assert!(names.contains(&"Plugins/ThemeX/lib/a.dll".to_string()));
        assert!(names.iter().all(|name| !name.contains('\\')));
        assert!(names.iter().all(|name| !name.starts_with("Themes")));
    }

    #[test]
    fn returns_zero_when_nothing_exists() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let archive_path = root.path().join("FlowBackup.zip");

        let summary = pack_directories(root.path(), &["Settings".to_string()], &archive_path)
            .expect("packing should succeed");
        assert_eq!(summary.directories, 0);
    }

    #[test]
    fn overwrites_existing_archive() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        write(&root.path().join("Themes").join("dark.xaml"), b"<xaml/>");
        let archive_path = root.path().join("FlowBackup.zip");
        fs::write(&archive_path, b"not a zip").expect("failed to write stale archive");

        pack_directories(root.path(), &["Themes".to_string()], &archive_path)
            .expect("packing should succeed");

        assert!(entry_names(&archive_path).contains(&"Themes/dark.xaml".to_string()));
    }

    #[test]
    fn empty_directory_is_counted_and_recorded() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        fs::create_dir_all(root.path().join("Themes")).expect("failed to create dir");
        let archive_path = root.path().join("FlowBackup.zip");

        let summary = pack_directories(root.path(), &["Themes".to_string()], &archive_path)
            .expect("packing should succeed");

        assert_eq!(summary, PackSummary { directories: 1, files: 0 });
        assert_eq!(entry_names(&archive_path), vec!["Themes/".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn executable_mode_is_recorded() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().expect("failed to create temp dir");
        let tool = root.path().join("Plugins").join("Tool").join("run.sh");
        write(&tool, b"#!/bin/sh\n");
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))
            .expect("failed to chmod");
        write(&root.path().join("Plugins").join("Tool").join("data.txt"), b"data");
        let archive_path = root.path().join("FlowBackup.zip");

        pack_directories(root.path(), &["Plugins".to_string()], &archive_path)
            .expect("packing should succeed");

        let file = File::open(&archive_path).expect("failed to open archive");
        let mut archive = ZipArchive::new(file).expect("invalid archive");
        let mode_of = |archive: &mut ZipArchive<File>, name: &str| {
            archive
                .by_name(name)
                .expect("missing entry")
                .unix_mode()
                .expect("entry has no unix mode")
                & 0o777
        };
        assert_eq!(mode_of(&mut archive, "Plugins/Tool/run.sh"), 0o755);
        assert_eq!(mode_of(&mut archive, "Plugins/Tool/data.txt") & 0o111, 0);
    }
}