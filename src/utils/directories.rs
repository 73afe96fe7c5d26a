//! バックアップ対象ディレクトリ名の正規化と、実在ディレクトリとの突き合わせ。
//! resolve系はI/Oを持たない純関数として保ち、列挙だけを別関数に分ける。

use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 選択が空になったときに優先して使う既定セット。
pub const PREFERRED_DEFAULT_DIRECTORIES: [&str; 3] = ["Settings", "Plugins", "Themes"];

/// 設定値のディレクトリ名を最終セグメントだけに正規化する。
/// 親ディレクトリ参照を含む値と空値は `None`。
pub fn normalize_directory_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // 区切り文字はOSに関係なく `/` と `\` の両方を扱い、連続した区切りは空セグメントとして捨てる。
    let segments: Vec<&str> = trimmed
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments
        .iter()
        .any(|segment| *segment == ".." || *segment == ".")
    {
        return None;
    }

    segments.last().map(|segment| (*segment).to_string())
}

fn fold_key(name: &str) -> String {
    name.to_lowercase()
}

/// 設定に保存し直すための正規化済み選択リスト(大文字小文字無視で重複排除、先勝ち)。
pub fn normalize_selection<S: AsRef<str>>(configured: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    configured
        .iter()
        .filter_map(|raw| normalize_directory_name(raw.as_ref()))
        .filter(|name| seen.insert(fold_key(name)))
        .collect()
}

fn match_available<'a>(name: &str, available: &'a [String]) -> Option<&'a String> {
    let key = fold_key(name);
    available.iter().find(|candidate| fold_key(candidate) == key)
}

/// 設定済みの名前と実在するディレクトリ名から、実際にバックアップする集合を決める。
///
/// 結果は常に `available` の部分集合で、表記は `available` 側に揃える。
/// 一致が一つもなければ既定セット、それも無ければ `available` 全体へフォールバックする。
pub fn resolve<S: AsRef<str>>(configured: &[S], available: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut effective = Vec::new();

    for name in normalize_selection(configured) {
        if let Some(actual) = match_available(&name, available) {
            if seen.insert(fold_key(actual)) {
                effective.push(actual.clone());
            }
        }
    }

    if !effective.is_empty() || available.is_empty() {
        return effective;
    }

    for preferred in PREFERRED_DEFAULT_DIRECTORIES {
        if let Some(actual) = match_available(preferred, available) {
            if seen.insert(fold_key(actual)) {
                effective.push(actual.clone());
            }
        }
    }

    if !effective.is_empty() {
        return effective;
    }

    available
        .iter()
        .filter(|name| seen.insert(fold_key(name)))
        .cloned()
        .collect()
}

/// データルート直下のディレクトリ名を列挙する。ルートが無ければ空。
pub fn list_available_directories(root: &Path) -> Result<Vec<String>, String> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(root)
        .map_err(|e| format!("Failed to read data root '{}': {e}", root.display()))?
    {
        let entry = entry.map_err(|e| {
            format!(
                "Failed to read a directory entry under '{}': {e}",
                root.display()
            )
        })?;

        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }

        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }

    names.sort_by_key(|name| fold_key(name));
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn normalize_keeps_last_segment() {
        assert_eq!(normalize_directory_name("  Themes "), Some("Themes".to_string()));
        assert_eq!(
            normalize_directory_name("C:\\Users\\me\\\\Settings\\"),
            Some("Settings".to_string())
        );
        assert_eq!(normalize_directory_name("a//b///Plugins"), Some("Plugins".to_string()));
    }

    #[test]
    fn normalize_rejects_traversal_and_empty() {
        assert_eq!(normalize_directory_name(""), None);
        assert_eq!(normalize_directory_name("   "), None);
        assert_eq!(normalize_directory_name("//"), None);
        assert_eq!(normalize_directory_name("../Settings"), None);
        assert_eq!(normalize_directory_name("Plugins\\..\\.."), None);
        assert_eq!(normalize_directory_name("."), None);
    }

    #[test]
    fn resolve_intersects_case_insensitively_and_uses_available_spelling() {
        let available = names(&["Settings", "Plugins", "Themes", "Cache"]);
        let effective = resolve(&["cache", "THEMES", "Missing"], &available);
        assert_eq!(effective, names(&["Cache", "Themes"]));
    }

    #[test]
    fn resolve_deduplicates_preserving_first_occurrence() {
        let available = names(&["Settings", "Plugins", "Themes"]);
        let effective = resolve(&["plugins", "Settings", "PLUGINS", "x/settings"], &available);
        assert_eq!(effective, names(&["Plugins", "Settings"]));
    }

    #[test]
    fn resolve_output_is_subset_of_available() {
        let available = names(&["Settings", "Logs"]);
        let configured = ["../etc", "Settings", "logs", "Plugins", "Themes", ""];
        let effective = resolve(&configured, &available);
        assert!(effective.iter().all(|name| available.contains(name)));
        assert_eq!(effective, names(&["Settings", "Logs"]));
    }

    #[test]
    fn resolve_falls_back_to_preferred_defaults() {
        let available = names(&["Settings", "Plugins", "Themes", "Cache"]);
        let empty: [&str; 0] = [];
        assert_eq!(
            resolve(&empty, &available),
            names(&["Settings", "Plugins", "Themes"])
        );

        let partial = names(&["Cache", "themes"]);
        assert_eq!(resolve(&["Nope"], &partial), names(&["themes"]));
    }

    #[test]
    fn resolve_falls_back_to_everything_available() {
        let available = names(&["Cache", "Logs", "cache"]);
        let empty: [&str; 0] = [];
        assert_eq!(resolve(&empty, &available), names(&["Cache", "Logs"]));
    }

    #[test]
    fn resolve_with_nothing_available_is_empty() {
        assert!(resolve(&["Settings"], &[]).is_empty());
    }

    #[test]
    fn normalize_selection_deduplicates() {
        assert_eq!(
            normalize_selection(&[" Settings", "settings", "../x", "Themes/"]),
            names(&["Settings", "Themes"])
        );
    }

    #[test]
    fn list_available_directories_ignores_files() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        fs::create_dir_all(root.path().join("Themes")).expect("failed to create dir");
        fs::create_dir_all(root.path().join("settings")).expect("failed to create dir");
        fs::write(root.path().join("log.txt"), b"x").expect("failed to write file");

        let listed = list_available_directories(root.path()).expect("listing should succeed");
        assert_eq!(listed, names(&["settings", "Themes"]));
    }

    #[test]
    fn list_available_directories_missing_root_is_empty() {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let listed = list_available_directories(&root.path().join("absent"))
            .expect("missing root should not fail");
        assert!(listed.is_empty());
    }
}
