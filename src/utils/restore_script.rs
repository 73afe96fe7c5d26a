//! ホスト終了後に別プロセスで実行する復元スクリプトの生成と起動。
//! 実行中のプロセス自身のファイルを置き換えるため、展開・差し替えは全てスクリプト側で行う。

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// サブフォルダ単位でマージする特別なトップレベルディレクトリ。
pub const PLUGINS_DIRECTORY_NAME: &str = "Plugins";
pub const DEFAULT_HOST_RELEASE_DELAY: Duration = Duration::from_secs(2);
const EXTRACT_DIR_NAME: &str = "extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptDialect {
    PowerShell,
    Posix,
}

impl ScriptDialect {
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::PowerShell
        } else {
            Self::Posix
        }
    }

    pub fn script_file_name(self) -> &'static str {
        match self {
            Self::PowerShell => "restore.ps1",
            Self::Posix => "restore.sh",
        }
    }

    /// 単一引用符リテラルとして埋め込めるよう値をエスケープする。
    pub fn quote(self, value: &str) -> String {
        match self {
            // PowerShellは typographic な単一引用符も区切りとして扱うため、全て二重化する。
            Self::PowerShell => {
                let mut quoted = String::with_capacity(value.len() + 2);
                quoted.push('\'');
                for ch in value.chars() {
                    if matches!(ch, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
                        quoted.push(ch);
                    }
                    quoted.push(ch);
                }
                quoted.push('\'');
                quoted
            }
            Self::Posix => format!("'{}'", value.replace('\'', "'\\''")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreScriptRequest {
    pub archive_path: PathBuf,
    pub target_root: PathBuf,
    pub host_executable: PathBuf,
    /// 復元中に上書きしてはならない自分自身のプラグインフォルダ名。空なら除外なし。
    pub self_exclude_folder: String,
    pub host_release_delay: Duration,
}

impl RestoreScriptRequest {
    pub fn new(
        archive_path: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
        host_executable: impl Into<PathBuf>,
        self_exclude_folder: impl Into<String>,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            target_root: target_root.into(),
            host_executable: host_executable.into(),
            self_exclude_folder: self_exclude_folder.into(),
            host_release_delay: DEFAULT_HOST_RELEASE_DELAY,
        }
    }

    fn extract_dir(&self) -> PathBuf {
        self.archive_path
            .parent()
            .map(|parent| parent.join(EXTRACT_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(EXTRACT_DIR_NAME))
    }

    /// 実行ファイル名から拡張子を除いたプロセス名。Windows形式のパスも受け付ける。
    fn host_process_name(&self) -> String {
        let full = self.host_executable.to_string_lossy();
        let file_name = full.rsplit(['/', '\\']).next().unwrap_or_default();
        Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

fn required_path(value: &Path, label: &str) -> Result<String, String> {
    let text = value.to_string_lossy().to_string();
    if text.trim().is_empty() {
        return Err(format!("{label} must not be empty"));
    }
    if text.contains('\0') {
        return Err(format!("{label} must not contain NUL characters"));
    }
    Ok(text)
}

/// 復元スクリプト本文を生成する。入力が不正な場合だけ失敗する。
pub fn generate(dialect: ScriptDialect, request: &RestoreScriptRequest) -> Result<String, String> {
    let archive = required_path(&request.archive_path, "Archive path")?;
    let target = required_path(&request.target_root, "Target root path")?;
    let host_exe = required_path(&request.host_executable, "Host executable path")?;
    if request.self_exclude_folder.contains('\0') {
        return Err("Excluded folder name must not contain NUL characters".to_string());
    }

    let vars = ScriptVars {
        archive: dialect.quote(&archive),
        target: dialect.quote(&target),
        host_exe: dialect.quote(&host_exe),
        host_name: dialect.quote(&request.host_process_name()),
        skip_plugin: dialect.quote(&request.self_exclude_folder),
        extract_dir: dialect.quote(&request.extract_dir().to_string_lossy()),
        plugins_dir: dialect.quote(PLUGINS_DIRECTORY_NAME),
        delay_ms: request.host_release_delay.as_millis(),
    };

    Ok(match dialect {
        ScriptDialect::PowerShell => powershell_script(&vars),
        ScriptDialect::Posix => posix_script(&vars),
    })
}

struct ScriptVars {
    archive: String,
    target: String,
    host_exe: String,
    host_name: String,
    skip_plugin: String,
    extract_dir: String,
    plugins_dir: String,
    delay_ms: u128,
}

fn powershell_script(vars: &ScriptVars) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "$ErrorActionPreference = 'Stop'");
    let _ = writeln!(script, "$archive = {}", vars.archive);
    let _ = writeln!(script, "$target = {}", vars.target);
    let _ = writeln!(script, "$hostExe = {}", vars.host_exe);
    let _ = writeln!(script, "$hostName = {}", vars.host_name);
    let _ = writeln!(script, "$skipPlugin = {}", vars.skip_plugin);
    let _ = writeln!(script, "$extractDir = {}", vars.extract_dir);
    let _ = writeln!(script, "$pluginsDir = {}", vars.plugins_dir);
    let _ = writeln!(script, "$workDir = Split-Path -Parent $archive");
    script.push_str(&format!(
        r#"
Start-Sleep -Milliseconds {delay}
if ($hostName -ne '') {{
    Get-Process -Name $hostName -ErrorAction SilentlyContinue | Stop-Process -Force -ErrorAction SilentlyContinue
    Start-Sleep -Milliseconds 500
}}

try {{
    New-Item -ItemType Directory -Force -Path $target | Out-Null
    if (Test-Path -LiteralPath $extractDir) {{
        Remove-Item -LiteralPath $extractDir -Recurse -Force
    }}
    Expand-Archive -LiteralPath $archive -DestinationPath $extractDir -Force

    foreach ($dir in Get-ChildItem -LiteralPath $extractDir -Directory) {{
        $dest = Join-Path $target $dir.Name
        if ($dir.Name -ieq $pluginsDir) {{
            New-Item -ItemType Directory -Force -Path $dest | Out-Null
            foreach ($child in Get-ChildItem -LiteralPath $dir.FullName -Directory) {{
                if ($skipPlugin -ne '' -and $child.Name -ieq $skipPlugin) {{
                    continue
                }}
                $childDest = Join-Path $dest $child.Name
                if (Test-Path -LiteralPath $childDest) {{
                    Remove-Item -LiteralPath $childDest -Recurse -Force
                }}
                Copy-Item -LiteralPath $child.FullName -Destination $childDest -Recurse -Force
            }}
            foreach ($file in Get-ChildItem -LiteralPath $dir.FullName -File) {{
                Copy-Item -LiteralPath $file.FullName -Destination (Join-Path $dest $file.Name) -Force
            }}
        }} else {{
            if (Test-Path -LiteralPath $dest) {{
                Remove-Item -LiteralPath $dest -Recurse -Force
            }}
            Copy-Item -LiteralPath $dir.FullName -Destination $dest -Recurse -Force
        }}
    }}
}}
finally {{
    if (Test-Path -LiteralPath $hostExe) {{
        Start-Process -FilePath $hostExe
    }}
    Remove-Item -LiteralPath $extractDir -Recurse -Force -ErrorAction SilentlyContinue
    Remove-Item -LiteralPath $archive -Force -ErrorAction SilentlyContinue
    Remove-Item -LiteralPath $PSCommandPath -Force -ErrorAction SilentlyContinue
    # 作業ディレクトリ自身はカレントのままだと消せない。
    Set-Location -LiteralPath $env:TEMP
    Remove-Item -LiteralPath $workDir -Recurse -Force -ErrorAction SilentlyContinue
}}
"#,
        delay = vars.delay_ms
    ));
    script
}

fn posix_script(vars: &ScriptVars) -> String {
    let mut script = String::from("#!/bin/sh\n");
    let _ = writeln!(script, "ARCHIVE={}", vars.archive);
    let _ = writeln!(script, "TARGET={}", vars.target);
    let _ = writeln!(script, "HOST_EXE={}", vars.host_exe);
    let _ = writeln!(script, "HOST_NAME={}", vars.host_name);
    let _ = writeln!(script, "SKIP_PLUGIN={}", vars.skip_plugin);
    let _ = writeln!(script, "EXTRACT_DIR={}", vars.extract_dir);
    let _ = writeln!(script, "PLUGINS_DIR={}", vars.plugins_dir);
    let delay_secs = vars.delay_ms.div_ceil(1000);
    script.push_str(&format!(
        r#"
lower() {{
    printf '%s' "$1" | tr '[:upper:]' '[:lower:]'
}}

sleep {delay_secs}
if [ -n "$HOST_NAME" ]; then
    pkill -x -- "$HOST_NAME" >/dev/null 2>&1 || true
fi

mkdir -p -- "$TARGET"
rm -rf -- "$EXTRACT_DIR"
mkdir -p -- "$EXTRACT_DIR"
if unzip -q -o "$ARCHIVE" -d "$EXTRACT_DIR"; then
    for dir in "$EXTRACT_DIR"/*/; do
        [ -d "$dir" ] || continue
        dir=${{dir%/}}
        name=$(basename -- "$dir")
        dest="$TARGET/$name"
        if [ "$(lower "$name")" = "$(lower "$PLUGINS_DIR")" ]; then
            mkdir -p -- "$dest"
            for child in "$dir"/* "$dir"/.[!.]*; do
                [ -e "$child" ] || continue
                child_name=$(basename -- "$child")
                if [ -d "$child" ]; then
                    if [ -n "$SKIP_PLUGIN" ] && [ "$(lower "$child_name")" = "$(lower "$SKIP_PLUGIN")" ]; then
                        continue
                    fi
                    rm -rf -- "$dest/$child_name"
                    cp -R -- "$child" "$dest/$child_name"
                else
                    cp -f -- "$child" "$dest/$child_name"
                fi
            done
        else
            rm -rf -- "$dest"
            cp -R -- "$dir" "$dest"
        fi
    done
fi

if [ -x "$HOST_EXE" ]; then
    nohup "$HOST_EXE" >/dev/null 2>&1 &
fi
rm -rf -- "$EXTRACT_DIR"
rm -f -- "$ARCHIVE"
rm -f -- "$0"
rmdir -- "$(dirname -- "$ARCHIVE")" 2>/dev/null || true
"#
    ));
    script
}

#[cfg(windows)]
fn build_launch_command(dialect: ScriptDialect, script_path: &Path) -> Command {
    use std::os::windows::process::CommandExt;

    // 親プロセス終了後も動き続け、コンソールも表示しない。
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    const DETACHED_PROCESS: u32 = 0x0000_0008;

    let mut command = match dialect {
        ScriptDialect::PowerShell => {
            let mut cmd = Command::new("powershell.exe");
            cmd.args([
                "-NoProfile",
                "-ExecutionPolicy",
                "Bypass",
                "-WindowStyle",
                "Hidden",
                "-File",
            ])
            .arg(script_path);
            cmd
        }
        ScriptDialect::Posix => {
            let mut cmd = Command::new("sh");
            cmd.arg(script_path);
            cmd
        }
    };
    command.creation_flags(CREATE_NO_WINDOW | DETACHED_PROCESS);
    command
}

#[cfg(not(windows))]
fn build_launch_command(dialect: ScriptDialect, script_path: &Path) -> Command {
    use std::os::unix::process::CommandExt;

    let mut command = match dialect {
        ScriptDialect::PowerShell => {
            let mut cmd = Command::new("pwsh");
            cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                .arg(script_path);
            cmd
        }
        ScriptDialect::Posix => {
            let mut cmd = Command::new("sh");
            cmd.arg(script_path);
            cmd
        }
    };
    // 新しいプロセスグループにしてホスト終了のシグナルを受けないようにする。
    command.process_group(0);
    command
}

/// スクリプトを切り離されたプロセスとして起動し、PIDを返す。終了は待たない。
pub fn launch_detached(
    dialect: ScriptDialect,
    script_path: &Path,
    working_dir: &Path,
) -> Result<u32, String> {
    let mut command = build_launch_command(dialect, script_path);
    command
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let child = command.spawn().map_err(|e| {
        format!(
            "Failed to launch restore script '{}': {e}",
            script_path.display()
        )
    })?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_request() -> RestoreScriptRequest {
        RestoreScriptRequest::new(
            "C:\\Temp\\flowbackup-pull\\FlowBackup.zip",
            "C:\\Users\\me\\AppData\\Roaming\\FlowLauncher",
            "C:\\Users\\me\\AppData\\Local\\FlowLauncher\\Flow.Launcher.exe",
            "WebDAVBackup-abc123",
        )
    }

    #[test]
    fn powershell_quote_doubles_single_quotes() {
        assert_eq!(ScriptDialect::PowerShell.quote("it's"), "'it''s'");
        assert_eq!(
            ScriptDialect::PowerShell.quote("a\u{2019}b"),
            "'a\u{2019}\u{2019}b'"
        );
        assert_eq!(ScriptDialect::PowerShell.quote("$env:X"), "'$env:X'");
    }

    #[test]
    fn posix_quote_splices_single_quotes() {
        assert_eq!(ScriptDialect::Posix.quote("it's"), "'it'\\''s'");
        assert_eq!(ScriptDialect::Posix.quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn generate_rejects_empty_paths() {
        let mut request = sample_request();
        request.archive_path = PathBuf::new();
        assert!(generate(ScriptDialect::PowerShell, &request).is_err());

        let mut request = sample_request();
        request.target_root = PathBuf::from("  ");
        assert!(generate(ScriptDialect::Posix, &request).is_err());

        let mut request = sample_request();
        request.host_executable = PathBuf::new();
        assert!(generate(ScriptDialect::Posix, &request).is_err());
    }

    #[test]
    fn powershell_script_embeds_escaped_parameters_and_steps_in_order() {
        let mut request = sample_request();
        request.target_root = PathBuf::from("C:\\Users\\O'Brien\\FlowLauncher");
        let script = generate(ScriptDialect::PowerShell, &request).expect("script should generate");

        assert!(script.contains("$target = 'C:\\Users\\O''Brien\\FlowLauncher'"));
        assert!(script.contains("$skipPlugin = 'WebDAVBackup-abc123'"));
        assert!(script.contains("$hostName = 'Flow.Launcher'"));
        assert!(script.contains("Start-Sleep -Milliseconds 2000"));
        assert!(script.contains("$workDir = Split-Path -Parent $archive"));

        let order = [
            "Start-Sleep -Milliseconds 2000",
            "Stop-Process -Force",
            "New-Item -ItemType Directory -Force -Path $target",
            "Expand-Archive",
            "$child.Name -ieq $skipPlugin",
            "Start-Process -FilePath $hostExe",
            "Remove-Item -LiteralPath $PSCommandPath",
            "Set-Location -LiteralPath $env:TEMP",
            "Remove-Item -LiteralPath $workDir -Recurse",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|needle| script.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn posix_script_embeds_escaped_parameters() {
        let mut request = sample_request();
        request.archive_path = PathBuf::from("/tmp/it's/FlowBackup.zip");
        let script = generate(ScriptDialect::Posix, &request).expect("script should generate");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("ARCHIVE='/tmp/it'\\''s/FlowBackup.zip'"));
        assert!(script.contains("EXTRACT_DIR='/tmp/it'\\''s/extracted'"));
        assert!(script.contains("SKIP_PLUGIN='WebDAVBackup-abc123'"));
        assert!(script.contains("sleep 2\n"));
    }

    #[cfg(unix)]
    fn unzip_available() -> bool {
        Command::new("sh")
            .args(["-c", "command -v unzip"])
            .stdout(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent");
        }
        fs::write(path, content).expect("failed to write file");
    }

    #[cfg(unix)]
    #[test]
    fn posix_restore_round_trip_skips_own_plugin_folder() {
        if !unzip_available() {
            eprintln!("unzip is not installed; skipping restore round trip");
            return;
        }

        let scratch = tempfile::tempdir().expect("failed to create temp dir");
        let source = scratch.path().join("source");
        write(&source.join("Settings").join("Settings.json"), "{\"new\":true}");
        write(&source.join("Settings").join("sub").join("deep.txt"), "deep");
        write(&source.join("Plugins").join("ThemeX").join("plugin.json"), "themex-new");
        write(
            &source.join("Plugins").join("WebDAVBackup-abc123").join("plugin.json"),
            "backup-old",
        );
        write(&source.join("Plugins").join("loose.txt"), "loose");
        let tool = source.join("Plugins").join("ThemeX").join("run.sh");
        write(&tool, "#!/bin/sh\n");
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))
                .expect("failed to chmod");
        }

        let target = scratch.path().join("target");
        write(&target.join("Settings").join("stale.json"), "stale");
        write(&target.join("Plugins").join("ThemeX").join("old.json"), "old");
        write(
            &target.join("Plugins").join("WebDAVBackup-abc123").join("plugin.json"),
            "backup-running",
        );
        write(&target.join("Plugins").join("Untouched").join("keep.txt"), "keep");

        let workspace = scratch.path().join("work");
        let archive = workspace.join("FlowBackup.zip");
        crate::utils::zip::pack_directories(
            &source,
            &["Settings".to_string(), "Plugins".to_string()],
            &archive,
        )
        .expect("packing should succeed");

        let mut request = RestoreScriptRequest::new(
            &archive,
            &target,
            scratch.path().join("no-such-host"),
            "WebDAVBackup-abc123",
        );
        request.host_release_delay = Duration::ZERO;
        let script = generate(ScriptDialect::Posix, &request).expect("script should generate");
        let script_path = workspace.join(ScriptDialect::Posix.script_file_name());
        fs::write(&script_path, script).expect("failed to write script");

        let status = Command::new("sh")
            .arg(&script_path)
            .current_dir(&workspace)
            .status()
            .expect("failed to run script");
        assert!(status.success());

        let read = |path: PathBuf| fs::read_to_string(path).expect("missing restored file");
        assert_eq!(read(target.join("Settings").join("Settings.json")), "{\"new\":true}");
        assert_eq!(read(target.join("Settings").join("sub").join("deep.txt")), "deep");
        assert!(!target.join("Settings").join("stale.json").exists());
        assert_eq!(read(target.join("Plugins").join("ThemeX").join("plugin.json")), "themex-new");
        assert!(!target.join("Plugins").join("ThemeX").join("old.json").exists());
        assert_eq!(
            read(target.join("Plugins").join("WebDAVBackup-abc123").join("plugin.json")),
            "backup-running"
        );
        assert_eq!(read(target.join("Plugins").join("Untouched").join("keep.txt")), "keep");
        assert_eq!(read(target.join("Plugins").join("loose.txt")), "loose");
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(target.join("Plugins").join("ThemeX").join("run.sh"))
                .expect("missing restored tool")
                .permissions()
                .mode();
            assert_ne!(mode & 0o100, 0, "executable bit lost: {mode:o}");
        }

        assert!(!archive.exists());
        assert!(!script_path.exists());
        assert!(!workspace.join("extracted").exists());
    }
}
