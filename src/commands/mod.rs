// commands層の公開モジュールを集約するエントリ。
// CLIの各サブコマンドはこの配下の関数へ委譲する。
pub mod backup;
pub mod directories;
pub mod host;
pub mod settings;
