// utils層のモジュール公開一覧。
// サービス層とcommands層から共通で使う部品だけをここに置く。
pub mod directories;
pub mod restore_script;
pub mod settings;
pub mod storage;
pub mod webdav;
pub mod workspace;
pub mod zip;
