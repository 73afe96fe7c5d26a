//! サービス層モジュール。
//! commands層から業務ロジックを分離し、ホストとの境界をトレイトで表す。

pub mod backup_service;
pub mod host;
