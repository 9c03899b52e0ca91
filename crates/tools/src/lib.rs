//! microlstm ランタイムのベンチマークツール
//!
//! 参照シナリオ・レイテンシ計測・並列ストリーム実行と、その結果レポート。

pub mod bench;
pub mod report;
