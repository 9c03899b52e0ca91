//! ランタイム設定

use serde::{Deserialize, Serialize};

/// ランタイム設定
///
/// ライブラリは環境変数やファイルを読まない。設定ファイル（TOML 等）の読み込みは呼び出し側が行う。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// ステージ別の所要時間を計測する
    pub profile_stages: bool,
    /// 1 回の invoke での飽和回数がこの値以上なら warn ログ（0 で無効）
    pub saturation_warn_threshold: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { profile_stages: false, saturation_warn_threshold: 16 }
    }
}

impl RuntimeConfig {
    /// 飽和回数が警告閾値に達しているか
    pub fn should_warn(&self, saturated: u32) -> bool {
        self.saturation_warn_threshold > 0 && saturated >= self.saturation_warn_threshold
    }
}
