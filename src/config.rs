// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 检测参数
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::Duration;

use crate::{
  announce::{SPEECH_COOLDOWN, VIBRATION_DURATION},
  model::DecodeConfig,
  output::VoiceConfig,
  task::DETECTION_INTERVAL,
  tensor::PreprocessConfig,
};

/// 一套完整的检测参数
///
/// 不同的部署（320 或 640 输入、两种输出排布、不同播报语言）只在这些取值上不同。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub preprocess: PreprocessConfig,
  pub decode: DecodeConfig,
  pub interval: Duration,
  pub cooldown: Duration,
  pub voice: VoiceConfig,
  pub vibration: Duration,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      preprocess: PreprocessConfig::default(),
      decode: DecodeConfig::default(),
      interval: DETECTION_INTERVAL,
      cooldown: SPEECH_COOLDOWN,
      voice: VoiceConfig::default(),
      vibration: VIBRATION_DURATION,
    }
  }
}

impl DetectorConfig {
  pub fn with_preprocess(mut self, preprocess: PreprocessConfig) -> Self {
    self.preprocess = preprocess;
    self
  }

  pub fn with_decode(mut self, decode: DecodeConfig) -> Self {
    self.decode = decode;
    self
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
    self.cooldown = cooldown;
    self
  }

  pub fn with_voice(mut self, voice: VoiceConfig) -> Self {
    self.voice = voice;
    self
  }

  pub fn with_vibration(mut self, vibration: Duration) -> Self {
    self.vibration = vibration;
    self
  }
}
