// 该文件是 Kanjian （看见） 项目的一部分。
// src/announce.rs - 播报去抖
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

use std::{
  sync::{Arc, Mutex, PoisonError},
  time::{Duration, Instant},
};

use tracing::debug;

use crate::{
  model::Detection,
  output::{Haptic, Speaker, VoiceConfig},
};

pub const SPEECH_COOLDOWN: Duration = Duration::from_millis(3000);
pub const VIBRATION_DURATION: Duration = Duration::from_millis(200);

/// 同一标签在冷却时间内只播报一次，不同标签从不被抑制
#[derive(Debug, Clone)]
pub struct Debouncer {
  cooldown: Duration,
  last: Option<(String, Instant)>,
}

impl Default for Debouncer {
  fn default() -> Self {
    Self::new(SPEECH_COOLDOWN)
  }
}

impl Debouncer {
  pub fn new(cooldown: Duration) -> Self {
    Self {
      cooldown,
      last: None,
    }
  }

  /// 仅在返回 true 时更新内部状态
  pub fn should_announce(&mut self, label: &str, now: Instant) -> bool {
    if let Some((last_label, last_time)) = &self.last {
      if last_label == label && now.saturating_duration_since(*last_time) < self.cooldown {
        debug!("{} 仍在冷却中，跳过播报", label);
        return false;
      }
    }

    self.last = Some((label.to_string(), now));
    true
  }

  pub fn last_label(&self) -> Option<&str> {
    self.last.as_ref().map(|(label, _)| label.as_str())
  }

  pub fn last_announced_at(&self) -> Option<Instant> {
    self.last.as_ref().map(|(_, at)| *at)
  }

  pub fn reset(&mut self) {
    self.last = None;
  }
}

/// 将每轮的最佳检测结果转为语音与震动
pub struct Announcer {
  debouncer: Mutex<Debouncer>,
  speaker: Arc<dyn Speaker>,
  haptic: Option<Arc<dyn Haptic>>,
  voice: VoiceConfig,
  vibration: Duration,
}

impl Announcer {
  pub fn new(speaker: Arc<dyn Speaker>, voice: VoiceConfig, cooldown: Duration) -> Self {
    Self {
      debouncer: Mutex::new(Debouncer::new(cooldown)),
      speaker,
      haptic: None,
      voice,
      vibration: VIBRATION_DURATION,
    }
  }

  pub fn with_haptic(mut self, haptic: Option<Arc<dyn Haptic>>, vibration: Duration) -> Self {
    self.haptic = haptic;
    self.vibration = vibration;
    self
  }

  /// 返回是否真正发出了语音
  pub fn announce(&self, best: &Detection, now: Instant) -> bool {
    if let Some(haptic) = &self.haptic {
      haptic.vibrate(self.vibration);
    }

    let allowed = self
      .debouncer
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .should_announce(&best.label, now);
    if allowed {
      let text = self.voice.utterance(&best.label);
      self
        .speaker
        .speak(&text, &self.voice.language, self.voice.rate, self.voice.pitch);
    }
    allowed
  }

  pub fn reset(&self) {
    self
      .debouncer
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .reset();
  }
}
