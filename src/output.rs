// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 语音、震动与提示输出
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

use std::{process::Stdio, time::Duration};

use tracing::{error, info, warn};

pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_SPEECH_PREFIX: &str = "Detected";

// espeak-ng 的默认语速与音高，对应 rate = 1.0、pitch = 1.0
const ESPEAK_BASE_WPM: f32 = 175.0;
const ESPEAK_BASE_PITCH: f32 = 50.0;

/// 播报参数
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
  pub language: String,
  pub rate: f32,
  pub pitch: f32,
  pub prefix: String,
}

impl Default for VoiceConfig {
  fn default() -> Self {
    Self {
      language: DEFAULT_LANGUAGE.to_string(),
      rate: 1.0,
      pitch: 1.0,
      prefix: DEFAULT_SPEECH_PREFIX.to_string(),
    }
  }
}

impl VoiceConfig {
  pub fn with_language(mut self, language: impl Into<String>) -> Self {
    self.language = language.into();
    self
  }

  pub fn with_rate(mut self, rate: f32) -> Self {
    self.rate = rate;
    self
  }

  pub fn with_pitch(mut self, pitch: f32) -> Self {
    self.pitch = pitch;
    self
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn utterance(&self, label: &str) -> String {
    if self.prefix.is_empty() {
      label.to_string()
    } else {
      format!("{} {}", self.prefix, label)
    }
  }
}

/// 语音合成：发出即忘，不等待播放完成
pub trait Speaker: Send + Sync {
  fn speak(&self, text: &str, language: &str, rate: f32, pitch: f32);
}

/// 震动反馈，尽力而为
pub trait Haptic: Send + Sync {
  fn vibrate(&self, duration: Duration);
}

/// 面向用户的阻塞式提示
pub trait Notifier: Send + Sync {
  fn notify(&self, message: &str);
}

/// 仅写日志的播报器
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
  fn speak(&self, text: &str, language: &str, rate: f32, pitch: f32) {
    info!("播报 [{} x{} ^{}]: {}", language, rate, pitch, text);
  }
}

/// 仅写日志的提示器
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, message: &str) {
    error!("{}", message);
  }
}

/// 调用外部 TTS 程序（兼容 espeak-ng 参数）播报
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
  program: String,
}

impl CommandSpeaker {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
    }
  }

  fn args(text: &str, language: &str, rate: f32, pitch: f32) -> Vec<String> {
    vec![
      "-v".to_string(),
      language.to_string(),
      "-s".to_string(),
      format!("{:.0}", ESPEAK_BASE_WPM * rate),
      "-p".to_string(),
      format!("{:.0}", (ESPEAK_BASE_PITCH * pitch).clamp(0.0, 99.0)),
      text.to_string(),
    ]
  }
}

impl Speaker for CommandSpeaker {
  fn speak(&self, text: &str, language: &str, rate: f32, pitch: f32) {
    let spawned = tokio::process::Command::new(&self.program)
      .args(Self::args(text, language, rate, pitch))
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn();

    // 子进程由 tokio 在后台回收
    match spawned {
      Ok(_child) => info!("播报: {}", text),
      Err(e) => warn!("无法启动语音程序 {}: {}", self.program, e),
    }
  }
}
