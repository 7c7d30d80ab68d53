// 该文件是 Kanjian （看见） 项目的一部分。
// src/app.rs - 应用上下文
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
  time::Duration,
};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
  announce::Announcer,
  config::DetectorConfig,
  input::{CaptureError, FacingMode, FrameSource},
  model::ClassCatalog,
  output::{Haptic, LogNotifier, LogSpeaker, Notifier, Speaker},
  preference::ThemePreference,
  session::{BackendFactory, ModelSpec, SessionManager},
  task::{Clock, DetectionLoop, Pipeline, SharedFrameSource, TokioClock},
};

/// 界面层关心的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppContext {
  pub dark_mode: bool,
  pub facing: FacingMode,
}

pub struct CameraDetectorBuilder {
  factory: Arc<dyn BackendFactory>,
  model: ModelSpec,
  source: Box<dyn FrameSource>,
  catalog: ClassCatalog,
  config: DetectorConfig,
  speaker: Arc<dyn Speaker>,
  haptic: Option<Arc<dyn Haptic>>,
  notifier: Arc<dyn Notifier>,
  clock: Arc<dyn Clock>,
  preference: Option<ThemePreference>,
  facing: FacingMode,
}

impl CameraDetectorBuilder {
  pub fn with_catalog(mut self, catalog: ClassCatalog) -> Self {
    self.catalog = catalog;
    self
  }

  pub fn with_config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_speaker(mut self, speaker: Arc<dyn Speaker>) -> Self {
    self.speaker = speaker;
    self
  }

  pub fn with_haptic(mut self, haptic: Arc<dyn Haptic>) -> Self {
    self.haptic = Some(haptic);
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_preference(mut self, preference: ThemePreference) -> Self {
    self.preference = Some(preference);
    self
  }

  pub fn with_facing(mut self, facing: FacingMode) -> Self {
    self.facing = facing;
    self
  }

  pub fn build(self) -> CameraDetector {
    let config = self.config;
    let sessions = Arc::new(SessionManager::new(self.factory));
    let source: SharedFrameSource = Arc::new(Mutex::new(self.source));

    let announcer = Announcer::new(self.speaker, config.voice.clone(), config.cooldown)
      .with_haptic(self.haptic, config.vibration);
    let pipeline = Pipeline::new(
      Arc::clone(&sessions),
      Arc::clone(&source),
      Arc::new(self.catalog),
      announcer,
    )
    .with_preprocess(config.preprocess)
    .with_decode(config.decode)
    .with_clock(self.clock);
    let detection = DetectionLoop::new(Arc::new(pipeline)).with_period(config.interval);

    let dark_mode = self
      .preference
      .as_ref()
      .is_some_and(ThemePreference::load);

    CameraDetector {
      sessions,
      model: self.model,
      source,
      notifier: self.notifier,
      preference: self.preference,
      context: AppContext {
        dark_mode,
        facing: self.facing,
      },
      detection,
    }
  }
}

/// 模型会话、摄像头与检测循环的组合
pub struct CameraDetector {
  sessions: Arc<SessionManager>,
  model: ModelSpec,
  source: SharedFrameSource,
  notifier: Arc<dyn Notifier>,
  preference: Option<ThemePreference>,
  context: AppContext,
  detection: DetectionLoop,
}

impl CameraDetector {
  pub fn builder(
    factory: Arc<dyn BackendFactory>,
    model: ModelSpec,
    source: Box<dyn FrameSource>,
  ) -> CameraDetectorBuilder {
    CameraDetectorBuilder {
      factory,
      model,
      source,
      catalog: ClassCatalog::coco(),
      config: DetectorConfig::default(),
      speaker: Arc::new(LogSpeaker),
      haptic: None,
      notifier: Arc::new(LogNotifier),
      clock: Arc::new(TokioClock),
      preference: None,
      facing: FacingMode::default(),
    }
  }

  /// 加载失败时只提示一次诊断信息，进程继续运行
  pub async fn load_model(&self) -> bool {
    match self.sessions.load(&self.model).await {
      Ok(_) => true,
      Err(e) => {
        self.notifier.notify(&e.diagnostic());
        false
      }
    }
  }

  pub async fn reload_model(&mut self) -> bool {
    info!("重新加载模型");
    self.stop_camera();
    self.load_model().await
  }

  pub async fn is_model_loaded(&self) -> bool {
    self.sessions.is_loaded().await
  }

  pub fn sessions(&self) -> &Arc<SessionManager> {
    &self.sessions
  }

  pub fn is_camera_on(&self) -> bool {
    self.detection.is_running()
  }

  /// 打开失败时提示用户，摄像头保持关闭
  pub fn start_camera(&mut self) -> Result<(), CaptureError> {
    if self.detection.is_running() {
      return Ok(());
    }

    let opened = self
      .source
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .open(self.context.facing);
    if let Err(e) = opened {
      warn!("无法启动摄像头: {}", e);
      self.notifier.notify(e.user_message());
      return Err(e);
    }

    info!("摄像头已开启 ({})", self.context.facing);
    self.detection.start();
    Ok(())
  }

  pub fn stop_camera(&mut self) {
    if self.detection.stop() {
      self
        .source
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .close();
      info!("摄像头已关闭");
    }
  }

  /// 返回切换后摄像头是否开启
  pub fn toggle_camera(&mut self) -> Result<bool, CaptureError> {
    if self.is_camera_on() {
      self.stop_camera();
    } else {
      self.start_camera()?;
    }
    Ok(self.is_camera_on())
  }

  /// 切换前后摄像头，运行中则以新朝向重启
  pub fn switch_camera(&mut self) -> Result<FacingMode, CaptureError> {
    self.context.facing = self.context.facing.flipped();
    info!("切换摄像头朝向: {}", self.context.facing);
    if self.is_camera_on() {
      self.stop_camera();
      self.start_camera()?;
    }
    Ok(self.context.facing)
  }

  /// 以内存中的状态为准；偏好无法写入时仍在内存中切换
  pub fn toggle_dark_mode(&mut self) -> bool {
    let dark_mode = !self.context.dark_mode;
    if let Some(preference) = &self.preference {
      if let Err(e) = preference.store(dark_mode) {
        warn!("无法保存主题偏好: {}", e);
      }
    }
    self.context.dark_mode = dark_mode;
    dark_mode
  }

  pub fn context(&self) -> AppContext {
    self.context
  }

  pub fn last_detected(&self) -> String {
    self.detection.pipeline().last_detected()
  }

  pub fn subscribe(&self) -> watch::Receiver<String> {
    self.detection.pipeline().subscribe()
  }

  pub fn interval(&self) -> Duration {
    self.detection.period()
  }
}
