// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 摄像头物体播报主程序
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

mod args;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use kanjian::{
  FromUrl,
  app::CameraDetector,
  config::DetectorConfig,
  input::InputWrapper,
  model::{ClassCatalog, DecodeConfig},
  output::{CommandSpeaker, LogSpeaker, Speaker, VoiceConfig},
  preference::ThemePreference,
  session::{BackendFactory, ModelSpec},
  tensor::PreprocessConfig,
};

#[cfg(feature = "onnxruntime")]
fn backend_factory() -> Result<Arc<dyn BackendFactory>> {
  Ok(Arc::new(kanjian::session::OnnxRuntimeFactory))
}

#[cfg(not(feature = "onnxruntime"))]
fn backend_factory() -> Result<Arc<dyn BackendFactory>> {
  anyhow::bail!("未启用任何推理后端，请使用 --features onnxruntime 构建")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);

  let model = ModelSpec::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let catalog = match &args.labels {
    Some(path) => ClassCatalog::from_json_file(path)?,
    None => ClassCatalog::coco(),
  };

  let config = DetectorConfig::default()
    .with_preprocess(PreprocessConfig::default().with_input_size(args.input_size))
    .with_decode(
      DecodeConfig::default()
        .with_threshold(args.confidence)
        .with_layout(args.layout),
    )
    .with_interval(Duration::from_millis(args.interval_ms))
    .with_cooldown(Duration::from_millis(args.cooldown_ms))
    .with_voice(
      VoiceConfig::default()
        .with_language(args.language.clone())
        .with_rate(args.rate)
        .with_pitch(args.pitch),
    );

  let speaker: Arc<dyn Speaker> = match &args.speech_command {
    Some(program) => Arc::new(CommandSpeaker::new(program.clone())),
    None => Arc::new(LogSpeaker),
  };

  let mut builder = CameraDetector::builder(backend_factory()?, model, Box::new(input))
    .with_catalog(catalog)
    .with_config(config)
    .with_speaker(speaker)
    .with_facing(args.facing);
  if let Some(path) = &args.preferences {
    builder = builder.with_preference(ThemePreference::new(path));
  }
  let mut detector = builder.build();

  if args.toggle_dark_mode {
    detector.toggle_dark_mode();
  }
  info!("深色模式: {}", detector.context().dark_mode);

  if !detector.load_model().await {
    warn!("模型未加载，退出");
    return Ok(());
  }

  detector.start_camera()?;

  let shutdown = Arc::new(Notify::new());
  let signal = Arc::clone(&shutdown);
  ctrlc::set_handler(move || signal.notify_one())?;

  let mut status = detector.subscribe();
  loop {
    tokio::select! {
      _ = shutdown.notified() => break,
      changed = status.changed() => {
        if changed.is_err() {
          break;
        }
        let current = status.borrow_and_update().clone();
        if !current.is_empty() {
          info!("当前: {}", current);
        }
      }
    }
  }

  info!("收到退出信号，停止检测");
  detector.stop_camera();
  Ok(())
}
