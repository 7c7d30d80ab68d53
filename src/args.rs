// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use kanjian::{input::FacingMode, model::OutputLayout};

/// Kanjian 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 onnx:///models/yolov8n.onnx?providers=cuda,cpu
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源，例如 image:///tmp/dog.png 或 v4l:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 模型输入边长
  #[arg(long, value_name = "SIZE", default_value_t = 640)]
  pub input_size: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = 0.3)]
  pub confidence: f32,

  /// 输出排布: auto, boxes-first, attributes-first
  #[arg(long, value_name = "LAYOUT", default_value = "auto")]
  pub layout: OutputLayout,

  /// 类别标签 JSON 文件，缺省使用 COCO 80 类
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 播报语言
  #[arg(long, value_name = "LANG", default_value = "en-US")]
  pub language: String,

  #[arg(long, value_name = "RATE", default_value_t = 1.0)]
  pub rate: f32,

  #[arg(long, value_name = "PITCH", default_value_t = 1.0)]
  pub pitch: f32,

  /// 语音合成程序（兼容 espeak-ng 参数），缺省只写日志
  #[arg(long, value_name = "PROGRAM")]
  pub speech_command: Option<String>,

  /// 检测周期（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 2000)]
  pub interval_ms: u64,

  /// 同一标签的播报冷却时间（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 3000)]
  pub cooldown_ms: u64,

  /// 摄像头朝向: user, environment
  #[arg(long, value_name = "FACING", default_value = "environment")]
  pub facing: FacingMode,

  /// 主题偏好文件
  #[arg(long, value_name = "FILE")]
  pub preferences: Option<PathBuf>,

  /// 启动时切换深色模式并保存
  #[arg(long)]
  pub toggle_dark_mode: bool,
}
