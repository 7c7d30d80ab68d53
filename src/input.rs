// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 帧源
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

use std::{fmt, io, str::FromStr};

use thiserror::Error;

use crate::{FromUrl, frame::RgbaFrame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::V4lInput;

/// 摄像头朝向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
  User,
  #[default]
  Environment,
}

impl FacingMode {
  pub fn flipped(self) -> Self {
    match self {
      FacingMode::User => FacingMode::Environment,
      FacingMode::Environment => FacingMode::User,
    }
  }
}

impl fmt::Display for FacingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FacingMode::User => f.write_str("user"),
      FacingMode::Environment => f.write_str("environment"),
    }
  }
}

impl FromStr for FacingMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "user" | "front" => Ok(FacingMode::User),
      "environment" | "back" => Ok(FacingMode::Environment),
      other => Err(format!("未知的摄像头朝向 '{}'，可选: user, environment", other)),
    }
  }
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("没有访问摄像头的权限")]
  PermissionDenied,
  #[error("摄像头不可用: {0}")]
  Unavailable(String),
  #[error("帧源尚未打开")]
  NotOpened,
}

impl CaptureError {
  /// 面向用户的提示信息
  pub fn user_message(&self) -> &'static str {
    match self {
      CaptureError::PermissionDenied => "无法访问摄像头，请检查权限设置。",
      CaptureError::Unavailable(_) | CaptureError::NotOpened => "无法打开摄像头，请检查设备连接。",
    }
  }
}

impl From<io::Error> for CaptureError {
  fn from(err: io::Error) -> Self {
    match err.kind() {
      io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
      _ => CaptureError::Unavailable(err.to_string()),
    }
  }
}

/// 实时帧源：检测循环只关心“是否有新帧”和“把当前帧绘制到固定尺寸的正方形缓冲”
pub trait FrameSource: Send {
  fn open(&mut self, facing: FacingMode) -> Result<(), CaptureError>;
  fn close(&mut self);
  fn is_frame_ready(&self) -> bool;
  fn draw_current_frame_into(&mut self, target_size: u32) -> Result<RgbaFrame, CaptureError>;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无效的设备路径: {0}")]
  InvalidPath(String),
}

/// 按 URL 方案选择帧源
pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        return Ok(InputWrapper::V4l(V4lInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  #[allow(unused_variables)]
  fn open(&mut self, facing: FacingMode) -> Result<(), CaptureError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.open(facing),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.open(facing),
    }
  }

  fn close(&mut self) {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.close(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.close(),
    }
  }

  fn is_frame_ready(&self) -> bool {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_frame_ready(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.is_frame_ready(),
    }
  }

  #[allow(unused_variables)]
  fn draw_current_frame_into(&mut self, target_size: u32) -> Result<RgbaFrame, CaptureError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.draw_current_frame_into(target_size),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.draw_current_frame_into(target_size),
    }
  }
}
