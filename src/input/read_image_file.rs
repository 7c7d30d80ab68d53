// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbaImage, imageops::FilterType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbaFrame,
  input::{CaptureError, FacingMode, FrameSource, InputError},
};

/// 把一张静态图片当作始终就绪的帧源，便于离线调试
pub struct ImageFileInput {
  path: PathBuf,
  image: Option<RgbaImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url.path();
    if path.is_empty() || path == "/" {
      return Err(InputError::InvalidPath(url.to_string()));
    }

    Ok(ImageFileInput {
      path: PathBuf::from(path),
      image: None,
    })
  }
}

impl ImageFileInput {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self {
      path: path.into(),
      image: None,
    }
  }
}

impl FrameSource for ImageFileInput {
  fn open(&mut self, facing: FacingMode) -> Result<(), CaptureError> {
    debug!("图像文件输入忽略摄像头朝向 {}", facing);
    let image = ImageReader::open(&self.path)?
      .decode()
      .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    info!(
      "已打开图像 {}: {}x{}",
      self.path.display(),
      image.width(),
      image.height()
    );
    self.image = Some(image.to_rgba8());
    Ok(())
  }

  fn close(&mut self) {
    self.image = None;
  }

  fn is_frame_ready(&self) -> bool {
    self.image.is_some()
  }

  fn draw_current_frame_into(&mut self, target_size: u32) -> Result<RgbaFrame, CaptureError> {
    let image = self.image.as_ref().ok_or(CaptureError::NotOpened)?;
    let resized = image::imageops::resize(image, target_size, target_size, FilterType::Triangle);
    Ok(RgbaFrame::from(resized))
  }
}
