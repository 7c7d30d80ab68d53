// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use image::{DynamicImage, RgbImage, imageops::FilterType};
use tracing::{debug, error, info};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbaFrame,
  input::{CaptureError, FacingMode, FrameSource, InputError},
};

const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_BUFFER_COUNT: u32 = 4;
const RGB24_FOURCC: &[u8; 4] = b"RGB3";

pub struct V4lInput {
  device_path: String,
  device: Option<Device>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = InputError;

  /// `v4l:///dev/video0`，路径为空时使用 `/dev/video0`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    let device_path = match url.path() {
      "" | "/" => V4L_DEFAULT_DEVICE.to_string(),
      path if path.starts_with("/dev/") => path.to_string(),
      path => return Err(InputError::InvalidPath(path.to_string())),
    };

    Ok(V4lInput {
      device_path,
      device: None,
      width: 0,
      height: 0,
    })
  }
}

impl FrameSource for V4lInput {
  fn open(&mut self, facing: FacingMode) -> Result<(), CaptureError> {
    // V4L 设备由路径决定，朝向仅记录
    debug!("V4L 输入忽略摄像头朝向 {}", facing);
    let device = Device::with_path(&self.device_path)?;

    let mut format = device.format()?;
    format.fourcc = FourCC::new(RGB24_FOURCC);
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(RGB24_FOURCC) {
      return Err(CaptureError::Unavailable(format!(
        "设备 {} 不支持 RGB24 输出 (当前 {})",
        self.device_path, format.fourcc
      )));
    }

    info!(
      "已打开摄像头 {}: {}x{}",
      self.device_path, format.width, format.height
    );
    self.width = format.width;
    self.height = format.height;
    self.device = Some(device);
    Ok(())
  }

  fn close(&mut self) {
    if self.device.take().is_some() {
      info!("已关闭摄像头 {}", self.device_path);
    }
  }

  fn is_frame_ready(&self) -> bool {
    self.device.is_some()
  }

  fn draw_current_frame_into(&mut self, target_size: u32) -> Result<RgbaFrame, CaptureError> {
    let (width, height) = (self.width, self.height);
    let device = self.device.as_mut().ok_or(CaptureError::NotOpened)?;

    let mut stream = Stream::with_buffers(device, Type::VideoCapture, V4L_BUFFER_COUNT)?;
    let (buf, _meta) = stream.next()?;

    let expected = 3 * width as usize * height as usize;
    if buf.len() < expected {
      return Err(CaptureError::Unavailable(format!(
        "采集到的缓冲区大小 {} 小于 {}",
        buf.len(),
        expected
      )));
    }

    let rgb = RgbImage::from_raw(width, height, buf[..expected].to_vec())
      .ok_or_else(|| CaptureError::Unavailable("无法构造 RGB 图像".to_string()))?;
    let rgba = DynamicImage::ImageRgb8(rgb).to_rgba8();
    let resized = image::imageops::resize(&rgba, target_size, target_size, FilterType::Triangle);
    Ok(RgbaFrame::from(resized))
  }
}
