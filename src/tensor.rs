// 该文件是 Kanjian （看见） 项目的一部分。
// src/tensor.rs - 张量定义与预处理
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

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::frame::{RGBA_CHANNELS, RgbaFrame};

const RGB_CHANNELS: usize = 3;
const NORMALIZE_DIVISOR: f32 = 255.0;

pub const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Error, Debug)]
#[error("张量形状 {dims:?} 需要 {expected} 个元素, 实际为 {actual}")]
pub struct TensorShapeError {
  pub dims: Vec<usize>,
  pub expected: usize,
  pub actual: usize,
}

/// 与推理会话交换的 f32 张量，数据按行优先展开
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  dims: Vec<usize>,
  data: Box<[f32]>,
}

/// 以张量名索引的张量集合
pub type TensorMap = HashMap<String, Tensor>;

impl Tensor {
  pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorShapeError> {
    let expected = dims.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorShapeError {
        dims,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      dims,
      data: data.into_boxed_slice(),
    })
  }

  pub fn dims(&self) -> &[usize] {
    &self.dims
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_parts(self) -> (Vec<usize>, Box<[f32]>) {
    (self.dims, self.data)
  }
}

/// 预处理参数：目标边长需与模型输入一致
///
/// 通道顺序固定为 R、G、B，按 255.0 归一化，平面排布（先全部 R，再 G，再 B）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
  pub input_size: u32,
}

impl Default for PreprocessConfig {
  fn default() -> Self {
    Self {
      input_size: DEFAULT_INPUT_SIZE,
    }
  }
}

impl PreprocessConfig {
  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn input_dims(&self) -> [usize; 4] {
    let size = self.input_size as usize;
    [1, RGB_CHANNELS, size, size]
  }
}

/// 将 RGBA 像素缓冲编码为 `[1, 3, S, S]` 的 NCHW 张量
///
/// 只写入落在目标正方形内的像素，超出部分直接丢弃而不缩放；
/// 缩放由上游绘制到固定正方形时完成。目标区域内没有源像素的位置保持 0。
pub fn encode(frame: &RgbaFrame, target_size: u32) -> Tensor {
  let size = target_size as usize;
  let plane = size * size;
  let src_width = frame.width() as usize;
  let mut data = vec![0f32; RGB_CHANNELS * plane];

  if src_width > 0 {
    for (index, pixel) in frame.pixels().chunks_exact(RGBA_CHANNELS).enumerate() {
      let y = index / src_width;
      let x = index % src_width;
      if y >= size {
        break;
      }
      if x >= size {
        continue;
      }

      let target = y * size + x;
      data[target] = pixel[0] as f32 / NORMALIZE_DIVISOR;
      data[plane + target] = pixel[1] as f32 / NORMALIZE_DIVISOR;
      data[2 * plane + target] = pixel[2] as f32 / NORMALIZE_DIVISOR;
    }
  }

  debug!("图像预处理完成，张量形状: [1, 3, {}, {}]", size, size);

  Tensor {
    dims: vec![1, RGB_CHANNELS, size, size],
    data: data.into_boxed_slice(),
  }
}
