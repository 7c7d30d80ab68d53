// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 检测结果定义与模型输出解码
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

use std::{fs::File, io::BufReader, path::Path, str::FromStr};

use thiserror::Error;
use tracing::{debug, warn};

mod coco;
pub use self::coco::COCO_CLASSES;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;

const BBOX_ATTRS: usize = 4;
const OBJECTNESS_INDEX: usize = 4;

/// 模型输入坐标系下的边界框 (x, y, w, h)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
}

/// 一个检测结果，仅由解码步骤产生
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub label: String,
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl Detection {
  /// 界面显示文本，例如 `dog (90%)`
  pub fn display_text(&self) -> String {
    format!("{} ({}%)", self.label, (self.confidence * 100.0).round() as i64)
  }
}

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("类别文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("类别列表为空")]
  Empty,
}

/// 类别编号到可读名称的映射
#[derive(Debug, Clone)]
pub struct ClassCatalog {
  labels: Box<[String]>,
}

impl Default for ClassCatalog {
  fn default() -> Self {
    Self::coco()
  }
}

impl ClassCatalog {
  pub fn new<I, S>(labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      labels: labels.into_iter().map(Into::into).collect(),
    }
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES)
  }

  /// 从 JSON 字符串数组文件读取类别列表
  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let labels: Vec<String> = serde_json::from_reader(reader)?;
    if labels.is_empty() {
      return Err(CatalogError::Empty);
    }
    debug!("从 {} 读取 {} 个类别", path.as_ref().display(), labels.len());
    Ok(Self::new(labels))
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 越界的类别编号不会被丢弃，而是合成 `object <id>` 名称
  pub fn label_for(&self, class_id: usize) -> String {
    match self.labels.get(class_id) {
      Some(label) => label.clone(),
      None => {
        warn!("类别编号 {} 超出类别列表范围 ({})", class_id, self.labels.len());
        format!("object {}", class_id)
      }
    }
  }
}

/// 输出张量的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
  /// 按张量形状和类别数量自动判断
  #[default]
  Auto,
  /// `[1, numBoxes, numAttrs]`，属性 4 为目标置信度，5 之后为各类别分数
  BoxesFirst,
  /// `[1, numAttrs, numBoxes]`，`numAttrs = 4 + numClasses`，没有单独的目标置信度
  AttributesFirst,
}

impl FromStr for OutputLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(OutputLayout::Auto),
      "boxes-first" | "a" => Ok(OutputLayout::BoxesFirst),
      "attributes-first" | "b" => Ok(OutputLayout::AttributesFirst),
      other => Err(format!(
        "未知的输出排布 '{}'，可选: auto, boxes-first, attributes-first",
        other
      )),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeConfig {
  pub threshold: f32,
  pub layout: OutputLayout,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      layout: OutputLayout::Auto,
    }
  }
}

impl DecodeConfig {
  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_layout(mut self, layout: OutputLayout) -> Self {
    self.layout = layout;
    self
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
  #[error("无法识别的输出排布 {dims:?}: {reason}")]
  UnrecognizedOutputLayout { dims: Vec<usize>, reason: String },
  #[error("模型没有输出 '{0}'")]
  MissingOutput(String),
}

impl DecodeError {
  fn layout(dims: &[usize], reason: impl Into<String>) -> Self {
    DecodeError::UnrecognizedOutputLayout {
      dims: dims.to_vec(),
      reason: reason.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResolvedLayout {
  layout: OutputLayout,
  num_boxes: usize,
  num_attrs: usize,
}

fn resolve_layout(
  dims: &[usize],
  data_len: usize,
  num_classes: usize,
  layout: OutputLayout,
) -> Result<ResolvedLayout, DecodeError> {
  let &[batch, d1, d2] = dims else {
    return Err(DecodeError::layout(dims, "期望三维输出张量"));
  };
  if batch != 1 {
    return Err(DecodeError::layout(dims, "批大小必须为 1"));
  }
  if d1 * d2 != data_len {
    return Err(DecodeError::layout(
      dims,
      format!("数据长度 {} 与形状不符", data_len),
    ));
  }

  let layout = match layout {
    OutputLayout::Auto => {
      if d2 == num_classes + BBOX_ATTRS + 1 {
        OutputLayout::BoxesFirst
      } else if d1 == num_classes + BBOX_ATTRS {
        OutputLayout::AttributesFirst
      } else if d1 < d2 {
        OutputLayout::AttributesFirst
      } else {
        OutputLayout::BoxesFirst
      }
    }
    explicit => explicit,
  };

  let resolved = match layout {
    OutputLayout::AttributesFirst => ResolvedLayout {
      layout,
      num_attrs: d1,
      num_boxes: d2,
    },
    _ => ResolvedLayout {
      layout: OutputLayout::BoxesFirst,
      num_boxes: d1,
      num_attrs: d2,
    },
  };

  let min_attrs = match resolved.layout {
    OutputLayout::AttributesFirst => BBOX_ATTRS + 1,
    _ => BBOX_ATTRS + 2,
  };
  if resolved.num_attrs < min_attrs {
    return Err(DecodeError::layout(
      dims,
      format!("每个候选框至少需要 {} 个属性", min_attrs),
    ));
  }

  Ok(resolved)
}

/// 返回最大分数及其下标，相同分数取最先出现者
fn argmax(scores: &[f32]) -> (usize, f32) {
  let mut best = (0usize, f32::NEG_INFINITY);
  for (index, &score) in scores.iter().enumerate() {
    if score > best.1 {
      best = (index, score);
    }
  }
  best
}

/// 将模型原始输出解码为检测结果列表
///
/// 保留 `finalConfidence > threshold` 的候选框。不做非极大值抑制，
/// 同一物体的重叠框会全部返回。
pub fn decode(
  output: &[f32],
  dims: &[usize],
  catalog: &ClassCatalog,
  config: &DecodeConfig,
) -> Result<Vec<Detection>, DecodeError> {
  let resolved = resolve_layout(dims, output.len(), catalog.len(), config.layout)?;
  debug!(
    "解码输出 {:?}: 排布 {:?}, {} 个候选框, 每框 {} 个属性",
    dims, resolved.layout, resolved.num_boxes, resolved.num_attrs
  );

  let num_attrs = resolved.num_attrs;
  let mut detections = Vec::new();

  // 两种排布都按每框 num_attrs 的步长读取候选框记录
  for record in output.chunks_exact(num_attrs).take(resolved.num_boxes) {
    let (class_id, confidence) = match resolved.layout {
      OutputLayout::AttributesFirst => {
        let num_classes = num_attrs - BBOX_ATTRS;
        let scores = &record[BBOX_ATTRS..BBOX_ATTRS + num_classes];
        let (class_id, max_score) = argmax(scores);
        (class_id, record[OBJECTNESS_INDEX] * max_score)
      }
      _ => {
        let objectness = record[OBJECTNESS_INDEX];
        let (class_id, max_score) = argmax(&record[OBJECTNESS_INDEX + 1..]);
        (class_id, objectness * max_score)
      }
    };

    if !(confidence > config.threshold) {
      continue;
    }

    detections.push(Detection {
      label: catalog.label_for(class_id),
      class_id,
      confidence,
      bbox: BoundingBox {
        x: record[0],
        y: record[1],
        w: record[2],
        h: record[3],
      },
    });
  }

  debug!("检测到 {} 个物体", detections.len());
  Ok(detections)
}

/// 选出置信度最高的检测结果，相同置信度取解码顺序中最先出现者
pub fn select_best(detections: &[Detection]) -> Option<&Detection> {
  let mut best: Option<&Detection> = None;
  for detection in detections {
    match best {
      Some(current) if !(detection.confidence > current.confidence) => {}
      _ => best = Some(detection),
    }
  }
  best
}
