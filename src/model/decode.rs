// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/model/decode.rs - 检测头输出解码
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

use std::collections::BTreeMap;
use std::str::FromStr;

use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2};
use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::center_to_corner_one;
use crate::model::CandidateDetection;
use crate::model::nms::suppress;

/// 置信度保留到三位小数后再与阈值比较，阈值放宽同样的量
pub const CONFIDENCE_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("不支持的输出张量形状: {0:?}")]
  UnsupportedShape(Vec<usize>),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

/// 二维输出矩阵的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  /// (4 + 类别数, 框数)，YOLOv8 默认导出
  AttributesFirst,
  /// (框数, 4 + 类别数)
  BoxesFirst,
}

impl TensorLayout {
  /// 两维中较大的一维是框数；两维相等时无法判断，按 `AttributesFirst` 处理
  pub fn detect(rows: usize, cols: usize) -> Self {
    match rows.cmp(&cols) {
      std::cmp::Ordering::Less => TensorLayout::AttributesFirst,
      std::cmp::Ordering::Greater => TensorLayout::BoxesFirst,
      std::cmp::Ordering::Equal => {
        warn!(
          "输出张量两维相等 ({}x{})，无法判断排布，按属性优先处理",
          rows, cols
        );
        TensorLayout::AttributesFirst
      }
    }
  }
}

/// 将 (a, b) 或 (1, a, b) 的输出整理为 (框数, 4 + 类别数)
pub fn normalize_layout(raw: &ArrayD<f32>) -> Result<Array2<f32>, DecodeError> {
  let shape = raw.shape().to_vec();
  let matrix: ArrayView2<f32> = match shape.as_slice() {
    [_, _] => raw.view().into_dimensionality::<Ix2>()?,
    [1, _, _] => raw.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?,
    _ => return Err(DecodeError::UnsupportedShape(shape)),
  };

  let (rows, cols) = matrix.dim();
  let normalized = match TensorLayout::detect(rows, cols) {
    TensorLayout::AttributesFirst => matrix.t().to_owned(),
    TensorLayout::BoxesFirst => matrix.to_owned(),
  };

  if normalized.ncols() < 5 {
    return Err(DecodeError::UnsupportedShape(shape));
  }
  Ok(normalized)
}

/// 框坐标的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinateConvention {
  /// 保留框的最大角点坐标不超过 1 时视为归一化坐标
  #[default]
  Auto,
  Pixels,
  Normalized,
}

impl CoordinateConvention {
  fn is_normalized(&self, boxes: &[[f32; 4]]) -> bool {
    match self {
      CoordinateConvention::Pixels => false,
      CoordinateConvention::Normalized => true,
      CoordinateConvention::Auto => boxes
        .iter()
        .flat_map(|b| b.iter())
        .all(|v| v.abs() <= 1.0),
    }
  }
}

impl FromStr for CoordinateConvention {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(CoordinateConvention::Auto),
      "pixels" | "pixel" => Ok(CoordinateConvention::Pixels),
      "normalized" => Ok(CoordinateConvention::Normalized),
      other => Err(format!("未知的坐标约定: {}", other)),
    }
  }
}

fn round_confidence(value: f32) -> f32 {
  (value * 1000.0).round() / 1000.0
}

/// 返回第一个最大值的下标与值；全为 NaN 时分数为负无穷
fn argmax<'a>(scores: impl Iterator<Item = &'a f32>) -> (usize, f32) {
  let mut best = (0, f32::NEG_INFINITY);
  for (index, &score) in scores.enumerate() {
    if score > best.1 {
      best = (index, score);
    }
  }
  best
}

#[derive(Debug, Clone)]
pub struct Decoder {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub canvas_size: u32,
  pub convention: CoordinateConvention,
  pub max_detections: Option<usize>,
}

impl Decoder {
  pub fn new(confidence_threshold: f32, iou_threshold: f32, canvas_size: u32) -> Self {
    Decoder {
      confidence_threshold,
      iou_threshold,
      canvas_size,
      convention: CoordinateConvention::default(),
      max_detections: None,
    }
  }

  pub fn with_convention(mut self, convention: CoordinateConvention) -> Self {
    self.convention = convention;
    self
  }

  pub fn with_max_detections(mut self, max_detections: Option<usize>) -> Self {
    self.max_detections = max_detections;
    self
  }

  /// 解码为推理画布坐标下的候选框，类别按编号升序，类内按分数降序
  pub fn decode(&self, raw: &ArrayD<f32>) -> Result<Vec<CandidateDetection>, DecodeError> {
    if raw.is_empty() {
      debug!("输出张量为空: {:?}", raw.shape());
      return Ok(Vec::new());
    }

    let rows = normalize_layout(raw)?;
    let threshold = self.confidence_threshold - CONFIDENCE_TOLERANCE;

    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut classes = Vec::new();
    for row in rows.rows() {
      let (class_id, best) = argmax(row.iter().skip(4));
      let confidence = round_confidence(best);
      if !(confidence >= threshold) {
        continue;
      }
      boxes.push([row[0], row[1], row[2], row[3]]);
      scores.push(confidence);
      classes.push(class_id);
    }
    debug!("{} 个框中有 {} 个超过阈值", rows.nrows(), boxes.len());

    if boxes.is_empty() {
      return Ok(Vec::new());
    }

    // 按角点坐标判断是否归一化，超出画面的归一化框视为像素坐标
    let mut corners: Vec<[f32; 4]> = boxes.into_iter().map(center_to_corner_one).collect();
    if self.convention.is_normalized(&corners) {
      let canvas = self.canvas_size as f32;
      debug!("按归一化坐标处理，缩放到 {}", canvas);
      for bbox in corners.iter_mut() {
        bbox.iter_mut().for_each(|v| *v *= canvas);
      }
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, &class_id) in classes.iter().enumerate() {
      by_class.entry(class_id).or_default().push(index);
    }

    let mut candidates = Vec::new();
    for (class_id, members) in by_class {
      let class_boxes: Vec<[f32; 4]> = members.iter().map(|&i| corners[i]).collect();
      let class_scores: Vec<f32> = members.iter().map(|&i| scores[i]).collect();
      for kept in suppress(&class_boxes, &class_scores, self.iou_threshold) {
        let index = members[kept];
        candidates.push(CandidateDetection {
          bbox: corners[index],
          score: scores[index],
          class_id,
        });
      }
    }

    if let Some(limit) = self.max_detections {
      if candidates.len() > limit {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(limit);
      }
    }

    Ok(candidates)
  }
}

pub fn decode(
  raw: &ArrayD<f32>,
  confidence_threshold: f32,
  iou_threshold: f32,
  canvas_size: u32,
) -> Result<Vec<CandidateDetection>, DecodeError> {
  Decoder::new(confidence_threshold, iou_threshold, canvas_size).decode(raw)
}
