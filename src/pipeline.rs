// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/pipeline.rs - 检测流水线编排
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

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::frame::{ChannelOrder, RgbNchwFrame};
use crate::model::{
  ClassCatalog, CoordinateConvention, DecodeError, Decoder, FinalDetection, Model,
};
use crate::output::draw::{Draw, DrawError};
use crate::preprocess::{DEFAULT_PAD_COLOR, DEFAULT_TARGET_SIZE, PreprocessError, letterbox};

/// 单次调用内的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Idle,
  Preprocessing,
  ModelExecuting,
  Decoding,
  PostProcessing,
  Rendering,
  Done,
  Failed,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Idle => "idle",
      Stage::Preprocessing => "preprocessing",
      Stage::ModelExecuting => "model_executing",
      Stage::Decoding => "decoding",
      Stage::PostProcessing => "post_processing",
      Stage::Rendering => "rendering",
      Stage::Done => "done",
      Stage::Failed => "failed",
    };
    f.write_str(name)
  }
}

struct StageTracker {
  stage: Stage,
  started: Instant,
}

impl StageTracker {
  fn new() -> Self {
    StageTracker {
      stage: Stage::Idle,
      started: Instant::now(),
    }
  }

  fn advance(&mut self, next: Stage) {
    debug!(
      "阶段 {} -> {} ({:.2?})",
      self.stage,
      next,
      self.started.elapsed()
    );
    self.stage = next;
  }

  fn elapsed(&self) -> Duration {
    self.started.elapsed()
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("图像解码错误: {0}")]
  ImageDecode(#[from] image::ImageError),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("模型推理错误: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("输出解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("标注渲染错误: {0}")]
  Render(#[from] DrawError),
}

impl PipelineError {
  /// 出错时所处的阶段
  pub fn stage(&self) -> Stage {
    match self {
      PipelineError::InvalidInput(_) => Stage::Idle,
      PipelineError::ImageDecode(_) | PipelineError::Preprocess(_) => Stage::Preprocessing,
      PipelineError::Inference(_) => Stage::ModelExecuting,
      PipelineError::Decode(_) => Stage::Decoding,
      PipelineError::Render(_) => Stage::Rendering,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      PipelineError::InvalidInput(_)
      | PipelineError::ImageDecode(_)
      | PipelineError::Preprocess(_) => "invalid_input",
      PipelineError::Inference(_) => "inference_error",
      PipelineError::Decode(_) => "decode_error",
      PipelineError::Render(_) => "render_error",
    }
  }

  /// 转为不含检测结果的错误报告
  pub fn into_report(self) -> DetectionReport {
    DetectionReport {
      detections: Vec::new(),
      processing_time_seconds: 0.0,
      status: DetectionStatus::Error,
      reason: Some(self.to_string()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
  pub confidence: f32,
  pub iou: f32,
  pub target_size: u32,
}

impl Default for InferenceParams {
  fn default() -> Self {
    InferenceParams {
      confidence: 0.25,
      iou: 0.45,
      target_size: DEFAULT_TARGET_SIZE,
    }
  }
}

impl InferenceParams {
  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn validate(&self) -> Result<(), PipelineError> {
    let in_unit = |v: f32| v > 0.0 && v <= 1.0;
    if !in_unit(self.confidence) {
      return Err(PipelineError::InvalidInput(format!(
        "置信度阈值必须在 (0, 1] 内: {}",
        self.confidence
      )));
    }
    if !in_unit(self.iou) {
      return Err(PipelineError::InvalidInput(format!(
        "IoU 阈值必须在 (0, 1] 内: {}",
        self.iou
      )));
    }
    if self.target_size == 0 {
      return Err(PipelineError::InvalidInput("输入尺寸必须为正".to_string()));
    }
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub params: InferenceParams,
  pub pad_color: [u8; 3],
  pub channel_order: ChannelOrder,
  pub convention: CoordinateConvention,
  pub max_detections: Option<usize>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    PipelineConfig {
      params: InferenceParams::default(),
      pad_color: DEFAULT_PAD_COLOR,
      channel_order: ChannelOrder::default(),
      convention: CoordinateConvention::default(),
      max_detections: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
  Processed,
  NoDetections,
  Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
  pub detections: Vec<FinalDetection>,
  pub processing_time_seconds: f64,
  pub status: DetectionStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

impl DetectionReport {
  fn new(detections: Vec<FinalDetection>, elapsed: Duration) -> Self {
    let status = if detections.is_empty() {
      DetectionStatus::NoDetections
    } else {
      DetectionStatus::Processed
    };
    DetectionReport {
      detections,
      processing_time_seconds: round_seconds(elapsed),
      status,
      reason: None,
    }
  }
}

fn round_seconds(elapsed: Duration) -> f64 {
  (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
pub struct InferenceOutput {
  pub report: DetectionReport,
  pub annotated_image: Vec<u8>,
}

pub struct Detector<M> {
  model: Arc<M>,
  catalog: Arc<ClassCatalog>,
  draw: Draw,
  config: PipelineConfig,
}

impl<M: Model> Detector<M> {
  /// 类别表优先取模型元数据，其次为内置工具类别；输入尺寸取模型声明值
  pub fn new(model: M) -> Self {
    let catalog = match model.class_names().map(ClassCatalog::new) {
      Some(Ok(catalog)) => catalog,
      Some(Err(e)) => {
        warn!("模型类别表不可用，使用内置类别: {}", e);
        ClassCatalog::tools()
      }
      None => ClassCatalog::tools(),
    };

    let mut config = PipelineConfig::default();
    if let Some(size) = model.input_size() {
      config.params.target_size = size;
    }

    Detector {
      model: Arc::new(model),
      catalog: Arc::new(catalog),
      draw: Draw::default(),
      config,
    }
  }

  pub fn from_shared(model: Arc<M>, catalog: Arc<ClassCatalog>) -> Self {
    let mut config = PipelineConfig::default();
    if let Some(size) = model.input_size() {
      config.params.target_size = size;
    }
    Detector {
      model,
      catalog,
      draw: Draw::default(),
      config,
    }
  }

  pub fn with_catalog(mut self, catalog: Arc<ClassCatalog>) -> Self {
    self.catalog = catalog;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_params(mut self, params: InferenceParams) -> Self {
    self.config.params = params;
    self
  }

  pub fn catalog(&self) -> &ClassCatalog {
    &self.catalog
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn params(&self) -> InferenceParams {
    self.config.params
  }

  pub fn detect(&self, bytes: &[u8]) -> Result<InferenceOutput, PipelineError> {
    self.detect_with(bytes, &self.config.params)
  }

  /// 解码图像字节并完成一次检测
  pub fn detect_with(
    &self,
    bytes: &[u8],
    params: &InferenceParams,
  ) -> Result<InferenceOutput, PipelineError> {
    let mut tracker = StageTracker::new();
    self.run(&mut tracker, params, |tracker| {
      tracker.advance(Stage::Preprocessing);
      if bytes.is_empty() {
        return Err(PipelineError::InvalidInput("图像数据为空".to_string()));
      }
      Ok(image::load_from_memory(bytes)?.to_rgb8())
    })
  }

  pub fn detect_image(
    &self,
    image: &RgbImage,
    params: &InferenceParams,
  ) -> Result<InferenceOutput, PipelineError> {
    let mut tracker = StageTracker::new();
    self.run(&mut tracker, params, |_| Ok(image.clone()))
  }

  /// 失败时返回结构化的错误报告而不是错误
  pub fn detect_or_report(
    &self,
    bytes: &[u8],
    params: &InferenceParams,
  ) -> (DetectionReport, Option<Vec<u8>>) {
    let started = Instant::now();
    match self.detect_with(bytes, params) {
      Ok(output) => (output.report, Some(output.annotated_image)),
      Err(e) => {
        let mut report = e.into_report();
        report.processing_time_seconds = round_seconds(started.elapsed());
        (report, None)
      }
    }
  }

  fn run<F>(
    &self,
    tracker: &mut StageTracker,
    params: &InferenceParams,
    load: F,
  ) -> Result<InferenceOutput, PipelineError>
  where
    F: FnOnce(&mut StageTracker) -> Result<RgbImage, PipelineError>,
  {
    let result = params
      .validate()
      .and_then(|_| load(tracker))
      .and_then(|image| self.run_stages(tracker, params, &image));

    match result {
      Ok(output) => {
        tracker.advance(Stage::Done);
        info!(
          "检测完成: {} 个目标, 耗时 {:.2}s",
          output.report.detections.len(),
          output.report.processing_time_seconds
        );
        Ok(output)
      }
      Err(e) => {
        tracker.advance(Stage::Failed);
        error!("检测失败 (阶段 {}): {}", e.stage(), e);
        Err(e)
      }
    }
  }

  fn run_stages(
    &self,
    tracker: &mut StageTracker,
    params: &InferenceParams,
    image: &RgbImage,
  ) -> Result<InferenceOutput, PipelineError> {
    if tracker.stage != Stage::Preprocessing {
      tracker.advance(Stage::Preprocessing);
    }
    if let Some(size) = self.model.input_size()
      && size != params.target_size
    {
      warn!(
        "输入尺寸 {} 与模型声明的 {} 不一致",
        params.target_size, size
      );
    }
    let boxed = letterbox(image, params.target_size, self.config.pad_color)?;
    debug!(
      "letterbox: 缩放 {:.4}, 填充 ({}, {})",
      boxed.scale, boxed.pad_x, boxed.pad_y
    );
    let frame = RgbNchwFrame::from_image(&boxed.padded_image, self.config.channel_order);

    tracker.advance(Stage::ModelExecuting);
    let raw = self
      .model
      .infer(&frame)
      .map_err(|e| PipelineError::Inference(Box::new(e)))?;
    debug!("模型输出形状: {:?}", raw.shape());

    tracker.advance(Stage::Decoding);
    let candidates = Decoder::new(params.confidence, params.iou, boxed.target_size())
      .with_convention(self.config.convention)
      .with_max_detections(self.config.max_detections)
      .decode(&raw)?;

    tracker.advance(Stage::PostProcessing);
    let detections: Vec<FinalDetection> = candidates
      .iter()
      .map(|candidate| FinalDetection {
        class_label: self.catalog.label(candidate.class_id).into_owned(),
        confidence: candidate.score,
        bbox: boxed.inverse_box(&candidate.bbox),
      })
      .collect();

    tracker.advance(Stage::Rendering);
    let annotated_image = self.draw.render(image, &detections)?;

    Ok(InferenceOutput {
      report: DetectionReport::new(detections, tracker.elapsed()),
      annotated_image,
    })
  }
}

/// 进程内共享、首次使用时才初始化的检测器
pub struct SharedDetector<M> {
  cell: OnceCell<Detector<M>>,
}

impl<M> Default for SharedDetector<M> {
  fn default() -> Self {
    SharedDetector::new()
  }
}

impl<M> SharedDetector<M> {
  pub const fn new() -> Self {
    SharedDetector {
      cell: OnceCell::new(),
    }
  }

  pub fn get(&self) -> Option<&Detector<M>> {
    self.cell.get()
  }

  /// 并发首次调用时只有一个初始化函数会执行
  pub fn get_or_try_init<F, E>(&self, init: F) -> Result<&Detector<M>, E>
  where
    F: FnOnce() -> Result<Detector<M>, E>,
  {
    self.cell.get_or_try_init(|| {
      info!("初始化共享检测器");
      init()
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn params_validation() {
    assert!(InferenceParams::default().validate().is_ok());

    let bad = [
      InferenceParams::default().with_confidence(0.0),
      InferenceParams::default().with_confidence(1.5),
      InferenceParams::default().with_confidence(f32::NAN),
      InferenceParams {
        iou: 0.0,
        ..Default::default()
      },
      InferenceParams {
        target_size: 0,
        ..Default::default()
      },
    ];
    for params in bad {
      let err = params.validate().unwrap_err();
      assert!(matches!(err, PipelineError::InvalidInput(_)));
      assert_eq!(err.stage(), Stage::Idle);
    }
  }

  #[test]
  fn error_report_has_no_detections() {
    let report = PipelineError::InvalidInput("empty".to_string()).into_report();
    assert_eq!(report.status, DetectionStatus::Error);
    assert!(report.detections.is_empty());
    assert!(report.reason.unwrap().contains("empty"));
  }

  #[test]
  fn report_serialization() {
    let report = DetectionReport::new(
      vec![FinalDetection {
        class_label: "4_brace".to_string(),
        confidence: 0.5,
        bbox: [1, 2, 3, 4],
      }],
      Duration::from_millis(1234),
    );
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "processed");
    assert_eq!(json["processing_time_seconds"], 1.23);
    assert_eq!(json["detections"][0]["class"], "4_brace");
    assert_eq!(json["detections"][0]["bbox"], serde_json::json!([1, 2, 3, 4]));
    assert!(json.get("reason").is_none());
  }

  #[test]
  fn empty_report_status() {
    let report = DetectionReport::new(Vec::new(), Duration::ZERO);
    assert_eq!(report.status, DetectionStatus::NoDetections);
  }
}
