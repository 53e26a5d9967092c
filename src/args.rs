// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/args.rs - 命令行公共参数
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
use std::sync::Arc;

use clap::Args;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
  FromUrl,
  frame::ChannelOrder,
  model::{ClassCatalog, CoordinateConvention, OnnxModel, OnnxModelBuilder},
  output::draw::{DEFAULT_JPEG_QUALITY, Draw},
  pipeline::{Detector, InferenceParams, PipelineConfig},
  preprocess::DEFAULT_PAD_COLOR,
};

/// 检测器参数，各二进制通过 `#[command(flatten)]` 共用
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// ONNX 模型路径，例如 onnx:///models/best.onnx?threads=4
  #[arg(long, value_name = "MODEL", env = "AEROTOOL_MODEL")]
  pub model: Url,

  /// 类别文件（.json 数组或逐行文本）；缺省时使用模型元数据或内置工具类别
  #[arg(long, value_name = "FILE", env = "AEROTOOL_CLASSES")]
  pub classes: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0]
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD", env = "AEROTOOL_CONFIDENCE")]
  pub confidence: f32,

  /// NMS IoU 阈值 (0.0 - 1.0]
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD", env = "AEROTOOL_IOU")]
  pub iou: f32,

  /// 推理输入边长；缺省时使用模型声明值或 640
  #[arg(long, value_name = "PIXELS", env = "AEROTOOL_IMGSZ")]
  pub imgsz: Option<u32>,

  /// 标注字体文件
  #[arg(long, value_name = "FILE", env = "AEROTOOL_FONT")]
  pub font: Option<PathBuf>,

  /// 输出 JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "AEROTOOL_JPEG_QUALITY")]
  pub jpeg_quality: u8,

  /// 模型输入通道顺序: rgb 或 bgr
  #[arg(long, default_value = "rgb", env = "AEROTOOL_CHANNEL_ORDER")]
  pub channel_order: ChannelOrder,

  /// 框坐标约定: auto、pixels 或 normalized
  #[arg(long, default_value = "auto", env = "AEROTOOL_COORDINATES")]
  pub coordinates: CoordinateConvention,

  /// 每张图像最多保留的检测数
  #[arg(long, value_name = "COUNT", env = "AEROTOOL_MAX_DETECTIONS")]
  pub max_detections: Option<usize>,
}

impl DetectorArgs {
  pub fn build_detector(&self) -> anyhow::Result<Detector<OnnxModel>> {
    info!("模型文件路径: {}", self.model);
    let model = OnnxModelBuilder::from_url(&self.model)?.build()?;
    let mut detector = Detector::new(model);

    if let Some(path) = &self.classes {
      detector = detector.with_catalog(Arc::new(ClassCatalog::from_path(path)?));
    }
    info!("类别数: {}", detector.catalog().len());

    let draw = match &self.font {
      Some(path) => Draw::with_font_path(path)?,
      None => Draw::default(),
    };

    let params = InferenceParams {
      confidence: self.confidence,
      iou: self.iou,
      target_size: self.imgsz.unwrap_or(detector.params().target_size),
    };
    params.validate()?;

    let config = PipelineConfig {
      params,
      pad_color: DEFAULT_PAD_COLOR,
      channel_order: self.channel_order,
      convention: self.coordinates,
      max_detections: self.max_detections,
    };

    Ok(
      detector
        .with_draw(draw.jpeg_quality(self.jpeg_quality))
        .with_config(config),
    )
  }
}

/// 日志级别由 RUST_LOG 控制，默认 info
pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}
