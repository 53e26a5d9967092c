// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::FinalDetection;

const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const LABEL_PADDING: i32 = 2;
const MIN_LINE_WIDTH: u32 = 2;
const MIN_FONT_SIZE: f32 = 12.0;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

// 常见发行版的字体位置
const FONT_CANDIDATES: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件错误: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  FontInvalid(PathBuf),
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
}

pub struct Draw {
  font: Option<FontVec>,
  font_size: Option<f32>,
  line_width: Option<u32>,
  box_color: [u8; 3],
  jpeg_quality: u8,
}

impl Default for Draw {
  fn default() -> Self {
    let font = FONT_CANDIDATES
      .iter()
      .find_map(|path| load_font(Path::new(path)).ok());
    if font.is_none() {
      warn!("未找到可用字体，标注时只绘制边框");
    }
    Draw {
      font,
      font_size: None,
      line_width: None,
      box_color: BOX_COLOR,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }
}

fn load_font(path: &Path) -> Result<FontVec, DrawError> {
  let data = std::fs::read(path)?;
  let font = FontVec::try_from_vec(data).map_err(|_| DrawError::FontInvalid(path.to_path_buf()))?;
  debug!("加载字体: {}", path.display());
  Ok(font)
}

impl Draw {
  pub fn with_font_path<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let font = load_font(path.as_ref())?;
    Ok(Draw {
      font: Some(font),
      ..Draw::without_font()
    })
  }

  /// 不加载字体，只绘制边框
  pub fn without_font() -> Self {
    Draw {
      font: None,
      font_size: None,
      line_width: None,
      box_color: BOX_COLOR,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn font_size(mut self, size: f32) -> Self {
    self.font_size = Some(size);
    self
  }

  pub fn line_width(mut self, width: u32) -> Self {
    self.line_width = Some(width.max(1));
    self
  }

  pub fn box_color(mut self, color: [u8; 3]) -> Self {
    self.box_color = color;
    self
  }

  pub fn jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality.clamp(1, 100);
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn line_width_for(&self, image: &RgbImage) -> u32 {
    self
      .line_width
      .unwrap_or_else(|| (image.width().min(image.height()) / 200).max(MIN_LINE_WIDTH))
  }

  fn font_size_for(&self, image: &RgbImage) -> f32 {
    self
      .font_size
      .unwrap_or_else(|| (image.width().min(image.height()) as f32 / 30.0).max(MIN_FONT_SIZE))
  }

  /// 在图像副本上绘制检测框与标签
  pub fn draw_detections(&self, image: &RgbImage, detections: &[FinalDetection]) -> RgbImage {
    let mut canvas = image.clone();
    let line_width = self.line_width_for(&canvas);
    let font_size = self.font_size_for(&canvas);
    for detection in detections {
      self.draw_bbox_with_label(&mut canvas, detection, line_width, font_size);
    }
    canvas
  }

  /// 绘制并编码为 JPEG
  pub fn render(&self, image: &RgbImage, detections: &[FinalDetection]) -> Result<Vec<u8>, DrawError> {
    let annotated = self.draw_detections(image, detections);
    encode_jpeg(&annotated, self.jpeg_quality)
  }

  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    detection: &FinalDetection,
    line_width: u32,
    font_size: f32,
  ) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [x_min, y_min, x_max, y_max] = detection.bbox;
    let x_min = x_min.clamp(0, w - 1);
    let y_min = y_min.clamp(0, h - 1);
    let x_max = x_max.clamp(0, w - 1);
    let y_max = y_max.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      debug!("跳过退化的检测框: {:?}", detection.bbox);
      return;
    }

    let color = Rgb(self.box_color);
    for thickness in 0..line_width as i32 {
      let width = x_max - x_min + 1 - 2 * thickness;
      let height = y_max - y_min + 1 - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", detection.class_label, detection.confidence);
    let scale = PxScale::from(font_size);
    let (text_width, text_height) = text_size(scale, font, &label);

    if let Some(rect) = label_rect(x_min, y_min, text_width, text_height, w) {
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        rect.left() + LABEL_PADDING,
        rect.top() + LABEL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

/// 标签背景的位置：框左上角的正上方，框贴近顶部时下移到图像内，右侧按图像宽度截断
pub fn label_rect(
  x_min: i32,
  y_min: i32,
  text_width: u32,
  text_height: u32,
  image_width: i32,
) -> Option<Rect> {
  let label_height = text_height as i32 + 2 * LABEL_PADDING;
  let label_y = (y_min - label_height).max(0);
  let label_width = (text_width as i32 + 2 * LABEL_PADDING).min(image_width - x_min);

  if label_width <= 0 || label_height <= 0 {
    return None;
  }
  Some(Rect::at(x_min, label_y).of_size(label_width as u32, label_height as u32))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, DrawError> {
  let mut bytes = Vec::new();
  let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
  image.write_with_encoder(encoder)?;
  Ok(bytes)
}
