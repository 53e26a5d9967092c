// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/preprocess/letterbox.rs - 保持宽高比的缩放与填充
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

use image::{Rgb, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::geometry;
use crate::preprocess::PreprocessError;

pub const DEFAULT_TARGET_SIZE: u32 = 640;
pub const DEFAULT_PAD_COLOR: [u8; 3] = [114, 114, 114];

/// Letterbox 变换的结果。
///
/// `scale`、`pad_x`、`pad_y` 描述了原图到推理画布的线性映射：
/// `x_canvas = x_original * scale + pad_x`，y 方向相同。
#[derive(Debug, Clone)]
pub struct LetterboxResult {
  pub padded_image: RgbImage,
  pub scale: f32,
  pub pad_x: u32,
  pub pad_y: u32,
  pub original_width: u32,
  pub original_height: u32,
}

impl LetterboxResult {
  pub fn target_size(&self) -> u32 {
    self.padded_image.width()
  }

  /// 原图坐标 -> 推理画布坐标
  pub fn forward_box(&self, bbox: &[f32; 4]) -> [f32; 4] {
    let (px, py) = (self.pad_x as f32, self.pad_y as f32);
    [
      bbox[0] * self.scale + px,
      bbox[1] * self.scale + py,
      bbox[2] * self.scale + px,
      bbox[3] * self.scale + py,
    ]
  }

  /// 推理画布坐标 -> 原图整数坐标
  pub fn inverse_box(&self, bbox: &[f32; 4]) -> [i32; 4] {
    geometry::unletterbox(
      bbox,
      self.scale,
      self.pad_x as f32,
      self.pad_y as f32,
      self.original_width,
      self.original_height,
    )
  }
}

pub fn letterbox(
  image: &RgbImage,
  target_size: u32,
  pad_color: [u8; 3],
) -> Result<LetterboxResult, PreprocessError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(PreprocessError::InvalidInput(format!(
      "图像尺寸为零: {}x{}",
      width, height
    )));
  }
  if target_size == 0 {
    return Err(PreprocessError::InvalidInput(
      "目标尺寸必须为正整数".to_string(),
    ));
  }

  let target = target_size as f32;
  let scale = (target / height as f32).min(target / width as f32);

  let resized_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
  let resized_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

  // 四舍五入，与训练时的 letterbox 一致
  let pad_x = ((target_size - resized_width) as f32 / 2.0).round() as u32;
  let pad_y = ((target_size - resized_height) as f32 / 2.0).round() as u32;

  debug!(
    "letterbox: {}x{} -> {}x{}, scale={:.4}, pad=({}, {})",
    width, height, resized_width, resized_height, scale, pad_x, pad_y
  );

  let mut padded_image = RgbImage::from_pixel(target_size, target_size, Rgb(pad_color));
  if (resized_width, resized_height) == (width, height) {
    image::imageops::replace(&mut padded_image, image, pad_x as i64, pad_y as i64);
  } else {
    let resized =
      image::imageops::resize(image, resized_width, resized_height, FilterType::Triangle);
    image::imageops::replace(&mut padded_image, &resized, pad_x as i64, pad_y as i64);
  }

  Ok(LetterboxResult {
    padded_image,
    scale,
    pad_x,
    pad_y,
    original_width: width,
    original_height: height,
  })
}
