// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/frame.rs - NCHW 推理张量帧定义
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

use std::str::FromStr;

use image::RgbImage;
use ndarray::{Array4, ArrayView4};

const RGB_CHANNELS: usize = 3;

/// 送入模型的通道顺序。公共接口中的图像始终为 RGB。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知的通道顺序: {}", other)),
    }
  }
}

/// 归一化到 [0, 1] 的 1x3xHxW 浮点张量
#[derive(Debug, Clone)]
pub struct RgbNchwFrame {
  data: Array4<f32>,
}

impl RgbNchwFrame {
  pub fn from_image(image: &RgbImage, order: ChannelOrder) -> Self {
    let (width, height) = image.dimensions();
    let mut data = Array4::<f32>::zeros((1, RGB_CHANNELS, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
      let (x, y) = (x as usize, y as usize);
      for c in 0..RGB_CHANNELS {
        let source = match order {
          ChannelOrder::Rgb => c,
          ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
        };
        data[[0, c, y, x]] = pixel[source] as f32 / 255.0;
      }
    }

    Self { data }
  }

  pub fn height(&self) -> usize {
    self.data.shape()[2]
  }

  pub fn width(&self) -> usize {
    self.data.shape()[3]
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  pub fn as_array(&self) -> &Array4<f32> {
    &self.data
  }
}

impl From<&RgbImage> for RgbNchwFrame {
  fn from(image: &RgbImage) -> Self {
    RgbNchwFrame::from_image(image, ChannelOrder::Rgb)
  }
}
