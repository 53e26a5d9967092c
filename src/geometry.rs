// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/geometry.rs - 边界框坐标变换
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

/// IoU 分母上的平滑项，避免零面积框导致除零
pub const IOU_EPSILON: f32 = 1e-6;

/// [cx, cy, w, h] -> [x1, y1, x2, y2]
pub fn center_to_corner_one(bbox: [f32; 4]) -> [f32; 4] {
  let [cx, cy, w, h] = bbox;
  [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

pub fn center_to_corner(boxes: &[[f32; 4]]) -> Vec<[f32; 4]> {
  boxes.iter().copied().map(center_to_corner_one).collect()
}

pub fn area(bbox: &[f32; 4]) -> f32 {
  (bbox[2] - bbox[0]).max(0.0) * (bbox[3] - bbox[1]).max(0.0)
}

pub fn intersection_area(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);
  (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let inter = intersection_area(a, b);
  inter / (area(a) + area(b) - inter + IOU_EPSILON)
}

/// 将推理画布上的 xyxy 框映射回原图，并裁剪到 `[0, 原图尺寸]` 后取整。
///
/// `scale` 由 letterbox 构造保证为正；传入非正值属于调用方的编程错误。
pub fn unletterbox(
  bbox: &[f32; 4],
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  original_width: u32,
  original_height: u32,
) -> [i32; 4] {
  assert!(scale > 0.0, "letterbox 缩放系数必须为正: {}", scale);

  let (w, h) = (original_width as f32, original_height as f32);
  let map =
    |value: f32, pad: f32, limit: f32| ((value - pad) / scale).clamp(0.0, limit).round() as i32;

  [
    map(bbox[0], pad_x, w),
    map(bbox[1], pad_y, h),
    map(bbox[2], pad_x, w),
    map(bbox[3], pad_y, h),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn center_boxes_become_corners() {
    let corners = center_to_corner(&[[50.0, 40.0, 20.0, 10.0], [0.5, 0.5, 1.0, 1.0]]);
    assert_eq!(corners, vec![[40.0, 35.0, 60.0, 45.0], [0.0, 0.0, 1.0, 1.0]]);
    assert!(center_to_corner(&[]).is_empty());
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = [10.0, 10.0, 110.0, 60.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = [0.0, 0.0, 10.0, 10.0];
    let b = [20.0, 20.0, 30.0, 30.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn iou_of_partial_overlap() {
    let a = [0.0, 0.0, 100.0, 100.0];
    let b = [0.0, 0.0, 100.0, 90.0];
    assert!((iou(&a, &b) - 0.9).abs() < 1e-4);
  }

  #[test]
  fn degenerate_boxes_do_not_produce_nan() {
    let point = [5.0, 5.0, 5.0, 5.0];
    let value = iou(&point, &point);
    assert!(value.is_finite());
    assert_eq!(value, 0.0);
  }

  #[test]
  fn unletterbox_removes_padding_and_clamps() {
    // 1280x720 -> 640: scale 0.5, pad_y 140
    let mapped = unletterbox(&[270.0, 270.0, 370.0, 370.0], 0.5, 0.0, 140.0, 1280, 720);
    assert_eq!(mapped, [540, 260, 740, 460]);

    let clamped = unletterbox(&[-20.0, 100.0, 700.0, 600.0], 0.5, 0.0, 140.0, 1280, 720);
    assert_eq!(clamped, [0, 0, 1280, 720]);
  }

  #[test]
  #[should_panic]
  fn non_positive_scale_fails_fast() {
    unletterbox(&[0.0, 0.0, 1.0, 1.0], 0.0, 0.0, 0.0, 10, 10);
  }
}
