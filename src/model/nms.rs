// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/model/nms.rs - 逐类别非极大值抑制
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

use crate::geometry::iou;

/// 贪心 NMS，返回保留下来的下标（按分数降序）。
///
/// 排序是稳定的：分数相同时下标小的优先，NaN 分数排在最后。
/// 与已保留框的 IoU 严格大于 `iou_threshold` 的候选会被丢弃。
pub fn suppress(boxes: &[[f32; 4]], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
  debug_assert_eq!(boxes.len(), scores.len());
  let count = boxes.len().min(scores.len());
  if count == 0 {
    return Vec::new();
  }

  let key = |i: usize| {
    let score = scores[i];
    if score.is_nan() { f32::NEG_INFINITY } else { score }
  };
  let mut order: Vec<usize> = (0..count).collect();
  order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));

  let mut suppressed = vec![false; count];
  let mut keep = Vec::new();
  for (position, &best) in order.iter().enumerate() {
    if suppressed[best] {
      continue;
    }
    keep.push(best);
    for &other in &order[position + 1..] {
      if !suppressed[other] && iou(&boxes[best], &boxes[other]) > iou_threshold {
        suppressed[other] = true;
      }
    }
  }

  keep
}

#[cfg(test)]
mod tests {
  use super::*;

  // 0/1/2 为同一位置附近的一串框，3/4 为另一处的一对
  fn cluster() -> (Vec<[f32; 4]>, Vec<f32>) {
    (
      vec![
        [0.0, 0.0, 10.0, 10.0],
        [1.0, 0.0, 11.0, 10.0],
        [5.0, 0.0, 15.0, 10.0],
        [100.0, 100.0, 110.0, 110.0],
        [100.0, 105.0, 110.0, 115.0],
      ],
      vec![0.9, 0.8, 0.7, 0.6, 0.5],
    )
  }

  #[test]
  fn overlapping_lower_score_is_dropped() {
    let boxes = [[0.0, 0.0, 100.0, 100.0], [0.0, 0.0, 100.0, 90.0]];
    let keep = suppress(&boxes, &[0.6, 0.8], 0.45);
    assert_eq!(keep, vec![1]);
  }

  #[test]
  fn empty_input_keeps_nothing() {
    assert!(suppress(&[], &[], 0.5).is_empty());
  }

  #[test]
  fn ties_are_broken_by_index() {
    let boxes = [[0.0, 0.0, 10.0, 10.0], [0.0, 0.0, 10.0, 10.0], [50.0, 50.0, 60.0, 60.0]];
    assert_eq!(suppress(&boxes, &[0.5, 0.5, 0.5], 0.3), vec![0, 2]);
  }

  #[test]
  fn nan_scores_sort_last() {
    let boxes = [[0.0, 0.0, 10.0, 10.0], [0.0, 0.0, 10.0, 10.0]];
    assert_eq!(suppress(&boxes, &[f32::NAN, 0.1], 0.5), vec![1]);
  }

  #[test]
  fn suppression_is_deterministic() {
    let (boxes, scores) = cluster();
    let first = suppress(&boxes, &scores, 0.45);
    for _ in 0..10 {
      assert_eq!(suppress(&boxes, &scores, 0.45), first);
    }
  }

  #[test]
  fn suppressing_kept_boxes_again_changes_nothing() {
    let (boxes, scores) = cluster();
    for threshold in [0.1, 0.35, 0.45, 0.7, 0.95] {
      let keep = suppress(&boxes, &scores, threshold);
      let kept_boxes: Vec<_> = keep.iter().map(|&i| boxes[i]).collect();
      let kept_scores: Vec<_> = keep.iter().map(|&i| scores[i]).collect();
      let again = suppress(&kept_boxes, &kept_scores, threshold);
      assert_eq!(again, (0..keep.len()).collect::<Vec<_>>());
    }
  }

  #[test]
  fn raising_threshold_never_keeps_fewer() {
    let (boxes, scores) = cluster();
    let counts: Vec<usize> = (1..10)
      .map(|step| suppress(&boxes, &scores, step as f32 / 10.0).len())
      .collect();
    assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", counts);
    assert_eq!(counts.first(), Some(&2));
    assert_eq!(counts.last(), Some(&5));
  }
}
