// 该文件是 Tianping （天平称量） 项目的一部分。
// src/model/nms.rs - 按类别的非极大值抑制
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

use tracing::debug;

use crate::model::Detection;

/// 贪心 NMS：按置信度降序遍历，若候选框与某个已保留的同类框
/// IoU 超过 `iou_threshold` 则丢弃。不同类别之间互不抑制。
///
/// 排序是稳定的，置信度相同时保持输入顺序。
pub fn suppress(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  if detections.is_empty() {
    return detections;
  }

  // 按置信度降序排序
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut selected: Vec<Detection> = Vec::with_capacity(detections.len());
  for candidate in detections {
    let overlapped = selected.iter().any(|kept| {
      kept.label == candidate.label
        && kept.bounding_box.iou(&candidate.bounding_box) > iou_threshold
    });

    if !overlapped {
      selected.push(candidate);
    }
  }

  debug!("NMS 后保留 {} 个物体", selected.len());
  selected
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, IOU_THRESHOLD};

  fn det(label: &str, confidence: f32, bbox: (f32, f32, f32, f32)) -> Detection {
    Detection {
      label: label.to_string(),
      confidence,
      bounding_box: BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3),
    }
  }

  #[test]
  fn empty_input_gives_empty_output() {
    assert!(suppress(Vec::new(), IOU_THRESHOLD).is_empty());
  }

  #[test]
  fn same_label_overlap_keeps_highest() {
    // IoU = 6000 / 10000 = 0.6
    let input = vec![
      det("apple", 0.8, (0.0, 0.0, 100.0, 60.0)),
      det("apple", 0.9, (0.0, 0.0, 100.0, 100.0)),
    ];
    let kept = suppress(input, IOU_THRESHOLD);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].confidence, 0.9);
  }

  #[test]
  fn different_labels_never_suppress() {
    // IoU = 0.9
    let input = vec![
      det("apple", 0.9, (0.0, 0.0, 100.0, 100.0)),
      det("pear", 0.8, (0.0, 0.0, 100.0, 90.0)),
    ];
    let kept = suppress(input, IOU_THRESHOLD);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn overlap_at_threshold_is_kept() {
    // IoU = 4500 / 10000 = 0.45，不超过阈值
    let input = vec![
      det("apple", 0.9, (0.0, 0.0, 100.0, 100.0)),
      det("apple", 0.8, (0.0, 0.0, 100.0, 45.0)),
    ];
    assert_eq!(suppress(input, IOU_THRESHOLD).len(), 2);
  }

  #[test]
  fn ties_keep_input_order() {
    let input = vec![
      det("apple", 0.7, (0.0, 0.0, 10.0, 10.0)),
      det("apple", 0.7, (1.0, 1.0, 11.0, 11.0)),
    ];
    let kept = suppress(input, IOU_THRESHOLD);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].bounding_box.left, 0.0);
  }

  #[test]
  fn output_is_sorted_by_confidence() {
    let input = vec![
      det("a", 0.6, (0.0, 0.0, 10.0, 10.0)),
      det("b", 0.95, (50.0, 50.0, 60.0, 60.0)),
      det("c", 0.75, (100.0, 100.0, 110.0, 110.0)),
    ];
    let kept = suppress(input, IOU_THRESHOLD);
    let order: Vec<_> = kept.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(order, ["b", "c", "a"]);
  }
}
