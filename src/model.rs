// 该文件是 Tianping （天平称量） 项目的一部分。
// src/model.rs - 检测模型
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

use serde::{Deserialize, Serialize};

/// 模型输入边长
pub const INPUT_SIZE: u32 = 640;
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const IOU_THRESHOLD: f32 = 0.45;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 源图像像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  /// 面积，反向的框按 0 计
  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  /// 交并比；交集先截断为 0，并集为 0 时返回 0
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let inter_w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
    let inter_h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
    let intersection = inter_w * inter_h;
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 置信度最高的检测结果
  pub fn best(&self) -> Option<&Detection> {
    self
      .items
      .iter()
      .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 检测阈值配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: CONFIDENCE_THRESHOLD,
      iou_threshold: IOU_THRESHOLD,
    }
  }
}

mod decode;
mod labels;
mod nms;
mod preprocess;
mod yolo;

pub use self::decode::decode;
pub use self::labels::{LabelList, UNKNOWN_LABEL};
pub use self::nms::suppress;
pub use self::preprocess::{IMAGE_MEAN, IMAGE_STD, preprocess};
pub use self::yolo::{DetectError, YoloDetector};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = BoundingBox::new(10.0, 10.0, 50.0, 30.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn iou_of_zero_area_boxes_is_zero() {
    let a = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
    assert_eq!(a.iou(&a), 0.0);
  }

  #[test]
  fn iou_of_partial_overlap() {
    let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
    let b = BoundingBox::new(0.0, 0.0, 100.0, 60.0);
    assert!((a.iou(&b) - 0.6).abs() < 1e-6);
  }

  #[test]
  fn best_picks_highest_confidence() {
    let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let result = DetectResult::from(vec![
      Detection {
        label: "pear".into(),
        confidence: 0.6,
        bounding_box: bbox,
      },
      Detection {
        label: "apple".into(),
        confidence: 0.9,
        bounding_box: bbox,
      },
    ]);
    assert_eq!(result.best().map(|d| d.label.as_str()), Some("apple"));
  }
}
