// 该文件是 Tianping （天平称量） 项目的一部分。
// src/model/decode.rs - 模型输出解码
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

use crate::{
  engine::RawRow,
  model::{BoundingBox, Detection, LabelList},
};

/// 将原始输出行 `[cx, cy, w, h, conf, class]`（模型输入坐标系，0..S）
/// 解码为源图像像素坐标下的检测结果。
///
/// 仅保留 `conf >= confidence_threshold` 的行（NaN 一律丢弃）。
/// 负的宽高按 0 处理，保证输出的框满足 `right >= left`、`bottom >= top`。
pub fn decode(
  rows: &[RawRow],
  labels: &LabelList,
  input_size: u32,
  original_size: (u32, u32),
  confidence_threshold: f32,
) -> Vec<Detection> {
  let input_size = input_size as f32;
  let scale_x = original_size.0 as f32 / input_size;
  let scale_y = original_size.1 as f32 / input_size;

  let mut detections = Vec::new();
  for &[center_x, center_y, box_w, box_h, confidence, class_value] in rows {
    if !(confidence >= confidence_threshold) {
      continue;
    }

    let half_w = box_w.max(0.0) / 2.0;
    let half_h = box_h.max(0.0) / 2.0;

    // 中心点 + 宽高 转为 角点，再按轴分别缩放到原图
    detections.push(Detection {
      label: labels.resolve(class_value).to_string(),
      confidence,
      bounding_box: BoundingBox {
        left: (center_x - half_w) * scale_x,
        top: (center_y - half_h) * scale_y,
        right: (center_x + half_w) * scale_x,
        bottom: (center_y + half_h) * scale_y,
      },
    });
  }

  debug!("解码得到 {} / {} 个候选框", detections.len(), rows.len());
  detections
}
