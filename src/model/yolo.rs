// 该文件是 Tianping （天平称量） 项目的一部分。
// src/model/yolo.rs - YOLO 目标检测器
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  engine::Engine,
  frame::NhwcTensor,
  model::{Detection, DetectorConfig, INPUT_SIZE, LabelList, decode, preprocess, suppress},
};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("输入图像为空: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("推理失败: {0}")]
  Engine(#[source] BoxedError),
}

/// 预处理 → 推理 → 解码 → NMS 的完整检测链。
/// 检测器独占一个引擎实例。
pub struct YoloDetector<E, const S: u32 = INPUT_SIZE> {
  engine: E,
  labels: LabelList,
  config: DetectorConfig,
}

impl<E, const S: u32> YoloDetector<E, S>
where
  E: Engine<Input = NhwcTensor<S, S>>,
{
  pub fn new(engine: E, labels: LabelList, config: DetectorConfig) -> Self {
    Self {
      engine,
      labels,
      config,
    }
  }

  pub fn labels(&self) -> &LabelList {
    &self.labels
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(DetectError::EmptyImage(width, height));
    }

    let tensor = preprocess::<S>(image);

    let now = std::time::Instant::now();
    let output = self
      .engine
      .infer(&tensor)
      .map_err(|e| DetectError::Engine(Box::new(e)))?;
    debug!("推理完成，耗时: {:.2?}，候选框 {} 个", now.elapsed(), output.len());

    let detections = decode(
      output.rows(),
      &self.labels,
      S,
      (width, height),
      self.config.confidence_threshold,
    );

    Ok(suppress(detections, self.config.iou_threshold))
  }
}

impl<E: Engine, const S: u32> YoloDetector<E, S> {
  /// 释放引擎
  pub fn close(self) -> Result<(), E::Error> {
    self.engine.close()
  }
}
