// 该文件是 Tianping （天平称量） 项目的一部分。
// src/repository.rs - 检测仓库：引擎生命周期与单飞调用
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

use std::{
  path::PathBuf,
  sync::{
    Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
  },
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

#[cfg(feature = "onnx")]
use crate::engine::{OnnxEngineBuilder, OnnxEngineError};
#[cfg(feature = "rknpu")]
use crate::engine::{RknpuEngineBuilder, RknpuEngineError};
#[cfg(any(feature = "onnx", feature = "rknpu"))]
use crate::{FromUrl, FromUrlWithScheme};
use crate::{
  engine::{Engine, EngineBuilder},
  frame::{Frame, NhwcTensor},
  model::{
    DetectError, DetectResult, Detection, DetectorConfig, INPUT_SIZE, LabelList, Model,
    YoloDetector,
  },
};

/// 标签来源
#[derive(Debug, Clone)]
pub enum LabelSource {
  File(PathBuf),
  Inline(LabelList),
}

impl LabelSource {
  fn load(&self) -> std::io::Result<LabelList> {
    match self {
      LabelSource::File(path) => LabelList::from_file(path),
      LabelSource::Inline(labels) => Ok(labels.clone()),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectionFailure {
  #[error("检测引擎不可用")]
  EngineUnavailable,
  #[error("未检测到物体")]
  NoObjectsDetected,
  #[error("检测失败: {0}")]
  Inference(#[from] DetectError),
}

#[derive(Error, Debug)]
enum InitError {
  #[error("引擎创建失败: {0}")]
  Engine(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
  #[error("标签加载失败: {0}")]
  Labels(#[from] std::io::Error),
}

/// 检测仓库。
///
/// * 首次使用时创建引擎并加载标签，整个生命周期最多成功一次；
///   并发的首次调用在互斥锁上排队，只有一个会真正加载模型。
/// * 初始化失败只记录日志，仓库保持未初始化，下次调用会重试。
/// * 同一时刻只有一个检测调用持有引擎。
/// * `close` 之后不会再初始化，所有调用返回 [`DetectionFailure::EngineUnavailable`]。
pub struct DetectionRepository<B: EngineBuilder, const S: u32 = INPUT_SIZE> {
  builder: B,
  labels: LabelSource,
  config: DetectorConfig,
  initialized: AtomicBool,
  closed: AtomicBool,
  detector: Mutex<Option<YoloDetector<B::Engine, S>>>,
}

impl<B, const S: u32> DetectionRepository<B, S>
where
  B: EngineBuilder,
  B::Engine: Engine<Input = NhwcTensor<S, S>>,
{
  pub fn new(builder: B, labels: LabelSource, config: DetectorConfig) -> Self {
    Self {
      builder,
      labels,
      config,
      initialized: AtomicBool::new(false),
      closed: AtomicBool::new(false),
      detector: Mutex::new(None),
    }
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized.load(Ordering::Acquire)
  }

  fn lock(&self) -> MutexGuard<'_, Option<YoloDetector<B::Engine, S>>> {
    // 引擎调用中发生 panic 时锁会中毒，此时仍沿用其中的状态
    self.detector.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn load(&self) -> Result<YoloDetector<B::Engine, S>, InitError> {
    let engine = self
      .builder
      .build()
      .map_err(|e| InitError::Engine(Box::new(e)))?;
    let labels = self.labels.load()?;
    info!("加载了 {} 个标签", labels.len());
    Ok(YoloDetector::new(engine, labels, self.config))
  }

  /// 幂等初始化，返回引擎是否可用
  pub fn initialize(&self) -> bool {
    if self.initialized.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire) {
      return true;
    }

    let mut guard = self.lock();
    self.initialize_locked(&mut guard)
  }

  fn initialize_locked(&self, guard: &mut Option<YoloDetector<B::Engine, S>>) -> bool {
    if self.closed.load(Ordering::Acquire) {
      debug!("检测仓库已关闭");
      return false;
    }
    if guard.is_some() {
      return true;
    }

    match self.load() {
      Ok(detector) => {
        *guard = Some(detector);
        self.initialized.store(true, Ordering::Release);
        info!("检测器初始化完成");
        true
      }
      Err(e) => {
        error!("检测器初始化失败: {}", e);
        false
      }
    }
  }

  pub fn detect_objects(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectionFailure> {
    let mut guard = self.lock();
    if !self.initialize_locked(&mut guard) {
      warn!("检测引擎不可用");
      return Err(DetectionFailure::EngineUnavailable);
    }

    let detector = guard.as_mut().ok_or(DetectionFailure::EngineUnavailable)?;
    let detections = detector.detect(image).map_err(|e| {
      error!("检测过程出错: {}", e);
      DetectionFailure::from(e)
    })?;

    if detections.is_empty() {
      debug!("未检测到物体");
      return Err(DetectionFailure::NoObjectsDetected);
    }

    info!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }

  /// 释放引擎；之后的调用都返回 [`DetectionFailure::EngineUnavailable`]
  pub fn close(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let detector = self.lock().take();
    self.initialized.store(false, Ordering::Release);

    if let Some(detector) = detector {
      match detector.close() {
        Ok(()) => info!("检测器已关闭"),
        Err(e) => error!("关闭检测器出错: {}", e),
      }
    }
  }
}

impl<B, const S: u32> Model for DetectionRepository<B, S>
where
  B: EngineBuilder,
  B::Engine: Engine<Input = NhwcTensor<S, S>>,
{
  type Input = Frame;
  type Output = DetectResult;
  type Error = DetectionFailure;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect_objects(&input.image).map(DetectResult::from)
  }
}

impl<B: EngineBuilder, const S: u32> Drop for DetectionRepository<B, S> {
  fn drop(&mut self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      let detector = self
        .detector
        .get_mut()
        .unwrap_or_else(|e| e.into_inner())
        .take();
      if let Some(detector) = detector
        && let Err(e) = detector.close()
      {
        error!("关闭检测器出错: {}", e);
      }
    }
  }
}

/// 按模型 URL 方案选定后端的检测器
pub type DynDetector = Box<dyn Model<Input = Frame, Output = DetectResult, Error = DetectionFailure>>;

impl<M: Model + ?Sized> Model for Box<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Error, Debug)]
pub enum OpenDetectorError {
  #[error("不支持的模型方案: {0}")]
  UnsupportedScheme(String),
  #[cfg(feature = "onnx")]
  #[error("ONNX 引擎错误: {0}")]
  Onnx(#[from] OnnxEngineError),
  #[cfg(feature = "rknpu")]
  #[error("RKNPU 引擎错误: {0}")]
  Rknpu(#[from] RknpuEngineError),
}

/// 根据模型 URL 创建检测仓库，并尝试立即初始化。
///
/// * `onnx:///path/model.onnx?threads=4&accel=cpu`
/// * `rknpu:///path/model.rknn`
///
/// 立即初始化失败时仍返回仓库，首次检测时会重试。
pub fn open_detector(
  model: &Url,
  labels: LabelSource,
  config: DetectorConfig,
) -> Result<DynDetector, OpenDetectorError> {
  let scheme = model.scheme();

  #[cfg(feature = "onnx")]
  if scheme == <OnnxEngineBuilder>::SCHEME {
    let builder = <OnnxEngineBuilder>::from_url(model)?;
    let repository: DetectionRepository<_> = DetectionRepository::new(builder, labels, config);
    if !repository.initialize() {
      warn!("检测器暂不可用，将在首次检测时重试");
    }
    return Ok(Box::new(repository));
  }

  #[cfg(feature = "rknpu")]
  if scheme == <RknpuEngineBuilder>::SCHEME {
    let builder = <RknpuEngineBuilder>::from_url(model)?;
    let repository: DetectionRepository<_> = DetectionRepository::new(builder, labels, config);
    if !repository.initialize() {
      warn!("检测器暂不可用，将在首次检测时重试");
    }
    return Ok(Box::new(repository));
  }

  let _ = (labels, config);
  Err(OpenDetectorError::UnsupportedScheme(scheme.to_string()))
}
