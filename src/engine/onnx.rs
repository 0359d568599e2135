// 该文件是 Tianping （天平称量） 项目的一部分。
// src/engine/onnx.rs - ONNX Runtime 推理后端
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

use std::{fmt::Display, path::PathBuf};

use ort::{
  execution_providers::{CPUExecutionProvider, CoreMLExecutionProvider, ExecutionProvider},
  session::Session,
  value::{Value, ValueType},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{
    Accelerator, Engine, EngineBuilder, EngineOptions, OptionsError, OutputShapeError, RawOutput,
  },
  frame::NhwcTensor,
  url_file_path,
};

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("引擎参数错误: {0}")]
  Options(#[from] OptionsError),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("输入张量错误: {0}")]
  Input(#[from] ndarray::ShapeError),
  #[error("输出维度为负: {0}")]
  NegativeDimension(i64),
  #[error("输出形状错误: {0}")]
  Output(#[from] OutputShapeError),
}

fn runtime<E: Display>(err: E) -> OnnxEngineError {
  OnnxEngineError::Runtime(err.to_string())
}

/// 模型输入张量的通道排布
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  /// `[1, 3, H, W]`，YOLO 导出模型的常见排布
  #[default]
  Nchw,
  /// `[1, H, W, 3]`
  Nhwc,
}

impl TensorLayout {
  /// 按输入维度判断排布；动态维度为 -1，无法判断时按 NCHW 处理
  pub fn from_dims(dims: &[i64]) -> Self {
    match dims {
      [_, 3, _, _] => TensorLayout::Nchw,
      [_, _, _, 3] => TensorLayout::Nhwc,
      _ => TensorLayout::default(),
    }
  }
}

pub struct OnnxEngineBuilder<const S: u32 = 640> {
  model_path: PathBuf,
  options: EngineOptions,
}

impl<const S: u32> FromUrlWithScheme for OnnxEngineBuilder<S> {
  const SCHEME: &'static str = "onnx";
}

impl<const S: u32> FromUrl for OnnxEngineBuilder<S> {
  type Error = OnnxEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxEngineError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(Self {
      model_path: url_file_path(url),
      options: EngineOptions::from_query(url)?,
    })
  }
}

impl<const S: u32> OnnxEngineBuilder<S> {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      options: EngineOptions::default(),
    }
  }

  pub fn options(mut self, options: EngineOptions) -> Self {
    self.options = options;
    self
  }
}

impl<const S: u32> EngineBuilder for OnnxEngineBuilder<S> {
  type Engine = OnnxEngine<S>;

  fn build(&self) -> Result<Self::Engine, OnnxEngineError> {
    if !self.model_path.exists() {
      return Err(OnnxEngineError::ModelNotFound(self.model_path.clone()));
    }

    info!("加载模型文件: {}", self.model_path.display());

    let mut providers = Vec::new();
    match self.options.accelerator {
      Accelerator::CoreMl => match CoreMLExecutionProvider::default().is_available() {
        Ok(true) => providers.push(CoreMLExecutionProvider::default().build()),
        _ => warn!("CoreML 不可用，回退到 CPU"),
      },
      Accelerator::Npu => warn!("ONNX 后端不支持 NPU 加速，回退到 CPU"),
      Accelerator::Cpu => {}
    }
    providers.push(CPUExecutionProvider::default().build());

    let session = Session::builder()
      .map_err(runtime)?
      .with_intra_threads(self.options.threads)
      .map_err(runtime)?
      .with_execution_providers(providers)
      .map_err(runtime)?
      .commit_from_file(&self.model_path)
      .map_err(runtime)?;

    let input = session.inputs.first().ok_or_else(|| runtime("模型没有输入"))?;
    let input_name = input.name.clone();
    let layout = match &input.input_type {
      ValueType::Tensor { shape, .. } => TensorLayout::from_dims(&shape[..]),
      _ => TensorLayout::default(),
    };
    let output_name = session
      .outputs
      .first()
      .map(|output| output.name.clone())
      .ok_or_else(|| runtime("模型没有输出"))?;

    debug!(
      "模型输入: {} ({:?}), 输出: {}",
      input_name, layout, output_name
    );
    info!("模型加载完成，线程数: {}", self.options.threads);

    Ok(OnnxEngine {
      session,
      input_name,
      output_name,
      layout,
    })
  }
}

pub struct OnnxEngine<const S: u32 = 640> {
  session: Session,
  input_name: String,
  output_name: String,
  layout: TensorLayout,
}

impl<const S: u32> Engine for OnnxEngine<S> {
  type Input = NhwcTensor<S, S>;
  type Error = OnnxEngineError;

  fn infer(&mut self, input: &Self::Input) -> Result<RawOutput, Self::Error> {
    let array = match self.layout {
      TensorLayout::Nchw => {
        ndarray::Array::from_shape_vec(ndarray::IxDyn(&input.nchw_shape()), input.to_nchw())?
      }
      TensorLayout::Nhwc => ndarray::Array::from_shape_vec(
        ndarray::IxDyn(&input.shape()),
        input.as_slice().to_vec(),
      )?,
    };
    let value = Value::from_array(array).map_err(runtime)?;

    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => &value])
      .map_err(runtime)?;

    let (shape, data) = outputs[self.output_name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(runtime)?;

    let shape = shape
      .iter()
      .map(|&dim| usize::try_from(dim).map_err(|_| OnnxEngineError::NegativeDimension(dim)))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(RawOutput::from_flat(&shape, data)?)
  }

  fn close(self) -> Result<(), Self::Error> {
    drop(self.session);
    debug!("ONNX 会话已释放");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layout_follows_channel_dimension() {
    assert_eq!(TensorLayout::from_dims(&[1, 3, 640, 640]), TensorLayout::Nchw);
    assert_eq!(TensorLayout::from_dims(&[1, 640, 640, 3]), TensorLayout::Nhwc);
    assert_eq!(TensorLayout::from_dims(&[-1, 3, -1, -1]), TensorLayout::Nchw);
  }

  #[test]
  fn unknown_layout_defaults_to_nchw() {
    assert_eq!(TensorLayout::from_dims(&[-1, -1, -1, -1]), TensorLayout::Nchw);
    assert_eq!(TensorLayout::from_dims(&[1, 640, 640]), TensorLayout::Nchw);
  }

  #[test]
  fn nchw_input_array_matches_planes() {
    let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let tensor = NhwcTensor::<2, 2>::try_from(data).unwrap();
    let array =
      ndarray::Array::from_shape_vec(ndarray::IxDyn(&tensor.nchw_shape()), tensor.to_nchw())
        .unwrap();
    // 通道 1 的平面来自每个像素的第 2 个分量
    assert_eq!(array[[0, 1, 0, 0]], 1.0);
    assert_eq!(array[[0, 1, 0, 1]], 4.0);
    assert_eq!(array[[0, 1, 1, 0]], 7.0);
    assert_eq!(array[[0, 2, 1, 1]], 11.0);
  }
}
