// 该文件是 Tianping （天平称量） 项目的一部分。
// src/engine/rknpu.rs - RKNPU 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{Engine, EngineBuilder, OutputShapeError, RAW_ROW_LEN, RawOutput},
  frame::NhwcTensor,
  url_file_path,
};

const RKNPU_NUM_INPUTS: u32 = 1;
const RKNPU_NUM_OUTPUTS: u32 = 1;

#[derive(Error, Debug)]
pub enum RknpuEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("输出形状错误: {0}")]
  Output(#[from] OutputShapeError),
}

impl RknpuEngineError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknpuEngineError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknpuEngineBuilder<const S: u32 = 640> {
  model_path: PathBuf,
}

impl<const S: u32> FromUrlWithScheme for RknpuEngineBuilder<S> {
  const SCHEME: &'static str = "rknpu";
}

impl<const S: u32> FromUrl for RknpuEngineBuilder<S> {
  type Error = RknpuEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknpuEngineError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Self {
      model_path: url_file_path(url),
    })
  }
}

impl<const S: u32> EngineBuilder for RknpuEngineBuilder<S> {
  type Engine = RknpuEngine<S>;

  fn build(&self) -> Result<Self::Engine, RknpuEngineError> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknpuEngineError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknpuEngineError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknpuEngineError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNPU_NUM_INPUTS || num_outputs != RKNPU_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNPU_NUM_INPUTS, RKNPU_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(RknpuEngineError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(RknpuEngine {
      context,
      quantized: vec![0u8; NhwcTensor::<S, S>::LEN],
    })
  }
}

/// RKNN 模型的归一化在模型内部完成，输入为 uint8 NHWC
pub struct RknpuEngine<const S: u32 = 640> {
  context: Context,
  quantized: Vec<u8>,
}

impl<const S: u32> Engine for RknpuEngine<S> {
  type Input = NhwcTensor<S, S>;
  type Error = RknpuEngineError;

  fn infer(&mut self, input: &Self::Input) -> Result<RawOutput, Self::Error> {
    for (dst, &src) in self.quantized.iter_mut().zip(input.as_slice()) {
      *dst = (src * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    debug!("设置模型输入");
    self
      .context
      .set_input(0, &self.quantized, TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?;
    let num_rows = data.len() / RAW_ROW_LEN;

    Ok(RawOutput::from_flat(&[1, num_rows, RAW_ROW_LEN], data)?)
  }
}
