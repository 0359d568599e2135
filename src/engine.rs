// 该文件是 Tianping （天平称量） 项目的一部分。
// src/engine.rs - 推理引擎边界
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

use thiserror::Error;
use url::Url;

use crate::url_query;

/// 每个候选框的输出宽度: `[cx, cy, w, h, conf, class]`
pub const RAW_ROW_LEN: usize = 6;
pub const DEFAULT_THREADS: usize = 4;

pub type RawRow = [f32; RAW_ROW_LEN];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OutputShapeError {
  #[error("期望输出形状为 [1, N, 6], 实际为 {0:?}")]
  UnexpectedShape(Vec<usize>),
  #[error("输出数据长度 {actual} 与形状要求的 {expected} 不一致")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 模型的原始输出 `[1, N, 6]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
  rows: Box<[RawRow]>,
}

impl RawOutput {
  /// 从平铺数据和形状构造，形状必须为 `[1, N, 6]`
  pub fn from_flat(shape: &[usize], data: &[f32]) -> Result<Self, OutputShapeError> {
    let num_rows = match shape {
      [1, n, RAW_ROW_LEN] => *n,
      _ => return Err(OutputShapeError::UnexpectedShape(shape.to_vec())),
    };

    let expected = num_rows * RAW_ROW_LEN;
    if data.len() != expected {
      return Err(OutputShapeError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    let rows = data
      .chunks_exact(RAW_ROW_LEN)
      .map(|chunk| {
        let mut row = [0.0f32; RAW_ROW_LEN];
        row.copy_from_slice(chunk);
        row
      })
      .collect();

    Ok(Self { rows })
  }

  pub fn rows(&self) -> &[RawRow] {
    &self.rows
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }
}

impl From<Vec<RawRow>> for RawOutput {
  fn from(rows: Vec<RawRow>) -> Self {
    Self {
      rows: rows.into_boxed_slice(),
    }
  }
}

/// 推理引擎。一个实例同一时刻只服务一次调用，故 `infer` 取 `&mut self`。
pub trait Engine {
  type Input;
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&mut self, input: &Self::Input) -> Result<RawOutput, Self::Error>;

  /// 显式释放引擎及其硬件加速资源
  fn close(self) -> Result<(), Self::Error>
  where
    Self: Sized,
  {
    Ok(())
  }
}

pub trait EngineBuilder {
  type Engine: Engine;

  fn build(&self) -> Result<Self::Engine, <Self::Engine as Engine>::Error>;
}

/// 硬件加速方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accelerator {
  #[default]
  Cpu,
  CoreMl,
  Npu,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OptionsError {
  #[error("未知的加速方式: {0}")]
  UnknownAccelerator(String),
  #[error("线程数无效: {0}")]
  InvalidThreads(String),
}

impl FromStr for Accelerator {
  type Err = OptionsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Accelerator::Cpu),
      "coreml" => Ok(Accelerator::CoreMl),
      "npu" => Ok(Accelerator::Npu),
      other => Err(OptionsError::UnknownAccelerator(other.to_string())),
    }
  }
}

/// 引擎创建参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
  pub threads: usize,
  pub accelerator: Accelerator,
}

impl Default for EngineOptions {
  fn default() -> Self {
    Self {
      threads: DEFAULT_THREADS,
      accelerator: Accelerator::default(),
    }
  }
}

impl EngineOptions {
  /// 从 URL 查询参数读取 `threads` 与 `accel`
  pub fn from_query(url: &Url) -> Result<Self, OptionsError> {
    let mut options = Self::default();

    if let Some(threads) = url_query(url, "threads") {
      options.threads = match threads.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => return Err(OptionsError::InvalidThreads(threads)),
      };
    }

    if let Some(accel) = url_query(url, "accel") {
      options.accelerator = accel.parse()?;
    }

    Ok(options)
  }
}

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxEngine, OnnxEngineBuilder, OnnxEngineError, TensorLayout};

#[cfg(feature = "rknpu")]
mod rknpu;
#[cfg(feature = "rknpu")]
pub use self::rknpu::{RknpuEngine, RknpuEngineBuilder, RknpuEngineError};
