// 该文件是 Tianping （天平称量） 项目的一部分。
// src/model/labels.rs - 类别标签表
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

use std::path::Path;

use tracing::debug;

/// 类别索引越界时使用的标签
pub const UNKNOWN_LABEL: &str = "Unknown";

/// 有序的类别标签表，文本文件每行一个标签
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelList {
  labels: Box<[String]>,
}

impl LabelList {
  pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let labels = Self::parse(&text);
    debug!(
      "从 {} 加载了 {} 个标签",
      path.as_ref().display(),
      labels.len()
    );
    Ok(labels)
  }

  /// 按行解析；空行也占一个索引
  pub fn parse(text: &str) -> Self {
    text.lines().map(|line| line.trim().to_string()).collect()
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.labels.get(index).map(String::as_str)
  }

  /// 将模型输出的类别值映射为标签。
  /// 类别值向零截断；NaN、负数和越界索引映射为 [`UNKNOWN_LABEL`]。
  pub fn resolve(&self, class_value: f32) -> &str {
    // -0.5 截断后为 0，需在截断前排除
    if class_value.is_nan() || class_value < 0.0 {
      return UNKNOWN_LABEL;
    }
    let index = class_value as i64;
    usize::try_from(index)
      .ok()
      .and_then(|idx| self.get(idx))
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for LabelList {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().map(Into::into).collect(),
    }
  }
}
