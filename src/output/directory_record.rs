// 该文件是 Tianping （天平称量） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectResult, Detection},
  output::{
    Render,
    draw::{Draw, DrawError},
  },
  url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制配置错误: {0}")]
  DrawError(#[from] DrawError),
}

/// 与图像同名的 JSON 记录
#[derive(Debug, Serialize)]
struct FrameRecord<'a> {
  frame_index: u64,
  timestamp_ms: u64,
  recorded_at: String,
  width: u32,
  height: u32,
  detections: &'a [Detection],
}

/// 按日期分目录保存帧与检测记录：`<root>/YYYY/MM/DD/HH-MM-SS-XXXX.{png,json}`
///
/// URL 参数：
/// * `always`：没有检测结果的帧也保存；
/// * `raw`：保存原始帧，不绘制检测框；
/// * `font=<ttf>`：绘制标签文字。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Option<Draw>,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let raw = uri.query_pairs().any(|(k, _)| k == "raw");
    let draw = if raw {
      None
    } else {
      Some(Draw::from_url_query(uri)?)
    };

    Ok(Self::new(url_file_path(uri), draw, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Option<Draw>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: AtomicU32::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    // 只取低 16 位用于文件名
    (self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & 0xFFFF) as u16
  }

  fn frame_path(&self, now: &DateTime<Local>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn write_record(
    path: &Path,
    frame: &Frame,
    result: &DetectResult,
    now: &DateTime<Local>,
  ) -> Result<(), DirectoryRecordOutputError> {
    let record = FrameRecord {
      frame_index: frame.index,
      timestamp_ms: frame.timestamp_ms,
      recorded_at: now.to_rfc3339(),
      width: frame.width(),
      height: frame.height(),
      detections: &result.items,
    };
    let writer = BufWriter::new(File::create(path.with_extension("json"))?);
    serde_json::to_writer_pretty(writer, &record)?;
    Ok(())
  }

  /// 保存一帧，返回图像路径；按配置跳过时返回 `None`
  pub fn record(
    &self,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<Option<PathBuf>, DirectoryRecordOutputError> {
    if !self.always && result.is_empty() {
      return Ok(None);
    }

    let now = Local::now();
    let path = self.frame_path(&now)?;
    match &self.draw {
      Some(draw) => draw.draw_on_copy(&frame.image, result).save(&path)?,
      None => frame.image.save(&path)?,
    }
    Self::write_record(&path, frame, result, &now)?;
    debug!("记录帧 {} 到 {}", frame.index, path.display());

    Ok(Some(path))
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    self.record(frame, result).map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;
  use image::RgbImage;

  fn frame() -> Frame {
    Frame::new(RgbImage::new(16, 16), 3, 120)
  }

  fn one_detection() -> DetectResult {
    DetectResult::from(vec![Detection {
      label: "apple".into(),
      confidence: 0.75,
      bounding_box: BoundingBox::new(2.0, 2.0, 10.0, 10.0),
    }])
  }

  #[test]
  fn empty_results_are_skipped_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), None, false);
    assert!(output.record(&frame(), &DetectResult::default()).unwrap().is_none());
  }

  #[test]
  fn always_records_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), None, true);
    let path = output
      .record(&frame(), &DetectResult::default())
      .unwrap()
      .unwrap();
    assert!(path.exists());
    assert!(path.with_extension("json").exists());
  }

  #[test]
  fn record_writes_png_and_json_in_dated_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path(), Some(Draw::default()), false);
    let path = output.record(&frame(), &one_detection()).unwrap().unwrap();

    assert!(path.starts_with(dir.path()));
    // YYYY/MM/DD/file
    let relative = path.strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 4);
    assert!(path.to_string_lossy().ends_with("-0001.png"));

    let text = std::fs::read_to_string(path.with_extension("json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["frame_index"], 3);
    assert_eq!(json["detections"][0]["label"], "apple");
    assert_eq!(json["detections"].as_array().unwrap().len(), 1);
  }

  #[test]
  fn parses_url_options() {
    let url = url::Url::parse("folder:///tmp/records?always&raw").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert!(output.always);
    assert!(output.draw.is_none());
    assert_eq!(output.directory, PathBuf::from("/tmp/records"));
  }
}
