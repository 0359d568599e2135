// 该文件是 Tianping （天平称量） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续检测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use tianping::{
  FromUrl,
  input::InputWrapper,
  model::DetectorConfig,
  output::OutputWrapper,
  repository::{LabelSource, open_detector},
  task::{ContinuousTask, Task},
};
use tracing::info;

/// 连续读取摄像头画面并检测，Ctrl-C 退出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 onnx:///models/yolo.onnx 或 rknpu:///models/yolo.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 标签文件，每行一个标签
  #[arg(long, value_name = "FILE")]
  pub labels: PathBuf,
  /// 输入来源
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,
  /// 输出路径，例如 folder:///var/lib/tianping/records?font=/usr/share/fonts/font.ttf
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 最大处理帧数，不指定时一直运行
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = DetectorConfig {
    confidence_threshold: args.confidence,
    iou_threshold: args.nms_threshold,
  };

  let input = InputWrapper::from_url(&args.input)?;
  let model = open_detector(&args.model, LabelSource::File(args.labels), config)?;
  let output = OutputWrapper::from_url(&args.output)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, model, output)?;

  Ok(())
}
