// 该文件是 Tianping （天平称量） 项目的一部分。
// src/task.rs - 检测任务循环
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

use std::{thread, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  model::{DetectResult, Model},
  output::Render,
  repository::DetectionFailure,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 未检测到物体不算失败，按空结果继续渲染
fn detect_frame<M>(model: &M, frame: &Frame) -> Result<DetectResult, DetectionFailure>
where
  M: Model<Input = Frame, Output = DetectResult, Error = DetectionFailure>,
{
  match model.infer(frame) {
    Err(DetectionFailure::NoObjectsDetected) => Ok(DetectResult::default()),
    other => other,
  }
}

fn log_result(result: &DetectResult) {
  for detection in result.items.iter() {
    info!(
      "  {} ({:.2}) [{:.0}, {:.0}, {:.0}, {:.0}]",
      detection.label,
      detection.confidence,
      detection.bounding_box.left,
      detection.bounding_box.top,
      detection.bounding_box.right,
      detection.bounding_box.bottom
    );
  }
}

/// 只处理第一帧
pub struct OneShotTask;

impl<I, M, O, RE> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DetectResult, Error = DetectionFailure>,
  O: Render<Frame, DetectResult, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!(
      "输入帧获取成功 ({}x{})，开始推理...",
      frame.width(),
      frame.height()
    );
    let now = std::time::Instant::now();
    let result = detect_frame(&model, &frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，检测到 {} 个物体，耗时: {:.2?}", result.len(), elapsed);
    log_result(&result);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 连续处理输入帧，直到输入结束、达到帧数或收到 Ctrl-C。
/// 单帧的检测或渲染失败只记录日志并跳过。
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, M, O, RE> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = Frame>,
  M: Model<Input = Frame, Output = DetectResult, Error = DetectionFailure>,
  O: Render<Frame, DetectResult, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    let handler = ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    });
    if let Err(e) = handler {
      warn!("无法设置 Ctrl-C 处理: {}", e);
    }

    let mut frame_count = 0usize;
    let mut failures = 0usize;
    let mut now = std::time::Instant::now();
    for frame in input {
      frame_count += 1;
      debug!("处理第 {} 帧图像", frame_count);

      match detect_frame(&model, &frame) {
        Ok(result) => {
          let elapsed_a = now.elapsed();
          if !result.is_empty() {
            info!("第 {} 帧检测到 {} 个物体", frame_count, result.len());
            log_result(&result);
          }
          if let Err(e) = output.render_result(&frame, &result) {
            failures += 1;
            error!("第 {} 帧渲染失败: {}", frame_count, e);
          }
          debug!(
            "推理完成，耗时: {:.2?} / {:.2?}",
            elapsed_a,
            now.elapsed()
          );
        }
        Err(e) => {
          failures += 1;
          error!("第 {} 帧检测失败: {}", frame_count, e);
        }
      }
      now = std::time::Instant::now();

      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共处理 {} 帧，失败 {} 帧", frame_count, failures);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, collections::VecDeque};

  use super::*;
  use crate::model::{BoundingBox, Detection};
  use image::RgbImage;

  struct Scripted {
    answers: RefCell<VecDeque<Result<DetectResult, DetectionFailure>>>,
  }

  impl Scripted {
    fn new(answers: Vec<Result<DetectResult, DetectionFailure>>) -> Self {
      Self {
        answers: RefCell::new(answers.into()),
      }
    }
  }

  impl Model for Scripted {
    type Input = Frame;
    type Output = DetectResult;
    type Error = DetectionFailure;

    fn infer(&self, _input: &Frame) -> Result<DetectResult, DetectionFailure> {
      self
        .answers
        .borrow_mut()
        .pop_front()
        .unwrap_or(Err(DetectionFailure::EngineUnavailable))
    }
  }

  #[derive(Default)]
  struct Collect {
    seen: RefCell<Vec<(u64, usize)>>,
  }

  impl Render<Frame, DetectResult> for &Collect {
    type Error = std::io::Error;

    fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
      self.seen.borrow_mut().push((frame.index, result.len()));
      Ok(())
    }
  }

  fn frames(n: u64) -> impl Iterator<Item = Frame> {
    (0..n).map(|i| Frame::new(RgbImage::new(4, 4), i, i * 33))
  }

  fn one() -> DetectResult {
    DetectResult::from(vec![Detection {
      label: "apple".into(),
      confidence: 0.9,
      bounding_box: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
    }])
  }

  #[test]
  fn one_shot_renders_empty_result_when_nothing_found() {
    let collect = Collect::default();
    let model = Scripted::new(vec![Err(DetectionFailure::NoObjectsDetected)]);
    OneShotTask.run_task(frames(3), model, &collect).unwrap();
    assert_eq!(*collect.seen.borrow(), vec![(0, 0)]);
  }

  #[test]
  fn one_shot_fails_without_frames() {
    let collect = Collect::default();
    let model = Scripted::new(vec![]);
    assert!(OneShotTask.run_task(frames(0), model, &collect).is_err());
  }

  #[test]
  fn one_shot_propagates_engine_failure() {
    let collect = Collect::default();
    let model = Scripted::new(vec![Err(DetectionFailure::EngineUnavailable)]);
    assert!(OneShotTask.run_task(frames(1), model, &collect).is_err());
    assert!(collect.seen.borrow().is_empty());
  }

  #[test]
  fn continuous_skips_failed_frames_and_honours_limit() {
    let collect = Collect::default();
    let model = Scripted::new(vec![
      Ok(one()),
      Err(DetectionFailure::EngineUnavailable),
      Err(DetectionFailure::NoObjectsDetected),
      Ok(one()),
      Ok(one()),
    ]);
    ContinuousTask::default()
      .with_frame_number(Some(4))
      .run_task(frames(10), model, &collect)
      .unwrap();
    assert_eq!(*collect.seen.borrow(), vec![(0, 1), (2, 0), (3, 1)]);
  }
}
