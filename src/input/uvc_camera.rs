// 该文件是 Tianping （天平称量） 项目的一部分。
// src/input/uvc_camera.rs - UVC 摄像头输入（V4L2）
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{path::Path, time::Instant};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  control::{Control, Value},
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path, url_query};

pub const PREVIEW_WIDTH: u32 = 640;
pub const PREVIEW_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// 连续丢弃的坏帧上限，超过后结束预览
const MAX_CONSECUTIVE_FAILURES: usize = 10;

// V4L2 用户控制项 id
const V4L2_CID_BRIGHTNESS: u32 = 0x0098_0900;
const V4L2_CID_CONTRAST: u32 = 0x0098_0901;

#[derive(Error, Debug)]
pub enum UvcCameraError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("V4L 错误: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("无效的预览尺寸: {0}")]
  InvalidSize(String),
  #[error("摄像头未打开预览")]
  NotStreaming,
  #[error("帧数据错误: {0}")]
  BadFrame(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("摄像头不支持该控制项: {0:#x}")]
  UnsupportedControl(u32),
}

impl UvcCameraError {
  /// 单帧数据损坏，可丢弃该帧继续采集
  pub fn is_frame_glitch(&self) -> bool {
    matches!(
      self,
      UvcCameraError::BadFrame(_) | UvcCameraError::ImageError(_)
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpg,
  Rgb3,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"MJPG" => Some(PixelFormat::Mjpg),
      b"RGB3" => Some(PixelFormat::Rgb3),
      _ => None,
    }
  }
}

/// 摄像头界面状态快照，每次状态变化时整体重新生成
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraState {
  pub is_camera_on: bool,
  pub is_recording: bool,
  pub show_brightness_control: bool,
  pub show_contrast_control: bool,
  pub brightness_value: i64,
  pub contrast_value: i64,
  pub supports_brightness: bool,
  pub supports_contrast: bool,
  pub capture_button_visible: bool,
  pub tools_layout_visible: bool,
}

#[derive(Debug, Clone, Copy)]
struct ControlRange {
  id: u32,
  minimum: i64,
  maximum: i64,
  default: i64,
}

/// 通过 V4L2 驱动访问的 UVC 摄像头
pub struct UvcCamera {
  device: Device,
  stream: Option<Stream<'static>>,
  pixel_format: PixelFormat,
  width: u32,
  height: u32,
  stride: u32,
  controls: Vec<ControlRange>,
  frame_index: u64,
  start_time: Instant,
}

impl FromUrlWithScheme for UvcCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for UvcCamera {
  type Error = UvcCameraError;

  /// `v4l:///dev/video0?width=640&height=480`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(UvcCameraError::SchemaMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0".into()
    } else {
      url_file_path(url)
    };

    let parse_size = |key: &str, default: u32| -> Result<u32, UvcCameraError> {
      match url_query(url, key) {
        Some(value) => value
          .parse::<u32>()
          .ok()
          .filter(|v| *v > 0)
          .ok_or(UvcCameraError::InvalidSize(value)),
        None => Ok(default),
      }
    };

    let width = parse_size("width", PREVIEW_WIDTH)?;
    let height = parse_size("height", PREVIEW_HEIGHT)?;
    Self::open(device_path, width, height)
  }
}

impl UvcCamera {
  /// 打开设备并协商预览格式，此时尚未开始取流
  pub fn open<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self, UvcCameraError> {
    let device = Device::with_path(path.as_ref())?;
    info!("打开摄像头: {}", path.as_ref().display());

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let mut format = device.set_format(&format)?;

    if PixelFormat::from_fourcc(format.fourcc).is_none() {
      debug!("设备不接受 YUYV，尝试 MJPG");
      format.fourcc = FourCC::new(b"MJPG");
      format = device.set_format(&format)?;
    }

    let pixel_format = PixelFormat::from_fourcc(format.fourcc)
      .ok_or_else(|| UvcCameraError::UnsupportedPixelFormat(format.fourcc.to_string()))?;

    info!(
      "预览格式: {}x{} {}",
      format.width, format.height, format.fourcc
    );

    let controls = device
      .query_controls()
      .map(|descriptions| {
        descriptions
          .into_iter()
          .filter(|d| d.id == V4L2_CID_BRIGHTNESS || d.id == V4L2_CID_CONTRAST)
          .map(|d| ControlRange {
            id: d.id,
            minimum: d.minimum,
            maximum: d.maximum,
            default: d.default,
          })
          .collect()
      })
      .unwrap_or_else(|e| {
        warn!("查询控制项失败: {}", e);
        Vec::new()
      });

    Ok(Self {
      device,
      stream: None,
      pixel_format,
      width: format.width,
      height: format.height,
      stride: format.stride,
      controls,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn is_streaming(&self) -> bool {
    self.stream.is_some()
  }

  pub fn start_preview(&mut self) -> Result<(), UvcCameraError> {
    if self.stream.is_none() {
      let stream = Stream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)?;
      self.stream = Some(stream);
      self.start_time = Instant::now();
      info!("开始预览");
    }
    Ok(())
  }

  /// 停止取流；设备本身在析构时释放
  pub fn close(&mut self) {
    if self.stream.take().is_some() {
      info!("摄像头已关闭");
    }
  }

  pub fn capture_frame(&mut self) -> Result<Frame, UvcCameraError> {
    let (width, height, stride, pixel_format) =
      (self.width, self.height, self.stride, self.pixel_format);
    let stream = self.stream.as_mut().ok_or(UvcCameraError::NotStreaming)?;
    let (buffer, _meta) = stream.next()?;

    let image = match pixel_format {
      PixelFormat::Yuyv => yuyv_to_rgb(buffer, width, height, stride)?,
      PixelFormat::Rgb3 => rgb3_to_rgb(buffer, width, height, stride)?,
      PixelFormat::Mjpg => image::load_from_memory_with_format(buffer, ImageFormat::Jpeg)?.to_rgb8(),
    };

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }

  /// 抓拍一帧并保存到文件
  pub fn capture_still<P: AsRef<Path>>(&mut self, path: P) -> Result<Frame, UvcCameraError> {
    let frame = self.capture_frame()?;
    if let Some(parent) = path.as_ref().parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    frame.image.save(path.as_ref())?;
    info!("抓拍保存到: {}", path.as_ref().display());
    Ok(frame)
  }

  fn control_range(&self, id: u32) -> Option<ControlRange> {
    self.controls.iter().copied().find(|c| c.id == id)
  }

  fn set_control(&self, id: u32, value: i64) -> Result<i64, UvcCameraError> {
    let range = self
      .control_range(id)
      .ok_or(UvcCameraError::UnsupportedControl(id))?;
    let value = value.clamp(range.minimum, range.maximum);
    self.device.set_control(Control {
      id,
      value: Value::Integer(value),
    })?;
    Ok(value)
  }

  fn control_value(&self, id: u32) -> Option<i64> {
    self.control_range(id)?;
    match self.device.control(id) {
      Ok(Control {
        value: Value::Integer(v),
        ..
      }) => Some(v),
      Ok(_) => None,
      Err(e) => {
        warn!("读取控制项 {:#x} 失败: {}", id, e);
        None
      }
    }
  }

  /// 设置亮度，超出范围时截断，返回实际写入的值
  pub fn set_brightness(&self, value: i64) -> Result<i64, UvcCameraError> {
    self.set_control(V4L2_CID_BRIGHTNESS, value)
  }

  pub fn set_contrast(&self, value: i64) -> Result<i64, UvcCameraError> {
    self.set_control(V4L2_CID_CONTRAST, value)
  }

  /// 亮度与对比度恢复默认值
  pub fn reset_controls(&self) -> Result<(), UvcCameraError> {
    for range in &self.controls {
      self.set_control(range.id, range.default)?;
    }
    Ok(())
  }

  pub fn state(&self) -> CameraState {
    let is_on = self.is_streaming();
    CameraState {
      is_camera_on: is_on,
      is_recording: false,
      show_brightness_control: false,
      show_contrast_control: false,
      brightness_value: self.control_value(V4L2_CID_BRIGHTNESS).unwrap_or(0),
      contrast_value: self.control_value(V4L2_CID_CONTRAST).unwrap_or(0),
      supports_brightness: self.control_range(V4L2_CID_BRIGHTNESS).is_some(),
      supports_contrast: self.control_range(V4L2_CID_CONTRAST).is_some(),
      capture_button_visible: is_on,
      tools_layout_visible: is_on,
    }
  }
}

impl Drop for UvcCamera {
  fn drop(&mut self) {
    // 先停止取流，再释放设备
    self.stream.take();
  }
}

impl Iterator for UvcCamera {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if let Err(e) = self.start_preview() {
      error!("无法开始预览: {}", e);
      return None;
    }

    next_good_frame(|| self.capture_frame(), MAX_CONSECUTIVE_FAILURES)
  }
}

/// 跳过坏帧直到取得一帧；设备错误或连续坏帧超过 `limit` 时返回 `None`
fn next_good_frame<F>(mut capture: F, limit: usize) -> Option<Frame>
where
  F: FnMut() -> Result<Frame, UvcCameraError>,
{
  let mut failures = 0usize;
  loop {
    match capture() {
      Ok(frame) => return Some(frame),
      Err(e) if e.is_frame_glitch() && failures < limit => {
        failures += 1;
        warn!("丢弃坏帧 ({}/{}): {}", failures, limit, e);
      }
      Err(e) => {
        error!("采集帧失败: {}", e);
        return None;
      }
    }
  }
}

fn check_len(buffer: &[u8], stride: u32, height: u32) -> Result<(), UvcCameraError> {
  let expected = stride as usize * height as usize;
  if buffer.len() < expected {
    return Err(UvcCameraError::BadFrame(format!(
      "缓冲区长度 {} 小于 {}",
      buffer.len(),
      expected
    )));
  }
  Ok(())
}

/// 将 YUYV 格式转换为 RGB
pub(crate) fn yuyv_to_rgb(
  yuyv: &[u8],
  width: u32,
  height: u32,
  stride: u32,
) -> Result<RgbImage, UvcCameraError> {
  let stride = stride.max(width * 2);
  check_len(yuyv, stride, height)?;

  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for row in yuyv.chunks(stride as usize).take(height as usize) {
    for chunk in row[..(width * 2) as usize].chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }
  }

  RgbImage::from_raw(width, height, rgb)
    .ok_or_else(|| UvcCameraError::BadFrame("无法创建 RGB 图像".into()))
}

fn rgb3_to_rgb(
  data: &[u8],
  width: u32,
  height: u32,
  stride: u32,
) -> Result<RgbImage, UvcCameraError> {
  let row_len = (width * 3) as usize;
  let stride = stride.max(width * 3);
  check_len(data, stride, height)?;

  let mut rgb = Vec::with_capacity(row_len * height as usize);
  for row in data.chunks(stride as usize).take(height as usize) {
    rgb.extend_from_slice(&row[..row_len]);
  }

  RgbImage::from_raw(width, height, rgb)
    .ok_or_else(|| UvcCameraError::BadFrame("无法创建 RGB 图像".into()))
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;

  use super::*;

  fn scripted(
    answers: Vec<Result<Frame, UvcCameraError>>,
  ) -> impl FnMut() -> Result<Frame, UvcCameraError> {
    let mut answers: VecDeque<_> = answers.into();
    move || answers.pop_front().unwrap_or(Err(UvcCameraError::NotStreaming))
  }

  fn frame(index: u64) -> Frame {
    Frame::new(RgbImage::new(2, 2), index, 0)
  }

  fn glitch() -> UvcCameraError {
    UvcCameraError::BadFrame("截断的 MJPG".into())
  }

  #[test]
  fn glitched_frames_are_skipped() {
    let capture = scripted(vec![Err(glitch()), Err(glitch()), Ok(frame(7))]);
    let frame = next_good_frame(capture, MAX_CONSECUTIVE_FAILURES).unwrap();
    assert_eq!(frame.index, 7);
  }

  #[test]
  fn too_many_glitches_end_the_stream() {
    let mut answers: Vec<_> = (0..3).map(|_| Err(glitch())).collect();
    answers.push(Ok(frame(1)));
    assert!(next_good_frame(scripted(answers), 2).is_none());
  }

  #[test]
  fn device_errors_end_the_stream() {
    let capture = scripted(vec![
      Err(UvcCameraError::V4lError(std::io::Error::other("设备已拔出"))),
      Ok(frame(1)),
    ]);
    assert!(next_good_frame(capture, MAX_CONSECUTIVE_FAILURES).is_none());
    assert!(!UvcCameraError::NotStreaming.is_frame_glitch());
  }

  #[test]
  fn yuyv_grey_converts_to_grey() {
    // Y=128, U=V=128 -> 中性灰
    let data = vec![128u8; 4 * 2 * 2];
    let image = yuyv_to_rgb(&data, 4, 2, 8).unwrap();
    assert!(image.pixels().all(|p| p.0 == [128, 128, 128]));
  }

  #[test]
  fn yuyv_respects_row_padding() {
    // 每行 2 像素 = 4 字节，另有 4 字节填充
    let mut data = vec![0u8; 8 * 2];
    data[..4].copy_from_slice(&[255, 128, 255, 128]);
    data[8..12].copy_from_slice(&[0, 128, 0, 128]);
    let image = yuyv_to_rgb(&data, 2, 2, 8).unwrap();
    assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255]);
    assert_eq!(image.get_pixel(1, 1).0, [0, 0, 0]);
  }

  #[test]
  fn short_buffer_is_rejected() {
    assert!(matches!(
      yuyv_to_rgb(&[0u8; 10], 4, 2, 8),
      Err(UvcCameraError::BadFrame(_))
    ));
  }

  #[test]
  fn rgb3_copies_rows() {
    let data: Vec<u8> = (0..12).collect();
    let image = rgb3_to_rgb(&data, 2, 2, 6).unwrap();
    assert_eq!(image.get_pixel(1, 1).0, [9, 10, 11]);
  }

  #[test]
  fn camera_state_defaults_off() {
    let state = CameraState::default();
    assert!(!state.is_camera_on);
    assert!(!state.capture_button_visible);
  }
}
