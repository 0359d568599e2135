// 该文件是 Tianping （天平称量） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  model::{DetectResult, Detection},
  url_query,
};

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在图像上绘制检测框；配置了字体时同时绘制标签与置信度
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_color: LABEL_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    info!("加载字体: {}", path.as_ref().display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 读取 URL 中的 `font` 参数，没有时只画框
  pub fn from_url_query(url: &Url) -> Result<Self, DrawError> {
    match url_query(url, "font") {
      Some(path) => Self::with_font_file(path),
      None => Ok(Self::default()),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for detection in result.items.iter() {
      self.draw_detection(image, detection);
    }
  }

  pub fn draw_on_copy(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut image = image.clone();
    self.draw_detections(&mut image, result);
    image
  }

  // 边框坐标为原图像素坐标
  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let bbox = &detection.bounding_box;
    let x_min = (bbox.left.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.top.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.right.ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox.bottom.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.label_color);
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", detection.label, detection.confidence);
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, &label);
    let text_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在框上方，空间不够时贴着图像上边缘
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = (text_width as i32).min(w - label_x);

    if label_width > 0 && text_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, text_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}
