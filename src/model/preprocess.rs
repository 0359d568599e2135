// 该文件是 Tianping （天平称量） 项目的一部分。
// src/model/preprocess.rs - 图像预处理
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

use std::borrow::Cow;

use image::{RgbImage, imageops::FilterType};

use crate::frame::NhwcTensor;

pub const IMAGE_MEAN: f32 = 0.0;
pub const IMAGE_STD: f32 = 255.0;

/// 将任意尺寸的图像直接缩放到 `S×S`（不保持宽高比、不加边），
/// 并把每个通道从 `[0, 255]` 线性映射到 `[0, 1]`。
pub fn preprocess<const S: u32>(image: &RgbImage) -> NhwcTensor<S, S> {
  // 调整图像大小到模型输入尺寸
  let resized: Cow<'_, RgbImage> = if image.dimensions() == (S, S) {
    Cow::Borrowed(image)
  } else {
    Cow::Owned(image::imageops::resize(image, S, S, FilterType::Triangle))
  };

  let data: Vec<f32> = resized
    .as_raw()
    .iter()
    .map(|&value| (value as f32 - IMAGE_MEAN) / IMAGE_STD)
    .collect();

  // 缩放后的缓冲区长度恒为 S * S * 3
  match NhwcTensor::try_from(data) {
    Ok(tensor) => tensor,
    Err(_) => unreachable!("缩放后的图像尺寸必为 {S}x{S}"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn values_are_normalized() {
    let mut image = RgbImage::new(4, 4);
    image.put_pixel(1, 2, Rgb([255, 0, 51]));
    let tensor = preprocess::<4>(&image);
    let [r, g, b] = tensor.pixel(1, 2);
    assert!((r - 1.0).abs() < 1e-6);
    assert_eq!(g, 0.0);
    assert!((b - 0.2).abs() < 1e-6);
  }

  #[test]
  fn arbitrary_sizes_are_resized_to_square() {
    let image = RgbImage::from_pixel(37, 11, Rgb([255, 255, 255]));
    let tensor = preprocess::<8>(&image);
    assert_eq!(tensor.as_slice().len(), 8 * 8 * 3);
    assert!(tensor.as_slice().iter().all(|&v| (v - 1.0).abs() < 1e-6));
  }

  #[test]
  fn values_stay_in_unit_range() {
    let image = RgbImage::from_fn(13, 29, |x, y| Rgb([(x * 19) as u8, (y * 7) as u8, 128]));
    let tensor = preprocess::<16>(&image);
    assert!(tensor.as_slice().iter().all(|&v| (0.0..=1.0).contains(&v)));
  }
}
