// 该文件是 Tianping （天平称量） 项目的一部分。
// src/frame.rs - 帧与 NHWC 张量定义
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

use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// 输入源产生的一帧图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据（原始尺寸）
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

#[derive(Error, Debug)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct TensorShapeError {
  pub expected: usize,
  pub actual: usize,
}

/// 行优先的 `[H, W, 3]` 浮点张量，batch 维度固定为 1
#[derive(Debug, Clone)]
pub struct NhwcTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> NhwcTensor<W, H> {
  pub const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 张量形状 `[1, H, W, C]`
  pub fn shape(&self) -> [usize; 4] {
    [1, H as usize, W as usize, RGB_CHANNELS]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 转置后的 `[1, C, H, W]` 形状
  pub fn nchw_shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, H as usize, W as usize]
  }

  /// 按通道平面重排为 NCHW 数据
  pub fn to_nchw(&self) -> Vec<f32> {
    let plane = W as usize * H as usize;
    let mut nchw = vec![0.0f32; Self::LEN];
    for (idx, pixel) in self.data.chunks_exact(RGB_CHANNELS).enumerate() {
      for (c, &value) in pixel.iter().enumerate() {
        nchw[c * plane + idx] = value;
      }
    }
    nchw
  }

  /// 读取 `(x, y)` 像素的 RGB 值
  pub fn pixel(&self, x: usize, y: usize) -> [f32; 3] {
    let idx = (y * W as usize + x) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for NhwcTensor<W, H> {
  type Error = TensorShapeError;

  fn try_from(data: Vec<f32>) -> Result<Self, Self::Error> {
    if data.len() != Self::LEN {
      return Err(TensorShapeError {
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for NhwcTensor<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0.0f32; Self::LEN].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> AsRef<[f32]> for NhwcTensor<W, H> {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nchw_groups_channels_into_planes() {
    // 2x2 图像，像素 i 的 RGB 为 (i, 10 + i, 20 + i)
    let data: Vec<f32> = (0..4)
      .flat_map(|i| [i as f32, 10.0 + i as f32, 20.0 + i as f32])
      .collect();
    let tensor = NhwcTensor::<2, 2>::try_from(data).unwrap();

    assert_eq!(tensor.nchw_shape(), [1, 3, 2, 2]);
    assert_eq!(
      tensor.to_nchw(),
      vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0, 20.0, 21.0, 22.0, 23.0]
    );
  }

  #[test]
  fn tensor_rejects_wrong_length() {
    let err = NhwcTensor::<4, 2>::try_from(vec![0.0; 10]).unwrap_err();
    assert_eq!(err.expected, 24);
    assert_eq!(err.actual, 10);
  }

  #[test]
  fn tensor_pixel_is_row_major() {
    let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
    let tensor = NhwcTensor::<4, 2>::try_from(data).unwrap();
    assert_eq!(tensor.shape(), [1, 2, 4, 3]);
    // 第二行第一个像素: (1 * 4 + 0) * 3 = 12
    assert_eq!(tensor.pixel(0, 1), [12.0, 13.0, 14.0]);
  }
}
