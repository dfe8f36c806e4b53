// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/tensor.rs - NHWC 输入张量定义
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

#[derive(Error, Debug, PartialEq, Eq)]
#[error("tensor length mismatch: expected {expected}, got {actual}")]
pub struct TensorShapeError {
  pub expected: usize,
  pub actual: usize,
}

/// 形状为 `[1, H, W, 3]` 的归一化 RGB 张量，取值范围 `[0.0, 1.0]`
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> RgbNhwcTensor<W, H> {
  pub const SHAPE: [usize; 4] = [1, H as usize, W as usize, RGB_CHANNELS];
  pub const LEN: usize = H as usize * W as usize * RGB_CHANNELS;

  pub fn shape(&self) -> [usize; 4] {
    Self::SHAPE
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcTensor<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0.0f32; Self::LEN].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f32>> for RgbNhwcTensor<W, H> {
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

/// 按行优先顺序展开像素，每个通道除以 255
impl<const W: u32, const H: u32> TryFrom<&RgbImage> for RgbNhwcTensor<W, H> {
  type Error = TensorShapeError;

  fn try_from(image: &RgbImage) -> Result<Self, Self::Error> {
    let data = image
      .as_raw()
      .iter()
      .map(|&value| f32::from(value) / 255.0)
      .collect::<Vec<_>>();
    Self::try_from(data)
  }
}
