// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/input.rs - 上传图像解码与预处理
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

use std::io::Cursor;

use clap::ValueEnum;
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{
  IMAGE_SIZE,
  tensor::{RgbNhwcTensor, TensorShapeError},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("uploaded file is empty")]
  EmptyUpload,
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid image: {0}")]
  Decode(#[from] image::ImageError),
  #[error("resized image does not fit the model input: {0}")]
  Shape(#[from] TensorShapeError),
}

/// 一次上传的文件
#[derive(Debug, Clone, Default)]
pub struct Upload {
  pub filename: String,
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      filename: filename.into(),
      content_type: None,
      bytes: bytes.into(),
    }
  }

  pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
    self.content_type = content_type;
    self
  }
}

/// 缩放插值方式，需要与训练时一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResizeFilter {
  Nearest,
  #[value(alias = "bilinear")]
  Triangle,
  #[default]
  #[value(alias = "bicubic")]
  CatmullRom,
  Gaussian,
  Lanczos3,
}

impl From<ResizeFilter> for FilterType {
  fn from(filter: ResizeFilter) -> Self {
    match filter {
      ResizeFilter::Nearest => FilterType::Nearest,
      ResizeFilter::Triangle => FilterType::Triangle,
      ResizeFilter::CatmullRom => FilterType::CatmullRom,
      ResizeFilter::Gaussian => FilterType::Gaussian,
      ResizeFilter::Lanczos3 => FilterType::Lanczos3,
    }
  }
}

/// 把任意上传图像转换为 `[1, H, W, 3]` 张量
///
/// 不保持长宽比，直接拉伸到目标尺寸。没有内部可变状态，可以在多个请求间复制共享。
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor<const W: u32, const H: u32> {
  filter: ResizeFilter,
}

pub type StreetPreprocessor = ImagePreprocessor<IMAGE_SIZE, IMAGE_SIZE>;

impl<const W: u32, const H: u32> ImagePreprocessor<W, H> {
  pub fn new(filter: ResizeFilter) -> Self {
    Self { filter }
  }

  pub fn filter(&self) -> ResizeFilter {
    self.filter
  }

  pub fn decode(&self, upload: &Upload) -> Result<DynamicImage, PreprocessError> {
    if upload.bytes.is_empty() {
      return Err(PreprocessError::EmptyUpload);
    }

    let mut reader = ImageReader::new(Cursor::new(upload.bytes.as_slice())).with_guessed_format()?;
    if reader.format().is_none()
      && let Some(format) = upload
        .content_type
        .as_deref()
        .and_then(ImageFormat::from_mime_type)
    {
      debug!("无法从内容识别格式，按声明类型 {:?} 解码", format);
      reader.set_format(format);
    }

    Ok(reader.decode()?)
  }

  pub fn preprocess(&self, upload: &Upload) -> Result<RgbNhwcTensor<W, H>, PreprocessError> {
    let image = self.decode(upload)?;
    debug!(
      "解码 {}: {}x{} {:?}",
      upload.filename,
      image.width(),
      image.height(),
      image.color()
    );

    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, W, H, self.filter.into());

    Ok(RgbNhwcTensor::try_from(&resized)?)
  }
}
