// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
use std::path::Path;

use image::{ImageFormat, ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_file_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Unsupported image format: {0}")]
  UnsupportedFormat(String),
  #[error("Empty image: {0}x{1}")]
  EmptyImage(u32, u32),
}

/// 仅接受 JPEG 与 PNG
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn check_format(format: ImageFormat) -> Result<ImageFormat, ImageFileInputError> {
  match format {
    ImageFormat::Jpeg | ImageFormat::Png => Ok(format),
    other => Err(ImageFileInputError::UnsupportedFormat(format!("{:?}", other))),
  }
}

fn check_extension(path: &Path) -> Result<ImageFormat, ImageFileInputError> {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_lowercase)
    .unwrap_or_default();
  if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
    return Err(ImageFileInputError::UnsupportedFormat(ext));
  }
  ImageFormat::from_extension(&ext)
    .ok_or(ImageFileInputError::UnsupportedFormat(ext))
    .and_then(check_format)
}

fn check_dimensions(image: RgbImage) -> Result<RgbImage, ImageFileInputError> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(ImageFileInputError::EmptyImage(width, height));
  }
  Ok(image)
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }
    Self::open(Path::new(&url_file_path(url)))
  }
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, ImageFileInputError> {
    let format = check_extension(path)?;
    debug!("读取图像文件: {:?} ({:?})", path, format);
    let mut reader = ImageReader::open(path)?;
    reader.set_format(format);
    let image = check_dimensions(reader.decode()?.to_rgb8())?;
    Ok(Self { image: Some(image) })
  }

  /// 上传的图像内容，格式由内容判断
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageFileInputError> {
    let format = check_format(image::guess_format(bytes)?)?;
    debug!("读取上传图像: {} 字节 ({:?})", bytes.len(), format);
    let mut reader = ImageReader::new(Cursor::new(bytes));
    reader.set_format(format);
    let image = check_dimensions(reader.decode()?.to_rgb8())?;
    Ok(Self { image: Some(image) })
  }

  pub fn from_image(image: RgbImage) -> Result<Self, ImageFileInputError> {
    Ok(Self {
      image: Some(check_dimensions(image)?),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;
  use tempfile::tempdir;

  #[test]
  fn reads_png_by_url() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bac.png");
    RgbImage::from_pixel(8, 6, Rgb([1, 2, 3])).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let image = input.next().unwrap();
    assert_eq!(image.dimensions(), (8, 6));
    assert_eq!(image.get_pixel(0, 0), &Rgb([1, 2, 3]));
    assert!(input.next().is_none());
  }

  #[test]
  fn rejects_unsupported_extension() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bac.bmp");
    assert!(matches!(
      ImageFileInput::open(&path),
      Err(ImageFileInputError::UnsupportedFormat(_))
    ));
  }

  #[test]
  fn rejects_wrong_scheme() {
    let url = Url::parse("video:///tmp/bac.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn reads_uploaded_jpeg_bytes() {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(16, 16, Rgb([200, 200, 200]))
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
      .unwrap();
    let image = ImageFileInput::from_bytes(&bytes).unwrap().next().unwrap();
    assert_eq!(image.dimensions(), (16, 16));
  }

  #[test]
  fn rejects_uploaded_gif_bytes() {
    let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";
    assert!(matches!(
      ImageFileInput::from_bytes(gif),
      Err(ImageFileInputError::UnsupportedFormat(_))
    ));
  }

  #[test]
  fn rejects_empty_image() {
    assert!(matches!(
      ImageFileInput::from_image(RgbImage::new(0, 3)),
      Err(ImageFileInputError::EmptyImage(0, 3))
    ));
  }
}
