// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/output.rs - 输出定义
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, task::Analysis};

pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

mod console;
pub use self::console::{ConsoleOutput, format_report};

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, record_lines};

#[cfg(feature = "json_report")]
mod json_report;
#[cfg(feature = "json_report")]
pub use self::json_report::{JsonReportError, JsonReportOutput, to_json};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[cfg(feature = "json_report")]
  #[error("JSON 报告输出错误: {0}")]
  JsonReportError(#[from] JsonReportError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl From<std::convert::Infallible> for OutputError {
  fn from(e: std::convert::Infallible) -> Self {
    match e {}
  }
}

pub enum OutputWrapper {
  Console(ConsoleOutput),
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  #[cfg(feature = "json_report")]
  JsonReportOutput(JsonReportOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => Ok(OutputWrapper::Console(ConsoleOutput::from_url(url)?)),
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      #[cfg(feature = "json_report")]
      JsonReportOutput::SCHEME => {
        let output = JsonReportOutput::from_url(url)?;
        Ok(OutputWrapper::JsonReportOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render<RgbImage, Analysis> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &Analysis) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Console(output) => Ok(output.render_result(frame, result)?),
      OutputWrapper::SaveImageFileOutput(output) => Ok(output.render_result(frame, result)?),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => Ok(output.render_result(frame, result)?),
      #[cfg(feature = "json_report")]
      OutputWrapper::JsonReportOutput(output) => Ok(output.render_result(frame, result)?),
    }
  }
}

/// 依次渲染到多个输出
impl<R: Render<RgbImage, Analysis, Error = OutputError>> Render<RgbImage, Analysis> for Vec<R> {
  type Error = OutputError;

  fn render_result(&self, frame: &RgbImage, result: &Analysis) -> Result<(), Self::Error> {
    for output in self {
      output.render_result(frame, result)?;
    }
    Ok(())
  }
}
