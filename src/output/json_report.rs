// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/output/json_report.rs - JSON 分析报告
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, task::Analysis, url_file_path};

#[derive(Error, Debug)]
pub enum JsonReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerdeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

#[derive(Serialize)]
struct Report<'a> {
  width: u32,
  height: u32,
  #[serde(flatten)]
  analysis: &'a Analysis,
}

/// `json:///path/report.json`，`?pretty` 输出带缩进的 JSON
pub struct JsonReportOutput {
  path: PathBuf,
  pretty: bool,
}

impl FromUrlWithScheme for JsonReportOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonReportOutput {
  type Error = JsonReportError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonReportError::SchemeMismatch);
    }
    Ok(Self {
      path: PathBuf::from(url_file_path(uri)),
      pretty: uri.query_pairs().any(|(k, _)| k == "pretty"),
    })
  }
}

pub fn to_json(frame: &RgbImage, analysis: &Analysis, pretty: bool) -> Result<String, serde_json::Error> {
  let report = Report {
    width: frame.width(),
    height: frame.height(),
    analysis,
  };
  if pretty {
    serde_json::to_string_pretty(&report)
  } else {
    serde_json::to_string(&report)
  }
}

impl Render<RgbImage, Analysis> for JsonReportOutput {
  type Error = JsonReportError;

  fn render_result(&self, frame: &RgbImage, result: &Analysis) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(&self.path)?);
    writer.write_all(to_json(frame, result, self.pretty)?.as_bytes())?;
    writer.flush()?;
    info!("保存分析报告: {:?}", self.path);
    Ok(())
  }
}
