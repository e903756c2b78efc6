// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme, output::Render, task::Analysis, url_file_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录文件名已用尽: {0:?}")]
  NamesExhausted(PathBuf),
}

/// 按日期归档原图、标注图与检测记录：`folder:///dir[?always]`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(url_file_path(uri)),
      counter: AtomicU16::new(0),
      always,
    })
  }
}

/// 每行: `标签, 置信度, x1, y1, x2, y2`，最后一行为结论
pub fn record_lines(result: &Analysis) -> String {
  let mut records: Vec<String> = result
    .detections
    .iter()
    .map(|d| {
      format!(
        "{}, {:.4}, {}, {}, {}, {}",
        d.display_label,
        d.detection.confidence,
        d.detection.bbox.x1(),
        d.detection.bbox.y1(),
        d.detection.bbox.x2(),
        d.detection.bbox.y2()
      )
    })
    .collect();
  records.push(format!("# {:?}", result.verdict.outcome));
  records.join("\n")
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 以 `create_new` 占用记录文件，同名时递增序号，不覆盖已有记录
  fn claim_record(&self) -> Result<(PathBuf, File), DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let time = now.format("%H-%M-%S-%3f");
    for _ in 0..=u16::MAX {
      let stem = directory.join(format!("{}-{:04X}", time, self.frame_id()));
      match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(stem.with_extension("txt"))
      {
        Ok(file) => return Ok((stem, file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e.into()),
      }
    }
    Err(DirectoryRecordOutputError::NamesExhausted(directory))
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }
}

impl Render<RgbImage, Analysis> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &Analysis) -> Result<(), Self::Error> {
    if !self.always && result.detections.is_empty() {
      return Ok(());
    }
    let (stem, mut record) = self.claim_record()?;
    record.write_all(record_lines(result).as_bytes())?;
    frame.save(stem.with_extension("png"))?;
    result
      .annotated
      .save(stem.with_file_name(format!("{}-annotated.png", file_stem(&stem))))?;
    info!("记录分析结果: {:?}", stem);
    Ok(())
  }
}

fn file_stem(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default()
}
