// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/config.rs - 分析参数配置
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

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::output::draw::{Draw, DrawError};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.01;
pub const DEFAULT_MAX_CONFIDENCE: f32 = 1.0;
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("阈值超出 [0, 1] 范围: {0}")]
  OutOfUnitRange(f32),
  #[error("阈值下界 {min} 大于上界 {max}")]
  InvertedBounds { min: f32, max: f32 },
}

/// 置信度阈值的可调范围
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdBounds {
  min: f32,
  max: f32,
  default: f32,
}

impl Default for ThresholdBounds {
  fn default() -> Self {
    Self {
      min: DEFAULT_MIN_CONFIDENCE,
      max: DEFAULT_MAX_CONFIDENCE,
      default: DEFAULT_CONFIDENCE,
    }
  }
}

fn check_unit(value: f32) -> Result<f32, ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ConfigError::OutOfUnitRange(value))
  }
}

impl ThresholdBounds {
  /// 默认值会被收敛到 [min, max] 之内
  pub fn new(min: f32, max: f32, default: f32) -> Result<Self, ConfigError> {
    let min = check_unit(min)?;
    let max = check_unit(max)?;
    let default = check_unit(default)?;
    if min > max {
      return Err(ConfigError::InvertedBounds { min, max });
    }
    Ok(Self {
      min,
      max,
      default: default.clamp(min, max),
    })
  }

  pub fn min(&self) -> f32 {
    self.min
  }

  pub fn max(&self) -> f32 {
    self.max
  }

  pub fn default_threshold(&self) -> ConfidenceThreshold {
    ConfidenceThreshold(self.default)
  }

  /// 将用户请求的阈值收敛到范围内；NaN 视为未指定
  pub fn clamp(&self, requested: f32) -> ConfidenceThreshold {
    if requested.is_nan() {
      warn!("置信度阈值为 NaN，使用默认值 {}", self.default);
      return self.default_threshold();
    }
    let clamped = requested.clamp(self.min, self.max);
    if clamped != requested {
      warn!("置信度阈值 {} 超出范围，已调整为 {}", requested, clamped);
    }
    ConfidenceThreshold(clamped)
  }

  pub fn resolve(&self, requested: Option<f32>) -> ConfidenceThreshold {
    match requested {
      Some(value) => self.clamp(value),
      None => self.default_threshold(),
    }
  }
}

/// 已经过范围检查的置信度阈值
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
  pub fn value(&self) -> f32 {
    self.0
  }

  /// 展示用格式，保留三位小数
  pub fn display(&self) -> String {
    format!("{:.3}", self.0)
  }
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    ConfidenceThreshold(DEFAULT_CONFIDENCE)
  }
}

/// 一次分析所需的全部参数
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
  pub bounds: ThresholdBounds,
  pub confidence: ConfidenceThreshold,
  pub iou_threshold: f32,
  pub font: Option<PathBuf>,
}

impl AnalyzerConfig {
  /// 请求的阈值被收敛到 `bounds` 之内；IOU 阈值须在 [0, 1]
  pub fn new(
    bounds: ThresholdBounds,
    requested: Option<f32>,
    iou_threshold: f32,
    font: Option<PathBuf>,
  ) -> Result<Self, ConfigError> {
    Ok(Self {
      bounds,
      confidence: bounds.resolve(requested),
      iou_threshold: check_unit(iou_threshold)?,
      font,
    })
  }

  /// 指定字体文件时使用该字体，否则使用内嵌字体
  pub fn draw(&self) -> Result<Draw, DrawError> {
    match &self.font {
      Some(path) => Draw::with_font_file(path),
      None => Ok(Draw::default()),
    }
  }
}

impl Default for AnalyzerConfig {
  fn default() -> Self {
    let bounds = ThresholdBounds::default();
    Self {
      bounds,
      confidence: bounds.default_threshold(),
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      font: None,
    }
  }
}
