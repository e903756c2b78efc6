// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/task.rs - 分析任务
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

use std::fmt::Display;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
  annotate::{
    AnnotatedDetection, CategoryClassifier, DetectionAnnotator, KeywordClassifier, Verdict,
    summarize,
  },
  config::ConfidenceThreshold,
  model::Model,
  output::Render,
};

/// 分析状态；失败不会传递到标注阶段
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
  Completed,
  ModelUnavailable(String),
  InferenceFailure(String),
}

impl AnalysisStatus {
  pub fn is_completed(&self) -> bool {
    matches!(self, AnalysisStatus::Completed)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
  #[serde(skip)]
  pub annotated: RgbImage,
  pub detections: Vec<AnnotatedDetection>,
  pub verdict: Verdict,
  pub threshold: String,
  pub status: AnalysisStatus,
  pub analyzed_at: DateTime<Utc>,
}

impl Analysis {
  /// 没有可标注的结果：保留原图，结论为“无相关目标”
  fn without_detections(image: &RgbImage, threshold: ConfidenceThreshold, status: AnalysisStatus) -> Self {
    Self {
      annotated: image.clone(),
      detections: Vec::new(),
      verdict: Verdict::none_relevant(),
      threshold: threshold.display(),
      status,
      analyzed_at: Utc::now(),
    }
  }
}

pub struct Analyzer<C = KeywordClassifier> {
  annotator: DetectionAnnotator<C>,
  threshold: ConfidenceThreshold,
}

impl<C: CategoryClassifier> Analyzer<C> {
  pub fn new(annotator: DetectionAnnotator<C>, threshold: ConfidenceThreshold) -> Self {
    Self {
      annotator,
      threshold,
    }
  }

  pub fn threshold(&self) -> ConfidenceThreshold {
    self.threshold
  }

  pub fn analyze<M: Model>(&self, model: &M, image: &RgbImage) -> Analysis {
    let now = Instant::now();
    let result = match model.infer(image, self.threshold) {
      Ok(result) => result,
      Err(e) => {
        error!("推理失败: {}", e);
        return self.failed(image, AnalysisStatus::InferenceFailure(e.to_string()));
      }
    };
    info!(
      "推理完成，耗时: {:.2?}，检测到 {} 个对象",
      now.elapsed(),
      result.len()
    );

    let annotation = self.annotator.annotate(image, &result.items, self.threshold);
    let verdict = summarize(&annotation.detections);
    if annotation.detections.is_empty() {
      warn!("未检测到任何对象（阈值 {}）", annotation.threshold);
    }

    Analysis {
      annotated: annotation.image,
      detections: annotation.detections,
      verdict,
      threshold: annotation.threshold,
      status: AnalysisStatus::Completed,
      analyzed_at: Utc::now(),
    }
  }

  pub fn failed(&self, image: &RgbImage, status: AnalysisStatus) -> Analysis {
    Analysis::without_detections(image, self.threshold, status)
  }
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 分析一张图像
pub struct OneShotTask<C = KeywordClassifier> {
  analyzer: Analyzer<C>,
}

impl<C: CategoryClassifier> OneShotTask<C> {
  pub fn new(analyzer: Analyzer<C>) -> Self {
    Self { analyzer }
  }
}

impl<
  C: CategoryClassifier,
  E: Display,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = RgbImage>,
  M: Model,
  O: Render<RgbImage, Analysis, Error = RE>,
> Task<I, Result<M, E>, O> for OneShotTask<C>
{
  type Output = Analysis;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: Result<M, E>, output: O) -> Result<Analysis, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功: {}x{}", frame.width(), frame.height());

    let analysis = match model {
      Ok(model) => self.analyzer.analyze(&model, &frame),
      Err(e) => {
        error!("模型不可用: {}", e);
        self
          .analyzer
          .failed(&frame, AnalysisStatus::ModelUnavailable(e.to_string()))
      }
    };

    let now = Instant::now();
    output.render_result(&frame, &analysis)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(analysis)
  }
}
