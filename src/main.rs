// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use poubelle::{
  FromUrl,
  annotate::DetectionAnnotator,
  config::{AnalyzerConfig, ThresholdBounds},
  input::InputWrapper,
  model::{Model, ModelStore, YoloV8Loader},
  output::OutputWrapper,
  task::{Analyzer, OneShotTask, Task},
};

use crate::args::{AnalyzeArgs, Args, Command, ModelArgs, ReplaceModelArgs};

fn model_store(args: &ModelArgs) -> ModelStore<YoloV8Loader> {
  let loader = YoloV8Loader {
    classes_path: args.classes.clone(),
    iou_threshold: args.iou,
  };
  ModelStore::new(loader, args.default_model.clone(), args.model_dir.clone())
}

fn analyze(args: AnalyzeArgs) -> Result<()> {
  info!("输入来源: {}", args.input);
  for output in &args.output {
    info!("输出路径: {}", output);
  }

  let bounds = ThresholdBounds::new(
    args.min_confidence,
    args.max_confidence,
    args.default_confidence,
  )
  .context("置信度阈值范围无效")?;
  let config = AnalyzerConfig::new(bounds, args.confidence, args.model.iou, args.font.clone())
    .context("分析参数无效")?;
  info!("置信度阈值: {}", config.confidence.display());

  let draw = config
    .draw()
    .with_context(|| format!("无法加载字体 {:?}", config.font))?;

  let input = InputWrapper::from_url(&args.input)?;
  let outputs = args
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<Vec<_>, _>>()?;

  let store = model_store(&args.model);
  let task = OneShotTask::new(Analyzer::new(
    DetectionAnnotator::new(draw),
    config.confidence,
  ));
  let analysis = task.run_task(input, store.resolve(), outputs)?;

  info!(
    "分析完成: {} 个检测结果，结论: {}",
    analysis.detections.len(),
    analysis.verdict.conclusion()
  );
  Ok(())
}

fn replace_model(args: ReplaceModelArgs) -> Result<()> {
  let store = model_store(&args.model);
  let handle = store
    .replace_model_from_file(&args.weights)
    .with_context(|| format!("无法替换模型 {:?}", args.weights))?;
  info!(
    "当前模型: {:?}，共 {} 个类别",
    handle.identity().path,
    handle.class_names().len()
  );
  Ok(())
}

fn classes(args: ModelArgs) -> Result<()> {
  let store = model_store(&args);
  let model = store.resolve()?;
  info!("模型路径: {:?}", model.identity().path);
  for (id, name) in model.class_names().iter() {
    println!("{}: {}", id, name);
  }
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  match args.command {
    Command::Analyze(args) => analyze(args),
    Command::ReplaceModel(args) => replace_model(args),
    Command::Classes(args) => classes(args),
  }
}
