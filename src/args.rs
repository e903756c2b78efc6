// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

use poubelle::config::{
  DEFAULT_CONFIDENCE, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_CONFIDENCE, DEFAULT_MIN_CONFIDENCE,
};

/// Poubelle 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 分析一张图像，判断垃圾桶满或空
  Analyze(AnalyzeArgs),
  /// 替换当前使用的模型权重
  ReplaceModel(ReplaceModelArgs),
  /// 打印当前模型的类别表
  Classes(ModelArgs),
}

/// 模型来源
#[derive(ClapArgs, Debug)]
pub struct ModelArgs {
  /// 内置默认模型（ONNX）
  #[arg(long, value_name = "FILE")]
  pub default_model: Option<PathBuf>,

  /// 存放上传模型的目录
  #[arg(long, value_name = "DIR", default_value = "models")]
  pub model_dir: PathBuf,

  /// 类别名文件，每行一个类别
  #[arg(long, value_name = "FILE")]
  pub classes: Option<PathBuf>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub iou: f32,
}

#[derive(ClapArgs, Debug)]
pub struct AnalyzeArgs {
  /// 输入来源，例如 image:///tmp/bac.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出目标，可重复：console://, image:///out.png, json:///out.json, folder:///records
  #[arg(long, value_name = "OUTPUT", default_value = "console://")]
  pub output: Vec<Url>,

  /// 置信度阈值，超出范围时截断
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 允许的最小置信度阈值
  #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE, value_name = "THRESHOLD")]
  pub min_confidence: f32,

  /// 允许的最大置信度阈值
  #[arg(long, default_value_t = DEFAULT_MAX_CONFIDENCE, value_name = "THRESHOLD")]
  pub max_confidence: f32,

  /// 默认置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub default_confidence: f32,

  /// 标签字体（TTF/OTF），不提供时使用内嵌字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[command(flatten)]
  pub model: ModelArgs,
}

#[derive(ClapArgs, Debug)]
pub struct ReplaceModelArgs {
  /// 新的模型权重文件
  #[arg(long, value_name = "FILE")]
  pub weights: PathBuf,

  #[command(flatten)]
  pub model: ModelArgs,
}
