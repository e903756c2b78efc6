// 该文件是 Poubelle （垃圾桶满溢检测） 项目的一部分。
// src/model/store.rs - 模型权重存储与缓存
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

use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConfidenceThreshold;
use crate::model::{ClassNames, DetectResult, Model, ModelLoader};

/// 操作员上传的替换权重文件名
pub const REPLACEMENT_FILE_NAME: &str = "uploaded_model.onnx";
const STAGING_PREFIX: &str = ".uploaded_model";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 每次替换使用独立的临时文件，跨进程也不会互相覆盖
fn staging_file_name() -> String {
  format!(
    "{}.{}.{}.partial",
    STAGING_PREFIX,
    std::process::id(),
    STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
  )
}

#[derive(Error, Debug)]
pub enum ModelStoreError {
  #[error("没有可用的模型: 默认权重 {default:?} 与上传权重 {replacement:?} 均不存在")]
  ModelUnavailable {
    default: Option<PathBuf>,
    replacement: PathBuf,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("模型加载失败 {path:?}: {source}")]
  LoadFailed {
    path: PathBuf,
    source: Box<dyn std::error::Error + Send + Sync>,
  },
  #[error("模型缓存锁已损坏")]
  LockPoisoned,
}

/// 权重文件身份：路径、修改时间与大小
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
  pub path: PathBuf,
  pub modified: SystemTime,
  pub len: u64,
}

impl ModelIdentity {
  pub fn of(path: &Path) -> io::Result<Self> {
    let metadata = fs::metadata(path)?;
    Ok(Self {
      path: path.to_path_buf(),
      modified: metadata.modified()?,
      len: metadata.len(),
    })
  }
}

/// 已加载模型的只读句柄，克隆开销为一次引用计数
#[derive(Debug)]
pub struct ModelHandle<M> {
  model: Arc<M>,
  identity: Arc<ModelIdentity>,
}

impl<M> Clone for ModelHandle<M> {
  fn clone(&self) -> Self {
    Self {
      model: Arc::clone(&self.model),
      identity: Arc::clone(&self.identity),
    }
  }
}

impl<M> ModelHandle<M> {
  pub fn new(model: M, identity: ModelIdentity) -> Self {
    Self {
      model: Arc::new(model),
      identity: Arc::new(identity),
    }
  }

  pub fn identity(&self) -> &ModelIdentity {
    &self.identity
  }

  /// 两个句柄是否指向同一次加载的模型
  pub fn same_model(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.model, &other.model)
  }
}

impl<M> Deref for ModelHandle<M> {
  type Target = M;

  fn deref(&self) -> &Self::Target {
    &self.model
  }
}

impl<M: Model> Model for ModelHandle<M> {
  type Error = M::Error;

  fn infer(
    &self,
    image: &RgbImage,
    confidence: ConfidenceThreshold,
  ) -> Result<DetectResult, Self::Error> {
    self.model.infer(image, confidence)
  }

  fn class_names(&self) -> &ClassNames {
    self.model.class_names()
  }
}

/// 同一时刻只有一个活动模型；替换对调用者是原子的
pub struct ModelStore<L: ModelLoader> {
  loader: L,
  default_path: Option<PathBuf>,
  model_dir: PathBuf,
  active: RwLock<Option<ModelHandle<L::Model>>>,
}

impl<L: ModelLoader> ModelStore<L> {
  pub fn new(loader: L, default_path: Option<PathBuf>, model_dir: PathBuf) -> Self {
    Self {
      loader,
      default_path,
      model_dir,
      active: RwLock::new(None),
    }
  }

  pub fn replacement_path(&self) -> PathBuf {
    self.model_dir.join(REPLACEMENT_FILE_NAME)
  }

  /// 优先使用上传的权重，其次是内置默认权重
  pub fn resolve_path(&self) -> Result<PathBuf, ModelStoreError> {
    let replacement = self.replacement_path();
    if replacement.is_file() {
      return Ok(replacement);
    }
    if let Some(default) = &self.default_path
      && default.is_file()
    {
      return Ok(default.clone());
    }
    Err(ModelStoreError::ModelUnavailable {
      default: self.default_path.clone(),
      replacement,
    })
  }

  pub fn resolve(&self) -> Result<ModelHandle<L::Model>, ModelStoreError> {
    let path = self.resolve_path()?;
    let identity = ModelIdentity::of(&path)?;

    {
      let active = self
        .active
        .read()
        .map_err(|_| ModelStoreError::LockPoisoned)?;
      if let Some(handle) = active.as_ref()
        && *handle.identity() == identity
      {
        debug!("命中模型缓存: {:?}", identity.path);
        return Ok(handle.clone());
      }
    }

    let mut active = self
      .active
      .write()
      .map_err(|_| ModelStoreError::LockPoisoned)?;
    if let Some(handle) = active.as_ref()
      && *handle.identity() == identity
    {
      return Ok(handle.clone());
    }

    info!("加载模型文件: {:?}", path);
    let model = self.load(&path)?;
    let handle = ModelHandle::new(model, identity);
    *active = Some(handle.clone());
    info!("模型加载完成");
    Ok(handle)
  }

  /// 替换上传的权重。新权重加载失败时保留原有模型。
  pub fn replace_model(&self, new_weights: &[u8]) -> Result<ModelHandle<L::Model>, ModelStoreError> {
    let mut active = self
      .active
      .write()
      .map_err(|_| ModelStoreError::LockPoisoned)?;

    fs::create_dir_all(&self.model_dir)?;
    let staging = self.model_dir.join(staging_file_name());
    let target = self.replacement_path();

    debug!(
      "写入新权重: {:.2} MB",
      new_weights.len() as f64 / (1024.0 * 1024.0)
    );
    if let Err(e) = fs::write(&staging, new_weights) {
      let _ = fs::remove_file(&staging);
      return Err(e.into());
    }

    let model = match self.load(&staging) {
      Ok(model) => model,
      Err(e) => {
        warn!("新权重无法加载，保留当前模型: {}", e);
        if let Err(rm) = fs::remove_file(&staging) {
          warn!("无法删除临时权重文件 {:?}: {}", staging, rm);
        }
        return Err(e);
      }
    };

    fs::rename(&staging, &target)?;
    let handle = ModelHandle::new(model, ModelIdentity::of(&target)?);
    *active = Some(handle.clone());
    info!("模型已替换: {:?}", target);
    Ok(handle)
  }

  pub fn replace_model_from_file(
    &self,
    weights: &Path,
  ) -> Result<ModelHandle<L::Model>, ModelStoreError> {
    let bytes = fs::read(weights)?;
    self.replace_model(&bytes)
  }

  /// 删除上传的权重，回退到默认权重
  pub fn remove_replacement(&self) -> Result<(), ModelStoreError> {
    let mut active = self
      .active
      .write()
      .map_err(|_| ModelStoreError::LockPoisoned)?;
    let target = self.replacement_path();
    if target.is_file() {
      fs::remove_file(&target)?;
      info!("已删除上传的权重: {:?}", target);
    }
    *active = None;
    Ok(())
  }

  pub fn invalidate(&self) -> Result<(), ModelStoreError> {
    let mut active = self
      .active
      .write()
      .map_err(|_| ModelStoreError::LockPoisoned)?;
    *active = None;
    Ok(())
  }

  pub fn active_identity(&self) -> Option<ModelIdentity> {
    self
      .active
      .read()
      .ok()
      .and_then(|active| active.as_ref().map(|handle| handle.identity().clone()))
  }

  fn load(&self, path: &Path) -> Result<L::Model, ModelStoreError> {
    self
      .loader
      .load(path)
      .map_err(|e| ModelStoreError::LoadFailed {
        path: path.to_path_buf(),
        source: Box::new(e),
      })
  }
}
