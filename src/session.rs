// 该文件是 Kanjian （看见） 项目的一部分。
// src/session.rs - 推理会话管理
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{Tensor, TensorMap},
};

#[cfg(feature = "onnxruntime")]
mod onnx;
#[cfg(feature = "onnxruntime")]
pub use self::onnx::OnnxRuntimeFactory;

/// 执行后端标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionProvider {
  Cuda,
  TensorRt,
  CoreMl,
  Cpu,
}

/// 默认先尝试 GPU 加速后端，再回退到 CPU
pub const DEFAULT_PROVIDERS: [ExecutionProvider; 2] =
  [ExecutionProvider::Cuda, ExecutionProvider::Cpu];

impl fmt::Display for ExecutionProvider {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ExecutionProvider::Cuda => "cuda",
      ExecutionProvider::TensorRt => "tensorrt",
      ExecutionProvider::CoreMl => "coreml",
      ExecutionProvider::Cpu => "cpu",
    };
    f.write_str(name)
  }
}

impl FromStr for ExecutionProvider {
  type Err = ModelSpecError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
      "tensorrt" | "trt" => Ok(ExecutionProvider::TensorRt),
      "coreml" => Ok(ExecutionProvider::CoreMl),
      "cpu" => Ok(ExecutionProvider::Cpu),
      other => Err(ModelSpecError::UnknownProvider(other.to_string())),
    }
  }
}

/// 图优化级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphOptimization {
  Disabled,
  Basic,
  Extended,
  #[default]
  All,
}

impl FromStr for GraphOptimization {
  type Err = ModelSpecError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "disabled" | "none" => Ok(GraphOptimization::Disabled),
      "basic" => Ok(GraphOptimization::Basic),
      "extended" => Ok(GraphOptimization::Extended),
      "all" => Ok(GraphOptimization::All),
      other => Err(ModelSpecError::UnknownOptimization(other.to_string())),
    }
  }
}

/// 会话构建参数，对每个后端的尝试都相同
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
  pub optimization: GraphOptimization,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
  pub fn new(message: impl Into<String>) -> Self {
    BackendError(message.into())
  }
}

/// 已在某个执行后端上构建好的推理会话
pub trait Backend: Send + Sync {
  fn input_names(&self) -> &[String];
  fn output_names(&self) -> &[String];
  fn run(&self, inputs: TensorMap) -> BoxFuture<'_, Result<TensorMap, BackendError>>;
}

/// 在指定执行后端上加载模型
pub trait BackendFactory: Send + Sync {
  fn open(
    &self,
    model: &Path,
    provider: ExecutionProvider,
    options: &SessionOptions,
  ) -> Result<Box<dyn Backend>, BackendError>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelSpecError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("模型路径为空")]
  EmptyPath,
  #[error("未知的执行后端: {0}")]
  UnknownProvider(String),
  #[error("未知的图优化级别: {0}")]
  UnknownOptimization(String),
}

/// 模型文件及其后端偏好顺序
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
  path: PathBuf,
  providers: Vec<ExecutionProvider>,
  options: SessionOptions,
}

impl ModelSpec {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self {
      path: path.into(),
      providers: DEFAULT_PROVIDERS.to_vec(),
      options: SessionOptions::default(),
    }
  }

  pub fn with_providers<I: IntoIterator<Item = ExecutionProvider>>(mut self, providers: I) -> Self {
    self.providers = providers.into_iter().collect();
    self
  }

  pub fn with_options(mut self, options: SessionOptions) -> Self {
    self.options = options;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn providers(&self) -> &[ExecutionProvider] {
    &self.providers
  }

  pub fn options(&self) -> &SessionOptions {
    &self.options
  }
}

impl FromUrlWithScheme for ModelSpec {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for ModelSpec {
  type Error = ModelSpecError;

  /// 例如 `onnx:///assets/models/yolov8n.onnx?providers=cuda,cpu&optimization=all`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelSpecError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    let path = url.path();
    if path.is_empty() || path == "/" {
      return Err(ModelSpecError::EmptyPath);
    }

    let mut spec = ModelSpec::new(path);
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "providers" => {
          spec.providers = value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(ExecutionProvider::from_str)
            .collect::<Result<_, _>>()?;
        }
        "optimization" => spec.options.optimization = value.parse()?,
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }

    Ok(spec)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
  pub provider: ExecutionProvider,
  pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
  #[error("所有执行后端均加载失败: {}", .model.display())]
  AllProvidersFailed {
    model: PathBuf,
    attempts: Vec<ProviderFailure>,
  },
}

impl LoadError {
  /// 面向用户的诊断信息，列出最可能的三个原因
  pub fn diagnostic(&self) -> String {
    match self {
      LoadError::AllProvidersFailed { model, attempts } => {
        let providers = attempts
          .iter()
          .map(|a| a.provider.to_string())
          .collect::<Vec<_>>()
          .join(" / ");
        format!(
          "无法加载物体识别模型，请确认：\n\n1. 模型文件 {} 存在\n2. 当前设备支持 {} 中至少一种执行后端\n3. 网络连接正常，可以下载所需的运行库文件",
          model.display(),
          if providers.is_empty() {
            "任何".to_string()
          } else {
            providers
          }
        )
      }
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferError {
  #[error("推理后端错误: {0}")]
  BackendFailure(String),
  #[error("没有已加载的模型会话")]
  NoActiveSession,
  #[error("模型没有声明输入")]
  MissingInputName,
}

impl From<BackendError> for InferError {
  fn from(err: BackendError) -> Self {
    InferError::BackendFailure(err.0)
  }
}

/// 绑定到一个模型文件和一个执行后端的会话
pub struct ModelSession {
  model: PathBuf,
  provider: ExecutionProvider,
  backend: Box<dyn Backend>,
}

impl fmt::Debug for ModelSession {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ModelSession")
      .field("model", &self.model)
      .field("provider", &self.provider)
      .field("inputs", &self.backend.input_names())
      .field("outputs", &self.backend.output_names())
      .finish()
  }
}

impl ModelSession {
  pub fn model(&self) -> &Path {
    &self.model
  }

  pub fn provider(&self) -> ExecutionProvider {
    self.provider
  }

  pub fn input_names(&self) -> &[String] {
    self.backend.input_names()
  }

  pub fn output_names(&self) -> &[String] {
    self.backend.output_names()
  }

  /// 以会话声明的第一个输入名提交单个张量
  pub async fn infer_single(&self, input: Tensor) -> Result<TensorMap, InferError> {
    let name = self
      .input_names()
      .first()
      .ok_or(InferError::MissingInputName)?
      .clone();
    debug!("输入名: {}", name);
    self.infer(TensorMap::from([(name, input)])).await
  }

  /// 每次调用都是独立的请求，不缓存结果
  pub async fn infer(&self, inputs: TensorMap) -> Result<TensorMap, InferError> {
    Ok(self.backend.run(inputs).await?)
  }
}

/// 管理唯一的活动会话，按偏好顺序尝试执行后端
pub struct SessionManager {
  factory: Arc<dyn BackendFactory>,
  active: RwLock<Option<Arc<ModelSession>>>,
}

impl SessionManager {
  pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
    Self {
      factory,
      active: RwLock::new(None),
    }
  }

  /// 加载模型，第一个构建成功的后端胜出
  ///
  /// 旧会话在开始加载前即被丢弃；加载期间持有写锁，推理方不会拿到正在替换的会话。
  /// 每次后端构建都在阻塞线程池中完成。
  pub async fn load(&self, spec: &ModelSpec) -> Result<Arc<ModelSession>, LoadError> {
    let mut active = self.active.write().await;
    if active.take().is_some() {
      info!("丢弃旧的模型会话");
    }

    info!("加载模型文件: {}", spec.path().display());
    let mut attempts: Vec<ProviderFailure> = Vec::new();
    for &provider in spec.providers() {
      if attempts.iter().any(|a| a.provider == provider) {
        continue;
      }

      info!("尝试执行后端: {}", provider);
      // 构建会话可能耗时数秒，放到阻塞线程池，不占用调度器
      let factory = Arc::clone(&self.factory);
      let path = spec.path().to_path_buf();
      let options = *spec.options();
      let opened = tokio::task::spawn_blocking(move || factory.open(&path, provider, &options))
        .await
        .unwrap_or_else(|e| Err(BackendError::new(format!("加载任务异常退出: {}", e))));
      match opened {
        Ok(backend) => {
          let session = Arc::new(ModelSession {
            model: spec.path().to_path_buf(),
            provider,
            backend,
          });
          info!("模型加载完成，执行后端: {}", provider);
          info!("输入名: {:?}", session.input_names());
          info!("输出名: {:?}", session.output_names());
          *active = Some(Arc::clone(&session));
          return Ok(session);
        }
        Err(e) => {
          warn!("执行后端 {} 不可用: {}", provider, e);
          attempts.push(ProviderFailure {
            provider,
            reason: e.to_string(),
          });
        }
      }
    }

    error!("所有执行后端均加载失败: {}", spec.path().display());
    Err(LoadError::AllProvidersFailed {
      model: spec.path().to_path_buf(),
      attempts,
    })
  }

  pub async fn unload(&self) {
    if self.active.write().await.take().is_some() {
      info!("模型会话已卸载");
    }
  }

  pub async fn active(&self) -> Option<Arc<ModelSession>> {
    self.active.read().await.clone()
  }

  pub async fn is_loaded(&self) -> bool {
    self.active.read().await.is_some()
  }

  /// 在当前会话上推理；会话的引用在整个调用期间保持有效
  pub async fn infer(&self, input: Tensor) -> Result<TensorMap, InferError> {
    let session = self.active().await.ok_or(InferError::NoActiveSession)?;
    session.infer_single(input).await
  }
}
