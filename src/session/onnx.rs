// 该文件是 Kanjian （看见） 项目的一部分。
// src/session/onnx.rs - ONNX Runtime 推理后端
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
  fmt::Display,
  path::Path,
  sync::{Arc, Mutex, PoisonError},
};

use futures::future::BoxFuture;
use ort::{
  execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch, TensorRTExecutionProvider,
  },
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor as OrtTensor,
};
use tracing::debug;

use crate::{
  session::{
    Backend, BackendError, BackendFactory, ExecutionProvider, GraphOptimization, SessionOptions,
  },
  tensor::{Tensor, TensorMap},
};

fn backend_error<E: Display>(err: E) -> BackendError {
  BackendError::new(err.to_string())
}

fn dispatch(provider: ExecutionProvider) -> ExecutionProviderDispatch {
  let dispatch = match provider {
    ExecutionProvider::Cuda => CUDAExecutionProvider::default().build(),
    ExecutionProvider::TensorRt => TensorRTExecutionProvider::default().build(),
    ExecutionProvider::CoreMl => CoreMLExecutionProvider::default().build(),
    ExecutionProvider::Cpu => CPUExecutionProvider::default().build(),
  };
  // 后端不可用时直接报错，交给会话管理器尝试下一个
  dispatch.error_on_failure()
}

fn optimization_level(level: GraphOptimization) -> GraphOptimizationLevel {
  match level {
    GraphOptimization::Disabled => GraphOptimizationLevel::Disable,
    GraphOptimization::Basic => GraphOptimizationLevel::Level1,
    GraphOptimization::Extended => GraphOptimizationLevel::Level2,
    GraphOptimization::All => GraphOptimizationLevel::Level3,
  }
}

/// 基于 ONNX Runtime 的后端工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxRuntimeFactory;

impl BackendFactory for OnnxRuntimeFactory {
  fn open(
    &self,
    model: &Path,
    provider: ExecutionProvider,
    options: &SessionOptions,
  ) -> Result<Box<dyn Backend>, BackendError> {
    let session = Session::builder()
      .map_err(backend_error)?
      .with_optimization_level(optimization_level(options.optimization))
      .map_err(backend_error)?
      .with_execution_providers([dispatch(provider)])
      .map_err(backend_error)?
      .commit_from_file(model)
      .map_err(backend_error)?;

    let input_names = session.inputs.iter().map(|i| i.name.clone()).collect();
    let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

    Ok(Box::new(OnnxRuntimeBackend {
      session: Arc::new(Mutex::new(session)),
      input_names,
      output_names,
    }))
  }
}

pub struct OnnxRuntimeBackend {
  session: Arc<Mutex<Session>>,
  input_names: Vec<String>,
  output_names: Vec<String>,
}

impl Backend for OnnxRuntimeBackend {
  fn input_names(&self) -> &[String] {
    &self.input_names
  }

  fn output_names(&self) -> &[String] {
    &self.output_names
  }

  fn run(&self, inputs: TensorMap) -> BoxFuture<'_, Result<TensorMap, BackendError>> {
    let session = Arc::clone(&self.session);
    let output_names = self.output_names.clone();
    Box::pin(async move {
      tokio::task::spawn_blocking(move || run_blocking(&session, inputs, &output_names))
        .await
        .map_err(|e| BackendError::new(format!("推理任务异常退出: {}", e)))?
    })
  }
}

fn run_blocking(
  session: &Mutex<Session>,
  inputs: TensorMap,
  output_names: &[String],
) -> Result<TensorMap, BackendError> {
  let mut values = Vec::with_capacity(inputs.len());
  for (name, tensor) in inputs {
    let (dims, data) = tensor.into_parts();
    let shape: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
    let value = OrtTensor::from_array((shape, data)).map_err(backend_error)?;
    values.push((name, value));
  }

  let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
  let outputs = session.run(values).map_err(backend_error)?;

  let mut result = TensorMap::with_capacity(output_names.len());
  for name in output_names {
    let (shape, data) = outputs[name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(backend_error)?;
    let dims = shape
      .iter()
      .map(|&d| usize::try_from(d))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| BackendError::new(format!("输出 {} 含有未确定的维度", name)))?;
    debug!("输出 {}: {:?}", name, dims);
    let tensor = Tensor::new(dims, data.to_vec()).map_err(backend_error)?;
    result.insert(name.clone(), tensor);
  }

  Ok(result)
}
