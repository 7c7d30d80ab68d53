// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 集成测试用的替身实现
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

#![allow(dead_code)]

use std::{
  path::Path,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc,
  },
  time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use tokio::sync::{Notify, Semaphore};

use kanjian::{
  frame::RgbaFrame,
  input::{CaptureError, FacingMode, FrameSource},
  output::{Haptic, Notifier, Speaker},
  session::{Backend, BackendError, BackendFactory, ExecutionProvider, SessionOptions},
  tensor::{Tensor, TensorMap},
};

pub const COCO_ATTRS: usize = 85;
pub const CAT: usize = 15;
pub const DOG: usize = 16;

/// 构造 `[1, n, 85]` 排布的输出，目标置信度为 1，类别分数即最终置信度
pub fn boxes_first(items: &[(usize, f32)]) -> (Vec<usize>, Vec<f32>) {
  let mut data = Vec::with_capacity(items.len() * COCO_ATTRS);
  for (index, &(class_id, score)) in items.iter().enumerate() {
    let mut record = vec![0.0; COCO_ATTRS];
    record[0] = 10.0 * index as f32;
    record[1] = 20.0;
    record[2] = 30.0;
    record[3] = 40.0;
    record[4] = 1.0;
    record[5 + class_id] = score;
    data.extend(record);
  }
  (vec![1, items.len(), COCO_ATTRS], data)
}

pub type ScriptedOutput = Result<(Vec<usize>, Vec<f32>), String>;

/// 可脚本化输出的后端；设置了闸门时每次推理需要一个许可才能返回
#[derive(Clone)]
pub struct FakeBackend {
  inputs: Vec<String>,
  outputs: Vec<String>,
  output: Arc<Mutex<ScriptedOutput>>,
  calls: Arc<AtomicUsize>,
  seen_inputs: Arc<Mutex<Vec<String>>>,
  gate: Option<Arc<Semaphore>>,
}

impl FakeBackend {
  pub fn new(output: (Vec<usize>, Vec<f32>)) -> Self {
    Self {
      inputs: vec!["images".to_string()],
      outputs: vec!["output0".to_string()],
      output: Arc::new(Mutex::new(Ok(output))),
      calls: Arc::new(AtomicUsize::new(0)),
      seen_inputs: Arc::new(Mutex::new(Vec::new())),
      gate: None,
    }
  }

  pub fn failing(message: &str) -> Self {
    let backend = Self::new((vec![1, 0, COCO_ATTRS], Vec::new()));
    backend.set_output(Err(message.to_string()));
    backend
  }

  pub fn with_input_name(mut self, name: &str) -> Self {
    self.inputs = vec![name.to_string()];
    self
  }

  pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
    self.gate = Some(gate);
    self
  }

  pub fn set_output(&self, output: ScriptedOutput) {
    *self.output.lock().unwrap() = output;
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn seen_inputs(&self) -> Vec<String> {
    self.seen_inputs.lock().unwrap().clone()
  }
}

impl Backend for FakeBackend {
  fn input_names(&self) -> &[String] {
    &self.inputs
  }

  fn output_names(&self) -> &[String] {
    &self.outputs
  }

  fn run(&self, inputs: TensorMap) -> BoxFuture<'_, Result<TensorMap, BackendError>> {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .seen_inputs
        .lock()
        .unwrap()
        .extend(inputs.keys().cloned());
      if let Some(gate) = &self.gate {
        gate.acquire().await.unwrap().forget();
      }

      let scripted = self.output.lock().unwrap().clone();
      let (dims, data) = scripted.map_err(BackendError::new)?;
      let tensor = Tensor::new(dims, data).map_err(|e| BackendError::new(e.to_string()))?;
      Ok(TensorMap::from([(self.outputs[0].clone(), tensor)]))
    }
    .boxed()
  }
}

/// 令下一次 `open` 停在后端构建中，直到测试放行
pub struct OpenGate {
  pub entered: Arc<Notify>,
  release: mpsc::Sender<()>,
}

impl OpenGate {
  pub fn release(&self) {
    let _ = self.release.send(());
  }
}

/// 按执行后端返回预设结果，并记录尝试顺序
pub struct ScriptedFactory {
  script: Mutex<Vec<(ExecutionProvider, Result<FakeBackend, String>)>>,
  attempts: Mutex<Vec<ExecutionProvider>>,
  open_delay: Option<Duration>,
  parked: Mutex<Option<(Arc<Notify>, mpsc::Receiver<()>)>>,
}

impl ScriptedFactory {
  pub fn new() -> Self {
    Self {
      script: Mutex::new(Vec::new()),
      attempts: Mutex::new(Vec::new()),
      open_delay: None,
      parked: Mutex::new(None),
    }
  }

  pub fn succeed(self, provider: ExecutionProvider, backend: FakeBackend) -> Self {
    self.set(provider, Ok(backend));
    self
  }

  pub fn fail(self, provider: ExecutionProvider, reason: &str) -> Self {
    self.set(provider, Err(reason.to_string()));
    self
  }

  /// 模拟耗时的模型构建，期间阻塞调用线程
  pub fn with_open_delay(mut self, delay: Duration) -> Self {
    self.open_delay = Some(delay);
    self
  }

  /// 替换某个后端之后的构建结果
  pub fn set(&self, provider: ExecutionProvider, result: Result<FakeBackend, String>) {
    let mut script = self.script.lock().unwrap();
    script.retain(|(p, _)| *p != provider);
    script.push((provider, result));
  }

  pub fn park_next_open(&self) -> OpenGate {
    let entered = Arc::new(Notify::new());
    let (release, parked) = mpsc::channel();
    *self.parked.lock().unwrap() = Some((Arc::clone(&entered), parked));
    OpenGate { entered, release }
  }

  pub fn attempts(&self) -> Vec<ExecutionProvider> {
    self.attempts.lock().unwrap().clone()
  }
}

impl BackendFactory for ScriptedFactory {
  fn open(
    &self,
    _model: &Path,
    provider: ExecutionProvider,
    _options: &SessionOptions,
  ) -> Result<Box<dyn Backend>, BackendError> {
    self.attempts.lock().unwrap().push(provider);

    let parked = self.parked.lock().unwrap().take();
    if let Some((entered, release)) = parked {
      entered.notify_one();
      let _ = release.recv();
    }
    if let Some(delay) = self.open_delay {
      std::thread::sleep(delay);
    }

    let script = self.script.lock().unwrap();
    match script.iter().find(|(p, _)| *p == provider) {
      Some((_, Ok(backend))) => Ok(Box::new(backend.clone())),
      Some((_, Err(reason))) => Err(BackendError::new(reason.clone())),
      None => Err(BackendError::new(format!("{} 不受支持", provider))),
    }
  }
}

#[derive(Default)]
pub struct SourceState {
  pub opened: AtomicBool,
  pub ready: AtomicBool,
  pub deny_permission: AtomicBool,
  pub opens: Mutex<Vec<FacingMode>>,
  pub closes: AtomicUsize,
}

/// 打开后即有黑色帧可取的帧源
pub struct FakeSource {
  state: Arc<SourceState>,
}

impl FakeSource {
  pub fn new() -> (Self, Arc<SourceState>) {
    let state = Arc::new(SourceState::default());
    state.ready.store(true, Ordering::SeqCst);
    (
      Self {
        state: Arc::clone(&state),
      },
      state,
    )
  }
}

impl FrameSource for FakeSource {
  fn open(&mut self, facing: FacingMode) -> Result<(), CaptureError> {
    if self.state.deny_permission.load(Ordering::SeqCst) {
      return Err(CaptureError::PermissionDenied);
    }
    self.state.opens.lock().unwrap().push(facing);
    self.state.opened.store(true, Ordering::SeqCst);
    Ok(())
  }

  fn close(&mut self) {
    self.state.opened.store(false, Ordering::SeqCst);
    self.state.closes.fetch_add(1, Ordering::SeqCst);
  }

  fn is_frame_ready(&self) -> bool {
    self.state.opened.load(Ordering::SeqCst) && self.state.ready.load(Ordering::SeqCst)
  }

  fn draw_current_frame_into(&mut self, target_size: u32) -> Result<RgbaFrame, CaptureError> {
    if !self.state.opened.load(Ordering::SeqCst) {
      return Err(CaptureError::NotOpened);
    }
    Ok(RgbaFrame::black(target_size, target_size))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
  pub text: String,
  pub language: String,
  pub rate: f32,
  pub pitch: f32,
}

#[derive(Default)]
pub struct RecordingSpeaker {
  spoken: Mutex<Vec<Utterance>>,
}

impl RecordingSpeaker {
  pub fn spoken(&self) -> Vec<Utterance> {
    self.spoken.lock().unwrap().clone()
  }

  pub fn texts(&self) -> Vec<String> {
    self.spoken().into_iter().map(|u| u.text).collect()
  }
}

impl Speaker for RecordingSpeaker {
  fn speak(&self, text: &str, language: &str, rate: f32, pitch: f32) {
    self.spoken.lock().unwrap().push(Utterance {
      text: text.to_string(),
      language: language.to_string(),
      rate,
      pitch,
    });
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
  pub fn messages(&self) -> Vec<String> {
    self.messages.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, message: &str) {
    self.messages.lock().unwrap().push(message.to_string());
  }
}

#[derive(Default)]
pub struct RecordingHaptic {
  pulses: Mutex<Vec<Duration>>,
}

impl RecordingHaptic {
  pub fn pulses(&self) -> Vec<Duration> {
    self.pulses.lock().unwrap().clone()
  }
}

impl Haptic for RecordingHaptic {
  fn vibrate(&self, duration: Duration) {
    self.pulses.lock().unwrap().push(duration);
  }
}
