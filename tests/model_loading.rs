// 该文件是 Kanjian （看见） 项目的一部分。
// tests/model_loading.rs - 模型加载与回退
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

mod common;

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use kanjian::{
  announce::{Announcer, SPEECH_COOLDOWN},
  app::CameraDetector,
  frame::RgbaFrame,
  input::{FacingMode, FrameSource},
  model::ClassCatalog,
  output::VoiceConfig,
  session::{ExecutionProvider, InferError, ModelSpec, SessionManager},
  task::{Pipeline, SharedFrameSource, Tick},
  tensor::{PreprocessConfig, Tensor, encode},
};

use common::{
  CAT, DOG, FakeBackend, FakeSource, RecordingNotifier, RecordingSpeaker, ScriptedFactory,
  boxes_first,
};

fn spec() -> ModelSpec {
  ModelSpec::new("/models/yolov8n.onnx")
    .with_providers([ExecutionProvider::Cuda, ExecutionProvider::Cpu])
}

fn detector(
  factory: Arc<ScriptedFactory>,
  notifier: Arc<RecordingNotifier>,
) -> CameraDetector {
  let (source, _) = FakeSource::new();
  CameraDetector::builder(factory, spec(), Box::new(source))
    .with_notifier(notifier)
    .build()
}

#[tokio::test]
async fn falls_back_to_second_provider_without_notification() {
  let backend = FakeBackend::new(boxes_first(&[(DOG, 0.9)]));
  let factory = Arc::new(
    ScriptedFactory::new()
      .fail(ExecutionProvider::Cuda, "CUDA 不可用")
      .succeed(ExecutionProvider::Cpu, backend),
  );
  let notifier = Arc::new(RecordingNotifier::default());
  let detector = detector(Arc::clone(&factory), Arc::clone(&notifier));

  assert!(!detector.is_model_loaded().await);
  assert!(detector.load_model().await);
  assert!(detector.is_model_loaded().await);

  let session = detector.sessions().active().await.unwrap();
  assert_eq!(session.provider(), ExecutionProvider::Cpu);
  assert_eq!(
    factory.attempts(),
    [ExecutionProvider::Cuda, ExecutionProvider::Cpu]
  );
  assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn first_working_provider_wins() {
  let factory = Arc::new(
    ScriptedFactory::new()
      .succeed(ExecutionProvider::Cuda, FakeBackend::new(boxes_first(&[])))
      .succeed(ExecutionProvider::Cpu, FakeBackend::new(boxes_first(&[]))),
  );
  let notifier = Arc::new(RecordingNotifier::default());
  let detector = detector(Arc::clone(&factory), notifier);

  assert!(detector.load_model().await);
  // 成功后不再尝试后续后端
  assert_eq!(factory.attempts(), [ExecutionProvider::Cuda]);
}

#[tokio::test]
async fn all_providers_failing_notifies_once() {
  let factory = Arc::new(
    ScriptedFactory::new()
      .fail(ExecutionProvider::Cuda, "CUDA 不可用")
      .fail(ExecutionProvider::Cpu, "模型文件不存在"),
  );
  let notifier = Arc::new(RecordingNotifier::default());
  let detector = detector(Arc::clone(&factory), Arc::clone(&notifier));

  assert!(!detector.load_model().await);
  assert!(!detector.is_model_loaded().await);

  let messages = notifier.messages();
  assert_eq!(messages.len(), 1);
  assert!(messages[0].contains("/models/yolov8n.onnx"));
  assert!(messages[0].contains("cuda / cpu"));
  // 每个后端只尝试一次，不重试
  assert_eq!(
    factory.attempts(),
    [ExecutionProvider::Cuda, ExecutionProvider::Cpu]
  );
}

#[tokio::test]
async fn reload_replaces_session_and_stops_camera() {
  let factory = Arc::new(
    ScriptedFactory::new().succeed(ExecutionProvider::Cpu, FakeBackend::new(boxes_first(&[]))),
  );
  let notifier = Arc::new(RecordingNotifier::default());
  let mut detector = detector(Arc::clone(&factory), notifier);

  assert!(detector.load_model().await);
  let first = detector.sessions().active().await.unwrap();
  detector.start_camera().unwrap();
  assert!(detector.is_camera_on());

  assert!(detector.reload_model().await);
  assert!(!detector.is_camera_on());
  let second = detector.sessions().active().await.unwrap();
  assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn inference_uses_declared_input_name() {
  let backend = FakeBackend::new(boxes_first(&[(DOG, 0.9)])).with_input_name("pixel_values");
  let factory = Arc::new(
    ScriptedFactory::new().succeed(ExecutionProvider::Cpu, backend.clone()),
  );
  let sessions = SessionManager::new(factory);
  sessions.load(&spec()).await.unwrap();

  let input = encode(&RgbaFrame::black(8, 8), 8);
  let outputs = sessions.infer(input).await.unwrap();
  assert!(outputs.contains_key("output0"));
  assert_eq!(backend.seen_inputs(), ["pixel_values"]);
  assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn inference_without_session_fails() {
  let sessions = SessionManager::new(Arc::new(ScriptedFactory::new()));
  let input = Tensor::new(vec![1, 3, 1, 1], vec![0.0; 3]).unwrap();
  assert_eq!(
    sessions.infer(input).await.unwrap_err(),
    InferError::NoActiveSession
  );

  sessions.unload().await;
  assert!(!sessions.is_loaded().await);
}

#[tokio::test]
async fn slow_model_build_does_not_block_other_tasks() {
  let factory = Arc::new(
    ScriptedFactory::new()
      .succeed(ExecutionProvider::Cpu, FakeBackend::new(boxes_first(&[])))
      .with_open_delay(Duration::from_millis(300)),
  );
  let sessions = SessionManager::new(factory);

  let beats = Arc::new(AtomicUsize::new(0));
  let heartbeat = tokio::spawn({
    let beats = Arc::clone(&beats);
    async move {
      loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
        beats.fetch_add(1, Ordering::SeqCst);
      }
    }
  });

  sessions.load(&spec()).await.unwrap();
  heartbeat.abort();
  assert!(beats.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn cycle_waits_for_session_being_replaced() {
  let old = FakeBackend::new(boxes_first(&[(CAT, 0.8)]));
  let new = FakeBackend::new(boxes_first(&[(DOG, 0.9)]));
  let factory = Arc::new(ScriptedFactory::new().succeed(ExecutionProvider::Cpu, old.clone()));
  let sessions = Arc::new(SessionManager::new(Arc::clone(&factory) as _));
  sessions.load(&spec()).await.unwrap();

  let (mut source, _) = FakeSource::new();
  source.open(FacingMode::Environment).unwrap();
  let boxed: Box<dyn FrameSource> = Box::new(source);
  let source: SharedFrameSource = Arc::new(Mutex::new(boxed));
  let speaker = Arc::new(RecordingSpeaker::default());
  let announcer = Announcer::new(
    Arc::clone(&speaker) as _,
    VoiceConfig::default(),
    SPEECH_COOLDOWN,
  );
  let pipeline = Arc::new(
    Pipeline::new(
      Arc::clone(&sessions),
      source,
      Arc::new(ClassCatalog::coco()),
      announcer,
    )
    .with_preprocess(PreprocessConfig::default().with_input_size(32)),
  );

  factory.set(ExecutionProvider::Cpu, Ok(new.clone()));
  let gate = factory.park_next_open();
  let reload = tokio::spawn({
    let sessions = Arc::clone(&sessions);
    async move { sessions.load(&spec()).await.map(|_| ()) }
  });
  gate.entered.notified().await;

  // 新会话仍在构建中，本轮检测必须等待
  let Tick::Dispatched(cycle) = pipeline.tick() else {
    panic!("应开始一轮检测");
  };
  for _ in 0..10 {
    tokio::task::yield_now().await;
  }
  assert_eq!(old.calls(), 0);
  assert_eq!(new.calls(), 0);
  assert!(pipeline.is_busy());

  gate.release();
  reload.await.unwrap().unwrap();
  cycle.await.unwrap();

  assert_eq!(old.calls(), 0);
  assert_eq!(new.calls(), 1);
  assert_eq!(pipeline.last_detected(), "dog (90%)");
  assert_eq!(speaker.texts(), ["Detected dog"]);
}
