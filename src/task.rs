// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 检测循环
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
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{
  sync::watch,
  task::JoinHandle,
  time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
  announce::Announcer,
  input::{CaptureError, FrameSource},
  model::{ClassCatalog, DecodeConfig, DecodeError, Detection, decode, select_best},
  session::{InferError, SessionManager},
  tensor::{PreprocessConfig, encode},
};

pub const DETECTION_INTERVAL: Duration = Duration::from_millis(2000);

/// 检测循环与应用共享的帧源
pub type SharedFrameSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// 可注入的时间源，测试中可替换
pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

/// 跟随 tokio 时钟，暂停时间的测试中同样可用
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
  fn now(&self) -> Instant {
    time::Instant::now().into_std()
  }
}

#[derive(Error, Debug)]
pub enum CycleError {
  #[error("采集失败: {0}")]
  Capture(#[from] CaptureError),
  #[error("推理失败: {0}")]
  Infer(#[from] InferError),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

/// 一次定时触发的结果
#[derive(Debug)]
pub enum Tick {
  /// 上一轮仍在执行，本次触发被丢弃
  Busy,
  FrameNotReady,
  Dispatched(JoinHandle<()>),
}

/// 单轮检测：取帧、预处理、推理、解码、选择、播报
pub struct Pipeline {
  sessions: Arc<SessionManager>,
  source: SharedFrameSource,
  catalog: Arc<ClassCatalog>,
  preprocess: PreprocessConfig,
  decode: DecodeConfig,
  announcer: Announcer,
  clock: Arc<dyn Clock>,
  status: watch::Sender<String>,
  busy: AtomicBool,
  epoch: AtomicU64,
  // 发布结果与 reset 互斥，停止之后不会再有旧结果写入
  publish_lock: Mutex<()>,
}

struct BusyGuard(Arc<Pipeline>);

impl Drop for BusyGuard {
  fn drop(&mut self) {
    self.0.busy.store(false, Ordering::Release);
  }
}

impl Pipeline {
  pub fn new(
    sessions: Arc<SessionManager>,
    source: SharedFrameSource,
    catalog: Arc<ClassCatalog>,
    announcer: Announcer,
  ) -> Self {
    let (status, _) = watch::channel(String::new());
    Self {
      sessions,
      source,
      catalog,
      preprocess: PreprocessConfig::default(),
      decode: DecodeConfig::default(),
      announcer,
      clock: Arc::new(TokioClock),
      status,
      busy: AtomicBool::new(false),
      epoch: AtomicU64::new(0),
      publish_lock: Mutex::new(()),
    }
  }

  pub fn with_preprocess(mut self, preprocess: PreprocessConfig) -> Self {
    self.preprocess = preprocess;
    self
  }

  pub fn with_decode(mut self, decode: DecodeConfig) -> Self {
    self.decode = decode;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// 最近一次的显示值，例如 `dog (90%)`；没有检测结果时为空
  pub fn last_detected(&self) -> String {
    self.status.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<String> {
    self.status.subscribe()
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  /// 处理一次定时触发；同一时刻至多一轮在执行，忙时直接丢弃而不排队
  pub fn tick(self: &Arc<Self>) -> Tick {
    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("上一轮检测仍在进行，跳过本次触发");
      return Tick::Busy;
    }
    let guard = BusyGuard(Arc::clone(self));

    let ready = self
      .source
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_frame_ready();
    if !ready {
      debug!("帧尚未就绪");
      return Tick::FrameNotReady;
    }

    let epoch = self.epoch.load(Ordering::Acquire);
    let pipeline = Arc::clone(self);
    Tick::Dispatched(tokio::spawn(async move {
      let _guard = guard;
      let start = Instant::now();
      let detections = match pipeline.run_cycle().await {
        Ok(detections) => detections,
        Err(e) => {
          warn!("本轮检测失败，按无结果处理: {}", e);
          Vec::new()
        }
      };
      debug!("本轮检测耗时: {:.2?}", start.elapsed());

      pipeline.publish(epoch, &detections);
    }))
  }

  async fn run_cycle(&self) -> Result<Vec<Detection>, CycleError> {
    let size = self.preprocess.input_size;
    // 锁不跨越 await
    let frame = self
      .source
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .draw_current_frame_into(size)?;
    let input = encode(&frame, size);

    let session = self
      .sessions
      .active()
      .await
      .ok_or(InferError::NoActiveSession)?;
    let outputs = session.infer_single(input).await?;

    let name = session
      .output_names()
      .first()
      .ok_or_else(|| DecodeError::MissingOutput(String::new()))?;
    let output = outputs
      .get(name)
      .ok_or_else(|| DecodeError::MissingOutput(name.clone()))?;
    Ok(decode(
      output.data(),
      output.dims(),
      &self.catalog,
      &self.decode,
    )?)
  }

  fn publish(&self, epoch: u64, detections: &[Detection]) {
    let _publishing = self
      .publish_lock
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if self.epoch.load(Ordering::Acquire) != epoch {
      debug!("检测循环已停止，丢弃本轮结果");
      return;
    }

    match select_best(detections) {
      Some(best) => {
        let text = best.display_text();
        info!("检测到: {}", text);
        self.status.send_replace(text);
        self.announcer.announce(best, self.clock.now());
      }
      None => {
        self.status.send_replace(String::new());
      }
    }
  }

  /// 使在途的一轮结果作废，并清空显示值与去抖状态
  pub fn reset(&self) {
    let _publishing = self
      .publish_lock
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    self.epoch.fetch_add(1, Ordering::AcqRel);
    self.status.send_replace(String::new());
    self.announcer.reset();
  }
}

struct LoopState {
  ticker: JoinHandle<()>,
}

/// `Idle -> Running -> Idle` 状态机，每个周期触发一次 [`Pipeline::tick`]
pub struct DetectionLoop {
  pipeline: Arc<Pipeline>,
  period: Duration,
  state: Option<LoopState>,
}

impl DetectionLoop {
  pub fn new(pipeline: Arc<Pipeline>) -> Self {
    Self {
      pipeline,
      period: DETECTION_INTERVAL,
      state: None,
    }
  }

  pub fn with_period(mut self, period: Duration) -> Self {
    self.period = period;
    self
  }

  pub fn period(&self) -> Duration {
    self.period
  }

  pub fn pipeline(&self) -> &Arc<Pipeline> {
    &self.pipeline
  }

  pub fn is_running(&self) -> bool {
    self.state.is_some()
  }

  /// 已在运行时为空操作，返回是否发生了状态转换
  pub fn start(&mut self) -> bool {
    if self.state.is_some() {
      debug!("检测循环已在运行");
      return false;
    }

    let pipeline = Arc::clone(&self.pipeline);
    let period = self.period;
    let ticker = tokio::spawn(async move {
      let mut interval = time::interval_at(time::Instant::now() + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        interval.tick().await;
        match pipeline.tick() {
          Tick::Dispatched(_) => debug!("开始新一轮检测"),
          Tick::Busy | Tick::FrameNotReady => {}
        }
      }
    });

    info!("检测循环启动，周期 {:?}", period);
    self.state = Some(LoopState { ticker });
    true
  }

  /// 已停止时为空操作
  pub fn stop(&mut self) -> bool {
    let Some(state) = self.state.take() else {
      return false;
    };
    state.ticker.abort();
    self.pipeline.reset();
    info!("检测循环已停止");
    true
  }
}

impl Drop for DetectionLoop {
  fn drop(&mut self) {
    if let Some(state) = self.state.take() {
      state.ticker.abort();
    }
  }
}
