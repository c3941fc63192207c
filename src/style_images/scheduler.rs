//! # 动图逐帧调度器
//!
//! ## 设计思路
//!
//! 每个动图句柄对应一个 `FrameLoop`，负责：
//! 1. 作为解码器的 `FrameCallback`，把“某时刻执行帧任务”落成 UI 上下文中的定时任务
//! 2. 每次重绘前检查存活：句柄是否仍是权威句柄、宿主是否还在
//! 3. 自愈看门狗：解码器被外部事件悄悄停掉时重新挂接并启动
//!
//! 两种驱动模式：
//! - `Full`：解码器自己报告下一帧的到期时间，按帧时长精确投递
//! - `Simple`：固定间隔重绘，每次按墙钟推进帧
//!
//! 被替换（同名新登记）时不强制停止旧循环，旧循环在下一次唤醒时自行发现并退出，
//! 因此旧循环可能多跑一拍。
//!
//! ## 实现思路
//!
//! - 全部任务用 `spawn_local` 投递到当前 `LocalSet`，循环对象因此可以是 `!Send`。
//! - 看门狗任务强持有 `FrameLoop`；帧任务和固定间隔任务只持有 `Weak`。
//! - 单帧绘制/安装失败只记日志，不影响后续帧。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use super::frames::{AnimatedHandle, FrameCallback, FrameTask, LoopState, StopReason};
use super::host::StyleHost;
use super::registry::ResolutionRegistry;
use super::source::{DecodedGif, ImageMetadata};
use super::{AnimationMode, ImageConfig, ImageError};

/// 从配置中取出的调度参数。
#[derive(Debug, Clone, Copy)]
struct FrameTiming {
    mode: AnimationMode,
    frame_interval: Duration,
    watchdog_interval: Duration,
}

impl FrameTiming {
    fn from_config(config: &ImageConfig) -> Self {
        Self {
            mode: config.animation_mode,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            watchdog_interval: Duration::from_millis(config.watchdog_interval_ms),
        }
    }
}

/// 动图逐帧调度器。只持有注册表的弱引用。
pub struct FrameScheduler {
    registry: Weak<ResolutionRegistry>,
}

impl FrameScheduler {
    pub fn new(registry: &Rc<ResolutionRegistry>) -> Self {
        Self {
            registry: Rc::downgrade(registry),
        }
    }

    /// 登记一个动图并启动它的重绘循环。必须在 `LocalSet` 内调用。
    ///
    /// 注册表已销毁时返回 `None`。
    pub(crate) fn register(
        &self,
        name: &str,
        gif: DecodedGif,
        info: ImageMetadata,
        host: Weak<dyn StyleHost>,
        config: &ImageConfig,
    ) -> Option<Rc<AnimatedHandle>> {
        let registry = self.registry.upgrade()?;
        let timing = FrameTiming::from_config(config);

        let handle = Rc::new(AnimatedHandle::new(name, gif, info));
        registry.register_animated(name, Rc::clone(&handle));

        let frame_loop = Rc::new_cyclic(|weak| FrameLoop {
            name: name.to_string(),
            handle: Rc::clone(&handle),
            registry: Rc::downgrade(&registry),
            host,
            timing,
            pending: RefCell::new(HashMap::new()),
            background: RefCell::new(Vec::new()),
            stopped: Cell::new(false),
            this: weak.clone(),
        });

        frame_loop.attach();
        handle.decoder().start();
        handle.set_state(LoopState::Running);

        let watchdog = tokio::task::spawn_local(Rc::clone(&frame_loop).watchdog());
        frame_loop.background.borrow_mut().push(watchdog.abort_handle());

        if timing.mode == AnimationMode::Simple {
            let ticker = tokio::task::spawn_local(FrameLoop::tick_fixed(Rc::downgrade(&frame_loop)));
            frame_loop.background.borrow_mut().push(ticker.abort_handle());
        }

        log::info!(
            "🎞️ 动图已登记 - name={} frames={} mode={}",
            name,
            handle.decoder().frame_count(),
            timing.mode.as_str()
        );
        Some(handle)
    }
}

/// 单个动图句柄的重绘循环。
struct FrameLoop {
    name: String,
    handle: Rc<AnimatedHandle>,
    registry: Weak<ResolutionRegistry>,
    host: Weak<dyn StyleHost>,
    timing: FrameTiming,
    pending: RefCell<HashMap<FrameTask, AbortHandle>>,
    background: RefCell<Vec<AbortHandle>>,
    stopped: Cell<bool>,
    this: Weak<FrameLoop>,
}

impl FrameLoop {
    fn attach(&self) {
        let callback: Weak<dyn FrameCallback> = self.this.clone();
        self.handle.decoder().set_callback(Some(callback));
    }

    /// 存活检查：注册表/宿主都在，且本句柄仍是权威句柄。
    fn liveness(&self) -> Result<Rc<dyn StyleHost>, StopReason> {
        let registry = self.registry.upgrade().ok_or(StopReason::HostGone)?;
        let host = self.host.upgrade().ok_or(StopReason::HostGone)?;

        if registry.is_animated_registered(&self.name, Some(&self.handle)) {
            Ok(host)
        } else if registry.is_animated_registered(&self.name, None) {
            Err(StopReason::Superseded)
        } else {
            Err(StopReason::Unregistered)
        }
    }

    fn redraw(&self) {
        if self.stopped.get() {
            return;
        }

        let host = match self.liveness() {
            Ok(host) => host,
            Err(reason) => {
                self.exit(reason);
                return;
            }
        };

        if let Err(e) = self.draw_and_install(host.as_ref()) {
            log::warn!("⚠️ 动图单帧绘制失败，跳过本帧 - name={}：{}", self.name, e);
        }
    }

    fn draw_and_install(&self, host: &dyn StyleHost) -> Result<(), ImageError> {
        let mut buffer = self.handle.buffer().borrow_mut();
        buffer.pixels_mut().for_each(|p| *p = image::Rgba([0, 0, 0, 0]));
        self.handle.decoder().draw(&mut buffer)?;

        if !host.is_style_loaded() {
            log::debug!("⏭️ 样式未加载，跳过本帧安装 - name={}", self.name);
            return Ok(());
        }

        host.add_bitmap_image(&self.name, &buffer, self.handle.info())
    }

    /// 进入终态：停止解码器、摘除回调、撤销全部任务。
    fn exit(&self, reason: StopReason) {
        if self.stopped.replace(true) {
            return;
        }

        self.handle.retire();

        let pending: Vec<AbortHandle> = self.pending.borrow_mut().drain().map(|(_, h)| h).collect();
        pending.iter().for_each(AbortHandle::abort);
        let background: Vec<AbortHandle> = self.background.borrow_mut().drain(..).collect();
        background.iter().for_each(AbortHandle::abort);

        if reason == StopReason::HostGone {
            if let Some(registry) = self.registry.upgrade() {
                if registry.is_animated_registered(&self.name, Some(&self.handle)) {
                    registry.unregister_animated(&self.name);
                }
            }
        }

        self.handle.set_state(LoopState::Stopped(reason));
        log::info!("🛑 动图循环已停止 - name={} reason={:?}", self.name, reason);
    }

    async fn watchdog(self: Rc<Self>) {
        let mut ticker = tokio::time::interval(self.timing.watchdog_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.stopped.get() {
                break;
            }

            match self.liveness() {
                Ok(_) => self.heal(),
                Err(reason) => {
                    self.exit(reason);
                    break;
                }
            }
        }
    }

    /// 解码器停止、回调脱落，或定时链断开（播放中却没有待执行的帧任务）时重新挂接并重新计时。
    fn heal(&self) {
        let decoder = self.handle.decoder();
        let scheduled = decoder.has_pending() || decoder.frame_count() < 2;
        if decoder.has_callback() && decoder.is_running() && scheduled {
            return;
        }

        log::warn!(
            "🩹 动图解码器已停摆，重新挂接并启动 - name={} attached={} running={} scheduled={}",
            self.name,
            decoder.has_callback(),
            decoder.is_running(),
            scheduled
        );
        self.attach();
        decoder.restart();
    }

    async fn tick_fixed(this: Weak<Self>) {
        let period = match this.upgrade() {
            Some(frame_loop) => frame_loop.timing.frame_interval,
            None => return,
        };
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(frame_loop) = this.upgrade() else {
                break;
            };
            if frame_loop.stopped.get() {
                break;
            }

            frame_loop.handle.decoder().advance_to(Instant::now());
            frame_loop.redraw();
        }
    }
}

impl FrameCallback for FrameLoop {
    fn request_redraw(&self) {
        self.redraw();
    }

    fn schedule_at(&self, at: Instant, task: FrameTask) {
        // 固定间隔模式由 tick_fixed 驱动
        if self.timing.mode == AnimationMode::Simple || self.stopped.get() {
            return;
        }

        let this = self.this.clone();
        let deadline = tokio::time::Instant::from_std(at);
        let join = tokio::task::spawn_local(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(frame_loop) = this.upgrade() {
                frame_loop.pending.borrow_mut().remove(&task);
                frame_loop.handle.decoder().run_scheduled(task, Instant::now());
            }
        });
        self.pending.borrow_mut().insert(task, join.abort_handle());
    }

    fn cancel_scheduled(&self, task: FrameTask) {
        if let Some(abort) = self.pending.borrow_mut().remove(&task) {
            abort.abort();
        }
    }
}
