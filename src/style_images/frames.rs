//! # 动图帧解码器与调度能力接口
//!
//! ## 设计思路
//!
//! `AnimatedFrames` 持有已解码的全部帧，负责“现在该显示哪一帧、下一帧何时到期”，
//! 但自己不持有定时器。所有时间相关的动作都通过 `FrameCallback` 交给外部：
//! - `request_redraw`：当前帧变了，请求重绘
//! - `schedule_at`：在指定时刻投递一个帧任务
//! - `cancel_scheduled`：撤销尚未执行的帧任务
//!
//! 回调以 `Weak` 持有，解码器不延长调度器的生命周期。
//!
//! ## 实现思路
//!
//! - 全部状态放在 `RefCell` 中，只在 UI 上下文使用。
//! - 调用回调前一律先释放借用，回调内部可以安全地重入解码器（例如 `draw`）。
//! - 过期或被替换的帧任务按 id 识别并忽略。

use std::cell::{Cell, RefCell};
use std::rc::Weak;
use std::time::{Duration, Instant};

use super::ImageError;
use super::pipeline::paint_frame;
use super::source::{DecodedGif, GifFrame, ImageMetadata, RasterBuffer};

/// 调度能力接口：解码器通过它请求重绘与定时。
pub trait FrameCallback {
    fn request_redraw(&self);
    fn schedule_at(&self, at: Instant, task: FrameTask);
    fn cancel_scheduled(&self, task: FrameTask);
}

/// 帧任务标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameTask(u64);

struct Playback {
    current: usize,
    running: bool,
    due: Option<Instant>,
    pending: Option<FrameTask>,
}

/// GIF 帧解码器（播放状态机）。
pub struct AnimatedFrames {
    width: u32,
    height: u32,
    frames: Vec<GifFrame>,
    playback: RefCell<Playback>,
    callback: RefCell<Option<Weak<dyn FrameCallback>>>,
    next_task_id: Cell<u64>,
}

impl AnimatedFrames {
    pub(crate) fn new(gif: DecodedGif) -> Self {
        Self {
            width: gif.width,
            height: gif.height,
            frames: gif.frames,
            playback: RefCell::new(Playback {
                current: 0,
                running: false,
                due: None,
                pending: None,
            }),
            callback: RefCell::new(None),
            next_task_id: Cell::new(1),
        }
    }

    /// 固有尺寸。
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.playback.borrow().current
    }

    pub fn is_running(&self) -> bool {
        self.playback.borrow().running
    }

    /// 是否有已投递、尚未执行的帧任务。
    pub fn has_pending(&self) -> bool {
        self.playback.borrow().pending.is_some()
    }

    /// 挂接或摘除调度回调。
    pub fn set_callback(&self, callback: Option<Weak<dyn FrameCallback>>) {
        *self.callback.borrow_mut() = callback;
    }

    /// 回调是否仍挂接且对端存活。
    pub fn has_callback(&self) -> bool {
        self.callback
            .borrow()
            .as_ref()
            .is_some_and(|cb| cb.strong_count() > 0)
    }

    fn callback(&self) -> Option<std::rc::Rc<dyn FrameCallback>> {
        self.callback.borrow().as_ref().and_then(Weak::upgrade)
    }

    /// 开始播放：从当前帧计时，并为下一帧申请定时。
    pub fn start(&self) {
        {
            let mut playback = self.playback.borrow_mut();
            if playback.running {
                return;
            }
            playback.running = true;
            playback.due = Some(Instant::now() + self.delay_of(playback.current));
        }
        self.schedule_next();
    }

    /// 重新计时：撤销旧的帧任务，从当前帧起重新申请定时。
    ///
    /// 与 `start` 不同，播放中也会生效；用于回调曾被摘除、定时链已断开的情况。
    pub(crate) fn restart(&self) {
        let stale = {
            let mut playback = self.playback.borrow_mut();
            playback.running = true;
            playback.due = Some(Instant::now() + self.delay_of(playback.current));
            playback.pending.take()
        };

        if let (Some(task), Some(callback)) = (stale, self.callback()) {
            callback.cancel_scheduled(task);
        }
        self.schedule_next();
    }

    /// 停止播放，并撤销尚未执行的帧任务。
    pub fn stop(&self) {
        let pending = {
            let mut playback = self.playback.borrow_mut();
            playback.running = false;
            playback.due = None;
            playback.pending.take()
        };

        if let (Some(task), Some(callback)) = (pending, self.callback()) {
            callback.cancel_scheduled(task);
        }
    }

    /// 定时任务到期：推进到期的帧、请求重绘、再为下一帧申请定时。
    ///
    /// 不是当前待执行任务（过期/已撤销）时直接忽略。
    pub fn run_scheduled(&self, task: FrameTask, now: Instant) {
        let advanced = {
            let mut playback = self.playback.borrow_mut();
            if !playback.running || playback.pending != Some(task) {
                return;
            }
            playback.pending = None;
            self.advance_locked(&mut playback, now)
        };

        if advanced {
            if let Some(callback) = self.callback() {
                callback.request_redraw();
            }
        }
        self.schedule_next();
    }

    /// 按墙钟时间推进到 `now` 应显示的帧，返回是否换帧。固定间隔模式使用。
    pub fn advance_to(&self, now: Instant) -> bool {
        let mut playback = self.playback.borrow_mut();
        if !playback.running {
            return false;
        }
        self.advance_locked(&mut playback, now)
    }

    /// 把当前帧绘制到目标缓冲的整个范围内。
    pub fn draw(&self, target: &mut RasterBuffer) -> Result<(), ImageError> {
        let current = self.playback.borrow().current;
        let frame = self
            .frames
            .get(current)
            .ok_or_else(|| ImageError::Animation(format!("帧索引越界：{}", current)))?;
        paint_frame(&frame.image, target)
    }

    fn delay_of(&self, index: usize) -> Duration {
        self.frames
            .get(index)
            .map(|f| f.delay)
            .unwrap_or(Duration::from_millis(100))
    }

    fn advance_locked(&self, playback: &mut Playback, now: Instant) -> bool {
        if self.frames.len() < 2 {
            return false;
        }

        let mut advanced = false;
        while let Some(due) = playback.due {
            if due > now {
                break;
            }

            // 无限循环：末帧之后回到首帧
            playback.current = (playback.current + 1) % self.frames.len();
            playback.due = Some(due + self.delay_of(playback.current));
            advanced = true;
        }

        advanced
    }

    fn schedule_next(&self) {
        if self.frames.len() < 2 {
            return;
        }

        let (task, due) = {
            let mut playback = self.playback.borrow_mut();
            let Some(due) = playback.due.filter(|_| playback.running) else {
                return;
            };
            if playback.pending.is_some() {
                return;
            }

            let task = FrameTask(self.next_task_id.get());
            self.next_task_id.set(task.0 + 1);
            playback.pending = Some(task);
            (task, due)
        };

        match self.callback() {
            Some(callback) => callback.schedule_at(due, task),
            // 无回调时无人执行该任务，清掉以便重新挂接后能再次申请
            None => self.playback.borrow_mut().pending = None,
        }
    }
}

/// 动图句柄在调度器中的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// 已登记，解码器尚未启动。
    Registered,
    /// 解码器已启动，重绘循环在跑。
    Running,
    /// 终态，附带停止原因。
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 同名登记了新句柄。
    Superseded,
    /// 名称已被注销，注册表中没有任何句柄。
    Unregistered,
    /// 宿主视图/样式已被回收。
    HostGone,
}

/// 权威动图记录：名称 + 解码器 + 可复用绘制缓冲 + 元数据。
///
/// 身份即指针：注册表用 `Rc::ptr_eq` 判断某个句柄是否仍是当前权威句柄。
pub struct AnimatedHandle {
    name: String,
    decoder: AnimatedFrames,
    buffer: RefCell<RasterBuffer>,
    info: ImageMetadata,
    state: Cell<LoopState>,
}

impl AnimatedHandle {
    pub(crate) fn new(name: &str, gif: DecodedGif, info: ImageMetadata) -> Self {
        let buffer = RasterBuffer::new(gif.width, gif.height);
        Self {
            name: name.to_string(),
            decoder: AnimatedFrames::new(gif),
            buffer: RefCell::new(buffer),
            info,
            state: Cell::new(LoopState::Registered),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decoder(&self) -> &AnimatedFrames {
        &self.decoder
    }

    pub fn info(&self) -> &ImageMetadata {
        &self.info
    }

    pub fn state(&self) -> LoopState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.state.set(state);
    }

    pub(crate) fn buffer(&self) -> &RefCell<RasterBuffer> {
        &self.buffer
    }

    /// 停止解码器并摘除回调。先停再摘，确保待执行的帧任务能被撤销。
    pub fn retire(&self) {
        self.decoder.stop();
        self.decoder.set_callback(None);
    }
}
