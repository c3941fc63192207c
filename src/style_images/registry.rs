//! # 解析注册表
//!
//! ## 设计思路
//!
//! 注册表是 UI 上下文内的唯一真相来源，维护两张表：
//! - 订阅表：名称 → 有序订阅者列表，图片解析完成时按订阅顺序同步通知
//! - 动图表：名称 → 当前权威动图句柄，至多一个
//!
//! 注册表本身不负责停止动图：谁替换/注销了句柄，谁负责 `retire` 旧句柄；
//! 逐帧循环会在下一次存活检查时自行发现并退出。
//!
//! ## 实现思路
//!
//! - 内部状态都是 `RefCell`，只允许在 UI 上下文（`LocalSet`）中使用。
//! - 通知订阅者前先拷贝回调列表并释放借用，回调内再次订阅/取消不会冲突。
//! - 订阅句柄只持有 `Weak` 注册表，注册表先销毁时取消操作自然变为空操作。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::frames::AnimatedHandle;
use super::source::RasterBuffer;

/// 订阅回调：收到名称与已解析的缓冲。
pub type ResolveCallback = Rc<dyn Fn(&str, &RasterBuffer)>;

struct Subscription {
    id: u64,
    callback: ResolveCallback,
}

/// 解析注册表。
#[derive(Default)]
pub struct ResolutionRegistry {
    subscriptions: RefCell<HashMap<String, Vec<Subscription>>>,
    animated: RefCell<HashMap<String, Rc<AnimatedHandle>>>,
    next_id: Cell<u64>,
}

/// 订阅句柄。调用 `cancel` 只移除这一个订阅。
pub struct SubscriptionHandle {
    registry: Weak<ResolutionRegistry>,
    name: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 取消订阅。注册表已销毁时为空操作。
    pub fn cancel(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_subscription(&self.name, self.id);
        }
    }
}

impl ResolutionRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// 订阅某个名称的解析结果。同一名称的多个订阅按登记顺序通知。
    pub fn subscribe<F>(self: &Rc<Self>, name: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &RasterBuffer) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        self.subscriptions
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push(Subscription {
                id,
                callback: Rc::new(callback),
            });

        SubscriptionHandle {
            registry: Rc::downgrade(self),
            name: name.to_string(),
            id,
        }
    }

    fn remove_subscription(&self, name: &str, id: u64) {
        let mut subscriptions = self.subscriptions.borrow_mut();
        if let Some(list) = subscriptions.get_mut(name) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscriptions.remove(name);
            }
        }
    }

    /// 当前订阅数。
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscriptions.borrow().get(name).map_or(0, Vec::len)
    }

    /// 通知某个名称的全部订阅者。无订阅者时为空操作。
    pub fn resolve(&self, name: &str, bitmap: &RasterBuffer) {
        let callbacks: Vec<ResolveCallback> = match self.subscriptions.borrow().get(name) {
            Some(list) => list.iter().map(|s| Rc::clone(&s.callback)).collect(),
            None => return,
        };

        log::debug!("📣 通知订阅者 - name={} count={}", name, callbacks.len());
        for callback in callbacks {
            callback(name, bitmap);
        }
    }

    /// 登记权威动图句柄，直接覆盖同名旧句柄。旧句柄由调用方负责停止。
    pub fn register_animated(&self, name: &str, handle: Rc<AnimatedHandle>) {
        let previous = self.animated.borrow_mut().insert(name.to_string(), handle);
        if previous.is_some() {
            log::debug!("🔁 动图句柄已被替换 - name={}", name);
        }
    }

    /// 注销并返回当前句柄。返回的句柄由调用方负责 `retire`。
    pub fn unregister_animated(&self, name: &str) -> Option<Rc<AnimatedHandle>> {
        self.animated.borrow_mut().remove(name)
    }

    /// 判断是否存在登记。给定 `handle` 时，只有其与当前登记是同一实例才返回 `true`。
    pub fn is_animated_registered(&self, name: &str, handle: Option<&Rc<AnimatedHandle>>) -> bool {
        match (self.animated.borrow().get(name), handle) {
            (Some(current), Some(candidate)) => Rc::ptr_eq(current, candidate),
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// 取当前权威句柄。
    pub fn animated_handle(&self, name: &str) -> Option<Rc<AnimatedHandle>> {
        self.animated.borrow().get(name).cloned()
    }

    /// 当前登记的动图名称。
    pub fn animated_names(&self) -> Vec<String> {
        self.animated.borrow().keys().cloned().collect()
    }

    /// 停止并清空全部动图登记。已为空时为空操作。
    pub fn clear_animated(&self) {
        let drained: Vec<Rc<AnimatedHandle>> = self.animated.borrow_mut().drain().map(|(_, h)| h).collect();
        if drained.is_empty() {
            return;
        }

        log::info!("🧹 清空动图登记 - count={}", drained.len());
        for handle in drained {
            handle.retire();
        }
    }
}
