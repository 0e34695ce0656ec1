//! 刷新协调器模块职责：
//! 1. 将并发的 401 收敛为至多一次在途刷新调用（single-flight）。
//! 2. 刷新期间到达的请求按 FIFO 排队，刷新落定后按加入顺序统一释放。
//! 3. IDLE → REFRESHING 的检查与置位在同一把锁内完成，保证原子性。

use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};

use crate::error::ApiError;

/// 刷新结果广播类型；错误以 `Arc` 共享给所有排队者。
pub(crate) type RefreshResult = Result<(), Arc<ApiError>>;

/// `begin` 的判定结果。
pub(crate) enum RefreshRole {
    /// 首个观察到 401 的请求，负责发起刷新调用。
    Leader,
    /// 刷新已在途；持有接收端等待其落定。
    Follower(oneshot::Receiver<RefreshResult>),
}

/// 协调器内部状态：单飞标志 + FIFO 等待队列。
struct RefreshState {
    /// 是否有刷新在途。
    refreshing: bool,
    /// 排队等待的请求，按加入顺序存放。
    waiters: Vec<oneshot::Sender<RefreshResult>>,
}

/// 单飞刷新协调器。
pub(crate) struct RefreshCoordinator {
    /// 独占状态；所有检查与变更都在锁内完成。
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    /// 构造空闲状态的协调器。
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState {
                refreshing: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// 原子地判定角色：空闲则进入 REFRESHING 并成为 Leader，否则排队。
    pub(crate) async fn begin(&self) -> RefreshRole {
        let mut state = self.state.lock().await;
        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            RefreshRole::Follower(rx)
        } else {
            state.refreshing = true;
            RefreshRole::Leader
        }
    }

    /// 刷新落定：回到 IDLE，并按加入顺序将结果派发给全部排队者。
    ///
    /// 每个排队者恰好收到一次结果，协调器不会留下未决的等待者。
    pub(crate) async fn finish(&self, result: RefreshResult) {
        let mut state = self.state.lock().await;
        state.refreshing = false;
        for waiter in state.waiters.drain(..) {
            // 接收端可能已被丢弃（请求方整体被放弃），忽略发送失败。
            let _ = waiter.send(result.clone());
        }
    }
}
