//! 会话监管：取消与暂停请求
//!
//! 持有根 CancellationToken，Ctrl+C 时触发；编排循环在挂起点边界观察到取消即停在 PAUSED。
//! 子 Agent 使用子 token，父任务取消会一并传到子任务，子任务取消不影响父任务。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    /// 调用方主动请求暂停（区别于进程退出时的取消）
    pause_requested: Arc<AtomicBool>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            pause_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.cancel_token.cancel();
    }

    /// 在下一个迭代边界暂停
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单个任务）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Ctrl+C / SIGTERM 转成暂停请求：正在执行的工具跑完，任务停在 PAUSED 并可续跑
    pub fn install_signal_handlers(&self) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("received Ctrl+C, pausing at the next boundary");
                supervisor.request_pause();
            }
        });

        #[cfg(unix)]
        {
            let supervisor = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("received SIGTERM, pausing at the next boundary");
                    supervisor.request_pause();
                }
            });
        }
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
