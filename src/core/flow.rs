use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct FlowState {
    paused: bool,
    stopped: bool,
}

/// 下载循环的流控原语: 暂停 / 恢复 / 停止
///
/// 标志位与唤醒共用同一把锁, pause 与 wait_if_paused 之间
/// 不存在丢失唤醒的窗口; stop 是永久的并唤醒所有等待者
#[derive(Debug, Default)]
pub struct FlowController {
    state: Mutex<FlowState>,
    notify: Notify,
}

impl FlowController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = true;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().unwrap().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// 暂停时阻塞, 返回值表示是否已被停止
    ///
    /// 先注册通知再复查标志, 避免 resume/stop 发生在
    /// 检查与等待之间时错过唤醒
    pub async fn wait_if_paused(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().unwrap();
                if state.stopped {
                    return true;
                }
                if !state.paused {
                    return false;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_passes_when_not_paused() {
        let flow = FlowController::new();
        assert!(!flow.wait_if_paused().await);
    }

    #[tokio::test]
    async fn test_resume_wakes_paused_waiter() {
        let flow = Arc::new(FlowController::new());
        flow.pause();
        assert!(flow.is_paused());

        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        flow.resume();
        let stopped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!stopped);
    }

    #[tokio::test]
    async fn test_stop_wakes_paused_waiter() {
        let flow = Arc::new(FlowController::new());
        flow.pause();

        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        flow.stop();
        let stopped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
        // 停止后即使再 pause 也直接返回
        flow.pause();
        assert!(flow.wait_if_paused().await);
    }

    #[tokio::test]
    async fn test_stop_is_permanent() {
        let flow = FlowController::new();
        flow.stop();
        flow.resume();
        assert!(flow.is_stopped());
        assert!(flow.wait_if_paused().await);
    }
}
