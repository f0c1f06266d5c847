//! 准入控制器：共享推理后端的唯一入口
//!
//! - 固定数量的并发槽位；有空槽立即执行
//! - 无空槽时按 (优先级, 提交时间) 排队，等待到槽位释放或超时
//! - 队列满时拒绝（或挤掉优先级更低的排队请求）
//! - 超时（排队中或执行中）统一返回 Throttled；Agent 出错返回 Failure
//! - 已在运行的请求不会被后到的高优先级请求抢占，优先级只影响出队顺序
//!
//! 槽位与队列放在同一把互斥锁下，锁从不跨 await 持有。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::GateError;
use super::state::RequestState;
use super::task_scheduler::{PendingQueue, Priority, QueueEntry, RequestId};
use crate::agent::{AgentArgs, AgentCallable, AgentError, AgentResult};
use crate::config::AdmissionSection;
use crate::response::{MoodContext, ResponseNormalizer, DEFAULT_THROTTLE_MESSAGE};

/// 超大 timeout（如 Duration::MAX）时截断到的等待上限
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// 准入参数
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// 同时执行的 Agent 调用上限
    pub max_concurrent: usize,
    /// 排队上限
    pub queue_capacity: usize,
    /// 单用户并发上限，None 表示不限制
    pub per_user_limit: Option<usize>,
    /// 调用方未指定时的超时
    pub default_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 32,
            per_user_limit: None,
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AdmissionSection> for AdmissionConfig {
    fn from(section: &AdmissionSection) -> Self {
        Self {
            max_concurrent: section.max_concurrent,
            queue_capacity: section.queue_capacity,
            per_user_limit: section.per_user_limit,
            default_timeout: Duration::from_secs(section.default_timeout_secs),
        }
    }
}

/// 限流原因（只用于统计，对用户的表现完全一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleCause {
    /// 队列已满，或被更高优先级请求挤出队列
    QueueFull,
    /// 排队或执行超时
    Timeout,
    /// 控制器已关闭
    Shutdown,
}

impl ThrottleCause {
    pub fn tag(self) -> &'static str {
        match self {
            ThrottleCause::QueueFull => "queue_full",
            ThrottleCause::Timeout => "timeout",
            ThrottleCause::Shutdown => "shutdown",
        }
    }
}

/// 一次提交的结果：每次 submit 恰好得到一个 Outcome，从不 panic 或返回错误
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(AgentResult),
    Throttled { message: String, cause: ThrottleCause },
    Failure(GateError),
}

impl Outcome {
    pub fn throttled(cause: ThrottleCause) -> Self {
        Outcome::Throttled {
            message: DEFAULT_THROTTLE_MESSAGE.to_string(),
            cause,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn throttle_cause(&self) -> Option<ThrottleCause> {
        match self {
            Outcome::Throttled { cause, .. } => Some(*cause),
            _ => None,
        }
    }
}

/// 一次提交（创建后不可变，Outcome 产生后丢弃）
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub priority: Priority,
    pub user_id: String,
    pub timeout: Duration,
    pub args: AgentArgs,
    pub submitted_at: Instant,
}

impl Request {
    fn new(priority: Priority, user_id: String, timeout: Duration, args: AgentArgs) -> Self {
        Self {
            id: RequestId::new(),
            priority,
            user_id,
            timeout,
            args,
            submitted_at: Instant::now(),
        }
    }

    /// 排队 + 执行的截止时间
    fn deadline(&self) -> Instant {
        self.submitted_at
            .checked_add(self.timeout)
            .unwrap_or_else(|| self.submitted_at + FAR_FUTURE)
    }
}

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub throttled_queue_full: u64,
    pub throttled_timeout: u64,
    pub throttled_shutdown: u64,
    pub running: usize,
    pub queued: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    queue_full: AtomicU64,
    timeout: AtomicU64,
    shutdown: AtomicU64,
}

/// 占用中的槽位；Drop 时归还并唤醒下一个排队请求
struct SlotGuard {
    shared: Arc<Shared>,
    user_id: String,
    armed: bool,
}

impl SlotGuard {
    /// 不归还槽位地丢弃（计数已由持锁方回滚）
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.release(&self.user_id);
        }
    }
}

struct SlotState {
    running: usize,
    per_user: HashMap<String, usize>,
    queue: PendingQueue<oneshot::Sender<SlotGuard>>,
}

fn user_has_room(per_user: &HashMap<String, usize>, user_id: &str, limit: Option<usize>) -> bool {
    limit
        .map(|limit| per_user.get(user_id).copied().unwrap_or(0) < limit)
        .unwrap_or(true)
}

fn occupy(running: &mut usize, per_user: &mut HashMap<String, usize>, user_id: &str) {
    *running += 1;
    *per_user.entry(user_id.to_string()).or_insert(0) += 1;
}

fn vacate(running: &mut usize, per_user: &mut HashMap<String, usize>, user_id: &str) {
    *running = running.saturating_sub(1);
    if let Some(count) = per_user.get_mut(user_id) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            per_user.remove(user_id);
        }
    }
}

struct Shared {
    config: AdmissionConfig,
    state: Mutex<SlotState>,
    counters: Counters,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self: &Arc<Self>, user_id: &str) {
        let mut guard = self.lock();
        let state = &mut *guard;
        vacate(&mut state.running, &mut state.per_user, user_id);
        self.dispatch(state);
    }

    /// 有空槽就按队列顺序把槽位交给等待者（调用方持锁）
    fn dispatch(self: &Arc<Self>, state: &mut SlotState) {
        let limit = self.config.per_user_limit;
        let SlotState {
            running,
            per_user,
            queue,
        } = state;

        while *running < self.config.max_concurrent {
            let Some(entry) = queue.pop_next(|e| user_has_room(per_user, &e.user_id, limit)) else {
                break;
            };
            occupy(running, per_user, &entry.user_id);
            let slot = SlotGuard {
                shared: Arc::clone(self),
                user_id: entry.user_id.clone(),
                armed: true,
            };
            match entry.payload.send(slot) {
                Ok(()) => debug!(request_id = entry.id.value(), "slot handed to queued request"),
                Err(slot) => {
                    // 等待者已离开（超时或被取消）
                    slot.disarm();
                    vacate(running, per_user, &entry.user_id);
                    debug!(request_id = entry.id.value(), "queued request gone, skipping");
                }
            }
        }
    }
}

enum Admission {
    Granted(SlotGuard),
    Queued(QueuedTicket),
    Rejected(ThrottleCause),
}

/// 排队凭证；Drop 时（超时、被取消或调用方放弃等待）把条目移出队列，已送达但未取走的槽位随之归还
struct QueuedTicket {
    shared: Arc<Shared>,
    id: RequestId,
    rx: oneshot::Receiver<SlotGuard>,
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(slot) = self.rx.try_recv() {
            drop(slot);
        }
        let removed = self.shared.lock().queue.remove(self.id);
        if removed.is_some() {
            debug!(request_id = self.id.value(), "queued request withdrawn");
        }
    }
}

/// Drop 时中止任务（超时或调用方放弃等待时）
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// 准入控制器（进程内构造一次，clone 出的句柄共享同一组槽位与队列）
#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
    normalizer: ResponseNormalizer,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_normalizer(config, ResponseNormalizer::default())
    }

    pub fn with_normalizer(mut config: AdmissionConfig, normalizer: ResponseNormalizer) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        if config.per_user_limit == Some(0) {
            config.per_user_limit = Some(1);
        }
        let queue = PendingQueue::new(config.queue_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SlotState {
                    running: 0,
                    per_user: HashMap::new(),
                    queue,
                }),
                counters: Counters::default(),
                shutdown: CancellationToken::new(),
            }),
            normalizer,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.shared.config
    }

    pub fn normalizer(&self) -> &ResponseNormalizer {
        &self.normalizer
    }

    /// 提交一次 Agent 调用；timeout 覆盖排队 + 执行的总时长
    pub async fn submit(
        &self,
        agent: Arc<dyn AgentCallable>,
        priority: Priority,
        user_id: impl Into<String>,
        timeout: Duration,
        args: AgentArgs,
    ) -> Outcome {
        let request = Request::new(priority, user_id.into(), timeout, args);
        let deadline = request.deadline();
        let mut state = RequestState::Idle;
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let slot = match self.admit(&request) {
            Admission::Granted(slot) => slot,
            Admission::Queued(ticket) => {
                advance(&request, &mut state, RequestState::Queued);
                match self.wait_for_slot(ticket, deadline).await {
                    Ok(slot) => slot,
                    Err(cause) => {
                        let next = if cause == ThrottleCause::Timeout {
                            RequestState::TimedOut
                        } else {
                            RequestState::Rejected
                        };
                        advance(&request, &mut state, next);
                        return self.throttled(&request, cause);
                    }
                }
            }
            Admission::Rejected(cause) => {
                advance(&request, &mut state, RequestState::Rejected);
                return self.throttled(&request, cause);
            }
        };

        advance(&request, &mut state, RequestState::Running);
        let outcome = self.execute(agent, &request, slot, deadline).await;
        match &outcome {
            Outcome::Success(_) => {
                advance(&request, &mut state, RequestState::Completed);
                self.shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failure(err) => {
                advance(&request, &mut state, RequestState::Completed);
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = request.id.value(),
                    user_id = %request.user_id,
                    situation = err.situation().tag(),
                    %err,
                    "agent call failed"
                );
            }
            Outcome::Throttled { cause, .. } => {
                advance(&request, &mut state, RequestState::TimedOut);
                return self.throttled(&request, *cause);
            }
        }
        outcome
    }

    /// submit + 归一化：返回可以直接给用户的字符串
    pub async fn respond(
        &self,
        agent: Arc<dyn AgentCallable>,
        priority: Priority,
        user_id: impl Into<String>,
        timeout: Duration,
        args: AgentArgs,
        mood: &MoodContext,
    ) -> String {
        let query = args.query.clone();
        let outcome = self.submit(agent, priority, user_id, timeout, args).await;
        self.normalizer.normalize_outcome(&outcome, &query, mood)
    }

    /// 关闭：排队中的请求立即以 Throttled(Shutdown) 结束，之后的提交直接拒绝；运行中的请求不受影响
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let drained = self.shared.lock().queue.drain();
        info!(dropped = drained.len(), "admission controller shut down");
        drop(drained);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> AdmissionStats {
        let (running, queued) = {
            let state = self.shared.lock();
            (state.running, state.queue.len())
        };
        let c = &self.shared.counters;
        AdmissionStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            throttled_queue_full: c.queue_full.load(Ordering::Relaxed),
            throttled_timeout: c.timeout.load(Ordering::Relaxed),
            throttled_shutdown: c.shutdown.load(Ordering::Relaxed),
            running,
            queued,
        }
    }

    fn admit(&self, request: &Request) -> Admission {
        let config = &self.shared.config;
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        // 与 shutdown() 的 drain 在同一把锁下判断
        if self.is_shutdown() {
            return Admission::Rejected(ThrottleCause::Shutdown);
        }

        // 有空槽时队列里不会有可调度的条目（每次释放都会立即派发）
        if state.running < config.max_concurrent
            && user_has_room(&state.per_user, &request.user_id, config.per_user_limit)
        {
            occupy(&mut state.running, &mut state.per_user, &request.user_id);
            info!(
                request_id = request.id.value(),
                user_id = %request.user_id,
                priority = ?request.priority,
                "request admitted"
            );
            return Admission::Granted(SlotGuard {
                shared: Arc::clone(&self.shared),
                user_id: request.user_id.clone(),
                armed: true,
            });
        }

        if state.queue.is_full() {
            match state.queue.lowest_priority() {
                Some(lowest) if lowest < request.priority => {
                    if let Some(evicted) = state.queue.evict_lowest() {
                        info!(
                            request_id = evicted.id.value(),
                            by = request.id.value(),
                            "queued request evicted by higher priority"
                        );
                    }
                }
                _ => {
                    debug!(
                        request_id = request.id.value(),
                        capacity = state.queue.capacity(),
                        "queue full, request rejected"
                    );
                    return Admission::Rejected(ThrottleCause::QueueFull);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry {
            id: request.id,
            priority: request.priority,
            user_id: request.user_id.clone(),
            submitted_at: request.submitted_at,
            payload: tx,
        };
        match state.queue.push(entry) {
            Ok(()) => {
                info!(
                    request_id = request.id.value(),
                    user_id = %request.user_id,
                    priority = ?request.priority,
                    queued = state.queue.len(),
                    "request queued"
                );
                Admission::Queued(QueuedTicket {
                    shared: Arc::clone(&self.shared),
                    id: request.id,
                    rx,
                })
            }
            Err(_) => Admission::Rejected(ThrottleCause::QueueFull),
        }
    }

    /// 等待派发；ticket 在返回时释放（超时瞬间恰好送达的槽位也会被归还）
    async fn wait_for_slot(
        &self,
        mut ticket: QueuedTicket,
        deadline: Instant,
    ) -> Result<SlotGuard, ThrottleCause> {
        match timeout_at(deadline, &mut ticket.rx).await {
            Ok(Ok(slot)) => Ok(slot),
            Ok(Err(_)) if self.is_shutdown() => Err(ThrottleCause::Shutdown),
            Ok(Err(_)) => Err(ThrottleCause::QueueFull),
            Err(_) => Err(ThrottleCause::Timeout),
        }
    }

    async fn execute(
        &self,
        agent: Arc<dyn AgentCallable>,
        request: &Request,
        slot: SlotGuard,
        deadline: Instant,
    ) -> Outcome {
        let user_id = request.user_id.clone();
        let args = request.args.clone();
        let agent_name = agent.name().to_string();

        // 槽位随任务一起结束（正常返回、panic 或被中止）
        let handle = tokio::spawn(async move {
            let _slot = slot;
            agent.call(&user_id, &args).await
        });
        let _abort = AbortOnDrop(handle.abort_handle());

        match timeout_at(deadline, handle).await {
            Ok(Ok(Ok(result))) => {
                debug!(
                    request_id = request.id.value(),
                    agent = %agent_name,
                    kind = result.kind(),
                    "agent call completed"
                );
                Outcome::Success(result)
            }
            Ok(Ok(Err(err))) => Outcome::Failure(GateError::from(err)),
            Ok(Err(join_err)) if join_err.is_panic() => Outcome::Failure(
                GateError::UpstreamFailure(format!("agent '{agent_name}' panicked")),
            ),
            Ok(Err(_)) => Outcome::Failure(GateError::from(AgentError::Cancelled)),
            Err(_) => Outcome::throttled(ThrottleCause::Timeout),
        }
    }

    fn throttled(&self, request: &Request, cause: ThrottleCause) -> Outcome {
        let counter = match cause {
            ThrottleCause::QueueFull => &self.shared.counters.queue_full,
            ThrottleCause::Timeout => &self.shared.counters.timeout,
            ThrottleCause::Shutdown => &self.shared.counters.shutdown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        warn!(
            request_id = request.id.value(),
            user_id = %request.user_id,
            priority = ?request.priority,
            cause = cause.tag(),
            waited_ms = request.submitted_at.elapsed().as_millis() as u64,
            "request throttled"
        );
        Outcome::throttled(cause)
    }
}

fn advance(request: &Request, state: &mut RequestState, next: RequestState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {state:?} -> {next:?}"
    );
    debug!(
        request_id = request.id.value(),
        from = ?*state,
        to = ?next,
        "request state"
    );
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, FnAgent};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn controller(max_concurrent: usize, queue_capacity: usize) -> AdmissionController {
        AdmissionController::new(AdmissionConfig {
            max_concurrent,
            queue_capacity,
            ..AdmissionConfig::default()
        })
    }

    /// 阻塞直到 gate 被 notify 的 Agent
    fn gated(gate: Arc<Notify>) -> Arc<dyn AgentCallable> {
        Arc::new(FnAgent::new("gated", move |_user: String, _args: AgentArgs| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(AgentResult::Text("released".into()))
            }
        }))
    }

    /// 记录执行顺序的 Agent
    fn recording(log: Arc<Mutex<Vec<String>>>) -> Arc<dyn AgentCallable> {
        Arc::new(FnAgent::new("recording", move |_user: String, args: AgentArgs| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(args.query.clone());
                Ok(AgentResult::Text(args.query))
            }
        }))
    }

    async fn wait_until<F: Fn(&AdmissionStats) -> bool>(ctl: &AdmissionController, cond: F) {
        for _ in 0..1000 {
            if cond(&ctl.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached: {:?}", ctl.stats());
    }

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_immediate_dispatch() {
        let ctl = controller(2, 4);
        let log = Arc::new(Mutex::new(Vec::new()));
        let out = ctl
            .submit(recording(log), Priority::UserConversation, "u", LONG, AgentArgs::new("hello"))
            .await;
        assert_eq!(out, Outcome::Success(AgentResult::Text("hello".into())));
        let stats = ctl.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_higher_priority_dispatched_first() {
        let ctl = controller(1, 8);
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let low = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::Background, "b", LONG, AgentArgs::new("low")).await
            })
        };
        wait_until(&ctl, |s| s.queued == 1).await;

        let high = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::SystemCritical, "c", LONG, AgentArgs::new("high"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.queued == 2).await;

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(high.await.unwrap().is_success());
        assert!(low.await.unwrap().is_success());
        assert_eq!(*log.lock().unwrap(), vec!["high".to_string(), "low".to_string()]);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_and_evicts() {
        let ctl = controller(1, 1);
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let queued_low = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::Background, "b", LONG, AgentArgs::new("low")).await
            })
        };
        wait_until(&ctl, |s| s.queued == 1).await;

        // 同优先级：直接拒绝
        let rejected = ctl
            .submit(recording(log.clone()), Priority::Background, "c", LONG, AgentArgs::new("same"))
            .await;
        assert_eq!(rejected.throttle_cause(), Some(ThrottleCause::QueueFull));

        // 更高优先级：挤掉排队中的低优先级请求
        let high = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::SystemCritical, "d", LONG, AgentArgs::new("high"))
                    .await
            })
        };
        let evicted = queued_low.await.unwrap();
        assert_eq!(evicted.throttle_cause(), Some(ThrottleCause::QueueFull));

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(high.await.unwrap().is_success());
        assert_eq!(*log.lock().unwrap(), vec!["high".to_string()]);
        assert_eq!(ctl.stats().throttled_queue_full, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout_releases_slot() {
        let ctl = controller(1, 4);
        let stall: Arc<dyn AgentCallable> =
            Arc::new(FnAgent::new("stall", |_user: String, _args: AgentArgs| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(AgentResult::Empty)
            }));

        let start = Instant::now();
        let timeout = Duration::from_millis(100);
        let out = ctl
            .submit(stall, Priority::UserConversation, "u", timeout, AgentArgs::new("x"))
            .await;
        assert_eq!(out.throttle_cause(), Some(ThrottleCause::Timeout));
        assert!(start.elapsed() < timeout + Duration::from_millis(50));

        wait_until(&ctl, |s| s.running == 0).await;
        assert_eq!(ctl.stats().throttled_timeout, 1);
    }

    #[tokio::test]
    async fn test_queue_timeout_leaves_queue() {
        let ctl = controller(1, 4);
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let out = ctl
            .submit(
                recording(log.clone()),
                Priority::SystemCritical,
                "b",
                Duration::from_millis(30),
                AgentArgs::new("late"),
            )
            .await;
        assert_eq!(out.throttle_cause(), Some(ThrottleCause::Timeout));
        assert_eq!(ctl.stats().queued, 0);

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agent_error_and_panic_become_failure() {
        let ctl = controller(2, 4);
        let failing: Arc<dyn AgentCallable> =
            Arc::new(FnAgent::new("failing", |_user: String, _args: AgentArgs| async {
                Err(AgentError::Failed("graph offline".into()))
            }));
        let out = ctl
            .submit(failing, Priority::UserConversation, "u", LONG, AgentArgs::new("q"))
            .await;
        assert!(matches!(out, Outcome::Failure(GateError::UpstreamFailure(_))));

        let panicking: Arc<dyn AgentCallable> =
            Arc::new(FnAgent::new("panicking", |_user: String, _args: AgentArgs| async {
                if true {
                    panic!("agent exploded");
                }
                Ok(AgentResult::Empty)
            }));
        let out = ctl
            .submit(panicking, Priority::UserConversation, "u", LONG, AgentArgs::new("q"))
            .await;
        match out {
            Outcome::Failure(GateError::UpstreamFailure(msg)) => assert!(msg.contains("panicked")),
            other => panic!("unexpected {other:?}"),
        }
        wait_until(&ctl, |s| s.running == 0).await;
        assert_eq!(ctl.stats().failed, 2);
    }

    #[tokio::test]
    async fn test_per_user_limit() {
        let ctl = AdmissionController::new(AdmissionConfig {
            max_concurrent: 2,
            queue_capacity: 4,
            per_user_limit: Some(1),
            ..AdmissionConfig::default()
        });
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "alice", LONG, AgentArgs::new("a1"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let second = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "alice", LONG, AgentArgs::new("a2"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.queued == 1).await;
        assert_eq!(ctl.stats().running, 1);

        // 其他用户不受 alice 的上限影响
        let bob = ctl
            .submit(recording(log.clone()), Priority::Background, "bob", LONG, AgentArgs::new("b1"))
            .await;
        assert!(bob.is_success());

        gate.notify_one();
        assert!(first.await.unwrap().is_success());
        assert!(second.await.unwrap().is_success());
        assert_eq!(*log.lock().unwrap(), vec!["b1".to_string(), "a2".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_resolves_queued_requests() {
        let ctl = controller(1, 4);
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let queued = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "b", LONG, AgentArgs::new("q")).await
            })
        };
        wait_until(&ctl, |s| s.queued == 1).await;

        ctl.shutdown();
        assert_eq!(queued.await.unwrap().throttle_cause(), Some(ThrottleCause::Shutdown));
        let late = ctl
            .submit(recording(log.clone()), Priority::SystemCritical, "c", LONG, AgentArgs::new("late"))
            .await;
        assert_eq!(late.throttle_cause(), Some(ThrottleCause::Shutdown));

        // 运行中的请求不受影响
        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_never_exceeds_limit() {
        let ctl = controller(3, 64);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let agent: Arc<dyn AgentCallable> = {
            let active = active.clone();
            let peak = peak.clone();
            Arc::new(FnAgent::new("counting", move |_user: String, _args: AgentArgs| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(AgentResult::Text("ok".into()))
                }
            }))
        };

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let ctl = ctl.clone();
                let agent = agent.clone();
                tokio::spawn(async move {
                    ctl.submit(
                        agent,
                        Priority::UserConversation,
                        format!("user-{}", i % 5),
                        Duration::from_secs(10),
                        AgentArgs::new(format!("q{i}")),
                    )
                    .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_success());
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let stats = ctl.stats();
        assert_eq!(stats.completed, 40);
        assert_eq!(stats.running, 0);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_is_accepted() {
        let ctl = controller(1, 4);
        let log = Arc::new(Mutex::new(Vec::new()));
        let out = ctl
            .submit(recording(log.clone()), Priority::UserConversation, "u", Duration::MAX, AgentArgs::new("now"))
            .await;
        assert!(out.is_success());

        let gate = Arc::new(Notify::new());
        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", Duration::MAX, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;
        let queued = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::Background, "b", Duration::MAX, AgentArgs::new("later"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.queued == 1).await;

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(queued.await.unwrap().is_success());
        assert_eq!(*log.lock().unwrap(), vec!["now".to_string(), "later".to_string()]);
    }

    #[tokio::test]
    async fn test_abandoned_wait_frees_queue_capacity() {
        let ctl = controller(1, 1);
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        // 调用方自己的超时先到，submit future 被丢弃
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            ctl.submit(
                recording(log.clone()),
                Priority::UserConversation,
                "b",
                Duration::from_secs(60),
                AgentArgs::new("abandoned"),
            ),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(ctl.stats().queued, 0);

        let live = {
            let ctl = ctl.clone();
            let agent = recording(log.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "c", LONG, AgentArgs::new("live")).await
            })
        };
        wait_until(&ctl, |s| s.queued == 1).await;

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(live.await.unwrap().is_success());
        assert_eq!(*log.lock().unwrap(), vec!["live".to_string()]);
        assert_eq!(ctl.stats().throttled_queue_full, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_request_queued_after_shutdown() {
        let ctl = controller(1, 64);
        let gate = Arc::new(Notify::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let ctl = ctl.clone();
                let agent = recording(log.clone());
                tokio::spawn(async move {
                    ctl.submit(agent, Priority::SystemCritical, format!("u{i}"), LONG, AgentArgs::new(format!("q{i}")))
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        ctl.shutdown();

        for task in tasks {
            assert_eq!(task.await.unwrap().throttle_cause(), Some(ThrottleCause::Shutdown));
        }
        assert_eq!(ctl.stats().queued, 0);

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_respond_returns_natural_text() {
        let ctl = controller(1, 0);
        let gate = Arc::new(Notify::new());
        let blocker = {
            let ctl = ctl.clone();
            let agent = gated(gate.clone());
            tokio::spawn(async move {
                ctl.submit(agent, Priority::UserConversation, "a", LONG, AgentArgs::new("block"))
                    .await
            })
        };
        wait_until(&ctl, |s| s.running == 1).await;

        let reply = ctl
            .respond(
                gated(gate.clone()),
                Priority::UserConversation,
                "b",
                LONG,
                AgentArgs::new("Hi"),
                &MoodContext::default(),
            )
            .await;
        assert!(["Hi", "Hello", "Hey"].iter().any(|w| reply.contains(w)), "{reply}");
        assert!(reply.contains("moment") || reply.contains("processing"));

        gate.notify_one();
        assert!(blocker.await.unwrap().is_success());
    }
}
