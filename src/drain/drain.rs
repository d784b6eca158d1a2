use garde::Validate;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::claim::{ClaimGuard, ConfigClaim};
use super::core::{DrainError, Drainer, LoadFailure, LoadFn, RetireFn};

/// 第一个版本号，0 保留为无效版本
const FIRST_VERSION: u64 = 1;

/// 进程内唯一的 Drain 编号，用来识别 claim 属于哪个 Drain
static NEXT_DRAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Drain 配置
#[derive(Debug, Clone, Serialize, Deserialize, SmartDefault, Validate, PartialEq)]
#[serde(default)]
pub struct DrainConfig {
    /// 名称，附加在每条日志上
    #[default = "drain"]
    #[garde(length(min = 1))]
    pub name: String,

    /// stop_and_join 等待期间输出等待日志的间隔，单位：毫秒
    #[default = 5000]
    #[garde(range(min = 1))]
    pub join_log_interval_ms: u64,
}

impl DrainConfig {
    pub fn join_log_interval(&self) -> Duration {
        Duration::from_millis(self.join_log_interval_ms)
    }
}

/// Drain 状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// 当前版本，最后一个版本关闭后为 None
    pub current_version: Option<u64>,
    /// 尚未关闭的版本数量（包括当前版本）
    pub live_versions: usize,
    /// 所有版本上已发放但未归还的 claim 总数
    pub outstanding: u64,
    pub stopped: bool,
}

struct ConfigVersion<C> {
    version: u64,
    /// 持有这个版本的 claim 数量
    count: u64,
    config: Arc<C>,
}

/// 已从版本序列中摘除、等待在锁外关闭的版本
struct Retirement<C> {
    version: u64,
    config: Arc<C>,
    successor: Option<Arc<C>>,
}

struct DrainState<C> {
    /// 最旧的版本在前，当前版本在最后
    versions: VecDeque<ConfigVersion<C>>,
    outstanding: u64,
    /// 已摘除但 retire 尚未返回的版本数量
    retiring: usize,
    stopped: bool,
}

impl<C> DrainState<C> {
    fn position(&self, version: u64) -> Option<usize> {
        self.versions.iter().position(|v| v.version == version)
    }

    fn current_version(&self) -> Option<u64> {
        self.versions.back().map(|v| v.version)
    }

    /// 摘除所有可以关闭的版本
    ///
    /// 被替换且引用归零的版本总是可以关闭，关闭时以当前版本作为参照。
    /// 当前版本只有在停止之后、它是最后一个版本、引用归零并且没有其它版本正在关闭时才关闭，
    /// 这样较旧的版本关闭时总能拿到仍然存活的后继版本做比较。
    fn sweep(&mut self) -> Vec<Retirement<C>> {
        let pending = self.retiring;
        let mut drained = Vec::new();
        let mut i = 0;
        while i + 1 < self.versions.len() {
            if self.versions[i].count == 0 {
                drained.extend(self.versions.remove(i));
            } else {
                i += 1;
            }
        }

        let successor = self.versions.back().map(|v| Arc::clone(&v.config));
        let mut retirements: Vec<Retirement<C>> = drained
            .into_iter()
            .map(|v| Retirement {
                version: v.version,
                config: v.config,
                successor: successor.clone(),
            })
            .collect();

        let last_idle = self.versions.len() == 1 && self.versions[0].count == 0;
        if self.stopped && last_idle && pending == 0 {
            if let Some(v) = self.versions.pop_back() {
                retirements.push(Retirement {
                    version: v.version,
                    config: v.config,
                    successor: None,
                });
            }
        }

        self.retiring += retirements.len();
        retirements
    }
}

/// 版本化、引用计数的配置排空器
///
/// 持有配置的版本历史，每个版本单独计数。工作线程通过 [`Drain::claim`] 借用当前配置，
/// 用完后通过 [`Drain::release`] 归还；[`Drain::reload`] 加载新版本后，旧版本在最后一个
/// 持有者归还时通过 retire 回调关闭，且只关闭一次。
///
/// 锁只保护版本序列、计数和停止标记，load 与 retire 回调都在锁外执行，
/// 慢速的加载或关闭不会阻塞其它线程的 claim/release。
///
/// # 示例
///
/// ```
/// use drainx::{Drain, LoadFailure};
///
/// let drain = Drain::new(
///     |current: Option<&String>| -> Result<String, LoadFailure<String>> {
///         Ok(match current {
///             None => "listen=:8080".to_string(),
///             Some(_) => "listen=:9090".to_string(),
///         })
///     },
///     |_closing: Option<&String>, _current: Option<&String>| {},
/// )?;
///
/// let claim = drain.claim()?;
/// assert_eq!(claim.config().map(String::as_str), Some("listen=:8080"));
/// drain.reload()?;
/// drain.release(claim);
///
/// assert_eq!(drain.read(|cfg| cfg.clone())?, "listen=:9090");
/// drain.stop_and_join();
/// # Ok::<(), drainx::DrainError>(())
/// ```
pub struct Drain<C>
where
    C: Send + Sync + 'static,
{
    id: u64,
    name: String,
    join_log_interval: Duration,
    state: Mutex<DrainState<C>>,
    /// outstanding 与 retiring 都归零时通知 stop_and_join
    drained: Condvar,
    load: Box<LoadFn<C>>,
    retire: Box<RetireFn<C>>,
}

impl<C> Drain<C>
where
    C: Send + Sync + 'static,
{
    /// 使用默认配置创建 Drain，并完成第一次加载
    pub fn new<L, R>(load: L, retire: R) -> Result<Self, DrainError>
    where
        L: Fn(Option<&C>) -> Result<C, LoadFailure<C>> + Send + Sync + 'static,
        R: Fn(Option<&C>, Option<&C>) + Send + Sync + 'static,
    {
        Self::with_config(DrainConfig::default(), load, retire)
    }

    /// 创建 Drain 并完成第一次加载
    ///
    /// 第一次加载失败时不会产生 Drain：失败返回的部分配置交给 retire 清理，
    /// 加载器的错误原样返回。
    pub fn with_config<L, R>(config: DrainConfig, load: L, retire: R) -> Result<Self, DrainError>
    where
        L: Fn(Option<&C>) -> Result<C, LoadFailure<C>> + Send + Sync + 'static,
        R: Fn(Option<&C>, Option<&C>) + Send + Sync + 'static,
    {
        if let Err(errors) = config.validate() {
            return Err(DrainError::InvalidConfig(errors.to_string()));
        }

        let initial = match load(None) {
            Ok(initial) => initial,
            Err(failure) => {
                tracing::warn!(
                    drain = %config.name,
                    error = %failure.error,
                    "initial configuration load failed"
                );
                retire(failure.partial.as_ref(), None);
                return Err(DrainError::Load(failure.error));
            }
        };

        let mut versions = VecDeque::new();
        versions.push_back(ConfigVersion {
            version: FIRST_VERSION,
            count: 0,
            config: Arc::new(initial),
        });
        tracing::debug!(drain = %config.name, version = FIRST_VERSION, "drain started");

        Ok(Self {
            id: NEXT_DRAIN_ID.fetch_add(1, Ordering::Relaxed),
            join_log_interval: config.join_log_interval(),
            name: config.name,
            state: Mutex::new(DrainState {
                versions,
                outstanding: 0,
                retiring: 0,
                stopped: false,
            }),
            drained: Condvar::new(),
            load: Box::new(load),
            retire: Box::new(retire),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 锁内只有计数与指针操作，不会在持锁时 panic，中毒后的状态仍然一致
    fn lock_state(&self) -> MutexGuard<'_, DrainState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 借用当前配置
    ///
    /// 每次成功的 claim 都必须对应一次 [`Drain::release`]。
    pub fn claim(&self) -> Result<ConfigClaim<C>, DrainError> {
        let mut state = self.lock_state();
        if state.stopped {
            return Err(DrainError::Stopped);
        }
        let Some(current) = state.versions.back_mut() else {
            return Err(DrainError::Stopped);
        };
        current.count += 1;
        let claim = ConfigClaim::new(self.id, current.version, Arc::clone(&current.config));
        state.outstanding += 1;
        Ok(claim)
    }

    /// 归还 claim
    ///
    /// 无效 claim 直接忽略。归还后如果某个被替换的版本已无人持有（或已停止且这是最后一个版本），
    /// 在锁外调用 retire 关闭它。
    ///
    /// claim 必须交还给发放它的 Drain。交给别的 Drain 在 debug 构建下直接 panic，
    /// release 构建下记录错误，对应版本再也无法排空；需要自行处理时使用 [`Drain::try_release`]。
    pub fn release(&self, claim: ConfigClaim<C>) {
        debug_assert!(
            !claim.is_valid() || claim.drain_id == self.id,
            "claim released into a drain that did not issue it"
        );
        if let Err(foreign) = self.try_release(claim) {
            tracing::error!(
                drain = %self.name,
                version = foreign.version(),
                "release of a claim issued by another drain, its version can no longer drain"
            );
        }
    }

    /// 归还 claim，不属于这个 Drain 的 claim 原样退回
    pub fn try_release(&self, mut claim: ConfigClaim<C>) -> Result<(), ConfigClaim<C>> {
        if !claim.is_valid() {
            return Ok(());
        }
        if claim.drain_id != self.id {
            return Err(claim);
        }
        let (_, version) = claim.invalidate();

        let retirements = {
            let mut state = self.lock_state();
            let Some(index) = state.position(version) else {
                tracing::warn!(drain = %self.name, version, "release of unknown version");
                return Ok(());
            };
            state.versions[index].count -= 1;
            state.outstanding -= 1;
            let retirements = state.sweep();
            if state.outstanding == 0 {
                self.drained.notify_all();
            }
            retirements
        };

        self.retire_all(retirements);
        Ok(())
    }

    /// 借用当前配置，作用域结束时自动归还
    pub fn claim_guard(&self) -> Result<ClaimGuard<'_, C>, DrainError> {
        let mut claim = self.claim()?;
        match claim.config.take() {
            Some(config) => Ok(ClaimGuard::new(self, claim, config)),
            None => {
                self.release(claim);
                Err(DrainError::Stopped)
            }
        }
    }

    /// claim、读取、release 一步完成
    ///
    /// 停止后返回 [`DrainError::Stopped`]，回调不会被调用。回调 panic 时 claim 同样会归还。
    pub fn read<R>(&self, f: impl FnOnce(&C) -> R) -> Result<R, DrainError> {
        let guard = self.claim_guard()?;
        Ok(f(&guard))
    }

    /// 重新加载配置
    ///
    /// 加载期间持有一个当前版本的 claim，保证传给加载器的配置不会被关闭；加载器 panic 时
    /// 这个 claim 同样会归还。加载失败时状态不变，部分配置交给 retire 清理，返回加载器的错误；
    /// 成功时新版本原子地成为当前版本，若旧版本已无人持有则在返回前关闭。
    pub fn reload(&self) -> Result<(), DrainError> {
        let current = self.claim_guard()?;

        let config = match (self.load)(Some(&*current)) {
            Ok(config) => Arc::new(config),
            Err(failure) => {
                tracing::warn!(
                    drain = %self.name,
                    version = current.version(),
                    error = %failure.error,
                    "configuration reload rejected, keeping current version"
                );
                self.retire_one(failure.partial.as_ref(), Some(&*current));
                return Err(DrainError::Load(failure.error));
            }
        };

        let published = {
            let mut state = self.lock_state();
            if state.stopped {
                None
            } else {
                let version = state.current_version().unwrap_or(current.version()) + 1;
                state.versions.push_back(ConfigVersion {
                    version,
                    count: 0,
                    config: Arc::clone(&config),
                });
                Some(version)
            }
        };

        match published {
            Some(version) => {
                tracing::debug!(drain = %self.name, version, "configuration reloaded");
                Ok(())
            }
            None => {
                // 加载期间已经停止，新配置从未对外可见，直接关闭
                self.retire_one(Some(&config), Some(&*current));
                Err(DrainError::Stopped)
            }
        }
    }

    /// 停止发放 claim，不等待未归还的 claim
    ///
    /// 当前版本无人持有时立即关闭，但有一个例外：更旧的版本仍被持有时，当前版本会保留到
    /// 这些旧版本全部归还并关闭之后再关闭（以 None 作为参照）。旧版本关闭时需要拿当前版本做比较，
    /// 组件沿用的子资源才不会被提前关闭。
    pub fn stop(&self) {
        let retirements = {
            let mut state = self.lock_state();
            if !state.stopped {
                tracing::info!(
                    drain = %self.name,
                    outstanding = state.outstanding,
                    "drain stopping"
                );
            }
            state.stopped = true;
            state.sweep()
        };
        self.retire_all(retirements);
    }

    /// 停止并阻塞到所有 claim 归还、所有版本关闭完成
    pub fn stop_and_join(&self) {
        self.stop();
        // 没有截止时间时不会超时
        let _ = self.join(None);
    }

    /// 带截止时间的 stop_and_join
    ///
    /// 超时返回 [`DrainError::JoinTimeout`]，停止依然生效，最后一个版本会在最后一次
    /// release 时关闭。
    pub fn stop_and_join_timeout(&self, timeout: Duration) -> Result<(), DrainError> {
        self.stop();
        self.join(Some(Instant::now() + timeout))
    }

    fn join(&self, deadline: Option<Instant>) -> Result<(), DrainError> {
        let mut state = self.lock_state();
        while state.outstanding > 0 || state.retiring > 0 {
            let mut wait = self.join_log_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(DrainError::JoinTimeout {
                        outstanding: state.outstanding,
                    });
                }
                wait = wait.min(deadline - now);
            }

            let (guard, result) = self
                .drained
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            if result.timed_out() && wait == self.join_log_interval && state.outstanding > 0 {
                tracing::warn!(
                    drain = %self.name,
                    outstanding = state.outstanding,
                    "still waiting for outstanding claims"
                );
            }
        }

        // 最后一次 release 与这里竞争时版本可能已经关闭
        let retirements = state.sweep();
        drop(state);
        self.retire_all(retirements);

        tracing::info!(drain = %self.name, "drain stopped and joined");
        Ok(())
    }

    /// 在锁外依次关闭摘除的版本
    ///
    /// 关闭完成后再检查一次：停止后的最后一个版本可能一直在等这些版本关闭。
    fn retire_all(&self, mut retirements: Vec<Retirement<C>>) {
        while !retirements.is_empty() {
            let count = retirements.len();
            for retirement in retirements {
                tracing::debug!(
                    drain = %self.name,
                    version = retirement.version,
                    with_successor = retirement.successor.is_some(),
                    "retiring configuration version"
                );
                self.retire_one(Some(&retirement.config), retirement.successor.as_deref());
            }

            let mut state = self.lock_state();
            state.retiring -= count;
            retirements = state.sweep();
            if state.retiring == 0 {
                self.drained.notify_all();
            }
        }
    }

    /// 调用 retire 回调
    ///
    /// retire 不应失败；回调 panic 时记录错误并继续，计数照常更新，stop_and_join 不会因此卡住。
    fn retire_one(&self, closing: Option<&C>, current: Option<&C>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.retire)(closing, current)));
        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(drain = %self.name, panic = %message, "retire callback panicked");
        }
    }

    /// 当前版本号，最后一个版本关闭后为 None
    pub fn current_version(&self) -> Option<u64> {
        self.lock_state().current_version()
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    pub fn stats(&self) -> DrainStats {
        let state = self.lock_state();
        DrainStats {
            current_version: state.current_version(),
            live_versions: state.versions.len(),
            outstanding: state.outstanding,
            stopped: state.stopped,
        }
    }
}

impl<C> Drainer<C> for Drain<C>
where
    C: Send + Sync + 'static,
{
    fn claim(&self) -> Result<ConfigClaim<C>, DrainError> {
        Drain::claim(self)
    }

    fn release(&self, claim: ConfigClaim<C>) {
        Drain::release(self, claim)
    }

    fn reload(&self) -> Result<(), DrainError> {
        Drain::reload(self)
    }

    fn stop(&self) {
        Drain::stop(self)
    }

    fn stop_and_join(&self) {
        Drain::stop_and_join(self)
    }
}

/// 丢弃等同于 stop：无人持有的版本立即关闭
impl<C> Drop for Drain<C>
where
    C: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop();
        let state = self.lock_state();
        if !state.versions.is_empty() {
            tracing::warn!(
                drain = %self.name,
                outstanding = state.outstanding,
                live_versions = state.versions.len(),
                "drain dropped with outstanding claims, remaining versions are never retired"
            );
        }
    }
}
