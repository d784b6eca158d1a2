use std::fmt;
use thiserror::Error;

use super::claim::ConfigClaim;

/// 配置排空器相关错误类型
#[derive(Error, Debug)]
pub enum DrainError {
    /// 已经调用过 stop / stop_and_join，不再发放新的 claim
    #[error("drain already stopped")]
    Stopped,

    /// 加载器拒绝或未能构建候选配置，原样透传加载器返回的错误
    #[error(transparent)]
    Load(anyhow::Error),

    #[error("configuration validation failed: {0}")]
    InvalidConfig(String),

    /// stop_and_join_timeout 超时时仍未归还的 claim 数量
    #[error("timed out waiting for {outstanding} outstanding claims")]
    JoinTimeout { outstanding: u64 },
}

/// 加载失败
///
/// 除了错误本身，还可以携带一个构建到一半的配置。排空器会把它交给 retire 回调统一清理，
/// 这样部分打开的资源（连接、监听 socket 等）只需要在一个地方关闭。
pub struct LoadFailure<C> {
    pub partial: Option<C>,
    pub error: anyhow::Error,
}

impl<C> LoadFailure<C> {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            partial: None,
            error: error.into(),
        }
    }

    /// 携带部分构建的配置，失败后交给 retire 清理
    pub fn with_partial(partial: C, error: impl Into<anyhow::Error>) -> Self {
        Self {
            partial: Some(partial),
            error: error.into(),
        }
    }
}

impl<C> From<anyhow::Error> for LoadFailure<C> {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl<C> fmt::Debug for LoadFailure<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFailure")
            .field("partial", &self.partial.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// 加载并测试配置的回调
///
/// 参数是当前正在运行的配置，首次加载时为 None。返回 Err 时新配置不会被换入，
/// 调用 claim 的线程继续拿到旧配置。
pub type LoadFn<C> = dyn Fn(Option<&C>) -> Result<C, LoadFailure<C>> + Send + Sync;

/// 关闭配置、释放其资源的回调
///
/// 第一个参数是要关闭的配置（加载失败且没有部分配置时为 None），第二个参数是
/// 关闭时仍在运行的较新配置（最终停止时为 None）。可以比较两者决定底层资源
/// （例如没有变化的监听 socket）是否需要保留。每个版本最多调用一次，且从不在锁内调用。
pub type RetireFn<C> = dyn Fn(Option<&C>, Option<&C>) + Send + Sync;

/// 配置轮换接口
///
/// 调用 claim 拿到当前配置后必须调用 release 归还，否则 stop_and_join 会一直等待。
pub trait Drainer<C>: Send + Sync {
    /// 获取当前配置并登记引用，停止后返回 DrainError::Stopped
    fn claim(&self) -> Result<ConfigClaim<C>, DrainError>;

    /// 归还 claim；当某个已被替换的版本引用归零时在这里关闭它
    fn release(&self, claim: ConfigClaim<C>);

    /// 重新加载配置，失败时保持当前配置不变并返回加载器的错误
    fn reload(&self) -> Result<(), DrainError>;

    /// 标记停止，不等待未归还的 claim
    fn stop(&self);

    /// 标记停止并阻塞到所有 claim 归还、最后一个版本被关闭
    fn stop_and_join(&self);
}
