//! 配置借用凭证
//!
//! claim 是对某一个配置版本的一次借用。版本号从 1 开始，0 表示无效凭证。

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::drain::Drain;

/// 无效版本号，归还后的凭证或默认构造的凭证都处于这个状态
pub const INVALID_VERSION: u64 = 0;

/// 配置借用凭证
///
/// 由 [`Drain::claim`] 发放，必须交还给同一个 [`Drain::release`]。release 按值接收凭证，
/// 归还之后不可能再通过它访问配置；凭证在未归还的情况下被丢弃会记录一条警告，
/// 因为对应版本的引用计数会一直无法归零。
#[must_use = "a claim must be handed back with Drain::release"]
pub struct ConfigClaim<C> {
    pub(crate) drain_id: u64,
    pub(crate) version: u64,
    pub(crate) config: Option<Arc<C>>,
}

impl<C> ConfigClaim<C> {
    pub(crate) fn new(drain_id: u64, version: u64, config: Arc<C>) -> Self {
        Self {
            drain_id,
            version,
            config: Some(config),
        }
    }

    /// 凭证对应的配置版本，无效凭证返回 0
    pub fn version(&self) -> u64 {
        self.version
    }

    /// 凭证对应的配置，无效凭证返回 None
    pub fn config(&self) -> Option<&C> {
        self.config.as_deref()
    }

    pub fn is_valid(&self) -> bool {
        self.version != INVALID_VERSION
    }

    /// 作废凭证并返回 (drain_id, version)，配置的引用在这里释放
    pub(crate) fn invalidate(&mut self) -> (u64, u64) {
        let version = std::mem::replace(&mut self.version, INVALID_VERSION);
        self.config = None;
        (self.drain_id, version)
    }
}

impl<C> Default for ConfigClaim<C> {
    fn default() -> Self {
        Self {
            drain_id: 0,
            version: INVALID_VERSION,
            config: None,
        }
    }
}

impl<C> fmt::Debug for ConfigClaim<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigClaim")
            .field("drain_id", &self.drain_id)
            .field("version", &self.version)
            .finish()
    }
}

impl<C> Drop for ConfigClaim<C> {
    fn drop(&mut self) {
        if self.is_valid() {
            tracing::warn!(
                drain_id = self.drain_id,
                version = self.version,
                "config claim dropped without release, version can no longer drain"
            );
        }
    }
}

/// 作用域内的配置借用
///
/// 通过 [`Drain::claim_guard`] 获得，可以直接解引用为配置，离开作用域（包括 panic 展开）
/// 时自动归还。
pub struct ClaimGuard<'a, C>
where
    C: Send + Sync + 'static,
{
    drain: &'a Drain<C>,
    claim: ConfigClaim<C>,
    config: Arc<C>,
}

impl<'a, C> ClaimGuard<'a, C>
where
    C: Send + Sync + 'static,
{
    pub(crate) fn new(drain: &'a Drain<C>, claim: ConfigClaim<C>, config: Arc<C>) -> Self {
        Self {
            drain,
            claim,
            config,
        }
    }

    pub fn version(&self) -> u64 {
        self.claim.version()
    }
}

impl<C> Deref for ClaimGuard<'_, C>
where
    C: Send + Sync + 'static,
{
    type Target = C;

    fn deref(&self) -> &C {
        &self.config
    }
}

impl<C> Drop for ClaimGuard<'_, C>
where
    C: Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.drain.release(std::mem::take(&mut self.claim));
    }
}
