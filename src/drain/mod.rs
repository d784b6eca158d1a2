//! drain 模块 - 版本化配置排空
//!
//! 多个工作线程共享一份会被周期性替换的配置：线程 claim 当前配置、使用、release 归还，
//! 配置在仍被持有时绝不会被关闭；被替换的版本在最后一个持有者归还后关闭，且只关闭一次。

pub mod claim;
pub mod core;
#[allow(clippy::module_inception)]
pub mod drain;

pub use claim::{ClaimGuard, ConfigClaim, INVALID_VERSION};
pub use core::{DrainError, Drainer, LoadFailure, LoadFn, RetireFn};
pub use drain::{Drain, DrainConfig, DrainStats};
