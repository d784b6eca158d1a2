//! DrainX - 版本化、引用计数的配置热更新库
//!
//! 在不中断正在处理的请求的前提下替换运行中的配置：请求开始时借用当前配置，
//! 结束时归还；重新加载产生新版本，旧版本在最后一个持有者归还后才被关闭。
//!
//! ## 模块
//!
//! - **drain**: 版本化配置存储（claim / release / reload / stop / stop_and_join）
//! - **component**: 组件组合层，把多个子资源的创建、沿用与关闭合成为 drain 的回调
//!
//! ## 设计理念
//!
//! - 🔄 **热更新**: 新版本原子发布，旧版本按引用计数排空
//! - 🔒 **只关闭一次**: 每个版本的 retire 回调恰好调用一次
//! - ⚡ **短临界区**: 加载与关闭都在锁外执行

pub mod component;
pub mod drain;

// 重新导出主要的公共 API
pub use drain::{
    ClaimGuard, ConfigClaim, Drain, DrainConfig, DrainError, DrainStats, Drainer, LoadFailure,
    LoadFn, RetireFn, INVALID_VERSION,
};

pub use component::{compose_load, compose_retire, AutoComponent, ComponentReloader, Components};
