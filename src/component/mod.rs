//! component 模块 - 组件化配置
//!
//! 把一份配置拆成若干可独立重建或沿用的组件，合成 [`Drain`](crate::drain::Drain)
//! 需要的 load / retire 回调。

pub mod auto_component;
pub mod composer;
pub mod core;

pub use auto_component::AutoComponent;
pub use composer::{compose_load, compose_retire, Components};
pub use core::ComponentReloader;
