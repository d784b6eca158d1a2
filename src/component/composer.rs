//! 把按顺序声明的组件合成为 Drain 需要的 load / retire 回调

use std::sync::Arc;

use super::core::ComponentReloader;
use crate::drain::{Drain, DrainConfig, DrainError, LoadFailure};

/// 按构建顺序排列的组件列表，load 与 retire 回调共享同一份
pub type Components<C> = Arc<[Box<dyn ComponentReloader<C>>]>;

/// 合成 load 回调
///
/// 每次加载先用 factory 创建新配置，再按声明顺序处理组件：存在正在运行的配置且组件判断
/// 可以沿用时调用 copy，否则调用 open_and_test 重建。某个组件失败时，本次加载中已经新建的
/// 组件按相反顺序关闭（沿用的组件仍属于运行中的配置，不会关闭），后面的组件不再尝试。
pub fn compose_load<C, F>(
    factory: F,
    components: Components<C>,
) -> impl Fn(Option<&C>) -> Result<C, LoadFailure<C>> + Send + Sync + 'static
where
    C: 'static,
    F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
{
    move |current: Option<&C>| -> Result<C, LoadFailure<C>> {
        let mut building = factory()?;
        let mut opened: Vec<&dyn ComponentReloader<C>> = Vec::with_capacity(components.len());

        for component in components.iter() {
            if let Some(current) = current {
                if component.should_copy(&building, current) {
                    tracing::debug!(component = component.name(), "component carried forward");
                    component.copy(&mut building, current);
                    continue;
                }
            }

            if let Err(err) = component.open_and_test(&mut building) {
                tracing::warn!(
                    component = component.name(),
                    error = %err,
                    "component failed to open, closing components opened in this load"
                );
                for opened in opened.iter().rev() {
                    opened.close(&building);
                }
                let context = format!("component `{}` failed to open", component.name());
                return Err(LoadFailure::new(err.context(context)));
            }

            tracing::debug!(component = component.name(), "component opened");
            opened.push(component.as_ref());
        }

        Ok(building)
    }
}

/// 合成 retire 回调
///
/// 按声明的相反顺序关闭组件，先关闭依赖方再关闭被依赖方。存在仍在运行的较新配置、
/// 并且组件判断新配置沿用了这个子资源时跳过关闭。
pub fn compose_retire<C>(
    components: Components<C>,
) -> impl Fn(Option<&C>, Option<&C>) + Send + Sync + 'static
where
    C: 'static,
{
    move |closing: Option<&C>, current: Option<&C>| {
        let Some(closing) = closing else {
            return;
        };

        for component in components.iter().rev() {
            let carried = current.is_some_and(|current| component.should_copy(current, closing));
            if carried {
                tracing::debug!(
                    component = component.name(),
                    "component still owned by newer configuration, skipping close"
                );
                continue;
            }
            tracing::debug!(component = component.name(), "closing component");
            component.close(closing);
        }
    }
}

impl<C> Drain<C>
where
    C: Send + Sync + 'static,
{
    /// 由组件组装配置的 Drain，使用默认配置
    ///
    /// `build_order` 决定创建顺序，关闭时按相反顺序进行。第一次加载中任意组件失败都会
    /// 导致创建失败。
    pub fn with_components<F>(
        factory: F,
        build_order: Vec<Box<dyn ComponentReloader<C>>>,
    ) -> Result<Self, DrainError>
    where
        F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
    {
        Self::with_components_config(DrainConfig::default(), factory, build_order)
    }

    pub fn with_components_config<F>(
        config: DrainConfig,
        factory: F,
        build_order: Vec<Box<dyn ComponentReloader<C>>>,
    ) -> Result<Self, DrainError>
    where
        F: Fn() -> anyhow::Result<C> + Send + Sync + 'static,
    {
        let components: Components<C> = build_order.into();
        Self::with_config(
            config,
            compose_load(factory, Arc::clone(&components)),
            compose_retire(components),
        )
    }
}
