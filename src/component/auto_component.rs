use super::core::ComponentReloader;

type OpenAndTestFn<C> = dyn Fn(&mut C) -> anyhow::Result<()> + Send + Sync;
type CloseFn<C> = dyn Fn(&C) + Send + Sync;
type ShouldCopyFn<C> = dyn Fn(&C, &C) -> bool + Send + Sync;
type CopyFn<C> = dyn Fn(&mut C, &C) + Send + Sync;

/// 由闭包组装的组件
///
/// 只提供创建和关闭时，组件每次重新加载都会重建。同时提供 `with_should_copy` 与
/// `with_copy` 后才会沿用未变化的子资源；缺少任意一个都按“总是重建”处理。
///
/// # 示例
///
/// ```
/// use drainx::{AutoComponent, ComponentReloader};
///
/// #[derive(Default)]
/// struct AppConfig {
///     listen: String,
///     listener: Option<String>,
/// }
///
/// let listener = AutoComponent::new(
///     "listener",
///     |cfg: &mut AppConfig| {
///         cfg.listener = Some(format!("bound {}", cfg.listen));
///         Ok(())
///     },
///     |_cfg: &AppConfig| {},
/// )
/// .with_should_copy(|building: &AppConfig, current: &AppConfig| building.listen == current.listen)
/// .with_copy(|dst: &mut AppConfig, src: &AppConfig| dst.listener = src.listener.clone());
///
/// assert_eq!(listener.name(), "listener");
/// ```
pub struct AutoComponent<C> {
    name: String,
    open_and_test: Box<OpenAndTestFn<C>>,
    close: Box<CloseFn<C>>,
    should_copy: Option<Box<ShouldCopyFn<C>>>,
    copy: Option<Box<CopyFn<C>>>,
}

impl<C> AutoComponent<C> {
    pub fn new<O, X>(name: impl Into<String>, open_and_test: O, close: X) -> Self
    where
        O: Fn(&mut C) -> anyhow::Result<()> + Send + Sync + 'static,
        X: Fn(&C) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            open_and_test: Box::new(open_and_test),
            close: Box::new(close),
            should_copy: None,
            copy: None,
        }
    }

    /// 判断子资源能否沿用的比较函数
    pub fn with_should_copy<F>(mut self, should_copy: F) -> Self
    where
        F: Fn(&C, &C) -> bool + Send + Sync + 'static,
    {
        self.should_copy = Some(Box::new(should_copy));
        self
    }

    /// 沿用时把子资源从运行中的配置移入新配置
    pub fn with_copy<F>(mut self, copy: F) -> Self
    where
        F: Fn(&mut C, &C) + Send + Sync + 'static,
    {
        self.copy = Some(Box::new(copy));
        self
    }
}

impl<C> ComponentReloader<C> for AutoComponent<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_and_test(&self, building: &mut C) -> anyhow::Result<()> {
        (self.open_and_test)(building)
    }

    fn close(&self, config: &C) {
        (self.close)(config)
    }

    fn should_copy(&self, building: &C, current: &C) -> bool {
        match (&self.should_copy, &self.copy) {
            (Some(should_copy), Some(_)) => should_copy(building, current),
            _ => false,
        }
    }

    fn copy(&self, dst: &mut C, src: &C) {
        if let Some(copy) = &self.copy {
            copy(dst, src)
        }
    }
}

impl<C: 'static> From<AutoComponent<C>> for Box<dyn ComponentReloader<C>> {
    fn from(component: AutoComponent<C>) -> Self {
        Box::new(component)
    }
}
