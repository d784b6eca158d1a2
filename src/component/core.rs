/// 可单独重建或沿用的配置组件
///
/// 一份配置由若干组件（数据库连接、监听 socket 等）按声明顺序组装而成。每次重新加载时，
/// 组件通过 `should_copy` 比较新旧配置：返回 true 表示配置没有变化，直接把正在运行的子资源
/// `copy` 到新配置里；返回 false 表示需要 `open_and_test` 重新创建。旧配置关闭时按相反顺序
/// 调用 `close`，已被新配置沿用的组件不会被关闭。
///
/// 所有方法操作的都是同一个配置对象，组件把自己的子资源记录在配置的某个字段上。
/// 子资源通常以 `Arc` 持有并带内部可变性，这样 `copy` 只是增加一次引用，`close` 通过共享引用完成。
pub trait ComponentReloader<C>: Send + Sync {
    /// 组件名称，用于日志和错误上下文
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// 根据正在构建的配置创建子资源并自测，成功后记录到 building 中
    fn open_and_test(&self, building: &mut C) -> anyhow::Result<()>;

    /// 关闭 config 中属于本组件的子资源
    fn close(&self, config: &C);

    /// building 与 current 中本组件相关的配置是否一致，一致时沿用 current 中的子资源
    ///
    /// 重新加载与关闭旧配置时都会调用，比较应当只依赖配置字段、与参数顺序无关。
    fn should_copy(&self, building: &C, current: &C) -> bool;

    /// 把 src 中正在运行的子资源引用移入 dst
    fn copy(&self, dst: &mut C, src: &C);
}
