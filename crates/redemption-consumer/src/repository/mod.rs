//! 经销商库访问层
//!
//! 合同、优惠券、凭据三类只读查询，加上导出记录的发送标记。
//! 处理流程只依赖 trait，MySQL 实现在 `mysql` 模块。

mod mysql;
mod traits;

pub use mysql::MySqlRedemptionRepository;
pub use traits::*;
