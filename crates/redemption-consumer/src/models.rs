//! 兑换相关实体定义
//!
//! 包含队列消息、令牌载荷，以及从经销商库中查出的合同、优惠券、凭据记录。
//! 这些结构只在处理单条消息期间存活，不做任何持久化。

use serde::{Deserialize, Serialize};

/// 队列中的兑换请求
///
/// 历史原因字段名为 `apikey`，实际承载的是签名令牌，这里映射为 `token`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(rename = "apikey", default)]
    pub token: Option<String>,
}

impl RedemptionRequest {
    pub fn new(request_type: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            request_type: Some(request_type.into()),
            token: Some(token.into()),
        }
    }

    /// 写审计日志时使用的请求类型
    pub fn request_type_or_default(&self) -> &str {
        self.request_type.as_deref().unwrap_or("unknown")
    }
}

/// 默认的 API 凭据 / 导出记录 ID，与上游生产者约定一致
pub const DEFAULT_RECORD_ID: i64 = 1;

fn default_record_id() -> i64 {
    DEFAULT_RECORD_ID
}

/// 令牌校验通过后得到的载荷
///
/// 上游生产者会把数字 ID 序列化成字符串（`"ContractID":"10736940"`），
/// 因此反序列化同时接受数字和数字字符串；`CouponID` 既可以是单值也可以是数组。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedClaim {
    #[serde(rename = "ContractID", deserialize_with = "flexible_id::one")]
    pub contract_id: i64,
    #[serde(rename = "CouponID", deserialize_with = "flexible_id::many", default)]
    pub coupon_ids: Vec<i64>,
    /// 同时作为 API 凭据 ID 和导出记录 ID 使用
    #[serde(
        rename = "ID",
        deserialize_with = "flexible_id::one",
        default = "default_record_id"
    )]
    pub record_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

mod flexible_id {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Id>),
        One(Id),
    }

    fn to_i64<E: de::Error>(id: Id) -> Result<i64, E> {
        match id {
            Id::Number(n) => Ok(n),
            Id::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid numeric id: {s:?}"))),
        }
    }

    pub fn one<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        to_i64(Id::deserialize(deserializer)?)
    }

    pub fn many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
        match OneOrMany::deserialize(deserializer)? {
            OneOrMany::Many(ids) => ids.into_iter().map(to_i64).collect(),
            OneOrMany::One(id) => Ok(vec![to_i64(id)?]),
        }
    }
}

/// 合同详情（合同 + 客户 + 套餐 + 经销商）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContractDetails {
    pub contract_id: i64,
    pub contract_no: Option<String>,
    pub vin: Option<String>,
    /// `MM/DD/YYYY`
    pub sale_date: Option<String>,
    /// `MM/DD/YYYY`，无限期合同为 `N/A`
    pub validity_date: Option<String>,
    pub customer_first_name: Option<String>,
    pub customer_last_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub plan_id: Option<i64>,
    pub plan_code: Option<String>,
    pub plan_description: Option<String>,
    pub validity_days: Option<i64>,
    pub validity_mileage: Option<i64>,
    pub dealer_id: i64,
    pub dealer_title: Option<String>,
    pub dealer_address1: Option<String>,
    pub dealer_address2: Option<String>,
    pub city_name: Option<String>,
    pub state_name: Option<String>,
    /// ISO3 国家代码
    pub country: Option<String>,
    pub dealer_zip: Option<String>,
    pub contact_person: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    /// 本次兑换涉及的优惠券面值合计
    pub coupon_value: Option<f64>,
}

impl ContractDetails {
    /// 拼接门店地址，空字段跳过
    ///
    /// 形如 `12 Main St, City: Austin, State: Texas, Zip: 73301, Country: USA`
    pub fn shop_address(&self) -> String {
        let labelled = [
            (None, &self.dealer_address1),
            (Some("City"), &self.city_name),
            (Some("State"), &self.state_name),
            (Some("Zip"), &self.dealer_zip),
            (Some("Country"), &self.country),
        ];

        labelled
            .iter()
            .filter_map(|(label, value)| {
                let value = value.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
                Some(match label {
                    Some(label) => format!("{label}: {value}"),
                    None => value.to_string(),
                })
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 优惠券明细，按标题 / 服务类型 / 服务 ID 聚合
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CouponDetails {
    pub total_coupon: i64,
    pub coupon_title: Option<String>,
    /// 有浮动价格时取浮动价格，否则取面值
    pub coupon_value: Option<f64>,
    pub repair_order_no: Option<String>,
    /// `MM/DD/YYYY`
    pub received_date: Option<String>,
    pub check_no: Option<String>,
    pub coupon_mileage: Option<i64>,
    pub user_id: Option<i64>,
    pub variable_price: Option<f64>,
    pub service_amounts: Option<String>,
    pub service_type: Option<String>,
    pub service_id: Option<i64>,
    pub modified_date: Option<String>,
}

impl CouponDetails {
    /// 所有优惠券中最大的里程数，没有记录时为 0
    pub fn max_mileage(coupons: &[CouponDetails]) -> i64 {
        coupons
            .iter()
            .filter_map(|c| c.coupon_mileage)
            .max()
            .unwrap_or(0)
    }

    /// 所有优惠券中"最大"的维修单号
    ///
    /// 单号是数字时按数值比较，否则按字符串比较。
    pub fn max_repair_order(coupons: &[CouponDetails]) -> Option<String> {
        coupons
            .iter()
            .filter_map(|c| c.repair_order_no.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .max_by(|a, b| match (a.parse::<i64>(), b.parse::<i64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.cmp(b),
            })
            .map(str::to_string)
    }
}

/// 理赔合作方 API 凭据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiCredentials {
    pub notes: Option<String>,
    pub sandbox_url: Option<String>,
    pub live_url: Option<String>,
    pub is_live: i64,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub sandbox_username: Option<String>,
    #[serde(skip_serializing)]
    pub sandbox_password: Option<String>,
    pub request_type: Option<String>,
}

impl ApiCredentials {
    pub fn is_live(&self) -> bool {
        self.is_live != 0
    }

    /// 当前生效的用户名和密码：上线后使用正式账号，否则使用沙箱账号
    pub fn active_login(&self) -> (&str, &str) {
        let (user, pass) = if self.is_live() {
            (&self.username, &self.password)
        } else {
            (&self.sandbox_username, &self.sandbox_password)
        };
        (
            user.as_deref().unwrap_or_default(),
            pass.as_deref().unwrap_or_default(),
        )
    }
}

/// 经销商名下的合同行，用于生成导出文件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DealerContractRow {
    pub contract_id: i64,
    pub dealer_id: i64,
    pub vin: Option<String>,
    /// Unix 时间戳（秒）
    pub sale_date: Option<i64>,
}
