pub mod config;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::{load_clinic_data, load_config, read_env, AppConfig, ClinicData};

/// 诊所档案（租户）。每次索引时作为只读快照使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub clinic_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub opening_hours: OpeningHours,
    #[serde(default)]
    pub languages_spoken: Vec<String>,
    #[serde(default)]
    pub payment_methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(default)]
    pub original_id: Option<String>,
    pub title: String,
    pub description: String,
    /// 价格（英镑）
    pub price: f64,
}

impl Service {
    /// `£200`，带小数时为 `£199.50`
    pub fn display_price(&self) -> String {
        if self.price.fract() == 0.0 {
            format!("£{}", self.price as i64)
        } else {
            format!("£{:.2}", self.price)
        }
    }
}

fn closed() -> String {
    "Closed".to_string()
}

/// 一周营业时间，按周一到周日的固定顺序输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningHours {
    #[serde(default = "closed")]
    pub monday: String,
    #[serde(default = "closed")]
    pub tuesday: String,
    #[serde(default = "closed")]
    pub wednesday: String,
    #[serde(default = "closed")]
    pub thursday: String,
    #[serde(default = "closed")]
    pub friday: String,
    #[serde(default = "closed")]
    pub saturday: String,
    #[serde(default = "closed")]
    pub sunday: String,
}

impl Default for OpeningHours {
    fn default() -> Self {
        Self {
            monday: closed(),
            tuesday: closed(),
            wednesday: closed(),
            thursday: closed(),
            friday: closed(),
            saturday: closed(),
            sunday: closed(),
        }
    }
}

impl OpeningHours {
    pub fn days(&self) -> [(&'static str, &str); 7] {
        [
            ("monday", &self.monday),
            ("tuesday", &self.tuesday),
            ("wednesday", &self.wednesday),
            ("thursday", &self.thursday),
            ("friday", &self.friday),
            ("saturday", &self.saturday),
            ("sunday", &self.sunday),
        ]
    }
}

/// 检索片段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassageKind {
    Description,
    Service,
    OpeningHours,
    Languages,
    PaymentMethods,
    /// 自由文本切分出的片段
    Document,
}

impl PassageKind {
    /// 由租户记录生成的类型，重建索引时整体替换
    pub const RECORD_KINDS: [PassageKind; 5] = [
        PassageKind::Description,
        PassageKind::Service,
        PassageKind::OpeningHours,
        PassageKind::Languages,
        PassageKind::PaymentMethods,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PassageKind::Description => "description",
            PassageKind::Service => "service",
            PassageKind::OpeningHours => "openingHours",
            PassageKind::Languages => "languages",
            PassageKind::PaymentMethods => "paymentMethods",
            PassageKind::Document => "document",
        }
    }
}

/// 片段元数据，平铺写入向量库 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMeta {
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub kind: PassageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u32>,
}

/// 可独立检索的文本片段。创建后不再修改，重建索引时整体替换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: Uuid,
    pub text: String,
    pub meta: PassageMeta,
}

impl Passage {
    pub fn new(text: String, meta: PassageMeta) -> Self {
        let id = Self::stable_id(&meta);
        Self { id, text, meta }
    }

    /// 由 (tenant_id, type, sub_id) 派生的确定性 id，重复索引时覆盖而非新增
    pub fn stable_id(meta: &PassageMeta) -> Uuid {
        let sub_id = match (meta.kind, &meta.service_id, &meta.source, meta.ordinal) {
            (PassageKind::Service, Some(service_id), _, _) => service_id.clone(),
            (PassageKind::Document, _, source, ordinal) => format!(
                "{}#{}",
                source.as_deref().unwrap_or_default(),
                ordinal.unwrap_or_default()
            ),
            _ => String::new(),
        };
        let name = format!("leadline:{}/{}/{}", meta.tenant_id, meta.kind.as_str(), sub_id);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
    }

    pub fn tenant_id(&self) -> &str {
        &self.meta.tenant_id
    }
}

/// 带距离的检索结果，距离越小越相似
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// 余弦距离 (1 - cosine similarity)
    pub distance: f32,
}

/// 潜在患者（线索）信息
///
/// 同时接受 `firstName` 这类驼峰字段，兼容前端直接传入的线索对象。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "firstName")]
    pub first_name: String,
    pub treatment: String,
    pub mobile: String,
    #[serde(alias = "clinicId")]
    pub clinic_id: String,
    #[serde(alias = "submittedAt")]
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtProcess {
    pub reasoning: String,
    pub plan: String,
    pub critique: String,
}

/// 模型按约定返回的结构化回复
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredReply {
    pub response: String,
    pub thought_process: ThoughtProcess,
}

/// 短信回复的最大字符数
pub const MAX_RESPONSE_CHARS: usize = 280;
