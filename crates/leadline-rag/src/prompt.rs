use chrono::{Datelike, Duration, NaiveDate};
use leadline_core::{ConversationTurn, LeadContext, Role, MAX_RESPONSE_CHARS};
use serde::{Deserialize, Serialize};

use crate::retriever::RetrievalOutcome;

/// 检索失败时写入上下文的固定文本
pub const RETRIEVAL_FAILED_CONTEXT: &str = "Unable to retrieve documents at this time.";

/// 检索成功但没有匹配片段时的上下文
pub const NO_MATCHES_CONTEXT: &str = "No matching clinic information was found for this message.";

/// 最早可预约日期与参考日期的间隔（天）
pub const MIN_BOOKING_LEAD_DAYS: i64 = 2;

/// 发送给对话模型的完整输入：一条系统指令加对话历史
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptBundle {
    pub system: String,
    pub history: Vec<ConversationTurn>,
}

impl PromptBundle {
    /// 系统指令在前，历史按原顺序在后
    pub fn messages(&self) -> Vec<ConversationTurn> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ConversationTurn::new(Role::System, self.system.clone()));
        messages.extend(self.history.iter().cloned());
        messages
    }
}

/// `19th October`
pub fn uk_day_month(date: NaiveDate) -> String {
    format!("{}{} {}", date.day(), ordinal_suffix(date.day()), date.format("%B"))
}

/// `1 August 2025`
pub fn uk_long_date(date: NaiveDate) -> String {
    date.format("%-d %B %Y").to_string()
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// 把检索结果渲染为上下文文本
pub fn render_context(outcome: &RetrievalOutcome) -> String {
    match outcome {
        RetrievalOutcome::Failed { .. } => RETRIEVAL_FAILED_CONTEXT.to_string(),
        RetrievalOutcome::Found(hits) if hits.is_empty() => NO_MATCHES_CONTEXT.to_string(),
        RetrievalOutcome::Found(hits) => hits
            .iter()
            .map(|h| h.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn patient_info(lead: &LeadContext) -> String {
    format!(
        "PATIENT INFORMATION:\n\
         - First name: {}\n\
         - Treatment of interest: {}\n\
         - Mobile number: {}\n\
         - Lead submitted: {}",
        lead.first_name,
        lead.treatment,
        lead.mobile,
        uk_long_date(lead.submitted_at.date_naive()),
    )
}

/// 组装提示词。纯函数：相同输入得到相同输出
///
/// 客户端传入的 system 角色消息和空消息不会进入历史，
/// 系统指令只来自这里。
pub fn assemble(
    lead: &LeadContext,
    retrieval: &RetrievalOutcome,
    history: &[ConversationTurn],
    today: NaiveDate,
) -> PromptBundle {
    let reference = today.format("%Y-%m-%d");
    let earliest = today + Duration::days(MIN_BOOKING_LEAD_DAYS);

    let system = format!(
        r#"Who: You are a booking coordinator for a dental practice that focuses on cosmetic dentistry, notably Invisalign, composite bonding, veneers, and smile makeovers.

Your objective is to follow up with leads via SMS after they've expressed interest in one of our treatments. Your job is to qualify the lead and schedule them for a free consultation, which requires a fully refundable deposit.

CURRENT DATE: {reference}

When suggesting appointment slots or using dates:
- Use {reference} as reference
- Only offer slots at least {lead_days} days in the future, the earliest being {earliest_iso}
- Format dates in UK style (e.g. {example})
- Use 12-hour time format with AM/PM for user-facing responses
- Use ISO 8601 format for tool calls

RESPONSE FORMAT:
You MUST return responses as JSON in the following structure:

{{
  "response": "Your message to the user",
  "thought_process": {{
    "reasoning": "Why you're responding this way",
    "plan": "What you're trying to do next",
    "critique": "Any weaknesses or edge cases you're aware of"
  }}
}}

"response" rules:
- {max_chars} character max
- Conversational SMS tone
- No exclamation marks or emojis
- Use contractions ("we're", "can't", etc)
- Use "we" instead of "I"
- UK English spellings
- Avoid generic phrases, guarantees, or overly polite fluff
- Do not thank the user
- Do not ask multiple questions at once

TOOLS:
If asked about bookings:
1. Qualify the lead to identify the correct treatment
2. Use the check_availability tool with the right service ID
3. Offer 2-3 available slots spaced across different days/times
4. Once a slot is chosen and the deposit hasn't been discussed, explain it using the exact script provided. Explain the deposit only once
5. After confirmation, use the generate_booking_link tool with their mobile number, service ID, and selected slot
6. Share the link and confirm it reserves their appointment once paid

PATIENT INFO:
{patient}

SERVICES & LOCATIONS CONTEXT:
{context}
"#,
        reference = reference,
        lead_days = MIN_BOOKING_LEAD_DAYS,
        earliest_iso = earliest.format("%Y-%m-%d"),
        example = uk_day_month(earliest),
        max_chars = MAX_RESPONSE_CHARS,
        patient = patient_info(lead),
        context = render_context(retrieval),
    );

    let history = history
        .iter()
        .filter(|t| t.role != Role::System && !t.content.trim().is_empty())
        .cloned()
        .collect();

    PromptBundle { system, history }
}
