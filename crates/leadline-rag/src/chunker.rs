//! 诊所档案切分
//!
//! 档案本身已经是片段大小，因此按字段手工切分：一段简介、每项服务一段、
//! 营业时间、语言、支付方式各一段，共 `N + 4` 段。每段都是一句完整的
//! 自然语言，可以单独命中查询。
//!
//! 较长的自由文本走 [`split_text`]：按词累积到 `chunk_size` 字符，
//! 相邻片段之间保留至多 `overlap` 字符的重叠，避免语义在边界处断开。

use leadline_core::{Passage, PassageKind, PassageMeta, TenantRecord};

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

fn meta(tenant_id: &str, kind: PassageKind) -> PassageMeta {
    PassageMeta {
        tenant_id: tenant_id.to_string(),
        kind,
        service_id: None,
        service_title: None,
        source: None,
        ordinal: None,
    }
}

fn sentence(text: &str) -> &str {
    text.trim().trim_end_matches('.')
}

/// 把诊所档案切分为可检索片段，纯函数，输出顺序固定
pub fn chunk_tenant_record(record: &TenantRecord) -> Vec<Passage> {
    let tenant = record.clinic_id.as_str();
    let mut passages = Vec::with_capacity(record.services.len() + 4);

    passages.push(Passage::new(
        format!("{}: {}", record.name, record.description.trim()),
        meta(tenant, PassageKind::Description),
    ));

    for service in &record.services {
        let mut m = meta(tenant, PassageKind::Service);
        m.service_id = Some(service.id.clone());
        m.service_title = Some(service.title.clone());
        passages.push(Passage::new(
            format!(
                "Service: {}. Description: {}. Price: {}.",
                sentence(&service.title),
                sentence(&service.description),
                service.display_price()
            ),
            m,
        ));
    }

    let hours = record
        .opening_hours
        .days()
        .iter()
        .map(|(day, interval)| format!("{}: {}", day, interval))
        .collect::<Vec<_>>()
        .join(", ");
    passages.push(Passage::new(
        format!("Opening hours for {}: {}", record.name, hours),
        meta(tenant, PassageKind::OpeningHours),
    ));

    passages.push(Passage::new(
        format!(
            "{} staff speak: {}",
            record.name,
            record.languages_spoken.join(", ")
        ),
        meta(tenant, PassageKind::Languages),
    ));

    passages.push(Passage::new(
        format!(
            "{} accepts: {}",
            record.name,
            record.payment_methods.join(", ")
        ),
        meta(tenant, PassageKind::PaymentMethods),
    ));

    passages
}

/// 把超长单词硬切成不超过 `max_chars` 的片段
fn hard_split(word: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|c| c.iter().collect())
        .collect()
}

/// 有界、带重叠窗口的文本切分
///
/// - 每段不超过 `chunk_size` 个字符
/// - 相邻两段共享末尾至多 `overlap` 个字符的完整单词
/// - 空白文本返回空列表
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size.saturating_sub(1));

    let words: Vec<String> = text
        .split_whitespace()
        .flat_map(|w| {
            if w.chars().count() > chunk_size {
                hard_split(w, chunk_size)
            } else {
                vec![w.to_string()]
            }
        })
        .collect();

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in &words {
        let word_len = word.chars().count();
        let would_be = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };

        if would_be > chunk_size && !current.is_empty() {
            chunks.push(current.join(" "));

            // 保留重叠部分，同时保证放得下下一个词
            let mut tail: Vec<&str> = Vec::new();
            let mut tail_len = 0usize;
            for prev in current.iter().rev() {
                let prev_len = prev.chars().count();
                let next_len = if tail.is_empty() {
                    prev_len
                } else {
                    tail_len + 1 + prev_len
                };
                if next_len > overlap || next_len + 1 + word_len > chunk_size {
                    break;
                }
                tail.push(*prev);
                tail_len = next_len;
            }
            tail.reverse();
            current = tail;
            current_len = tail_len;
        }

        current_len = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        current.push(word);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// 自由文本（FAQ、补充说明等）切分为 `document` 类型片段
pub fn chunk_document(tenant_id: &str, source: &str, text: &str) -> Vec<Passage> {
    split_text(text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut m = meta(tenant_id, PassageKind::Document);
            m.source = Some(source.to_string());
            m.ordinal = Some(i as u32);
            Passage::new(piece, m)
        })
        .collect()
}
