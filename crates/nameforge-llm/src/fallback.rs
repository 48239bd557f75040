//! Deterministic placeholder output used when every provider has failed.

use sha2::{Digest, Sha256};

use crate::{GeneratedItem, GenerationResult};

pub const FALLBACK_PROVIDER: &str = "mock";
pub const FALLBACK_MODEL: &str = "mock_model";

struct Theme {
    keywords: &'static [&'static str],
    items: &'static [(&'static str, &'static str)],
}

const THEMES: &[Theme] = &[
    Theme {
        keywords: &["战士", "warrior"],
        items: &[
            ("张勇", "勇敢坚强，意志坚定"),
            ("李刚", "刚毅不屈，勇往直前"),
            ("王强", "力量强大，无所畏惧"),
            ("赵武", "武艺高强，战无不胜"),
            ("陈军", "军人之风，纪律严明"),
        ],
    },
    Theme {
        keywords: &["学者", "scholar"],
        items: &[
            ("李智", "智慧超群，学识渊博"),
            ("王博", "博学多才，见多识广"),
            ("张文", "文采斐然，才华横溢"),
            ("陈学", "学富五车，知识渊博"),
            ("刘思", "思维敏捷，逻辑清晰"),
        ],
    },
    Theme {
        keywords: &["公主", "princess"],
        items: &[
            ("李美", "美丽动人，气质优雅"),
            ("王雅", "雅致高贵，风度翩翩"),
            ("张柔", "温柔如水，心地善良"),
            ("陈雪", "冰雪聪明，纯洁无瑕"),
            ("刘梦", "梦幻般美丽，如诗如画"),
        ],
    },
];

const DEFAULT_ITEMS: &[(&str, &str)] = &[
    ("张三", "寓意勇敢坚强"),
    ("李四", "寓意智慧聪慧"),
    ("王五", "寓意正直善良"),
    ("赵六", "寓意温和友善"),
    ("钱七", "寓意聪明机智"),
    ("孙八", "寓意勤奋努力"),
    ("周九", "寓意诚实可靠"),
    ("吴十", "寓意乐观开朗"),
];

fn table_for(prompt: &str) -> &'static [(&'static str, &'static str)] {
    let lowered = prompt.to_lowercase();
    THEMES
        .iter()
        .find(|theme| theme.keywords.iter().any(|k| lowered.contains(k)))
        .map_or(DEFAULT_ITEMS, |theme| theme.items)
}

fn rotation(prompt: &str, len: usize) -> usize {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % len as u64) as usize
}

/// Placeholder result for `prompt`: same prompt, same items. Always returns at
/// least one item and never more than `count` (or the table size).
pub fn synthesize(prompt: &str, count: usize) -> GenerationResult {
    let table = table_for(prompt);
    let start = rotation(prompt, table.len());
    let take = count.clamp(1, table.len());

    let items: Vec<GeneratedItem> = table
        .iter()
        .cycle()
        .skip(start)
        .take(take)
        .map(|(name, meaning)| GeneratedItem::new(*name, *meaning, FALLBACK_PROVIDER))
        .collect();

    GenerationResult {
        success: true,
        raw_text: format!("synthesized {} placeholder items", items.len()),
        items,
        provider: FALLBACK_PROVIDER.to_string(),
        model: FALLBACK_MODEL.to_string(),
        error: None,
        generated_at: chrono::Utc::now(),
    }
}
