/// Canned responder used when no backend produced a usable answer
use crate::core::Reply;
use aho_corasick::AhoCorasick;
use lazy_static::lazy_static;

pub const FALLBACK_SOURCE: &str = "fallback";
pub const DEFAULT_ANSWER: &str = "Не знаю...";

/// Keyword → answer. When several keywords match, the later entry wins.
const PREPARED_ANSWERS: &[(&str, &str)] = &[
    ("дела", "Нормально!"),
    ("делаешь", "Даже не знаю..."),
    ("почему", "Вот так вот"),
    ("где", "В каком-то интересном месте!"),
    ("когда", "Когда-то!"),
    ("сколько", "Об этом не рассказывают!"),
    ("дума", "Думать это хорошо!"),
];

lazy_static! {
    static ref KEYWORDS: Option<AhoCorasick> =
        AhoCorasick::new(PREPARED_ANSWERS.iter().map(|(keyword, _)| keyword)).ok();
}

/// Pick the canned answer text for `query`
pub fn canned_answer(query: &str) -> &'static str {
    let keywords = match KEYWORDS.as_ref() {
        Some(keywords) => keywords,
        None => return DEFAULT_ANSWER,
    };

    let lowered = query.to_lowercase();
    keywords
        .find_overlapping_iter(&lowered)
        .map(|m| m.pattern().as_usize())
        .max()
        .map(|index| PREPARED_ANSWERS[index].1)
        .unwrap_or(DEFAULT_ANSWER)
}

/// The full fallback reply for `(uid, query)`; never fails
pub fn fallback_reply(uid: &str, query: &str) -> Reply {
    Reply {
        ok: false,
        reply: Some(canned_answer(query).to_string()),
        from: Some(FALLBACK_SOURCE.to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}
