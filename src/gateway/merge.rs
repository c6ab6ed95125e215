/// Priority merge of fan-out results
use crate::core::Reply;

/// Choose one reply among the results of a fan-out.
///
/// Results are taken in dispatch order. Absent results (timeouts) are
/// skipped, and a failed reply is only taken while nothing is chosen yet.
/// Otherwise a reply replaces the current one only with a strictly higher
/// priority, so the earliest one is kept on ties. A failure seen first can
/// therefore outrank later, lower-priority successes. Returns `None` when
/// every result was absent.
pub fn select_reply<I>(results: I) -> Option<Reply>
where
    I: IntoIterator<Item = Option<Reply>>,
{
    let mut chosen: Option<Reply> = None;

    for candidate in results.into_iter().flatten() {
        let replace = match &chosen {
            None => true,
            Some(_) if !candidate.ok => false,
            Some(current) => priority(&candidate) > priority(current),
        };
        if replace {
            chosen = Some(candidate);
        }
    }

    chosen
}

fn priority(reply: &Reply) -> i64 {
    reply.priority.unwrap_or(i64::MIN)
}
