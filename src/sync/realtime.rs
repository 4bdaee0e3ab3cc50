use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::reconcile::Directive;
use crate::record::BookmarkRecord;
use crate::store::BookmarkStore;

/// One row-level change from the authoritative store, shaped the way the
/// push feed delivers it.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event")]
pub enum ChangeEvent {
    #[serde(rename = "INSERT")]
    Insert { new: BookmarkRecord },
    #[serde(rename = "DELETE")]
    Delete { old: DeletedRow },
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeletedRow {
    pub id: String,
}

/// Merge push-feed changes until the stream ends.
///
/// The subscription is scoped server-side to one owner, but a defensive
/// owner check keeps a misrouted event from ever landing in the store.
/// Delivery is at-least-once and unordered relative to direct mutation
/// responses; the directives absorb duplicates and reorderings.
pub async fn run_change_feed<S>(mut feed: S, store: BookmarkStore, owner_id: String)
where
    S: Stream<Item = ChangeEvent> + Unpin,
{
    while let Some(event) = feed.next().await {
        match event {
            ChangeEvent::Insert { new } => {
                if new.user_id != owner_id {
                    tracing::debug!("dropping push insert for another user");
                    continue;
                }
                store.apply(&Directive::ConfirmInsert {
                    mutation_id: None,
                    record: new,
                });
            }
            ChangeEvent::Delete { old } => {
                store.apply(&Directive::RemoveById { id: old.id });
            }
        }
    }
    tracing::info!("change feed ended");
}

// ── server-sent events transport ────────────────────────────────────────────

/// Incremental SSE parser. Fed raw body chunks, yields the joined `data:`
/// payload of each complete event. Chunk boundaries may fall anywhere,
/// including inside a UTF-8 sequence terminator or between the two newlines
/// that close an event.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut payloads = Vec::new();

        loop {
            // events end at a blank line, LF or CRLF flavored
            let sep = ["\r\n\r\n", "\n\n"]
                .iter()
                .filter_map(|s| self.buffer.find(s).map(|at| (at, s.len())))
                .min();
            let Some((at, sep_len)) = sep else { break };

            let raw: String = self.buffer.drain(..at + sep_len).collect();
            let mut data = String::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    if !data.is_empty() {
                        data.push('\n');
                    }
                    data.push_str(rest.trim_start());
                }
            }
            if !data.is_empty() {
                payloads.push(data);
            }
        }
        payloads
    }
}

/// Open a server-sent-events subscription and expose it as a change stream.
///
/// Frames that do not parse as change events are logged and skipped; a read
/// error or server close ends the stream (the caller decides whether to
/// resubscribe).
pub async fn subscribe_sse(
    client: reqwest::Client,
    feed_url: &str,
    api_key: &str,
) -> Result<impl Stream<Item = ChangeEvent>, String> {
    let resp = client
        .get(feed_url)
        .header("apikey", api_key)
        .bearer_auth(api_key)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| format!("subscribe: {}", e))?;
    if !resp.status().is_success() {
        return Err(format!("subscribe: status {}", resp.status()));
    }

    let body = Box::pin(resp.bytes_stream());
    let parser = SseParser::default();
    let pending: VecDeque<ChangeEvent> = VecDeque::new();

    Ok(futures_util::stream::unfold(
        (body, parser, pending),
        |(mut body, mut parser, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (body, parser, pending)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => {
                        for payload in parser.push(&chunk) {
                            match serde_json::from_str::<ChangeEvent>(&payload) {
                                Ok(event) => pending.push_back(event),
                                Err(e) => tracing::warn!("unparseable feed frame: {}", e),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("feed read failed: {}", e);
                        return None;
                    }
                    None => return None,
                }
            }
        },
    ))
}
