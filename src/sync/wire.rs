use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use super::{Envelope, TabBus};

const MAX_FRAME_LEN: usize = 65535;

/// Encode an envelope to MessagePack bytes. Field names are kept on the
/// wire: the envelope enum is tag-dispatched, which needs a map encoding,
/// and named fields let older siblings skip kinds they do not know.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, String> {
    rmp_serde::to_vec_named(envelope).map_err(|e| format!("encode: {}", e))
}

/// Decode MessagePack bytes to an envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, String> {
    rmp_serde::from_slice(bytes).map_err(|e| format!("decode: {}", e))
}

/// Send a length-prefixed envelope frame.
pub async fn send_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    let data = encode(envelope)?;
    if data.len() > MAX_FRAME_LEN {
        return Err("frame too large".into());
    }
    let len = (data.len() as u32).to_be_bytes();
    writer.write_all(&len).await.map_err(|e| format!("write len: {}", e))?;
    writer.write_all(&data).await.map_err(|e| format!("write data: {}", e))?;
    writer.flush().await.map_err(|e| format!("flush: {}", e))?;
    Ok(())
}

/// Receive a length-prefixed envelope frame.
pub async fn recv_frame<R>(reader: &mut R) -> Result<Envelope, String>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| format!("read len: {}", e))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err("frame too large".into());
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| format!("read data: {}", e))?;
    decode(&buf)
}

// ── bus bridge ──────────────────────────────────────────────────────────────

/// Forward envelopes between a stream peer and the local bus, both ways,
/// until either side goes away.
///
/// Envelopes that arrived over the socket are republished locally but never
/// echoed back: the bridge remembers which tab ids live on the far side.
/// A socket failure ends the bridge — sibling sync degrades to the push
/// feed, local mutations are untouched.
pub async fn run_bridge<S>(stream: S, bus: TabBus)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let remote_tabs: Arc<Mutex<HashSet<String>>> = Arc::default();
    let mut rx = bus.subscribe();

    // reader half: socket → bus, tagging far-side tab ids as it goes
    let seen = remote_tabs.clone();
    let inbound_bus = bus.clone();
    let mut read_task = tokio::spawn(async move {
        loop {
            match recv_frame(&mut reader).await {
                Ok(envelope) => {
                    seen.lock().insert(envelope.tab_id().to_string());
                    inbound_bus.publish(envelope);
                }
                Err(e) => {
                    tracing::warn!("bridge receive failed: {}", e);
                    break;
                }
            }
        }
    });

    // writer half: bus → socket, skipping envelopes that came from the far side
    let mut write_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if remote_tabs.lock().contains(envelope.tab_id()) {
                        continue;
                    }
                    if let Err(e) = send_frame(&mut writer, &envelope).await {
                        tracing::warn!("bridge send failed: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "bridge lagged, envelopes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // either half ending takes the whole bridge down
    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }
}

/// Accept sibling processes on a local listener and bridge each to the bus.
pub fn start_bridge_listener(
    listener: tokio::net::TcpListener,
    bus: TabBus,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("bridge accept failed: {}", e);
                    continue;
                }
            };
            tracing::info!(%addr, "sibling instance connected");
            tokio::spawn(run_bridge(stream, bus.clone()));
        }
    })
}

/// Connect to a sibling's bridge listener.
pub async fn connect_bridge(addr: &str, bus: TabBus) -> Result<tokio::task::JoinHandle<()>, String> {
    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .map_err(|e| format!("connect: {}", e))?;
    Ok(tokio::spawn(run_bridge(stream, bus)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BookmarkRecord;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn envelope(tab: &str) -> Envelope {
        Envelope::Delete {
            tab_id: tab.to_string(),
            user_id: "u1".to_string(),
            id: "7".to_string(),
        }
    }

    fn record_envelope(tab: &str) -> Envelope {
        Envelope::AddOptimistic {
            tab_id: tab.to_string(),
            user_id: "u1".to_string(),
            mutation_id: "m1".to_string(),
            bookmark: BookmarkRecord {
                id: "optimistic-m1".to_string(),
                user_id: "u1".to_string(),
                title: "Docs".to_string(),
                url: "https://example.com".to_string(),
                created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                client_mutation_id: Some("m1".to_string()),
            },
        }
    }

    #[test]
    fn codec_round_trip() {
        let env = record_envelope("tab-a");
        let bytes = encode(&env).unwrap();
        assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[0xff, 0x00, 0x13]).is_err());
    }

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let env = record_envelope("tab-a");

        send_frame(&mut a, &env).await.unwrap();
        send_frame(&mut a, &envelope("tab-a")).await.unwrap();

        assert_eq!(recv_frame(&mut b).await.unwrap(), env);
        assert_eq!(recv_frame(&mut b).await.unwrap(), envelope("tab-a"));
    }

    #[tokio::test]
    async fn bridge_forwards_between_buses() {
        let bus_a = TabBus::new(16);
        let bus_b = TabBus::new(16);
        let (left, right) = tokio::io::duplex(4096);

        let mut on_b = bus_b.subscribe();
        let mut on_a = bus_a.subscribe();
        tokio::spawn(run_bridge(left, bus_a.clone()));
        tokio::spawn(run_bridge(right, bus_b.clone()));

        bus_a.publish(record_envelope("tab-a"));
        let crossed = tokio::time::timeout(Duration::from_secs(2), on_b.recv())
            .await
            .expect("bridge delivery timed out")
            .unwrap();
        assert_eq!(crossed.tab_id(), "tab-a");

        // and the other direction
        bus_b.publish(envelope("tab-b"));
        loop {
            let seen = tokio::time::timeout(Duration::from_secs(2), on_a.recv())
                .await
                .expect("reverse bridge delivery timed out")
                .unwrap();
            // skip the local publish we made on bus_a earlier
            if seen.tab_id() == "tab-b" {
                break;
            }
        }
    }
}
