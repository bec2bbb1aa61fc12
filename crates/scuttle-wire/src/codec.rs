//! Encoding of the log-level types
//!
//! Event layout:
//! - Bytes 0-31: Author feed id
//! - Byte 32: Flags (bit 0: has previous)
//! - Bytes 33-64: Previous hash (only when flagged)
//! - Next 8: Index (LE)
//! - Next 4: Content length (LE), then the content
//! - Last 64: Signature

use std::collections::BTreeSet;

use bytes::{Buf, BufMut};

use scuttle_core::{
    Content, Event, FeedId, Frontier, News, ScuttleError, ScuttleResult, SIGNATURE_SIZE,
};

const FLAG_HAS_PREVIOUS: u8 = 0x01;

/// Smallest possible encoded event, used to bound declared counts
const MIN_EVENT_SIZE: usize = FeedId::LEN + 1 + 8 + 4 + 1 + SIGNATURE_SIZE;

/// Fail unless `buf` still holds `needed` bytes
pub fn ensure(buf: &impl Buf, needed: usize) -> ScuttleResult<()> {
    if buf.remaining() < needed {
        Err(ScuttleError::BufferTooShort {
            expected: needed,
            actual: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

/// Read a declared element count and check it could fit in what is left
fn get_count(buf: &mut impl Buf, min_element_size: usize) -> ScuttleResult<usize> {
    ensure(buf, 4)?;
    let count = buf.get_u32_le() as usize;
    ensure(buf, count.saturating_mul(min_element_size))?;
    Ok(count)
}

pub fn put_feed(buf: &mut impl BufMut, feed: &FeedId) {
    buf.put_slice(feed.as_bytes());
}

pub fn get_feed(buf: &mut impl Buf) -> ScuttleResult<FeedId> {
    ensure(buf, FeedId::LEN)?;
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    Ok(FeedId::new(bytes))
}

pub fn put_event(buf: &mut impl BufMut, event: &Event) {
    put_feed(buf, &event.author);
    match &event.previous {
        Some(hash) => {
            buf.put_u8(FLAG_HAS_PREVIOUS);
            buf.put_slice(hash);
        }
        None => buf.put_u8(0),
    }
    buf.put_u64_le(event.index);
    let content = event.content.encode();
    buf.put_u32_le(content.len() as u32);
    buf.put_slice(&content);
    buf.put_slice(&event.signature);
}

pub fn get_event(buf: &mut impl Buf) -> ScuttleResult<Event> {
    let author = get_feed(buf)?;

    ensure(buf, 1)?;
    let flags = buf.get_u8();
    if flags & !FLAG_HAS_PREVIOUS != 0 {
        return Err(ScuttleError::InvalidWireFormat(format!(
            "unknown event flags {:#04x}",
            flags
        )));
    }
    let previous = if flags & FLAG_HAS_PREVIOUS != 0 {
        ensure(buf, 32)?;
        let mut hash = [0u8; 32];
        buf.copy_to_slice(&mut hash);
        Some(hash)
    } else {
        None
    };

    ensure(buf, 8 + 4)?;
    let index = buf.get_u64_le();
    let content_len = buf.get_u32_le() as usize;
    ensure(buf, content_len)?;
    let mut content_bytes = vec![0u8; content_len];
    buf.copy_to_slice(&mut content_bytes);
    let (content, used) = Content::decode(&content_bytes)?;
    if used != content_len {
        return Err(ScuttleError::InvalidWireFormat(
            "content length mismatch".into(),
        ));
    }

    ensure(buf, SIGNATURE_SIZE)?;
    let mut signature = [0u8; SIGNATURE_SIZE];
    buf.copy_to_slice(&mut signature);

    Ok(Event {
        author,
        previous,
        index,
        content,
        signature,
    })
}

pub fn put_frontier(buf: &mut impl BufMut, frontier: &Frontier) {
    buf.put_u32_le(frontier.len() as u32);
    for (feed, index) in frontier {
        put_feed(buf, feed);
        buf.put_u64_le(*index);
    }
}

pub fn get_frontier(buf: &mut impl Buf) -> ScuttleResult<Frontier> {
    let count = get_count(buf, FeedId::LEN + 8)?;
    let mut frontier = Frontier::new();
    for _ in 0..count {
        let feed = get_feed(buf)?;
        let index = buf.get_u64_le();
        frontier.insert(feed, index);
    }
    Ok(frontier)
}

pub fn put_feed_set(buf: &mut impl BufMut, feeds: &BTreeSet<FeedId>) {
    buf.put_u32_le(feeds.len() as u32);
    for feed in feeds {
        put_feed(buf, feed);
    }
}

pub fn get_feed_set(buf: &mut impl Buf) -> ScuttleResult<BTreeSet<FeedId>> {
    let count = get_count(buf, FeedId::LEN)?;
    let mut feeds = BTreeSet::new();
    for _ in 0..count {
        feeds.insert(get_feed(buf)?);
    }
    Ok(feeds)
}

pub fn put_news(buf: &mut impl BufMut, news: &News) {
    buf.put_u32_le(news.len() as u32);
    for (feed, events) in news {
        put_feed(buf, feed);
        buf.put_u32_le(events.len() as u32);
        for event in events {
            put_event(buf, event);
        }
    }
}

pub fn get_news(buf: &mut impl Buf) -> ScuttleResult<News> {
    let count = get_count(buf, FeedId::LEN + 4)?;
    let mut news = News::new();
    for _ in 0..count {
        let feed = get_feed(buf)?;
        let event_count = get_count(buf, MIN_EVENT_SIZE)?;
        let mut events = Vec::with_capacity(event_count);
        for _ in 0..event_count {
            events.push(get_event(buf)?);
        }
        news.insert(feed, events);
    }
    Ok(news)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use scuttle_crypto::{sign_event, Identity};

    fn sample_event(previous: Option<[u8; 32]>) -> Event {
        let identity = Identity::from_bytes(&[3u8; 32]);
        let event = Event::unsigned(
            identity.feed_id(),
            previous,
            if previous.is_some() { 2 } else { 1 },
            Content::Post(b"on the wire".to_vec()),
        );
        sign_event(&identity, event)
    }

    #[test]
    fn test_event_roundtrip() {
        for previous in [None, Some([9u8; 32])] {
            let event = sample_event(previous);
            let mut buf = BytesMut::new();
            put_event(&mut buf, &event);

            let mut reader = buf.freeze();
            let decoded = get_event(&mut reader).unwrap();
            assert_eq!(decoded, event);
            assert!(!reader.has_remaining());
        }
    }

    #[test]
    fn test_event_layout() {
        let event = sample_event(None);
        let mut buf = BytesMut::new();
        put_event(&mut buf, &event);

        let content_len = event.content.encode().len();
        assert_eq!(buf.len(), 32 + 1 + 8 + 4 + content_len + 64);
        assert_eq!(&buf[..32], event.author.as_bytes());
        assert_eq!(buf[32], 0);
        assert_eq!(&buf[33..41], &1u64.to_le_bytes());
    }

    #[test]
    fn test_truncated_event_rejected() {
        let event = sample_event(Some([1u8; 32]));
        let mut buf = BytesMut::new();
        put_event(&mut buf, &event);

        for cut in [0, 10, 33, 60, buf.len() - 1] {
            let mut reader = &buf[..cut];
            assert!(get_event(&mut reader).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let event = sample_event(None);
        let mut buf = BytesMut::new();
        put_event(&mut buf, &event);
        buf[32] = 0x80;

        let mut reader = &buf[..];
        assert!(matches!(
            get_event(&mut reader),
            Err(ScuttleError::InvalidWireFormat(_))
        ));
    }

    #[test]
    fn test_frontier_is_written_in_feed_order() {
        let low = FeedId([1u8; 32]);
        let high = FeedId([2u8; 32]);
        let a: Frontier = [(high, 4), (low, 7)].into_iter().collect();
        let b: Frontier = [(low, 7), (high, 4)].into_iter().collect();

        let mut buf_a = BytesMut::new();
        let mut buf_b = BytesMut::new();
        put_frontier(&mut buf_a, &a);
        put_frontier(&mut buf_b, &b);
        assert_eq!(buf_a, buf_b);
        assert_eq!(&buf_a[4..36], low.as_bytes());

        let mut reader = &buf_a[..];
        assert_eq!(get_frontier(&mut reader).unwrap(), a);
    }

    #[test]
    fn test_oversized_count_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(u32::MAX);
        let mut reader = &buf[..];
        assert!(matches!(
            get_feed_set(&mut reader),
            Err(ScuttleError::BufferTooShort { .. })
        ));
    }
}
