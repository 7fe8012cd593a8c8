//! Redis pub/sub transport.
//!
//! Uses one connection for publishing and a dedicated connection per
//! listener, since a Redis connection in subscribe mode cannot issue other
//! commands. The listener polls with a short read timeout so the channel's
//! stop flag is honored within a bounded interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Listener, TopicMessage, Transport};
use crate::error::{Result, RolloutError};

/// Read timeout on the subscribed connection; bounds stop-flag latency.
const READ_POLL: Duration = Duration::from_millis(100);

/// Accept bare `host:port` addresses alongside full redis URLs.
fn normalize_addr(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

fn connection_error(addr: &str, err: redis::RedisError) -> RolloutError {
    RolloutError::Connection {
        addr: addr.to_string(),
        message: err.to_string(),
    }
}

/// Publishing connection to a Redis server.
pub struct RedisTransport {
    addr: String,
    client: redis::Client,
    conn: redis::Connection,
}

impl RedisTransport {
    /// Connect and verify liveness with a PING.
    pub fn connect(addr: &str) -> Result<Self> {
        let url = normalize_addr(addr);
        let client =
            redis::Client::open(url.as_str()).map_err(|err| connection_error(&url, err))?;
        let mut conn = client
            .get_connection()
            .map_err(|err| connection_error(&url, err))?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(|err| connection_error(&url, err))?;

        Ok(Self {
            addr: url,
            client,
            conn,
        })
    }
}

impl Transport for RedisTransport {
    type Listener = RedisListener;

    fn ping(&mut self) -> Result<()> {
        redis::cmd("PING")
            .query::<String>(&mut self.conn)
            .map_err(|err| connection_error(&self.addr, err))?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query::<i64>(&mut self.conn)?;
        Ok(())
    }

    fn listener(&mut self, pattern: &str) -> Result<RedisListener> {
        let conn = self
            .client
            .get_connection()
            .map_err(|err| connection_error(&self.addr, err))?;
        Ok(RedisListener {
            conn,
            pattern: pattern.to_string(),
        })
    }
}

/// Subscribed Redis connection feeding one channel.
pub struct RedisListener {
    conn: redis::Connection,
    pattern: String,
}

impl Listener for RedisListener {
    fn pump<F>(mut self, stop: &AtomicBool, mut on_message: F) -> Result<()>
    where
        F: FnMut(TopicMessage),
    {
        self.conn.set_read_timeout(Some(READ_POLL))?;
        let mut pubsub = self.conn.as_pubsub();
        pubsub.psubscribe(self.pattern.as_str())?;

        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            match pubsub.get_message() {
                Ok(msg) => {
                    let topic = msg.get_channel_name().to_string();
                    let payload = msg.get_payload_bytes().to_vec();
                    on_message(TopicMessage { topic, payload });
                }
                // Timeouts are the stop-poll wakeup, not a failure.
                Err(err) if err.is_timeout() => continue,
                Err(err) => return Err(RolloutError::from(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr("cache:6379"), "redis://cache:6379");
        assert_eq!(normalize_addr("redis://cache:6379"), "redis://cache:6379");
        assert_eq!(
            normalize_addr("redis+unix:///tmp/redis.sock"),
            "redis+unix:///tmp/redis.sock"
        );
    }
}
