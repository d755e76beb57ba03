//! STOMP Heart-beating
//!
//! Negotiates the `heart-beat` header and tracks inbound liveness for one
//! connection.
//!
//! Each side announces `cx,cy`: it can send every `cx` ms and wants to
//! receive every `cy` ms (0 means never). The effective period in each
//! direction is the larger of the two non-zero values, or disabled if
//! either is 0.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Silent periods tolerated before the peer is considered dead.
pub const TIMEOUT_MULTIPLIER: u32 = 2;

/// One side's `heart-beat` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest period this side can send at; zero disables.
    pub send: Duration,
    /// Period this side wants to receive at; zero disables.
    pub recv: Duration,
}

impl HeartBeat {
    /// Heart-beating disabled in both directions.
    pub const DISABLED: Self = Self {
        send: Duration::ZERO,
        recv: Duration::ZERO,
    };

    /// Create from send and receive periods.
    #[must_use]
    pub const fn new(send: Duration, recv: Duration) -> Self {
        Self { send, recv }
    }

    /// Parse a `cx,cy` header value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let (send, recv) = value.split_once(',')?;
        Some(Self {
            send: Duration::from_millis(send.trim().parse().ok()?),
            recv: Duration::from_millis(recv.trim().parse().ok()?),
        })
    }

    /// Render as a `heart-beat` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{},{}", self.send.as_millis(), self.recv.as_millis())
    }
}

/// Agreed periods, from the server's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// How often the server sends a heart-beat.
    pub outgoing: Option<Duration>,
    /// How often the server expects inbound traffic.
    pub incoming: Option<Duration>,
}

/// Combine the server's offer with the client's `heart-beat` header.
#[must_use]
pub fn negotiate(server: HeartBeat, client: HeartBeat) -> Negotiated {
    Negotiated {
        outgoing: combine(server.send, client.recv),
        incoming: combine(client.send, server.recv),
    }
}

fn combine(sender: Duration, receiver: Duration) -> Option<Duration> {
    if sender.is_zero() || receiver.is_zero() {
        None
    } else {
        Some(sender.max(receiver))
    }
}

/// Inbound liveness for one connection.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: Instant,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with the clock starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: Instant::now(),
        }
    }

    /// Record any inbound traffic.
    pub fn record_inbound(&mut self) {
        self.last_inbound = Instant::now();
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.elapsed()
    }

    /// Whether the peer has been silent for longer than the tolerance for
    /// `incoming`.
    #[must_use]
    pub fn is_expired(&self, incoming: Duration) -> bool {
        self.time_since_inbound() > incoming * TIMEOUT_MULTIPLIER
    }
}

/// Interval whose first tick is one `period` from now.
#[must_use]
pub fn timer(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Wait for the next tick, or forever if there is no timer.
pub async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn parses_header() {
        assert_eq!(
            HeartBeat::parse("10000,5000"),
            Some(HeartBeat::new(ms(10_000), ms(5_000)))
        );
        assert_eq!(HeartBeat::parse(" 0 , 0 "), Some(HeartBeat::DISABLED));
    }

    #[test_case("" ; "empty")]
    #[test_case("10000" ; "single value")]
    #[test_case("a,b" ; "non numeric")]
    #[test_case("-1,0" ; "negative")]
    fn rejects_malformed_header(value: &str) {
        assert_eq!(HeartBeat::parse(value), None);
    }

    #[test]
    fn header_value_round_trips() {
        let hb = HeartBeat::new(ms(10_000), ms(0));
        assert_eq!(hb.header_value(), "10000,0");
        assert_eq!(HeartBeat::parse(&hb.header_value()), Some(hb));
    }

    #[test_case((10_000, 10_000), (10_000, 10_000) => (Some(10_000), Some(10_000)) ; "symmetric")]
    #[test_case((10_000, 10_000), (0, 0) => (None, None) ; "client disables")]
    #[test_case((0, 0), (5_000, 5_000) => (None, None) ; "server disables")]
    #[test_case((10_000, 10_000), (4_000, 20_000) => (Some(20_000), Some(10_000)) ; "larger period wins")]
    #[test_case((10_000, 0), (4_000, 4_000) => (Some(10_000), None) ; "server does not want inbound")]
    fn negotiation(server: (u64, u64), client: (u64, u64)) -> (Option<u64>, Option<u64>) {
        let n = negotiate(
            HeartBeat::new(ms(server.0), ms(server.1)),
            HeartBeat::new(ms(client.0), ms(client.1)),
        );
        (
            n.outgoing.map(|d| u64::try_from(d.as_millis()).unwrap()),
            n.incoming.map(|d| u64::try_from(d.as_millis()).unwrap()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_twice_the_period() {
        let mut state = HeartbeatState::new();
        let period = ms(1_000);

        tokio::time::advance(ms(1_500)).await;
        assert!(!state.is_expired(period));

        state.record_inbound();
        tokio::time::advance(ms(1_900)).await;
        assert!(!state.is_expired(period));

        tokio::time::advance(ms(200)).await;
        assert!(state.is_expired(period));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_does_not_fire_immediately() {
        let mut interval = Some(timer(ms(100)));

        let early = tokio::time::timeout(ms(50), tick(&mut interval)).await;
        assert!(early.is_err());

        let on_time = tokio::time::timeout(ms(100), tick(&mut interval)).await;
        assert!(on_time.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_timer_never_fires() {
        let mut interval = None;
        let result = tokio::time::timeout(ms(60_000), tick(&mut interval)).await;
        assert!(result.is_err());
    }
}
