//! Heartbeat-based liveness for the TCP control connection.
//!
//! The connection driver calls [`HealthCheck::poll`] once per interval. The
//! first poll asks for a heartbeat straight away. After that, a heartbeat
//! that has gone a full interval without any inbound traffic makes the
//! connection unhealthy. Unhealthy and closed are terminal; a new connection
//! gets a new `HealthCheck`.

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Active,
    Unhealthy,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    SendHeartbeat,
    Unhealthy,
    Idle,
}

#[derive(Debug)]
pub struct HealthCheck {
    interval: Duration,
    state: HealthState,
    last_heartbeat_sent: Option<Instant>,
    last_traffic: Option<Instant>,
}

impl HealthCheck {
    /// A fresh check for a just-accepted connection.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: HealthState::Active,
            last_heartbeat_sent: None,
            last_traffic: None,
        }
    }

    /// The heartbeat period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The current state.
    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Record that a heartbeat went out at `now`.
    pub fn heartbeat_sent(&mut self, now: Instant) {
        self.last_heartbeat_sent = Some(now);
    }

    /// Any inbound traffic counts, not only heartbeats.
    pub fn traffic_received(&mut self, now: Instant) {
        self.last_traffic = Some(now);
    }

    /// Decide what to do at `now`. Call once per interval.
    pub fn poll(&mut self, now: Instant) -> HealthAction {
        if self.state != HealthState::Active {
            return HealthAction::Idle;
        }

        let Some(sent) = self.last_heartbeat_sent else {
            return HealthAction::SendHeartbeat;
        };

        let elapsed = now.saturating_duration_since(sent);
        if elapsed < self.interval {
            return HealthAction::Idle;
        }

        let heard_since = self.last_traffic.is_some_and(|t| t >= sent);
        if heard_since {
            HealthAction::SendHeartbeat
        } else {
            self.state = HealthState::Unhealthy;
            HealthAction::Unhealthy
        }
    }

    /// Mark the connection closed. Later polls are idle.
    pub fn close(&mut self) {
        self.state = HealthState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(2);

    fn started(now: Instant) -> HealthCheck {
        let mut health = HealthCheck::new(INTERVAL);
        assert_eq!(health.poll(now), HealthAction::SendHeartbeat);
        health.heartbeat_sent(now);
        health
    }

    #[test]
    fn heartbeat_on_start() {
        let mut health = HealthCheck::new(INTERVAL);
        assert_eq!(health.state(), HealthState::Active);
        assert_eq!(health.poll(Instant::now()), HealthAction::SendHeartbeat);
    }

    #[test]
    fn traffic_keeps_connection_alive() {
        let t0 = Instant::now();
        let mut health = started(t0);

        health.traffic_received(t0 + Duration::from_millis(500));
        assert_eq!(health.poll(t0 + INTERVAL), HealthAction::SendHeartbeat);
        health.heartbeat_sent(t0 + INTERVAL);

        health.traffic_received(t0 + INTERVAL + Duration::from_millis(1));
        assert_eq!(health.poll(t0 + INTERVAL * 2), HealthAction::SendHeartbeat);
        assert_eq!(health.state(), HealthState::Active);
    }

    #[test]
    fn silence_after_heartbeat_is_unhealthy() {
        let t0 = Instant::now();
        let mut health = started(t0);

        assert_eq!(health.poll(t0 + INTERVAL), HealthAction::Unhealthy);
        assert_eq!(health.state(), HealthState::Unhealthy);
        // Terminal: no second unhealthy signal.
        assert_eq!(health.poll(t0 + INTERVAL * 3), HealthAction::Idle);
    }

    #[test]
    fn traffic_before_heartbeat_does_not_count() {
        let t0 = Instant::now();
        let mut health = HealthCheck::new(INTERVAL);
        health.traffic_received(t0);
        let sent = t0 + Duration::from_millis(10);
        assert_eq!(health.poll(sent), HealthAction::SendHeartbeat);
        health.heartbeat_sent(sent);
        assert_eq!(health.poll(sent + INTERVAL), HealthAction::Unhealthy);
    }

    #[test]
    fn early_tick_waits() {
        let t0 = Instant::now();
        let mut health = started(t0);
        assert_eq!(
            health.poll(t0 + INTERVAL - Duration::from_millis(1)),
            HealthAction::Idle
        );
        assert_eq!(health.state(), HealthState::Active);
    }

    #[test]
    fn closed_is_terminal() {
        let t0 = Instant::now();
        let mut health = started(t0);
        health.close();
        assert_eq!(health.state(), HealthState::Closed);
        assert_eq!(health.poll(t0 + INTERVAL * 5), HealthAction::Idle);
    }
}
