// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

use portable_atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientKind {
    /// Push stream subscriber
    Stream,
    /// Bidirectional socket client, the USB console on the reference board
    Socket,
}

impl ClientKind {
    pub fn name(self) -> &'static str {
        match self {
            ClientKind::Stream => "stream",
            ClientKind::Socket => "socket",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PresenceCounts {
    pub stream: u32,
    pub socket: u32,
}

/// Connected client counters. Safe to update from connection callbacks in another context,
/// counters never go below zero.
pub struct ClientPresence {
    stream: AtomicU32,
    socket: AtomicU32,
}

impl Default for ClientPresence {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientPresence {
    pub const fn new() -> Self {
        Self {
            stream: AtomicU32::new(0),
            socket: AtomicU32::new(0),
        }
    }

    fn counter(&self, kind: ClientKind) -> &AtomicU32 {
        match kind {
            ClientKind::Stream => &self.stream,
            ClientKind::Socket => &self.socket,
        }
    }

    /// Returns the new count for `kind`.
    pub fn on_connect(&self, kind: ClientKind) -> u32 {
        let previous = self
            .counter(kind)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_add(1))
            })
            .unwrap_or(u32::MAX);
        let count = previous.saturating_add(1);
        debug!("{} client connected, {} now", kind.name(), count);
        count
    }

    /// Returns the new count for `kind`. A disconnect with no clients counted is ignored.
    pub fn on_disconnect(&self, kind: ClientKind) -> u32 {
        match self
            .counter(kind)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
        {
            Ok(previous) => {
                debug!("{} client disconnected, {} left", kind.name(), previous - 1);
                previous - 1
            }
            Err(_) => {
                warn!("{} disconnect with no clients connected", kind.name());
                0
            }
        }
    }

    pub fn has_any_clients(&self) -> bool {
        let counts = self.counts();
        counts.stream > 0 || counts.socket > 0
    }

    pub fn counts(&self) -> PresenceCounts {
        PresenceCounts {
            stream: self.stream.load(Ordering::Acquire),
            socket: self.socket.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_no_clients() {
        let presence = ClientPresence::new();
        assert!(!presence.has_any_clients());
        assert_eq!(presence.counts(), PresenceCounts::default());
    }

    #[test]
    fn either_kind_counts_as_present() {
        let presence = ClientPresence::new();
        presence.on_connect(ClientKind::Socket);
        assert!(presence.has_any_clients());
        presence.on_disconnect(ClientKind::Socket);
        assert!(!presence.has_any_clients());

        presence.on_connect(ClientKind::Stream);
        assert!(presence.has_any_clients());
    }

    #[test]
    fn kinds_are_counted_separately() {
        let presence = ClientPresence::new();
        presence.on_connect(ClientKind::Stream);
        presence.on_connect(ClientKind::Stream);
        assert_eq!(presence.on_connect(ClientKind::Socket), 1);

        assert_eq!(
            presence.counts(),
            PresenceCounts {
                stream: 2,
                socket: 1
            }
        );
    }

    #[test]
    fn spurious_disconnect_never_goes_negative() {
        let presence = ClientPresence::new();
        assert_eq!(presence.on_disconnect(ClientKind::Stream), 0);
        assert_eq!(presence.on_disconnect(ClientKind::Stream), 0);
        assert_eq!(presence.on_connect(ClientKind::Stream), 1);
        assert_eq!(presence.on_disconnect(ClientKind::Stream), 0);
        assert!(!presence.has_any_clients());
    }

    #[test]
    fn concurrent_updates_balance_out() {
        let presence = std::sync::Arc::new(ClientPresence::new());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let presence = presence.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        presence.on_connect(ClientKind::Socket);
                        presence.on_disconnect(ClientKind::Socket);
                        presence.on_disconnect(ClientKind::Socket);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(presence.counts().socket, 0);
    }
}
