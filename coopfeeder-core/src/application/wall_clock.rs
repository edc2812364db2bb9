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

use embassy_time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchor {
    epoch_ms: u64,
    at: Instant,
}

/// Maps device uptime onto Unix time once a client has told us the time. Until then timestamps
/// are reported as uptime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock {
    anchor: Option<Anchor>,
}

impl WallClock {
    pub const fn new() -> Self {
        Self { anchor: None }
    }

    pub fn anchor(&mut self, epoch_ms: u64, now: Instant) {
        debug!("Wall clock anchored to {} at uptime {} ms", epoch_ms, now.as_millis());
        self.anchor = Some(Anchor { epoch_ms, at: now });
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn epoch_ms_at(&self, at: Instant) -> u64 {
        match self.anchor {
            None => at.as_millis(),
            Some(anchor) if at >= anchor.at => {
                anchor.epoch_ms.saturating_add((at - anchor.at).as_millis())
            }
            Some(anchor) => anchor.epoch_ms.saturating_sub((anchor.at - at).as_millis()),
        }
    }
}
